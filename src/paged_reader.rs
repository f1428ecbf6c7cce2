//! On-demand paged reading of a remote file.
//!
//! The remote database is an immutable blob behind a dumb file server; the
//! only operation available is an HTTP range request. [`PagedRemoteReader`]
//! turns that into random-access reads: every read is translated into the
//! minimal covering set of fixed-size pages, only the pages not already
//! resident are fetched (concurrently, within one read), and fetched pages
//! are kept for the whole session so repeated queries stop touching the
//! network entirely.
//!
//! The reader is deliberately thin: no retries, no timeouts, no eviction.
//! A failed page fetch fails the whole read and the engine above decides
//! what to do with the statement.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::future::try_join_all;
use object_store::{path::Path as ObjectPath, ObjectStore};

use crate::error::ReaderError;
use crate::remote_source::RemoteSource;
use crate::utils::file_interaction_local_and_remote::get_object_store;

/// Random-access view of a remote file, backed by cached fixed-size pages.
///
/// Pages are fetched at most once per session and retained until the reader
/// is dropped. The page map is the only place residency is tracked, so an
/// eviction policy could be added behind it without touching callers.
///
/// # Examples
///
/// ```no_run
/// use cheatbase::paged_reader::PagedRemoteReader;
/// use cheatbase::remote_source::RemoteSource;
///
/// # async fn example() -> Result<(), cheatbase::error::ReaderError> {
/// let source = RemoteSource::new("https://static.example.org/cheats.db");
/// let reader = PagedRemoteReader::open(&source).await?;
///
/// // Reads exactly these bytes, fetching only the pages that cover them.
/// let header = reader.read(0, 100).await?;
/// assert_eq!(header.len(), 100);
/// # Ok(())
/// # }
/// ```
pub struct PagedRemoteReader {
    store: Arc<dyn ObjectStore>,
    path: ObjectPath,
    page_size: u64,
    total_size: u64,
    max_bytes: Option<u64>,
    pages: DashMap<u64, Bytes>,
    /// Bytes transferred since the last [`take_bytes_read`](Self::take_bytes_read).
    bytes_read: AtomicU64,
    /// Bytes transferred over the whole session; feeds the budget check.
    session_bytes: AtomicU64,
    runtime: tokio::runtime::Handle,
    last_failure: Mutex<Option<ReaderError>>,
}

impl PagedRemoteReader {
    /// Opens the remote file and probes its size if it was not declared.
    ///
    /// Issues at most one HEAD request; no page is fetched until the first
    /// [`read`](Self::read).
    ///
    /// # Errors
    ///
    /// Returns an error if the location cannot be resolved to a store or the
    /// size probe fails (unreachable host, missing file).
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime; the runtime handle is
    /// captured here so [`read_blocking`](Self::read_blocking) can drive
    /// fetches from a plain thread later.
    pub async fn open(source: &RemoteSource) -> Result<Self, ReaderError> {
        let (store, path) = get_object_store(&source.location).await?;
        let total_size = match source.total_size {
            Some(size) => size,
            None => store.head(&path).await?.size,
        };

        Ok(Self {
            store,
            path,
            page_size: source.page_size,
            total_size,
            max_bytes: source.max_bytes,
            pages: DashMap::new(),
            bytes_read: AtomicU64::new(0),
            session_bytes: AtomicU64::new(0),
            runtime: tokio::runtime::Handle::current(),
            last_failure: Mutex::new(None),
        })
    }

    /// Reads `length` bytes starting at `offset`.
    ///
    /// Computes the inclusive range of page indices covering the request,
    /// fetches every non-resident page concurrently, waits for all of them,
    /// then assembles exactly the requested sub-range. Reads reaching past
    /// end-of-file return the available prefix; the caller decides whether a
    /// short read is an error.
    ///
    /// # Errors
    ///
    /// * [`ReaderError::InvalidRange`] for zero-length reads
    /// * [`ReaderError::ByteBudgetExceeded`] if the fetch would blow the
    ///   session transfer budget
    /// * [`ReaderError::Transport`] if any required page fetch fails; no
    ///   partial result is returned and nothing is retried
    pub async fn read(&self, offset: u64, length: u64) -> Result<Bytes, ReaderError> {
        if length == 0 {
            return Err(ReaderError::InvalidRange { offset });
        }
        if offset >= self.total_size {
            return Ok(Bytes::new());
        }
        let end = (offset + length).min(self.total_size);

        let first = offset / self.page_size;
        let last = (end - 1) / self.page_size;
        let count = (last - first + 1) as usize;

        let mut covering: Vec<Option<Bytes>> = vec![None; count];
        for (slot, page) in covering.iter_mut().enumerate() {
            let index = first + slot as u64;
            if let Some(resident) = self.pages.get(&index) {
                *page = Some(resident.value().clone());
            }
        }

        let missing: Vec<(usize, u64)> = covering
            .iter()
            .enumerate()
            .filter(|(_, page)| page.is_none())
            .map(|(slot, _)| (slot, first + slot as u64))
            .collect();

        if !missing.is_empty() {
            self.check_byte_budget(&missing)?;

            let fetched = try_join_all(
                missing.iter().map(|&(_, index)| self.fetch_page(index)),
            )
            .await?;

            for (&(slot, index), bytes) in missing.iter().zip(fetched) {
                let transferred = bytes.len() as u64;
                self.bytes_read.fetch_add(transferred, Ordering::Relaxed);
                self.session_bytes.fetch_add(transferred, Ordering::Relaxed);
                self.pages.insert(index, bytes.clone());
                covering[slot] = Some(bytes);
            }
        }

        let mut out = Vec::with_capacity((end - offset) as usize);
        for (slot, page) in covering.into_iter().enumerate() {
            let page = match page {
                Some(page) => page,
                None => continue,
            };
            let page_start = (first + slot as u64) * self.page_size;
            let copy_from = offset.max(page_start);
            let copy_to = end.min(page_start + page.len() as u64);
            if copy_to > copy_from {
                let lo = (copy_from - page_start) as usize;
                let hi = (copy_to - page_start) as usize;
                out.extend_from_slice(&page[lo..hi]);
            }
        }

        Ok(Bytes::from(out))
    }

    /// Drives [`read`](Self::read) to completion from a non-runtime thread.
    ///
    /// This is the entry point for the SQLite VFS callbacks, which run on the
    /// engine worker thread. Calling it from inside the async runtime would
    /// deadlock; the worker thread is a plain `std::thread`.
    pub fn read_blocking(&self, offset: u64, length: u64) -> Result<Bytes, ReaderError> {
        self.runtime.block_on(self.read(offset, length))
    }

    /// Total size of the remote file in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Configured page granularity in bytes.
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Number of pages currently resident.
    pub fn resident_pages(&self) -> usize {
        self.pages.len()
    }

    /// Bytes transferred over the wire for the whole session.
    pub fn total_bytes_read(&self) -> u64 {
        self.session_bytes.load(Ordering::Relaxed)
    }

    /// Returns the bytes transferred since the last call and resets the
    /// counter to zero.
    ///
    /// The worker boundary calls this right after each statement settles and
    /// before the next one starts, so each report covers exactly one
    /// statement.
    pub fn take_bytes_read(&self) -> u64 {
        self.bytes_read.swap(0, Ordering::Relaxed)
    }

    /// Stashes a read failure so the worker can recover the typed error
    /// after SQLite collapses it into an I/O result code.
    pub(crate) fn record_failure(&self, failure: ReaderError) {
        if let Ok(mut slot) = self.last_failure.lock() {
            *slot = Some(failure);
        }
    }

    /// Takes the most recent recorded read failure, if any.
    pub(crate) fn take_failure(&self) -> Option<ReaderError> {
        self.last_failure.lock().ok().and_then(|mut slot| slot.take())
    }

    fn check_byte_budget(&self, missing: &[(usize, u64)]) -> Result<(), ReaderError> {
        let Some(limit) = self.max_bytes else {
            return Ok(());
        };
        let incoming: u64 = missing
            .iter()
            .map(|&(_, index)| self.page_span(index))
            .sum();
        let transferred = self.session_bytes.load(Ordering::Relaxed);
        if transferred + incoming > limit {
            return Err(ReaderError::ByteBudgetExceeded {
                transferred: transferred + incoming,
                limit,
            });
        }
        Ok(())
    }

    /// Length of the page at `index`, accounting for a short final page.
    fn page_span(&self, index: u64) -> u64 {
        let start = index * self.page_size;
        self.page_size.min(self.total_size - start)
    }

    async fn fetch_page(&self, index: u64) -> Result<Bytes, ReaderError> {
        let start = index * self.page_size;
        let end = (start + self.page_size).min(self.total_size);
        let bytes = self.store.get_range(&self.path, start..end).await?;
        Ok(bytes)
    }
}

impl std::fmt::Debug for PagedRemoteReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedRemoteReader")
            .field("path", &self.path)
            .field("page_size", &self.page_size)
            .field("total_size", &self.total_size)
            .field("resident_pages", &self.pages.len())
            .finish()
    }
}
