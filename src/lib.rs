//! Cheatbase - Lazy SQL over a Remote Cheat-Code Database
//!
//! A client library for querying a read-only SQLite database that lives on a
//! plain static file host. Nothing is downloaded up front: SQLite runs
//! locally and every page it touches is fetched on demand with an HTTP range
//! request, so listing the systems in a multi-hundred-megabyte database
//! costs a few kilobytes of traffic.
//!
//! # Overview
//!
//! This library provides:
//! - **Paged Remote Reads**: Fixed-size page fetches over HTTP range
//!   requests, with coalescing for multi-page reads and a session page cache
//! - **Embedded Engine**: A read-only SQLite connection wired to the paged
//!   reader through a custom VFS, running on a dedicated worker thread
//! - **Result Memoization**: Per-session caching keyed on statement plus
//!   parameters, with single-flight deduplication of concurrent callers
//! - **Typed Catalog**: Systems, games, and cheat-code listings mapped into
//!   plain Rust types, with legacy HTML markup decoded along the way
//!
//! # Quick Start
//!
//! ```no_run
//! use cheatbase::{catalog, QueryClient, RemoteSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cheatbase::QueryError> {
//!     let client = QueryClient::new(RemoteSource::from_environment());
//!
//!     for system in catalog::get_systems(&client).await? {
//!         println!("{} ({} games)", system.name, system.qty);
//!     }
//!
//!     println!("{} bytes transferred", client.total_bytes_read());
//!     Ok(())
//! }
//! ```
//!
//! # Transfer Discipline
//!
//! - **Page size**: 4 KiB per fetch, matching the database's SQLite page size
//! - **Budget**: an optional per-session byte ceiling aborts runaway scans
//! - **Accounting**: per-statement and per-session byte counters
pub mod catalog;
pub mod error;
pub mod http_vfs;
pub mod paged_reader;
pub mod query_facade;
pub mod query_worker;
pub mod remote_source;
pub mod result_cache;
pub mod text_decode;
#[cfg(test)]
pub mod unit_tests;
pub mod utils;

pub use crate::error::{QueryError, ReaderError};
pub use crate::paged_reader::PagedRemoteReader;
pub use crate::query_facade::{QueryClient, Row};
pub use crate::query_worker::{QueryRequest, ScalarValue};
pub use crate::remote_source::RemoteSource;
