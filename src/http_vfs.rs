//! Read-only SQLite VFS backed by the paged remote reader.
//!
//! SQLite reaches the outside world exclusively through a VFS, so this is
//! where the engine plugs into [`PagedRemoteReader`]: every `xRead` the
//! B-tree layer issues becomes a paged read, and everything else (locks,
//! journals, writes) is answered with "this file is immutable". The database
//! opened through this VFS is not a path at all but a handle name minted by
//! [`register_reader`]; `xOpen` resolves it back to its reader through a
//! process-wide registry.
//!
//! All callbacks run on the engine worker thread, which is a plain
//! `std::thread`, so the blocking reads here never park the async runtime.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use rusqlite::ffi;

use crate::paged_reader::PagedRemoteReader;

/// Name the VFS is registered under; pass to
/// `Connection::open_with_flags_and_vfs`.
pub const VFS_NAME: &str = "cheatbase-http";

const VFS_CNAME: &[u8] = b"cheatbase-http\0";

/// Readers addressable by handle name, resolved in `xOpen`.
static READERS: Lazy<DashMap<String, Arc<PagedRemoteReader>>> = Lazy::new(DashMap::new);

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(0);

static REGISTER_VFS: Once = Once::new();

/// Registers a reader and returns the handle name to open a connection with.
///
/// The first call also registers the VFS itself with SQLite.
pub fn register_reader(reader: Arc<PagedRemoteReader>) -> String {
    ensure_vfs_registered();
    let name = format!("cheatbase-db-{}", NEXT_HANDLE.fetch_add(1, Ordering::Relaxed));
    READERS.insert(name.clone(), reader);
    name
}

/// Removes a reader from the registry once its engine is gone.
///
/// Open file handles keep their own reference; this only prevents new opens.
pub fn unregister_reader(name: &str) {
    READERS.remove(name);
}

fn ensure_vfs_registered() {
    REGISTER_VFS.call_once(|| {
        let vfs = Box::new(ffi::sqlite3_vfs {
            iVersion: 1,
            szOsFile: std::mem::size_of::<HttpFile>() as c_int,
            mxPathname: 512,
            pNext: std::ptr::null_mut(),
            zName: VFS_CNAME.as_ptr() as *const c_char,
            pAppData: std::ptr::null_mut(),
            xOpen: Some(x_open),
            xDelete: Some(x_delete),
            xAccess: Some(x_access),
            xFullPathname: Some(x_full_pathname),
            xDlOpen: None,
            xDlError: None,
            xDlSym: None,
            xDlClose: None,
            xRandomness: Some(x_randomness),
            xSleep: Some(x_sleep),
            xCurrentTime: Some(x_current_time),
            xGetLastError: Some(x_get_last_error),
            xCurrentTimeInt64: None,
            xSetSystemCall: None,
            xGetSystemCall: None,
            xNextSystemCall: None,
        });
        // The VFS must outlive the process; SQLite keeps the raw pointer.
        let rc = unsafe { ffi::sqlite3_vfs_register(Box::into_raw(vfs), 0) };
        if rc != ffi::SQLITE_OK {
            tracing::error!(rc, "failed to register the http vfs with sqlite");
        }
    });
}

/// Open file handle layout SQLite allocates for us (`szOsFile` bytes).
/// Must start with `sqlite3_file` per the VFS contract.
#[repr(C)]
struct HttpFile {
    base: ffi::sqlite3_file,
    /// Raised `Arc<PagedRemoteReader>`, released in `xClose`.
    reader: *const PagedRemoteReader,
}

static HTTP_IO_METHODS: ffi::sqlite3_io_methods = ffi::sqlite3_io_methods {
    iVersion: 1,
    xClose: Some(x_close),
    xRead: Some(x_read),
    xWrite: Some(x_write),
    xTruncate: Some(x_truncate),
    xSync: Some(x_sync),
    xFileSize: Some(x_file_size),
    xLock: Some(x_lock),
    xUnlock: Some(x_unlock),
    xCheckReservedLock: Some(x_check_reserved_lock),
    xFileControl: Some(x_file_control),
    xSectorSize: Some(x_sector_size),
    xDeviceCharacteristics: Some(x_device_characteristics),
    xShmMap: None,
    xShmLock: None,
    xShmBarrier: None,
    xShmUnmap: None,
    xFetch: None,
    xUnfetch: None,
};

/// # Safety
/// `file` must be a live `HttpFile` whose reader pointer was set in `x_open`.
unsafe fn file_reader<'a>(file: *mut ffi::sqlite3_file) -> Option<&'a PagedRemoteReader> {
    let http_file = file as *mut HttpFile;
    let reader = (*http_file).reader;
    if reader.is_null() {
        None
    } else {
        Some(&*reader)
    }
}

unsafe extern "C" fn x_open(
    _vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    file: *mut ffi::sqlite3_file,
    flags: c_int,
    p_out_flags: *mut c_int,
) -> c_int {
    let http_file = file as *mut HttpFile;
    // If open fails, pMethods must stay null so SQLite skips xClose.
    (*http_file).base.pMethods = std::ptr::null();
    (*http_file).reader = std::ptr::null();

    // Only the main database exists; journals and WALs are refused.
    if flags & ffi::SQLITE_OPEN_MAIN_DB == 0 || z_name.is_null() {
        return ffi::SQLITE_CANTOPEN;
    }
    let name = match CStr::from_ptr(z_name).to_str() {
        Ok(name) => name,
        Err(_) => return ffi::SQLITE_CANTOPEN,
    };
    let reader = match READERS.get(name) {
        Some(reader) => Arc::clone(reader.value()),
        None => return ffi::SQLITE_CANTOPEN,
    };

    (*http_file).reader = Arc::into_raw(reader);
    (*http_file).base.pMethods = &HTTP_IO_METHODS;
    if !p_out_flags.is_null() {
        *p_out_flags = flags;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_close(file: *mut ffi::sqlite3_file) -> c_int {
    let http_file = file as *mut HttpFile;
    if !(*http_file).reader.is_null() {
        drop(Arc::from_raw((*http_file).reader));
        (*http_file).reader = std::ptr::null();
    }
    (*http_file).base.pMethods = std::ptr::null();
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_read(
    file: *mut ffi::sqlite3_file,
    buf: *mut c_void,
    amt: c_int,
    ofst: ffi::sqlite3_int64,
) -> c_int {
    if amt <= 0 {
        return ffi::SQLITE_OK;
    }
    let Some(reader) = file_reader(file) else {
        return ffi::SQLITE_IOERR_READ;
    };
    let wanted = amt as usize;
    let out = std::slice::from_raw_parts_mut(buf as *mut u8, wanted);

    match reader.read_blocking(ofst as u64, amt as u64) {
        Ok(bytes) => {
            let got = bytes.len().min(wanted);
            out[..got].copy_from_slice(&bytes[..got]);
            if got < wanted {
                // Past end of file: zero-fill and report the short read.
                out[got..].fill(0);
                return ffi::SQLITE_IOERR_SHORT_READ;
            }
            ffi::SQLITE_OK
        }
        Err(failure) => {
            tracing::warn!(error = %failure, offset = ofst, length = amt, "page read failed");
            reader.record_failure(failure);
            ffi::SQLITE_IOERR_READ
        }
    }
}

unsafe extern "C" fn x_write(
    _file: *mut ffi::sqlite3_file,
    _buf: *const c_void,
    _amt: c_int,
    _ofst: ffi::sqlite3_int64,
) -> c_int {
    ffi::SQLITE_READONLY
}

unsafe extern "C" fn x_truncate(_file: *mut ffi::sqlite3_file, _size: ffi::sqlite3_int64) -> c_int {
    ffi::SQLITE_READONLY
}

unsafe extern "C" fn x_sync(_file: *mut ffi::sqlite3_file, _flags: c_int) -> c_int {
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_file_size(
    file: *mut ffi::sqlite3_file,
    p_size: *mut ffi::sqlite3_int64,
) -> c_int {
    let Some(reader) = file_reader(file) else {
        return ffi::SQLITE_IOERR;
    };
    *p_size = reader.total_size() as ffi::sqlite3_int64;
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_lock(_file: *mut ffi::sqlite3_file, _level: c_int) -> c_int {
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_unlock(_file: *mut ffi::sqlite3_file, _level: c_int) -> c_int {
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_check_reserved_lock(
    _file: *mut ffi::sqlite3_file,
    p_res_out: *mut c_int,
) -> c_int {
    if !p_res_out.is_null() {
        *p_res_out = 0;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_file_control(
    _file: *mut ffi::sqlite3_file,
    _op: c_int,
    _arg: *mut c_void,
) -> c_int {
    ffi::SQLITE_NOTFOUND
}

unsafe extern "C" fn x_sector_size(file: *mut ffi::sqlite3_file) -> c_int {
    match file_reader(file) {
        Some(reader) => reader.page_size().min(65536) as c_int,
        None => 4096,
    }
}

unsafe extern "C" fn x_device_characteristics(_file: *mut ffi::sqlite3_file) -> c_int {
    // The remote file never changes for the session, which lets SQLite skip
    // change detection and locking entirely.
    ffi::SQLITE_IOCAP_IMMUTABLE
}

unsafe extern "C" fn x_delete(
    _vfs: *mut ffi::sqlite3_vfs,
    _z_name: *const c_char,
    _sync_dir: c_int,
) -> c_int {
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_access(
    _vfs: *mut ffi::sqlite3_vfs,
    _z_name: *const c_char,
    _flags: c_int,
    p_res_out: *mut c_int,
) -> c_int {
    // No journal, no WAL, nothing on disk at all.
    if !p_res_out.is_null() {
        *p_res_out = 0;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_full_pathname(
    _vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    n_out: c_int,
    z_out: *mut c_char,
) -> c_int {
    if z_name.is_null() || z_out.is_null() {
        return ffi::SQLITE_CANTOPEN;
    }
    let name = CStr::from_ptr(z_name).to_bytes_with_nul();
    if name.len() > n_out as usize {
        return ffi::SQLITE_CANTOPEN;
    }
    std::ptr::copy_nonoverlapping(name.as_ptr() as *const c_char, z_out, name.len());
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_randomness(
    _vfs: *mut ffi::sqlite3_vfs,
    n_byte: c_int,
    z_out: *mut c_char,
) -> c_int {
    // A read-only session never needs entropy; zeros keep it deterministic.
    if !z_out.is_null() && n_byte > 0 {
        std::ptr::write_bytes(z_out, 0, n_byte as usize);
    }
    n_byte
}

unsafe extern "C" fn x_sleep(_vfs: *mut ffi::sqlite3_vfs, microseconds: c_int) -> c_int {
    std::thread::sleep(Duration::from_micros(microseconds.max(0) as u64));
    microseconds
}

unsafe extern "C" fn x_current_time(_vfs: *mut ffi::sqlite3_vfs, p_time: *mut f64) -> c_int {
    if !p_time.is_null() {
        let unix_seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();
        // Julian day number of the Unix epoch plus elapsed days.
        *p_time = 2440587.5 + unix_seconds / 86400.0;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_get_last_error(
    _vfs: *mut ffi::sqlite3_vfs,
    _n_byte: c_int,
    _z_out: *mut c_char,
) -> c_int {
    ffi::SQLITE_OK
}
