//! Where the database lives and how it is paged.
//!
//! A [`RemoteSource`] pins down everything the reader needs to know about the
//! immutable database file: its location, the fixed page granularity for
//! range requests, and the per-session transfer budget. The location itself
//! follows one documented policy: a local-looking origin serves its own copy
//! of the data, anything else falls back to the public file.

use url::Url;

/// Fixed page size for range requests, in bytes.
///
/// Matches the SQLite default page size, so most engine reads land on exactly
/// one page.
pub const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Default cap on bytes transferred per session (10 MiB).
///
/// A runaway query (or a database without useful indexes) would otherwise
/// slowly mirror the whole remote file; past this point the session is
/// cheaper to restart than to continue.
pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Public fallback URL for the cheat-code database.
pub const REMOTE_FALLBACK_URL: &str = "https://static.mackrodt.io/files/bsfree.4cfee26.db";

/// Path of the database relative to a local development origin.
pub const LOCAL_DATA_PATH: &str = "data/bsfree.db";

/// Environment variable holding an explicit database location override.
pub const ENV_DATABASE: &str = "CHEATBASE_DB";

/// Environment variable holding the application origin for URL selection.
pub const ENV_ORIGIN: &str = "CHEATBASE_ORIGIN";

/// Descriptor of the immutable remote database file.
///
/// `page_size` is constant for the lifetime of a session; it is the minimum
/// unit of network I/O. `total_size` may be declared up front to skip the
/// size probe at open; otherwise the reader issues one HEAD request.
#[derive(Debug, Clone)]
pub struct RemoteSource {
    /// Database location: an HTTP(S) URL, a local path, or `memory://name`.
    pub location: String,
    /// Fixed page granularity for range requests.
    pub page_size: u64,
    /// Declared total size in bytes, if known.
    pub total_size: Option<u64>,
    /// Per-session transfer budget; `None` disables the cap.
    pub max_bytes: Option<u64>,
}

impl RemoteSource {
    /// Creates a source with the default page size and transfer budget.
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            page_size: DEFAULT_PAGE_SIZE,
            total_size: None,
            max_bytes: Some(DEFAULT_MAX_BYTES),
        }
    }

    /// Overrides the page granularity.
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    /// Declares the total file size, skipping the size probe at open.
    pub fn with_total_size(mut self, total_size: u64) -> Self {
        self.total_size = Some(total_size);
        self
    }

    /// Sets or disables the per-session transfer budget.
    pub fn with_max_bytes(mut self, max_bytes: Option<u64>) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Builds a source from the process environment.
    ///
    /// `CHEATBASE_DB` overrides everything; otherwise `CHEATBASE_ORIGIN`
    /// feeds the [`pick_database_url`] policy.
    pub fn from_environment() -> Self {
        if let Ok(location) = std::env::var(ENV_DATABASE) {
            return Self::new(location);
        }
        let origin = std::env::var(ENV_ORIGIN).ok();
        Self::new(pick_database_url(origin.as_deref()))
    }
}

/// Picks the database URL for an application origin.
///
/// Policy: a local-looking origin (loopback, an all-numeric host, or a
/// `*.local` name) serves its own copy under [`LOCAL_DATA_PATH`]; anything
/// else, including no origin at all, uses [`REMOTE_FALLBACK_URL`].
pub fn pick_database_url(origin: Option<&str>) -> String {
    match origin {
        Some(origin) if is_local_origin(origin) => {
            format!("{}/{}", origin.trim_end_matches('/'), LOCAL_DATA_PATH)
        }
        _ => REMOTE_FALLBACK_URL.to_string(),
    }
}

/// Whether an origin looks like a local development server.
fn is_local_origin(origin: &str) -> bool {
    let Ok(url) = Url::parse(origin) else {
        return false;
    };
    match url.host_str() {
        Some(host) => {
            host == "localhost"
                || host.ends_with(".local")
                || host.split('.').all(|part| {
                    !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
                })
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_origins_use_the_local_data_path() {
        assert_eq!(
            pick_database_url(Some("http://localhost:8080")),
            "http://localhost:8080/data/bsfree.db"
        );
        assert_eq!(
            pick_database_url(Some("http://127.0.0.1:3000/")),
            "http://127.0.0.1:3000/data/bsfree.db"
        );
        assert_eq!(
            pick_database_url(Some("http://192.168.1.20")),
            "http://192.168.1.20/data/bsfree.db"
        );
    }

    #[test]
    fn dot_local_hostnames_count_as_local() {
        assert_eq!(
            pick_database_url(Some("http://devbox.local")),
            "http://devbox.local/data/bsfree.db"
        );
    }

    #[test]
    fn public_hosts_fall_back_to_the_remote_url() {
        assert_eq!(pick_database_url(Some("https://cheats.example.org")), REMOTE_FALLBACK_URL);
        assert_eq!(pick_database_url(None), REMOTE_FALLBACK_URL);
    }

    #[test]
    fn garbage_origins_fall_back_to_the_remote_url() {
        assert_eq!(pick_database_url(Some("not a url")), REMOTE_FALLBACK_URL);
    }

    #[test]
    fn defaults_match_the_session_contract() {
        let source = RemoteSource::new("memory://test.db");
        assert_eq!(source.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(source.max_bytes, Some(DEFAULT_MAX_BYTES));
        assert!(source.total_size.is_none());
    }
}
