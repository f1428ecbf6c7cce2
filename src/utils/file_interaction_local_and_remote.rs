use std::sync::Arc;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use object_store::{ClientOptions, ObjectStore, http::HttpBuilder, local::LocalFileSystem, memory::InMemory, path::Path as ObjectPath};
use url::Url;

use crate::error::ReaderError;

/// Global cache for HTTP stores, keyed by origin (`scheme://host[:port]`).
///
/// A static file server never changes identity mid-session, so one client per
/// origin is enough. Recreating the store would rebuild the underlying HTTP
/// connection pool on every open; caching keeps connection reuse working
/// across repeated opens of the same database. Uses DashMap for lock-free
/// concurrent access.
static HTTP_STORE_CACHE: Lazy<DashMap<String, Arc<dyn ObjectStore>>> =
    Lazy::new(DashMap::new);

/// Global registry of in-memory files for `memory://` paths.
///
/// Tests register fixture bytes here and address them through the same
/// `get_object_store` entry point the production paths use, so the whole
/// read stack can be exercised without a network or a filesystem.
static MEMORY_STORE_CACHE: Lazy<DashMap<String, Arc<InMemory>>> =
    Lazy::new(DashMap::new);

/// Gets or creates a cached HTTP store for the given origin.
///
/// # Arguments
///
/// * `origin` - Base URL of the file server, e.g. `"https://static.example.org"`
///
/// # Errors
///
/// Returns an error if the origin is not a valid URL or the HTTP client
/// cannot be constructed.
pub fn get_cached_http_store(
    origin: &str,
) -> Result<Arc<dyn ObjectStore>, ReaderError> {
    if let Some(store) = HTTP_STORE_CACHE.get(origin) {
        return Ok(Arc::clone(store.value()));
    }
    let store = create_http_store(origin)?;
    HTTP_STORE_CACHE.insert(origin.to_string(), Arc::clone(&store));
    Ok(store)
}

/// Creates an `ObjectStore` and path from a database location string.
///
/// This is the single entry point that turns any supported location into a
/// store + path pair the paged reader can issue range requests against.
///
/// # Supported Location Formats
///
/// * **HTTP**: `"http://host/file.db"` or `"https://host/file.db"` → HTTP
///   range requests against a static file server (store cached per origin)
/// * **Memory**: `"memory://name.db"` → in-memory fixture registered via
///   [`register_memory_file`] (tests)
/// * **Local**: absolute or relative filesystem paths → local filesystem
///
/// # Errors
///
/// Returns an error if an HTTP URL is malformed, or a local path cannot be
/// resolved against the current directory.
pub async fn get_object_store(
    location: &str,
) -> Result<(Arc<dyn ObjectStore>, ObjectPath), ReaderError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        let url = Url::parse(location)?;
        let origin = url.origin().ascii_serialization();
        let key = url.path().trim_start_matches('/');

        let store = get_cached_http_store(&origin)?;
        let path = ObjectPath::from(key);

        Ok((store, path))
    } else if let Some(name) = location.strip_prefix("memory://") {
        let store = MEMORY_STORE_CACHE
            .entry("default".to_string())
            .or_insert_with(|| Arc::new(InMemory::new()))
            .clone();
        Ok((store as Arc<dyn ObjectStore>, ObjectPath::from(name)))
    } else {
        use std::path::Path as StdPath;

        let std_path = StdPath::new(location);
        let absolute_path = if std_path.is_absolute() {
            std_path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| object_store::Error::Generic {
                    store: "LocalFileSystem",
                    source: Box::new(e),
                })?
                .join(std_path)
        };

        let path_str = absolute_path.to_string_lossy();
        let relative = path_str.trim_start_matches('/').to_string();

        let local_store =
            LocalFileSystem::new_with_prefix("/").map_err(ReaderError::Transport)?;
        let store: Arc<dyn ObjectStore> = Arc::new(local_store);
        let path = ObjectPath::from(relative);

        Ok((store, path))
    }
}

/// Registers bytes under a `memory://` name so tests can open them like a
/// remote database.
pub async fn register_memory_file(
    location: &str,
    bytes: bytes::Bytes,
) -> Result<(), ReaderError> {
    let name = location.strip_prefix("memory://").unwrap_or(location);
    let store = MEMORY_STORE_CACHE
        .entry("default".to_string())
        .or_insert_with(|| Arc::new(InMemory::new()))
        .clone();
    store
        .put(&ObjectPath::from(name), bytes.into())
        .await
        .map_err(ReaderError::Transport)?;
    Ok(())
}

/// Creates an HTTP `ObjectStore` rooted at the given origin.
///
/// Plain `http://` origins are allowed because local development servers
/// rarely speak TLS; production deployments sit behind HTTPS anyway.
pub fn create_http_store(
    origin: &str,
) -> Result<Arc<dyn ObjectStore>, ReaderError> {
    let store = HttpBuilder::new()
        .with_url(origin)
        .with_client_options(ClientOptions::new().with_allow_http(true))
        .build()
        .map_err(ReaderError::Transport)?;
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_files_round_trip_through_the_store() {
        register_memory_file("memory://fixtures/hello.db", bytes::Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let (store, path) = get_object_store("memory://fixtures/hello.db").await.unwrap();
        let data = store.get(&path).await.unwrap().bytes().await.unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[tokio::test]
    async fn http_stores_are_cached_per_origin() {
        let a = get_cached_http_store("https://files.example.org").unwrap();
        let b = get_cached_http_store("https://files.example.org").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = get_cached_http_store("https://other.example.org").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn http_locations_split_into_origin_and_key() {
        let (_, path) = get_object_store("https://files.example.org/data/cheats.db")
            .await
            .unwrap();
        assert_eq!(path.as_ref(), "data/cheats.db");
    }
}
