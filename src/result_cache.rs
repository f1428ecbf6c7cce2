//! Per-session result memoization with single-flight semantics.
//!
//! Each distinct [`QueryRequest`] is computed exactly once; concurrent
//! callers asking for the same request share the in-flight computation
//! instead of fanning out duplicate work to the engine. Failures are not
//! cached, so a transient transport error does not poison the key.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::error::QueryError;
use crate::query_facade::Row;
use crate::query_worker::QueryRequest;

type CacheCell = Arc<OnceCell<Arc<Vec<Row>>>>;

/// Keyed by the structural identity of the request: same SQL text plus the
/// same parameter values hit the same entry.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: DashMap<QueryRequest, CacheCell>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached rows for `request`, computing them via `compute`
    /// on first sight. Concurrent callers for the same key await the single
    /// in-flight computation.
    pub async fn get_or_compute<F, Fut>(
        &self,
        request: &QueryRequest,
        compute: F,
    ) -> Result<Arc<Vec<Row>>, QueryError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Arc<Vec<Row>>, QueryError>>,
    {
        // Clone the cell out so the map shard lock is released before any
        // await point.
        let cell = self
            .entries
            .entry(request.clone())
            .or_default()
            .value()
            .clone();

        let rows = cell.get_or_try_init(compute).await?;
        Ok(Arc::clone(rows))
    }

    /// Number of requests with a settled, successful result.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::query_worker::ScalarValue;

    fn request(sql: &str) -> QueryRequest {
        QueryRequest::new(sql, Vec::new())
    }

    fn rows() -> Arc<Vec<Row>> {
        Arc::new(Vec::new())
    }

    #[tokio::test]
    async fn computes_once_per_key() {
        let cache = ResultCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let got = cache
                .get_or_compute(&request("select 1"), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(rows())
                })
                .await
                .unwrap();
            assert!(got.is_empty());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn distinct_params_are_distinct_keys() {
        let cache = ResultCache::new();
        let calls = AtomicUsize::new(0);

        for id in 0..2_i64 {
            cache
                .get_or_compute(
                    &QueryRequest::new("select ?", vec![ScalarValue::Integer(id)]),
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(rows())
                    },
                )
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn failure_is_not_cached() {
        let cache = ResultCache::new();
        let calls = AtomicUsize::new(0);

        let err = cache
            .get_or_compute(&request("select 1"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(QueryError::Engine("boom".to_string()))
            })
            .await;
        assert!(err.is_err());
        assert_eq!(cache.len(), 0);

        let got = cache
            .get_or_compute(&request("select 1"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(rows())
            })
            .await
            .unwrap();
        assert!(got.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_hits_share_the_same_allocation() {
        let cache = ResultCache::new();

        let first = cache
            .get_or_compute(&request("select 1"), || async { Ok(rows()) })
            .await
            .unwrap();
        let second = cache
            .get_or_compute(&request("select 1"), || async {
                panic!("must not recompute")
            })
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_callers_single_flight() {
        let cache = Arc::new(ResultCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(&request("select 1"), || {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                            Ok(rows())
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clear_forgets_everything() {
        let cache = ResultCache::new();
        cache
            .get_or_compute(&request("select 1"), || async { Ok(rows()) })
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
