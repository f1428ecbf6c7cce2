//! The single entry point most callers use.
//!
//! [`QueryClient`] glues the stack together: it lazily starts the engine
//! worker on the first statement, memoizes results per session, and decodes
//! every text column through [`decode_text`] before a row reaches the
//! caller. A session holds at most one engine; a failed startup leaves the
//! slot empty so the next statement retries instead of wedging the client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::error::QueryError;
use crate::query_worker::{EngineHandle, QueryRequest, RawQueryResult, ScalarValue};
use crate::remote_source::RemoteSource;
use crate::result_cache::ResultCache;
use crate::text_decode::decode_text;

/// One decoded result row, sharing its column header with every sibling.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<Vec<String>>,
    values: Vec<ScalarValue>,
}

impl Row {
    /// Looks up a column by name.
    pub fn value(&self, column: &str) -> Result<&ScalarValue, QueryError> {
        let index = self
            .columns
            .iter()
            .position(|name| name == column)
            .ok_or_else(|| QueryError::decode(column, "column not present in result"))?;
        Ok(&self.values[index])
    }

    /// The column as a non-null integer.
    pub fn integer(&self, column: &str) -> Result<i64, QueryError> {
        match self.value(column)? {
            ScalarValue::Integer(v) => Ok(*v),
            other => Err(QueryError::decode(
                column,
                format!("expected integer, found {other:?}"),
            )),
        }
    }

    /// The column as non-null text.
    pub fn text(&self, column: &str) -> Result<&str, QueryError> {
        match self.value(column)? {
            ScalarValue::Text(v) => Ok(v),
            other => Err(QueryError::decode(
                column,
                format!("expected text, found {other:?}"),
            )),
        }
    }

    /// The column as an integer, mapping SQL null to `None`.
    pub fn optional_integer(&self, column: &str) -> Result<Option<i64>, QueryError> {
        match self.value(column)? {
            ScalarValue::Null => Ok(None),
            ScalarValue::Integer(v) => Ok(Some(*v)),
            other => Err(QueryError::decode(
                column,
                format!("expected integer or null, found {other:?}"),
            )),
        }
    }

    /// The column as text, mapping SQL null to `None`.
    pub fn optional_text(&self, column: &str) -> Result<Option<&str>, QueryError> {
        match self.value(column)? {
            ScalarValue::Null => Ok(None),
            ScalarValue::Text(v) => Ok(Some(v)),
            other => Err(QueryError::decode(
                column,
                format!("expected text or null, found {other:?}"),
            )),
        }
    }
}

/// Session façade over the remote database.
///
/// # Examples
///
/// ```no_run
/// use cheatbase::query_facade::QueryClient;
/// use cheatbase::remote_source::RemoteSource;
///
/// # async fn demo() -> Result<(), cheatbase::error::QueryError> {
/// let client = QueryClient::new(RemoteSource::new("data/bsfree.db"));
/// let rows = client.exec("select count(*) as n from systems", vec![]).await?;
/// println!("{} system rows", rows[0].integer("n")?);
/// # Ok(())
/// # }
/// ```
pub struct QueryClient {
    source: RemoteSource,
    engine: OnceCell<EngineHandle>,
    cache: ResultCache,
    engine_inits: AtomicUsize,
}

impl QueryClient {
    pub fn new(source: RemoteSource) -> Self {
        Self {
            source,
            engine: OnceCell::new(),
            cache: ResultCache::new(),
            engine_inits: AtomicUsize::new(0),
        }
    }

    /// Runs one statement, serving repeats from the session cache.
    ///
    /// Every text value in the result has already been passed through
    /// [`decode_text`].
    ///
    /// # Errors
    ///
    /// Engine startup failures, transport failures, and SQL errors all
    /// surface here. A startup failure is not sticky; calling again retries
    /// the whole initialization.
    pub async fn exec(
        &self,
        sql: impl Into<String>,
        params: Vec<ScalarValue>,
    ) -> Result<Arc<Vec<Row>>, QueryError> {
        let request = QueryRequest::new(sql, params);
        self.cache
            .get_or_compute(&request, || async {
                let engine = self.engine().await?;
                let outcome = engine.execute(request.clone()).await?;
                Ok(Arc::new(decode_rows(outcome.result)))
            })
            .await
    }

    /// The engine handle, starting the worker on first use.
    pub async fn engine(&self) -> Result<&EngineHandle, QueryError> {
        self.engine
            .get_or_try_init(|| async {
                self.engine_inits.fetch_add(1, Ordering::SeqCst);
                EngineHandle::start(&self.source).await
            })
            .await
    }

    /// How many times engine startup has been attempted. Stays at one for a
    /// healthy session no matter how many statements run concurrently.
    pub fn engine_initializations(&self) -> usize {
        self.engine_inits.load(Ordering::SeqCst)
    }

    /// Bytes transferred over the wire so far, zero before the first
    /// statement.
    pub fn total_bytes_read(&self) -> u64 {
        match self.engine.get() {
            Some(engine) => engine.total_bytes_read(),
            None => 0,
        }
    }

    /// Drops all memoized results while keeping the engine alive.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn source(&self) -> &RemoteSource {
        &self.source
    }
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("source", &self.source)
            .field("engine_started", &self.engine.initialized())
            .finish()
    }
}

fn decode_rows(raw: RawQueryResult) -> Vec<Row> {
    let columns = raw.columns;
    raw.rows
        .into_iter()
        .map(|values| Row {
            columns: Arc::clone(&columns),
            values: values
                .into_iter()
                .map(|value| match value {
                    ScalarValue::Text(text) => ScalarValue::Text(decode_text(&text)),
                    other => other,
                })
                .collect(),
        })
        .collect()
}
