//! The worker isolation boundary around the SQL engine.
//!
//! SQLite work is blocking by nature: a single statement may pull dozens of
//! pages over the network before it produces a row. The engine therefore
//! lives on its own plain `std::thread`, owns the connection and its paged
//! reader exclusively, and talks to the async world only through a message
//! channel: one [`QueryRequest`] in, one whole [`RawQueryResult`] (or a
//! failure) out. Nothing is streamed across the boundary and no state leaks
//! through it.
//!
//! After each statement settles, and before the next job is taken, the
//! worker drains the reader's byte counter and emits one structured log line
//! per statement: bytes read, elapsed time, SQL, parameters.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, OpenFlags, ToSql};
use tokio::sync::{mpsc, oneshot};

use crate::error::QueryError;
use crate::http_vfs;
use crate::paged_reader::PagedRemoteReader;
use crate::remote_source::RemoteSource;

/// A scalar crossing the worker boundary, in either direction.
///
/// Mirrors SQLite's storage classes. `Real` compares and hashes by bit
/// pattern so requests containing floats can still serve as cache keys.
#[derive(Debug, Clone)]
pub enum ScalarValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ScalarValue::Null, ScalarValue::Null) => true,
            (ScalarValue::Integer(a), ScalarValue::Integer(b)) => a == b,
            (ScalarValue::Real(a), ScalarValue::Real(b)) => a.to_bits() == b.to_bits(),
            (ScalarValue::Text(a), ScalarValue::Text(b)) => a == b,
            (ScalarValue::Blob(a), ScalarValue::Blob(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl std::hash::Hash for ScalarValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ScalarValue::Null => {}
            ScalarValue::Integer(v) => v.hash(state),
            ScalarValue::Real(v) => v.to_bits().hash(state),
            ScalarValue::Text(v) => v.hash(state),
            ScalarValue::Blob(v) => v.hash(state),
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Integer(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Text(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::Text(value)
    }
}

impl From<ValueRef<'_>> for ScalarValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => ScalarValue::Null,
            ValueRef::Integer(v) => ScalarValue::Integer(v),
            ValueRef::Real(v) => ScalarValue::Real(v),
            ValueRef::Text(v) => ScalarValue::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => ScalarValue::Blob(v.to_vec()),
        }
    }
}

impl ToSql for ScalarValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            ScalarValue::Null => ToSqlOutput::Owned(Value::Null),
            ScalarValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            ScalarValue::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            ScalarValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            ScalarValue::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

/// One statement plus its ordered bind parameters.
///
/// Structurally hashable: two requests with equal text and equal parameter
/// values are the same request, whatever their provenance. The result cache
/// keys on exactly this.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryRequest {
    pub sql: String,
    pub params: Vec<ScalarValue>,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>, params: Vec<ScalarValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Fully materialized, column-oriented result of one statement.
#[derive(Debug, Clone)]
pub struct RawQueryResult {
    /// Declared column order; names are unique within a statement.
    pub columns: Arc<Vec<String>>,
    pub rows: Vec<Vec<ScalarValue>>,
}

/// Result plus the per-statement observability side channel.
#[derive(Debug)]
pub struct QueryOutcome {
    pub result: RawQueryResult,
    /// Bytes fetched over the wire for this statement alone.
    pub bytes_read: u64,
    pub elapsed: Duration,
}

struct Job {
    request: QueryRequest,
    reply: oneshot::Sender<Result<QueryOutcome, QueryError>>,
}

/// Handle to the engine worker.
///
/// Constructed at most once per session by the query façade; cloning the
/// handle shares the same worker. Dropping every clone closes the channel
/// and lets the worker thread exit.
#[derive(Clone)]
pub struct EngineHandle {
    jobs: mpsc::Sender<Job>,
    reader: Arc<PagedRemoteReader>,
}

impl EngineHandle {
    /// Opens the remote database and spins up the engine worker.
    ///
    /// Resolves the store, probes the file size, registers the reader with
    /// the VFS, then spawns the worker thread, which opens the read-only
    /// connection and touches the schema once so an unreachable or corrupt
    /// database fails here rather than on the first caller query.
    ///
    /// # Errors
    ///
    /// Any failure during this sequence (unresolvable location, failed size
    /// probe, invalid database header) is returned to the caller; nothing
    /// is left running.
    pub async fn start(source: &RemoteSource) -> Result<Self, QueryError> {
        let reader = Arc::new(PagedRemoteReader::open(source).await?);
        let vfs_path = http_vfs::register_reader(Arc::clone(&reader));

        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>(16);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), QueryError>>();

        let worker_reader = Arc::clone(&reader);
        std::thread::Builder::new()
            .name("cheatbase-engine".to_string())
            .spawn(move || worker_main(vfs_path, worker_reader, jobs_rx, ready_tx))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self {
                jobs: jobs_tx,
                reader,
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(QueryError::WorkerClosed),
        }
    }

    /// Sends one request across the boundary and awaits the whole result.
    pub async fn execute(&self, request: QueryRequest) -> Result<QueryOutcome, QueryError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.jobs
            .send(Job {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| QueryError::WorkerClosed)?;
        reply_rx.await.map_err(|_| QueryError::WorkerClosed)?
    }

    /// Bytes transferred over the wire for the whole session.
    pub fn total_bytes_read(&self) -> u64 {
        self.reader.total_bytes_read()
    }

    /// Pages currently resident in the session cache.
    pub fn resident_pages(&self) -> usize {
        self.reader.resident_pages()
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("reader", &self.reader)
            .finish()
    }
}

fn worker_main(
    vfs_path: String,
    reader: Arc<PagedRemoteReader>,
    mut jobs: mpsc::Receiver<Job>,
    ready: oneshot::Sender<Result<(), QueryError>>,
) {
    let conn = match open_connection(&vfs_path, &reader) {
        Ok(conn) => {
            let bytes_read = reader.take_bytes_read();
            tracing::debug!(bytes_read, "engine initialized");
            let _ = ready.send(Ok(()));
            conn
        }
        Err(err) => {
            http_vfs::unregister_reader(&vfs_path);
            let _ = ready.send(Err(err));
            return;
        }
    };

    while let Some(job) = jobs.blocking_recv() {
        let started = Instant::now();
        let result = run_statement(&conn, &job.request);
        // Drained before the next job can run, so the count is exactly this
        // statement's traffic.
        let bytes_read = reader.take_bytes_read();
        let elapsed = started.elapsed();

        tracing::info!(
            bytes_read,
            elapsed_ms = elapsed.as_millis() as u64,
            sql = %job.request.sql,
            params = ?job.request.params,
            "executed statement"
        );

        let reply = match result {
            Ok(result) => Ok(QueryOutcome {
                result,
                bytes_read,
                elapsed,
            }),
            Err(err) => Err(classify_failure(&reader, err)),
        };
        let _ = job.reply.send(reply);
    }

    drop(conn);
    http_vfs::unregister_reader(&vfs_path);
}

fn open_connection(
    vfs_path: &str,
    reader: &PagedRemoteReader,
) -> Result<Connection, QueryError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags_and_vfs(vfs_path, flags, http_vfs::VFS_NAME)
        .map_err(|err| classify_failure(reader, err))?;

    // The VFS only serves the main database; sorts and temp tables must
    // spill to memory, never to a temp file open the VFS would refuse.
    conn.pragma_update(None, "temp_store", "MEMORY")
        .map_err(|err| classify_failure(reader, err))?;

    // Force the header and schema pages now so a bad source fails the
    // shared initialization instead of the first statement.
    let probe: Result<i64, rusqlite::Error> =
        conn.query_row("select count(*) from sqlite_master", [], |row| row.get(0));
    if let Err(err) = probe {
        return Err(classify_failure(reader, err));
    }

    Ok(conn)
}

fn run_statement(conn: &Connection, request: &QueryRequest) -> Result<RawQueryResult, rusqlite::Error> {
    let mut stmt = conn.prepare(&request.sql)?;
    let columns: Vec<String> = stmt
        .column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();

    let mut rows = stmt.query(rusqlite::params_from_iter(request.params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns.len());
        for index in 0..columns.len() {
            values.push(ScalarValue::from(row.get_ref(index)?));
        }
        out.push(values);
    }

    Ok(RawQueryResult {
        columns: Arc::new(columns),
        rows: out,
    })
}

/// SQLite collapses VFS read failures into an opaque I/O result code; if the
/// reader stashed the original error, surface that instead.
fn classify_failure(reader: &PagedRemoteReader, err: rusqlite::Error) -> QueryError {
    match reader.take_failure() {
        Some(read_failure) => QueryError::Reader(read_failure),
        None => QueryError::Engine(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(sql: &str) -> QueryRequest {
        QueryRequest::new(sql, vec![ScalarValue::Integer(1), ScalarValue::from("x")])
    }

    #[test]
    fn structurally_equal_requests_collide() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let a = request("select 1");
        let b = request("select 1");
        assert_eq!(a, b);

        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());

        assert_ne!(request("select 1"), request("select 2"));
        assert_ne!(
            QueryRequest::new("select ?", vec![ScalarValue::Integer(1)]),
            QueryRequest::new("select ?", vec![ScalarValue::Integer(2)])
        );
    }

    #[test]
    fn real_values_compare_by_bit_pattern() {
        assert_eq!(ScalarValue::Real(1.5), ScalarValue::Real(1.5));
        assert_eq!(ScalarValue::Real(f64::NAN), ScalarValue::Real(f64::NAN));
        assert_ne!(ScalarValue::Real(0.0), ScalarValue::Real(-0.0));
    }
}
