//! Error types for the paged reader and the query path.
//!
//! The two layers fail differently and callers need to tell them apart:
//! a [`ReaderError`] means bytes could not be moved over the wire, while a
//! [`QueryError`] means the statement itself could not be served. "No rows"
//! is never an error anywhere in this crate; the catalog layer returns
//! `Option`/empty collections for that.

use thiserror::Error;

/// Failure while reading pages of the remote database file.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// The underlying store could not serve a range request.
    #[error("transport error: {0}")]
    Transport(#[from] object_store::Error),

    /// The session transferred more bytes than the configured budget allows.
    #[error("byte budget exceeded: read {transferred} of {limit} allowed bytes")]
    ByteBudgetExceeded { transferred: u64, limit: u64 },

    /// Zero-length reads are not meaningful against a paged file.
    #[error("invalid read: length must be greater than zero (offset {offset})")]
    InvalidRange { offset: u64 },

    /// The data-source location could not be parsed.
    #[error("invalid database url: {0}")]
    Url(#[from] url::ParseError),
}

/// Failure while executing a query through the worker boundary.
#[derive(Debug, Error)]
pub enum QueryError {
    /// A page fetch failed underneath the engine.
    #[error("read failed: {0}")]
    Reader(#[from] ReaderError),

    /// SQLite rejected or aborted the statement.
    #[error("engine error: {0}")]
    Engine(String),

    /// The engine worker thread is gone; its channel is closed.
    #[error("query worker closed")]
    WorkerClosed,

    /// The engine worker thread could not be spawned.
    #[error("failed to spawn query worker: {0}")]
    Spawn(#[from] std::io::Error),

    /// A result column was missing or held an unexpected type.
    #[error("cannot decode column `{column}`: {reason}")]
    Decode { column: String, reason: String },
}

impl QueryError {
    pub(crate) fn decode(column: &str, reason: impl Into<String>) -> Self {
        QueryError::Decode {
            column: column.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(err: rusqlite::Error) -> Self {
        QueryError::Engine(err.to_string())
    }
}
