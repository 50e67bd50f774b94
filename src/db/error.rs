//! Storage error taxonomy.
//!
//! Engine failures are classified once, when they leave `sqlx`, into a closed
//! set of kinds. Retry decisions match on those kinds only.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors produced by the storage engine.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The engine could not be reached or the connection was lost.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The database is locked by another connection or transaction.
    #[error("database busy: {0}")]
    Busy(String),

    /// The engine returned an unexpected or null result.
    #[error("engine internal error: {0}")]
    Internal(String),

    /// Uniqueness, not-null or other shape constraint violated.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Schema migration failed and was rolled back.
    #[error("migration failed on '{table}': {message}")]
    Migration { table: String, message: String },

    /// A stored column does not decode to the type the schema declares.
    #[error("column decode error: {0}")]
    Decode(String),

    /// A composite field could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The collection is not registered in the schema registry.
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    /// A record does not fit its collection schema.
    #[error("invalid record in '{collection}': {message}")]
    InvalidRecord { collection: String, message: String },

    /// A patch tried to change a record id.
    #[error("record id is immutable: '{id}' in '{collection}'")]
    ImmutableId { collection: String, id: String },

    /// The write chain is gone or dropped the job.
    #[error("write chain closed")]
    WriterClosed,

    /// Any other engine error. Never retried.
    #[error("sql error: {0}")]
    Sql(sqlx::Error),
}

impl StorageError {
    pub(crate) fn invalid(collection: &str, message: impl Into<String>) -> Self {
        StorageError::InvalidRecord {
            collection: collection.to_string(),
            message: message.into(),
        }
    }

    /// Returns true for the transient kinds the adapter retries.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::ConnectionLost(_) | StorageError::Busy(_) | StorageError::Internal(_)
        )
    }

    /// Returns true if the connection must be rebuilt before the next attempt.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, StorageError::ConnectionLost(_))
    }
}

// SQLite primary result codes
const SQLITE_INTERNAL: i64 = 2;
const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;
const SQLITE_IOERR: i64 = 10;
const SQLITE_CANTOPEN: i64 = 14;
const SQLITE_CONSTRAINT: i64 = 19;

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(io) => StorageError::ConnectionLost(io.to_string()),
            sqlx::Error::PoolClosed => StorageError::ConnectionLost("pool closed".to_string()),
            sqlx::Error::WorkerCrashed => {
                StorageError::ConnectionLost("sqlite worker crashed".to_string())
            }
            sqlx::Error::PoolTimedOut => {
                StorageError::Busy("timed out acquiring a connection".to_string())
            }
            sqlx::Error::Protocol(msg) => StorageError::Internal(msg),
            sqlx::Error::ColumnDecode { index, source } => {
                StorageError::Decode(format!("column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => StorageError::Decode(source.to_string()),
            sqlx::Error::Database(db) => {
                use sqlx::error::ErrorKind;

                let message = db.message().to_string();
                match db.kind() {
                    ErrorKind::UniqueViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation => return StorageError::Constraint(message),
                    _ => {}
                }

                // Extended codes carry the primary code in the low byte.
                let primary = db
                    .code()
                    .and_then(|code| code.parse::<i64>().ok())
                    .map(|code| code & 0xff);

                match primary {
                    Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => StorageError::Busy(message),
                    Some(SQLITE_IOERR) | Some(SQLITE_CANTOPEN) => {
                        StorageError::ConnectionLost(message)
                    }
                    Some(SQLITE_INTERNAL) => StorageError::Internal(message),
                    Some(SQLITE_CONSTRAINT) => StorageError::Constraint(message),
                    _ => StorageError::Sql(sqlx::Error::Database(db)),
                }
            }
            other => StorageError::Sql(other),
        }
    }
}
