//! Crate error types.
//!
//! Storage engine failures surface to the caller unchanged in meaning; the
//! sync engine is the only layer that converts errors into retry tallies.

use redb::{CommitError, DatabaseError, StorageError, TableError, TransactionError};
use thiserror::Error;

use crate::remote::RemoteError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    /// The collection is not part of the schema the store was opened with.
    #[error("collection '{0}' is not part of the store schema")]
    CollectionNotFound(String),

    #[error("index '{index}' is not declared for collection '{collection}'")]
    IndexNotFound { collection: String, index: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl From<DatabaseError> for Error {
    fn from(err: DatabaseError) -> Self {
        Error::Database(format!("failed to open database: {err}"))
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Database(format!("transaction error: {err}"))
    }
}

impl From<TableError> for Error {
    fn from(err: TableError) -> Self {
        match err {
            TableError::TableDoesNotExist(name) => {
                Error::CollectionNotFound(name)
            }
            other => Error::Database(format!("table operation error: {other}")),
        }
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Corrupted(msg) => {
                Error::Database(format!("database is corrupted: {msg}"))
            }
            StorageError::Io(io_err) => Error::Database(format!("io error: {io_err}")),
            other => Error::Database(format!("storage error: {other}")),
        }
    }
}

impl From<CommitError> for Error {
    fn from(err: CommitError) -> Self {
        Error::Database(format!("commit error: {err}"))
    }
}
