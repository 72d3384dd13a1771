use rusqlite::ErrorCode;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`StoreError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Storage,
    LockTimeout,
    NotFound,
}

/// Errors returned by the detection store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed input, rejected before any I/O.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The backend could not be opened, written or read.
    #[error("storage error: {0}")]
    Storage(#[source] rusqlite::Error),

    #[error("failed to prepare database directory {}: {source}", .path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored row no longer decodes into a detection event.
    #[error("corrupt detection row {id}: {details}")]
    CorruptRow { id: i64, details: String },

    /// The exclusive write lock was not acquired within the busy timeout.
    #[error("timed out waiting for the database write lock (write lock contention)")]
    LockTimeout,

    #[error("detection {id} not found")]
    NotFound { id: i64 },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Validation(_) => ErrorKind::Validation,
            StoreError::Storage(_) | StoreError::Directory { .. } | StoreError::CorruptRow { .. } => {
                ErrorKind::Storage
            }
            StoreError::LockTimeout => ErrorKind::LockTimeout,
            StoreError::NotFound { .. } => ErrorKind::NotFound,
        }
    }

    /// Only lock contention is worth retrying; everything else fails the same way twice.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::LockTimeout
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        let contended = matches!(
            &err,
            rusqlite::Error::SqliteFailure(failure, _)
                if matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        );
        if contended {
            StoreError::LockTimeout
        } else {
            StoreError::Storage(err)
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
