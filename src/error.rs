//! Error types for the store and analytics layers.

use sqlx::error::ErrorKind;
use thiserror::Error;

/// SQLite primary result codes that signal a temporarily unavailable database.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Whether an error is worth retrying on a fresh connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The database was busy or locked by another writer.
    Transient,
    /// Anything else: constraint violations, bad SQL, I/O failures.
    Fatal,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Contention did not clear within the retry budget.
    #[error("database still locked after {attempts} attempts")]
    LockTimeout {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    /// Unique, foreign-key, not-null or check constraint violation.
    #[error("constraint violation: {0}")]
    Constraint(#[source] sqlx::Error),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),

    /// An indicator was configured with a window too short to compute.
    #[error("{name} window must be at least {min}, got {value}")]
    InvalidWindow {
        name: &'static str,
        min: usize,
        value: usize,
    },
}

impl StoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StoreError::LockTimeout { .. } => ErrorClass::Transient,
            StoreError::Constraint(_) | StoreError::Io(_) | StoreError::InvalidWindow { .. } => {
                ErrorClass::Fatal
            }
            StoreError::Database(err) => classify(err),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let is_constraint = match &err {
            sqlx::Error::Database(db_err) => !matches!(db_err.kind(), ErrorKind::Other),
            _ => false,
        };

        if is_constraint {
            StoreError::Constraint(err)
        } else {
            StoreError::Database(err)
        }
    }
}

/// Classify a driver error using the numeric SQLite result code.
///
/// SQLite reports extended codes (e.g. 517 for `SQLITE_BUSY_SNAPSHOT`); the low
/// byte is the primary code.
pub fn classify(err: &sqlx::Error) -> ErrorClass {
    let code = match err {
        sqlx::Error::Database(db_err) => db_err.code().and_then(|c| c.parse::<i32>().ok()),
        _ => None,
    };

    match code.map(|c| c & 0xff) {
        Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
