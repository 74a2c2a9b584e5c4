/// easysql Error Module
///
/// This module defines the error types shared by every wrapper in the crate
/// and the error-handling policy (`ErrorMode`) chosen at construction time.
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

use crate::core::db::SqlDatabase;

/// Coarse classification of a database failure, matching the stage that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlErrorKind {
    /// Opening the connection failed (or the handle is invalid)
    Connection,
    /// Preparing, binding or stepping a statement failed
    Statement,
    /// BEGIN / COMMIT / ROLLBACK failed
    Transaction,
    /// Anything else, e.g. a poisoned handle lock
    Unknown,
}

impl fmt::Display for SqlErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlErrorKind::Connection => "connection",
            SqlErrorKind::Statement => "statement",
            SqlErrorKind::Transaction => "transaction",
            SqlErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Snapshot of the last error reported by SQLite.
///
/// `rusqlite::Error` is not `Clone`, so the interesting parts are copied out
/// and the snapshot can be stored on the connection handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlError {
    pub kind: SqlErrorKind,
    /// Primary SQLite result code, when the failure came from SQLite itself
    pub code: Option<rusqlite::ErrorCode>,
    /// Extended SQLite result code
    pub native_code: Option<i32>,
    pub message: String,
}

impl SqlError {
    pub fn new(kind: SqlErrorKind, message: impl Into<String>) -> Self {
        SqlError {
            kind,
            code: None,
            native_code: None,
            message: message.into(),
        }
    }

    /// Builds a snapshot from a rusqlite error.
    pub fn from_sqlite(kind: SqlErrorKind, err: &rusqlite::Error) -> Self {
        let (code, native_code) = match err {
            rusqlite::Error::SqliteFailure(e, _) => (Some(e.code), Some(e.extended_code)),
            _ => (None, None),
        };
        SqlError {
            kind,
            code,
            native_code,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.native_code {
            Some(code) => write!(f, "{} error ({}): {}", self.kind, code, self.message),
            None => write!(f, "{} error: {}", self.kind, self.message),
        }
    }
}

/// Error type for the easysql crate.
#[derive(Error, Debug)]
pub enum EasySqlError {
    /// A database operation failed. Carries the error snapshot and the
    /// offending statement, if there was one.
    #[error("Database error: {error}")]
    Database {
        error: SqlError,
        query: Option<String>,
    },

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl EasySqlError {
    /// The underlying database error, if this is a database failure.
    pub fn sql_error(&self) -> Option<&SqlError> {
        match self {
            EasySqlError::Database { error, .. } => Some(error),
            _ => None,
        }
    }

    /// The statement that failed, if any.
    pub fn query(&self) -> Option<&str> {
        match self {
            EasySqlError::Database { query, .. } => query.as_deref(),
            _ => None,
        }
    }
}

/// Type alias for Result to use EasySqlError as the error type.
pub type Result<T> = std::result::Result<T, EasySqlError>;

/// How database failures are reported to the caller.
///
/// `Raise` turns every failure into an `Err`. `Silent` never returns `Err`
/// for database failures; results carry their error and the handle's
/// `last_error()` must be polled instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    #[default]
    Raise,
    Silent,
}

impl ErrorMode {
    /// Applies the policy to the outcome of one operation on `handle`.
    ///
    /// The handle's last error is always overwritten: cleared on success,
    /// set on failure. In silent mode `fallback` produces the value handed
    /// back in place of the error.
    pub(crate) fn resolve<T>(
        self,
        handle: &SqlDatabase,
        query: Option<&str>,
        outcome: std::result::Result<T, SqlError>,
        fallback: impl FnOnce(SqlError) -> T,
    ) -> Result<T> {
        match outcome {
            Ok(value) => {
                handle.set_last_error(None);
                Ok(value)
            }
            Err(error) => {
                handle.set_last_error(Some(error.clone()));
                match self {
                    ErrorMode::Raise => Err(EasySqlError::Database {
                        error,
                        query: query.map(str::to_string),
                    }),
                    ErrorMode::Silent => {
                        tracing::warn!("{} (silenced)", error);
                        Ok(fallback(error))
                    }
                }
            }
        }
    }
}
