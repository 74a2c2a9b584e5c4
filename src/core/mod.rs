/// Core Module for easysql
///
/// This module contains the database wrappers and the error types they
/// share.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{EasySqlError, ErrorMode, Result, SqlError, SqlErrorKind};
