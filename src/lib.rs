// Core infrastructure modules
pub mod core;

pub mod config;

#[cfg(test)]
mod test_utils;

pub use crate::core::db::{
    ConnectOptions, Database, DeleteQuery, InsertQuery, NonQueryResult, PreparedQuery,
    QueryResult, SqlDatabase, Transaction, TransactionBehavior, TransactionState, UpdateQuery,
    DEFAULT_CONNECTION,
};
pub use crate::core::{EasySqlError, ErrorMode, Result, SqlError, SqlErrorKind};
pub use rusqlite::params;
pub use rusqlite::types::Value;
