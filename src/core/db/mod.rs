/// Database Module
///
/// This module provides the wrappers around SQLite, organized into focused
/// submodules.
///
/// ## Architecture
///
/// - **Connection Handles** (`connection.rs`): shared handles, connect options and the registry
/// - **Query Execution** (`query.rs`): statement execution and the result wrappers
/// - **Builders** (`builder.rs`): INSERT / DELETE / UPDATE builders and prepared statements
/// - **Database** (`database.rs`): the connection wrapper
/// - **Transactions** (`transaction.rs`): scope-bound transactions with automatic rollback
///
/// ## Error Handling
///
/// Every wrapper reports failures according to the `ErrorMode` it was built with.
pub mod builder;
pub mod connection;
pub mod database;
pub mod query;
pub mod transaction;

pub use builder::*;
pub use connection::*;
pub use database::*;
pub use query::{NonQueryResult, QueryResult};
pub use transaction::*;
