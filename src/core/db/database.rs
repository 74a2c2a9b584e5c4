/// Database Wrapper Module
///
/// `Database` holds one connection handle and offers statement execution and
/// builder factories bound to that handle.

use crate::core::db::query::run_statement;
use crate::core::db::{
    DeleteQuery, InsertQuery, NonQueryResult, PreparedQuery, QueryResult, SqlDatabase, UpdateQuery,
};
use crate::core::{ErrorMode, Result, SqlError, SqlErrorKind};
use tracing::debug;

/// Connection wrapper.
///
/// # Examples
///
/// ```ignore
/// let handle = SqlDatabase::new(ConnectOptions::in_memory());
/// let db = Database::new(Some(handle), ErrorMode::Raise)?;
/// db.exec_non_query("CREATE TABLE t (a int, b int, c int, d text)")?;
/// ```
#[derive(Debug)]
pub struct Database {
    handle: SqlDatabase,
    mode: ErrorMode,
}

impl Database {
    /// Wraps `handle`, opening it if it is not open yet. A missing or
    /// invalid handle falls back to the process-wide default.
    ///
    /// # Errors
    ///
    /// In `ErrorMode::Raise`, returns `EasySqlError::Database` if the open
    /// fails. In `ErrorMode::Silent` the wrapper is returned regardless and
    /// `last_error()` reports the failure.
    pub fn new(handle: Option<SqlDatabase>, mode: ErrorMode) -> Result<Self> {
        let handle = match handle {
            Some(handle) if handle.is_valid() => handle,
            _ => SqlDatabase::default_database(),
        };
        let opened = handle.open();
        mode.resolve(&handle, None, opened, |_| ())?;
        debug!("Database wrapper ready for {:?}", handle.name());
        Ok(Database { handle, mode })
    }

    /// Error from the most recent operation on the underlying handle.
    pub fn last_error(&self) -> Option<SqlError> {
        self.handle.last_error()
    }

    pub fn error_mode(&self) -> ErrorMode {
        self.mode
    }

    /// The wrapped connection handle.
    pub fn handle(&self) -> &SqlDatabase {
        &self.handle
    }

    /// Executes a statement that returns no rows (INSERT, UPDATE, DELETE,
    /// CREATE, ...). Rows a statement does return are discarded.
    pub fn exec_non_query(&self, sql: &str) -> Result<NonQueryResult> {
        let outcome = self
            .handle
            .with_connection(SqlErrorKind::Statement, |conn| run_statement(conn, sql, &[], false))
            .map(|o| NonQueryResult::from_outcome(sql, o));
        self.mode
            .resolve(&self.handle, Some(sql), outcome, |e| NonQueryResult::failed(sql, e))
    }

    /// Executes a SELECT and returns a scrollable result.
    pub fn exec_query(&self, sql: &str) -> Result<QueryResult> {
        let outcome = self
            .handle
            .with_connection(SqlErrorKind::Statement, |conn| run_statement(conn, sql, &[], false))
            .map(|o| QueryResult::from_outcome(sql, o, false));
        self.mode
            .resolve(&self.handle, Some(sql), outcome, |e| QueryResult::failed(sql, e, false))
    }

    /// INSERT builder. `table` may include a column list: `"t (a, b)"`.
    pub fn insert_into(&self, table: &str) -> InsertQuery {
        InsertQuery::new(table, self.handle.clone(), self.mode)
    }

    pub fn delete_from(&self, table: &str) -> DeleteQuery {
        DeleteQuery::new(table, self.handle.clone(), self.mode)
    }

    pub fn update(&self, table: &str) -> UpdateQuery {
        UpdateQuery::new(table, self.handle.clone(), self.mode)
    }

    /// Forward-only prepared statement.
    pub fn prepare(&self, sql: &str) -> PreparedQuery {
        self.prepare_with(sql, true)
    }

    pub fn prepare_with(&self, sql: &str, forward_only: bool) -> PreparedQuery {
        PreparedQuery::new(sql, self.handle.clone(), self.mode, forward_only)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::ConnectOptions;
    use crate::core::EasySqlError;
    use rusqlite::params;

    fn memory_db(mode: ErrorMode) -> Database {
        Database::new(Some(SqlDatabase::new(ConnectOptions::in_memory())), mode).unwrap()
    }

    #[test]
    fn test_new_opens_handle() {
        let handle = SqlDatabase::new(ConnectOptions::in_memory());
        assert!(!handle.is_open());
        let db = Database::new(Some(handle.clone()), ErrorMode::Raise).unwrap();
        assert!(handle.is_open());
        assert!(db.handle().is_open());
        assert!(db.last_error().is_none());
    }

    #[test]
    fn test_open_failure_raises() {
        let result = Database::new(Some(SqlDatabase::invalid()), ErrorMode::Raise);
        match result {
            Err(EasySqlError::Database { error, query }) => {
                assert_eq!(error.kind, SqlErrorKind::Connection);
                assert!(query.is_none());
            }
            other => panic!("Expected Database error, got {:?}", other),
        }
    }

    #[test]
    fn test_open_failure_silent() {
        let db = Database::new(Some(SqlDatabase::invalid()), ErrorMode::Silent).unwrap();
        assert_eq!(db.last_error().unwrap().kind, SqlErrorKind::Connection);

        // Later calls fail naturally without raising
        let result = db.exec_non_query("CREATE TABLE t (a)").unwrap();
        assert!(!result.is_ok());
        assert_eq!(db.last_error().unwrap().kind, SqlErrorKind::Connection);
    }

    #[test]
    fn test_multiple_statements_raise() {
        let db = memory_db(ErrorMode::Raise);
        match db.exec_non_query("CREATE TABLE x (a); CREATE TABLE y (a)") {
            Err(EasySqlError::Database { error, query }) => {
                assert_eq!(error.kind, SqlErrorKind::Statement);
                assert_eq!(error.code, Some(rusqlite::ErrorCode::ApiMisuse));
                assert_eq!(query.as_deref(), Some("CREATE TABLE x (a); CREATE TABLE y (a)"));
            }
            other => panic!("Expected Database error, got {:?}", other),
        }
        let tables = db.prepare("SELECT COUNT(*) FROM sqlite_master").scalar::<i64>(&[]).unwrap();
        assert_eq!(tables, Some(0));
    }

    #[test]
    fn test_empty_statement_silent() {
        let db = memory_db(ErrorMode::Silent);
        let result = db.exec_non_query("  -- just a comment").unwrap();
        assert!(!result.is_ok());
        let error = db.last_error().unwrap();
        assert_eq!(error.kind, SqlErrorKind::Statement);
        assert!(error.message.contains("empty statement"));
    }

    #[test]
    fn test_exec_non_query_and_query() {
        let db = memory_db(ErrorMode::Raise);
        db.exec_non_query("CREATE TABLE t (a INTEGER, b TEXT)").unwrap();
        let inserted = db
            .exec_non_query("INSERT INTO t VALUES (1, 'x'), (2, 'y')")
            .unwrap();
        assert_eq!(inserted.rows_affected(), 2);
        assert_eq!(inserted.last_insert_id(), Some(2));

        let mut rows = db.exec_query("SELECT a, b FROM t ORDER BY a").unwrap();
        assert!(!rows.is_forward_only());
        assert_eq!(rows.size(), 2);
        assert!(rows.last());
        assert_eq!(rows.get::<String>(1).unwrap(), "y");
        assert!(rows.previous());
        assert_eq!(rows.get::<i64>(0).unwrap(), 1);
    }

    #[test]
    fn test_exec_errors_carry_statement() {
        let db = memory_db(ErrorMode::Raise);
        let err = db.exec_query("SELECT * FROM nonexistent_table").unwrap_err();
        assert_eq!(err.query(), Some("SELECT * FROM nonexistent_table"));
        assert!(err.to_string().contains("no such table"));
        assert!(db.last_error().is_some());
    }

    #[test]
    fn test_silent_mode_polls_last_error() {
        let db = memory_db(ErrorMode::Silent);
        let result = db.exec_non_query("INSERT INTO missing VALUES (1)").unwrap();
        assert!(!result.is_ok());
        let error = db.last_error().unwrap();
        assert_eq!(error.kind, SqlErrorKind::Statement);
        assert!(error.message.contains("no such table"));

        db.exec_non_query("CREATE TABLE t (a)").unwrap();
        assert!(db.last_error().is_none());
    }

    #[test]
    fn test_factories_share_handle_and_mode() {
        let db = memory_db(ErrorMode::Raise);
        db.exec_non_query("CREATE TABLE t (a INTEGER, b INTEGER)").unwrap();

        db.insert_into("t (a, b)")
            .values(params![1, 2])
            .values(params![3, 4])
            .exec()
            .unwrap();
        db.update("t").set("b", &40).filter("a = ?", params![3]).exec().unwrap();
        db.delete_from("t").filter("a = ?", params![1]).exec().unwrap();

        let rows = db.prepare("SELECT a, b FROM t").first(&[]).unwrap().unwrap();
        assert_eq!(rows["b"], rusqlite::types::Value::Integer(40));
        assert!(!db.prepare_with("SELECT 1", false).exec(&[]).unwrap().is_forward_only());
    }
}
