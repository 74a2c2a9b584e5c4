/// # Test Utilities Module
///
/// Testing infrastructure for easysql with isolated databases.
///
/// This module provides:
/// - Database fixtures that count the rollbacks SQLite performs
/// - Sample schema and data
/// - EasySqlError-specific testing helpers

use crate::core::db::{ConnectOptions, SqlDatabase};
use crate::core::{Result, SqlErrorKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Isolated in-memory database with commit and rollback counters.
pub struct DatabaseFixture {
    pub name: String,
    pub handle: SqlDatabase,
    commits: Arc<AtomicUsize>,
    rollbacks: Arc<AtomicUsize>,
}

impl DatabaseFixture {
    /// Create a new, empty, unregistered test database
    pub fn new(name: &str) -> Result<Self> {
        let handle = SqlDatabase::new(ConnectOptions::in_memory().foreign_keys(true));
        handle.open().map_err(|error| crate::core::EasySqlError::Database {
            error,
            query: None,
        })?;

        let commits = Arc::new(AtomicUsize::new(0));
        let rollbacks = Arc::new(AtomicUsize::new(0));
        let (c, r) = (Arc::clone(&commits), Arc::clone(&rollbacks));
        handle
            .with_connection(SqlErrorKind::Unknown, move |conn| {
                conn.commit_hook(Some(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    false
                }));
                conn.rollback_hook(Some(move || {
                    r.fetch_add(1, Ordering::SeqCst);
                }));
                Ok(())
            })
            .map_err(|error| crate::core::EasySqlError::Database { error, query: None })?;

        Ok(DatabaseFixture {
            name: name.to_string(),
            handle,
            commits,
            rollbacks,
        })
    }

    /// Create fixture with the sample schema and rows
    pub fn with_sample_data(name: &str) -> Result<Self> {
        let fixture = Self::new(name)?;
        fixture.execute_batch(
            "
            CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                active BOOLEAN DEFAULT TRUE
            );

            CREATE TABLE posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
            );

            INSERT INTO users (username, email) VALUES ('alice', 'alice@example.com');
            INSERT INTO users (username, email) VALUES ('bob', 'bob@example.com');
            INSERT INTO users (username, email) VALUES ('charlie', 'charlie@example.com');

            INSERT INTO posts (user_id, title) VALUES (1, 'Welcome to Rust');
            INSERT INTO posts (user_id, title) VALUES (2, 'My Trip to Paris');
            ",
        )?;
        // Setup is not part of what tests observe
        fixture.reset_counters();
        Ok(fixture)
    }

    /// Runs SQL directly on the connection, bypassing the wrappers
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.handle
            .with_connection(SqlErrorKind::Statement, |conn| conn.execute_batch(sql))
            .map_err(|error| crate::core::EasySqlError::Database {
                error,
                query: Some(sql.to_string()),
            })
    }

    /// Single integer from a query run directly on the connection
    pub fn count(&self, sql: &str) -> i64 {
        self.handle
            .with_connection(SqlErrorKind::Statement, |conn| {
                conn.query_row(sql, [], |row| row.get(0))
            })
            .expect("count query failed")
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.commits.store(0, Ordering::SeqCst);
        self.rollbacks.store(0, Ordering::SeqCst);
    }
}

/// Error testing utilities specific to EasySqlError patterns
pub mod error_testing {
    use crate::core::{EasySqlError, SqlErrorKind};

    /// Assert a result failed with a database error of the given kind
    pub fn assert_database_error<T: std::fmt::Debug>(
        result: &std::result::Result<T, EasySqlError>,
        expected_kind: SqlErrorKind,
        context: &str,
    ) {
        match result {
            Err(EasySqlError::Database { error, .. }) => assert_eq!(
                error.kind, expected_kind,
                "Unexpected error kind in {}: {}",
                context, error
            ),
            Err(other) => panic!("Expected Database error but got {:?} in {}", other, context),
            Ok(value) => panic!("Expected error but got Ok({:?}) in {}", value, context),
        }
    }

    /// Verify error message quality (contains helpful information)
    pub fn verify_error_message_quality<T, E>(result: &std::result::Result<T, E>, context: &str)
    where
        E: std::fmt::Display,
    {
        if let Err(ref error) = result {
            let error_str = error.to_string();
            assert!(!error_str.is_empty(), "Error message should not be empty in {}", context);
            assert!(error_str.len() > 10, "Error message should be descriptive in {}", context);
            assert!(
                error_str.to_lowercase().contains("error"),
                "Error should indicate what failed: '{}' in {}",
                error_str,
                context
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EasySqlError;

    #[test]
    fn test_database_fixture_creation() {
        let fixture = DatabaseFixture::new("test_create").unwrap();
        assert_eq!(fixture.name, "test_create");
        assert!(fixture.handle.is_open());
        assert_eq!(fixture.rollbacks(), 0);
    }

    #[test]
    fn test_sample_data_fixture() {
        let fixture = DatabaseFixture::with_sample_data("test_sample").unwrap();
        assert_eq!(fixture.commits(), 0);
        assert_eq!(fixture.count("SELECT COUNT(*) FROM users"), 3);
        assert_eq!(fixture.count("SELECT COUNT(*) FROM posts"), 2);
    }

    #[test]
    fn test_hooks_count_explicit_transactions() {
        let fixture = DatabaseFixture::with_sample_data("test_hooks").unwrap();
        fixture.execute_batch("BEGIN; DELETE FROM posts; ROLLBACK;").unwrap();
        fixture.execute_batch("BEGIN; DELETE FROM posts; COMMIT;").unwrap();
        assert_eq!(fixture.rollbacks(), 1);
        assert_eq!(fixture.commits(), 1);
    }

    #[test]
    fn test_error_helpers() {
        let fixture = DatabaseFixture::new("test_errors").unwrap();
        let result = fixture.execute_batch("SELECT * FROM missing");
        error_testing::assert_database_error(&result, SqlErrorKind::Statement, "missing table");
        error_testing::verify_error_message_quality(&result, "missing table");

        let config: std::result::Result<(), EasySqlError> =
            Err(EasySqlError::Config("bad mode value".to_string()));
        error_testing::verify_error_message_quality(&config, "config error");
    }
}
