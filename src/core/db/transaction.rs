/// Transaction Module
///
/// `Transaction` brackets a sequence of statements in a database transaction
/// and rolls it back when dropped unless `commit()` succeeded.

use crate::core::db::{Database, SqlDatabase};
use crate::core::{ErrorMode, Result, SqlError, SqlErrorKind};
use std::ops::Deref;
use tracing::{debug, warn};

/// Represents the lifecycle of a `Transaction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// BEGIN failed; a rollback is still attempted on drop
    NotStarted,
    /// BEGIN succeeded and the transaction is open
    Started,
    Committed,
    RolledBack,
    /// COMMIT failed; the transaction is still open and will be rolled back
    CommitFailed,
    /// A manual rollback failed; no further rollback is attempted
    Failed,
}

impl Default for TransactionState {
    fn default() -> Self {
        TransactionState::NotStarted
    }
}

/// Which lock a transaction takes when it begins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransactionBehavior {
    #[default]
    Deferred,
    Immediate,
    Exclusive,
}

impl TransactionBehavior {
    fn begin_sql(self) -> &'static str {
        match self {
            TransactionBehavior::Deferred => "BEGIN DEFERRED",
            TransactionBehavior::Immediate => "BEGIN IMMEDIATE",
            TransactionBehavior::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

/// Transaction wrapper with automatic rollback.
///
/// Dereferences to [`Database`], so statements and builders created through
/// it run inside the transaction.
///
/// # Examples
///
/// ```ignore
/// let mut t = Transaction::new(Some(handle), ErrorMode::Raise)?;
/// t.exec_non_query("CREATE TABLE t (a int)")?;
/// t.insert_into("t (a)").values(params![1]).values(params![2]).exec()?;
/// t.commit()?; // without this, dropping `t` rolls everything back
/// ```
#[derive(Debug)]
pub struct Transaction {
    db: Database,
    state: TransactionState,
    began: bool,
}

impl Transaction {
    /// Opens `handle` (or the default connection) and begins a deferred
    /// transaction on it.
    pub fn new(handle: Option<SqlDatabase>, mode: ErrorMode) -> Result<Self> {
        Transaction::with_behavior(handle, mode, TransactionBehavior::Deferred)
    }

    pub fn with_behavior(
        handle: Option<SqlDatabase>,
        mode: ErrorMode,
        behavior: TransactionBehavior,
    ) -> Result<Self> {
        let db = Database::new(handle, mode)?;
        Transaction::begin_with(db, behavior)
    }

    /// Begins a deferred transaction on an existing wrapper.
    pub fn begin(db: Database) -> Result<Self> {
        Transaction::begin_with(db, TransactionBehavior::Deferred)
    }

    /// Begins a transaction on an existing wrapper.
    ///
    /// # Errors
    ///
    /// In `ErrorMode::Raise`, returns `EasySqlError::Database` when BEGIN
    /// fails, e.g. because a transaction is already open on the handle. In
    /// `ErrorMode::Silent` the transaction is returned with `started() == false`.
    pub fn begin_with(db: Database, behavior: TransactionBehavior) -> Result<Self> {
        let sql = behavior.begin_sql();
        let outcome = run_control(db.handle(), sql);
        let started = db.error_mode().resolve(db.handle(), Some(sql), outcome.map(|()| true), |_| false)?;

        let state = if started {
            debug!("Transaction started on {:?}", db.handle().name());
            TransactionState::Started
        } else {
            TransactionState::NotStarted
        };
        Ok(Transaction {
            db,
            state,
            began: started,
        })
    }

    /// Commits the transaction.
    ///
    /// Returns `true` without touching the database once committed. A
    /// failed commit leaves the transaction to be rolled back on drop, and
    /// later calls return `false` without trying again.
    ///
    /// # Errors
    ///
    /// In `ErrorMode::Raise`, returns `EasySqlError::Database` when COMMIT
    /// fails or when there is no open transaction to commit (it never
    /// started, or was rolled back).
    pub fn commit(&mut self) -> Result<bool> {
        match self.state {
            TransactionState::Committed => return Ok(true),
            TransactionState::CommitFailed => return Ok(false),
            TransactionState::Started => {}
            TransactionState::NotStarted | TransactionState::RolledBack | TransactionState::Failed => {
                let inactive = Err(SqlError::new(
                    SqlErrorKind::Transaction,
                    format!("no active transaction to commit ({:?})", self.state),
                ));
                return self
                    .db
                    .error_mode()
                    .resolve(self.db.handle(), Some("COMMIT"), inactive, |_| false);
            }
        }

        let outcome = run_control(self.db.handle(), "COMMIT");
        self.state = if outcome.is_ok() {
            debug!("Transaction committed on {:?}", self.db.handle().name());
            TransactionState::Committed
        } else {
            TransactionState::CommitFailed
        };
        self.db
            .error_mode()
            .resolve(self.db.handle(), Some("COMMIT"), outcome.map(|()| true), |_| false)
    }

    /// Rolls the transaction back.
    ///
    /// Does nothing once committed. A failed rollback is terminal: the drop
    /// does not try again.
    pub fn rollback(&mut self) -> Result<bool> {
        match self.state {
            TransactionState::NotStarted
            | TransactionState::Started
            | TransactionState::CommitFailed => {}
            TransactionState::RolledBack => return Ok(true),
            _ => return Ok(false),
        }

        let outcome = run_control(self.db.handle(), "ROLLBACK");
        self.state = if outcome.is_ok() {
            debug!("Transaction rolled back on {:?}", self.db.handle().name());
            TransactionState::RolledBack
        } else {
            TransactionState::Failed
        };
        self.db
            .error_mode()
            .resolve(self.db.handle(), Some("ROLLBACK"), outcome.map(|()| true), |_| false)
    }

    /// True if BEGIN succeeded.
    pub fn started(&self) -> bool {
        self.began
    }

    /// True if COMMIT succeeded.
    pub fn committed(&self) -> bool {
        self.state == TransactionState::Committed
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }
}

impl Deref for Transaction {
    type Target = Database;

    fn deref(&self) -> &Database {
        &self.db
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if matches!(
            self.state,
            TransactionState::NotStarted | TransactionState::Started | TransactionState::CommitFailed
        ) {
            match run_control(self.db.handle(), "ROLLBACK") {
                Ok(()) => debug!("Uncommitted transaction rolled back on {:?}", self.db.handle().name()),
                Err(e) => warn!("Failed to roll back transaction on drop: {}", e),
            }
            self.state = TransactionState::RolledBack;
        }
    }
}

fn run_control(handle: &SqlDatabase, sql: &str) -> std::result::Result<(), SqlError> {
    handle.with_connection(SqlErrorKind::Transaction, |conn| conn.execute_batch(sql))
}
