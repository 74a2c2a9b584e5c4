/// Connection Management Module
///
/// This module provides the shared connection handle (`SqlDatabase`), the
/// options it is opened with, and the process-wide registry of named handles.

use crate::core::{SqlError, SqlErrorKind};
use once_cell::sync::OnceCell;
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Name under which the process-wide default connection is registered.
pub const DEFAULT_CONNECTION: &str = "default";

/// How a connection handle opens its SQLite session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectOptions {
    /// Path to the database file, or ":memory:"
    pub path: String,
    #[serde(default)]
    pub read_only: bool,
    /// Create the file if it does not exist
    #[serde(default = "default_create")]
    pub create: bool,
    pub busy_timeout_ms: Option<u64>,
    pub foreign_keys: Option<bool>,
    pub journal_mode: Option<String>,
}

fn default_create() -> bool {
    true
}

impl ConnectOptions {
    pub fn new(path: impl Into<String>) -> Self {
        ConnectOptions {
            path: path.into(),
            read_only: false,
            create: true,
            busy_timeout_ms: None,
            foreign_keys: None,
            journal_mode: None,
        }
    }

    pub fn in_memory() -> Self {
        ConnectOptions::new(":memory:")
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = Some(enabled);
        self
    }

    pub fn journal_mode(mut self, mode: impl Into<String>) -> Self {
        self.journal_mode = Some(mode.into());
        self
    }

    fn open_flags(&self) -> OpenFlags {
        let mut flags = OpenFlags::default();
        if self.read_only {
            flags.remove(OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE);
            flags.insert(OpenFlags::SQLITE_OPEN_READ_ONLY);
        } else if !self.create {
            flags.remove(OpenFlags::SQLITE_OPEN_CREATE);
        }
        flags
    }

    /// Opens a new SQLite connection and applies the configured pragmas.
    fn connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.open_flags())?;

        if let Some(ms) = self.busy_timeout_ms {
            conn.busy_timeout(Duration::from_millis(ms))?;
        }
        if let Some(enabled) = self.foreign_keys {
            conn.pragma_update(None, "foreign_keys", if enabled { "ON" } else { "OFF" })?;
        }
        if let Some(mode) = &self.journal_mode {
            conn.pragma_update(None, "journal_mode", mode.as_str())?;
        }

        Ok(conn)
    }
}

struct HandleInner {
    name: Option<String>,
    /// None for an invalid handle
    options: Option<ConnectOptions>,
    connection: Mutex<Option<Connection>>,
    last_error: Mutex<Option<SqlError>>,
}

/// Shared reference to one SQLite session.
///
/// Cloning the handle does not open a new connection: every clone talks to
/// the same session, so a transaction begun through one clone is visible
/// through the others. The session is opened lazily by `open()`.
#[derive(Clone)]
pub struct SqlDatabase {
    inner: Arc<HandleInner>,
}

impl fmt::Debug for SqlDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlDatabase")
            .field("name", &self.inner.name)
            .field("options", &self.inner.options)
            // try_lock: formatting must not block on a connection in use
            .field("open", &self.inner.connection.try_lock().ok().map(|g| g.is_some()))
            .finish()
    }
}

/// Process-wide registry of named connection handles.
static REGISTRY: OnceCell<Mutex<HashMap<String, SqlDatabase>>> = OnceCell::new();

fn registry() -> MutexGuard<'static, HashMap<String, SqlDatabase>> {
    let lock = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
    // The map holds plain handles, a panic mid-insert cannot leave it torn.
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SqlDatabase {
    /// Creates an unregistered handle. Nothing is opened yet.
    pub fn new(options: ConnectOptions) -> Self {
        SqlDatabase::build(None, Some(options))
    }

    /// Creates a handle that can never be opened.
    pub fn invalid() -> Self {
        SqlDatabase::build(None, None)
    }

    fn build(name: Option<String>, options: Option<ConnectOptions>) -> Self {
        SqlDatabase {
            inner: Arc::new(HandleInner {
                name,
                options,
                connection: Mutex::new(None),
                last_error: Mutex::new(None),
            }),
        }
    }

    /// Registers a handle under `name`, replacing any previous one.
    pub fn add_database(name: &str, options: ConnectOptions) -> SqlDatabase {
        let handle = SqlDatabase::build(Some(name.to_string()), Some(options));
        if registry().insert(name.to_string(), handle.clone()).is_some() {
            debug!("Replaced registered connection '{}'", name);
        }
        handle
    }

    /// Looks up a registered handle.
    pub fn database(name: &str) -> Option<SqlDatabase> {
        registry().get(name).cloned()
    }

    /// The handle registered under `DEFAULT_CONNECTION`, or an invalid one.
    pub fn default_database() -> SqlDatabase {
        SqlDatabase::database(DEFAULT_CONNECTION).unwrap_or_else(SqlDatabase::invalid)
    }

    /// Unregisters a handle. Clones still held elsewhere keep working.
    pub fn remove_database(name: &str) -> Option<SqlDatabase> {
        registry().remove(name)
    }

    pub fn contains(name: &str) -> bool {
        registry().contains_key(name)
    }

    pub fn connection_names() -> Vec<String> {
        let mut names: Vec<String> = registry().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn options(&self) -> Option<&ConnectOptions> {
        self.inner.options.as_ref()
    }

    pub fn is_valid(&self) -> bool {
        self.inner.options.is_some()
    }

    pub fn is_open(&self) -> bool {
        self.lock_connection().is_some()
    }

    /// Opens the session if it is not open yet.
    pub fn open(&self) -> Result<(), SqlError> {
        let options = self.inner.options.as_ref().ok_or_else(|| {
            SqlError::new(SqlErrorKind::Connection, "invalid connection handle")
        })?;

        let mut guard = self.lock_connection();
        if guard.is_some() {
            return Ok(());
        }

        let conn = options
            .connect()
            .map_err(|e| SqlError::from_sqlite(SqlErrorKind::Connection, &e))?;
        debug!("Opened database {:?} ({})", self.inner.name, options.path);
        *guard = Some(conn);
        Ok(())
    }

    /// Closes the session. An in-memory database is discarded.
    pub fn close(&self) {
        if self.lock_connection().take().is_some() {
            debug!("Closed database {:?}", self.inner.name);
        }
    }

    /// Runs `f` against the open connection.
    ///
    /// Fails with a connection error when the handle is not open. rusqlite
    /// errors raised by `f` are reported with the given `kind`.
    pub fn with_connection<T>(
        &self,
        kind: SqlErrorKind,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, SqlError> {
        let guard = self.lock_connection();
        let conn = guard
            .as_ref()
            .ok_or_else(|| SqlError::new(SqlErrorKind::Connection, "database is not open"))?;
        f(conn).map_err(|e| SqlError::from_sqlite(kind, &e))
    }

    /// Error from the most recent operation on this handle, if it failed.
    pub fn last_error(&self) -> Option<SqlError> {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_last_error(&self, error: Option<SqlError>) {
        *self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = error;
    }

    /// Whether the session is inside an open transaction.
    pub fn in_transaction(&self) -> bool {
        self.with_connection(SqlErrorKind::Unknown, |conn| Ok(!conn.is_autocommit()))
            .unwrap_or(false)
    }

    // A closure that panicked mid-statement leaves the Connection itself intact.
    fn lock_connection(&self) -> MutexGuard<'_, Option<Connection>> {
        self.inner
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
