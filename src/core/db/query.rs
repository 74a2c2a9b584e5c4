/// Query Execution Module
///
/// This module runs single statements against a connection handle and holds
/// the two result wrappers handed back to callers: `NonQueryResult` for
/// statements run for their side effects and `QueryResult`, a cursor over
/// materialized rows.

use crate::core::{EasySqlError, Result, SqlError, SqlErrorKind};
use rusqlite::types::{FromSql, ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{ffi, params_from_iter, Batch, Connection};
use std::collections::BTreeMap;
use tracing::debug;

/// Everything one statement execution produced.
#[derive(Debug, Default)]
pub(crate) struct StatementOutcome {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

/// Prepares and runs one statement with positional parameters.
///
/// Row-returning statements are drained into memory; others report the
/// number of changed rows. `cached` routes preparation through the
/// connection's statement cache. SQL holding no statement, or more than
/// one, is rejected before anything runs.
pub(crate) fn run_statement(
    conn: &Connection,
    sql: &str,
    params: &[Value],
    cached: bool,
) -> rusqlite::Result<StatementOutcome> {
    debug!("Executing: {}", sql);
    let mut stmt = prepare_single(conn, sql)?;
    if cached {
        drop(stmt);
        let mut stmt = conn.prepare_cached(sql)?;
        run_prepared(conn, &mut stmt, params)
    } else {
        run_prepared(conn, &mut stmt, params)
    }
}

/// Prepares `sql`, which must hold exactly one statement.
///
/// `Connection::prepare` silently ignores whatever follows the first
/// statement; stepping a `Batch` sees the tail.
fn prepare_single<'conn>(
    conn: &'conn Connection,
    sql: &str,
) -> rusqlite::Result<rusqlite::Statement<'conn>> {
    let mut batch = Batch::new(conn, sql);
    let stmt = batch.next()?.ok_or_else(|| misuse("empty statement"))?;
    match batch.next() {
        Ok(None) => Ok(stmt),
        // A tail that fails to prepare is still a second statement
        _ => Err(misuse("Unable to execute multiple statements at a time")),
    }
}

fn misuse(message: &str) -> rusqlite::Error {
    rusqlite::Error::SqliteFailure(
        ffi::Error::new(ffi::SQLITE_MISUSE),
        Some(message.to_string()),
    )
}

fn run_prepared(
    conn: &Connection,
    stmt: &mut rusqlite::Statement<'_>,
    params: &[Value],
) -> rusqlite::Result<StatementOutcome> {
    let read_only = stmt.readonly();
    let column_count = stmt.column_count();

    let mut outcome = StatementOutcome::default();
    if column_count == 0 {
        let changed = stmt.execute(params_from_iter(params.iter()))?;
        if !read_only {
            outcome.rows_affected = changed as u64;
        }
    } else {
        outcome.columns = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(Value::from(row.get_ref(i)?));
            }
            outcome.rows.push(values);
        }
        if !read_only {
            outcome.rows_affected = conn.changes() as u64;
        }
    }

    if !read_only {
        outcome.last_insert_id = Some(conn.last_insert_rowid());
    }
    Ok(outcome)
}

/// Converts a borrowed parameter into an owned value so builders can keep it.
pub(crate) fn to_owned_value(param: &dyn ToSql) -> std::result::Result<Value, SqlError> {
    let output = param
        .to_sql()
        .map_err(|e| SqlError::from_sqlite(SqlErrorKind::Statement, &e))?;
    match output {
        ToSqlOutput::Borrowed(value) => Ok(Value::from(value)),
        ToSqlOutput::Owned(value) => Ok(value),
        #[allow(unreachable_patterns)]
        _ => Err(SqlError::new(
            SqlErrorKind::Statement,
            "unsupported parameter type",
        )),
    }
}

/// Converts a parameter slice, stopping at the first failure.
pub(crate) fn to_owned_values(params: &[&dyn ToSql]) -> std::result::Result<Vec<Value>, SqlError> {
    params.iter().map(|p| to_owned_value(*p)).collect()
}

/// Result of a statement run for its side effects.
#[derive(Debug, Clone)]
pub struct NonQueryResult {
    query: String,
    rows_affected: u64,
    last_insert_id: Option<i64>,
    error: Option<SqlError>,
}

impl NonQueryResult {
    pub(crate) fn from_outcome(query: &str, outcome: StatementOutcome) -> Self {
        NonQueryResult {
            query: query.to_string(),
            rows_affected: outcome.rows_affected,
            last_insert_id: outcome.last_insert_id,
            error: None,
        }
    }

    pub(crate) fn failed(query: &str, error: SqlError) -> Self {
        NonQueryResult {
            query: query.to_string(),
            rows_affected: 0,
            last_insert_id: None,
            error: Some(error),
        }
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// Row id of the most recent successful INSERT on the connection.
    pub fn last_insert_id(&self) -> Option<i64> {
        self.last_insert_id
    }

    pub fn last_error(&self) -> Option<&SqlError> {
        self.error.as_ref()
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

/// Cursor position inside a `QueryResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    BeforeFirst,
    At(usize),
    AfterLast,
}

/// Rows returned by a statement, with a cursor over them.
///
/// The cursor starts before the first row; call `next()` to move onto it.
/// A forward-only result refuses to move backwards.
#[derive(Debug, Clone)]
pub struct QueryResult {
    query: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    position: Position,
    forward_only: bool,
    rows_affected: u64,
    last_insert_id: Option<i64>,
    error: Option<SqlError>,
}

impl QueryResult {
    pub(crate) fn from_outcome(query: &str, outcome: StatementOutcome, forward_only: bool) -> Self {
        QueryResult {
            query: query.to_string(),
            columns: outcome.columns,
            rows: outcome.rows,
            position: Position::BeforeFirst,
            forward_only,
            rows_affected: outcome.rows_affected,
            last_insert_id: outcome.last_insert_id,
            error: None,
        }
    }

    pub(crate) fn failed(query: &str, error: SqlError, forward_only: bool) -> Self {
        let mut result = QueryResult::from_outcome(query, StatementOutcome::default(), forward_only);
        result.error = Some(error);
        result
    }

    /// Moves to the next row. Returns false once past the last row.
    pub fn next(&mut self) -> bool {
        let next = match self.position {
            Position::BeforeFirst => 0,
            Position::At(i) => i + 1,
            Position::AfterLast => return false,
        };
        self.move_to(next)
    }

    /// Moves to the previous row. Always false for forward-only results.
    pub fn previous(&mut self) -> bool {
        if self.forward_only {
            return false;
        }
        match self.position {
            Position::At(i) if i > 0 => self.move_to(i - 1),
            Position::AfterLast if !self.rows.is_empty() => self.move_to(self.rows.len() - 1),
            _ => {
                self.position = Position::BeforeFirst;
                false
            }
        }
    }

    /// Moves to the first row.
    pub fn first(&mut self) -> bool {
        if self.forward_only && !matches!(self.position, Position::BeforeFirst | Position::At(0)) {
            return false;
        }
        self.move_to(0)
    }

    /// Moves to the last row.
    pub fn last(&mut self) -> bool {
        if self.rows.is_empty() {
            self.position = Position::AfterLast;
            return false;
        }
        if self.forward_only && self.position == Position::AfterLast {
            return false;
        }
        self.move_to(self.rows.len() - 1)
    }

    /// Moves to the row at `index` (zero-based).
    pub fn seek(&mut self, index: usize) -> bool {
        if self.forward_only {
            let behind = match self.position {
                Position::At(i) => index < i,
                Position::AfterLast => true,
                Position::BeforeFirst => false,
            };
            if behind {
                return false;
            }
        }
        self.move_to(index)
    }

    fn move_to(&mut self, index: usize) -> bool {
        if index < self.rows.len() {
            self.position = Position::At(index);
            true
        } else {
            self.position = Position::AfterLast;
            false
        }
    }

    /// Index of the current row, if the cursor is on one.
    pub fn at(&self) -> Option<usize> {
        match self.position {
            Position::At(i) => Some(i),
            _ => None,
        }
    }

    /// Number of rows in the result.
    pub fn size(&self) -> usize {
        self.rows.len()
    }

    /// True when the statement ran successfully.
    pub fn is_active(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_forward_only(&self) -> bool {
        self.forward_only
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    fn current(&self) -> Option<&Vec<Value>> {
        self.at().and_then(|i| self.rows.get(i))
    }

    /// Value of column `index` in the current row.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.current().and_then(|row| row.get(index))
    }

    /// Value of the named column in the current row.
    pub fn value_by_name(&self, name: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c == name)?;
        self.value(index)
    }

    /// Typed value of column `index` in the current row.
    pub fn get<T: FromSql>(&self, index: usize) -> Result<T> {
        let value = self.value(index).ok_or_else(|| EasySqlError::Database {
            error: SqlError::new(
                SqlErrorKind::Statement,
                format!("no value at column {} of the current row", index),
            ),
            query: Some(self.query.clone()),
        })?;
        T::column_result(ValueRef::from(value)).map_err(|e| EasySqlError::Database {
            error: SqlError::new(SqlErrorKind::Statement, e.to_string()),
            query: Some(self.query.clone()),
        })
    }

    /// Current row as column name → value.
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        match self.current() {
            Some(row) => self
                .columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect(),
            None => BTreeMap::new(),
        }
    }

    /// Current row values in column order.
    pub fn to_list(&self) -> Vec<Value> {
        self.current().cloned().unwrap_or_default()
    }

    /// Current row as a JSON object. Blobs become arrays of bytes.
    pub fn to_json(&self) -> serde_json::Value {
        let object = self
            .to_map()
            .into_iter()
            .map(|(column, value)| (column, value_to_json(&value)))
            .collect();
        serde_json::Value::Object(object)
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    pub fn last_insert_id(&self) -> Option<i64> {
        self.last_insert_id
    }

    pub fn last_error(&self) -> Option<&SqlError> {
        self.error.as_ref()
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Real(f) => serde_json::Value::from(*f),
        Value::Text(t) => serde_json::Value::from(t.as_str()),
        Value::Blob(b) => serde_json::Value::from(b.clone()),
    }
}
