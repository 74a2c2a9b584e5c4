/// Query Builder Module
///
/// Builders accumulate statement fragments and parameters and run the final
/// statement on `exec()`. Construction never touches the database; parameter
/// conversion failures are kept and reported by `exec()`.

use crate::core::db::query::{run_statement, to_owned_value, to_owned_values, StatementOutcome};
use crate::core::db::{NonQueryResult, QueryResult, SqlDatabase};
use crate::core::{ErrorMode, Result, SqlError, SqlErrorKind};
use rusqlite::types::{FromSql, ToSql, Value, ValueRef};
use std::collections::BTreeMap;

/// State every builder carries: where to run and how to report failures.
#[derive(Debug, Clone)]
struct Target {
    handle: SqlDatabase,
    mode: ErrorMode,
    /// First parameter conversion failure, reported by exec()
    bind_error: Option<SqlError>,
}

impl Target {
    fn new(handle: SqlDatabase, mode: ErrorMode) -> Self {
        Target {
            handle,
            mode,
            bind_error: None,
        }
    }

    fn convert(&mut self, params: &[&dyn ToSql]) -> Vec<Value> {
        match to_owned_values(params) {
            Ok(values) => values,
            Err(e) => {
                self.bind_error.get_or_insert(e);
                Vec::new()
            }
        }
    }

    fn run_non_query(&self, sql: &str, params: &[Value]) -> Result<NonQueryResult> {
        let outcome = match &self.bind_error {
            Some(e) => Err(e.clone()),
            None => self.handle.with_connection(SqlErrorKind::Statement, |conn| {
                run_statement(conn, sql, params, false)
            }),
        };
        self.mode.resolve(
            &self.handle,
            Some(sql),
            outcome.map(|o| NonQueryResult::from_outcome(sql, o)),
            |e| NonQueryResult::failed(sql, e),
        )
    }
}

/// Builds `INSERT INTO <table> VALUES (...)`, one row per `values()` call.
///
/// The table may carry a column list: `insert_into("t (a, b)")`.
#[derive(Debug, Clone)]
pub struct InsertQuery {
    target: Target,
    table: String,
    rows: Vec<Vec<Value>>,
}

impl InsertQuery {
    pub(crate) fn new(table: &str, handle: SqlDatabase, mode: ErrorMode) -> Self {
        InsertQuery {
            target: Target::new(handle, mode),
            table: table.to_string(),
            rows: Vec::new(),
        }
    }

    /// Adds one row of values.
    pub fn values(mut self, row: &[&dyn ToSql]) -> Self {
        let row = self.target.convert(row);
        self.rows.push(row);
        self
    }

    /// The statement run for each row.
    pub fn sql(&self) -> String {
        let width = self.rows.first().map(Vec::len).unwrap_or(0);
        let placeholders = vec!["?"; width].join(", ");
        format!("INSERT INTO {} VALUES ({})", self.table, placeholders)
    }

    /// Inserts every row with one prepared statement.
    ///
    /// Rows affected are summed; the last insert id is the final row's.
    pub fn exec(self) -> Result<NonQueryResult> {
        let sql = self.sql();
        let outcome = self.check_rows().and_then(|()| {
            self.target
                .handle
                .with_connection(SqlErrorKind::Statement, |conn| {
                    let mut total = 0;
                    let mut last = None;
                    for row in &self.rows {
                        let outcome = run_statement(conn, &sql, row, true)?;
                        total += outcome.rows_affected;
                        last = outcome.last_insert_id;
                    }
                    Ok((total, last))
                })
        });

        self.target.mode.resolve(
            &self.target.handle,
            Some(&sql),
            outcome.map(|(rows_affected, last_insert_id)| {
                NonQueryResult::from_outcome(
                    &sql,
                    StatementOutcome {
                        rows_affected,
                        last_insert_id,
                        ..Default::default()
                    },
                )
            }),
            |e| NonQueryResult::failed(&sql, e),
        )
    }

    fn check_rows(&self) -> std::result::Result<(), SqlError> {
        if let Some(e) = &self.target.bind_error {
            return Err(e.clone());
        }
        let width = match self.rows.first() {
            Some(row) if !row.is_empty() => row.len(),
            _ => {
                return Err(SqlError::new(
                    SqlErrorKind::Statement,
                    format!("no values to insert into {}", self.table),
                ))
            }
        };
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != width {
                return Err(SqlError::new(
                    SqlErrorKind::Statement,
                    format!("row {} has {} values, expected {}", i, row.len(), width),
                ));
            }
        }
        Ok(())
    }
}

/// Joins AND-ed predicates into a WHERE clause.
fn where_clause(predicates: &[String]) -> String {
    if predicates.is_empty() {
        String::new()
    } else {
        let joined: Vec<String> = predicates.iter().map(|p| format!("({})", p)).collect();
        format!(" WHERE {}", joined.join(" AND "))
    }
}

/// Builds `DELETE FROM <table> [WHERE ...]`.
#[derive(Debug, Clone)]
pub struct DeleteQuery {
    target: Target,
    table: String,
    predicates: Vec<String>,
    params: Vec<Value>,
}

impl DeleteQuery {
    pub(crate) fn new(table: &str, handle: SqlDatabase, mode: ErrorMode) -> Self {
        DeleteQuery {
            target: Target::new(handle, mode),
            table: table.to_string(),
            predicates: Vec::new(),
            params: Vec::new(),
        }
    }

    /// Adds a predicate with `?` placeholders. Repeated calls are AND-ed.
    pub fn filter(mut self, expr: &str, params: &[&dyn ToSql]) -> Self {
        let values = self.target.convert(params);
        self.predicates.push(expr.to_string());
        self.params.extend(values);
        self
    }

    pub fn sql(&self) -> String {
        format!("DELETE FROM {}{}", self.table, where_clause(&self.predicates))
    }

    /// Deletes the matching rows, or every row when no filter was given.
    pub fn exec(self) -> Result<NonQueryResult> {
        self.target.run_non_query(&self.sql(), &self.params)
    }
}

/// Builds `UPDATE <table> SET ... [WHERE ...]`.
#[derive(Debug, Clone)]
pub struct UpdateQuery {
    target: Target,
    table: String,
    assignments: Vec<(String, Value)>,
    predicates: Vec<String>,
    params: Vec<Value>,
}

impl UpdateQuery {
    pub(crate) fn new(table: &str, handle: SqlDatabase, mode: ErrorMode) -> Self {
        UpdateQuery {
            target: Target::new(handle, mode),
            table: table.to_string(),
            assignments: Vec::new(),
            predicates: Vec::new(),
            params: Vec::new(),
        }
    }

    /// Sets `column` to `value`.
    pub fn set(mut self, column: &str, value: &dyn ToSql) -> Self {
        match to_owned_value(value) {
            Ok(value) => self.assignments.push((column.to_string(), value)),
            Err(e) => {
                self.target.bind_error.get_or_insert(e);
            }
        }
        self
    }

    /// Adds a predicate with `?` placeholders. Repeated calls are AND-ed.
    pub fn filter(mut self, expr: &str, params: &[&dyn ToSql]) -> Self {
        let values = self.target.convert(params);
        self.predicates.push(expr.to_string());
        self.params.extend(values);
        self
    }

    pub fn sql(&self) -> String {
        let sets: Vec<String> = self
            .assignments
            .iter()
            .map(|(column, _)| format!("{} = ?", column))
            .collect();
        format!(
            "UPDATE {} SET {}{}",
            self.table,
            sets.join(", "),
            where_clause(&self.predicates)
        )
    }

    pub fn exec(self) -> Result<NonQueryResult> {
        let sql = self.sql();
        if self.assignments.is_empty() && self.target.bind_error.is_none() {
            let error = SqlError::new(
                SqlErrorKind::Statement,
                format!("no columns to update in {}", self.table),
            );
            return self.target.mode.resolve(
                &self.target.handle,
                Some(&sql),
                Err(error),
                |e| NonQueryResult::failed(&sql, e),
            );
        }

        // SET values bind before WHERE values
        let params: Vec<Value> = self
            .assignments
            .iter()
            .map(|(_, value)| value.clone())
            .chain(self.params.iter().cloned())
            .collect();
        self.target.run_non_query(&sql, &params)
    }
}

/// A statement prepared on demand and run with positional parameters.
///
/// Runs go through the connection's prepared-statement cache, so executing
/// the same `PreparedQuery` repeatedly compiles the SQL once.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    target: Target,
    sql: String,
    forward_only: bool,
}

impl PreparedQuery {
    pub(crate) fn new(sql: &str, handle: SqlDatabase, mode: ErrorMode, forward_only: bool) -> Self {
        PreparedQuery {
            target: Target::new(handle, mode),
            sql: sql.to_string(),
            forward_only,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    fn run(&self, params: &[&dyn ToSql]) -> std::result::Result<StatementOutcome, SqlError> {
        let values = to_owned_values(params)?;
        self.target
            .handle
            .with_connection(SqlErrorKind::Statement, |conn| {
                run_statement(conn, &self.sql, &values, true)
            })
    }

    /// Runs the statement and returns its rows.
    pub fn exec(&self, params: &[&dyn ToSql]) -> Result<QueryResult> {
        let outcome = self
            .run(params)
            .map(|o| QueryResult::from_outcome(&self.sql, o, self.forward_only));
        self.target.mode.resolve(
            &self.target.handle,
            Some(&self.sql),
            outcome,
            |e| QueryResult::failed(&self.sql, e, self.forward_only),
        )
    }

    /// Runs the statement for its side effects.
    pub fn exec_non_query(&self, params: &[&dyn ToSql]) -> Result<NonQueryResult> {
        let outcome = self
            .run(params)
            .map(|o| NonQueryResult::from_outcome(&self.sql, o));
        self.target.mode.resolve(
            &self.target.handle,
            Some(&self.sql),
            outcome,
            |e| NonQueryResult::failed(&self.sql, e),
        )
    }

    /// First row as column name → value, if any.
    pub fn first(&self, params: &[&dyn ToSql]) -> Result<Option<BTreeMap<String, Value>>> {
        let mut result = self.exec(params)?;
        Ok(if result.next() { Some(result.to_map()) } else { None })
    }

    /// First column of the first row, converted to `T`.
    ///
    /// `None` when there are no rows or the statement failed in silent mode.
    pub fn scalar<T: FromSql>(&self, params: &[&dyn ToSql]) -> Result<Option<T>> {
        let mut result = self.exec(params)?;
        if !result.next() {
            return Ok(None);
        }
        let converted = match result.value(0) {
            Some(value) => T::column_result(ValueRef::from(value))
                .map_err(|e| SqlError::new(SqlErrorKind::Statement, e.to_string())),
            None => Err(SqlError::new(SqlErrorKind::Statement, "statement returned no columns")),
        };
        self.target.mode.resolve(
            &self.target.handle,
            Some(&self.sql),
            converted.map(Some),
            |_| None,
        )
    }
}
