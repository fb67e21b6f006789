//! The store seam: one logical connection, used strictly sequentially.
//!
//! Two implementations are provided:
//! - [`sqlite::SqliteStore`]: `rusqlite`, file-backed or `:memory:`
//! - [`mysql::MySqlStore`]: `sqlx` MySQL driver behind a blocking facade
//!   (feature `mysql`)
//!
//! Everything dialect-specific about the SQL text lives in [`Dialect`]; the
//! trait itself only moves statements and values across the wire.

pub mod dialect;
#[cfg(feature = "mysql")]
pub mod mysql;
pub mod sqlite;

pub use dialect::Dialect;

use crate::error::StoreError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokidx_core::{Identifier, TokenType, SQL_DATETIME_FORMAT};

/// A bound statement parameter or a decoded result value.
///
/// Deserializes from plain JSON scalars, so case files can write
/// `"params": [10, "Bearer", "2025-01-01T00:00:00"]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    DateTime(NaiveDateTime),
    Text(String),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::DateTime(v) => write!(f, "{}", v.format(SQL_DATETIME_FORMAT)),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<TokenType> for Value {
    fn from(v: TokenType) -> Self {
        Value::Text(v.as_str().to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// A fully materialized result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of every row, rendered as text.
    pub fn first_column_text(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|r| r.first())
            .map(|v| v.to_string())
            .collect()
    }

    /// Turn explain output into plan steps, one per row, keeping column order.
    pub fn into_plan(self) -> Vec<PlanStep> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|row| PlanStep {
                fields: columns
                    .iter()
                    .cloned()
                    .zip(row.into_iter().map(|v| match v {
                        Value::Null => String::new(),
                        other => other.to_string(),
                    }))
                    .collect(),
            })
            .collect()
    }
}

/// One row of the store's explain output. Opaque to the harness: it is only
/// carried through to the report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub fields: Vec<(String, String)>,
}

impl PlanStep {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(c, _)| c.eq_ignore_ascii_case(column))
            .map(|(_, v)| v.as_str())
    }
}

/// Connection-level settings the bulk loader turns off and must put back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub autocommit: bool,
    pub foreign_key_checks: bool,
}

/// Result of an idempotent DDL request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlOutcome {
    Created,
    AlreadyExists,
}

/// A single store connection.
///
/// Implementations classify native errors into [`StoreError`] variants so the
/// harness can treat "already exists" as a no-op and connectivity as fatal.
pub trait Store {
    /// SQL flavour spoken by this connection.
    fn dialect(&self) -> Dialect;

    /// Run a statement that returns no rows; returns affected rows.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, StoreError>;

    /// Run a statement and decode every row into [`Value`]s.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet, StoreError>;

    /// Run a statement, pull the whole result set into client memory in its
    /// native row form, and return the row count. This is the timed path.
    fn fetch_all_count(&mut self, sql: &str, params: &[Value]) -> Result<usize, StoreError>;

    /// The store's plan for `sql`, using the same parameters.
    fn explain(&mut self, sql: &str, params: &[Value]) -> Result<Vec<PlanStep>, StoreError> {
        let explain_sql = format!("{}{}", self.dialect().explain_prefix(), sql);
        Ok(self
            .query(&explain_sql, params)
            .map_err(|e| e.in_op("explain"))?
            .into_plan())
    }

    fn session_settings(&mut self) -> Result<SessionSettings, StoreError>;

    fn set_autocommit(&mut self, enabled: bool) -> Result<(), StoreError>;

    fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<(), StoreError>;

    /// Commit the open transaction. With autocommit off a new one starts.
    fn commit(&mut self) -> Result<(), StoreError>;

    fn rollback(&mut self) -> Result<(), StoreError>;

    /// Largest number of bound parameters one statement may carry.
    fn max_bind_params(&self) -> usize {
        self.dialect().max_bind_params()
    }

    /// Switch the connection to `database` (no-op where not applicable).
    fn use_database(&mut self, database: &Identifier) -> Result<(), StoreError>;

    /// Whether `database` exists. Always true where the connection itself is
    /// the database.
    fn database_exists(&mut self, database: &Identifier) -> Result<bool, StoreError> {
        match self.dialect().database_exists_query() {
            Some(sql) => Ok(!self
                .query(sql, &[database.as_str().into()])
                .map_err(|e| e.in_op("check database"))?
                .is_empty()),
            None => Ok(true),
        }
    }

    fn table_exists(&mut self, table: &Identifier) -> Result<bool, StoreError> {
        let sql = self.dialect().table_exists_query();
        Ok(!self
            .query(sql, &[table.as_str().into()])
            .map_err(|e| e.in_op("check table"))?
            .is_empty())
    }

    /// Names of every non-primary index on `table`, sorted, re-read from the
    /// catalog on each call.
    fn secondary_indexes(&mut self, table: &Identifier) -> Result<Vec<String>, StoreError> {
        let sql = self.dialect().secondary_indexes_query();
        let mut names = self
            .query(sql, &[table.as_str().into()])
            .map_err(|e| e.in_op("list indexes"))?
            .first_column_text();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Release the connection.
    fn close(self: Box<Self>) -> Result<(), StoreError>;
}
