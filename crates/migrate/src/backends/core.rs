//! Core Database Backend Traits
//!
//! These traits abstract the driver away from the migration engine. A
//! [`DatabasePool`] hands out standalone connections and transactions; both
//! execute statements through [`DatabaseExecutor`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Error reported by a backend, carrying the SQLSTATE code when the server sent one
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DbError {
    pub code: Option<String>,
    pub message: String,
}

/// Result type alias for backend operations
pub type DbResult<T> = Result<T, DbError>;

/// SQLSTATE for `duplicate_object` (e.g. a constraint that already exists)
pub const SQLSTATE_DUPLICATE_OBJECT: &str = "42710";

impl DbError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Whether the server rejected the statement because the object already exists.
    ///
    /// Falls back to the message text for drivers that do not surface a code.
    pub fn is_duplicate_object(&self) -> bool {
        match self.code.as_deref() {
            Some(code) => code == SQLSTATE_DUPLICATE_OBJECT,
            None => self.message.contains("already exists"),
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        let code = err
            .as_database_error()
            .and_then(|db_err| db_err.code())
            .map(|code| code.into_owned());

        Self {
            code,
            message: err.to_string(),
        }
    }
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    String(String),
    DateTime(DateTime<Utc>),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<DateTime<Utc>> for DatabaseValue {
    fn from(value: DateTime<Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// A fetched row, decoded into [`DatabaseValue`]s
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseRow {
    columns: Vec<String>,
    values: Vec<DatabaseValue>,
}

impl DatabaseRow {
    pub fn new(columns: Vec<String>, values: Vec<DatabaseValue>) -> Self {
        Self { columns, values }
    }

    /// Get a column value by index
    pub fn get_by_index(&self, index: usize) -> DbResult<&DatabaseValue> {
        self.values
            .get(index)
            .ok_or_else(|| DbError::new(format!("Column index {} out of range", index)))
    }

    /// Get a column value by name
    pub fn get_by_name(&self, name: &str) -> DbResult<&DatabaseValue> {
        let index = self
            .columns
            .iter()
            .position(|col| col == name)
            .ok_or_else(|| DbError::new(format!("Column '{}' not found", name)))?;
        self.get_by_index(index)
    }

    pub fn get_bool(&self, name: &str) -> DbResult<bool> {
        match self.get_by_name(name)? {
            DatabaseValue::Bool(b) => Ok(*b),
            other => Err(unexpected(name, "bool", other)),
        }
    }

    pub fn get_i64(&self, name: &str) -> DbResult<i64> {
        match self.get_by_name(name)? {
            DatabaseValue::Int64(i) => Ok(*i),
            DatabaseValue::Int32(i) => Ok(i64::from(*i)),
            other => Err(unexpected(name, "integer", other)),
        }
    }

    pub fn get_string(&self, name: &str) -> DbResult<String> {
        match self.get_by_name(name)? {
            DatabaseValue::String(s) => Ok(s.clone()),
            other => Err(unexpected(name, "string", other)),
        }
    }

    pub fn get_datetime(&self, name: &str) -> DbResult<DateTime<Utc>> {
        match self.get_by_name(name)? {
            DatabaseValue::DateTime(dt) => Ok(*dt),
            other => Err(unexpected(name, "timestamp", other)),
        }
    }
}

fn unexpected(column: &str, expected: &str, found: &DatabaseValue) -> DbError {
    DbError::new(format!(
        "Column '{}' expected {} value, found {:?}",
        column, expected, found
    ))
}

/// Statement execution shared by connections and transactions
#[async_trait]
pub trait DatabaseExecutor: Send {
    /// Execute a statement and return the affected row count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64>;

    /// Execute a query and return all result rows
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<Vec<DatabaseRow>>;
}

/// A transaction that must be finished with `commit` or `rollback`.
///
/// Dropping an unfinished transaction rolls it back.
#[async_trait]
pub trait DatabaseTransaction: DatabaseExecutor {
    async fn commit(self: Box<Self>) -> DbResult<()>;

    async fn rollback(self: Box<Self>) -> DbResult<()>;
}

/// Source of connections and transactions
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Acquire a standalone (autocommit) connection
    async fn acquire(&self) -> DbResult<Box<dyn DatabaseExecutor>>;

    /// Begin a new transaction
    async fn begin_transaction(&self) -> DbResult<Box<dyn DatabaseTransaction>>;

    /// Close the pool
    async fn close(&self);
}
