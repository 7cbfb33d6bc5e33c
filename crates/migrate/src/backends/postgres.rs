//! PostgreSQL Backend Implementation
//!
//! Implements the backend traits on top of a sqlx `PgPool`.

use super::core::*;
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row, TypeInfo, ValueRef};
use std::time::Duration;

/// Pool sizing for migration runs
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        // One transaction plus one standalone connection for ledger reads
        Self {
            max_connections: 2,
            acquire_timeout_seconds: 30,
        }
    }
}

/// PostgreSQL connection pool implementation
#[derive(Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `database_url`
    pub async fn connect(database_url: &str, config: &PoolConfig) -> DbResult<Self> {
        tracing::debug!(
            "Creating database pool with config: max={}, timeout={}s",
            config.max_connections,
            config.acquire_timeout_seconds
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(database_url)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create database pool: {}", e);
                DbError::from(e)
            })?;

        Ok(Self::new(pool))
    }
}

#[async_trait]
impl DatabasePool for PostgresPool {
    async fn acquire(&self) -> DbResult<Box<dyn DatabaseExecutor>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PostgresConnection { conn }))
    }

    async fn begin_transaction(&self) -> DbResult<Box<dyn DatabaseTransaction>> {
        let tx = self.pool.begin().await?;
        tracing::debug!("Database transaction started");
        Ok(Box::new(PostgresTransaction { tx: Some(tx) }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// PostgreSQL standalone connection
pub struct PostgresConnection {
    conn: sqlx::pool::PoolConnection<Postgres>,
}

#[async_trait]
impl DatabaseExecutor for PostgresConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64> {
        let result = bind_all(sqlx::query(sql), params)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<Vec<DatabaseRow>> {
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&mut *self.conn)
            .await?;
        rows.iter().map(convert_row).collect()
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    fn active(&mut self) -> DbResult<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| DbError::new("Transaction already completed"))
    }
}

#[async_trait]
impl DatabaseExecutor for PostgresTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64> {
        let tx = self.active()?;
        let result = bind_all(sqlx::query(sql), params)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<Vec<DatabaseRow>> {
        let tx = self.active()?;
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&mut **tx)
            .await?;
        rows.iter().map(convert_row).collect()
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
    async fn commit(mut self: Box<Self>) -> DbResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| DbError::new("Transaction already completed"))?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> DbResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| DbError::new("Transaction already completed"))?;
        tx.rollback().await?;
        Ok(())
    }
}

/// Bind every parameter to a sqlx query
fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[DatabaseValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            DatabaseValue::Null => query.bind(Option::<String>::None),
            DatabaseValue::Bool(b) => query.bind(*b),
            DatabaseValue::Int32(i) => query.bind(*i),
            DatabaseValue::Int64(i) => query.bind(*i),
            DatabaseValue::String(s) => query.bind(s.clone()),
            DatabaseValue::DateTime(dt) => query.bind(*dt),
        };
    }
    query
}

/// Decode a PostgreSQL row into a [`DatabaseRow`]
fn convert_row(row: &PgRow) -> DbResult<DatabaseRow> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for (index, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());
        values.push(convert_value(row, index, column.type_info().name())?);
    }

    Ok(DatabaseRow::new(columns, values))
}

fn convert_value(row: &PgRow, index: usize, type_name: &str) -> DbResult<DatabaseValue> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let value = match type_name {
        "BOOL" => DatabaseValue::Bool(row.try_get(index)?),
        "INT2" => DatabaseValue::Int32(i32::from(row.try_get::<i16, _>(index)?)),
        "INT4" => DatabaseValue::Int32(row.try_get(index)?),
        "INT8" => DatabaseValue::Int64(row.try_get(index)?),
        "TIMESTAMPTZ" => DatabaseValue::DateTime(row.try_get(index)?),
        "TIMESTAMP" => {
            let naive: chrono::NaiveDateTime = row.try_get(index)?;
            DatabaseValue::DateTime(naive.and_utc())
        }
        _ => {
            let value: String = row.try_get(index).map_err(|e| {
                DbError::new(format!(
                    "Failed to decode column {} of type '{}' as text: {}",
                    index, type_name, e
                ))
            })?;
            DatabaseValue::String(value)
        }
    };

    Ok(value)
}
