//! Migration Ledger - the table recording which units have run
//!
//! Rows are appended on apply and deleted on revert. Insertion order (the
//! `id` column) decides which unit was applied most recently.

use chrono::{DateTime, Utc};

use super::definitions::MigrationRecord;
use super::schema_builder::quote_ident;
use crate::backends::{DatabaseExecutor, DatabaseRow, DatabaseValue, DbError};
use crate::error::{MigrationError, MigrationResult};

/// Reads and writes the ledger table through any executor
#[derive(Debug, Clone)]
pub struct MigrationLedger {
    table: String,
}

impl MigrationLedger {
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into() }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// SQL to create the ledger table
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                \"id\" BIGSERIAL PRIMARY KEY,\n    \
                \"version\" BIGINT NOT NULL UNIQUE,\n    \
                \"name\" TEXT NOT NULL,\n    \
                \"applied_at\" TIMESTAMPTZ NOT NULL DEFAULT NOW()\n\
            )",
            quote_ident(&self.table)
        )
    }

    /// Create the ledger table if absent
    pub async fn ensure_table<E>(&self, conn: &mut E) -> MigrationResult<()>
    where
        E: DatabaseExecutor + ?Sized,
    {
        conn.execute(&self.create_table_sql(), &[])
            .await
            .map_err(ledger_error)?;
        Ok(())
    }

    pub async fn has_run<E>(&self, conn: &mut E, version: i64) -> MigrationResult<bool>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE \"version\" = $1) AS \"applied\"",
            quote_ident(&self.table)
        );
        let rows = conn
            .fetch_all(&sql, &[DatabaseValue::Int64(version)])
            .await
            .map_err(ledger_error)?;

        match rows.first() {
            Some(row) => row.get_bool("applied").map_err(ledger_error),
            None => Ok(false),
        }
    }

    /// Record `version` as applied
    pub async fn mark_run<E>(&self, conn: &mut E, version: i64, name: &str) -> MigrationResult<()>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let sql = format!(
            "INSERT INTO {} (\"version\", \"name\") VALUES ($1, $2)",
            quote_ident(&self.table)
        );
        conn.execute(&sql, &[DatabaseValue::Int64(version), DatabaseValue::from(name)])
            .await
            .map_err(ledger_error)?;
        Ok(())
    }

    /// Remove the row for `version`; returns whether a row was deleted
    pub async fn unmark<E>(&self, conn: &mut E, version: i64) -> MigrationResult<bool>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let sql = format!("DELETE FROM {} WHERE \"version\" = $1", quote_ident(&self.table));
        let affected = conn
            .execute(&sql, &[DatabaseValue::Int64(version)])
            .await
            .map_err(ledger_error)?;
        Ok(affected > 0)
    }

    /// The `count` most recently applied rows, newest first
    pub async fn most_recently_applied<E>(&self, conn: &mut E, count: usize) -> MigrationResult<Vec<MigrationRecord>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let sql = format!(
            "SELECT \"version\", \"name\", \"applied_at\" FROM {} ORDER BY \"id\" DESC LIMIT $1",
            quote_ident(&self.table)
        );
        let limit = i64::try_from(count).unwrap_or(i64::MAX);
        let rows = conn
            .fetch_all(&sql, &[DatabaseValue::Int64(limit)])
            .await
            .map_err(ledger_error)?;
        rows.iter().map(record_from_row).collect()
    }

    /// Every row, oldest first
    pub async fn applied<E>(&self, conn: &mut E) -> MigrationResult<Vec<MigrationRecord>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let sql = format!(
            "SELECT \"version\", \"name\", \"applied_at\" FROM {} ORDER BY \"id\" ASC",
            quote_ident(&self.table)
        );
        let rows = conn.fetch_all(&sql, &[]).await.map_err(ledger_error)?;
        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &DatabaseRow) -> MigrationResult<MigrationRecord> {
    let applied_at: DateTime<Utc> = row.get_datetime("applied_at").map_err(ledger_error)?;
    Ok(MigrationRecord {
        version: row.get_i64("version").map_err(ledger_error)?,
        name: row.get_string("name").map_err(ledger_error)?,
        applied_at,
    })
}

fn ledger_error(err: DbError) -> MigrationError {
    MigrationError::Ledger {
        message: err.to_string(),
    }
}
