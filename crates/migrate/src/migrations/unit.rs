//! Migration units and the context they run in

use async_trait::async_trait;

use crate::backends::{DatabaseTransaction, DatabaseValue};
use crate::error::{MigrationError, MigrationResult};
use crate::introspect::SchemaIntrospector;

/// One reversible schema change, identified by a version and a name.
///
/// Versions are ordered integers (typically a millisecond timestamp) and
/// must be unique in a registry, as must names.
#[async_trait]
pub trait MigrationUnit: Send + Sync {
    fn version(&self) -> i64;

    fn name(&self) -> &str;

    /// Move the schema forward
    async fn apply(&self, ctx: &mut MigrationContext<'_>) -> MigrationResult<()>;

    /// Undo exactly what `apply` did
    async fn revert(&self, ctx: &mut MigrationContext<'_>) -> MigrationResult<()>;
}

/// The transaction a unit runs in, plus introspection over it.
///
/// Introspection queries go through the same transaction, so a unit sees
/// its own earlier changes.
pub struct MigrationContext<'a> {
    conn: &'a mut dyn DatabaseTransaction,
    introspector: &'a SchemaIntrospector,
}

impl<'a> MigrationContext<'a> {
    pub fn new(conn: &'a mut dyn DatabaseTransaction, introspector: &'a SchemaIntrospector) -> Self {
        Self { conn, introspector }
    }

    /// Execute a single statement
    pub async fn execute(&mut self, sql: &str) -> MigrationResult<u64> {
        self.execute_with(sql, &[]).await
    }

    /// Execute a single statement with bound parameters
    pub async fn execute_with(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        tracing::debug!("Executing: {}", sql);
        self.conn.execute(sql, params).await.map_err(MigrationError::from)
    }

    pub async fn table_exists(&mut self, table: &str) -> MigrationResult<bool> {
        self.introspector.table_exists(&mut *self.conn, table).await
    }

    pub async fn column_exists(&mut self, table: &str, column: &str) -> MigrationResult<bool> {
        self.introspector.column_exists(&mut *self.conn, table, column).await
    }

    pub async fn column_is_nullable(&mut self, table: &str, column: &str) -> MigrationResult<bool> {
        self.introspector
            .column_is_nullable(&mut *self.conn, table, column)
            .await
    }
}
