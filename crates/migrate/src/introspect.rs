//! Schema introspection against `information_schema`.
//!
//! Every answer is queried fresh on the caller's connection or transaction;
//! nothing is cached, since other processes may be changing the schema.
//! A table or column that does not exist yields `false`, never an error.

use crate::backends::{DatabaseExecutor, DatabaseValue};
use crate::error::{MigrationError, MigrationResult};

pub(crate) const TABLE_EXISTS_SQL: &str = "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
     WHERE table_schema = COALESCE($1::text, current_schema()::text) AND table_name = $2) AS \"exists\"";

pub(crate) const COLUMN_EXISTS_SQL: &str = "SELECT EXISTS (SELECT 1 FROM information_schema.columns \
     WHERE table_schema = COALESCE($1::text, current_schema()::text) AND table_name = $2 AND column_name = $3) AS \"exists\"";

pub(crate) const COLUMN_NULLABLE_SQL: &str = "SELECT (is_nullable = 'YES') AS \"nullable\" FROM information_schema.columns \
     WHERE table_schema = COALESCE($1::text, current_schema()::text) AND table_name = $2 AND column_name = $3";

/// Answers existence questions about the live schema
#[derive(Debug, Clone, Default)]
pub struct SchemaIntrospector {
    schema: Option<String>,
}

impl SchemaIntrospector {
    /// Create an introspector scoped to `schema`, or to `current_schema()` when `None`
    pub fn new(schema: Option<String>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Does `table` exist?
    pub async fn table_exists<E>(&self, conn: &mut E, table: &str) -> MigrationResult<bool>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let params = [self.schema_param(), DatabaseValue::from(table)];
        self.query_flag(conn, TABLE_EXISTS_SQL, &params, table).await
    }

    /// Does `column` exist on `table`?
    pub async fn column_exists<E>(&self, conn: &mut E, table: &str, column: &str) -> MigrationResult<bool>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let params = [
            self.schema_param(),
            DatabaseValue::from(table),
            DatabaseValue::from(column),
        ];
        self.query_flag(conn, COLUMN_EXISTS_SQL, &params, table).await
    }

    /// Is `column` on `table` nullable? A missing column reports `false`.
    pub async fn column_is_nullable<E>(&self, conn: &mut E, table: &str, column: &str) -> MigrationResult<bool>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let params = [
            self.schema_param(),
            DatabaseValue::from(table),
            DatabaseValue::from(column),
        ];
        self.query_flag(conn, COLUMN_NULLABLE_SQL, &params, table).await
    }

    fn schema_param(&self) -> DatabaseValue {
        DatabaseValue::from(self.schema.clone())
    }

    async fn query_flag<E>(
        &self,
        conn: &mut E,
        sql: &str,
        params: &[DatabaseValue],
        table: &str,
    ) -> MigrationResult<bool>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let failure = |message: String| MigrationError::Introspection {
            table: table.to_string(),
            message,
        };

        let rows = conn
            .fetch_all(sql, params)
            .await
            .map_err(|e| failure(e.to_string()))?;

        match rows.first() {
            None => Ok(false),
            Some(row) => match row.get_by_index(0).map_err(|e| failure(e.to_string()))? {
                DatabaseValue::Bool(flag) => Ok(*flag),
                other => Err(failure(format!("expected boolean result, got {:?}", other))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBackend;
    use crate::backends::DatabasePool;

    #[tokio::test]
    async fn test_missing_objects_report_false() {
        let backend = MemoryBackend::new();
        backend.create_table("pacientes", &[("id", "UUID", false), ("nome", "TEXT", false)]);
        let introspector = SchemaIntrospector::default();
        let mut conn = backend.acquire().await.unwrap();

        assert!(introspector.table_exists(&mut *conn, "pacientes").await.unwrap());
        assert!(!introspector.table_exists(&mut *conn, "agendamentos").await.unwrap());
        assert!(introspector.column_exists(&mut *conn, "pacientes", "nome").await.unwrap());
        assert!(!introspector.column_exists(&mut *conn, "pacientes", "cor").await.unwrap());
        assert!(!introspector.column_exists(&mut *conn, "agendamentos", "id").await.unwrap());
        assert!(!introspector.column_is_nullable(&mut *conn, "agendamentos", "id").await.unwrap());
    }

    #[tokio::test]
    async fn test_nullability() {
        let backend = MemoryBackend::new();
        backend.create_table(
            "pix_transactions",
            &[("id", "UUID", false), ("userId", "UUID", false), ("txid", "TEXT", true)],
        );
        let introspector = SchemaIntrospector::new(Some("public".to_string()));
        let mut conn = backend.acquire().await.unwrap();

        assert!(!introspector.column_is_nullable(&mut *conn, "pix_transactions", "userId").await.unwrap());
        assert!(introspector.column_is_nullable(&mut *conn, "pix_transactions", "txid").await.unwrap());
    }

    #[tokio::test]
    async fn test_connection_failure_is_introspection_error() {
        let backend = MemoryBackend::new();
        backend.fail_on("information_schema");
        let introspector = SchemaIntrospector::default();
        let mut conn = backend.acquire().await.unwrap();

        let err = introspector.table_exists(&mut *conn, "pacientes").await.unwrap_err();
        assert!(err.is_introspection_failure());
        assert!(err.to_string().contains("pacientes"));
    }
}
