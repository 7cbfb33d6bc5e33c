//! Built-in schema changes and the `Migration` unit that sequences them

use async_trait::async_trait;

use super::schema_builder::{
    add_column_sql, add_foreign_key_sql, alter_column_type_sql, drop_column_sql, quote_ident,
    set_nullability_sql, ColumnDef, IndexDef, TableDef,
};
use super::statements::split_sql_statements;
use super::unit::{MigrationContext, MigrationUnit};
use crate::error::{MigrationError, MigrationResult};

/// A single reversible change to the schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    /// Skipped when the column already exists
    AddColumn { table: String, column: ColumnDef },
    /// Only altered when the column exists with a different nullability.
    /// Revert flips it unconditionally.
    SetNullability {
        table: String,
        column: String,
        nullable: bool,
    },
    /// Unconditional in both directions; narrowing on revert may fail or truncate
    ChangeColumnType {
        table: String,
        column: String,
        from: String,
        to: String,
    },
    /// When the table already exists only its foreign keys are added
    CreateTable(TableDef),
    CreateUniqueIndex(IndexDef),
    DropColumn { table: String, column: ColumnDef },
    DropTable(TableDef),
    /// Raw SQL scripts for each direction
    Sql { up: String, down: String },
}

impl SchemaChange {
    /// Apply the change inside the unit's transaction
    pub async fn apply(&self, ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
        match self {
            SchemaChange::AddColumn { table, column } => add_column_guarded(ctx, table, column).await,
            SchemaChange::SetNullability {
                table,
                column,
                nullable,
            } => {
                // A missing column must reach the database and fail there
                let exists = ctx.column_exists(table, column).await?;
                if exists && ctx.column_is_nullable(table, column).await? == *nullable {
                    tracing::info!(
                        "Column {}.{} already has nullable = {}, skipping",
                        table,
                        column,
                        nullable
                    );
                    return Ok(());
                }
                ctx.execute(&set_nullability_sql(table, column, *nullable)).await?;
                Ok(())
            }
            SchemaChange::ChangeColumnType { table, column, to, .. } => {
                ctx.execute(&alter_column_type_sql(table, column, to)).await?;
                Ok(())
            }
            SchemaChange::CreateTable(def) => create_table(ctx, def).await,
            SchemaChange::CreateUniqueIndex(index) => {
                ctx.execute(&index.create_sql()).await?;
                Ok(())
            }
            SchemaChange::DropColumn { table, column } => {
                ctx.execute(&drop_column_sql(table, &column.name)).await?;
                Ok(())
            }
            SchemaChange::DropTable(def) => {
                ctx.execute(&def.drop_sql()).await?;
                Ok(())
            }
            SchemaChange::Sql { up, .. } => execute_script(ctx, up).await,
        }
    }

    /// Undo the change inside the unit's transaction
    pub async fn revert(&self, ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
        match self {
            SchemaChange::AddColumn { table, column } => {
                ctx.execute(&drop_column_sql(table, &column.name)).await?;
                Ok(())
            }
            SchemaChange::SetNullability {
                table,
                column,
                nullable,
            } => {
                ctx.execute(&set_nullability_sql(table, column, !*nullable)).await?;
                Ok(())
            }
            SchemaChange::ChangeColumnType {
                table, column, from, ..
            } => {
                ctx.execute(&alter_column_type_sql(table, column, from)).await?;
                Ok(())
            }
            SchemaChange::CreateTable(def) => {
                ctx.execute(&def.drop_sql()).await?;
                Ok(())
            }
            SchemaChange::CreateUniqueIndex(index) => {
                ctx.execute(&index.drop_sql()).await?;
                Ok(())
            }
            SchemaChange::DropColumn { table, column } => add_column_guarded(ctx, table, column).await,
            SchemaChange::DropTable(def) => {
                ctx.execute(&def.create_sql()).await?;
                Ok(())
            }
            SchemaChange::Sql { down, .. } => execute_script(ctx, down).await,
        }
    }

    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            SchemaChange::AddColumn { table, column } => format!("add column {}.{}", table, column.name),
            SchemaChange::SetNullability {
                table,
                column,
                nullable,
            } => format!("set {}.{} nullable = {}", table, column, nullable),
            SchemaChange::ChangeColumnType { table, column, to, .. } => {
                format!("change type of {}.{} to {}", table, column, to)
            }
            SchemaChange::CreateTable(def) => format!("create table {}", def.name),
            SchemaChange::CreateUniqueIndex(index) => format!("create unique index {}", index.name),
            SchemaChange::DropColumn { table, column } => format!("drop column {}.{}", table, column.name),
            SchemaChange::DropTable(def) => format!("drop table {}", def.name),
            SchemaChange::Sql { .. } => "raw sql".to_string(),
        }
    }
}

async fn add_column_guarded(ctx: &mut MigrationContext<'_>, table: &str, column: &ColumnDef) -> MigrationResult<()> {
    if ctx.column_exists(table, &column.name).await? {
        tracing::info!("Column {}.{} already exists, skipping", table, column.name);
        return Ok(());
    }
    ctx.execute(&add_column_sql(table, column)).await?;
    Ok(())
}

async fn create_table(ctx: &mut MigrationContext<'_>, def: &TableDef) -> MigrationResult<()> {
    if !ctx.table_exists(&def.name).await? {
        ctx.execute(&def.create_sql()).await?;
        return Ok(());
    }

    tracing::info!("Table {} already exists, adding missing foreign keys", def.name);

    // A failed statement aborts a PostgreSQL transaction, so each attempt runs
    // under a savepoint that is rolled back when the constraint already exists.
    for fk in &def.foreign_keys {
        let savepoint = quote_ident(&format!("tern_fk_{}", fk.name));
        ctx.execute(&format!("SAVEPOINT {}", savepoint)).await?;

        match ctx.execute(&add_foreign_key_sql(&def.name, fk)).await {
            Ok(_) => {
                ctx.execute(&format!("RELEASE SAVEPOINT {}", savepoint)).await?;
            }
            Err(MigrationError::Database(e)) if e.is_duplicate_object() => {
                tracing::info!("Foreign key {} on {} already exists: {}", fk.name, def.name, e);
                ctx.execute(&format!("ROLLBACK TO SAVEPOINT {}", savepoint)).await?;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

async fn execute_script(ctx: &mut MigrationContext<'_>, script: &str) -> MigrationResult<()> {
    for statement in split_sql_statements(script) {
        ctx.execute(&statement).await?;
    }
    Ok(())
}

/// A migration unit built from an ordered list of [`SchemaChange`]s.
///
/// `apply` runs the changes in order and `revert` runs their inverses in
/// reverse order.
#[derive(Debug, Clone)]
pub struct Migration {
    version: i64,
    name: String,
    changes: Vec<SchemaChange>,
}

impl Migration {
    pub fn new(version: i64, name: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            changes: Vec::new(),
        }
    }

    pub fn changes(&self) -> &[SchemaChange] {
        &self.changes
    }

    pub fn change(mut self, change: SchemaChange) -> Self {
        self.changes.push(change);
        self
    }

    pub fn add_column(self, table: impl Into<String>, column: ColumnDef) -> Self {
        self.change(SchemaChange::AddColumn {
            table: table.into(),
            column,
        })
    }

    pub fn set_nullability(self, table: impl Into<String>, column: impl Into<String>, nullable: bool) -> Self {
        self.change(SchemaChange::SetNullability {
            table: table.into(),
            column: column.into(),
            nullable,
        })
    }

    pub fn change_column_type(
        self,
        table: impl Into<String>,
        column: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.change(SchemaChange::ChangeColumnType {
            table: table.into(),
            column: column.into(),
            from: from.into(),
            to: to.into(),
        })
    }

    pub fn create_table(self, table: TableDef) -> Self {
        self.change(SchemaChange::CreateTable(table))
    }

    pub fn create_unique_index(self, index: IndexDef) -> Self {
        self.change(SchemaChange::CreateUniqueIndex(index))
    }

    pub fn drop_column(self, table: impl Into<String>, column: ColumnDef) -> Self {
        self.change(SchemaChange::DropColumn {
            table: table.into(),
            column,
        })
    }

    pub fn drop_table(self, table: TableDef) -> Self {
        self.change(SchemaChange::DropTable(table))
    }

    pub fn sql(self, up: impl Into<String>, down: impl Into<String>) -> Self {
        self.change(SchemaChange::Sql {
            up: up.into(),
            down: down.into(),
        })
    }
}

#[async_trait]
impl MigrationUnit for Migration {
    fn version(&self) -> i64 {
        self.version
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
        for change in &self.changes {
            tracing::debug!("{}: {}", self.name, change.describe());
            change.apply(ctx).await?;
        }
        Ok(())
    }

    async fn revert(&self, ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
        for change in self.changes.iter().rev() {
            tracing::debug!("{}: revert {}", self.name, change.describe());
            change.revert(ctx).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{DatabasePool, DatabaseTransaction};
    use crate::introspect::SchemaIntrospector;
    use crate::migrations::schema_builder::ReferentialAction;
    use crate::testing::MemoryBackend;

    async fn apply_in_tx(backend: &MemoryBackend, unit: &Migration) -> MigrationResult<()> {
        let introspector = SchemaIntrospector::default();
        let mut tx = backend.begin_transaction().await.unwrap();
        let result = {
            let mut ctx = MigrationContext::new(&mut *tx, &introspector);
            unit.apply(&mut ctx).await
        };
        finish(tx, result).await
    }

    async fn revert_in_tx(backend: &MemoryBackend, unit: &Migration) -> MigrationResult<()> {
        let introspector = SchemaIntrospector::default();
        let mut tx = backend.begin_transaction().await.unwrap();
        let result = {
            let mut ctx = MigrationContext::new(&mut *tx, &introspector);
            unit.revert(&mut ctx).await
        };
        finish(tx, result).await
    }

    async fn finish(tx: Box<dyn DatabaseTransaction>, result: MigrationResult<()>) -> MigrationResult<()> {
        match result {
            Ok(()) => {
                tx.commit().await.unwrap();
                Ok(())
            }
            Err(e) => {
                tx.rollback().await.unwrap();
                Err(e)
            }
        }
    }

    fn pacientes_backend() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.create_table("pacientes", &[("id", "UUID", false), ("nome", "TEXT", false)]);
        backend
    }

    #[tokio::test]
    async fn test_add_column_twice_is_harmless() {
        let backend = pacientes_backend();
        let unit = Migration::new(1, "add_cor_to_pacientes")
            .add_column("pacientes", ColumnDef::new("cor", "VARCHAR(20)"));

        apply_in_tx(&backend, &unit).await.unwrap();
        apply_in_tx(&backend, &unit).await.unwrap();

        let column = backend.column("pacientes", "cor").unwrap();
        assert_eq!(column.data_type, "VARCHAR(20)");
        assert!(column.nullable);

        let adds = backend
            .statements()
            .iter()
            .filter(|s| s.contains("ADD COLUMN"))
            .count();
        assert_eq!(adds, 1);
    }

    #[tokio::test]
    async fn test_set_nullability_only_alters_when_needed() {
        let backend = MemoryBackend::new();
        backend.create_table("pix_transactions", &[("id", "UUID", false), ("userId", "UUID", false)]);
        let unit = Migration::new(2, "allow_null_user_id_on_pix").set_nullability("pix_transactions", "userId", true);

        apply_in_tx(&backend, &unit).await.unwrap();
        assert!(backend.column("pix_transactions", "userId").unwrap().nullable);

        apply_in_tx(&backend, &unit).await.unwrap();
        let alters = backend
            .statements()
            .iter()
            .filter(|s| s.contains("DROP NOT NULL"))
            .count();
        assert_eq!(alters, 1);

        revert_in_tx(&backend, &unit).await.unwrap();
        assert!(!backend.column("pix_transactions", "userId").unwrap().nullable);
    }

    #[tokio::test]
    async fn test_change_column_type_both_ways() {
        let backend = MemoryBackend::new();
        backend.create_table("pacientes", &[("telefone", "VARCHAR(15)", true)]);
        let unit = Migration::new(3, "widen_telefone").change_column_type(
            "pacientes",
            "telefone",
            "VARCHAR(15)",
            "VARCHAR(32)",
        );

        apply_in_tx(&backend, &unit).await.unwrap();
        assert_eq!(backend.column("pacientes", "telefone").unwrap().data_type, "VARCHAR(32)");

        revert_in_tx(&backend, &unit).await.unwrap();
        assert_eq!(backend.column("pacientes", "telefone").unwrap().data_type, "VARCHAR(15)");
    }

    #[tokio::test]
    async fn test_create_table_then_drop() {
        let backend = pacientes_backend();
        let unit = Migration::new(4, "create_agendamentos").create_table(
            TableDef::new("agendamentos")
                .column(ColumnDef::new("pacienteId", "UUID").not_null())
                .foreign_key("pacienteId", "pacientes", "id", ReferentialAction::Cascade),
        );

        apply_in_tx(&backend, &unit).await.unwrap();
        assert!(backend.table_exists("agendamentos"));
        assert!(backend.column("agendamentos", "id").is_some());
        assert!(backend.has_constraint("agendamentos", "fk_agendamentos_pacienteId"));

        revert_in_tx(&backend, &unit).await.unwrap();
        assert!(!backend.table_exists("agendamentos"));
    }

    #[tokio::test]
    async fn test_existing_table_with_existing_fk_is_a_no_op() {
        let backend = pacientes_backend();
        let unit = Migration::new(5, "create_agendamentos").create_table(
            TableDef::new("agendamentos")
                .column(ColumnDef::new("pacienteId", "UUID").not_null())
                .foreign_key("pacienteId", "pacientes", "id", ReferentialAction::Cascade),
        );

        apply_in_tx(&backend, &unit).await.unwrap();
        // Table and constraint are both present now
        apply_in_tx(&backend, &unit).await.unwrap();

        let statements = backend.statements();
        assert!(statements.iter().any(|s| s.starts_with("ROLLBACK TO SAVEPOINT")));
        assert!(backend.has_constraint("agendamentos", "fk_agendamentos_pacienteId"));
    }

    #[tokio::test]
    async fn test_existing_table_gets_missing_fk() {
        let backend = pacientes_backend();
        backend.create_table("agendamentos", &[("id", "UUID", false), ("pacienteId", "UUID", false)]);
        let unit = Migration::new(6, "create_agendamentos").create_table(
            TableDef::new("agendamentos")
                .column(ColumnDef::new("pacienteId", "UUID").not_null())
                .foreign_key("pacienteId", "pacientes", "id", ReferentialAction::Cascade),
        );

        apply_in_tx(&backend, &unit).await.unwrap();

        assert!(backend.has_constraint("agendamentos", "fk_agendamentos_pacienteId"));
        assert!(!backend.statements().iter().any(|s| s.starts_with("CREATE TABLE")));
    }

    #[tokio::test]
    async fn test_unique_index_is_natively_idempotent() {
        let backend = MemoryBackend::new();
        backend.create_table("pix_transactions", &[("id", "UUID", false), ("txid", "TEXT", true)]);
        let unit = Migration::new(7, "unique_pix_txid").create_unique_index(IndexDef::new(
            "uq_pix_transactions_txid",
            "pix_transactions",
            &["txid"],
        ));

        apply_in_tx(&backend, &unit).await.unwrap();
        apply_in_tx(&backend, &unit).await.unwrap();
        assert!(backend.has_index("uq_pix_transactions_txid"));

        revert_in_tx(&backend, &unit).await.unwrap();
        revert_in_tx(&backend, &unit).await.unwrap();
        assert!(!backend.has_index("uq_pix_transactions_txid"));
    }

    #[tokio::test]
    async fn test_revert_runs_in_reverse_order() {
        let backend = pacientes_backend();
        let unit = Migration::new(8, "two_steps")
            .add_column("pacientes", ColumnDef::new("cor", "VARCHAR(20)"))
            .add_column("pacientes", ColumnDef::new("peso", "INTEGER"));

        apply_in_tx(&backend, &unit).await.unwrap();
        revert_in_tx(&backend, &unit).await.unwrap();

        let drops: Vec<String> = backend
            .statements()
            .into_iter()
            .filter(|s| s.contains("DROP COLUMN"))
            .collect();
        assert_eq!(drops.len(), 2);
        assert!(drops[0].contains("\"peso\""));
        assert!(drops[1].contains("\"cor\""));
    }

    #[tokio::test]
    async fn test_failure_rolls_back_earlier_changes() {
        let backend = pacientes_backend();
        backend.fail_on("\"peso\"");
        let unit = Migration::new(9, "two_steps")
            .add_column("pacientes", ColumnDef::new("cor", "VARCHAR(20)"))
            .add_column("pacientes", ColumnDef::new("peso", "INTEGER"));

        let err = apply_in_tx(&backend, &unit).await.unwrap_err();

        assert!(matches!(err, MigrationError::Database(_)));
        assert!(backend.column("pacientes", "cor").is_none());
    }

    #[tokio::test]
    async fn test_drop_column_revert_restores_it() {
        let backend = MemoryBackend::new();
        backend.create_table("pacientes", &[("id", "UUID", false), ("apelido", "TEXT", true)]);
        let unit = Migration::new(10, "drop_apelido").drop_column("pacientes", ColumnDef::new("apelido", "TEXT"));

        apply_in_tx(&backend, &unit).await.unwrap();
        assert!(backend.column("pacientes", "apelido").is_none());

        revert_in_tx(&backend, &unit).await.unwrap();
        assert!(backend.column("pacientes", "apelido").unwrap().nullable);
    }

    #[tokio::test]
    async fn test_set_nullability_on_missing_column_fails() {
        let backend = MemoryBackend::new();
        backend.create_table("pix_transactions", &[("id", "UUID", false), ("userId", "UUID", false)]);

        for nullable in [false, true] {
            let unit = Migration::new(11, "typo").set_nullability("pix_transactions", "userIdd", nullable);

            match apply_in_tx(&backend, &unit).await {
                Err(MigrationError::Database(e)) => assert_eq!(e.code.as_deref(), Some("42703")),
                other => panic!("Expected undefined column, got {:?}", other),
            }
        }
        assert!(!backend.column("pix_transactions", "userId").unwrap().nullable);
    }

    #[tokio::test]
    async fn test_drop_table_revert_recreates_it() {
        let backend = MemoryBackend::new();
        let legado = TableDef::new("legado").column(ColumnDef::new("nota", "TEXT"));
        let create = Migration::new(12, "create_legado").create_table(legado.clone());
        apply_in_tx(&backend, &create).await.unwrap();
        let created = backend.schema_facts();

        let unit = Migration::new(13, "drop_legado").drop_table(legado);
        apply_in_tx(&backend, &unit).await.unwrap();
        assert!(!backend.table_exists("legado"));

        revert_in_tx(&backend, &unit).await.unwrap();
        assert_eq!(backend.schema_facts(), created);
    }

    #[tokio::test]
    async fn test_sql_scripts_run_in_both_directions() {
        let backend = MemoryBackend::new();
        let unit = Migration::new(14, "audit_table").sql(
            "CREATE TABLE tern_audit (id INT);\nINSERT INTO tern_audit (id) VALUES (1);",
            "DROP TABLE tern_audit;",
        );

        apply_in_tx(&backend, &unit).await.unwrap();
        let applied = backend.statements();
        assert_eq!(applied.len(), 2);
        assert!(applied[0].starts_with("CREATE TABLE tern_audit"));
        assert!(applied[1].starts_with("INSERT INTO tern_audit"));

        revert_in_tx(&backend, &unit).await.unwrap();
        let statements = backend.statements();
        assert_eq!(statements.len(), 3);
        assert!(statements[2].starts_with("DROP TABLE tern_audit"));
    }

    #[tokio::test]
    async fn test_existing_table_fk_to_missing_table_fails() {
        let backend = pacientes_backend();
        backend.create_table("agendamentos", &[("id", "UUID", false), ("medicoId", "UUID", false)]);
        let unit = Migration::new(15, "create_agendamentos").create_table(
            TableDef::new("agendamentos")
                .column(ColumnDef::new("medicoId", "UUID").not_null())
                .foreign_key("medicoId", "medicos", "id", ReferentialAction::Restrict),
        );

        match apply_in_tx(&backend, &unit).await {
            Err(MigrationError::Database(e)) => assert_eq!(e.code.as_deref(), Some("42P01")),
            other => panic!("Expected undefined table, got {:?}", other),
        }
        assert!(!backend.has_constraint("agendamentos", "fk_agendamentos_medicoId"));
        assert!(!backend.statements().iter().any(|s| s.starts_with("ROLLBACK TO SAVEPOINT")));
    }
}
