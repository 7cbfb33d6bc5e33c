//! Migration Runner - applies pending units against the database
//!
//! Every unit runs in its own transaction together with its ledger insert,
//! so a unit is either fully applied and recorded or not at all. The first
//! failure halts the run; units committed before it stay committed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use super::definitions::{HaltedUnit, MigrationConfig, MigrationStatus, MigrationStatusReport, RunReport, UnitRef};
use super::ledger::MigrationLedger;
use super::registry::MigrationRegistry;
use super::schema_builder::quote_ident;
use super::unit::{MigrationContext, MigrationUnit};
use crate::backends::{DatabaseExecutor, DatabasePool, DatabaseTransaction};
use crate::error::{MigrationError, MigrationResult};
use crate::introspect::SchemaIntrospector;

/// Migration runner that executes units against a database
pub struct MigrationRunner {
    registry: MigrationRegistry,
    pool: Arc<dyn DatabasePool>,
    ledger: MigrationLedger,
    introspector: SchemaIntrospector,
}

impl MigrationRunner {
    pub fn new(registry: MigrationRegistry, pool: Arc<dyn DatabasePool>, config: MigrationConfig) -> Self {
        Self {
            registry,
            pool,
            ledger: MigrationLedger::new(config.migrations_table),
            introspector: SchemaIntrospector::new(config.schema),
        }
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &MigrationLedger {
        &self.ledger
    }

    /// Close the underlying pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub(crate) fn introspector(&self) -> &SchemaIntrospector {
        &self.introspector
    }

    /// Registered units with no ledger row, ascending by version.
    ///
    /// Creates the ledger table on first use.
    pub async fn pending_migrations(&self) -> MigrationResult<Vec<&dyn MigrationUnit>> {
        let mut conn = self.connection().await?;
        self.ledger.ensure_table(&mut *conn).await?;

        let applied: HashSet<i64> = self
            .ledger
            .applied(&mut *conn)
            .await?
            .into_iter()
            .map(|record| record.version)
            .collect();

        Ok(self
            .registry
            .units()
            .iter()
            .filter(|unit| !applied.contains(&unit.version()))
            .map(|unit| unit.as_ref())
            .collect())
    }

    /// Apply pending units in version order, at most `limit` of them.
    ///
    /// A unit failure does not surface as `Err`; it ends the run and is
    /// reported in [`RunReport::halted`]. `Err` means the run could not start.
    pub async fn run_up(&self, limit: Option<usize>) -> MigrationResult<RunReport> {
        let start_time = Instant::now();

        let pending = self.pending_migrations().await?;
        let mut report = RunReport {
            already_applied: self.registry.len() - pending.len(),
            ..RunReport::default()
        };

        if pending.is_empty() {
            tracing::info!("No pending migrations");
        }

        for unit in pending.into_iter().take(limit.unwrap_or(usize::MAX)) {
            tracing::info!("Applying migration: {} - {}", unit.version(), unit.name());

            match self.apply_unit(unit).await {
                Ok(()) => report.applied.push(UnitRef {
                    version: unit.version(),
                    name: unit.name().to_string(),
                }),
                Err(e) => {
                    let error = e.into_apply_failure(unit.version(), unit.name());
                    tracing::error!("Migration {} ({}) halted the run: {}", unit.version(), unit.name(), error);
                    report.halted = Some(HaltedUnit {
                        version: unit.version(),
                        name: unit.name().to_string(),
                        error,
                    });
                    break;
                }
            }
        }

        report.execution_time_ms = start_time.elapsed().as_millis();
        tracing::info!(
            "Applied {} migration(s) in {}ms",
            report.applied_count(),
            report.execution_time_ms
        );
        Ok(report)
    }

    /// Registry compared against the ledger
    pub async fn status(&self) -> MigrationResult<MigrationStatusReport> {
        let mut conn = self.connection().await?;
        self.ledger.ensure_table(&mut *conn).await?;
        let records = self.ledger.applied(&mut *conn).await?;

        let applied_at: HashMap<i64, _> = records.iter().map(|r| (r.version, r.applied_at)).collect();

        let migrations = self
            .registry
            .units()
            .iter()
            .map(|unit| MigrationStatus {
                version: unit.version(),
                name: unit.name().to_string(),
                applied_at: applied_at.get(&unit.version()).copied(),
            })
            .collect();

        let orphaned = records
            .into_iter()
            .filter(|record| self.registry.get(record.version).is_none())
            .collect();

        Ok(MigrationStatusReport { migrations, orphaned })
    }

    /// Record a unit as applied without running it.
    ///
    /// Operator escape hatch for changes applied by hand. The ledger drifts
    /// from the real schema if the change was not actually made.
    pub async fn mark_run(&self, version: i64, name: &str) -> MigrationResult<()> {
        let unit = self
            .registry
            .get(version)
            .ok_or(MigrationError::UnknownVersion { version })?;

        if unit.name() != name {
            return Err(MigrationError::NameMismatch {
                version,
                expected: unit.name().to_string(),
                given: name.to_string(),
            });
        }

        let mut conn = self.connection().await?;
        self.ledger.ensure_table(&mut *conn).await?;

        if self.ledger.has_run(&mut *conn, version).await? {
            return Err(MigrationError::AlreadyApplied { version });
        }

        tracing::warn!(
            "Marking migration {} ({}) as applied without running it",
            version,
            name
        );
        self.ledger.mark_run(&mut *conn, version, name).await
    }

    /// A standalone connection outside any unit transaction.
    ///
    /// Scoped to the configured schema so ledger reads and writes resolve
    /// where introspection looks.
    pub(crate) async fn connection(&self) -> MigrationResult<Box<dyn DatabaseExecutor>> {
        let mut conn = self.pool.acquire().await.map_err(|e| MigrationError::Connection {
            message: e.to_string(),
        })?;

        if let Some(sql) = self.search_path_sql(false) {
            conn.execute(&sql, &[]).await.map_err(|e| MigrationError::Connection {
                message: format!("Failed to select schema: {}", e),
            })?;
        }
        Ok(conn)
    }

    /// A unit transaction whose unqualified names resolve in the configured schema
    pub(crate) async fn begin(&self) -> MigrationResult<Box<dyn DatabaseTransaction>> {
        let mut tx = self
            .pool
            .begin_transaction()
            .await
            .map_err(|e| MigrationError::Transaction {
                message: format!("Failed to start transaction: {}", e),
            })?;

        if let Some(sql) = self.search_path_sql(true) {
            if let Err(e) = tx.execute(&sql, &[]).await {
                finish_rollback(tx).await;
                return Err(MigrationError::Transaction {
                    message: format!("Failed to select schema: {}", e),
                });
            }
        }
        Ok(tx)
    }

    fn search_path_sql(&self, local: bool) -> Option<String> {
        let schema = self.introspector.schema()?;
        let scope = if local { "SET LOCAL" } else { "SET" };
        Some(format!("{} search_path TO {}", scope, quote_ident(schema)))
    }

    async fn apply_unit(&self, unit: &dyn MigrationUnit) -> MigrationResult<()> {
        let mut tx = self.begin().await?;

        match self.apply_in(&mut *tx, unit).await {
            Ok(()) => finish_commit(tx).await,
            Err(e) => {
                finish_rollback(tx).await;
                Err(e)
            }
        }
    }

    async fn apply_in(&self, tx: &mut dyn DatabaseTransaction, unit: &dyn MigrationUnit) -> MigrationResult<()> {
        {
            let mut ctx = MigrationContext::new(&mut *tx, &self.introspector);
            unit.apply(&mut ctx).await?;
        }
        self.ledger.mark_run(tx, unit.version(), unit.name()).await
    }
}

pub(crate) async fn finish_commit(tx: Box<dyn DatabaseTransaction>) -> MigrationResult<()> {
    tx.commit().await.map_err(|e| MigrationError::Transaction {
        message: format!("Failed to commit: {}", e),
    })
}

pub(crate) async fn finish_rollback(tx: Box<dyn DatabaseTransaction>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!("Rollback failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::changes::Migration;
    use crate::migrations::schema_builder::ColumnDef;
    use crate::testing::MemoryBackend;

    const TABLE: &str = "tern_migrations";

    fn clinic_backend() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.create_table("pacientes", &[("id", "UUID", false), ("nome", "TEXT", false)]);
        backend.create_table(
            "pix_transactions",
            &[("id", "UUID", false), ("userId", "UUID", false), ("txid", "TEXT", true)],
        );
        backend
    }

    fn clinic_units() -> Vec<Box<dyn MigrationUnit>> {
        vec![
            Box::new(
                Migration::new(1712000000200, "allow_null_user_id_on_pix")
                    .set_nullability("pix_transactions", "userId", true),
            ),
            Box::new(
                Migration::new(1712000000100, "add_cor_to_pacientes")
                    .add_column("pacientes", ColumnDef::new("cor", "VARCHAR(20)")),
            ),
        ]
    }

    fn runner(backend: &MemoryBackend, units: Vec<Box<dyn MigrationUnit>>) -> MigrationRunner {
        let registry = MigrationRegistry::new(units).unwrap();
        MigrationRunner::new(registry, Arc::new(backend.clone()), MigrationConfig::default())
    }

    #[tokio::test]
    async fn test_clinic_scenario() {
        let backend = clinic_backend();
        let runner = runner(&backend, clinic_units());

        let report = runner.run_up(None).await.unwrap();

        assert!(report.is_complete());
        let names: Vec<&str> = report.applied.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["add_cor_to_pacientes", "allow_null_user_id_on_pix"]);
        assert_eq!(backend.ledger_versions(TABLE), vec![1712000000100, 1712000000200]);
        assert!(backend.column("pacientes", "cor").is_some());
        assert!(backend.column("pix_transactions", "userId").unwrap().nullable);

        let status = runner.status().await.unwrap();
        assert_eq!(status.pending_count(), 0);
        assert_eq!(status.applied_count(), 2);
    }

    #[tokio::test]
    async fn test_nothing_pending_after_run_up() {
        let backend = clinic_backend();
        let runner = runner(&backend, clinic_units());

        assert_eq!(runner.pending_migrations().await.unwrap().len(), 2);
        runner.run_up(None).await.unwrap();
        assert!(runner.pending_migrations().await.unwrap().is_empty());

        let again = runner.run_up(None).await.unwrap();
        assert_eq!(again.applied_count(), 0);
        assert_eq!(again.already_applied, 2);
    }

    #[tokio::test]
    async fn test_units_apply_in_version_order() {
        let backend = clinic_backend();
        let runner = runner(&backend, clinic_units());

        runner.run_up(None).await.unwrap();

        let statements = backend.statements();
        let add = statements.iter().position(|s| s.contains("ADD COLUMN \"cor\"")).unwrap();
        let alter = statements.iter().position(|s| s.contains("DROP NOT NULL")).unwrap();
        assert!(add < alter);
    }

    #[tokio::test]
    async fn test_limit() {
        let backend = clinic_backend();
        let runner = runner(&backend, clinic_units());

        let report = runner.run_up(Some(1)).await.unwrap();

        assert_eq!(report.applied_count(), 1);
        assert_eq!(backend.ledger_versions(TABLE), vec![1712000000100]);
        assert_eq!(runner.pending_migrations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_fast_keeps_earlier_units() {
        let backend = clinic_backend();
        backend.fail_on("\"peso\"");
        let units: Vec<Box<dyn MigrationUnit>> = vec![
            Box::new(Migration::new(1, "add_cor").add_column("pacientes", ColumnDef::new("cor", "VARCHAR(20)"))),
            Box::new(Migration::new(2, "add_peso").add_column("pacientes", ColumnDef::new("peso", "INTEGER"))),
            Box::new(Migration::new(3, "add_altura").add_column("pacientes", ColumnDef::new("altura", "INTEGER"))),
        ];
        let runner = runner(&backend, units);

        let report = runner.run_up(None).await.unwrap();

        assert_eq!(report.applied_count(), 1);
        let halted = report.halted.as_ref().unwrap();
        assert_eq!(halted.name, "add_peso");
        assert!(matches!(halted.error, MigrationError::Apply { version: 2, .. }));
        assert_eq!(backend.ledger_versions(TABLE), vec![1]);
        assert!(!backend.statements().iter().any(|s| s.contains("\"altura\"")));
        assert!(report.into_result().is_err());
    }

    #[tokio::test]
    async fn test_introspection_failure_halts_without_guessing() {
        let backend = clinic_backend();
        let runner = runner(&backend, clinic_units());
        backend.fail_on("information_schema.columns");

        let report = runner.run_up(None).await.unwrap();

        assert!(report.applied.is_empty());
        assert!(report.halted.unwrap().error.is_introspection_failure());
        assert!(backend.column("pacientes", "cor").is_none());
        assert!(backend.ledger_versions(TABLE).is_empty());
    }

    #[tokio::test]
    async fn test_ledger_insert_failure_rolls_back_the_unit() {
        let backend = clinic_backend();
        let runner = runner(&backend, clinic_units());
        backend.fail_on("INSERT INTO \"tern_migrations\"");

        let report = runner.run_up(None).await.unwrap();

        assert!(report.applied.is_empty());
        assert!(backend.column("pacientes", "cor").is_none());
    }

    #[tokio::test]
    async fn test_mark_run_skips_apply() {
        let backend = clinic_backend();
        let runner = runner(&backend, clinic_units());

        runner.mark_run(1712000000100, "add_cor_to_pacientes").await.unwrap();
        let report = runner.run_up(None).await.unwrap();

        assert_eq!(report.applied_count(), 1);
        assert_eq!(report.already_applied, 1);
        // The ledger says applied, the schema disagrees
        assert!(backend.column("pacientes", "cor").is_none());
        assert_eq!(backend.ledger_versions(TABLE), vec![1712000000100, 1712000000200]);
    }

    #[tokio::test]
    async fn test_mark_run_rejects_bad_input() {
        let backend = clinic_backend();
        let runner = runner(&backend, clinic_units());

        let err = runner.mark_run(99, "nope").await.unwrap_err();
        assert!(matches!(err, MigrationError::UnknownVersion { version: 99 }));

        let err = runner.mark_run(1712000000100, "wrong_name").await.unwrap_err();
        assert!(matches!(err, MigrationError::NameMismatch { .. }));

        runner.mark_run(1712000000100, "add_cor_to_pacientes").await.unwrap();
        let err = runner.mark_run(1712000000100, "add_cor_to_pacientes").await.unwrap_err();
        assert!(matches!(err, MigrationError::AlreadyApplied { .. }));
    }

    #[tokio::test]
    async fn test_status_reports_orphans_and_serializes() {
        let backend = clinic_backend();
        let runner = runner(&backend, clinic_units());
        runner.run_up(Some(1)).await.unwrap();
        {
            let mut conn = backend.acquire().await.unwrap();
            runner.ledger().mark_run(&mut *conn, 1600000000000, "removed_long_ago").await.unwrap();
        }

        let status = runner.status().await.unwrap();

        assert_eq!(status.pending_count(), 1);
        assert_eq!(status.orphaned.len(), 1);
        assert_eq!(status.orphaned[0].name, "removed_long_ago");

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["migrations"][0]["name"], "add_cor_to_pacientes");
        assert!(json["migrations"][0]["applied_at"].is_string());
        assert!(json["migrations"][1]["applied_at"].is_null());
        assert_eq!(json["orphaned"][0]["version"], 1600000000000i64);
    }

    #[tokio::test]
    async fn test_configured_schema_scopes_every_statement() {
        let backend = clinic_backend();
        let config = MigrationConfig {
            schema: Some("clinic".to_string()),
            ..MigrationConfig::default()
        };
        let runner = MigrationRunner::new(
            MigrationRegistry::new(clinic_units()).unwrap(),
            Arc::new(backend.clone()),
            config,
        );

        assert!(runner.run_up(None).await.unwrap().is_complete());

        let statements = backend.statements();
        let ledger_create = statements.iter().position(|s| s.starts_with("CREATE TABLE IF NOT EXISTS")).unwrap();
        assert_eq!(statements[ledger_create - 1], "SET search_path TO \"clinic\"");

        let scoped = statements.iter().filter(|s| *s == "SET LOCAL search_path TO \"clinic\"").count();
        assert_eq!(scoped, 2);
        for (index, sql) in statements.iter().enumerate() {
            if sql.starts_with("ALTER TABLE") || sql.starts_with("INSERT INTO") {
                let last_set = statements[..index].iter().rev().find(|s| s.starts_with("SET")).unwrap();
                assert!(last_set.starts_with("SET LOCAL"), "{} ran outside the unit scope", sql);
            }
        }
    }

    #[tokio::test]
    async fn test_schema_selection_failure_halts_before_any_change() {
        let backend = clinic_backend();
        backend.fail_on("SET LOCAL search_path");
        let config = MigrationConfig {
            schema: Some("clinic".to_string()),
            ..MigrationConfig::default()
        };
        let runner = MigrationRunner::new(
            MigrationRegistry::new(clinic_units()).unwrap(),
            Arc::new(backend.clone()),
            config,
        );

        let report = runner.run_up(None).await.unwrap();

        assert!(report.applied.is_empty());
        let halted = report.halted.unwrap();
        assert!(halted.error.to_string().contains("Failed to select schema"));
        assert!(!backend.statements().iter().any(|s| s.starts_with("ALTER TABLE")));
        assert!(backend.ledger_versions(TABLE).is_empty());
    }

    #[tokio::test]
    async fn test_connection_failure_is_error() {
        let backend = clinic_backend();
        let runner = runner(&backend, clinic_units());
        backend.set_unavailable(true);

        let err = runner.run_up(None).await.unwrap_err();
        assert!(matches!(err, MigrationError::Connection { .. }));
    }
}
