//! Reverting the most recently applied units

use std::time::Instant;

use super::definitions::{HaltedUnit, RollbackReport, UnitRef};
use super::runner::{finish_commit, finish_rollback, MigrationRunner};
use super::unit::{MigrationContext, MigrationUnit};
use crate::backends::DatabaseTransaction;
use crate::error::{MigrationError, MigrationResult};

impl MigrationRunner {
    /// Revert the `count` most recently applied units, newest first.
    ///
    /// Each revert and its ledger delete share one transaction. The first
    /// failure, or a ledger row with no registered unit, halts the run.
    pub async fn run_down(&self, count: usize) -> MigrationResult<RollbackReport> {
        let start_time = Instant::now();
        let mut report = RollbackReport::default();

        if count == 0 {
            return Ok(report);
        }

        let records = {
            let mut conn = self.connection().await?;
            self.ledger().ensure_table(&mut *conn).await?;
            self.ledger().most_recently_applied(&mut *conn, count).await?
        };

        if records.is_empty() {
            tracing::info!("No applied migrations to revert");
        }

        for record in records {
            let unit = match self.registry().get(record.version) {
                Some(unit) => unit,
                None => {
                    let error = MigrationError::UnknownVersionOnRevert {
                        version: record.version,
                        name: record.name.clone(),
                    };
                    tracing::error!("{}", error);
                    report.halted = Some(HaltedUnit {
                        version: record.version,
                        name: record.name,
                        error,
                    });
                    break;
                }
            };

            tracing::info!("Reverting migration: {} - {}", unit.version(), unit.name());

            match self.revert_unit(unit).await {
                Ok(()) => report.reverted.push(UnitRef {
                    version: unit.version(),
                    name: unit.name().to_string(),
                }),
                Err(e) => {
                    let error = e.into_revert_failure(unit.version(), unit.name());
                    tracing::error!("Migration {} ({}) halted the rollback: {}", unit.version(), unit.name(), error);
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
            "Reverted {} migration(s) in {}ms",
            report.reverted_count(),
            report.execution_time_ms
        );
        Ok(report)
    }

    async fn revert_unit(&self, unit: &dyn MigrationUnit) -> MigrationResult<()> {
        let mut tx = self.begin().await?;

        match self.revert_in(&mut *tx, unit).await {
            Ok(()) => finish_commit(tx).await,
            Err(e) => {
                finish_rollback(tx).await;
                Err(e)
            }
        }
    }

    async fn revert_in(&self, tx: &mut dyn DatabaseTransaction, unit: &dyn MigrationUnit) -> MigrationResult<()> {
        {
            let mut ctx = MigrationContext::new(&mut *tx, self.introspector());
            unit.revert(&mut ctx).await?;
        }

        if !self.ledger().unmark(tx, unit.version()).await? {
            return Err(MigrationError::Ledger {
                message: format!("no ledger row for version {}", unit.version()),
            });
        }
        Ok(())
    }
}
