//! Migration Definitions - records, configuration and run reports

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::MigrationError;

pub use tern_core::DEFAULT_MIGRATIONS_TABLE;

/// A row of the ledger table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Configuration for the migration system
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Table name for tracking migrations
    pub migrations_table: String,
    /// Schema the units, the ledger and introspection all work in.
    /// `None` leaves the connection's `search_path` alone.
    pub schema: Option<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
            schema: None,
        }
    }
}

/// Identity of a unit that was applied or reverted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitRef {
    pub version: i64,
    pub name: String,
}

/// The unit a run stopped at, and why
#[derive(Debug)]
pub struct HaltedUnit {
    pub version: i64,
    pub name: String,
    pub error: MigrationError,
}

/// Result of `run_up`
#[derive(Debug, Default)]
pub struct RunReport {
    /// Units applied, in the order they committed
    pub applied: Vec<UnitRef>,
    /// Units already recorded in the ledger when the run started
    pub already_applied: usize,
    /// Set when a unit failed; nothing after it was attempted
    pub halted: Option<HaltedUnit>,
    pub execution_time_ms: u128,
}

/// Result of `run_down`
#[derive(Debug, Default)]
pub struct RollbackReport {
    /// Units reverted, most recent first
    pub reverted: Vec<UnitRef>,
    pub halted: Option<HaltedUnit>,
    pub execution_time_ms: u128,
}

impl RunReport {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    pub fn is_complete(&self) -> bool {
        self.halted.is_none()
    }

    /// Turn a halted run into its error, keeping the applied list otherwise
    pub fn into_result(self) -> Result<Vec<UnitRef>, MigrationError> {
        match self.halted {
            Some(halted) => Err(halted.error),
            None => Ok(self.applied),
        }
    }
}

impl RollbackReport {
    pub fn reverted_count(&self) -> usize {
        self.reverted.len()
    }

    pub fn is_complete(&self) -> bool {
        self.halted.is_none()
    }

    pub fn into_result(self) -> Result<Vec<UnitRef>, MigrationError> {
        match self.halted {
            Some(halted) => Err(halted.error),
            None => Ok(self.reverted),
        }
    }
}

/// Status of one registered unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationStatus {
    pub version: i64,
    pub name: String,
    /// `None` while pending
    pub applied_at: Option<DateTime<Utc>>,
}

impl MigrationStatus {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Registry compared against the ledger
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationStatusReport {
    /// Every registered unit, ascending by version
    pub migrations: Vec<MigrationStatus>,
    /// Ledger rows whose version has no registered unit
    pub orphaned: Vec<MigrationRecord>,
}

impl MigrationStatusReport {
    pub fn pending(&self) -> impl Iterator<Item = &MigrationStatus> {
        self.migrations.iter().filter(|m| !m.is_applied())
    }

    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    pub fn applied_count(&self) -> usize {
        self.migrations.iter().filter(|m| m.is_applied()).count()
    }
}
