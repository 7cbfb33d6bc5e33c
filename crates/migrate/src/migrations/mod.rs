//! Migration System
//!
//! Units, the registry that orders them, the ledger that records them and the
//! runner that applies and reverts them.

pub mod changes;
pub mod definitions;
pub mod ledger;
pub mod registry;
pub mod rollback;
pub mod runner;
pub mod schema_builder;
pub mod statements;
pub mod unit;

pub use changes::{Migration, SchemaChange};
pub use definitions::*;
pub use ledger::MigrationLedger;
pub use registry::MigrationRegistry;
pub use runner::MigrationRunner;
pub use schema_builder::{ColumnDef, ForeignKey, IndexDef, PrimaryKey, ReferentialAction, TableDef};
pub use statements::split_sql_statements;
pub use unit::{MigrationContext, MigrationUnit};
