//! # tern-migrate
//!
//! Ordered, reversible schema migrations for PostgreSQL.
//!
//! A [`MigrationRegistry`] holds every compiled-in [`MigrationUnit`], sorted by
//! version. The [`MigrationRunner`] diffs it against the ledger table, applies
//! pending units one transaction at a time (recording each in the ledger inside
//! the same transaction) and reverts the most recent ones in reverse order.
//! Units consult the [`SchemaIntrospector`] through their [`MigrationContext`]
//! before changes that are not naturally idempotent.

pub mod backends;
pub mod error;
pub mod introspect;
pub mod migrations;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backends::{
    DatabaseExecutor, DatabasePool, DatabaseRow, DatabaseTransaction, DatabaseValue, DbError,
    DbResult, PoolConfig, PostgresPool,
};
pub use error::{MigrationError, MigrationResult};
pub use introspect::SchemaIntrospector;
pub use migrations::*;
