//! Database Backend Abstractions
//!
//! The engine reaches the database only through the traits in [`core`]:
//! statement execution, row fetching and transaction boundaries. The
//! PostgreSQL implementation lives in [`postgres`].

pub mod core;
pub mod postgres;

pub use self::core::*;
pub use self::postgres::{PoolConfig, PostgresPool};
