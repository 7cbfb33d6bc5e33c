use std::sync::Arc;

use anyhow::{bail, Context as _};
use tern_core::{mask_database_url, TernConfig};
use tern_migrate::{MigrationConfig, MigrationRunner, PoolConfig, PostgresPool};

/// Connect to the configured database and build a runner over the app's registry
pub async fn connect(config: &TernConfig) -> anyhow::Result<MigrationRunner> {
    let database_url = config.require_database_url()?;
    let registry = tern_schema::registry().context("Invalid migration registry")?;

    tracing::info!(
        "Connecting to {} ({} environment)",
        mask_database_url(database_url),
        config.environment
    );
    let pool = PostgresPool::connect(database_url, &PoolConfig::default())
        .await
        .with_context(|| format!("Failed to connect to {}", mask_database_url(database_url)))?;

    Ok(MigrationRunner::new(registry, Arc::new(pool), migration_config(config)))
}

pub fn migration_config(config: &TernConfig) -> MigrationConfig {
    MigrationConfig {
        migrations_table: config.migrations_table.clone(),
        schema: config.schema.clone(),
    }
}

/// Refuse a destructive command in production unless `--force` was given
pub fn guard_production(config: &TernConfig, force: bool, command: &str) -> anyhow::Result<()> {
    if config.environment.is_production() && !force {
        bail!("Cannot run {} in production environment without --force flag", command);
    }
    if config.environment.is_production() {
        println!("⚠️  WARNING: Running {} in PRODUCTION environment!", command);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> TernConfig {
        let pairs: Vec<(String, String)> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        TernConfig::from_lookup(|key| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())).unwrap()
    }

    #[test]
    fn test_production_requires_force() {
        let production = config(&[("TERN_ENV", "production")]);
        assert!(guard_production(&production, false, "run-down").is_err());
        assert!(guard_production(&production, true, "run-down").is_ok());

        let development = config(&[]);
        assert!(guard_production(&development, false, "run-down").is_ok());
    }

    #[test]
    fn test_migration_config_follows_overrides() {
        let config = config(&[("TERN_MIGRATIONS_TABLE", "schema_history")]).with_schema("clinic");
        let migration = migration_config(&config);

        assert_eq!(migration.migrations_table, "schema_history");
        assert_eq!(migration.schema.as_deref(), Some("clinic"));
    }
}
