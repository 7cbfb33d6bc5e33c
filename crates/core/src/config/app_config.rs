use crate::config::{validate_database_url, validate_identifier, ConfigError, ConfigSource};
use crate::logging::{LogFormat, LoggingConfig};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

/// Default name of the ledger table
pub const DEFAULT_MIGRATIONS_TABLE: &str = "tern_migrations";

/// Configuration trait for environment-driven configuration
pub trait AppConfigTrait: Sized {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self, ConfigError>;

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError>;

    /// Get configuration source information for debugging
    fn config_sources(&self) -> HashMap<String, ConfigSource>;
}

/// Environment enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Testing,
    Production,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testing" | "test" => Ok(Environment::Testing),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::invalid_value(
                "environment",
                s,
                "development, testing, or production",
            )),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env_str = match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Production => "production",
        };
        write!(f, "{}", env_str)
    }
}

impl Environment {
    /// Check if environment is production
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Runtime configuration for the migration tool
#[derive(Debug, Clone)]
pub struct TernConfig {
    pub environment: Environment,
    pub database_url: Option<String>,
    pub migrations_table: String,
    /// Schema used for introspection; `None` means `current_schema()`
    pub schema: Option<String>,
    pub logging: LoggingConfig,
    sources: HashMap<String, ConfigSource>,
}

impl TernConfig {
    /// Build configuration from an arbitrary key lookup.
    ///
    /// `from_env` is this with `std::env::var`; tests pass a map instead so
    /// they never touch process state.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut sources = HashMap::new();

        let environment = match lookup("TERN_ENV") {
            Some(value) => {
                sources.insert("environment".to_string(), ConfigSource::EnvVar("TERN_ENV".to_string()));
                value.parse()?
            }
            None => {
                sources.insert("environment".to_string(), ConfigSource::Default("development".to_string()));
                Environment::Development
            }
        };

        let database_url = lookup("DATABASE_URL");
        if database_url.is_some() {
            sources.insert("database_url".to_string(), ConfigSource::EnvVar("DATABASE_URL".to_string()));
        }

        let migrations_table = match lookup("TERN_MIGRATIONS_TABLE") {
            Some(value) => {
                sources.insert(
                    "migrations_table".to_string(),
                    ConfigSource::EnvVar("TERN_MIGRATIONS_TABLE".to_string()),
                );
                value
            }
            None => {
                sources.insert(
                    "migrations_table".to_string(),
                    ConfigSource::Default(DEFAULT_MIGRATIONS_TABLE.to_string()),
                );
                DEFAULT_MIGRATIONS_TABLE.to_string()
            }
        };

        let schema = lookup("TERN_SCHEMA").filter(|s| !s.is_empty());
        if schema.is_some() {
            sources.insert("schema".to_string(), ConfigSource::EnvVar("TERN_SCHEMA".to_string()));
        }

        let level = lookup("TERN_LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let format = match lookup("TERN_LOG_FORMAT") {
            Some(value) => value.parse::<LogFormat>()?,
            None => LogFormat::Text,
        };
        let logging = LoggingConfig {
            level,
            format,
            env_filter: lookup("RUST_LOG"),
        };

        Ok(Self {
            environment,
            database_url,
            migrations_table,
            schema,
            logging,
            sources,
        })
    }

    /// Override the database URL from a command line flag
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self.sources.insert(
            "database_url".to_string(),
            ConfigSource::CommandLine("--database-url".to_string()),
        );
        self
    }

    /// Override the ledger table name from a command line flag
    pub fn with_migrations_table(mut self, table: impl Into<String>) -> Self {
        self.migrations_table = table.into();
        self.sources.insert(
            "migrations_table".to_string(),
            ConfigSource::CommandLine("--table".to_string()),
        );
        self
    }

    /// Override the introspection schema from a command line flag
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self.sources.insert(
            "schema".to_string(),
            ConfigSource::CommandLine("--schema".to_string()),
        );
        self
    }

    /// The database URL, or an error naming how to provide it
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url.as_deref().ok_or_else(|| {
            ConfigError::missing_required(
                "database_url",
                "Set DATABASE_URL or pass --database-url",
            )
        })
    }
}

impl AppConfigTrait for TernConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.database_url {
            validate_database_url(url)?;
        }

        validate_identifier("migrations_table", &self.migrations_table)?;

        if let Some(schema) = &self.schema {
            validate_identifier("schema", schema)?;
        }

        self.logging.validate()?;

        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        self.sources.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = TernConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.migrations_table, DEFAULT_MIGRATIONS_TABLE);
        assert!(config.database_url.is_none());
        assert!(config.schema.is_none());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.config_sources()["migrations_table"].is_default());
        assert!(config.require_database_url().is_err());
    }

    #[test]
    fn test_config_from_lookup() {
        let config = TernConfig::from_lookup(lookup_from(&[
            ("TERN_ENV", "prod"),
            ("DATABASE_URL", "postgres://app:secret@db/clinic"),
            ("TERN_MIGRATIONS_TABLE", "schema_ledger"),
            ("TERN_SCHEMA", "public"),
            ("TERN_LOG_LEVEL", "debug"),
            ("TERN_LOG_FORMAT", "json"),
        ]))
        .unwrap();

        assert!(config.environment.is_production());
        assert_eq!(config.require_database_url().unwrap(), "postgres://app:secret@db/clinic");
        assert_eq!(config.migrations_table, "schema_ledger");
        assert_eq!(config.schema.as_deref(), Some("public"));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.config_sources()["database_url"].is_env_var());
        config.validate().unwrap();
    }

    #[test]
    fn test_command_line_overrides() {
        let config = TernConfig::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://a/b")]))
            .unwrap()
            .with_database_url("postgres://c/d")
            .with_migrations_table("other_ledger");

        assert_eq!(config.database_url.as_deref(), Some("postgres://c/d"));
        assert_eq!(
            config.config_sources()["database_url"],
            ConfigSource::CommandLine("--database-url".to_string())
        );
        assert_eq!(config.migrations_table, "other_ledger");
    }

    #[test]
    fn test_validate_rejects_bad_table_name() {
        let config = TernConfig::from_lookup(lookup_from(&[(
            "TERN_MIGRATIONS_TABLE",
            "ledger; DROP TABLE users",
        )]))
        .unwrap();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "migrations_table"
        ));
    }

    #[test]
    fn test_invalid_environment() {
        let result = TernConfig::from_lookup(lookup_from(&[("TERN_ENV", "staging")]));
        assert!(result.is_err());
    }
}
