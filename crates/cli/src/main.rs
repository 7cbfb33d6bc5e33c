mod commands;
mod context;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tern_core::{init_logging, AppConfigTrait, TernConfig};

use commands::migrate;

#[derive(Parser, Debug)]
#[command(name = "tern")]
#[command(about = "Apply, revert and inspect database schema migrations")]
struct Cli {
    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Ledger table name (overrides TERN_MIGRATIONS_TABLE)
    #[arg(long, global = true)]
    table: Option<String>,

    /// Schema used for introspection (overrides TERN_SCHEMA)
    #[arg(long, global = true)]
    schema: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations in version order
    RunUp {
        /// Apply at most this many migrations
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Revert the most recently applied migrations
    RunDown {
        /// Number of migrations to revert
        #[arg(long)]
        count: usize,

        /// Required in production
        #[arg(long)]
        force: bool,
    },

    /// List applied and pending migrations
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record a migration as applied without running it
    MarkRun {
        /// Migration version
        version: i64,

        /// Migration name, must match the registered one
        name: String,

        /// Required in production
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    fn config(&self) -> anyhow::Result<TernConfig> {
        let mut config = TernConfig::from_env().context("Failed to read configuration")?;
        if let Some(url) = &self.database_url {
            config = config.with_database_url(url);
        }
        if let Some(table) = &self.table {
            config = config.with_migrations_table(table);
        }
        if let Some(schema) = &self.schema {
            config = config.with_schema(schema);
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config()?;
    init_logging(&config.logging).map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let runner = context::connect(&config).await?;

    let result = match cli.command {
        Commands::RunUp { limit } => migrate::run_up(&runner, limit).await,
        Commands::RunDown { count, force } => {
            context::guard_production(&config, force, "run-down")?;
            migrate::run_down(&runner, count).await
        }
        Commands::Status { json } => migrate::status(&runner, json).await,
        Commands::MarkRun { version, name, force } => {
            context::guard_production(&config, force, "mark-run")?;
            migrate::mark_run(&runner, version, &name).await
        }
    };

    runner.close().await;
    result
}
