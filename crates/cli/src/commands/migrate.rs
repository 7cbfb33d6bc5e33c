use anyhow::{anyhow, Context as _};
use tern_migrate::{HaltedUnit, MigrationRunner, MigrationStatusReport};

pub async fn run_up(runner: &MigrationRunner, limit: Option<usize>) -> anyhow::Result<()> {
    let report = runner.run_up(limit).await.context("Failed to start migration run")?;

    for unit in &report.applied {
        println!("✅ Applied {} - {}", unit.version, unit.name);
    }

    if let Some(halted) = report.halted {
        return Err(halted_error(halted, report.applied.len(), "applied"));
    }

    if report.applied.is_empty() {
        println!("Nothing to migrate ({} already applied)", report.already_applied);
    } else {
        println!(
            "Applied {} migration(s) in {}ms",
            report.applied.len(),
            report.execution_time_ms
        );
    }
    Ok(())
}

pub async fn run_down(runner: &MigrationRunner, count: usize) -> anyhow::Result<()> {
    let report = runner.run_down(count).await.context("Failed to start rollback")?;

    for unit in &report.reverted {
        println!("↩️  Reverted {} - {}", unit.version, unit.name);
    }

    if let Some(halted) = report.halted {
        return Err(halted_error(halted, report.reverted.len(), "reverted"));
    }

    if report.reverted.is_empty() {
        println!("Nothing to revert");
    } else {
        println!(
            "Reverted {} migration(s) in {}ms",
            report.reverted.len(),
            report.execution_time_ms
        );
    }
    Ok(())
}

pub async fn status(runner: &MigrationRunner, json: bool) -> anyhow::Result<()> {
    let report = runner.status().await.context("Failed to read migration status")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_status(&report));
    }
    Ok(())
}

pub async fn mark_run(runner: &MigrationRunner, version: i64, name: &str) -> anyhow::Result<()> {
    runner
        .mark_run(version, name)
        .await
        .with_context(|| format!("Failed to mark {} ({}) as applied", version, name))?;

    println!("⚠️  Marked {} - {} as applied without running it", version, name);
    println!("   The ledger no longer proves this change exists in the schema.");
    Ok(())
}

fn halted_error(halted: HaltedUnit, completed: usize, verb: &str) -> anyhow::Error {
    anyhow!(
        "Migration {} ({}) failed after {} {}: {}",
        halted.version,
        halted.name,
        completed,
        verb,
        halted.error
    )
}

fn render_status(report: &MigrationStatusReport) -> String {
    let mut out = String::new();
    out.push_str("Migration Status:\n");
    out.push_str("================\n");

    if report.migrations.is_empty() {
        out.push_str("No migrations registered\n");
    }

    for migration in &report.migrations {
        match migration.applied_at {
            Some(applied_at) => out.push_str(&format!(
                "  ✅ {} {} (applied {})\n",
                migration.version,
                migration.name,
                applied_at.format("%Y-%m-%d %H:%M:%S UTC")
            )),
            None => out.push_str(&format!("  ⏳ {} {}\n", migration.version, migration.name)),
        }
    }

    for orphan in &report.orphaned {
        out.push_str(&format!(
            "  ❓ {} {} (in ledger, not registered)\n",
            orphan.version, orphan.name
        ));
    }

    out.push_str(&format!(
        "\n{} applied, {} pending\n",
        report.applied_count(),
        report.pending_count()
    ));
    out
}
