// ABOUTME: Run commands - connect both databases, run one job and print its summary
// ABOUTME: Connection failures abort the command; unit failures only show up in the summary

use anyhow::{Context, Result};

use crate::config::Config;
use crate::mirror::runner::{RunSummary, Runner, SyncMode, UnitOutcome};
use crate::mysql::{self, MysqlMirror, MysqlSource, RELAXED_SESSION};
use crate::utils::{format_duration, sanitize_identifier, validate_source_mirror_different};

/// Connected primary and mirror for one command.
struct Connections {
    source: MysqlSource,
    mirror: MysqlMirror,
}

impl Connections {
    async fn open(config: &Config) -> Result<Self> {
        validate_source_mirror_different(&config.source, &config.mirror)?;

        tracing::info!("Connecting to primary {}", config.source.display_url());
        let source_pool = mysql::connect(&config.source, &[])
            .await
            .context("Failed to connect to the primary database")?;

        let session: &[&str] = if config.sync.relax_constraints {
            &RELAXED_SESSION
        } else {
            &[]
        };
        tracing::info!("Connecting to mirror {}", config.mirror.display_url());
        let mirror_pool = match mysql::connect(&config.mirror, session).await {
            Ok(pool) => pool,
            Err(e) => {
                let _ = source_pool.disconnect().await;
                return Err(e.context("Failed to connect to the mirror database"));
            }
        };

        Ok(Self {
            source: MysqlSource::new(source_pool, config.source.database.clone()),
            mirror: MysqlMirror::new(mirror_pool),
        })
    }

    async fn close(self) {
        if let Err(e) = self.source.close().await {
            tracing::warn!("{:#}", e);
        }
        if let Err(e) = self.mirror.close().await {
            tracing::warn!("{:#}", e);
        }
    }
}

enum Job {
    Sync(SyncMode),
    Resync,
    Prune,
    Schema,
}

async fn run(config: Config, job: Job, json: bool) -> Result<()> {
    let connections = Connections::open(&config).await?;

    let summary = {
        let runner = Runner::new(&connections.source, &connections.mirror, config.sync.clone());
        match job {
            Job::Sync(mode) => runner.run_sync(mode).await,
            Job::Resync => runner.run_resync().await,
            Job::Prune => runner.run_prune().await,
            Job::Schema => runner.run_schema().await,
        }
    };
    connections.close().await;

    let summary = summary?;
    print_summary(&summary, json)?;

    if !summary.is_success() {
        tracing::warn!(
            "{} unit(s) failed and {} unresolved; they will be retried on the next run",
            summary.failed,
            summary.unresolved
        );
    }
    Ok(())
}

/// Incremental sync of every selected table.
pub async fn sync(config: Config, json: bool) -> Result<()> {
    run(config, Job::Sync(SyncMode::Incremental), json).await
}

/// Create missing mirror tables, catch them up without a round bound, then `ANALYZE`.
pub async fn init(config: Config, json: bool) -> Result<()> {
    run(config, Job::Sync(SyncMode::Init), json).await
}

/// Key-ordered full copy of the selected tables.
pub async fn resync(config: Config, json: bool) -> Result<()> {
    run(config, Job::Resync, json).await
}

/// Delete mirror rows whose keys no longer exist on the primary.
pub async fn prune(config: Config, json: bool) -> Result<()> {
    run(config, Job::Prune, json).await
}

/// Recreate routines and views on the mirror.
pub async fn schema(config: Config, json: bool) -> Result<()> {
    run(config, Job::Schema, json).await
}

fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        let rendered =
            serde_json::to_string_pretty(summary).context("Failed to serialize run summary")?;
        println!("{}", rendered);
        return Ok(());
    }

    println!();
    println!("Mirror {} summary", summary.command);
    println!("{}", "═".repeat(61));
    for unit in &summary.units {
        let (icon, detail) = describe_outcome(&unit.outcome);
        println!("  {} {} {}", icon, sanitize_identifier(&unit.unit), detail);
    }
    println!("{}", "═".repeat(61));
    println!(
        "{} succeeded, {} skipped, {} unresolved, {} failed in {}",
        summary.succeeded,
        summary.skipped,
        summary.unresolved,
        summary.failed,
        format_duration(std::time::Duration::from_millis(summary.duration_ms))
    );
    if summary.rows_synced > 0 || summary.rows_deleted > 0 {
        println!(
            "{} rows synced, {} rows deleted",
            summary.rows_synced, summary.rows_deleted
        );
    }
    if !summary.errors.is_empty() {
        println!();
        println!("Errors:");
        for error in &summary.errors {
            println!("    • {}", error);
        }
    }
    Ok(())
}

fn describe_outcome(outcome: &UnitOutcome) -> (&'static str, String) {
    match outcome {
        UnitOutcome::Synced { rows, caught_up } => (
            "✓",
            format!(
                "{} rows{}",
                rows,
                if *caught_up { "" } else { ", more pending" }
            ),
        ),
        UnitOutcome::Pruned { deleted, orphaned } => {
            ("✓", format!("{} of {} orphans deleted", deleted, orphaned))
        }
        UnitOutcome::Created => ("✓", "created".to_string()),
        UnitOutcome::Skipped { reason } => ("-", format!("skipped: {}", reason)),
        UnitOutcome::Unresolved { reason } => ("⚠", format!("unresolved: {}", reason)),
        UnitOutcome::Failed { error } => ("✗", format!("failed: {}", error)),
    }
}
