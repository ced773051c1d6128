// ABOUTME: Run orchestrator for mirroring - enumerates units and isolates their failures
// ABOUTME: Each table or schema object runs under its own timeout and lands in one RunSummary

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::time::Instant;

use super::reconciler::Reconciler;
use super::schema::{ObjectReport, ObjectState, SchemaPropagator};
use super::store::{MirrorDatabase, SourceDatabase};
use super::table_sync::{ChangeOptions, TableSync};
use crate::config::SyncSettings;
use crate::filters::TableSelection;

/// How `run_sync` treats each table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Apply pending changes, bounded by `max_rounds` when set.
    Incremental,
    /// Run each table until caught up, then `ANALYZE TABLE` it.
    Init,
}

/// Final state of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnitOutcome {
    Synced { rows: u64, caught_up: bool },
    Pruned { deleted: u64, orphaned: usize },
    Created,
    Skipped { reason: String },
    Unresolved { reason: String },
    Failed { error: String },
}

impl UnitOutcome {
    fn failed(error: &anyhow::Error) -> Self {
        UnitOutcome::Failed {
            error: format!("{:#}", error),
        }
    }

    fn skipped(reason: impl Into<String>) -> Self {
        UnitOutcome::Skipped {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitReport {
    pub unit: String,
    #[serde(flatten)]
    pub outcome: UnitOutcome,
    pub duration_ms: u64,
}

/// Totals for one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub succeeded: usize,
    pub skipped: usize,
    pub unresolved: usize,
    pub failed: usize,
    pub rows_synced: u64,
    pub rows_deleted: u64,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    pub units: Vec<UnitReport>,
}

impl RunSummary {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            started_at: Utc::now(),
            succeeded: 0,
            skipped: 0,
            unresolved: 0,
            failed: 0,
            rows_synced: 0,
            rows_deleted: 0,
            errors: Vec::new(),
            duration_ms: 0,
            units: Vec::new(),
        }
    }

    pub fn record(&mut self, report: UnitReport) {
        match &report.outcome {
            UnitOutcome::Synced { rows, .. } => {
                self.succeeded += 1;
                self.rows_synced += rows;
            }
            UnitOutcome::Pruned { deleted, .. } => {
                self.succeeded += 1;
                self.rows_deleted += deleted;
            }
            UnitOutcome::Created => self.succeeded += 1,
            UnitOutcome::Skipped { .. } => self.skipped += 1,
            UnitOutcome::Unresolved { reason } => {
                self.unresolved += 1;
                self.errors.push(format!("{}: unresolved: {}", report.unit, reason));
            }
            UnitOutcome::Failed { error } => {
                self.failed += 1;
                self.errors.push(format!("{}: {}", report.unit, error));
            }
        }
        self.units.push(report);
    }

    /// Check if every unit either succeeded or was skipped on purpose.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.unresolved == 0
    }

    fn finish(mut self, start: Instant) -> Self {
        self.duration_ms = start.elapsed().as_millis() as u64;
        self
    }
}

fn log_unit(report: &UnitReport) {
    match &report.outcome {
        UnitOutcome::Synced { rows, caught_up } => tracing::info!(
            "[{}] synced {} rows{}",
            report.unit,
            rows,
            if *caught_up { "" } else { " (more pending)" }
        ),
        UnitOutcome::Pruned { deleted, orphaned } => tracing::info!(
            "[{}] pruned {} of {} orphaned rows",
            report.unit,
            deleted,
            orphaned
        ),
        UnitOutcome::Created => tracing::info!("[{}] created", report.unit),
        UnitOutcome::Skipped { reason } => {
            tracing::warn!("[{}] skipped: {}", report.unit, reason)
        }
        UnitOutcome::Unresolved { reason } => {
            tracing::warn!("[{}] unresolved: {}", report.unit, reason)
        }
        UnitOutcome::Failed { error } => tracing::error!("[{}] failed: {}", report.unit, error),
    }
}

/// Runs mirror jobs over every selected table or schema object.
///
/// Only failures before the first unit starts (catalog enumeration, a bad
/// resume point) abort a run. Every unit afterwards runs inside its own
/// timeout, and its error is recorded in the summary instead of propagating.
pub struct Runner<'a, S: SourceDatabase + ?Sized, M: MirrorDatabase + ?Sized> {
    source: &'a S,
    mirror: &'a M,
    settings: SyncSettings,
    selection: TableSelection,
}

impl<'a, S, M> Runner<'a, S, M>
where
    S: SourceDatabase + ?Sized,
    M: MirrorDatabase + ?Sized,
{
    pub fn new(source: &'a S, mirror: &'a M, settings: SyncSettings) -> Self {
        let selection = TableSelection::new(settings.tables.clone(), settings.start_from.clone());
        Self {
            source,
            mirror,
            settings,
            selection,
        }
    }

    /// Bring every selected table up to date with the primary.
    pub async fn run_sync(&self, mode: SyncMode) -> Result<RunSummary> {
        let start = Instant::now();
        let command = match mode {
            SyncMode::Incremental => "sync",
            SyncMode::Init => "init",
        };
        let mut summary = RunSummary::new(command);
        let tables = self.selected_tables(&mut summary).await?;

        for report in self
            .run_units(tables, |table| self.sync_unit(table, mode))
            .await
        {
            summary.record(report);
        }

        Ok(summary.finish(start))
    }

    /// Copy every selected table in full, ordered by primary key.
    pub async fn run_resync(&self) -> Result<RunSummary> {
        let start = Instant::now();
        let mut summary = RunSummary::new("resync");
        let tables = self.selected_tables(&mut summary).await?;

        for report in self.run_units(tables, |table| self.copy_unit(table)).await {
            summary.record(report);
        }

        Ok(summary.finish(start))
    }

    /// Delete mirror rows whose keys no longer exist on the primary.
    pub async fn run_prune(&self) -> Result<RunSummary> {
        let start = Instant::now();
        let mut summary = RunSummary::new("prune");
        let tables = self.selected_tables(&mut summary).await?;

        for report in self.run_units(tables, |table| self.prune_unit(table)).await {
            summary.record(report);
        }

        Ok(summary.finish(start))
    }

    /// Recreate functions, procedures and views on the mirror.
    ///
    /// Each pass (routines, views) runs against its own unit-timeout
    /// deadline. Objects finished before the deadline keep their outcome. A
    /// pass whose listing fails is recorded as one failed unit and the other
    /// pass still runs.
    pub async fn run_schema(&self) -> Result<RunSummary> {
        let start = Instant::now();
        let mut summary = RunSummary::new("schema");

        let pass_start = Instant::now();
        match self.propagator().propagate_routines().await {
            Ok(reports) => {
                for report in reports {
                    summary.record(object_unit(report, pass_start));
                }
            }
            Err(e) => summary.record(pass_failed("routines", &e, pass_start)),
        }

        let pass_start = Instant::now();
        match self.propagator().propagate_views().await {
            Ok(pass) => {
                tracing::info!("View propagation finished after {} rounds", pass.rounds);
                for report in pass.objects {
                    summary.record(object_unit(report, pass_start));
                }
            }
            Err(e) => summary.record(pass_failed("views", &e, pass_start)),
        }

        Ok(summary.finish(start))
    }

    fn propagator(&self) -> SchemaPropagator<'a, S, M> {
        let deadline = tokio::time::Instant::now() + self.settings.unit_timeout;
        SchemaPropagator::new(self.source, self.mirror, self.settings.schema_rounds)
            .with_deadline(deadline)
    }

    /// Base tables on the primary after applying the selection.
    async fn selected_tables(&self, summary: &mut RunSummary) -> Result<Vec<String>> {
        let catalog = self
            .source
            .list_tables()
            .await
            .context("Failed to list tables on primary")?;
        let selected = self.selection.apply(&catalog)?;

        for name in &selected.unmatched {
            tracing::warn!("Table '{}' from the allow-list is not on the primary", name);
        }
        for table in selected.skipped {
            summary.record(UnitReport {
                unit: table,
                outcome: UnitOutcome::skipped("before resume point"),
                duration_ms: 0,
            });
        }

        tracing::info!(
            "{}: {} of {} tables selected",
            summary.command,
            selected.selected.len(),
            catalog.len()
        );
        Ok(selected.selected)
    }

    /// Run `work` for every unit with the unit timeout, `concurrency` at a time.
    ///
    /// Reports come back in unit order.
    async fn run_units<F, Fut>(&self, units: Vec<String>, work: F) -> Vec<UnitReport>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<UnitOutcome>>,
    {
        let timeout = self.settings.unit_timeout;

        stream::iter(units)
            .map(|unit| {
                let job = work(unit.clone());
                async move {
                    let started = Instant::now();
                    let outcome = match tokio::time::timeout(timeout, job).await {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(e)) => {
                            tracing::debug!("[{}] error chain: {:?}", unit, e);
                            UnitOutcome::failed(&e)
                        }
                        Err(_) => UnitOutcome::Failed {
                            error: format!("timed out after {:?}", timeout),
                        },
                    };
                    let report = UnitReport {
                        unit,
                        outcome,
                        duration_ms: started.elapsed().as_millis() as u64,
                    };
                    log_unit(&report);
                    report
                }
            })
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await
    }

    async fn sync_unit(&self, table: String, mode: SyncMode) -> Result<UnitOutcome> {
        let ts = &self.settings.timestamp_column;
        let sync = TableSync::new(self.source, self.mirror);

        let desc = sync.describe(&table, ts).await?;
        sync.ensure_table(&table, desc.has_timestamp.then_some(ts.as_str()))
            .await?;

        if desc.primary_key.is_empty() {
            return Ok(UnitOutcome::skipped("no primary key"));
        }
        if !desc.has_timestamp {
            return Ok(UnitOutcome::skipped(format!("no {} column on primary", ts)));
        }
        if !self.mirror.has_column(&table, ts).await? {
            return Ok(UnitOutcome::skipped(format!("no {} column on mirror", ts)));
        }

        let options = ChangeOptions {
            timestamp_column: ts.clone(),
            batch_size: self.settings.batch_size,
            max_rounds: match mode {
                SyncMode::Incremental => self.settings.max_rounds,
                SyncMode::Init => None,
            },
        };
        let report = sync.sync_changes(&desc, &options).await?;

        if mode == SyncMode::Init {
            if let Err(e) = self.mirror.analyze(&table).await {
                tracing::warn!("ANALYZE TABLE {} failed: {:#}", table, e);
            }
        }

        Ok(UnitOutcome::Synced {
            rows: report.rows_applied,
            caught_up: report.caught_up,
        })
    }

    async fn copy_unit(&self, table: String) -> Result<UnitOutcome> {
        let ts = &self.settings.timestamp_column;
        let sync = TableSync::new(self.source, self.mirror);

        let desc = sync.describe(&table, ts).await?;
        if desc.primary_key.is_empty() {
            return Ok(UnitOutcome::skipped("no primary key"));
        }
        sync.ensure_table(&table, desc.has_timestamp.then_some(ts.as_str()))
            .await?;

        let report = sync
            .copy_table(&desc, self.settings.seed_batch_size)
            .await?;

        Ok(UnitOutcome::Synced {
            rows: report.rows_applied,
            caught_up: report.caught_up,
        })
    }

    async fn prune_unit(&self, table: String) -> Result<UnitOutcome> {
        if !self.mirror.table_exists(&table).await? {
            return Ok(UnitOutcome::skipped("table does not exist on mirror"));
        }

        let primary_key = self.source.primary_key(&table).await?;
        if primary_key.is_empty() {
            return Ok(UnitOutcome::skipped("no primary key"));
        }

        let result = Reconciler::new(self.source, self.mirror, self.settings.delete_chunk_size)
            .with_dry_run(self.settings.dry_run)
            .reconcile_table(&table, &primary_key)
            .await?;

        if result.source_keys == 0 {
            return Ok(UnitOutcome::skipped(
                result
                    .skipped
                    .unwrap_or_else(|| "primary returned no keys".to_string()),
            ));
        }

        Ok(UnitOutcome::Pruned {
            deleted: result.deleted,
            orphaned: result.orphaned,
        })
    }
}

fn pass_failed(unit: &str, error: &anyhow::Error, started: Instant) -> UnitReport {
    let report = UnitReport {
        unit: unit.to_string(),
        outcome: UnitOutcome::failed(error),
        duration_ms: started.elapsed().as_millis() as u64,
    };
    log_unit(&report);
    report
}

fn object_unit(report: ObjectReport, pass_start: Instant) -> UnitReport {
    let outcome = match report.state {
        ObjectState::Created => UnitOutcome::Created,
        ObjectState::FailedFatal(error) => UnitOutcome::Failed { error },
        ObjectState::Unresolved(reason) => UnitOutcome::Unresolved { reason },
        ObjectState::Pending => UnitOutcome::Unresolved {
            reason: "never attempted".to_string(),
        },
    };
    UnitReport {
        unit: format!("{} {}", report.kind, report.name),
        outcome,
        duration_ms: pass_start.elapsed().as_millis() as u64,
    }
}
