// ABOUTME: Schema object propagator - recreates routines and views on the mirror
// ABOUTME: Views are retried in rounds until every one is created or no round makes progress

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use tokio::time::Instant;

use super::store::{MirrorDatabase, ObjectKind, SourceDatabase};
use crate::ddl;
use crate::mysql::is_missing_dependency;
use crate::utils::quote_mysql_ident;

/// Default bound on view creation rounds.
pub const DEFAULT_MAX_ROUNDS: usize = 5;

/// Result of one attempt to create an object on the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateAttempt {
    Created,
    /// Something the object references does not exist yet.
    Deferred(String),
    Failed(String),
}

/// Where an object ended up after propagation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ObjectState {
    Pending,
    Created,
    FailedFatal(String),
    /// Still missing a dependency when retries stopped.
    Unresolved(String),
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectState::Pending => write!(f, "pending"),
            ObjectState::Created => write!(f, "created"),
            ObjectState::FailedFatal(reason) => write!(f, "failed: {}", reason),
            ObjectState::Unresolved(reason) => write!(f, "unresolved: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectReport {
    pub name: String,
    pub kind: ObjectKind,
    pub state: ObjectState,
}

/// Outcome of the view pass.
#[derive(Debug, Clone, Default)]
pub struct ViewPassReport {
    pub objects: Vec<ObjectReport>,
    pub rounds: usize,
}

/// Recreates derived objects (functions, procedures, views) on the mirror.
///
/// Dependencies between objects are never parsed. A view that references a
/// not-yet-created view fails with a "doesn't exist" error; that failure is
/// taken as a dependency signal and the view is retried in the next round.
pub struct SchemaPropagator<'a, S: SourceDatabase + ?Sized, M: MirrorDatabase + ?Sized> {
    source: &'a S,
    mirror: &'a M,
    max_rounds: usize,
    deadline: Option<Instant>,
}

impl<'a, S, M> SchemaPropagator<'a, S, M>
where
    S: SourceDatabase + ?Sized,
    M: MirrorDatabase + ?Sized,
{
    pub fn new(source: &'a S, mirror: &'a M, max_rounds: usize) -> Self {
        Self {
            source,
            mirror,
            max_rounds: max_rounds.max(1),
            deadline: None,
        }
    }

    /// Stop working at `deadline`.
    ///
    /// Objects finished before it keep their state; the object in flight
    /// fails with a timeout and pending views are reported unresolved.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    async fn within_deadline<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, work)
                .await
                .map_err(|_| anyhow!("timed out"))?,
            None => work.await,
        }
    }

    async fn attempt_within_deadline(&self, kind: ObjectKind, name: &str) -> CreateAttempt {
        if self.expired() {
            return CreateAttempt::Failed("timed out before it was attempted".to_string());
        }
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.attempt(kind, name))
                .await
                .unwrap_or_else(|_| CreateAttempt::Failed("timed out".to_string())),
            None => self.attempt(kind, name).await,
        }
    }

    /// Capture, clean, drop and recreate one object.
    pub async fn attempt(&self, kind: ObjectKind, name: &str) -> CreateAttempt {
        let definition = match self.source.show_create(kind, name).await {
            Ok(definition) => definition,
            Err(e) => return CreateAttempt::Failed(format!("{:#}", e)),
        };
        let statement = ddl::prepare_object_definition(&definition, self.source.database_name());

        let drop = format!("DROP {} IF EXISTS {}", kind.keyword(), quote_mysql_ident(name));
        if let Err(e) = self.mirror.execute(&drop).await {
            return CreateAttempt::Failed(format!("{:#}", e));
        }

        match self.mirror.execute(&statement).await {
            Ok(()) => CreateAttempt::Created,
            Err(e) if is_missing_dependency(&e) => CreateAttempt::Deferred(format!("{:#}", e)),
            Err(e) => CreateAttempt::Failed(format!("{:#}", e)),
        }
    }

    /// Recreate every function, then every procedure, in one pass.
    pub async fn propagate_routines(&self) -> Result<Vec<ObjectReport>> {
        let routines = self
            .within_deadline(self.source.list_routines())
            .await
            .context("Failed to list routines on primary")?;

        let mut reports = Vec::with_capacity(routines.len());
        for routine in routines {
            let state = match self.attempt_within_deadline(routine.kind, &routine.name).await {
                CreateAttempt::Created => ObjectState::Created,
                CreateAttempt::Deferred(reason) => ObjectState::Unresolved(reason),
                CreateAttempt::Failed(reason) => ObjectState::FailedFatal(reason),
            };
            log_state(routine.kind, &routine.name, &state);
            reports.push(ObjectReport {
                name: routine.name,
                kind: routine.kind,
                state,
            });
        }

        Ok(reports)
    }

    /// Recreate every view, retrying dependency failures until a fixpoint.
    ///
    /// Each round attempts all pending views. A round that leaves the pending
    /// set as large as it found it ends the loop, as does reaching the round
    /// bound; views still pending then are reported unresolved.
    pub async fn propagate_views(&self) -> Result<ViewPassReport> {
        let views = self
            .within_deadline(self.source.list_views())
            .await
            .context("Failed to list views on primary")?;

        let mut report = ViewPassReport::default();
        let mut pending: Vec<(String, String)> = views
            .into_iter()
            .map(|name| (name, String::new()))
            .collect();

        while !pending.is_empty() && report.rounds < self.max_rounds && !self.expired() {
            report.rounds += 1;
            let before = pending.len();
            tracing::info!("View round {}: {} pending", report.rounds, before);

            let mut deferred = Vec::new();
            for (name, _) in pending {
                if self.expired() {
                    deferred.push((name, "timed out before it was attempted".to_string()));
                    continue;
                }
                let state = match self.attempt_within_deadline(ObjectKind::View, &name).await {
                    CreateAttempt::Created => ObjectState::Created,
                    CreateAttempt::Failed(reason) => ObjectState::FailedFatal(reason),
                    CreateAttempt::Deferred(reason) => {
                        tracing::debug!("View {} deferred: {}", name, reason);
                        deferred.push((name, reason));
                        continue;
                    }
                };
                log_state(ObjectKind::View, &name, &state);
                report.objects.push(ObjectReport {
                    name,
                    kind: ObjectKind::View,
                    state,
                });
            }

            pending = deferred;
            if pending.len() == before {
                tracing::warn!(
                    "No progress in view round {}; {} views have circular or missing dependencies",
                    report.rounds,
                    pending.len()
                );
                break;
            }
        }

        for (name, reason) in pending {
            let state = ObjectState::Unresolved(reason);
            log_state(ObjectKind::View, &name, &state);
            report.objects.push(ObjectReport {
                name,
                kind: ObjectKind::View,
                state,
            });
        }

        Ok(report)
    }
}

fn log_state(kind: ObjectKind, name: &str, state: &ObjectState) {
    match state {
        ObjectState::Created => tracing::info!("Created {} {}", kind, name),
        ObjectState::FailedFatal(_) => tracing::error!("Failed to create {} {}: {}", kind, name, state),
        _ => tracing::warn!("{} {} is {}", kind, name, state),
    }
}
