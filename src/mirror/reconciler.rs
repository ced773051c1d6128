// ABOUTME: Reconciler for mirroring - deletes mirror rows that no longer exist on the primary
// ABOUTME: Compares full primary key sets; refuses to prune against an empty primary

use anyhow::{Context, Result};

use super::store::{MirrorDatabase, SourceDatabase};
use super::writer::ChangeWriter;

/// Result of reconciling one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    pub source_keys: usize,
    pub mirror_keys: usize,
    /// Keys on the mirror with no counterpart on the primary.
    pub orphaned: usize,
    pub deleted: u64,
    /// Set when nothing was deleted on purpose.
    pub skipped: Option<String>,
}

/// Reconciler detects rows that exist on the mirror but not on the primary.
///
/// Timestamp-driven sync only sees rows that still exist, so deletions on the
/// primary are invisible to it. The Reconciler compares the complete key sets
/// of both sides and removes the difference from the mirror.
pub struct Reconciler<'a, S: SourceDatabase + ?Sized, M: MirrorDatabase + ?Sized> {
    source: &'a S,
    mirror: &'a M,
    delete_chunk_size: usize,
    dry_run: bool,
}

impl<'a, S, M> Reconciler<'a, S, M>
where
    S: SourceDatabase + ?Sized,
    M: MirrorDatabase + ?Sized,
{
    pub fn new(source: &'a S, mirror: &'a M, delete_chunk_size: usize) -> Self {
        Self {
            source,
            mirror,
            delete_chunk_size,
            dry_run: false,
        }
    }

    /// Report orphans without deleting them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Delete the mirror's orphaned rows for one table.
    ///
    /// # Arguments
    ///
    /// * `table` - Table name, identical on both sides
    /// * `primary_key_columns` - Primary key columns in key order
    ///
    /// # Returns
    ///
    /// Key counts of both sides and the number of rows deleted. An empty key
    /// set on the primary deletes nothing and is reported as skipped: a
    /// failed or truncated read must never wipe the mirror.
    pub async fn reconcile_table(
        &self,
        table: &str,
        primary_key_columns: &[String],
    ) -> Result<ReconcileResult> {
        let source_keys = self
            .source
            .key_set(table, primary_key_columns)
            .await
            .context("Failed to get source primary keys")?;

        let mut result = ReconcileResult {
            source_keys: source_keys.len(),
            ..Default::default()
        };

        if source_keys.is_empty() {
            tracing::warn!(
                "Primary returned no keys for {}; skipping prune",
                table
            );
            result.skipped = Some("primary returned no keys".to_string());
            return Ok(result);
        }

        let mirror_keys = self
            .mirror
            .key_set(table, primary_key_columns)
            .await
            .context("Failed to get mirror primary keys")?;
        result.mirror_keys = mirror_keys.len();

        let orphaned = mirror_keys.orphans(&source_keys);
        result.orphaned = orphaned.len();

        tracing::info!(
            "{}: primary {} keys, mirror {} keys, {} orphaned",
            table,
            result.source_keys,
            result.mirror_keys,
            result.orphaned
        );

        if orphaned.is_empty() {
            return Ok(result);
        }

        if self.dry_run {
            result.skipped = Some(format!("dry run, {} rows not deleted", orphaned.len()));
            return Ok(result);
        }

        let writer = ChangeWriter::new(self.mirror);
        result.deleted = writer
            .delete_rows(table, primary_key_columns, &orphaned, self.delete_chunk_size)
            .await?;

        tracing::info!("Deleted {} orphaned rows from {}", result.deleted, table);

        Ok(result)
    }
}
