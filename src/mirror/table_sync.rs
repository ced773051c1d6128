// ABOUTME: Per-table fetch-apply loop - drives one table from the mirror's cursor to caught up
// ABOUTME: Also creates missing mirror tables and runs the key-ordered full copy

use anyhow::{bail, Context, Result};

use super::cursor::CursorPosition;
use super::reader::ChangeReader;
use super::store::{MirrorDatabase, ObjectKind, SourceDatabase};
use super::writer::ChangeWriter;
use crate::ddl;
use crate::utils::quote_mysql_ident;

/// A base table as discovered in the primary's catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: String,
    /// Primary key columns in key order; empty when the table has none.
    pub primary_key: Vec<String>,
    /// Whether the primary carries the configured timestamp column.
    pub has_timestamp: bool,
}

/// Limits for one run of the change loop.
#[derive(Debug, Clone)]
pub struct ChangeOptions {
    pub timestamp_column: String,
    pub batch_size: usize,
    /// Stop after this many applied batches; the next run resumes from the mirror.
    pub max_rounds: Option<usize>,
}

/// Outcome of driving one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSyncReport {
    pub rows_applied: u64,
    pub batches: usize,
    /// False when `max_rounds` ended the loop before the primary ran dry.
    pub caught_up: bool,
}

/// Moves one table's rows from the primary into the mirror.
pub struct TableSync<'a, S: SourceDatabase + ?Sized, M: MirrorDatabase + ?Sized> {
    source: &'a S,
    mirror: &'a M,
}

impl<'a, S, M> TableSync<'a, S, M>
where
    S: SourceDatabase + ?Sized,
    M: MirrorDatabase + ?Sized,
{
    pub fn new(source: &'a S, mirror: &'a M) -> Self {
        Self { source, mirror }
    }

    /// Look up a table's primary key and timestamp column on the primary.
    pub async fn describe(&self, table: &str, timestamp_column: &str) -> Result<TableDescriptor> {
        let primary_key = self
            .source
            .primary_key(table)
            .await
            .with_context(|| format!("Failed to get primary key for {}", table))?;
        let has_timestamp = self
            .source
            .has_column(table, timestamp_column)
            .await
            .with_context(|| format!("Failed to check {}.{}", table, timestamp_column))?;

        Ok(TableDescriptor {
            name: table.to_string(),
            primary_key,
            has_timestamp,
        })
    }

    /// Create the table on the mirror from the primary's definition if it is missing.
    ///
    /// An index on `timestamp_column` is added after creation when given; that
    /// step is best effort.
    ///
    /// # Returns
    ///
    /// `true` when the table was created by this call.
    pub async fn ensure_table(&self, table: &str, timestamp_column: Option<&str>) -> Result<bool> {
        if self.mirror.table_exists(table).await? {
            return Ok(false);
        }

        let definition = self
            .source
            .show_create(ObjectKind::Table, table)
            .await
            .with_context(|| format!("Failed to read definition of {}", table))?;
        let statement = ddl::rewrite_create_table(&definition, self.source.database_name());

        self.mirror
            .execute(&statement)
            .await
            .with_context(|| format!("Failed to create table {} on mirror", table))?;
        tracing::info!("Created table {} on mirror", table);

        if let Some(column) = timestamp_column {
            let index = format!(
                "CREATE INDEX {} ON {} ({})",
                quote_mysql_ident(&format!("idx_{}", column)),
                quote_mysql_ident(table),
                quote_mysql_ident(column)
            );
            if let Err(e) = self.mirror.execute(&index).await {
                tracing::debug!("Could not index {}.{}: {}", table, column, e);
            }
        }

        Ok(true)
    }

    /// Apply every change on the primary newer than the mirror's cursor.
    ///
    /// Each round re-derives the cursor from the mirror's highest
    /// `(timestamp, key)` row, reads the next batch strictly after it, and
    /// applies the batch. A batch shorter than `batch_size` means caught up.
    ///
    /// Rows whose timestamp is NULL on the primary never match the change
    /// predicate and are not mirrored by this loop.
    ///
    /// # Errors
    ///
    /// Any read or write failure aborts the loop. Batches already applied stay
    /// applied; the next run resumes from them.
    pub async fn sync_changes(
        &self,
        table: &TableDescriptor,
        options: &ChangeOptions,
    ) -> Result<TableSyncReport> {
        if table.primary_key.is_empty() {
            bail!("Table {} has no primary key", table.name);
        }
        if !table.has_timestamp {
            bail!("Table {} has no {} column", table.name, options.timestamp_column);
        }

        let reader = ChangeReader::new(self.source);
        let writer = ChangeWriter::new(self.mirror);
        let mut report = TableSyncReport::default();
        let mut last_applied: Option<CursorPosition> = None;

        loop {
            if let Some(max) = options.max_rounds {
                if report.batches >= max {
                    tracing::info!(
                        "Stopping {} after {} batches; remaining changes resume next run",
                        table.name,
                        report.batches
                    );
                    break;
                }
            }

            let mut cursor = self
                .mirror
                .max_position(&table.name, &options.timestamp_column, &table.primary_key)
                .await
                .with_context(|| format!("Failed to read cursor for {}", table.name))?
                .unwrap_or_else(|| CursorPosition::beginning(table.primary_key.len()));

            // The mirror's maximum can only fall behind the last applied row
            // if the primary moved a timestamp backwards mid-run.
            if let Some(last) = &last_applied {
                if cursor < *last {
                    tracing::debug!(
                        "Mirror cursor {} for {} is behind last applied {}",
                        cursor.describe(),
                        table.name,
                        last.describe()
                    );
                    cursor = last.clone();
                }
            }

            let batch = reader
                .read_changes(
                    &table.name,
                    &options.timestamp_column,
                    &table.primary_key,
                    &cursor,
                    options.batch_size,
                )
                .await?;

            if batch.is_empty() {
                report.caught_up = true;
                break;
            }

            report.rows_applied += writer.apply_batch(&table.name, &batch).await?;
            report.batches += 1;

            let position = batch
                .last_position(&options.timestamp_column, &table.primary_key)
                .with_context(|| {
                    format!(
                        "Batch from {} is missing {} or key columns",
                        table.name, options.timestamp_column
                    )
                })?;
            tracing::info!(
                "Synced {} rows into {} (cursor {})",
                batch.len(),
                table.name,
                position.describe()
            );
            last_applied = Some(position);

            if batch.len() < options.batch_size {
                report.caught_up = true;
                break;
            }
        }

        Ok(report)
    }

    /// Copy the whole table ordered by primary key, `batch_size` rows per page.
    ///
    /// The key of the last row of each page is held in memory as the seek
    /// position of the next; the first page has no predicate.
    pub async fn copy_table(
        &self,
        table: &TableDescriptor,
        batch_size: usize,
    ) -> Result<TableSyncReport> {
        if table.primary_key.is_empty() {
            bail!("Table {} has no primary key", table.name);
        }

        let reader = ChangeReader::new(self.source);
        let writer = ChangeWriter::new(self.mirror);
        let mut report = TableSyncReport::default();
        let mut after: Option<Vec<mysql_async::Value>> = None;

        loop {
            let page = reader
                .read_page(&table.name, &table.primary_key, after.as_deref(), batch_size)
                .await?;

            if page.is_empty() {
                break;
            }

            report.rows_applied += writer.apply_batch(&table.name, &page).await?;
            report.batches += 1;
            tracing::info!(
                "Copied {} rows into {} ({} total)",
                page.len(),
                table.name,
                report.rows_applied
            );

            if page.len() < batch_size {
                break;
            }
            after = Some(page.last_values(&table.primary_key).with_context(|| {
                format!("Page from {} is missing key columns", table.name)
            })?);
        }

        report.caught_up = true;
        Ok(report)
    }
}
