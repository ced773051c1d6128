// ABOUTME: ChangeWriter for mirroring - applies change batches to the mirror
// ABOUTME: Idempotent upserts split only at the placeholder limit; chunked key deletes

use anyhow::{Context, Result};
use mysql_async::Value;

use super::cursor::RowBatch;
use super::store::MirrorDatabase;

/// MySQL allows at most 65535 placeholders in one prepared statement.
pub const MAX_PLACEHOLDERS: usize = 65_535;

/// Default number of keys per `DELETE ... IN (...)` statement.
pub const DEFAULT_DELETE_CHUNK: usize = 1000;

/// Writes change batches to the mirror.
///
/// A batch is applied as one `INSERT ... ON DUPLICATE KEY UPDATE` statement
/// that overwrites every column on conflict, so re-applying a batch leaves the
/// mirror unchanged. Batches too wide for one prepared statement are split
/// into the fewest statements that fit.
pub struct ChangeWriter<'a, M: MirrorDatabase + ?Sized> {
    mirror: &'a M,
}

impl<'a, M: MirrorDatabase + ?Sized> ChangeWriter<'a, M> {
    pub fn new(mirror: &'a M) -> Self {
        Self { mirror }
    }

    /// Apply a batch of rows with upsert semantics.
    ///
    /// # Returns
    ///
    /// The number of rows applied (not the server's affected-row count, which
    /// counts updated rows twice).
    pub async fn apply_batch(&self, table: &str, batch: &RowBatch) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let rows_per_statement = rows_per_statement(batch.columns.len());
        let mut applied = 0u64;

        for chunk in batch.rows.chunks(rows_per_statement) {
            self.mirror
                .upsert(table, &batch.columns, chunk)
                .await
                .with_context(|| format!("Failed to upsert {} rows into {}", chunk.len(), table))?;
            applied += chunk.len() as u64;
        }

        Ok(applied)
    }

    /// Delete rows by primary key, `chunk_size` keys per statement.
    ///
    /// Chunking bounds statement size and how long each delete holds locks.
    pub async fn delete_rows(
        &self,
        table: &str,
        key_columns: &[String],
        keys: &[Vec<Value>],
        chunk_size: usize,
    ) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        // A composite key binds one placeholder per key column
        let chunk_size = chunk_size
            .max(1)
            .min(rows_per_statement(key_columns.len()));
        let mut total_deleted = 0u64;

        for chunk in keys.chunks(chunk_size) {
            let deleted = self
                .mirror
                .delete_keys(table, key_columns, chunk)
                .await
                .with_context(|| format!("Failed to delete {} keys from {}", chunk.len(), table))?;
            total_deleted += deleted;
        }

        Ok(total_deleted)
    }
}

/// Rows that fit in one statement for a given column count.
fn rows_per_statement(columns: usize) -> usize {
    std::cmp::max(1, MAX_PLACEHOLDERS / columns.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::memory::MemoryDatabase;

    fn batch(ids: &[i64], name: &str) -> RowBatch {
        RowBatch::new(
            vec!["id".to_string(), "name".to_string()],
            ids.iter()
                .map(|id| vec![Value::Int(*id), Value::from(name)])
                .collect(),
        )
    }

    #[test]
    fn test_rows_per_statement() {
        assert_eq!(rows_per_statement(1), 65_535);
        assert_eq!(rows_per_statement(20), 3_276);
        assert_eq!(rows_per_statement(100_000), 1);
        assert_eq!(rows_per_statement(0), 65_535);
    }

    #[tokio::test]
    async fn test_apply_batch_is_idempotent() {
        let mirror = MemoryDatabase::new("mirror");
        mirror.create_table("users", &["id", "name"], &["id"]);
        let writer = ChangeWriter::new(&mirror);

        let b = batch(&[1, 2, 3], "x");
        assert_eq!(writer.apply_batch("users", &b).await.unwrap(), 3);
        let once = mirror.snapshot("users");

        writer.apply_batch("users", &b).await.unwrap();
        assert_eq!(mirror.snapshot("users"), once);
        assert_eq!(mirror.upsert_statements(), 2);
    }

    #[tokio::test]
    async fn test_apply_batch_overwrites_non_key_columns() {
        let mirror = MemoryDatabase::new("mirror");
        mirror.create_table("users", &["id", "name"], &["id"]);
        let writer = ChangeWriter::new(&mirror);

        writer.apply_batch("users", &batch(&[1], "old")).await.unwrap();
        writer.apply_batch("users", &batch(&[1], "new")).await.unwrap();

        let rows = mirror.snapshot("users");
        assert_eq!(rows, vec![vec![Value::Int(1), Value::from("new")]]);
    }

    #[tokio::test]
    async fn test_apply_empty_batch_is_noop() {
        let mirror = MemoryDatabase::new("mirror");
        mirror.create_table("users", &["id", "name"], &["id"]);
        let writer = ChangeWriter::new(&mirror);

        assert_eq!(writer.apply_batch("users", &RowBatch::default()).await.unwrap(), 0);
        assert_eq!(mirror.upsert_statements(), 0);
    }

    #[tokio::test]
    async fn test_delete_rows_in_chunks() {
        let mirror = MemoryDatabase::new("mirror");
        mirror.create_table("users", &["id", "name"], &["id"]);
        let writer = ChangeWriter::new(&mirror);
        writer
            .apply_batch("users", &batch(&[1, 2, 3, 4, 5], "x"))
            .await
            .unwrap();

        let keys: Vec<Vec<Value>> = (1..=5).map(|id| vec![Value::Int(id)]).collect();
        let deleted = writer
            .delete_rows("users", &["id".to_string()], &keys[..4], 3)
            .await
            .unwrap();

        assert_eq!(deleted, 4);
        assert_eq!(mirror.delete_statements(), vec![3, 1]);
        assert_eq!(mirror.snapshot("users").len(), 1);
    }
}
