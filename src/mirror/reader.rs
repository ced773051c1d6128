// ABOUTME: ChangeReader for mirroring - pages changed rows out of the primary
// ABOUTME: Tie-breaking (timestamp, key) seek for changes; key-only seek for full copies

use anyhow::{Context, Result};
use mysql_async::Value;

use super::cursor::{CursorPosition, RowBatch};
use super::store::{ReadRequest, SourceDatabase};

/// Reads pages of rows from the primary in a strict total order.
///
/// Change reads order by `(timestamp, key)` and seek strictly past a cursor.
/// Seeking on the timestamp alone would drop rows sharing the boundary
/// timestamp whenever more of them exist than fit in one page.
pub struct ChangeReader<'a, S: SourceDatabase + ?Sized> {
    source: &'a S,
}

impl<'a, S: SourceDatabase + ?Sized> ChangeReader<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Rows positioned strictly after `cursor`, ascending, at most `limit`.
    pub async fn read_changes(
        &self,
        table: &str,
        timestamp_column: &str,
        key_columns: &[String],
        cursor: &CursorPosition,
        limit: usize,
    ) -> Result<RowBatch> {
        let request = change_request(timestamp_column, key_columns, cursor, limit);

        self.source
            .read_rows(table, &request)
            .await
            .with_context(|| {
                format!(
                    "Failed to read changes from {} after {}",
                    table,
                    cursor.describe()
                )
            })
    }

    /// Rows with key strictly greater than `after` (or from the start), ascending.
    pub async fn read_page(
        &self,
        table: &str,
        key_columns: &[String],
        after: Option<&[Value]>,
        limit: usize,
    ) -> Result<RowBatch> {
        let request = ReadRequest {
            order_by: key_columns.to_vec(),
            after: after.map(|key| key.to_vec()),
            limit,
        };

        self.source
            .read_rows(table, &request)
            .await
            .with_context(|| format!("Failed to read page from {}", table))
    }
}

/// Build the tie-breaking change request for a cursor.
pub fn change_request(
    timestamp_column: &str,
    key_columns: &[String],
    cursor: &CursorPosition,
    limit: usize,
) -> ReadRequest {
    let mut order_by = Vec::with_capacity(key_columns.len() + 1);
    order_by.push(timestamp_column.to_string());
    order_by.extend(key_columns.iter().cloned());

    ReadRequest {
        order_by,
        after: Some(cursor.to_seek_values()),
        limit,
    }
}
