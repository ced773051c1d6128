// ABOUTME: Writable MySQL mirror - cursor lookups, upserts, key deletes and DDL
// ABOUTME: Implements the MirrorDatabase seam over a mysql_async pool

use anyhow::{Context, Result};
use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Pool, Row, Value};

use super::query::{build_delete_query, build_max_position_query, build_upsert_query};
use super::{catalog, row_values};
use crate::mirror::cursor::{CursorPosition, KeySet};
use crate::mirror::store::{Catalog, MirrorDatabase};
use crate::utils::quote_mysql_ident;

/// The mirror database.
pub struct MysqlMirror {
    pool: Pool,
}

impl MysqlMirror {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Disconnect every pooled connection.
    pub async fn close(self) -> Result<()> {
        self.pool
            .disconnect()
            .await
            .context("Failed to close mirror connections")
    }
}

#[async_trait]
impl Catalog for MysqlMirror {
    async fn list_tables(&self) -> Result<Vec<String>> {
        catalog::list_by_type(&self.pool, "BASE TABLE").await
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        catalog::table_exists(&self.pool, table).await
    }

    async fn primary_key(&self, table: &str) -> Result<Vec<String>> {
        catalog::primary_key(&self.pool, table).await
    }

    async fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        catalog::has_column(&self.pool, table, column).await
    }

    async fn key_set(&self, table: &str, key_columns: &[String]) -> Result<KeySet> {
        catalog::key_set(&self.pool, table, key_columns).await
    }
}

#[async_trait]
impl MirrorDatabase for MysqlMirror {
    async fn max_position(
        &self,
        table: &str,
        timestamp_column: &str,
        key_columns: &[String],
    ) -> Result<Option<CursorPosition>> {
        let sql = build_max_position_query(table, timestamp_column, key_columns);
        let mut conn = self.pool.get_conn().await.context("Failed to get connection")?;
        // Binary protocol, so the cursor comes back as Date/Int values like
        // the rows from `read_rows` rather than as text
        let row: Option<Row> = conn
            .exec_first(sql.as_str(), ())
            .await
            .with_context(|| format!("Failed to read mirror cursor for {}", table))?;

        Ok(row.map(|row| {
            let mut values = row_values(&row).into_iter();
            let timestamp = values.next().unwrap_or(Value::NULL);
            CursorPosition::new(timestamp, values.collect())
        }))
    }

    async fn upsert(&self, table: &str, columns: &[String], rows: &[Vec<Value>]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let statement = build_upsert_query(table, columns, rows);
        let mut conn = self.pool.get_conn().await.context("Failed to get connection")?;
        conn.exec_drop(statement.sql.as_str(), statement.params)
            .await
            .with_context(|| format!("Failed to upsert into {}", table))?;
        Ok(conn.affected_rows())
    }

    async fn delete_keys(
        &self,
        table: &str,
        key_columns: &[String],
        keys: &[Vec<Value>],
    ) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let statement = build_delete_query(table, key_columns, keys);
        let mut conn = self.pool.get_conn().await.context("Failed to get connection")?;
        conn.exec_drop(statement.sql.as_str(), statement.params)
            .await
            .with_context(|| format!("Failed to delete {} keys from {}", keys.len(), table))?;
        Ok(conn.affected_rows())
    }

    async fn execute(&self, statement: &str) -> Result<()> {
        let mut conn = self.pool.get_conn().await.context("Failed to get connection")?;
        conn.query_drop(statement).await?;
        Ok(())
    }

    async fn analyze(&self, table: &str) -> Result<()> {
        let mut conn = self.pool.get_conn().await.context("Failed to get connection")?;
        // ANALYZE returns a status result set, drain it
        let _: Vec<Row> = conn
            .query(format!("ANALYZE TABLE {}", quote_mysql_ident(table)))
            .await
            .with_context(|| format!("Failed to analyze {}", table))?;
        Ok(())
    }
}
