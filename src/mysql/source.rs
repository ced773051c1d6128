// ABOUTME: Read-only MySQL primary - catalog, captured definitions and paged reads
// ABOUTME: Implements the SourceDatabase seam over a mysql_async pool

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Pool, Row};

use super::query::build_read_query;
use super::{catalog, row_columns, row_values, text_column};
use crate::mirror::cursor::{KeySet, RowBatch};
use crate::mirror::store::{Catalog, ObjectKind, ReadRequest, Routine, SourceDatabase};
use crate::utils::quote_mysql_ident;

/// The primary database.
pub struct MysqlSource {
    pool: Pool,
    database: String,
}

impl MysqlSource {
    pub fn new(pool: Pool, database: impl Into<String>) -> Self {
        Self {
            pool,
            database: database.into(),
        }
    }

    /// Disconnect every pooled connection.
    pub async fn close(self) -> Result<()> {
        self.pool
            .disconnect()
            .await
            .context("Failed to close primary connections")
    }
}

/// Column of the `SHOW CREATE` result holding the definition.
fn definition_column(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::Table => "Create Table",
        ObjectKind::View => "Create View",
        ObjectKind::Function => "Create Function",
        ObjectKind::Procedure => "Create Procedure",
    }
}

#[async_trait]
impl Catalog for MysqlSource {
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
impl SourceDatabase for MysqlSource {
    fn database_name(&self) -> &str {
        &self.database
    }

    async fn list_views(&self) -> Result<Vec<String>> {
        catalog::list_by_type(&self.pool, "VIEW").await
    }

    async fn list_routines(&self) -> Result<Vec<Routine>> {
        let mut conn = self.pool.get_conn().await.context("Failed to get connection")?;
        // FUNCTION sorts before PROCEDURE
        let rows: Vec<(String, String)> = conn
            .query(
                "SELECT ROUTINE_NAME, ROUTINE_TYPE FROM information_schema.ROUTINES \
                 WHERE ROUTINE_SCHEMA = DATABASE() \
                 ORDER BY ROUTINE_TYPE, ROUTINE_NAME",
            )
            .await
            .context("Failed to list stored routines")?;

        Ok(rows
            .into_iter()
            .filter_map(|(name, routine_type)| {
                let kind = match routine_type.as_str() {
                    "FUNCTION" => ObjectKind::Function,
                    "PROCEDURE" => ObjectKind::Procedure,
                    other => {
                        tracing::warn!("Ignoring routine {} of unknown type {}", name, other);
                        return None;
                    }
                };
                Some(Routine { name, kind })
            })
            .collect())
    }

    async fn show_create(&self, kind: ObjectKind, name: &str) -> Result<String> {
        let mut conn = self.pool.get_conn().await.context("Failed to get connection")?;
        let sql = format!("SHOW CREATE {} {}", kind.keyword(), quote_mysql_ident(name));
        let row: Option<Row> = conn
            .query_first(sql.as_str())
            .await
            .with_context(|| format!("Failed to read definition of {} {}", kind, name))?;

        let Some(row) = row else {
            bail!("{} {} not found on the primary", kind, name);
        };

        match text_column(&row, definition_column(kind)) {
            Some(definition) => Ok(definition),
            // Routines report NULL when the account lacks privileges on them
            None => bail!(
                "Definition of {} {} is not readable; check the primary account's privileges",
                kind,
                name
            ),
        }
    }

    async fn read_rows(&self, table: &str, request: &ReadRequest) -> Result<RowBatch> {
        let statement = build_read_query(table, request);
        let mut conn = self.pool.get_conn().await.context("Failed to get connection")?;
        let rows: Vec<Row> = conn
            .exec(statement.sql.as_str(), statement.params)
            .await
            .with_context(|| format!("Failed to read rows from {}", table))?;

        let columns = rows.first().map(row_columns).unwrap_or_default();
        Ok(RowBatch::new(columns, rows.iter().map(row_values).collect()))
    }
}
