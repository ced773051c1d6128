// ABOUTME: Database seams for mirroring - what the engine needs from each side
// ABOUTME: Primary is read-only catalog + paged reads; mirror adds upserts, deletes and DDL

use anyhow::Result;
use async_trait::async_trait;
use mysql_async::Value;
use std::fmt;

use super::cursor::{CursorPosition, KeySet, RowBatch};

/// Kind of a derived schema object captured from the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Table,
    View,
    Function,
    Procedure,
}

impl ObjectKind {
    /// SQL keyword used in `SHOW CREATE` and `DROP ... IF EXISTS`.
    pub fn keyword(&self) -> &'static str {
        match self {
            ObjectKind::Table => "TABLE",
            ObjectKind::View => "VIEW",
            ObjectKind::Function => "FUNCTION",
            ObjectKind::Procedure => "PROCEDURE",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.keyword().to_lowercase())
    }
}

/// A stored routine listed in the primary's catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routine {
    pub name: String,
    pub kind: ObjectKind,
}

/// A paged, ordered read.
///
/// Rows are returned ordered ascending by `order_by`; when `after` is set only
/// rows whose `order_by` tuple is strictly greater than it are returned. With
/// `order_by = [ts, pk]` this is the tie-breaking change query
/// `ts > ? OR (ts = ? AND pk > ?)`.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub order_by: Vec<String>,
    pub after: Option<Vec<Value>>,
    pub limit: usize,
}

/// Catalog checks available on both sides.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Base tables only, views excluded.
    async fn list_tables(&self) -> Result<Vec<String>>;

    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Primary key columns in key order; empty when the table has none.
    async fn primary_key(&self, table: &str) -> Result<Vec<String>>;

    async fn has_column(&self, table: &str, column: &str) -> Result<bool>;

    /// Every primary key value currently in the table.
    async fn key_set(&self, table: &str, key_columns: &[String]) -> Result<KeySet>;
}

/// The primary database. Read-only.
#[async_trait]
pub trait SourceDatabase: Catalog {
    /// Name of the primary's schema, stripped from captured definitions.
    fn database_name(&self) -> &str;

    async fn list_views(&self) -> Result<Vec<String>>;

    /// Functions first, then procedures.
    async fn list_routines(&self) -> Result<Vec<Routine>>;

    /// Raw `SHOW CREATE` text for an object.
    async fn show_create(&self, kind: ObjectKind, name: &str) -> Result<String>;

    async fn read_rows(&self, table: &str, request: &ReadRequest) -> Result<RowBatch>;
}

/// The mirror database. The engine is its sole writer during a run.
#[async_trait]
pub trait MirrorDatabase: Catalog {
    /// The mirror's highest applied `(timestamp, key)`, or `None` when the
    /// table holds no row with a non-NULL timestamp.
    async fn max_position(
        &self,
        table: &str,
        timestamp_column: &str,
        key_columns: &[String],
    ) -> Result<Option<CursorPosition>>;

    /// Insert rows, overwriting every column on primary key conflict.
    /// Executes as one statement.
    async fn upsert(&self, table: &str, columns: &[String], rows: &[Vec<Value>]) -> Result<u64>;

    /// Delete rows by key in one statement.
    async fn delete_keys(
        &self,
        table: &str,
        key_columns: &[String],
        keys: &[Vec<Value>],
    ) -> Result<u64>;

    /// Execute a DDL or session statement verbatim.
    async fn execute(&self, statement: &str) -> Result<()>;

    async fn analyze(&self, table: &str) -> Result<()>;
}
