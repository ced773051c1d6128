// ABOUTME: information_schema lookups shared by the primary and the mirror
// ABOUTME: Every query is scoped to the connection's current database

use anyhow::{Context, Result};
use mysql_async::prelude::Queryable;
use mysql_async::{Pool, Row};

use super::query::build_key_set_query;
use super::row_values;
use crate::mirror::cursor::KeySet;

/// Names from `information_schema.TABLES` of one table type.
pub(crate) async fn list_by_type(pool: &Pool, table_type: &str) -> Result<Vec<String>> {
    let mut conn = pool.get_conn().await.context("Failed to get connection")?;
    let names: Vec<String> = conn
        .exec(
            "SELECT TABLE_NAME FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = ? \
             ORDER BY TABLE_NAME",
            (table_type,),
        )
        .await
        .with_context(|| format!("Failed to list objects of type {}", table_type))?;
    Ok(names)
}

pub(crate) async fn table_exists(pool: &Pool, table: &str) -> Result<bool> {
    let mut conn = pool.get_conn().await.context("Failed to get connection")?;
    let count: Option<i64> = conn
        .exec_first(
            "SELECT COUNT(*) FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?",
            (table,),
        )
        .await
        .with_context(|| format!("Failed to check whether table {} exists", table))?;
    Ok(count.unwrap_or(0) > 0)
}

pub(crate) async fn primary_key(pool: &Pool, table: &str) -> Result<Vec<String>> {
    let mut conn = pool.get_conn().await.context("Failed to get connection")?;
    let columns: Vec<String> = conn
        .exec(
            "SELECT COLUMN_NAME FROM information_schema.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
             AND CONSTRAINT_NAME = 'PRIMARY' \
             ORDER BY ORDINAL_POSITION",
            (table,),
        )
        .await
        .with_context(|| format!("Failed to read primary key of {}", table))?;
    Ok(columns)
}

pub(crate) async fn has_column(pool: &Pool, table: &str, column: &str) -> Result<bool> {
    let mut conn = pool.get_conn().await.context("Failed to get connection")?;
    let count: Option<i64> = conn
        .exec_first(
            "SELECT COUNT(*) FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND COLUMN_NAME = ?",
            (table, column),
        )
        .await
        .with_context(|| format!("Failed to check column {}.{}", table, column))?;
    Ok(count.unwrap_or(0) > 0)
}

pub(crate) async fn key_set(pool: &Pool, table: &str, key_columns: &[String]) -> Result<KeySet> {
    let mut conn = pool.get_conn().await.context("Failed to get connection")?;
    let rows: Vec<Row> = conn
        .exec(build_key_set_query(table, key_columns), ())
        .await
        .with_context(|| format!("Failed to read keys of {}", table))?;
    Ok(KeySet::from_keys(rows.iter().map(row_values)))
}
