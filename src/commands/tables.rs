// ABOUTME: Tables command - lists the mirror's base tables
// ABOUTME: Optionally checks one name case-insensitively and reports how it matched

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::EndpointConfig;
use crate::mirror::store::Catalog;
use crate::mysql::{self, MysqlMirror};

/// How a requested table name matched the mirror's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "match", content = "table", rename_all = "snake_case")]
pub enum TableMatch {
    Exact(String),
    /// Present, but only when compared case-insensitively.
    CaseMismatch(String),
    Missing,
}

/// Look `name` up in `tables`, preferring an exact match.
pub fn check_table_name(tables: &[String], name: &str) -> TableMatch {
    let name = name.trim();
    if let Some(table) = tables.iter().find(|t| t.as_str() == name) {
        return TableMatch::Exact(table.clone());
    }
    match tables.iter().find(|t| t.eq_ignore_ascii_case(name)) {
        Some(table) => TableMatch::CaseMismatch(table.clone()),
        None => TableMatch::Missing,
    }
}

#[derive(Serialize)]
struct TablesOutput<'a> {
    tables: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    check: Option<&'a TableMatch>,
}

/// List the mirror's tables.
///
/// # Arguments
///
/// * `mirror` - Mirror endpoint; the primary is not contacted
/// * `check` - Optional table name to look up
/// * `json` - Print JSON instead of a plain list
pub async fn tables(mirror: EndpointConfig, check: Option<String>, json: bool) -> Result<()> {
    let pool = mysql::connect(&mirror, &[])
        .await
        .context("Failed to connect to the mirror database")?;
    let mirror_db = MysqlMirror::new(pool);

    let listed = mirror_db.list_tables().await;
    mirror_db.close().await?;
    let tables = listed?;

    let matched = check.as_deref().map(|name| check_table_name(&tables, name));

    if json {
        let output = TablesOutput {
            tables: &tables,
            check: matched.as_ref(),
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialize table list")?
        );
        return Ok(());
    }

    println!("Mirror tables ({}):", tables.len());
    for table in &tables {
        println!("  {}", table);
    }

    if let (Some(name), Some(matched)) = (check.as_deref(), matched) {
        println!();
        match matched {
            TableMatch::Exact(table) => println!("✓ {} exists", table),
            TableMatch::CaseMismatch(table) => println!(
                "⚠ {} exists as {} (names differ in case)",
                name.trim(),
                table
            ),
            TableMatch::Missing => println!("✗ {} not found", name.trim()),
        }
    }

    Ok(())
}
