// ABOUTME: SQL builders for the MySQL mirror layer
// ABOUTME: Seek reads, upserts, key deletes and cursor lookups with positional parameters

use mysql_async::Value;

use crate::mirror::store::ReadRequest;
use crate::utils::{quote_mysql_ident, quote_mysql_idents};

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Build the seek predicate "strictly after `after`" over `columns`.
///
/// The leading column is compared on its own so an index on it can drive the
/// range scan: `c1 > ? OR (c1 = ? AND rest > ?)`, where `rest` is a single
/// column or a row constructor `(c2, c3) > (?, ?)`.
fn seek_predicate(columns: &[String], after: &[Value]) -> (String, Vec<Value>) {
    let first = quote_mysql_ident(&columns[0]);

    if columns.len() == 1 {
        return (format!("{} > ?", first), vec![after[0].clone()]);
    }

    let rest = &columns[1..];
    let rest_sql = if rest.len() == 1 {
        format!("{} > ?", quote_mysql_ident(&rest[0]))
    } else {
        format!("({}) > ({})", quote_mysql_idents(rest), placeholders(rest.len()))
    };

    let mut params = Vec::with_capacity(after.len() + 1);
    params.push(after[0].clone());
    params.push(after[0].clone());
    params.extend(after[1..].iter().cloned());

    (
        format!("({} > ? OR ({} = ? AND {}))", first, first, rest_sql),
        params,
    )
}

/// `SELECT *` ordered ascending by `request.order_by`, strictly after
/// `request.after` when set, limited to `request.limit` rows.
pub fn build_read_query(table: &str, request: &ReadRequest) -> Statement {
    let order = request
        .order_by
        .iter()
        .map(|c| format!("{} ASC", quote_mysql_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");

    let (predicate, mut params) = match &request.after {
        Some(after) if !request.order_by.is_empty() => {
            let (sql, params) = seek_predicate(&request.order_by, after);
            (format!(" WHERE {}", sql), params)
        }
        _ => (String::new(), Vec::new()),
    };
    params.push(Value::UInt(request.limit as u64));

    Statement {
        sql: format!(
            "SELECT * FROM {}{} ORDER BY {} LIMIT ?",
            quote_mysql_ident(table),
            predicate,
            order
        ),
        params,
    }
}

/// Multi-row `INSERT .. ON DUPLICATE KEY UPDATE` overwriting every column.
pub fn build_upsert_query(table: &str, columns: &[String], rows: &[Vec<Value>]) -> Statement {
    let row_placeholders = format!("({})", placeholders(columns.len()));
    let values = vec![row_placeholders.as_str(); rows.len()].join(", ");

    let updates = columns
        .iter()
        .map(|c| {
            let quoted = quote_mysql_ident(c);
            format!("{} = VALUES({})", quoted, quoted)
        })
        .collect::<Vec<_>>()
        .join(", ");

    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES {} ON DUPLICATE KEY UPDATE {}",
            quote_mysql_ident(table),
            quote_mysql_idents(columns),
            values,
            updates
        ),
        params: rows.iter().flat_map(|row| row.iter().cloned()).collect(),
    }
}

/// `DELETE` by a list of keys; composite keys use a row-constructor `IN`.
pub fn build_delete_query(table: &str, key_columns: &[String], keys: &[Vec<Value>]) -> Statement {
    let sql = if key_columns.len() == 1 {
        format!(
            "DELETE FROM {} WHERE {} IN ({})",
            quote_mysql_ident(table),
            quote_mysql_ident(&key_columns[0]),
            placeholders(keys.len())
        )
    } else {
        let tuple = format!("({})", placeholders(key_columns.len()));
        format!(
            "DELETE FROM {} WHERE ({}) IN ({})",
            quote_mysql_ident(table),
            quote_mysql_idents(key_columns),
            vec![tuple.as_str(); keys.len()].join(", ")
        )
    };

    Statement {
        sql,
        params: keys.iter().flat_map(|key| key.iter().cloned()).collect(),
    }
}

/// Highest `(timestamp, key)` row with a non-NULL timestamp.
pub fn build_max_position_query(
    table: &str,
    timestamp_column: &str,
    key_columns: &[String],
) -> String {
    let mut columns = Vec::with_capacity(key_columns.len() + 1);
    columns.push(timestamp_column.to_string());
    columns.extend(key_columns.iter().cloned());

    let order = columns
        .iter()
        .map(|c| format!("{} DESC", quote_mysql_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "SELECT {} FROM {} WHERE {} IS NOT NULL ORDER BY {} LIMIT 1",
        quote_mysql_idents(&columns),
        quote_mysql_ident(table),
        quote_mysql_ident(timestamp_column),
        order
    )
}

/// Every key of a table.
pub fn build_key_set_query(table: &str, key_columns: &[String]) -> String {
    format!(
        "SELECT {} FROM {}",
        quote_mysql_idents(key_columns),
        quote_mysql_ident(table)
    )
}
