// ABOUTME: Utility functions for quoting, validation and retry logic
// ABOUTME: Shared by the MySQL layer, the mirror engine and the CLI

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::EndpointConfig;

/// Retry an async operation with exponential backoff
///
/// # Arguments
///
/// * `operation` - Async function to retry (FnMut returning Future\<Output = Result\<T\>\>)
/// * `max_retries` - Maximum number of retry attempts (0 = no retries, just initial attempt)
/// * `initial_delay` - Delay before first retry (doubles each subsequent retry)
///
/// # Returns
///
/// Returns the successful result or the last error after all retries exhausted.
///
/// # Examples
///
/// ```no_run
/// # use anyhow::Result;
/// # use std::time::Duration;
/// # use database_mirror::utils::retry_with_backoff;
/// # async fn example() -> Result<()> {
/// let result = retry_with_backoff(
///     || async { Ok("success") },
///     3,  // Try up to 3 times
///     Duration::from_secs(1)  // Start with 1s delay
/// ).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    max_retries: u32,
    initial_delay: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = initial_delay;
    let mut last_error = None;

    for attempt in 0..=max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                last_error = Some(e);

                if attempt < max_retries {
                    tracing::warn!(
                        "Operation failed (attempt {}/{}), retrying in {:?}...",
                        attempt + 1,
                        max_retries + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Operation failed after retries")))
}

/// Sanitize an identifier for display
///
/// # Examples
///
/// ```
/// # use database_mirror::utils::sanitize_identifier;
/// assert_eq!(sanitize_identifier("normal_table"), "normal_table");
/// assert_eq!(sanitize_identifier("table\x00name"), "tablename");
/// assert_eq!(sanitize_identifier("table\nname"), "tablename");
///
/// // Length limit
/// let long_name = "a".repeat(200);
/// assert_eq!(sanitize_identifier(&long_name).len(), 100);
/// ```
pub fn sanitize_identifier(identifier: &str) -> String {
    // Remove any control characters and limit length for display
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Quote a MySQL identifier (database, table, column)
///
/// MySQL uses backticks for identifier quoting. Escapes embedded backticks
/// by doubling them.
///
/// # Examples
///
/// ```
/// use database_mirror::utils::quote_mysql_ident;
/// assert_eq!(quote_mysql_ident("users"), "`users`");
/// assert_eq!(quote_mysql_ident("user`name"), "`user``name`");
/// ```
pub fn quote_mysql_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('`');
    for ch in identifier.chars() {
        if ch == '`' {
            quoted.push('`');
        }
        quoted.push(ch);
    }
    quoted.push('`');
    quoted
}

/// Quote and join a list of MySQL identifiers with `, `.
pub fn quote_mysql_idents(identifiers: &[String]) -> String {
    identifiers
        .iter()
        .map(|i| quote_mysql_ident(i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validate that the primary and the mirror are different databases
///
/// Every mirror write would otherwise land on the primary itself, and a
/// prune would compare a table against itself.
///
/// Endpoints are compared on host (case-insensitive), port and database name.
///
/// # Errors
///
/// Returns an error naming both endpoints when they match.
pub fn validate_source_mirror_different(
    source: &EndpointConfig,
    mirror: &EndpointConfig,
) -> Result<()> {
    if source.host.eq_ignore_ascii_case(&mirror.host)
        && source.port == mirror.port
        && source.database == mirror.database
    {
        bail!(
            "Source and mirror point to the same database!\n\
             \n\
             Source: {}\n\
             Mirror: {}\n\
             \n\
             Check SOURCE_DB_* and DEST_DB_* for a copy-paste error.",
            source.display_url(),
            mirror.display_url()
        );
    }

    Ok(())
}

/// Format a duration as `1h 2m 3s`, `2m 3s` or `3.4s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}
