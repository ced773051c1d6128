// ABOUTME: MySQL implementation of the mirror database seams
// ABOUTME: Pool construction, connection checks and server error classification

mod catalog;
pub mod mirror;
pub mod query;
pub mod source;

pub use mirror::MysqlMirror;
pub use source::MysqlSource;

use anyhow::{bail, Context, Result};
use mysql_async::prelude::Queryable;
use mysql_async::{OptsBuilder, Pool, PoolConstraints, PoolOpts, Row, Value};
use std::time::Duration;

use crate::config::EndpointConfig;
use crate::utils::retry_with_backoff;

/// `ER_NO_SUCH_TABLE`
pub const ER_NO_SUCH_TABLE: u16 = 1146;
/// `ER_VIEW_INVALID`: a view references a missing table, view or function.
pub const ER_VIEW_INVALID: u16 = 1356;
/// `ER_SP_DOES_NOT_EXIST`
pub const ER_SP_DOES_NOT_EXIST: u16 = 1305;

/// Milliseconds before TCP keepalive probes start on an idle connection.
const TCP_KEEPALIVE_MS: u32 = 10_000;

/// Session statements run on every mirror connection when constraints are relaxed.
pub const RELAXED_SESSION: [&str; 2] = ["SET FOREIGN_KEY_CHECKS=0", "SET SESSION innodb_strict_mode=0"];

/// Both sides read and write temporal values in UTC so cursor timestamps
/// compare equal across servers in different zones.
const UTC_SESSION: &str = "SET time_zone = '+00:00'";

/// Build a pool for an endpoint.
///
/// # Arguments
///
/// * `endpoint` - Host, credentials, database and pool ceiling
/// * `session_init` - Statements run on every new connection
pub fn build_pool(endpoint: &EndpointConfig, session_init: &[&str]) -> Result<Pool> {
    if endpoint.max_connections == 0 {
        bail!("Pool for {} needs at least one connection", endpoint.display_url());
    }
    let constraints = PoolConstraints::new(0, endpoint.max_connections).with_context(|| {
        format!(
            "Invalid pool size {} for {}",
            endpoint.max_connections,
            endpoint.display_url()
        )
    })?;

    let mut init = vec![UTC_SESSION.to_string()];
    init.extend(session_init.iter().map(|s| s.to_string()));

    let opts = OptsBuilder::default()
        .ip_or_hostname(endpoint.host.clone())
        .tcp_port(endpoint.port)
        .user(Some(endpoint.user.clone()))
        .pass(endpoint.password.clone())
        .db_name(Some(endpoint.database.clone()))
        .prefer_socket(false)
        .tcp_keepalive(Some(TCP_KEEPALIVE_MS))
        .init(init)
        .pool_opts(PoolOpts::default().with_constraints(constraints));

    Ok(Pool::new(opts))
}

/// Open a pool and prove it works with `SELECT 1`.
///
/// The check is bounded by the endpoint's connect timeout and retried with
/// backoff, since the primary may sit behind a flaky link.
pub async fn connect(endpoint: &EndpointConfig, session_init: &[&str]) -> Result<Pool> {
    let pool = build_pool(endpoint, session_init)?;
    let url = endpoint.display_url();
    let timeout = endpoint.connect_timeout;

    let checked = retry_with_backoff(
        || {
            let pool = pool.clone();
            let url = url.clone();
            async move { ping(&pool, &url, timeout).await }
        },
        2,
        Duration::from_secs(2),
    )
    .await;

    if let Err(e) = checked {
        let _ = pool.disconnect().await;
        return Err(e);
    }

    tracing::info!("Connected to {}", url);
    Ok(pool)
}

async fn ping(pool: &Pool, url: &str, timeout: Duration) -> Result<()> {
    let check = async {
        let mut conn = pool.get_conn().await?;
        conn.query_first::<i64, _>("SELECT 1").await?;
        Ok::<_, mysql_async::Error>(())
    };

    match tokio::time::timeout(timeout, check).await {
        Ok(result) => result.with_context(|| format!("Failed to connect to {}", url)),
        Err(_) => bail!("Timed out after {:?} connecting to {}", timeout, url),
    }
}

/// MySQL server error code anywhere in an error chain.
pub fn server_error_code(error: &anyhow::Error) -> Option<u16> {
    error.chain().find_map(|cause| match cause.downcast_ref::<mysql_async::Error>() {
        Some(mysql_async::Error::Server(server)) => Some(server.code),
        _ => None,
    })
}

/// Whether an error means a referenced table, view or routine does not exist yet.
///
/// Server error codes are checked first; the message fallback covers errors
/// that arrive without one.
pub fn is_missing_dependency(error: &anyhow::Error) -> bool {
    match server_error_code(error) {
        Some(ER_NO_SUCH_TABLE | ER_VIEW_INVALID | ER_SP_DOES_NOT_EXIST) => true,
        Some(_) => false,
        None => format!("{:#}", error).contains("doesn't exist"),
    }
}

/// Values of a row in column order. Missing values read as NULL.
pub(crate) fn row_values(row: &Row) -> Vec<Value> {
    (0..row.len())
        .map(|i| row.as_ref(i).cloned().unwrap_or(Value::NULL))
        .collect()
}

/// Column names of a row in column order.
pub(crate) fn row_columns(row: &Row) -> Vec<String> {
    row.columns_ref()
        .iter()
        .map(|c| c.name_str().into_owned())
        .collect()
}

/// Read a single text column of a `SHOW` result by name.
pub(crate) fn text_column(row: &Row, column: &str) -> Option<String> {
    row.get_opt::<Option<String>, _>(column)
        .and_then(|value| value.ok())
        .flatten()
}
