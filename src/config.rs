// ABOUTME: Configuration for mirror runs - endpoints and sync settings
// ABOUTME: Merges CLI flags and environment over an optional TOML file over defaults

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_BATCH_SIZE: usize = 3000;
pub const DEFAULT_SEED_BATCH_SIZE: usize = 5000;
pub const DEFAULT_DELETE_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_TIMESTAMP_COLUMN: &str = "updated_at";
pub const DEFAULT_UNIT_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 60;
/// The primary is connection-constrained; one session is enough for sequential reads.
pub const DEFAULT_SOURCE_MAX_CONNECTIONS: usize = 1;
pub const DEFAULT_MIRROR_MAX_CONNECTIONS: usize = 2;

/// Which database an endpoint is. Used for messages and pool defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Mirror,
}

impl Side {
    fn label(&self) -> &'static str {
        match self {
            Side::Source => "source",
            Side::Mirror => "mirror",
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            Side::Source => "SOURCE_DB",
            Side::Mirror => "DEST_DB",
        }
    }

    fn default_max_connections(&self) -> usize {
        match self {
            Side::Source => DEFAULT_SOURCE_MAX_CONNECTIONS,
            Side::Mirror => DEFAULT_MIRROR_MAX_CONNECTIONS,
        }
    }
}

/// A resolved connection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    pub max_connections: usize,
    pub connect_timeout: Duration,
}

impl EndpointConfig {
    /// `mysql://user@host:port/db`, never including the password.
    pub fn display_url(&self) -> String {
        format!(
            "mysql://{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

/// Partially specified endpoint, from the config file or the command line.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub max_connections: Option<usize>,
    pub connect_timeout_secs: Option<u64>,
}

impl EndpointOverrides {
    /// Fill unset fields from `fallback`.
    pub fn or(self, fallback: EndpointOverrides) -> EndpointOverrides {
        EndpointOverrides {
            host: self.host.or(fallback.host),
            port: self.port.or(fallback.port),
            user: self.user.or(fallback.user),
            password: self.password.or(fallback.password),
            database: self.database.or(fallback.database),
            max_connections: self.max_connections.or(fallback.max_connections),
            connect_timeout_secs: self.connect_timeout_secs.or(fallback.connect_timeout_secs),
        }
    }

    /// Resolve into a complete endpoint, applying defaults.
    ///
    /// # Errors
    ///
    /// Returns an error naming the missing setting and its environment
    /// variable when host, user or database is unset.
    pub fn resolve(self, side: Side) -> Result<EndpointConfig> {
        let require = |value: Option<String>, field: &str, var: &str, flag: &str| -> Result<String> {
            match value.filter(|v| !v.trim().is_empty()) {
                Some(v) => Ok(v),
                None => bail!(
                    "{} {} is not set (set {}_{} or pass --{}-{})",
                    side.label(),
                    field,
                    side.env_prefix(),
                    var,
                    side.label(),
                    flag
                ),
            }
        };

        let max_connections = self
            .max_connections
            .unwrap_or_else(|| side.default_max_connections());
        if max_connections == 0 {
            bail!("{} max_connections must be at least 1", side.label());
        }

        Ok(EndpointConfig {
            host: require(self.host, "host", "HOST", "host")?,
            port: self.port.unwrap_or(DEFAULT_PORT),
            user: require(self.user, "user", "USER", "user")?,
            password: self.password.filter(|p| !p.is_empty()),
            database: require(self.database, "database name", "NAME", "db")?,
            max_connections,
            connect_timeout: Duration::from_secs(
                self.connect_timeout_secs
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            ),
        })
    }
}

/// Settings that shape a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Rows per change batch.
    pub batch_size: usize,
    /// Rows per page of the key-ordered full copy.
    pub seed_batch_size: usize,
    /// Keys per delete statement when pruning.
    pub delete_chunk_size: usize,
    pub timestamp_column: String,
    /// Tables to process; empty means every base table.
    pub tables: Vec<String>,
    /// Skip tables before this one in catalog order.
    pub start_from: Option<String>,
    /// Change batches per table per run; `None` runs until caught up.
    pub max_rounds: Option<usize>,
    /// Bound on view creation rounds.
    pub schema_rounds: usize,
    pub unit_timeout: Duration,
    /// Tables processed at once.
    pub concurrency: usize,
    /// Run mirror sessions with `FOREIGN_KEY_CHECKS=0` and `innodb_strict_mode=0`.
    pub relax_constraints: bool,
    pub dry_run: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            seed_batch_size: DEFAULT_SEED_BATCH_SIZE,
            delete_chunk_size: DEFAULT_DELETE_CHUNK_SIZE,
            timestamp_column: DEFAULT_TIMESTAMP_COLUMN.to_string(),
            tables: Vec::new(),
            start_from: None,
            max_rounds: None,
            schema_rounds: crate::mirror::schema::DEFAULT_MAX_ROUNDS,
            unit_timeout: Duration::from_secs(DEFAULT_UNIT_TIMEOUT_SECS),
            concurrency: 1,
            relax_constraints: true,
            dry_run: false,
        }
    }
}

/// Partially specified settings, from the `[sync]` table or the command line.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncOverrides {
    pub batch_size: Option<usize>,
    pub seed_batch_size: Option<usize>,
    pub delete_chunk_size: Option<usize>,
    pub timestamp_column: Option<String>,
    pub tables: Option<Vec<String>>,
    pub start_from: Option<String>,
    pub max_rounds: Option<usize>,
    pub schema_rounds: Option<usize>,
    pub unit_timeout_secs: Option<u64>,
    pub concurrency: Option<usize>,
    pub relax_constraints: Option<bool>,
    pub dry_run: Option<bool>,
}

impl SyncOverrides {
    /// Fill unset fields from `fallback`.
    pub fn or(self, fallback: SyncOverrides) -> SyncOverrides {
        SyncOverrides {
            batch_size: self.batch_size.or(fallback.batch_size),
            seed_batch_size: self.seed_batch_size.or(fallback.seed_batch_size),
            delete_chunk_size: self.delete_chunk_size.or(fallback.delete_chunk_size),
            timestamp_column: self.timestamp_column.or(fallback.timestamp_column),
            tables: self.tables.or(fallback.tables),
            start_from: self.start_from.or(fallback.start_from),
            max_rounds: self.max_rounds.or(fallback.max_rounds),
            schema_rounds: self.schema_rounds.or(fallback.schema_rounds),
            unit_timeout_secs: self.unit_timeout_secs.or(fallback.unit_timeout_secs),
            concurrency: self.concurrency.or(fallback.concurrency),
            relax_constraints: self.relax_constraints.or(fallback.relax_constraints),
            dry_run: self.dry_run.or(fallback.dry_run),
        }
    }

    /// Resolve over the defaults and validate.
    pub fn resolve(self) -> Result<SyncSettings> {
        let defaults = SyncSettings::default();
        let settings = SyncSettings {
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            seed_batch_size: self.seed_batch_size.unwrap_or(defaults.seed_batch_size),
            delete_chunk_size: self.delete_chunk_size.unwrap_or(defaults.delete_chunk_size),
            timestamp_column: self
                .timestamp_column
                .unwrap_or(defaults.timestamp_column),
            tables: self
                .tables
                .unwrap_or_default()
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            start_from: self
                .start_from
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            max_rounds: self.max_rounds.or(defaults.max_rounds),
            schema_rounds: self.schema_rounds.unwrap_or(defaults.schema_rounds),
            unit_timeout: self
                .unit_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.unit_timeout),
            concurrency: self.concurrency.unwrap_or(defaults.concurrency),
            relax_constraints: self
                .relax_constraints
                .unwrap_or(defaults.relax_constraints),
            dry_run: self.dry_run.unwrap_or(defaults.dry_run),
        };
        settings.validate()?;
        Ok(settings)
    }
}

impl SyncSettings {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("batch_size", self.batch_size),
            ("seed_batch_size", self.seed_batch_size),
            ("delete_chunk_size", self.delete_chunk_size),
            ("schema_rounds", self.schema_rounds),
            ("concurrency", self.concurrency),
        ] {
            if value == 0 {
                bail!("{} must be at least 1", name);
            }
        }
        if self.max_rounds == Some(0) {
            bail!("max_rounds must be at least 1 when set");
        }
        if self.timestamp_column.trim().is_empty() {
            bail!("timestamp_column must not be empty");
        }
        if self.unit_timeout.is_zero() {
            bail!("unit_timeout_secs must be at least 1");
        }
        Ok(())
    }
}

/// Contents of a TOML config file.
///
/// ```toml
/// [source]
/// host = "primary.example.com"
/// database = "shop"
///
/// [mirror]
/// host = "127.0.0.1"
/// port = 3307
///
/// [sync]
/// batch_size = 3000
/// tables = ["orders", "customers"]
/// ```
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub source: EndpointOverrides,
    pub mirror: EndpointOverrides,
    pub sync: SyncOverrides,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

/// Everything a run needs.
#[derive(Debug, Clone)]
pub struct Config {
    pub source: EndpointConfig,
    pub mirror: EndpointConfig,
    pub sync: SyncSettings,
}

impl Config {
    /// Resolve command-line values over `file` over defaults.
    ///
    /// Concurrency is capped at the smaller connection pool, since every
    /// table in flight holds a connection on both sides.
    pub fn resolve(
        file: FileConfig,
        source: EndpointOverrides,
        mirror: EndpointOverrides,
        sync: SyncOverrides,
    ) -> Result<Self> {
        let source = source.or(file.source).resolve(Side::Source)?;
        let mirror = mirror.or(file.mirror).resolve(Side::Mirror)?;
        let mut sync = sync.or(file.sync).resolve()?;

        let pool_limit = source.max_connections.min(mirror.max_connections);
        if sync.concurrency > pool_limit {
            tracing::warn!(
                "Concurrency {} exceeds the connection pools (source {}, mirror {}); using {}",
                sync.concurrency,
                source.max_connections,
                mirror.max_connections,
                pool_limit
            );
            sync.concurrency = pool_limit;
        }

        Ok(Self {
            source,
            mirror,
            sync,
        })
    }
}
