// ABOUTME: CLI entry point for database-mirror
// ABOUTME: Parses commands, resolves configuration and routes to handlers

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use database_mirror::commands;
use database_mirror::config::{Config, EndpointOverrides, FileConfig, Side, SyncOverrides};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "database-mirror")]
#[command(about = "Batch MySQL primary-to-mirror replication CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    /// Path to a TOML file with [source], [mirror] and [sync] settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print the run summary as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(flatten)]
    source: SourceArgs,
    #[command(flatten)]
    mirror: MirrorArgs,
    #[command(flatten)]
    sync: SyncArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Default)]
struct SourceArgs {
    /// Primary database host
    #[arg(id = "source_host", long = "source-host", env = "SOURCE_DB_HOST", global = true)]
    host: Option<String>,
    /// Primary database port (default: 3306)
    #[arg(id = "source_port", long = "source-port", env = "SOURCE_DB_PORT", global = true)]
    port: Option<u16>,
    /// Primary database user
    #[arg(id = "source_user", long = "source-user", env = "SOURCE_DB_USER", global = true)]
    user: Option<String>,
    /// Primary database password
    #[arg(
        id = "source_password",
        long = "source-password",
        env = "SOURCE_DB_PASSWORD",
        hide_env_values = true,
        global = true
    )]
    password: Option<String>,
    /// Primary database name
    #[arg(id = "source_database", long = "source-db", env = "SOURCE_DB_NAME", global = true)]
    database: Option<String>,
}

#[derive(Args, Clone, Default)]
struct MirrorArgs {
    /// Mirror database host
    #[arg(id = "mirror_host", long = "mirror-host", env = "DEST_DB_HOST", global = true)]
    host: Option<String>,
    /// Mirror database port (default: 3306)
    #[arg(id = "mirror_port", long = "mirror-port", env = "DEST_DB_PORT", global = true)]
    port: Option<u16>,
    /// Mirror database user
    #[arg(id = "mirror_user", long = "mirror-user", env = "DEST_DB_USER", global = true)]
    user: Option<String>,
    /// Mirror database password
    #[arg(
        id = "mirror_password",
        long = "mirror-password",
        env = "DEST_DB_PASSWORD",
        hide_env_values = true,
        global = true
    )]
    password: Option<String>,
    /// Mirror database name
    #[arg(id = "mirror_database", long = "mirror-db", env = "DEST_DB_NAME", global = true)]
    database: Option<String>,
}

#[derive(Args, Clone, Default)]
struct SyncArgs {
    /// Rows per change batch (default: 3000)
    #[arg(long, global = true)]
    batch_size: Option<usize>,
    /// Rows per page of a full copy (default: 5000)
    #[arg(long, global = true)]
    seed_batch_size: Option<usize>,
    /// Keys per delete statement when pruning (default: 1000)
    #[arg(long, global = true)]
    delete_chunk_size: Option<usize>,
    /// Change-tracking column (default: updated_at)
    #[arg(long, global = true)]
    timestamp_column: Option<String>,
    /// Only process these tables (comma-separated)
    #[arg(long, value_delimiter = ',', global = true)]
    tables: Option<Vec<String>>,
    /// Skip tables that come before this one in catalog order
    #[arg(long, global = true)]
    start_from: Option<String>,
    /// Change batches per table per run (default: until caught up)
    #[arg(long, global = true)]
    max_rounds: Option<usize>,
    /// Bound on view creation rounds (default: 5)
    #[arg(long, global = true)]
    schema_rounds: Option<usize>,
    /// Seconds each table or schema pass may run (default: 600)
    #[arg(long = "unit-timeout", global = true)]
    unit_timeout_secs: Option<u64>,
    /// Tables processed at once (default: 1)
    #[arg(long, global = true)]
    concurrency: Option<usize>,
    /// Keep foreign key checks and strict mode on for mirror sessions
    #[arg(long, global = true)]
    strict_constraints: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Run(RunCommand),
    /// List the mirror's tables
    Tables {
        /// Check whether a table exists, ignoring case
        #[arg(long)]
        check: Option<String>,
    },
}

/// Jobs that connect to both databases.
#[derive(Subcommand)]
enum RunCommand {
    /// Apply pending changes from the primary to the mirror
    Sync,
    /// Create missing mirror tables, catch every table up, then ANALYZE it
    Init,
    /// Delete mirror rows whose keys no longer exist on the primary
    Prune {
        /// Report orphaned rows without deleting them
        #[arg(long)]
        dry_run: bool,
    },
    /// Recreate functions, procedures and views on the mirror
    Schema,
    /// Copy tables in full, ordered by primary key
    Resync,
}

impl From<SourceArgs> for EndpointOverrides {
    fn from(args: SourceArgs) -> Self {
        EndpointOverrides {
            host: args.host,
            port: args.port,
            user: args.user,
            password: args.password,
            database: args.database,
            ..Default::default()
        }
    }
}

impl From<MirrorArgs> for EndpointOverrides {
    fn from(args: MirrorArgs) -> Self {
        EndpointOverrides {
            host: args.host,
            port: args.port,
            user: args.user,
            password: args.password,
            database: args.database,
            ..Default::default()
        }
    }
}

impl SyncArgs {
    fn into_overrides(self, dry_run: bool) -> SyncOverrides {
        SyncOverrides {
            batch_size: self.batch_size,
            seed_batch_size: self.seed_batch_size,
            delete_chunk_size: self.delete_chunk_size,
            timestamp_column: self.timestamp_column,
            tables: self.tables,
            start_from: self.start_from,
            max_rounds: self.max_rounds,
            schema_rounds: self.schema_rounds,
            unit_timeout_secs: self.unit_timeout_secs,
            concurrency: self.concurrency,
            relax_constraints: self.strict_constraints.then_some(false),
            dry_run: dry_run.then_some(true),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; real environment variables win over it
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    // 3. Default to "info" if neither are provided
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    // Logs go to stderr so a --json summary on stdout stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let command = match cli.command {
        Commands::Tables { check } => {
            let mirror = EndpointOverrides::from(cli.mirror)
                .or(file.mirror)
                .resolve(Side::Mirror)?;
            return commands::tables(mirror, check, cli.json).await;
        }
        Commands::Run(command) => command,
    };

    let dry_run = matches!(command, RunCommand::Prune { dry_run: true });
    let config = Config::resolve(
        file,
        cli.source.into(),
        cli.mirror.into(),
        cli.sync.into_overrides(dry_run),
    )?;

    match command {
        RunCommand::Sync => commands::sync(config, cli.json).await,
        RunCommand::Init => commands::init(config, cli.json).await,
        RunCommand::Prune { .. } => commands::prune(config, cli.json).await,
        RunCommand::Schema => commands::schema(config, cli.json).await,
        RunCommand::Resync => commands::resync(config, cli.json).await,
    }
}
