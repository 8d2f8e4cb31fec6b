//! Graft CLI - Command line interface for the object-graph persistence engine

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod output;

use commands::{completions, config as config_cmd, inspect, io, maintenance, schema};
use config::Config;
use graft_core::EntityRegistry;
use graft_storage::{RedbStorage, Session, SessionConfig};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "graft")]
#[command(author, version, about = "Depth-bounded object-graph persistence")]
pub struct Cli {
    /// Data directory
    #[arg(short, long, env = "GRAFT_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Entity schema file (TOML or JSON)
    #[arg(short, long, env = "GRAFT_SCHEMA", global = true)]
    pub schema: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, global = true)]
    pub format: Option<OutputFormat>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate or print an entity schema
    Schema(schema::SchemaArgs),
    /// Save an object graph described in a JSON file
    Import(io::ImportArgs),
    /// Dump stored nodes and relationships as JSON
    Export(io::ExportArgs),
    /// Load a node and show its fields and load map
    Inspect(inspect::InspectArgs),
    /// Show node and relationship counts
    Stats,
    /// Remove every node and relationship
    Purge(maintenance::PurgeArgs),
    /// Manage configuration
    Config(config_cmd::ConfigArgs),
    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

/// Application context with storage backend
pub struct AppContext {
    pub storage: Arc<RedbStorage>,
    pub config: Config,
    pub format: OutputFormat,
    schema_path: Option<PathBuf>,
}

impl AppContext {
    pub fn new(cli: &Cli, config: Config) -> anyhow::Result<Self> {
        let data_dir = cli
            .data_dir
            .clone()
            .or_else(|| config.data_dir.clone())
            .unwrap_or_else(config::default_data_dir);
        std::fs::create_dir_all(&data_dir)?;

        let db_path = data_dir.join("graft.redb");
        tracing::debug!("Using database at: {:?}", db_path);

        let storage = RedbStorage::open(&db_path)
            .with_context(|| format!("opening {}", db_path.display()))?;

        Ok(Self {
            storage: Arc::new(storage),
            format: output_format(cli, &config),
            schema_path: cli.schema.clone().or_else(|| config.schema.clone()),
            config,
        })
    }

    /// The entity registry from `--schema` or the configured schema file
    pub fn registry(&self) -> anyhow::Result<Arc<EntityRegistry>> {
        let path = self.schema_path.as_ref().ok_or_else(|| {
            anyhow::anyhow!("No schema file given. Pass --schema or run `graft config set schema <path>`.")
        })?;
        Ok(Arc::new(schema::load_schema(path)?))
    }

    pub fn session(&self, registry: Arc<EntityRegistry>) -> Session<RedbStorage> {
        let config = SessionConfig {
            default_depth: self.config.default_depth,
            ..Default::default()
        };
        Session::new(self.storage.clone(), registry, config)
    }

    pub fn read_session(&self, registry: Arc<EntityRegistry>) -> Session<RedbStorage> {
        let config = SessionConfig {
            default_depth: self.config.default_depth,
            ..SessionConfig::read_only()
        };
        Session::new(self.storage.clone(), registry, config)
    }
}

fn output_format(cli: &Cli, config: &Config) -> OutputFormat {
    cli.format
        .unwrap_or_else(|| OutputFormat::from(config.output.as_str()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    tracing::debug!("Starting graft CLI");

    let config = Config::load();

    // Commands that never touch the database
    match &cli.command {
        Commands::Config(args) => return config_cmd::run(args).await,
        Commands::Completions(args) => return completions::run(args),
        Commands::Schema(args) => {
            let format = output_format(&cli, &config);
            let path = cli.schema.clone().or_else(|| config.schema.clone());
            return schema::run(args, path, format);
        }
        _ => {}
    }

    // Initialize storage
    let ctx = AppContext::new(&cli, config)?;

    match &cli.command {
        Commands::Import(args) => io::run_import(args, &ctx).await?,
        Commands::Export(args) => io::run_export(args, &ctx).await?,
        Commands::Inspect(args) => inspect::run(args, &ctx).await?,
        Commands::Stats => maintenance::run_stats(&ctx).await?,
        Commands::Purge(args) => maintenance::run_purge(args, &ctx).await?,
        Commands::Config(_) | Commands::Completions(_) | Commands::Schema(_) => {}
    }

    Ok(())
}
