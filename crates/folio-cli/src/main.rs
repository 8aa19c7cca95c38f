//! Folio CLI
//!
//! Command-line interface for Folio - documents, config, backups and
//! package sync on a local engine root.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use folio_core::{Engine, EngineConfig};

mod commands;
mod output;

use output::{Output, OutputFormat};

/// Log filter variable; falls back to RUST_LOG
const LOG_ENV: &str = "FOLIO_LOG";

#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Folio - embedded JSON document engine")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Engine config file (defaults to FOLIO_CONFIG or ~/.config/folio/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show engine layout and component state
    Status,
    /// Manage documents
    #[command(alias = "doc")]
    Docs {
        #[command(subcommand)]
        command: DocCommands,
    },
    /// Validate and persist schema-checked entities
    Entity {
        #[command(subcommand)]
        command: EntityCommands,
    },
    /// Engine settings and config documents
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Manage backup archives
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
    /// Sync core modules into dependent packages
    Plugins {
        #[command(subcommand)]
        command: PluginCommands,
    },
    /// Run background tasks until interrupted
    Serve,
}

#[derive(Subcommand)]
pub enum DocCommands {
    /// Create a document from a JSON object
    #[command(alias = "add")]
    Create {
        collection: String,
        /// JSON object with the document fields
        data: String,
    },
    /// Show a document
    Get { collection: String, id: String },
    /// Merge a JSON object into a document
    Update {
        collection: String,
        id: String,
        /// JSON object with the fields to change
        patch: String,
    },
    /// Delete a document
    #[command(alias = "rm")]
    Delete { collection: String, id: String },
    /// Query a collection
    #[command(alias = "ls")]
    List {
        collection: String,
        /// JSON filter, e.g. '{"status": "published", "views": {"$gt": 10}}'
        #[arg(short, long = "where")]
        filter: Option<String>,
        /// Field to sort by (dotted paths allowed)
        #[arg(short, long)]
        sort: Option<String>,
        /// Sort descending
        #[arg(long, requires = "sort")]
        desc: bool,
        /// Maximum number of documents
        #[arg(short, long)]
        limit: Option<usize>,
        /// Only include these fields
        #[arg(long, value_delimiter = ',')]
        select: Vec<String>,
    },
    /// List collections
    Collections,
}

#[derive(Subcommand)]
pub enum EntityCommands {
    /// Check data against an entity schema without saving
    Validate {
        entity: String,
        /// JSON object to validate
        data: String,
    },
    /// Validate and save an entity
    Save {
        entity: String,
        /// JSON object to save
        data: String,
    },
    /// Show an entity
    Get { entity: String, id: String },
    /// Store a schema for an entity type
    RegisterSchema {
        entity: String,
        /// File containing the JSON schema
        file: PathBuf,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current engine settings
    Show,
    /// Set an engine setting
    Set {
        /// Setting key (root_dir, retention_days, compression_level,
        /// auto_backup, bus_url, listen, config_ttl_secs)
        key: String,
        /// Setting value
        value: String,
    },
    /// Read a value from a config document
    Get {
        /// Config document name
        name: String,
        /// Dotted path inside the document (whole document when omitted)
        path: Option<String>,
    },
    /// Replace a config document with a JSON value
    Put {
        /// Config document name
        name: String,
        /// JSON value to store
        data: String,
    },
}

#[derive(Subcommand)]
pub enum BackupCommands {
    /// Create a backup now
    Create,
    /// List backups, newest first
    #[command(alias = "ls")]
    List,
    /// Check that a backup can be restored
    Verify { name: String },
    /// Restore a backup over the current state
    Restore { name: String },
    /// Delete backups past the retention period
    Clean,
    /// Delete one backup
    #[command(alias = "rm")]
    Delete { name: String },
}

#[derive(Subcommand)]
pub enum PluginCommands {
    /// Sync one package, or every discovered package
    Sync { plugin: Option<String> },
    /// Sync a package only when it is behind the engine version
    Update { plugin: String },
    /// Show installed versus latest version for each package
    Status,
    /// Announce a package on the registration channel
    Register { plugin: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(EngineConfig::config_file_path);

    // Engine settings don't need a running engine
    if let Commands::Config { command } = &cli.command {
        match command {
            None | Some(ConfigCommands::Show) => {
                return commands::config::show(&config_path, &output);
            }
            Some(ConfigCommands::Set { key, value }) => {
                return commands::config::set(key, value, &config_path, &output);
            }
            Some(ConfigCommands::Get { .. }) | Some(ConfigCommands::Put { .. }) => {}
        }
    }

    let config = EngineConfig::load_from_path(&config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;
    let engine = Engine::open(config)
        .await
        .context("Failed to open engine")?;

    let result = run(cli.command, &engine, &output).await;
    engine.close().await;
    result
}

async fn run(command: Commands, engine: &Engine, output: &Output) -> Result<()> {
    match command {
        Commands::Status => commands::status::show(engine, output).await,
        Commands::Docs { command } => commands::docs::run(command, engine, output).await,
        Commands::Entity { command } => commands::entity::run(command, engine, output).await,
        Commands::Config { command } => match command {
            Some(ConfigCommands::Get { name, path }) => {
                commands::config::get_document(&name, path.as_deref(), engine, output).await
            }
            Some(ConfigCommands::Put { name, data }) => {
                commands::config::put_document(&name, &data, engine, output).await
            }
            // Handled before the engine is opened
            None | Some(ConfigCommands::Show) | Some(ConfigCommands::Set { .. }) => Ok(()),
        },
        Commands::Backup { command } => commands::backup::run(command, engine, output).await,
        Commands::Plugins { command } => commands::plugins::run(command, engine, output).await,
        Commands::Serve => commands::serve::run(engine, output).await,
    }
}

/// Log to stderr, filtered by FOLIO_LOG or RUST_LOG (default: warnings)
fn init_logging() {
    let directives = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "warn".to_string());

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directives))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
