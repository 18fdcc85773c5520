//! OrbitKV CLI
//!
//! Command-line tools for OrbitKV snapshot files.
//!
//! # Commands
//!
//! - `inspect` - Display databases, collections and indexes
//! - `plan` - Show the provisioning actions a schema would run
//! - `run` - Apply JSON operations through the adapter
//! - `find` - Look up a single record

mod commands;

use clap::{Parser, Subcommand};
use orbitkv_core::{AdapterConfig, DEFAULT_NAMESPACE, DEFAULT_VERSION};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// OrbitKV command-line tools.
#[derive(Parser)]
#[command(name = "orbitkv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the snapshot file
    #[arg(global = true, short, long)]
    data: Option<PathBuf>,

    /// Namespace (database name)
    #[arg(global = true, short, long, default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Schema version to open with
    #[arg(global = true, long, default_value_t = DEFAULT_VERSION)]
    db_version: u32,

    /// Let the engine generate integer identifiers
    #[arg(global = true, long)]
    auto_increment: bool,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display databases, collections and indexes
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the provisioning actions a schema would run
    Plan {
        /// Path to the schema JSON file
        #[arg(short, long)]
        schema: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Apply JSON operations and save the result
    Run {
        /// Path to the schema JSON file
        #[arg(short, long)]
        schema: PathBuf,

        /// File holding one operation or an array of operations
        operations: PathBuf,

        /// Keep going after a failed operation
        #[arg(short, long)]
        keep_going: bool,
    },

    /// Look up a single record
    Find {
        /// Path to the schema JSON file
        #[arg(short, long)]
        schema: PathBuf,

        /// Model name
        model: String,

        /// Record identifier
        id: String,
    },

    /// Show version information
    Version,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = AdapterConfig::new()
        .namespace(cli.namespace)
        .version(cli.db_version)
        .auto_increment(cli.auto_increment);

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.data.ok_or("Snapshot path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Plan { schema, format } => {
            commands::plan::run(cli.data.as_deref(), &schema, &config, &format)?;
        }
        Commands::Run {
            schema,
            operations,
            keep_going,
        } => {
            commands::run::run(cli.data.as_deref(), &schema, &operations, config, keep_going)
                .await?;
        }
        Commands::Find { schema, model, id } => {
            let path = cli.data.ok_or("Snapshot path required for find")?;
            commands::find::run(&path, &schema, config, &model, &id).await?;
        }
        Commands::Version => {
            println!("OrbitKV CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("OrbitKV Core v{}", orbitkv_core::VERSION);
            println!("Snapshot format {}", orbitkv_engine::SNAPSHOT_FORMAT);
        }
    }

    Ok(())
}
