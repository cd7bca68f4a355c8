//! MedSync CLI
//!
//! Command-line tools for inspecting and maintaining the offline sync
//! state of a MedSync installation.
//!
//! # Commands
//!
//! - `inspect` - Display sync statistics and store contents
//! - `queue` - Dump pending operations in processing order
//! - `cancel` - Remove a pending operation
//! - `conflicts` - List, resolve or clear conflicts

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// MedSync offline state tools.
#[derive(Parser)]
#[command(name = "medsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the sync store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display sync statistics and store contents
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump pending operations in processing order
    Queue {
        /// Only show operations for this collection
        #[arg(short, long)]
        collection: Option<String>,

        /// Maximum number of operations to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Remove a pending operation
    Cancel {
        /// Operation ID
        id: String,
    },

    /// List, resolve or clear conflicts
    Conflicts {
        #[command(subcommand)]
        action: ConflictAction,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConflictAction {
    /// List conflicts
    List {
        /// Include resolved conflicts
        #[arg(short, long)]
        all: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Resolve a conflict with a strategy (server-wins, client-wins, newest-wins)
    Resolve {
        /// Conflict ID
        id: String,

        /// Resolution strategy
        strategy: String,
    },

    /// Remove resolved conflicts
    Clear,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
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

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Queue {
            collection,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for queue")?;
            commands::queue::run(&path, collection.as_deref(), limit, &format)?;
        }
        Commands::Cancel { id } => {
            let path = cli.path.ok_or("Store path required for cancel")?;
            commands::cancel::run(&path, &id)?;
        }
        Commands::Conflicts { action } => {
            let path = cli.path.ok_or("Store path required for conflicts")?;
            match action {
                ConflictAction::List { all, format } => {
                    commands::conflicts::list(&path, all, &format)?;
                }
                ConflictAction::Resolve { id, strategy } => {
                    commands::conflicts::resolve(&path, &id, &strategy)?;
                }
                ConflictAction::Clear => {
                    commands::conflicts::clear(&path)?;
                }
            }
        }
        Commands::Version => {
            println!("MedSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Record schema v{}", medsync_protocol::SCHEMA_VERSION);
        }
    }

    Ok(())
}
