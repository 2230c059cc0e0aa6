//! # courier-cli
//!
//! CLI tool for exercising the Courier event pipeline.
//!
//! ## Commands
//!
//! - `demo`: Drive the pipeline against a mock API and print the outcome
//! - `inspect`: Summarize an archived state file
//!
//! ## Example
//!
//! ```bash
//! # Run the demo, failing the first two sends with HTTP 503
//! courier-cli demo --fail 2
//!
//! # Look at what was left behind
//! courier-cli inspect
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{demo, inspect};

/// Archive file name inside the data directory.
const ARCHIVE_FILE: &str = "archive.json";

/// CLI tool for exercising the Courier event pipeline.
#[derive(Parser, Debug)]
#[command(name = "courier-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory holding the default archive
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pipeline against a mock API
    Demo {
        /// Client configuration file (TOML)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Archive file (overrides the configuration)
        #[arg(long)]
        archive: Option<PathBuf>,

        /// Fail this many sends with HTTP 503 before succeeding
        #[arg(long, default_value = "0")]
        fail: usize,

        /// Public API key to initialize with
        #[arg(long, default_value = "demo-public-key")]
        api_key: String,
    },

    /// Print a summary of an archived state
    Inspect {
        /// Archive file (defaults to the data directory's archive)
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    match cli.command {
        Commands::Demo {
            config,
            archive,
            fail,
            api_key,
        } => {
            demo::run(&data_dir, config.as_deref(), archive, fail, &api_key).await?;
        }
        Commands::Inspect { file } => {
            let path = file.unwrap_or_else(|| data_dir.join(ARCHIVE_FILE));
            inspect::run(&path).await?;
        }
    }

    Ok(())
}

/// Get the default data directory for courier-cli.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "courier", "courier-cli")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
