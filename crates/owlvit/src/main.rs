//! OWL-ViT CLI - zero-shot object detection from free-text queries.
//!
//! Finds objects described in plain text ("a red umbrella", "a cat") in
//! images, without a fixed label set. Results are written as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Detect two kinds of objects in one image
//! owlvit detect street.jpg -q "a bicycle" -q "a traffic light"
//!
//! # Use a specific checkpoint and write JSON Lines to a file
//! owlvit detect *.jpg -q "a dog" --checkpoint ~/ckpt/owlvit_b32.safetensors -f jsonl -o dogs.jsonl
//!
//! # Look inside a checkpoint
//! owlvit inspect ~/ckpt/owlvit_b32.safetensors
//!
//! # View configuration
//! owlvit config show
//! ```

use clap::{Parser, Subcommand};

mod cli;
mod logging;

/// OWL-ViT - open-vocabulary object detection.
#[derive(Parser, Debug)]
#[command(name = "owlvit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Detect objects matching text queries
    Detect(cli::detect::DetectArgs),

    /// List the parameters stored in a checkpoint
    Inspect(cli::inspect::InspectArgs),

    /// Show which model files are installed
    Models(cli::models::ModelsArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging isn't initialized yet, so config warnings go through eprintln.
    let config = match owlvit_core::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default configuration. Check your config file with `owlvit config path`."
            );
            owlvit_core::Config::default()
        }
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("OWL-ViT v{}", owlvit_core::VERSION);

    match cli.command {
        Commands::Detect(args) => cli::detect::execute(args).await,
        Commands::Inspect(args) => cli::inspect::execute(args).await,
        Commands::Models(args) => cli::models::execute(args).await,
        Commands::Config(args) => cli::config::execute(args).await,
    }
}
