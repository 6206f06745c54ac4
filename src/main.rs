mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use smartscan::config::{self, SmartScanConfig};
use smartscan::embedding::{ModelKind, ModelName};

#[derive(Parser)]
#[command(name = "smartscan", version, about = "Local multimodal file indexing and search")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP and WebSocket server
    Serve,
    /// Index directories in this process
    Index {
        /// Directories to index (defaults to indexing.target_dirs)
        dirs: Vec<String>,
    },
    /// Show collection statistics
    Stats,
    /// Manage embedding models
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download models with a public source to the model cache directory
    Download,
    /// Select the image or text model
    Set {
        #[arg(value_enum)]
        kind: Slot,
        model: ModelName,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Slot {
    Image,
    Text,
}

impl From<Slot> for ModelKind {
    fn from(slot: Slot) -> Self {
        match slot {
            Slot::Image => ModelKind::Image,
            Slot::Text => ModelKind::Text,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = config::default_config_path();
    let mut config = SmartScanConfig::load_from(&config_path)?;

    // Log to stderr so stdout stays clean for command output.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => {
            smartscan::server::serve(config, config_path).await?;
        }
        Command::Index { dirs } => {
            cli::index::index(&config, dirs).await?;
        }
        Command::Stats => {
            cli::stats::stats(&config)?;
        }
        Command::Model { action } => match action {
            ModelAction::Download => {
                cli::model_download(&config.models).await?;
            }
            ModelAction::Set { kind, model } => {
                cli::model_set(&mut config, &config_path, kind.into(), model)?;
            }
        },
    }

    Ok(())
}
