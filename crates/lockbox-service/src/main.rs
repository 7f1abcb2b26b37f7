use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use lockbox_core::paths::data_dir;
use lockbox_service::config::{ServiceConfig, CONFIG_FILE};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Lockbox remote storage service", long_about = None)]
struct Cli {
    /// Configuration file; defaults to service.json in the data directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a configuration file with the given overrides applied
    Init(Overrides),
    /// Serve the store
    Run(Overrides),
}

#[derive(Args, Debug, Default)]
struct Overrides {
    #[arg(long)]
    listen: Option<SocketAddr>,
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Discard replaced objects instead of keeping backups
    #[arg(long)]
    no_backups: bool,
    /// Refuse to create objects that do not replace an existing one
    #[arg(long)]
    block_new: bool,
    #[arg(long)]
    allow_list_backups: bool,
    #[arg(long)]
    max_payload_size: Option<usize>,
}

impl Overrides {
    fn apply(self, config: &mut ServiceConfig) {
        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if self.no_backups {
            config.backup_files = false;
        }
        if self.block_new {
            config.block_new = true;
        }
        if self.allow_list_backups {
            config.allow_list_backups = true;
        }
        if let Some(size) = self.max_payload_size {
            config.max_payload_size = size;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => data_dir()?.join(CONFIG_FILE),
    };
    match cli.command {
        Commands::Init(overrides) => init_command(config_path, overrides),
        Commands::Run(overrides) => {
            let mut config = ServiceConfig::load(&config_path)?;
            overrides.apply(&mut config);
            lockbox_service::serve(config).await
        }
    }
}

fn init_command(config_path: PathBuf, overrides: Overrides) -> Result<()> {
    if config_path.exists() {
        return Err(anyhow!("config already exists at {}", config_path.display()));
    }
    let mut config = ServiceConfig::default();
    overrides.apply(&mut config);
    config.save(&config_path)?;
    println!("Config written to {}", config_path.display());
    Ok(())
}
