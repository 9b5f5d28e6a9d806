mod cli;
mod commands;
mod config;
mod database;
mod orchestrator;
mod pool;

use anyhow::{Context, Result};
use clap::Parser;
use logger::LevelFilter;
use tracing::{info, warn};

use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::orchestrator::{Components, Orchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = Config::resolve_path(cli.config.as_ref())?;
    let config = Config::load(&config_path)?;

    let level = config.logging.level.parse::<LevelFilter>();
    logger::init_with_level(level.as_ref().copied().unwrap_or(LevelFilter::INFO));
    if level.is_err() {
        warn!("Unknown log level {:?}, using info", config.logging.level);
    }

    let command = cli.command.unwrap_or(Commands::Run);
    if let Commands::ShowConfig = command {
        println!("Config file: {}", config_path.display());
        print!("{config}");
        return Ok(());
    }

    let pool = pool::open_pool(&config.database.path)
        .await
        .with_context(|| format!("failed to open database {}", config.database.path))?;

    match command {
        Commands::Run => {
            info!("Starting proxyup {}", env!("CARGO_PKG_VERSION"));
            info!("{config}");
            Orchestrator::start(config, config_path, pool).await
        }
        command => {
            let components = Components::build(&config, pool).await?;
            commands::execute(command, &components).await
        }
    }
}
