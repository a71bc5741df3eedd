pub mod cli;
pub mod core;
pub mod db;
pub mod import;
pub mod providers;
pub mod security;
pub mod server;
pub mod store;

use crate::core::config::AppConfig;
use anyhow::Result;
use std::path::PathBuf;
use tracing::{debug, info};

pub enum AppCommand {
    Serve,
    Import { file: PathBuf, dry_run: bool },
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    let config = AppConfig::load(config_path)?;
    debug!("Loaded config: {config:#?}");

    match command {
        AppCommand::Serve => server::serve(config).await,
        AppCommand::Import { file, dry_run } => {
            info!("Importing {}", file.display());
            cli::import::run_import(&config, &file, dry_run).await
        }
    }
}
