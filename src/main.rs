use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use divtrack::core::log::init_logging;
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for divtrack::AppCommand {
    fn from(cmd: Commands) -> divtrack::AppCommand {
        match cmd {
            Commands::Serve => divtrack::AppCommand::Serve,
            Commands::Import { file, dry_run } => divtrack::AppCommand::Import { file, dry_run },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Run the HTTP API server
    Serve,
    /// Import a Fidelity transaction export
    Import {
        /// Path to the exported CSV file
        file: PathBuf,
        /// Validate only, without writing anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => divtrack::cli::setup::setup(),
        Some(cmd) => divtrack::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
