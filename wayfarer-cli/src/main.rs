//! Wayfarer CLI - command-line interface to the offline-first data engine.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use wayfarer::{ConfigFile, DataEngine, EngineConfig};

use crate::error::CliError;

#[derive(Debug, Parser)]
#[command(
    name = "wayfarer",
    version,
    about = "Offline-first map data: cached tiles, synced favorites, on-device routing"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download map tiles for a region around a center point
    Download(commands::download::DownloadArgs),
    /// Compute a route between two coordinates over the local road graph
    Route(commands::route::RouteArgs),
    /// Manage favorite locations
    Favorites {
        #[command(subcommand)]
        action: commands::favorites::FavoritesAction,
    },
    /// Inspect or clean the local caches
    Cache {
        #[command(subcommand)]
        action: commands::cache::CacheAction,
    },
    /// Drain pending writes and pull remote changes
    Sync,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = ConfigFile::load().unwrap_or_default();

    // Logging failures must not take the CLI down with them
    let _guard = wayfarer::logging::init_logging(&config.data_dir.join("logs"), "wayfarer.log").ok();

    if let Err(e) = run(cli, config).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: EngineConfig) -> Result<(), CliError> {
    tracing::debug!(data_dir = %config.data_dir.display(), "starting engine");
    let engine = DataEngine::with_http(config)?;

    match cli.command {
        Command::Download(args) => commands::download::run(&engine, args).await,
        Command::Route(args) => commands::route::run(&engine, args),
        Command::Favorites { action } => commands::favorites::run(&engine, action).await,
        Command::Cache { action } => commands::cache::run(&engine, action),
        Command::Sync => commands::sync::run(&engine).await,
    }
}
