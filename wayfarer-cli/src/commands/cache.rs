//! Cache maintenance commands.

use clap::Subcommand;
use wayfarer::config::format_size;
use wayfarer::DataEngine;

use crate::error::CliError;

/// Cache subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show cache statistics
    Stats,
    /// Remove expired cache entries
    Purge,
    /// Remove map tiles older than the given age
    ClearTiles {
        /// Age threshold in days
        #[arg(long, default_value_t = 30)]
        older_than_days: u64,
    },
}

/// Run a cache subcommand.
pub fn run(engine: &DataEngine, action: CacheAction) -> Result<(), CliError> {
    match action {
        CacheAction::Stats => {
            let stats = engine.cache().stats();
            println!("Data cache:");
            println!("  Entries: {}", stats.entry_count);
            println!(
                "  Size:    {} / {}",
                format_size(stats.size_bytes),
                format_size(engine.cache().max_size_bytes())
            );
            println!(
                "  Hits:    {} ({} misses, {} evictions)",
                stats.hits, stats.misses, stats.evictions
            );
            Ok(())
        }
        CacheAction::Purge => {
            let removed = engine.cache().purge_expired()?;
            println!("Purged {} expired entries", removed);
            Ok(())
        }
        CacheAction::ClearTiles { older_than_days } => {
            let max_age = std::time::Duration::from_secs(older_than_days * 24 * 3600);
            let removed = engine.tiles().clear_older_than(max_age)?;
            println!(
                "Removed {} tiles older than {} days",
                removed, older_than_days
            );
            Ok(())
        }
    }
}
