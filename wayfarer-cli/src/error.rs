//! CLI error type.

use thiserror::Error;

/// Errors surfaced to the terminal.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Engine(#[from] wayfarer::EngineError),

    #[error("{0}")]
    Ledger(#[from] wayfarer::ledger::LedgerError),

    #[error("tile download failed: {0}")]
    Tiles(#[from] wayfarer::tiles::TileError),

    #[error("{0}")]
    Cache(#[from] wayfarer::cache::CacheError),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
}
