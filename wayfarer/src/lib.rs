//! Wayfarer - offline-first map data engine.
//!
//! Keeps critical records usable without network connectivity and
//! reconciles changes once connectivity returns:
//!
//! - [`cache::BoundedCache`]: byte-budgeted key/value cache with per-entry
//!   expiry and soonest-to-expire eviction
//! - [`queue::MutationQueue`]: durable FIFO of deferred writes, replayed
//!   with exponential backoff when connectivity returns
//! - [`connectivity::ConnectivityMonitor`]: reachability state and
//!   transition notifications
//! - [`tiles::TileStore`]: raster map tile persistence and rate-limited
//!   region downloads
//! - [`ledger::LocationLedger`]: local-first favorites with
//!   last-write-wins remote reconciliation
//! - [`route::RouteFinder`]: A* shortest paths over the locally stored
//!   road graph
//!
//! [`engine::DataEngine`] wires the components together from an
//! [`config::EngineConfig`].

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod coord;
pub mod engine;
pub mod ledger;
pub mod logging;
pub mod queue;
pub mod remote;
pub mod route;
pub mod storage;
pub mod tiles;

pub use config::{ConfigFile, EngineConfig};
pub use engine::{DataEngine, EngineError};
