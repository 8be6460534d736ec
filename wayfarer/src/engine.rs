//! Engine composition root.
//!
//! [`DataEngine`] owns every component explicitly - monitor, cache, queue,
//! tile store, ledger, segment store - constructed once at application start
//! and handed to consumers by reference. There is no ambient module-level
//! state. The one piece of wiring it performs: an offline-to-online
//! transition (and the initial online observation at startup) spawns a
//! ledger sync, draining deferred writes and pulling remote changes.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{BoundedCache, CacheError};
use crate::config::{ConfigError, EngineConfig};
use crate::connectivity::{ConnectivityMonitor, Subscription};
use crate::ledger::{FavoriteMutation, LedgerError, LocationLedger};
use crate::queue::{MutationQueue, QueueError, RetryPolicy};
use crate::remote::{FavoritesApi, HttpFavoritesApi, RemoteError};
use crate::route::{RouteFinder, SegmentStore};
use crate::storage::StorageError;
use crate::tiles::{HttpTileFetcher, TileError, TileFetcher, TileStore};

/// Errors from engine construction and top-level operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Tile(#[from] TileError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// The offline-first data engine.
///
/// Construct once with [`DataEngine::new`] (injected remote seams) or
/// [`DataEngine::with_http`] (production HTTP clients from config).
pub struct DataEngine {
    config: EngineConfig,
    monitor: ConnectivityMonitor,
    cache: Arc<BoundedCache>,
    tiles: Arc<TileStore>,
    queue: Arc<MutationQueue<FavoriteMutation>>,
    ledger: Arc<LocationLedger>,
    segments: SegmentStore,
    /// Keeps the online-transition sync wiring alive.
    _sync_subscription: Option<Subscription>,
}

impl DataEngine {
    /// Builds the engine with injected remote implementations.
    ///
    /// When called inside a Tokio runtime, online transitions spawn a
    /// background ledger sync; outside a runtime the wiring is skipped and
    /// syncs must be invoked manually.
    pub fn new(
        config: EngineConfig,
        api: Arc<dyn FavoritesApi>,
        fetcher: Arc<dyn TileFetcher>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let monitor = ConnectivityMonitor::new();

        let cache = Arc::new(BoundedCache::open(
            config.data_dir.join("cache"),
            config.cache.max_size_bytes,
        )?);
        let queue = Arc::new(MutationQueue::open(
            config.data_dir.join("queue.json"),
            RetryPolicy::from_config(&config.queue),
            monitor.clone(),
        )?);
        let ledger = Arc::new(LocationLedger::open(
            config.data_dir.join("favorites.json"),
            api,
            Arc::clone(&queue),
            monitor.clone(),
        )?);
        let tiles = Arc::new(TileStore::open(
            config.data_dir.join("tiles"),
            fetcher,
            config.tiles.clone(),
        )?);
        let segments = SegmentStore::new(config.data_dir.join("segments.json"));

        let sync_subscription = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let ledger_for_sync = Arc::clone(&ledger);
                Some(monitor.subscribe(move |online| {
                    if !online {
                        return;
                    }
                    let ledger = Arc::clone(&ledger_for_sync);
                    handle.spawn(async move {
                        match ledger.sync().await {
                            Ok(report) => debug!(%report, "online sync finished"),
                            Err(error) => warn!(error = %error, "online sync failed"),
                        }
                    });
                }))
            }
            Err(_) => {
                debug!("no async runtime at construction; automatic sync wiring skipped");
                None
            }
        };

        Ok(Self {
            config,
            monitor,
            cache,
            tiles,
            queue,
            ledger,
            segments,
            _sync_subscription: sync_subscription,
        })
    }

    /// Builds the engine with production HTTP clients from the config.
    pub fn with_http(config: EngineConfig) -> Result<Self, EngineError> {
        let api = Arc::new(HttpFavoritesApi::new(
            config.remote.base_url.clone(),
            config.remote.timeout,
        )?);
        let fetcher = Arc::new(HttpTileFetcher::new(
            config.tiles.url_template.clone(),
            config.tiles.fetch_timeout,
        )?);
        Self::new(config, api, fetcher)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    pub fn cache(&self) -> &BoundedCache {
        &self.cache
    }

    pub fn tiles(&self) -> &TileStore {
        &self.tiles
    }

    pub fn ledger(&self) -> &LocationLedger {
        &self.ledger
    }

    pub fn queue(&self) -> &MutationQueue<FavoriteMutation> {
        &self.queue
    }

    pub fn segment_store(&self) -> &SegmentStore {
        &self.segments
    }

    /// Builds a route finder over the currently stored road graph.
    ///
    /// The graph is loaded fresh so a region download taken since the last
    /// call is picked up.
    pub fn route_finder(&self) -> Result<RouteFinder, EngineError> {
        let segments = self.segments.load()?;
        Ok(RouteFinder::from_segments(&segments))
    }

    /// Drains deferred writes and pulls remote changes.
    pub async fn sync(&self) -> Result<(), LedgerError> {
        self.ledger.sync().await.map(|_| ())
    }
}
