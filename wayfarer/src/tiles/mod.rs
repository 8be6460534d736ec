//! Raster tile store and region downloads.
//!
//! [`TileStore`] persists slippy-map tiles under `<dir>/<zoom>/<x>/<y>.png`
//! and answers lookups from a small in-memory layer before touching disk.
//! [`TileStore::download_region`] bulk-fetches every tile within a radius of
//! a center point across the requested zoom levels, with:
//!
//! - bounded concurrency (fixed-size batches) and a fixed pause between
//!   batches to respect upstream rate limits;
//! - skip-if-present, so repeated downloads only fetch what is missing;
//! - per-tile failure tolerance - a failed tile is logged and skipped, it
//!   never aborts the region;
//! - fractional progress callbacks and cooperative cancellation (remaining
//!   batches are not started; in-flight fetches finish and persist).
//!
//! Tiles are immutable once stored: a re-fetch replaces the file wholesale.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use moka::future::Cache;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TileConfig;
use crate::coord::{tile_radius_for_km, to_tile_coords, CoordError, GeoPoint, TileCoord};
use crate::remote::{BoxFuture, RemoteError};
use crate::storage::{atomic_write, StorageError};

/// Byte budget for the in-memory tile layer.
const MEMORY_TILE_CACHE_BYTES: u64 = 32 * 1024 * 1024;

/// Progress callback for region downloads: `(completed, total)`.
pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Errors from tile store operations.
#[derive(Debug, Error)]
pub enum TileError {
    /// Local persistence failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The requested region has invalid coordinates.
    #[error(transparent)]
    Coord(#[from] CoordError),
}

/// A stored tile.
#[derive(Debug, Clone)]
pub struct Tile {
    pub coordinate: TileCoord,
    pub image_bytes: Vec<u8>,
    pub fetched_at: SystemTime,
}

/// A region download request.
#[derive(Debug, Clone)]
pub struct RegionRequest {
    pub center: GeoPoint,
    pub radius_km: f64,
    pub zoom_levels: Vec<u8>,
}

/// Summary of a region download.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionReport {
    pub total: usize,
    pub fetched: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl std::fmt::Display for RegionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "region: {}/{} tiles ({} fetched, {} already present, {} failed){}",
            self.fetched + self.skipped,
            self.total,
            self.fetched,
            self.skipped,
            self.failed,
            if self.cancelled { ", cancelled" } else { "" }
        )
    }
}

/// Fetches tile images from a slippy `z/x/y` source.
pub trait TileFetcher: Send + Sync {
    fn fetch(&self, coord: TileCoord) -> BoxFuture<'_, Result<Vec<u8>, RemoteError>>;
}

/// `reqwest`-backed tile fetcher using a `{z}/{x}/{y}` URL template.
pub struct HttpTileFetcher {
    client: reqwest::Client,
    url_template: String,
}

impl HttpTileFetcher {
    pub fn new(
        url_template: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transient(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url_template: url_template.into(),
        })
    }

    fn url(&self, coord: TileCoord) -> String {
        self.url_template
            .replace("{z}", &coord.zoom.to_string())
            .replace("{x}", &coord.x.to_string())
            .replace("{y}", &coord.y.to_string())
    }
}

impl TileFetcher for HttpTileFetcher {
    fn fetch(&self, coord: TileCoord) -> BoxFuture<'_, Result<Vec<u8>, RemoteError>> {
        let url = self.url(coord);
        Box::pin(async move {
            let response = self.client.get(&url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(RemoteError::from_status(status.as_u16(), url));
            }
            let bytes = response.bytes().await?;
            Ok(bytes.to_vec())
        })
    }
}

/// Enumerates the tile grid a region request covers at one zoom level.
///
/// The grid is a square of edge `2r + 1` centered on the tile containing
/// `center`, where `r` derives from `radius_km` and the ground resolution
/// at that latitude - clamped to `max_radius` so an oversized request
/// cannot enqueue an unbounded fetch. Coordinates are clamped to the valid
/// tile range and deduplicated.
pub fn region_tiles(
    center: GeoPoint,
    radius_km: f64,
    zoom: u8,
    max_radius: u32,
) -> Result<Vec<TileCoord>, CoordError> {
    let center_tile = to_tile_coords(center.lat, center.lon, zoom)?;
    let radius = tile_radius_for_km(radius_km, center.lat, zoom).min(max_radius) as i64;
    let max_tile = 2u32.pow(zoom as u32) as i64;

    let mut seen = std::collections::HashSet::new();
    let mut tiles = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let x = (center_tile.x as i64 + dx).clamp(0, max_tile - 1) as u32;
            let y = (center_tile.y as i64 + dy).clamp(0, max_tile - 1) as u32;
            let coord = TileCoord { x, y, zoom };
            if seen.insert(coord) {
                tiles.push(coord);
            }
        }
    }
    Ok(tiles)
}

/// Disk-backed tile store with an in-memory hot layer.
pub struct TileStore {
    dir: PathBuf,
    memory: Cache<TileCoord, Arc<Tile>>,
    fetcher: Arc<dyn TileFetcher>,
    config: TileConfig,
}

impl TileStore {
    /// Opens (or creates) a tile store rooted at `dir`.
    pub fn open(
        dir: impl Into<PathBuf>,
        fetcher: Arc<dyn TileFetcher>,
        config: TileConfig,
    ) -> Result<Self, TileError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(StorageError::Io)?;

        let memory = Cache::builder()
            .weigher(|_coord: &TileCoord, tile: &Arc<Tile>| {
                tile.image_bytes.len().min(u32::MAX as usize) as u32
            })
            .max_capacity(MEMORY_TILE_CACHE_BYTES)
            .build();

        Ok(Self {
            dir,
            memory,
            fetcher,
            config,
        })
    }

    /// Pure local lookup; a miss is `None`, never an error.
    pub async fn get_tile(&self, coord: TileCoord) -> Option<Tile> {
        if let Some(tile) = self.memory.get(&coord).await {
            return Some((*tile).clone());
        }

        let path = self.tile_path(coord);
        let image_bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(_) => return None,
        };
        let fetched_at = fs::metadata(&path)
            .and_then(|m| m.modified())
            .unwrap_or_else(|_| SystemTime::now());

        let tile = Tile {
            coordinate: coord,
            image_bytes,
            fetched_at,
        };
        self.memory.insert(coord, Arc::new(tile.clone())).await;
        Some(tile)
    }

    /// Whether a tile is already on disk.
    pub fn contains(&self, coord: TileCoord) -> bool {
        self.tile_path(coord).exists()
    }

    /// Downloads every tile covering the requested region.
    ///
    /// Fetches run in batches of `config.batch_size` with `config.batch_pause`
    /// between batches. Tiles already present are not re-fetched; individual
    /// failures are logged and skipped. `progress` is invoked with
    /// `(completed, total)` after every processed tile. Cancelling stops
    /// before the next batch; in-flight fetches finish and persist.
    pub async fn download_region(
        &self,
        request: &RegionRequest,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<RegionReport, TileError> {
        let mut tiles = Vec::new();
        for &zoom in &request.zoom_levels {
            tiles.extend(region_tiles(
                request.center,
                request.radius_km,
                zoom,
                self.config.max_tile_radius,
            )?);
        }

        let mut report = RegionReport {
            total: tiles.len(),
            ..Default::default()
        };
        info!(
            total = report.total,
            zooms = ?request.zoom_levels,
            center = %request.center,
            radius_km = request.radius_km,
            "starting region download"
        );

        let mut completed = 0usize;
        let mut first_batch = true;

        for batch in tiles.chunks(self.config.batch_size.max(1)) {
            if cancel.is_cancelled() {
                report.cancelled = true;
                info!(completed, total = report.total, "region download cancelled");
                break;
            }

            if !first_batch && !self.config.batch_pause.is_zero() {
                tokio::time::sleep(self.config.batch_pause).await;
            }
            first_batch = false;

            // Resolve already-present tiles without touching the network
            let mut pending = Vec::new();
            for &coord in batch {
                if self.contains(coord) {
                    report.skipped += 1;
                    completed += 1;
                    if let Some(ref cb) = progress {
                        cb(completed, report.total);
                    }
                } else {
                    pending.push(coord);
                }
            }

            let fetches = pending.iter().map(|&coord| {
                let fetcher = Arc::clone(&self.fetcher);
                async move { (coord, fetcher.fetch(coord).await) }
            });
            let results = futures::future::join_all(fetches).await;

            for (coord, result) in results {
                match result {
                    Ok(bytes) => {
                        atomic_write(&self.tile_path(coord), &bytes)?;
                        debug!(tile = %coord, bytes = bytes.len(), "tile stored");
                        report.fetched += 1;
                    }
                    Err(error) => {
                        // One bad tile never aborts the region
                        warn!(tile = %coord, error = %error, "tile fetch failed, skipping");
                        report.failed += 1;
                    }
                }
                completed += 1;
                if let Some(ref cb) = progress {
                    cb(completed, report.total);
                }
            }
        }

        info!(%report, "region download finished");
        Ok(report)
    }

    /// Removes tiles whose file is older than `max_age`. Returns the count.
    pub fn clear_older_than(&self, max_age: std::time::Duration) -> Result<usize, TileError> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let removed = remove_files_older_than(&self.dir, cutoff).map_err(StorageError::Io)?;
        if removed > 0 {
            // The memory layer may hold tiles just deleted from disk
            self.memory.invalidate_all();
            info!(removed, "purged stale tiles");
        }
        Ok(removed)
    }

    fn tile_path(&self, coord: TileCoord) -> PathBuf {
        self.dir
            .join(coord.zoom.to_string())
            .join(coord.x.to_string())
            .join(format!("{}.png", coord.y))
    }
}

fn remove_files_older_than(dir: &Path, cutoff: SystemTime) -> std::io::Result<usize> {
    let mut removed = 0;
    for item in fs::read_dir(dir)? {
        let item = item?;
        let path = item.path();
        if path.is_dir() {
            removed += remove_files_older_than(&path, cutoff)?;
        } else if let Ok(modified) = item.metadata().and_then(|m| m.modified()) {
            if modified < cutoff {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}
