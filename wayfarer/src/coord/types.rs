//! Coordinate types and validation bounds.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum latitude supported by the Web Mercator projection.
pub const MIN_LAT: f64 = -85.05112878;

/// Maximum latitude supported by the Web Mercator projection.
pub const MAX_LAT: f64 = 85.05112878;

/// Minimum longitude in degrees.
pub const MIN_LON: f64 = -180.0;

/// Minimum zoom level.
pub const MIN_ZOOM: u8 = 0;

/// Maximum zoom level supported by slippy-map tile sources.
pub const MAX_ZOOM: u8 = 19;

/// A geographic point in degrees.
///
/// Latitude is positive north, longitude positive east.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

/// A slippy-map tile coordinate.
///
/// Tiles are addressed `zoom/x/y` where `x` grows eastward and `y` grows
/// southward from the northwest corner of the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    /// Column (east-west) index.
    pub x: u32,
    /// Row (north-south) index.
    pub y: u32,
    /// Zoom level.
    pub zoom: u8,
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Errors from coordinate conversion.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoordError {
    /// Latitude outside the Web Mercator range.
    #[error("latitude {0} outside valid range [{MIN_LAT}, {MAX_LAT}]")]
    InvalidLatitude(f64),

    /// Longitude outside [-180, 180].
    #[error("longitude {0} outside valid range [{MIN_LON}, 180]")]
    InvalidLongitude(f64),

    /// Zoom level beyond the supported maximum.
    #[error("zoom level {0} exceeds maximum {MAX_ZOOM}")]
    InvalidZoom(u8),
}
