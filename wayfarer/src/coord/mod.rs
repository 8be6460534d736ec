//! Coordinate conversion and geodesy.
//!
//! Provides conversions between geographic coordinates (latitude/longitude)
//! and Web Mercator slippy-map tile coordinates, plus the great-circle
//! distance and ground-resolution math used by tile downloads and routing.

mod types;

pub use types::{CoordError, GeoPoint, TileCoord, MAX_LAT, MAX_ZOOM, MIN_LAT, MIN_LON, MIN_ZOOM};

use std::f64::consts::PI;

/// Mean Earth radius in meters (IUGG).
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Ground resolution at the equator for zoom 0, in meters per pixel.
const EQUATOR_M_PER_PIXEL_Z0: f64 = 156_543.033_92;

/// Pixels per tile edge.
const TILE_SIZE_PX: f64 = 256.0;

/// Converts geographic coordinates to tile coordinates.
///
/// # Arguments
///
/// * `lat` - Latitude in degrees (-85.05112878 to 85.05112878)
/// * `lon` - Longitude in degrees (-180.0 to 180.0)
/// * `zoom` - Zoom level (0 to 19)
///
/// # Returns
///
/// A `Result` containing the tile coordinates or an error if inputs are invalid.
#[inline]
pub fn to_tile_coords(lat: f64, lon: f64, zoom: u8) -> Result<TileCoord, CoordError> {
    // Validate inputs
    if !(MIN_LAT..=MAX_LAT).contains(&lat) {
        return Err(CoordError::InvalidLatitude(lat));
    }
    if !(MIN_LON..=180.0).contains(&lon) {
        return Err(CoordError::InvalidLongitude(lon));
    }
    if zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }

    // Number of tiles along each axis at this zoom level
    let n = 2.0_f64.powi(zoom as i32);

    // Longitude to tile X
    let x = ((lon + 180.0) / 360.0 * n) as u32;

    // Latitude to tile Y via the Web Mercator projection
    let lat_rad = lat * PI / 180.0;
    let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n) as u32;

    Ok(TileCoord { x, y, zoom })
}

/// Converts tile coordinates back to geographic coordinates.
///
/// Returns the latitude/longitude of the tile's northwest corner.
#[inline]
pub fn tile_to_lat_lon(tile: &TileCoord) -> (f64, f64) {
    let n = 2.0_f64.powi(tile.zoom as i32);

    let lon = tile.x as f64 / n * 360.0 - 180.0;

    let y = tile.y as f64 / n;
    let lat_rad = (PI * (1.0 - 2.0 * y)).sinh().atan();
    let lat = lat_rad * 180.0 / PI;

    (lat, lon)
}

/// Great-circle distance between two points in meters (haversine formula).
///
/// Haversine never overestimates the true travelled distance along a road,
/// which makes it an admissible A* heuristic for routing.
#[inline]
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Ground resolution in meters per pixel at the given latitude and zoom.
///
/// Web Mercator tiles cover less ground per pixel away from the equator;
/// the resolution shrinks with the cosine of the latitude.
#[inline]
pub fn meters_per_pixel(lat: f64, zoom: u8) -> f64 {
    EQUATOR_M_PER_PIXEL_Z0 * lat.to_radians().cos() / 2.0_f64.powi(zoom as i32)
}

/// Number of tiles needed in each direction from a center tile to cover
/// `radius_km` at the given latitude and zoom.
///
/// Rounds up so the covered square always contains the requested radius.
/// Returns at least 1 so a region download is never empty.
#[inline]
pub fn tile_radius_for_km(radius_km: f64, lat: f64, zoom: u8) -> u32 {
    let tile_span_m = meters_per_pixel(lat, zoom) * TILE_SIZE_PX;
    let tiles = (radius_km * 1000.0 / tile_span_m).ceil();
    (tiles as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_york_city_at_zoom_16() {
        // New York City: 40.7128°N, 74.0060°W
        let result = to_tile_coords(40.7128, -74.0060, 16);
        assert!(result.is_ok(), "Valid coordinates should not error");

        let tile = result.unwrap();
        assert_eq!(tile.y, 24640);
        assert_eq!(tile.x, 19295);
        assert_eq!(tile.zoom, 16);
    }

    #[test]
    fn test_invalid_latitude() {
        let result = to_tile_coords(90.0, 0.0, 10);
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), CoordError::InvalidLatitude(_)));
    }

    #[test]
    fn test_invalid_zoom() {
        let result = to_tile_coords(0.0, 0.0, MAX_ZOOM + 1);
        assert!(matches!(result.unwrap_err(), CoordError::InvalidZoom(_)));
    }

    #[test]
    fn test_tile_to_lat_lon_northwest_corner() {
        let tile = TileCoord {
            x: 19295,
            y: 24640,
            zoom: 16,
        };

        let (lat, lon) = tile_to_lat_lon(&tile);

        // Should be close to NYC but not exact (northwest corner of tile)
        assert!(
            (lat - 40.713).abs() < 0.01,
            "Latitude should be close to 40.713"
        );
        assert!(
            (lon - (-74.007)).abs() < 0.01,
            "Longitude should be close to -74.007"
        );
    }

    #[test]
    fn test_roundtrip_conversion() {
        let original_lat = 40.7128;
        let original_lon = -74.0060;
        let zoom = 16;

        let tile = to_tile_coords(original_lat, original_lon, zoom).unwrap();
        let (converted_lat, converted_lon) = tile_to_lat_lon(&tile);

        // At zoom 16, each tile is ~1.2km, so tolerance should be small
        assert!(
            (converted_lat - original_lat).abs() < 0.01,
            "Latitude should roundtrip within 0.01 degrees"
        );
        assert!(
            (converted_lon - original_lon).abs() < 0.01,
            "Longitude should roundtrip within 0.01 degrees"
        );
    }

    #[test]
    fn test_haversine_known_distance() {
        // London to Paris is roughly 344 km
        let london = GeoPoint::new(51.5074, -0.1278);
        let paris = GeoPoint::new(48.8566, 2.3522);

        let d = haversine_m(london, paris);
        assert!(
            (d - 344_000.0).abs() < 5_000.0,
            "London-Paris distance {} outside expected range",
            d
        );
    }

    #[test]
    fn test_haversine_zero_for_same_point() {
        let p = GeoPoint::new(9.0820, 8.6753);
        assert_eq!(haversine_m(p, p), 0.0);
    }

    #[test]
    fn test_haversine_symmetric() {
        let a = GeoPoint::new(40.7128, -74.0060);
        let b = GeoPoint::new(34.0522, -118.2437);
        let ab = haversine_m(a, b);
        let ba = haversine_m(b, a);
        assert!((ab - ba).abs() < 1e-6);
    }

    #[test]
    fn test_meters_per_pixel_halves_per_zoom() {
        let z10 = meters_per_pixel(0.0, 10);
        let z11 = meters_per_pixel(0.0, 11);
        assert!((z10 / z11 - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_meters_per_pixel_shrinks_away_from_equator() {
        assert!(meters_per_pixel(60.0, 10) < meters_per_pixel(0.0, 10));
    }

    #[test]
    fn test_tile_radius_covers_requested_distance() {
        // At zoom 14 near the equator a tile spans ~2.4km; 5km needs 3 tiles
        let radius = tile_radius_for_km(5.0, 0.0, 14);
        let tile_span_m = meters_per_pixel(0.0, 14) * 256.0;
        assert!(radius as f64 * tile_span_m >= 5_000.0);
    }

    #[test]
    fn test_tile_radius_is_at_least_one() {
        // A tiny radius at a coarse zoom still covers the center tile
        assert_eq!(tile_radius_for_km(0.001, 0.0, 1), 1);
    }

    #[test]
    fn test_tile_coord_display() {
        let tile = TileCoord {
            x: 19295,
            y: 24640,
            zoom: 16,
        };
        assert_eq!(tile.to_string(), "16/19295/24640");
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_roundtrip_property(
                lat in -85.05..85.05_f64,
                lon in -180.0..180.0_f64,
                zoom in 0u8..=19
            ) {
                let tile = to_tile_coords(lat, lon, zoom)?;
                let (converted_lat, converted_lon) = tile_to_lat_lon(&tile);

                // Converted coordinates should be within one tile of original
                let tile_size = 360.0 / (2.0_f64.powi(zoom as i32));

                prop_assert!(
                    (converted_lat - lat).abs() < tile_size,
                    "Latitude roundtrip failed: {} -> {} (diff: {}, tile_size: {})",
                    lat, converted_lat, (converted_lat - lat).abs(), tile_size
                );
                prop_assert!(
                    (converted_lon - lon).abs() < tile_size,
                    "Longitude roundtrip failed: {} -> {} (diff: {}, tile_size: {})",
                    lon, converted_lon, (converted_lon - lon).abs(), tile_size
                );
            }

            #[test]
            fn test_tile_coords_in_bounds(
                lat in -85.05..85.05_f64,
                lon in -180.0..180.0_f64,
                zoom in 0u8..=19
            ) {
                let tile = to_tile_coords(lat, lon, zoom)?;

                let max_tile = 2u32.pow(zoom as u32);
                prop_assert!(
                    tile.y < max_tile,
                    "Y {} exceeds maximum {} at zoom {}",
                    tile.y, max_tile, zoom
                );
                prop_assert!(
                    tile.x < max_tile,
                    "X {} exceeds maximum {} at zoom {}",
                    tile.x, max_tile, zoom
                );
                prop_assert_eq!(tile.zoom, zoom);
            }

            #[test]
            fn test_longitude_monotonic(
                lat in 0.0..1.0_f64,
                lon1 in -180.0..-90.0_f64,
                lon2 in -90.0..0.0_f64,
                zoom in 10u8..=15
            ) {
                // For fixed latitude, increasing longitude should increase X
                let tile1 = to_tile_coords(lat, lon1, zoom)?;
                let tile2 = to_tile_coords(lat, lon2, zoom)?;

                prop_assert!(
                    tile1.x < tile2.x,
                    "Longitude not monotonic: lon {} (x {}) >= lon {} (x {})",
                    lon1, tile1.x, lon2, tile2.x
                );
            }

            #[test]
            fn test_reject_invalid_latitude(
                lat in -90.0..-85.06_f64,
                lon in -180.0..180.0_f64,
                zoom in 0u8..=19
            ) {
                let result = to_tile_coords(lat, lon, zoom);
                prop_assert!(result.is_err());
                prop_assert!(matches!(result.unwrap_err(), CoordError::InvalidLatitude(_)));
            }

            #[test]
            fn test_haversine_non_negative(
                lat1 in -85.0..85.0_f64,
                lon1 in -180.0..180.0_f64,
                lat2 in -85.0..85.0_f64,
                lon2 in -180.0..180.0_f64,
            ) {
                let d = haversine_m(GeoPoint::new(lat1, lon1), GeoPoint::new(lat2, lon2));
                prop_assert!(d >= 0.0);
                // Antipodal distance bounds any great-circle distance
                prop_assert!(d <= 6_371_000.0 * std::f64::consts::PI + 1.0);
            }

            #[test]
            fn test_haversine_triangle_inequality(
                lat1 in -60.0..60.0_f64,
                lon1 in -170.0..170.0_f64,
                lat2 in -60.0..60.0_f64,
                lon2 in -170.0..170.0_f64,
                lat3 in -60.0..60.0_f64,
                lon3 in -170.0..170.0_f64,
            ) {
                let a = GeoPoint::new(lat1, lon1);
                let b = GeoPoint::new(lat2, lon2);
                let c = GeoPoint::new(lat3, lon3);
                prop_assert!(
                    haversine_m(a, c) <= haversine_m(a, b) + haversine_m(b, c) + 1e-6
                );
            }
        }
    }
}
