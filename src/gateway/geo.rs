//! Local grid → latitude/longitude projection
//!
//! Device positions are configured on a field grid in tens of metres. The
//! equirectangular projection below is accurate enough over a few km.

use serde::{Deserialize, Serialize};

use crate::config::defaults::{KM_PER_DEG_LAT, ORIGIN_LAT, ORIGIN_LON};

/// Geographic anchor of grid cell (0, 0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoOrigin {
    pub lat: f64,
    pub lon: f64,
}

impl Default for GeoOrigin {
    fn default() -> Self {
        Self {
            lat: ORIGIN_LAT,
            lon: ORIGIN_LON,
        }
    }
}

/// Static grid coordinate of a device, in tens of metres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GridPosition {
    pub x: f64,
    pub y: f64,
}

impl GridPosition {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
}

/// Project a grid coordinate around `origin`.
///
/// Longitude degrees shrink with `cos(latitude)`; the origin latitude is
/// used for the whole field.
pub fn project(origin: GeoOrigin, grid: GridPosition) -> GeoPosition {
    let km_per_deg_lon = KM_PER_DEG_LAT * origin.lat.to_radians().cos();
    let dx_km = grid.x * 10.0 / 1000.0;
    let dy_km = grid.y * 10.0 / 1000.0;

    GeoPosition {
        latitude: origin.lat + dy_km / KM_PER_DEG_LAT,
        longitude: origin.lon + dx_km / km_per_deg_lon,
    }
}
