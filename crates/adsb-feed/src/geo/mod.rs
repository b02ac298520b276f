// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! Geographic projection and great-circle math.
//!
//! Everything in here is a pure function of its inputs so the embedded display
//! and the desktop viewer place tiles and aircraft on exactly the same pixels.
//!
//! - [`WebMercator`] converts between lat/lon and fractional tile coordinates
//! - [`project`] resolves a position to a tile and a pixel inside that tile
//! - [`distance_and_bearing`] gives statute miles and the initial course
//! - [`zoom_for_radius`] picks the tile zoom for a display radius
//! - [`Viewport`] bundles a center, radius and derived zoom

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Edge length of a slippy-map tile in pixels.
pub const TILE_SIZE: u32 = 256;

/// Latitude limit of the Web Mercator projection.
pub const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_78;

/// Upper bound on tiles per axis needed to cover a viewport.
pub const MAX_TILE_GRID: u32 = 5;

/// Deepest zoom public slippy-map servers provide.
pub const MAX_ZOOM: u8 = 19;

const EARTH_RADIUS_MILES: f64 = 3958.8;
const EARTH_CIRCUMFERENCE_MILES: f64 = 2.0 * PI * EARTH_RADIUS_MILES;

/// Errors raised when coordinates or radii cannot be projected.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeoError {
    #[error("latitude {0} is not a finite value within range")]
    InvalidLatitude(f64),

    #[error("longitude {0} is not a finite value within ±180")]
    InvalidLongitude(f64),

    #[error("radius {0} must be a finite number of miles greater than zero")]
    InvalidRadius(f64),

    #[error("zoom breakpoints must ascend in radius, never increase in zoom and stay at or below zoom {MAX_ZOOM}")]
    InvalidBreakpoints,
}

fn check_position(lat: f64, lon: f64, max_lat: f64) -> Result<(), GeoError> {
    if !lat.is_finite() || lat.abs() > max_lat {
        return Err(GeoError::InvalidLatitude(lat));
    }
    if !lon.is_finite() || lon.abs() > 180.0 {
        return Err(GeoError::InvalidLongitude(lon));
    }
    Ok(())
}

/// Validate a position anywhere on the globe.
pub fn validate_position(lat: f64, lon: f64) -> Result<(), GeoError> {
    check_position(lat, lon, 90.0)
}

/// Validate a position that must also be representable on a Mercator map.
pub fn validate_map_position(lat: f64, lon: f64) -> Result<(), GeoError> {
    check_position(lat, lon, MAX_MERCATOR_LATITUDE)
}

fn world_tiles(zoom: u8) -> f64 {
    2_f64.powi(i32::from(zoom))
}

/// Web Mercator projection utilities
#[derive(Debug)]
pub struct WebMercator;

impl WebMercator {
    /// Convert latitude to a fractional tile Y coordinate at `zoom`.
    #[must_use]
    pub fn lat_to_y(lat: f64, zoom: u8) -> f64 {
        let lat_rad = lat.to_radians();
        let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0;
        y * world_tiles(zoom)
    }

    /// Convert longitude to a fractional tile X coordinate at `zoom`.
    #[must_use]
    pub fn lon_to_x(lon: f64, zoom: u8) -> f64 {
        ((lon + 180.0) / 360.0) * world_tiles(zoom)
    }

    /// Convert a tile Y coordinate back to latitude.
    #[must_use]
    pub fn tile_to_lat(y: f64, zoom: u8) -> f64 {
        let n = world_tiles(zoom);
        let lat_rad = (PI * (1.0 - 2.0 * y / n)).sinh().atan();
        lat_rad.to_degrees()
    }

    /// Convert a tile X coordinate back to longitude.
    #[must_use]
    pub fn tile_to_lon(x: f64, zoom: u8) -> f64 {
        x / world_tiles(zoom) * 360.0 - 180.0
    }

    /// Global pixel coordinates of a position at `zoom`.
    #[must_use]
    pub fn world_pixel(lat: f64, lon: f64, zoom: u8) -> (f64, f64) {
        let size = f64::from(TILE_SIZE);
        (
            Self::lon_to_x(lon, zoom) * size,
            Self::lat_to_y(lat, zoom) * size,
        )
    }

    /// Width of the whole world in pixels at `zoom`.
    #[must_use]
    pub fn world_size(zoom: u8) -> f64 {
        world_tiles(zoom) * f64::from(TILE_SIZE)
    }
}

/// A position resolved to a tile and a pixel offset inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePoint {
    pub tile_x: u32,
    pub tile_y: u32,
    pub pixel_x: u32,
    pub pixel_y: u32,
}

/// Project a position onto the tile grid at `zoom`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn project(lat: f64, lon: f64, zoom: u8) -> Result<TilePoint, GeoError> {
    validate_map_position(lat, lon)?;

    let max_index = world_tiles(zoom) - 1.0;
    let x = WebMercator::lon_to_x(lon, zoom).clamp(0.0, max_index + 0.999_999);
    let y = WebMercator::lat_to_y(lat, zoom).clamp(0.0, max_index + 0.999_999);
    let size = f64::from(TILE_SIZE);
    Ok(TilePoint {
        tile_x: x.floor() as u32,
        tile_y: y.floor() as u32,
        pixel_x: (x.fract() * size).floor() as u32,
        pixel_y: (y.fract() * size).floor() as u32,
    })
}

/// Great-circle distance in statute miles (haversine).
#[must_use]
pub fn haversine_distance_miles(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_MILES * c
}

/// Initial great-circle bearing from the first point to the second, 0..360.
#[must_use]
pub fn initial_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let x = delta_lon.sin() * lat2_rad.cos();
    let y = lat1_rad.cos() * lat2_rad.sin() - lat1_rad.sin() * lat2_rad.cos() * delta_lon.cos();

    x.atan2(y).to_degrees().rem_euclid(360.0)
}

/// Distance in miles and bearing in degrees between two positions.
pub fn distance_and_bearing(
    lat1: f64,
    lon1: f64,
    lat2: f64,
    lon2: f64,
) -> Result<(f64, f64), GeoError> {
    validate_position(lat1, lon1)?;
    validate_position(lat2, lon2)?;
    Ok((
        haversine_distance_miles(lat1, lon1, lat2, lon2),
        initial_bearing(lat1, lon1, lat2, lon2),
    ))
}

/// Native map scale at a latitude and zoom.
#[must_use]
pub fn pixels_per_mile(lat: f64, zoom: u8) -> f64 {
    WebMercator::world_size(zoom) / (EARTH_CIRCUMFERENCE_MILES * lat.to_radians().cos())
}

/// One step of the radius → zoom table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomBreakpoint {
    /// Largest radius (inclusive) served by this zoom.
    pub max_radius_miles: f64,
    pub zoom: u8,
}

/// Ordered radius → zoom table.
///
/// The defaults keep a 2×radius wide view inside [`MAX_TILE_GRID`] tiles up to
/// roughly 60° of latitude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoomBreakpoints {
    pub steps: Vec<ZoomBreakpoint>,
    /// Zoom used when the radius is beyond the last step.
    pub beyond_zoom: u8,
}

impl Default for ZoomBreakpoints {
    fn default() -> Self {
        let steps = [
            (6.0, 12),
            (12.0, 11),
            (24.0, 10),
            (48.0, 9),
            (96.0, 8),
            (192.0, 7),
            (384.0, 6),
            (768.0, 5),
        ]
        .into_iter()
        .map(|(max_radius_miles, zoom)| ZoomBreakpoint { max_radius_miles, zoom })
        .collect();

        Self { steps, beyond_zoom: 4 }
    }
}

impl ZoomBreakpoints {
    /// Check ordering so that [`zoom_for_radius`] stays monotonic, and that
    /// no zoom exceeds [`MAX_ZOOM`].
    pub fn validate(&self) -> Result<(), GeoError> {
        if self.steps.is_empty()
            || self.beyond_zoom > MAX_ZOOM
            || self.steps.iter().any(|step| step.zoom > MAX_ZOOM)
        {
            return Err(GeoError::InvalidBreakpoints);
        }
        for pair in self.steps.windows(2) {
            if pair[1].max_radius_miles <= pair[0].max_radius_miles || pair[1].zoom > pair[0].zoom {
                return Err(GeoError::InvalidBreakpoints);
            }
        }
        let last = self.steps[self.steps.len() - 1];
        if !last.max_radius_miles.is_finite() || self.beyond_zoom > last.zoom {
            return Err(GeoError::InvalidBreakpoints);
        }
        Ok(())
    }
}

/// Tile zoom for a display radius.
pub fn zoom_for_radius(radius_miles: f64, breakpoints: &ZoomBreakpoints) -> Result<u8, GeoError> {
    if !radius_miles.is_finite() || radius_miles <= 0.0 {
        return Err(GeoError::InvalidRadius(radius_miles));
    }
    Ok(breakpoints
        .steps
        .iter()
        .find(|step| radius_miles <= step.max_radius_miles)
        .map_or(breakpoints.beyond_zoom, |step| step.zoom))
}

/// Block of tiles covering a viewport, in unwrapped tile coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub zoom: u8,
    pub start_x: i64,
    pub start_y: i64,
    pub cols: u32,
    pub rows: u32,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
impl TileGrid {
    /// Tiles in row-major order as `(col, row, tile_x, tile_y)` with X wrapped
    /// around the antimeridian.
    pub fn tiles(&self) -> impl Iterator<Item = (u32, u32, u32, u32)> + '_ {
        let n = 1_i64 << self.zoom;
        (0..self.rows).flat_map(move |row| {
            (0..self.cols).map(move |col| {
                let x = (self.start_x + i64::from(col)).rem_euclid(n);
                let y = self.start_y + i64::from(row);
                (col, row, x as u32, y as u32)
            })
        })
    }

    /// World pixel of the grid's top-left corner.
    #[must_use]
    pub fn origin_world_pixel(&self) -> (f64, f64) {
        let size = f64::from(TILE_SIZE);
        (self.start_x as f64 * size, self.start_y as f64 * size)
    }
}
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn tile_span(center: f64, half_extent: f64, world_tiles_count: i64, clamp_to_world: bool) -> (i64, u32) {
    let size = f64::from(TILE_SIZE);
    let center_tile = (center / size).floor() as i64;
    let mut start = ((center - half_extent) / size).floor() as i64;
    let mut end = ((center + half_extent) / size).ceil() as i64 - 1;
    end = end.max(start);

    let limit = i64::from(MAX_TILE_GRID).min(world_tiles_count);
    if end - start + 1 > limit {
        start = center_tile - limit / 2;
        end = start + limit - 1;
    }
    if clamp_to_world {
        start = start.max(0);
        end = end.min(world_tiles_count - 1);
    }
    (start, (end - start + 1) as u32)
}

/// The geographic window currently displayed.
///
/// The zoom is derived from the radius when the viewport is built and never
/// changes afterwards; a new center or radius means a new `Viewport`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    center_lat: f64,
    center_lon: f64,
    radius_miles: f64,
    zoom: u8,
}

impl Viewport {
    pub fn new(
        center_lat: f64,
        center_lon: f64,
        radius_miles: f64,
        breakpoints: &ZoomBreakpoints,
    ) -> Result<Self, GeoError> {
        validate_map_position(center_lat, center_lon)?;
        let zoom = zoom_for_radius(radius_miles, breakpoints)?;
        if zoom > MAX_ZOOM {
            return Err(GeoError::InvalidBreakpoints);
        }
        Ok(Self {
            center_lat,
            center_lon,
            radius_miles,
            zoom,
        })
    }

    #[must_use]
    pub fn center_lat(&self) -> f64 {
        self.center_lat
    }

    #[must_use]
    pub fn center_lon(&self) -> f64 {
        self.center_lon
    }

    #[must_use]
    pub fn radius_miles(&self) -> f64 {
        self.radius_miles
    }

    #[must_use]
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// Distance and bearing from the viewport center.
    pub fn distance_and_bearing_to(&self, lat: f64, lon: f64) -> Result<(f64, f64), GeoError> {
        distance_and_bearing(self.center_lat, self.center_lon, lat, lon)
    }

    /// Whether a distance from the center falls inside the radius (inclusive).
    #[must_use]
    pub fn contains_distance(&self, distance_miles: f64) -> bool {
        distance_miles <= self.radius_miles
    }

    #[must_use]
    pub fn center_world_pixel(&self) -> (f64, f64) {
        WebMercator::world_pixel(self.center_lat, self.center_lon, self.zoom)
    }

    /// Size in world pixels of the area shown on a `target` sized display:
    /// 2×radius wide with the display's aspect ratio.
    #[must_use]
    pub fn crop_size(&self, target: (u32, u32)) -> (f64, f64) {
        let width = (2.0 * self.radius_miles * pixels_per_mile(self.center_lat, self.zoom)).max(1.0);
        let height = (width * f64::from(target.1) / f64::from(target.0.max(1))).max(1.0);
        (width, height)
    }

    /// Tiles needed to cover the displayed area, never more than
    /// [`MAX_TILE_GRID`] per axis.
    #[must_use]
    pub fn tile_grid(&self, target: (u32, u32)) -> TileGrid {
        let (cx, cy) = self.center_world_pixel();
        let (width, height) = self.crop_size(target);
        let n = 1_i64 << self.zoom;

        let (start_x, cols) = tile_span(cx, width / 2.0, n, false);
        let (start_y, rows) = tile_span(cy, height / 2.0, n, true);

        TileGrid {
            zoom: self.zoom,
            start_x,
            start_y,
            cols,
            rows,
        }
    }

    /// Display pixel of a position, or `None` when it falls off screen.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn screen_position(&self, lat: f64, lon: f64, target: (u32, u32)) -> Option<(i32, i32)> {
        let (x, y) = self.screen_position_f64(lat, lon, target);
        let (px, py) = (x.floor() as i64, y.floor() as i64);
        if px < 0 || py < 0 || px >= i64::from(target.0) || py >= i64::from(target.1) {
            return None;
        }
        Some((px as i32, py as i32))
    }

    /// Fractional display position, which may lie outside the display.
    #[must_use]
    pub fn screen_position_f64(&self, lat: f64, lon: f64, target: (u32, u32)) -> (f64, f64) {
        let world = WebMercator::world_size(self.zoom);
        let (cx, cy) = self.center_world_pixel();
        let (px, py) = WebMercator::world_pixel(lat, lon, self.zoom);

        let mut dx = px - cx;
        if dx > world / 2.0 {
            dx -= world;
        } else if dx < -world / 2.0 {
            dx += world;
        }
        let dy = py - cy;

        let (crop_width, _) = self.crop_size(target);
        let scale = f64::from(target.0) / crop_width;
        (
            f64::from(target.0) / 2.0 + dx * scale,
            f64::from(target.1) / 2.0 + dy * scale,
        )
    }
}
