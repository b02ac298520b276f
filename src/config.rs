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


//! Application configuration management.
//!
//! This module handles persistent configuration storage using TOML format via
//! confy. Every field has a serde default so partial files load cleanly, and
//! [`AppConfig::validate`] repairs out-of-range values in place, reporting
//! each repair as a [`ConfigIssue`].

use std::fmt;
use std::path::PathBuf;

use adsb_feed::geo::{self, GeoError, ZoomBreakpoints};
use adsb_feed::tracker::TrackerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aircraft::colors::{AltitudeBand, AltitudeColorScale};
use crate::display_mode::DisplayMode;
use crate::map::TileProvider;

/// Name under which confy stores the configuration.
pub const APP_NAME: &str = "airjedi-matrix";

/// Environment variable that overrides the configured `FlightAware` key.
pub const FLIGHTAWARE_API_KEY_ENV: &str = "FLIGHTAWARE_API_KEY";

/// Default SkyAware endpoint of a local dump1090 install
pub const DEFAULT_FEED_URL: &str = "http://localhost:8080/data/aircraft.json";

/// Fatal configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] confy::ConfyError),

    #[error("invalid map center: {0}")]
    InvalidCenter(#[source] GeoError),
}

/// A recoverable problem: the offending value was replaced by its default.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigIssue {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Where the map is centered and how far it reaches
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LocationConfig {
    #[serde(default = "default_center_lat")]
    pub center_lat: f64,

    #[serde(default = "default_center_lon")]
    pub center_lon: f64,

    /// Display radius in statute miles
    #[serde(default = "default_radius_miles")]
    pub radius_miles: f64,
}

/// Aircraft feed polling
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FeedConfig {
    /// SkyAware `aircraft.json` URL
    #[serde(default = "default_feed_url")]
    pub url: String,

    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Seconds without a report before an aircraft is dropped
    #[serde(default = "default_aircraft_timeout_secs")]
    pub aircraft_timeout_secs: i64,
}

/// Trail retention
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TrailConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_trail_max_points")]
    pub max_points: usize,

    #[serde(default = "default_trail_max_age_secs")]
    pub max_age_secs: i64,
}

/// Map background imagery
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MapConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub provider: TileProvider,

    /// Base URL of a self-hosted tile server, used by the `custom` provider
    #[serde(default)]
    pub custom_server: Option<String>,

    /// Overrides the platform cache directory
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Tiles older than this are refreshed on access; disk files older than
    /// twice this are pruned
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: u64,

    #[serde(default = "default_memory_cache_tiles")]
    pub memory_cache_tiles: usize,

    #[serde(default = "default_disk_cache_max_mb")]
    pub disk_cache_max_mb: u64,

    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// 0.0 leaves the map untouched, 1.0 fades it to black
    #[serde(default = "default_fade_intensity")]
    pub fade_intensity: f32,

    #[serde(default = "default_one")]
    pub brightness: f32,

    #[serde(default = "default_one")]
    pub contrast: f32,

    #[serde(default = "default_one")]
    pub saturation: f32,

    #[serde(default)]
    pub zoom_breakpoints: ZoomBreakpoints,
}

/// Proximity alert thresholds
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProximityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_alert_distance_miles")]
    pub distance_miles: f64,

    /// Seconds the alert lingers after the aircraft moves away
    #[serde(default = "default_alert_dwell_secs")]
    pub dwell_secs: i64,
}

/// Output display
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DisplayConfig {
    #[serde(default)]
    pub mode: DisplayMode,

    #[serde(default = "default_display_width")]
    pub width: u32,

    #[serde(default = "default_display_height")]
    pub height: u32,

    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    /// Seconds each statistic stays on screen
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,

    #[serde(default = "AltitudeColorScale::default_bands")]
    pub altitude_bands: Vec<AltitudeBand>,
}

/// `FlightAware` `AeroAPI` enrichment and its budget
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FlightPlanConfig {
    #[serde(default)]
    pub enabled: bool,

    /// API key (optional, env var takes precedence)
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_max_calls_per_hour")]
    pub max_calls_per_hour: u32,

    #[serde(default = "default_daily_budget")]
    pub daily_budget: u32,

    /// Dollars
    #[serde(default = "default_monthly_budget")]
    pub monthly_budget: f64,

    /// Dollars per call
    #[serde(default = "default_cost_per_call")]
    pub cost_per_call: f64,

    #[serde(default = "default_flight_plan_cache_ttl_hours")]
    pub cache_ttl_hours: u64,

    #[serde(default = "default_min_callsign_length")]
    pub min_callsign_length: usize,

    /// Lookups started per background drain
    #[serde(default = "default_max_calls_per_drain")]
    pub max_calls_per_drain: usize,

    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,
}

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    /// Configuration schema version for migrations
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    #[serde(default)]
    pub location: LocationConfig,

    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub trails: TrailConfig,

    #[serde(default)]
    pub map: MapConfig,

    #[serde(default)]
    pub proximity: ProximityConfig,

    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub flight_plan: FlightPlanConfig,

    /// ADS-B Exchange style aircraft database (JSON lines, optionally gzip)
    #[serde(default)]
    pub aircraft_db_path: Option<PathBuf>,
}

// Default value functions for serde
fn default_config_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_one() -> f32 {
    1.0
}

fn default_center_lat() -> f64 {
    27.9506
}

fn default_center_lon() -> f64 {
    -82.4572
}

fn default_radius_miles() -> f64 {
    10.0
}

fn default_feed_url() -> String {
    DEFAULT_FEED_URL.to_string()
}

fn default_update_interval_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_aircraft_timeout_secs() -> i64 {
    60
}

fn default_trail_max_points() -> usize {
    10
}

fn default_trail_max_age_secs() -> i64 {
    300
}

fn default_cache_ttl_hours() -> u64 {
    8760
}

fn default_memory_cache_tiles() -> usize {
    256
}

fn default_disk_cache_max_mb() -> u64 {
    512
}

fn default_max_concurrent_fetches() -> usize {
    4
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_fade_intensity() -> f32 {
    0.3
}

fn default_alert_distance_miles() -> f64 {
    0.1
}

fn default_alert_dwell_secs() -> i64 {
    30
}

fn default_display_width() -> u32 {
    128
}

fn default_display_height() -> u32 {
    32
}

fn default_frame_interval_ms() -> u64 {
    1000
}

fn default_stats_interval_secs() -> u64 {
    10
}

fn default_max_calls_per_hour() -> u32 {
    20
}

fn default_daily_budget() -> u32 {
    60
}

fn default_monthly_budget() -> f64 {
    10.0
}

fn default_cost_per_call() -> f64 {
    0.005
}

fn default_flight_plan_cache_ttl_hours() -> u64 {
    12
}

fn default_min_callsign_length() -> usize {
    4
}

fn default_max_calls_per_drain() -> usize {
    10
}

fn default_drain_interval_secs() -> u64 {
    30
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            center_lat: default_center_lat(),
            center_lon: default_center_lon(),
            radius_miles: default_radius_miles(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            update_interval_secs: default_update_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            aircraft_timeout_secs: default_aircraft_timeout_secs(),
        }
    }
}

impl Default for TrailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_points: default_trail_max_points(),
            max_age_secs: default_trail_max_age_secs(),
        }
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: TileProvider::default(),
            custom_server: None,
            cache_dir: None,
            cache_ttl_hours: default_cache_ttl_hours(),
            memory_cache_tiles: default_memory_cache_tiles(),
            disk_cache_max_mb: default_disk_cache_max_mb(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            fade_intensity: default_fade_intensity(),
            brightness: 1.0,
            contrast: 1.0,
            saturation: 1.0,
            zoom_breakpoints: ZoomBreakpoints::default(),
        }
    }
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            distance_miles: default_alert_distance_miles(),
            dwell_secs: default_alert_dwell_secs(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            mode: DisplayMode::default(),
            width: default_display_width(),
            height: default_display_height(),
            frame_interval_ms: default_frame_interval_ms(),
            stats_interval_secs: default_stats_interval_secs(),
            altitude_bands: AltitudeColorScale::default_bands(),
        }
    }
}

impl Default for FlightPlanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            max_calls_per_hour: default_max_calls_per_hour(),
            daily_budget: default_daily_budget(),
            monthly_budget: default_monthly_budget(),
            cost_per_call: default_cost_per_call(),
            cache_ttl_hours: default_flight_plan_cache_ttl_hours(),
            min_callsign_length: default_min_callsign_length(),
            max_calls_per_drain: default_max_calls_per_drain(),
            drain_interval_secs: default_drain_interval_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            location: LocationConfig::default(),
            feed: FeedConfig::default(),
            trails: TrailConfig::default(),
            map: MapConfig::default(),
            proximity: ProximityConfig::default(),
            display: DisplayConfig::default(),
            flight_plan: FlightPlanConfig::default(),
            aircraft_db_path: None,
        }
    }
}

/// Replaces `value` with `default` when `valid` rejects it.
fn repair<T: fmt::Debug>(
    issues: &mut Vec<ConfigIssue>,
    field: &'static str,
    value: &mut T,
    default: T,
    valid: impl FnOnce(&T) -> bool,
) {
    if !valid(value) {
        issues.push(ConfigIssue {
            field,
            message: format!("invalid value {value:?}, using default {default:?}"),
        });
        *value = default;
    }
}

fn positive_f64(v: &f64) -> bool {
    v.is_finite() && *v > 0.0
}

fn unit_f32(v: &f32) -> bool {
    v.is_finite() && (0.0..=1.0).contains(v)
}

fn enhancement_f32(v: &f32) -> bool {
    v.is_finite() && (0.0..=4.0).contains(v)
}

impl AppConfig {
    /// Load configuration from disk, creating it with defaults if missing
    pub fn load() -> Result<Self, ConfigError> {
        Ok(confy::load(APP_NAME, "config")?)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<PathBuf, ConfigError> {
        Ok(confy::get_configuration_file_path(APP_NAME, "config")?)
    }

    /// Check every section, substituting defaults for invalid values.
    ///
    /// An unusable map center cannot be repaired and is returned as an error.
    pub fn validate(&mut self) -> Result<Vec<ConfigIssue>, ConfigError> {
        geo::validate_map_position(self.location.center_lat, self.location.center_lon)
            .map_err(ConfigError::InvalidCenter)?;

        let mut issues = Vec::new();

        repair(&mut issues, "location.radius_miles", &mut self.location.radius_miles, default_radius_miles(), positive_f64);

        let feed = &mut self.feed;
        repair(&mut issues, "feed.url", &mut feed.url, default_feed_url(), |u| {
            u.starts_with("http://") || u.starts_with("https://")
        });
        repair(&mut issues, "feed.update_interval_secs", &mut feed.update_interval_secs, default_update_interval_secs(), |v| *v > 0);
        repair(&mut issues, "feed.request_timeout_secs", &mut feed.request_timeout_secs, default_request_timeout_secs(), |v| *v > 0);
        repair(&mut issues, "feed.aircraft_timeout_secs", &mut feed.aircraft_timeout_secs, default_aircraft_timeout_secs(), |v| *v > 0);

        repair(&mut issues, "trails.max_age_secs", &mut self.trails.max_age_secs, default_trail_max_age_secs(), |v| *v > 0);

        let map = &mut self.map;
        repair(&mut issues, "map.cache_ttl_hours", &mut map.cache_ttl_hours, default_cache_ttl_hours(), |v| *v > 0);
        repair(&mut issues, "map.memory_cache_tiles", &mut map.memory_cache_tiles, default_memory_cache_tiles(), |v| *v > 0);
        repair(&mut issues, "map.disk_cache_max_mb", &mut map.disk_cache_max_mb, default_disk_cache_max_mb(), |v| *v > 0);
        repair(&mut issues, "map.max_concurrent_fetches", &mut map.max_concurrent_fetches, default_max_concurrent_fetches(), |v| *v > 0);
        repair(&mut issues, "map.fetch_timeout_secs", &mut map.fetch_timeout_secs, default_fetch_timeout_secs(), |v| *v > 0);
        repair(&mut issues, "map.fade_intensity", &mut map.fade_intensity, default_fade_intensity(), unit_f32);
        repair(&mut issues, "map.brightness", &mut map.brightness, 1.0, enhancement_f32);
        repair(&mut issues, "map.contrast", &mut map.contrast, 1.0, enhancement_f32);
        repair(&mut issues, "map.saturation", &mut map.saturation, 1.0, enhancement_f32);
        repair(&mut issues, "map.zoom_breakpoints", &mut map.zoom_breakpoints, ZoomBreakpoints::default(), |b| b.validate().is_ok());
        if map.provider == TileProvider::Custom && map.custom_server.as_deref().map_or(true, |s| s.trim().is_empty()) {
            issues.push(ConfigIssue {
                field: "map.custom_server",
                message: "custom provider needs a server URL, using OpenStreetMap".to_string(),
            });
            map.provider = TileProvider::Osm;
        }

        repair(&mut issues, "proximity.distance_miles", &mut self.proximity.distance_miles, default_alert_distance_miles(), positive_f64);
        repair(&mut issues, "proximity.dwell_secs", &mut self.proximity.dwell_secs, default_alert_dwell_secs(), |v| *v >= 0);

        let display = &mut self.display;
        repair(&mut issues, "display.width", &mut display.width, default_display_width(), |v| (1..=4096).contains(v));
        repair(&mut issues, "display.height", &mut display.height, default_display_height(), |v| (1..=4096).contains(v));
        repair(&mut issues, "display.frame_interval_ms", &mut display.frame_interval_ms, default_frame_interval_ms(), |v| *v > 0);
        repair(&mut issues, "display.stats_interval_secs", &mut display.stats_interval_secs, default_stats_interval_secs(), |v| *v > 0);
        repair(&mut issues, "display.altitude_bands", &mut display.altitude_bands, AltitudeColorScale::default_bands(), |b| {
            AltitudeColorScale::new(b.clone()).is_ok()
        });

        let plan = &mut self.flight_plan;
        repair(&mut issues, "flight_plan.monthly_budget", &mut plan.monthly_budget, default_monthly_budget(), |v| v.is_finite() && *v >= 0.0);
        repair(&mut issues, "flight_plan.cost_per_call", &mut plan.cost_per_call, default_cost_per_call(), |v| v.is_finite() && *v >= 0.0);
        repair(&mut issues, "flight_plan.cache_ttl_hours", &mut plan.cache_ttl_hours, default_flight_plan_cache_ttl_hours(), |v| *v > 0);
        repair(&mut issues, "flight_plan.drain_interval_secs", &mut plan.drain_interval_secs, default_drain_interval_secs(), |v| *v > 0);
        if plan.enabled && self.flightaware_api_key().is_none() {
            issues.push(ConfigIssue {
                field: "flight_plan.api_key",
                message: format!("no API key configured or in {FLIGHTAWARE_API_KEY_ENV}, flight plans disabled"),
            });
            self.flight_plan.enabled = false;
        }

        Ok(issues)
    }

    /// `FlightAware` API key, preferring the environment over the file
    #[must_use]
    pub fn flightaware_api_key(&self) -> Option<String> {
        std::env::var(FLIGHTAWARE_API_KEY_ENV)
            .ok()
            .or_else(|| self.flight_plan.api_key.clone())
            .filter(|key| !key.trim().is_empty())
    }

    /// Tile cache directory, defaulting to the platform cache dir
    #[must_use]
    pub fn tile_cache_dir(&self) -> PathBuf {
        self.map.cache_dir.clone().unwrap_or_else(|| {
            let mut path = dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".cache"));
            path.push(APP_NAME);
            path.push("tiles");
            path
        })
    }

    /// Tracker settings derived from the feed and trail sections
    #[must_use]
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            aircraft_timeout_secs: self.feed.aircraft_timeout_secs,
            trail_max_points: if self.trails.enabled { self.trails.max_points } else { 0 },
            trail_max_age_secs: self.trails.max_age_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let mut config = AppConfig::default();
        let issues = config.validate().unwrap();
        assert!(issues.is_empty(), "unexpected issues: {issues:?}");
        assert_eq!(config.display.mode, DisplayMode::Auto);
        assert_eq!(config.proximity.dwell_secs, 30);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml_from_str(
            r#"
            [location]
            radius_miles = 25.0

            [display]
            mode = "map"
            "#,
        );
        assert_eq!(config.location.radius_miles, 25.0);
        assert_eq!(config.location.center_lat, default_center_lat());
        assert_eq!(config.display.mode, DisplayMode::Map);
        assert_eq!(config.feed.update_interval_secs, 5);
        assert_eq!(config.map.zoom_breakpoints, ZoomBreakpoints::default());
    }

    fn toml_from_str(text: &str) -> AppConfig {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, text).unwrap();
        confy::load_path(&path).unwrap()
    }

    #[test]
    fn test_invalid_values_are_replaced() {
        let mut config = AppConfig::default();
        config.location.radius_miles = -3.0;
        config.map.fade_intensity = 2.0;
        config.display.altitude_bands.clear();
        config.map.zoom_breakpoints.steps.reverse();

        let issues = config.validate().unwrap();
        let fields: Vec<_> = issues.iter().map(|i| i.field).collect();
        assert!(fields.contains(&"location.radius_miles"));
        assert!(fields.contains(&"map.fade_intensity"));
        assert!(fields.contains(&"display.altitude_bands"));
        assert!(fields.contains(&"map.zoom_breakpoints"));
        assert_eq!(config.location.radius_miles, 10.0);
        assert_eq!(config.display.altitude_bands, AltitudeColorScale::default_bands());
    }

    #[test]
    fn test_zoom_beyond_tile_servers_is_replaced() {
        let mut config = AppConfig::default();
        config.map.zoom_breakpoints.steps[0].zoom = 64;

        let issues = config.validate().unwrap();
        assert!(issues.iter().any(|i| i.field == "map.zoom_breakpoints"));
        assert_eq!(config.map.zoom_breakpoints, ZoomBreakpoints::default());
    }

    #[test]
    fn test_invalid_center_is_fatal() {
        let mut config = AppConfig::default();
        config.location.center_lat = f64::NAN;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCenter(_))));
    }

    #[test]
    fn test_custom_provider_without_server_falls_back() {
        let mut config = AppConfig::default();
        config.map.provider = TileProvider::Custom;
        let issues = config.validate().unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(config.map.provider, TileProvider::Osm);
    }
}
