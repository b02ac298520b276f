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


use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use adsb_feed::geo::Viewport;
use clap::Parser;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

mod aircraft;
mod alert;
mod config;
mod display_mode;
mod feed;
mod map;
mod pipeline;
mod render;
mod sink;

use aircraft::flight_plan::{AeroApiClient, FlightPlanSettings, RateLimits};
use aircraft::{AircraftDatabase, AltitudeColorScale, FlightPlanService};
use alert::ProximityAlertEngine;
use config::AppConfig;
use display_mode::DisplayMode;
use feed::HttpFeedSource;
use map::{Adjustments, HttpTileFetcher, MapBackground, TileCache, TileCacheConfig};
use pipeline::{Pipeline, PipelineSettings};
use render::RenderCompositor;
use sink::PngFileSink;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Seconds before an incomplete map background is composed again
const MAP_RETRY_SECS: u64 = 30;

/// Live aircraft map rendered to PNG frames
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Map center latitude (overrides config)
    #[arg(long, allow_negative_numbers = true)]
    lat: Option<f64>,

    /// Map center longitude (overrides config)
    #[arg(long, allow_negative_numbers = true)]
    lon: Option<f64>,

    /// Display radius in miles (overrides config)
    #[arg(long)]
    radius: Option<f64>,

    /// Display mode (overrides config)
    #[arg(long, value_enum)]
    mode: Option<DisplayMode>,

    /// Frame output path
    #[arg(long, short, default_value = "frame.png")]
    output: PathBuf,

    /// Write every frame to its own numbered file
    #[arg(long)]
    numbered: bool,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Print the configuration file path and exit
    #[arg(long)]
    config_path: bool,
}

fn tile_cache(config: &AppConfig) -> Result<Arc<TileCache>, map::TileError> {
    let map = &config.map;
    let fetcher = HttpTileFetcher::new(map.custom_server.clone(), Duration::from_secs(map.fetch_timeout_secs))?;
    let ttl = Duration::from_secs(map.cache_ttl_hours * 3600);
    let cache = TileCache::new(
        TileCacheConfig {
            provider: map.provider,
            custom_server: map.custom_server.clone(),
            cache_dir: config.tile_cache_dir(),
            stale_after: ttl,
            disk_max_age: ttl * 2,
            disk_max_bytes: map.disk_cache_max_mb * 1024 * 1024,
            memory_capacity: map.memory_cache_tiles,
            max_concurrent_fetches: map.max_concurrent_fetches,
            adjustments: Adjustments {
                fade_intensity: map.fade_intensity,
                brightness: map.brightness,
                contrast: map.contrast,
                saturation: map.saturation,
            },
        },
        Arc::new(fetcher),
    );
    match cache.prune_disk() {
        Ok(report) if report.removed > 0 => {
            info!("Pruned {} cached tiles, {} bytes remain", report.removed, report.remaining_bytes);
        }
        Ok(_) => {}
        Err(e) => warn!("Tile cache prune failed: {e}"),
    }
    Ok(Arc::new(cache))
}

fn flight_plans(config: &AppConfig) -> Option<Arc<FlightPlanService>> {
    let plan = &config.flight_plan;
    if !plan.enabled {
        return None;
    }
    let api_key = config.flightaware_api_key()?;
    let client = match AeroApiClient::new(api_key, Duration::from_secs(config.feed.request_timeout_secs)) {
        Ok(client) => client,
        Err(e) => {
            warn!("Flight plan lookups disabled: {e}");
            return None;
        }
    };
    let settings = FlightPlanSettings {
        limits: RateLimits {
            max_calls_per_hour: plan.max_calls_per_hour,
            daily_budget: plan.daily_budget,
            monthly_budget: plan.monthly_budget,
            cost_per_call: plan.cost_per_call,
        },
        cache_ttl: chrono::Duration::hours(i64::try_from(plan.cache_ttl_hours).unwrap_or(24)),
        min_callsign_length: plan.min_callsign_length,
        max_calls_per_drain: plan.max_calls_per_drain,
    };
    info!("Flight plan lookups enabled, {} calls/hour", plan.max_calls_per_hour);
    Some(Arc::new(FlightPlanService::new(Arc::new(client), settings)))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.config_path {
        println!("{}", AppConfig::get_config_path()?.display());
        return Ok(());
    }

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {e}");
        AppConfig::default()
    });
    if let Some(lat) = args.lat {
        config.location.center_lat = lat;
    }
    if let Some(lon) = args.lon {
        config.location.center_lon = lon;
    }
    if let Some(radius) = args.radius {
        config.location.radius_miles = radius;
    }
    if let Some(mode) = args.mode {
        config.display.mode = mode;
    }
    for issue in config.validate()? {
        warn!("Config {issue}");
    }

    let location = &config.location;
    let viewport = Viewport::new(
        location.center_lat,
        location.center_lon,
        location.radius_miles,
        &config.map.zoom_breakpoints,
    )?;
    info!(
        "Centered on {:.4}, {:.4} with a {:.1} mi radius at zoom {}",
        viewport.center_lat(),
        viewport.center_lon(),
        viewport.radius_miles(),
        viewport.zoom()
    );

    let display = &config.display;
    let target = (display.width, display.height);
    let colors = AltitudeColorScale::new(display.altitude_bands.clone())?;
    let proximity = &config.proximity;
    let alert = ProximityAlertEngine::new(
        proximity.enabled,
        proximity.distance_miles,
        chrono::Duration::seconds(proximity.dwell_secs),
    );
    let feed = HttpFeedSource::new(config.feed.url.clone(), Duration::from_secs(config.feed.request_timeout_secs))?;
    let settings = PipelineSettings {
        display_mode: display.mode,
        target,
        update_interval: Duration::from_secs(config.feed.update_interval_secs),
        frame_interval: Duration::from_millis(display.frame_interval_ms),
        drain_interval: Duration::from_secs(config.flight_plan.drain_interval_secs),
        max_frames: args.frames,
    };

    let mut pipeline = Pipeline::new(
        settings,
        viewport,
        config.tracker_config(),
        alert,
        Arc::new(feed),
        RenderCompositor::new(colors, display.stats_interval_secs),
    );
    let mut tiles = None;
    if config.map.enabled {
        match tile_cache(&config) {
            Ok(cache) => {
                info!("Map tiles from {} cached in {}", cache.provider(), config.tile_cache_dir().display());
                let background = MapBackground::new(Arc::clone(&cache), target, Duration::from_secs(MAP_RETRY_SECS));
                pipeline = pipeline.with_map(Arc::new(background));
                tiles = Some(cache);
            }
            Err(e) => warn!("Map background disabled: {e}"),
        }
    }
    if let Some(path) = &config.aircraft_db_path {
        match AircraftDatabase::load(path) {
            Ok(database) => {
                info!("Loaded {} aircraft from {}", database.len(), path.display());
                pipeline = pipeline.with_database(Arc::new(database));
            }
            Err(e) => warn!("Aircraft database unavailable: {e}"),
        }
    }
    if let Some(service) = flight_plans(&config) {
        pipeline = pipeline.with_flight_plans(service);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            shutdown.cancel();
        }
    });

    let sink = PngFileSink::new(args.output, args.numbered);
    let result = runtime.block_on(Arc::new(pipeline).run(Box::new(sink), cancel));
    if let Some(cache) = tiles {
        let stats = cache.stats();
        info!(
            "Tile cache: {} hits, {} misses, {} fetches, {} failures, {} tiles in memory",
            stats.hits,
            stats.misses,
            stats.fetches,
            stats.failures,
            cache.memory_len()
        );
    }
    match result {
        Ok(frames) => {
            info!("Presented {frames} frames");
            Ok(())
        }
        Err(e) => {
            error!("Frame output failed: {e}");
            Err(e.into())
        }
    }
}
