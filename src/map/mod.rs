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


//! Map background imagery.
//!
//! Tiles are addressed by [`TileKey`], fetched through a [`TileFetcher`],
//! cached in memory and on disk by [`TileCache`] and stitched into a
//! display-sized background by [`compose`]. [`MapBackground`] keeps that
//! background current for the render loop.

pub mod background;
pub mod cache;
pub mod compose;
pub mod provider;

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use background::MapBackground;
pub use cache::{CacheStats, ComposedMap, TileCache, TileCacheConfig, TileLookup, TileOrigin};
pub use compose::Adjustments;
pub use provider::{HttpTileFetcher, TileFetcher};

/// Tile imagery source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileProvider {
    #[default]
    Osm,
    Carto,
    CartoDark,
    Terrain,
    Satellite,
    /// Self-hosted server, see `MapConfig::custom_server`
    Custom,
}

impl TileProvider {
    /// Short name used in logs and cache file names
    #[must_use]
    pub fn slug(self) -> &'static str {
        match self {
            Self::Osm => "osm",
            Self::Carto => "carto",
            Self::CartoDark => "carto_dark",
            Self::Terrain => "terrain",
            Self::Satellite => "satellite",
            Self::Custom => "custom",
        }
    }

    /// Mirror URLs for a tile, in the order they should be tried.
    ///
    /// Every provider except OSM itself ends with the OSM mirrors so a dead
    /// CDN still yields a usable background.
    #[must_use]
    pub fn urls(self, custom_server: Option<&str>, zoom: u8, x: u32, y: u32) -> Vec<String> {
        let mut urls = match self {
            Self::Osm => Vec::new(),
            Self::Carto => ["a", "b", "c"]
                .iter()
                .map(|s| format!("https://cartodb-basemaps-{s}.global.ssl.fastly.net/light_all/{zoom}/{x}/{y}.png"))
                .collect(),
            Self::CartoDark => {
                let subdomain = ['a', 'b', 'c', 'd'][((x + y) % 4) as usize];
                vec![
                    format!("https://{subdomain}.basemaps.cartocdn.com/dark_all/{zoom}/{x}/{y}.png"),
                    format!("https://cartodb-basemaps-a.global.ssl.fastly.net/dark_all/{zoom}/{x}/{y}.png"),
                ]
            }
            Self::Terrain => ["a", "b"]
                .iter()
                .map(|s| format!("https://stamen-tiles.{s}.ssl.fastly.net/terrain/{zoom}/{x}/{y}.png"))
                .collect(),
            Self::Satellite => ["server", "services"]
                .iter()
                .map(|host| {
                    format!("https://{host}.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile/{zoom}/{y}/{x}")
                })
                .collect(),
            Self::Custom => custom_server
                .map(|base| vec![format!("{}/tile/{zoom}/{x}/{y}.png", base.trim_end_matches('/'))])
                .unwrap_or_default(),
        };
        urls.extend(
            ["a", "b", "c"]
                .iter()
                .map(|s| format!("https://{s}.tile.openstreetmap.org/{zoom}/{x}/{y}.png")),
        );
        urls
    }
}

impl fmt::Display for TileProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Address of one 256px tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub provider: TileProvider,
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    #[must_use]
    pub fn new(provider: TileProvider, zoom: u8, x: u32, y: u32) -> Self {
        Self { provider, zoom, x, y }
    }

    /// Disk cache file name, hashed so custom servers never collide with
    /// public providers
    #[must_use]
    pub fn cache_filename(&self, source_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{source_id}/{}/{}/{}", self.zoom, self.x, self.y).as_bytes());
        format!("{:x}.png", hasher.finalize())
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.provider, self.zoom, self.x, self.y)
    }
}

#[derive(Error, Debug)]
pub enum TileError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned status {0}")]
    Status(u16),

    #[error("server returned {0} instead of an image")]
    NotAnImage(String),

    #[error("tile body too small ({0} bytes)")]
    TooSmall(usize),

    #[error("tile does not decode: {0}")]
    Decode(#[from] image::ImageError),

    #[error("no mirror configured for {0}")]
    NoMirror(TileKey),

    #[error("fetch task failed: {0}")]
    Task(String),
}
