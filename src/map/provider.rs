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


use std::time::Duration;

use log::debug;
use reqwest::header::CONTENT_TYPE;

use super::{TileError, TileKey};

/// Error pages and blank responses are smaller than any real tile
const MIN_TILE_BYTES: usize = 2000;

/// Blocking tile download, run on the blocking pool by the cache
pub trait TileFetcher: Send + Sync {
    fn fetch(&self, key: &TileKey) -> Result<Vec<u8>, TileError>;
}

/// Fetches tiles over HTTP, trying each provider mirror in turn
pub struct HttpTileFetcher {
    client: reqwest::blocking::Client,
    custom_server: Option<String>,
}

impl HttpTileFetcher {
    pub fn new(custom_server: Option<String>, timeout: Duration) -> Result<Self, TileError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, custom_server })
    }

    fn fetch_url(&self, url: &str) -> Result<Vec<u8>, TileError> {
        let response = self.client.get(url).send()?;
        if !response.status().is_success() {
            return Err(TileError::Status(response.status().as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if content_type.starts_with("text/") {
            return Err(TileError::NotAnImage(content_type));
        }

        let bytes = response.bytes()?;
        if bytes.len() < MIN_TILE_BYTES {
            return Err(TileError::TooSmall(bytes.len()));
        }
        Ok(bytes.to_vec())
    }
}

impl TileFetcher for HttpTileFetcher {
    fn fetch(&self, key: &TileKey) -> Result<Vec<u8>, TileError> {
        let mut last_error = TileError::NoMirror(*key);
        for url in key.provider.urls(self.custom_server.as_deref(), key.zoom, key.x, key.y) {
            match self.fetch_url(&url) {
                Ok(bytes) => {
                    debug!("Fetched tile {key} from {url} ({} bytes)", bytes.len());
                    return Ok(bytes);
                }
                Err(e) => {
                    debug!("Tile mirror {url} failed: {e}");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}
