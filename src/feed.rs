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


//! Polling the dump1090/SkyAware `aircraft.json` feed.

use std::time::Duration;

use adsb_feed::{FeedSnapshot, ParseError, Protocol, SkyAwareParser};
use log::debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed returned status {0}")]
    Status(u16),

    #[error("feed document invalid: {0}")]
    Parse(#[from] ParseError),

    #[error("feed returned an empty document")]
    Empty,

    #[error("feed task failed: {0}")]
    Task(String),
}

/// One blocking poll of an aircraft feed
pub trait FeedSource: Send + Sync {
    fn poll(&self) -> Result<FeedSnapshot, FeedError>;
}

/// Fetches `aircraft.json` over HTTP
#[derive(Debug)]
pub struct HttpFeedSource {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpFeedSource {
    pub fn new(url: String, timeout: Duration) -> Result<Self, FeedError> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

impl FeedSource for HttpFeedSource {
    fn poll(&self) -> Result<FeedSnapshot, FeedError> {
        let response = self.client.get(&self.url).send()?;
        if !response.status().is_success() {
            return Err(FeedError::Status(response.status().as_u16()));
        }
        let body = response.bytes()?;
        debug!("Fetched {} bytes from {}", body.len(), self.url);
        decode(&body)
    }
}

/// Parse a whole `aircraft.json` document
pub fn decode(body: &[u8]) -> Result<FeedSnapshot, FeedError> {
    SkyAwareParser::new().parse(body)?.ok_or(FeedError::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_document() {
        let body = br#"{"now": 1700000000.5, "messages": 42, "aircraft": [
            {"hex": "a1b2c3", "flight": "UAL123  ", "lat": 40.1, "lon": -74.1, "alt_baro": 12000},
            {"hex": "d4e5f6"}
        ]}"#;
        let snapshot = decode(body).unwrap();
        assert_eq!(snapshot.records.len(), 2);
        assert_eq!(snapshot.messages, Some(42));
    }

    #[test]
    fn test_blank_body_is_empty() {
        assert!(matches!(decode(b"  \n"), Err(FeedError::Empty)));
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        assert!(matches!(decode(b"<html>"), Err(FeedError::Parse(_))));
    }
}
