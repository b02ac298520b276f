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


//! dump1090 / SkyAware `aircraft.json` parser.
//!
//! Document format:
//! ```text
//! {"now": 1700000000.1, "messages": 1234, "aircraft": [{"hex": "a1b2c3", "flight": "UAL123  ",
//!   "lat": 27.9, "lon": -82.4, "alt_baro": 3500, "gs": 210.4, "track": 92.1, "seen": 0.4}]}
//! ```

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::{ParseError, Protocol};

/// Altitude as reported by the decoder: feet, or the string `"ground"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawAltitude {
    Feet(f64),
    Text(String),
}

/// One aircraft entry exactly as it appears in the feed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawAircraft {
    pub hex: Option<String>,
    pub flight: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt_baro: Option<RawAltitude>,
    pub alt_geom: Option<RawAltitude>,
    pub gs: Option<f64>,
    pub track: Option<f64>,
    pub true_heading: Option<f64>,
    /// Seconds since any message was received from this aircraft.
    pub seen: Option<f64>,
    /// Registration, when the decoder has a database.
    pub r: Option<String>,
    /// ICAO type designator, when the decoder has a database.
    pub t: Option<String>,
}

/// A feed entry that may or may not have decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    Aircraft(RawAircraft),
    Undecodable(String),
}

/// One poll of the feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedSnapshot {
    /// Decoder clock at the time the document was written.
    pub now: Option<DateTime<Utc>>,
    /// Total messages the decoder has processed.
    pub messages: Option<u64>,
    pub records: Vec<RawRecord>,
}

impl FeedSnapshot {
    /// Build a snapshot from already decoded entries.
    #[must_use]
    pub fn from_aircraft(aircraft: impl IntoIterator<Item = RawAircraft>) -> Self {
        Self {
            now: None,
            messages: None,
            records: aircraft.into_iter().map(RawRecord::Aircraft).collect(),
        }
    }
}

/// Parser for SkyAware JSON documents.
#[derive(Debug, Default)]
pub struct SkyAwareParser;

impl SkyAwareParser {
    /// Create a new SkyAware parser.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[allow(clippy::cast_possible_truncation)]
fn decoder_time(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let seconds = value?.as_f64()?;
    if !seconds.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((seconds * 1000.0).round() as i64)
}

impl Protocol for SkyAwareParser {
    type Message = FeedSnapshot;
    type Error = ParseError;

    fn parse(&mut self, input: &[u8]) -> Result<Option<FeedSnapshot>, ParseError> {
        if input.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let document: Value = serde_json::from_slice(input)
            .map_err(|e| ParseError::InvalidFormat(e.to_string()))?;

        let entries = document
            .get("aircraft")
            .and_then(Value::as_array)
            .ok_or(ParseError::MissingField("aircraft"))?;

        let records = entries
            .iter()
            .map(|entry| match RawAircraft::deserialize(entry) {
                Ok(aircraft) => RawRecord::Aircraft(aircraft),
                Err(e) => RawRecord::Undecodable(e.to_string()),
            })
            .collect();

        Ok(Some(FeedSnapshot {
            now: decoder_time(document.get("now")),
            messages: document.get("messages").and_then(Value::as_u64),
            records,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FeedRecord;

    #[test]
    fn test_parse_document() {
        let mut parser = SkyAwareParser::new();
        let doc = br#"{"now": 1700000000.5, "messages": 42, "aircraft": [
            {"hex": "a1b2c3", "flight": "UAL123  ", "lat": 27.9, "lon": -82.4, "alt_baro": 3500, "gs": 210.4, "track": 92.1},
            {"hex": "abcdef", "alt_baro": "ground"}
        ]}"#;

        let snapshot = parser.parse(doc).unwrap().unwrap();
        assert_eq!(snapshot.messages, Some(42));
        assert_eq!(
            snapshot.now.map(|t| t.timestamp_millis()),
            Some(1_700_000_000_500)
        );
        assert_eq!(snapshot.records.len(), 2);

        let record = FeedRecord::try_from(&snapshot.records[0]).unwrap();
        assert_eq!(record.icao, "A1B2C3");
        assert_eq!(record.altitude, Some(3500));
        assert!(FeedRecord::try_from(&snapshot.records[1]).is_err());
    }

    #[test]
    fn test_bad_entry_does_not_spoil_document() {
        let mut parser = SkyAwareParser::new();
        let doc = br#"{"aircraft": [{"hex": "a1b2c3", "lat": "north", "lon": 1.0}, {"hex": "c0ffee", "lat": 1.0, "lon": 1.0}]}"#;

        let snapshot = parser.parse(doc).unwrap().unwrap();
        assert!(matches!(snapshot.records[0], RawRecord::Undecodable(_)));
        assert!(matches!(snapshot.records[1], RawRecord::Aircraft(_)));
        assert_eq!(snapshot.now, None);
    }

    #[test]
    fn test_invalid_documents() {
        let mut parser = SkyAwareParser::new();
        assert!(matches!(parser.parse(b"not json"), Err(ParseError::InvalidFormat(_))));
        assert!(matches!(parser.parse(br#"{"now": 1}"#), Err(ParseError::MissingField("aircraft"))));
        assert!(parser.parse(b"  \n").unwrap().is_none());
    }
}
