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


//! Core data layer for a live aircraft map.
//!
//! This library holds everything about *what* to draw that must be identical
//! on every display: projection, feed parsing and aircraft state. It performs
//! no I/O. It is organised in layers that can be used independently:
//!
//! - **Geo layer**: Web Mercator projection, tile grids, zoom selection and
//!   great-circle distance/bearing
//! - **Protocol layer**: SkyAware `aircraft.json` parsing into validated records
//! - **Tracker layer**: Aircraft state, distance filtering, trails and highlights
//!
//! # Example
//!
//! ```
//! use adsb_feed::geo::{Viewport, ZoomBreakpoints};
//! use adsb_feed::protocol::{Protocol, SkyAwareParser};
//! use adsb_feed::tracker::{AircraftTracker, TrackerConfig};
//! use chrono::Utc;
//!
//! let viewport = Viewport::new(27.9506, -82.4572, 10.0, &ZoomBreakpoints::default()).unwrap();
//! let mut parser = SkyAwareParser::new();
//! let doc = br#"{"now": 1700000000, "aircraft": [{"hex": "a1b2c3", "lat": 27.96, "lon": -82.45}]}"#;
//!
//! let mut tracker = AircraftTracker::new(TrackerConfig::default());
//! if let Ok(Some(snapshot)) = parser.parse(doc) {
//!     let report = tracker.ingest(&snapshot, &viewport, Utc::now());
//!     println!("Tracking {} aircraft", report.tracked);
//! }
//! ```

pub mod geo;
pub mod protocol;
pub mod tracker;

pub use geo::{GeoError, TileGrid, TilePoint, Viewport, ZoomBreakpoint, ZoomBreakpoints};
pub use protocol::{FeedRecord, FeedSnapshot, ParseError, Protocol, RecordError, SkyAwareParser};
pub use tracker::{
    AircraftState, AircraftTracker, Highlights, IngestReport, PositionPoint, TrackerConfig,
    TrackerSnapshot, Trail,
};
