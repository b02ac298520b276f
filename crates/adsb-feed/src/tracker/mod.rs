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


//! Aircraft tracking and state management.
//!
//! This module maintains aircraft state from feed snapshots. It filters by
//! distance from the viewport center, keeps a bounded position trail per
//! aircraft and derives the closest/fastest/highest aircraft.
//!
//! The tracker performs no I/O and never reads the clock: every operation
//! takes `now` from the caller so results are reproducible.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use log::debug;

use crate::geo::Viewport;
use crate::protocol::{FeedRecord, FeedSnapshot};

/// A single position sample with timestamp and altitude.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionPoint {
    pub lat: f64,
    pub lon: f64,
    pub altitude: Option<i32>,
    pub timestamp: DateTime<Utc>,
}

/// Recent positions of one aircraft, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trail {
    points: VecDeque<PositionPoint>,
}

impl Trail {
    fn push(&mut self, point: PositionPoint, max_points: usize) {
        self.points.push_back(point);
        while self.points.len() > max_points {
            self.points.pop_front();
        }
    }

    fn prune(&mut self, now: DateTime<Utc>, max_age: Duration) {
        while self
            .points
            .front()
            .is_some_and(|point| now - point.timestamp > max_age)
        {
            self.points.pop_front();
        }
    }

    /// Points from oldest to newest.
    pub fn points(&self) -> impl ExactSizeIterator<Item = &PositionPoint> + DoubleEndedIterator {
        self.points.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Current state of a tracked aircraft.
#[derive(Debug, Clone, PartialEq)]
pub struct AircraftState {
    /// ICAO 24-bit address (hex string).
    pub icao: String,
    pub callsign: Option<String>,
    pub registration: Option<String>,
    /// ICAO type designator reported by the feed.
    pub type_code: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude in feet.
    pub altitude: Option<i32>,
    /// Ground speed in knots.
    pub speed: Option<f64>,
    /// Track angle in degrees (0-360, north = 0).
    pub heading: Option<f64>,
    /// Distance from the viewport center in statute miles.
    pub distance_miles: f64,
    /// Bearing from the viewport center in degrees.
    pub bearing: f64,
    /// Timestamp of the last snapshot that contained this aircraft.
    pub last_seen: DateTime<Utc>,
    /// Position history for trail rendering.
    pub trail: Trail,
}

impl AircraftState {
    fn new(record: FeedRecord, distance_miles: f64, bearing: f64, now: DateTime<Utc>) -> Self {
        Self {
            icao: record.icao,
            callsign: record.callsign,
            registration: record.registration,
            type_code: record.type_code,
            latitude: record.latitude,
            longitude: record.longitude,
            altitude: record.altitude,
            speed: record.ground_speed,
            heading: record.heading,
            distance_miles,
            bearing,
            last_seen: now,
            trail: Trail::default(),
        }
    }

    fn update(
        &mut self,
        record: FeedRecord,
        distance_miles: f64,
        bearing: f64,
        now: DateTime<Utc>,
        max_trail_points: usize,
    ) {
        self.latitude = record.latitude;
        self.longitude = record.longitude;
        self.distance_miles = distance_miles;
        self.bearing = bearing;
        self.last_seen = now;

        // Fields missing from this report keep their last known value
        if record.callsign.is_some() {
            self.callsign = record.callsign;
        }
        if record.registration.is_some() {
            self.registration = record.registration;
        }
        if record.type_code.is_some() {
            self.type_code = record.type_code;
        }
        if record.altitude.is_some() {
            self.altitude = record.altitude;
        }
        if record.ground_speed.is_some() {
            self.speed = record.ground_speed;
        }
        if record.heading.is_some() {
            self.heading = record.heading;
        }

        self.trail.push(
            PositionPoint {
                lat: record.latitude,
                lon: record.longitude,
                altitude: self.altitude,
                timestamp: now,
            },
            max_trail_points,
        );
    }

    /// Callsign if known, otherwise the ICAO address.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.callsign.as_deref().unwrap_or(&self.icao)
    }
}

/// Configuration for the aircraft tracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Aircraft timeout in seconds.
    pub aircraft_timeout_secs: i64,
    /// Maximum number of points kept per trail.
    pub trail_max_points: usize,
    /// Trail point retention in seconds.
    pub trail_max_age_secs: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            aircraft_timeout_secs: 60,
            trail_max_points: 10,
            trail_max_age_secs: 300,
        }
    }
}

/// Counters describing one ingest cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Records present in the snapshot.
    pub received: usize,
    /// Records skipped because they failed validation.
    pub malformed: usize,
    /// Valid records outside the viewport radius.
    pub out_of_range: usize,
    pub added: usize,
    pub updated: usize,
    /// Aircraft dropped because they went stale or left the radius.
    pub removed: usize,
    /// Aircraft tracked after the cycle.
    pub tracked: usize,
}

/// ICAO addresses of the notable aircraft.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Highlights {
    pub closest: Option<String>,
    pub fastest: Option<String>,
    pub highest: Option<String>,
}

/// Picks the aircraft with the largest score. Ties go to the most recently
/// updated aircraft, then to the lowest ICAO address.
fn leader<'a>(
    aircraft: impl Iterator<Item = &'a AircraftState>,
    score: impl Fn(&AircraftState) -> Option<f64>,
) -> Option<String> {
    aircraft
        .filter_map(|a| score(a).filter(|s| !s.is_nan()).map(|s| (s, a)))
        .max_by(|(score_a, a), (score_b, b)| {
            score_a
                .total_cmp(score_b)
                .then(a.last_seen.cmp(&b.last_seen))
                .then_with(|| b.icao.cmp(&a.icao))
        })
        .map(|(_, a)| a.icao.clone())
}

/// Immutable view of the tracker at one point in time.
#[derive(Debug, Clone, Default)]
pub struct TrackerSnapshot {
    /// Aircraft sorted by distance from the center, nearest first.
    pub aircraft: Vec<AircraftState>,
    pub highlights: Highlights,
    pub last_report: Option<IngestReport>,
}

impl TrackerSnapshot {
    #[must_use]
    pub fn get(&self, icao: &str) -> Option<&AircraftState> {
        self.aircraft.iter().find(|a| a.icao == icao)
    }

    #[must_use]
    pub fn closest(&self) -> Option<&AircraftState> {
        self.highlights.closest.as_deref().and_then(|icao| self.get(icao))
    }

    #[must_use]
    pub fn fastest(&self) -> Option<&AircraftState> {
        self.highlights.fastest.as_deref().and_then(|icao| self.get(icao))
    }

    #[must_use]
    pub fn highest(&self) -> Option<&AircraftState> {
        self.highlights.highest.as_deref().and_then(|icao| self.get(icao))
    }

    /// Distance of the closest aircraft, if any are tracked.
    #[must_use]
    pub fn min_distance(&self) -> Option<f64> {
        self.closest().map(|a| a.distance_miles)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }
}

/// Aircraft tracker that maintains state across feed snapshots.
pub struct AircraftTracker {
    aircraft: HashMap<String, AircraftState>,
    config: TrackerConfig,
    highlights: Highlights,
    last_report: Option<IngestReport>,
}

impl std::fmt::Debug for AircraftTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AircraftTracker")
            .field("aircraft_count", &self.aircraft.len())
            .field("config", &self.config)
            .field("highlights", &self.highlights)
            .finish_non_exhaustive()
    }
}

impl AircraftTracker {
    /// Create a new tracker with the given configuration.
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            aircraft: HashMap::new(),
            config,
            highlights: Highlights::default(),
            last_report: None,
        }
    }

    /// Merge one feed snapshot into the tracked state.
    ///
    /// Malformed records are skipped and counted. Records farther than the
    /// viewport radius are ignored, and an aircraft that was tracked but is
    /// now reported outside the radius is dropped. Aircraft absent from the
    /// snapshot are kept until they go stale.
    pub fn ingest(
        &mut self,
        snapshot: &FeedSnapshot,
        viewport: &Viewport,
        now: DateTime<Utc>,
    ) -> IngestReport {
        let mut report = IngestReport {
            received: snapshot.records.len(),
            ..IngestReport::default()
        };

        for raw in &snapshot.records {
            let record = match FeedRecord::try_from(raw) {
                Ok(record) => record,
                Err(e) => {
                    debug!("Skipping malformed record: {e}");
                    report.malformed += 1;
                    continue;
                }
            };

            let Ok((distance, bearing)) =
                viewport.distance_and_bearing_to(record.latitude, record.longitude)
            else {
                report.malformed += 1;
                continue;
            };

            if !viewport.contains_distance(distance) {
                report.out_of_range += 1;
                if self.aircraft.remove(&record.icao).is_some() {
                    debug!("{} left the {:.1} mi radius", record.icao, viewport.radius_miles());
                    report.removed += 1;
                }
                continue;
            }

            match self.aircraft.entry(record.icao.clone()) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().update(
                        record,
                        distance,
                        bearing,
                        now,
                        self.config.trail_max_points,
                    );
                    report.updated += 1;
                }
                Entry::Vacant(entry) => {
                    debug!("Tracking new aircraft {} at {distance:.1} mi", entry.key());
                    entry.insert(AircraftState::new(record, distance, bearing, now));
                    report.added += 1;
                }
            }
        }

        report.removed += self.expire(now);
        report.tracked = self.aircraft.len();
        self.last_report = Some(report.clone());
        report
    }

    /// Remove stale aircraft and trail points older than the age bound.
    ///
    /// Returns the number of aircraft removed.
    pub fn expire(&mut self, now: DateTime<Utc>) -> usize {
        let max_age = Duration::seconds(self.config.trail_max_age_secs);
        let timeout = Duration::seconds(self.config.aircraft_timeout_secs);

        for aircraft in self.aircraft.values_mut() {
            aircraft.trail.prune(now, max_age);
        }

        let before = self.aircraft.len();
        self.aircraft.retain(|icao, aircraft| {
            let stale = now - aircraft.last_seen > timeout;
            if stale {
                debug!("Removing stale aircraft {icao}");
            }
            !stale
        });

        self.recompute_highlights();
        before - self.aircraft.len()
    }

    /// Recompute distances for a new viewport, dropping aircraft that now
    /// fall outside its radius.
    pub fn rebase(&mut self, viewport: &Viewport) -> usize {
        let before = self.aircraft.len();
        self.aircraft.retain(|_, aircraft| {
            match viewport.distance_and_bearing_to(aircraft.latitude, aircraft.longitude) {
                Ok((distance, bearing)) if viewport.contains_distance(distance) => {
                    aircraft.distance_miles = distance;
                    aircraft.bearing = bearing;
                    true
                }
                _ => false,
            }
        });

        self.recompute_highlights();
        before - self.aircraft.len()
    }

    fn recompute_highlights(&mut self) {
        self.highlights = Highlights {
            closest: leader(self.aircraft.values(), |a| Some(-a.distance_miles)),
            fastest: leader(self.aircraft.values(), |a| a.speed),
            highest: leader(self.aircraft.values(), |a| a.altitude.map(f64::from)),
        };
    }

    #[must_use]
    pub fn highlights(&self) -> &Highlights {
        &self.highlights
    }

    /// Get a specific aircraft by ICAO address.
    #[must_use]
    pub fn get_by_icao(&self, icao: &str) -> Option<&AircraftState> {
        self.aircraft.get(icao)
    }

    /// Get the number of tracked aircraft.
    #[must_use]
    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    /// Check if there are no tracked aircraft.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    /// Copy the current state into an immutable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> TrackerSnapshot {
        let mut aircraft: Vec<AircraftState> = self.aircraft.values().cloned().collect();
        aircraft.sort_by(|a, b| {
            a.distance_miles
                .total_cmp(&b.distance_miles)
                .then_with(|| a.icao.cmp(&b.icao))
        });

        TrackerSnapshot {
            aircraft,
            highlights: self.highlights.clone(),
            last_report: self.last_report.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{distance_and_bearing, ZoomBreakpoints};
    use crate::protocol::{RawAircraft, RawAltitude, RawRecord};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn viewport(radius: f64) -> Viewport {
        Viewport::new(27.9506, -82.4572, radius, &ZoomBreakpoints::default()).unwrap()
    }

    fn aircraft(hex: &str, lat: f64, lon: f64) -> RawAircraft {
        RawAircraft {
            hex: Some(hex.to_string()),
            lat: Some(lat),
            lon: Some(lon),
            ..RawAircraft::default()
        }
    }

    #[test]
    fn test_new_aircraft_starts_with_empty_trail() {
        let mut tracker = AircraftTracker::new(TrackerConfig::default());
        let snapshot = FeedSnapshot::from_aircraft([aircraft("a1b2c3", 27.96, -82.45)]);

        let report = tracker.ingest(&snapshot, &viewport(10.0), t0());
        assert_eq!(report.added, 1);
        assert_eq!(report.tracked, 1);

        let state = tracker.get_by_icao("A1B2C3").unwrap();
        assert!(state.trail.is_empty());
        assert!(state.distance_miles < 1.0);
        assert_eq!(state.last_seen, t0());
    }

    #[test]
    fn test_update_appends_trail_and_keeps_known_fields() {
        let mut tracker = AircraftTracker::new(TrackerConfig::default());
        let vp = viewport(10.0);

        let mut first = aircraft("A1B2C3", 27.96, -82.45);
        first.flight = Some("UAL123".to_string());
        first.alt_baro = Some(RawAltitude::Feet(3000.0));
        tracker.ingest(&FeedSnapshot::from_aircraft([first]), &vp, t0());

        let second = aircraft("A1B2C3", 27.97, -82.44);
        let report = tracker.ingest(
            &FeedSnapshot::from_aircraft([second]),
            &vp,
            t0() + Duration::seconds(5),
        );
        assert_eq!(report.updated, 1);

        let state = tracker.get_by_icao("A1B2C3").unwrap();
        assert_eq!(state.callsign.as_deref(), Some("UAL123"));
        assert_eq!(state.altitude, Some(3000));
        assert_eq!(state.latitude, 27.97);
        assert_eq!(state.trail.len(), 1);
        let point = state.trail.points().next().unwrap();
        assert_eq!((point.lat, point.lon), (27.97, -82.44));
    }

    #[test]
    fn test_distance_filter_boundary() {
        let (lat, lon) = (27.9506, -82.4572);
        let target = (28.05, -82.4572);
        let (exact, _) = distance_and_bearing(lat, lon, target.0, target.1).unwrap();
        let snapshot = FeedSnapshot::from_aircraft([aircraft("A1B2C3", target.0, target.1)]);
        let breakpoints = ZoomBreakpoints::default();

        for (radius, expected) in [(exact, 1), (exact + 1e-6, 1), (exact - 1e-6, 0)] {
            let vp = Viewport::new(lat, lon, radius, &breakpoints).unwrap();
            let mut tracker = AircraftTracker::new(TrackerConfig::default());
            let report = tracker.ingest(&snapshot, &vp, t0());
            assert_eq!(report.tracked, expected, "radius {radius}");
            assert_eq!(report.out_of_range, 1 - expected);
        }
    }

    #[test]
    fn test_trail_length_is_bounded() {
        let config = TrackerConfig {
            trail_max_points: 7,
            ..TrackerConfig::default()
        };
        let mut tracker = AircraftTracker::new(config);
        let vp = viewport(10.0);

        for i in 0..100 {
            let lat = 27.9 + f64::from(i) * 0.0005;
            let snapshot = FeedSnapshot::from_aircraft([aircraft("A1B2C3", lat, -82.45)]);
            tracker.ingest(&snapshot, &vp, t0() + Duration::seconds(i64::from(i)));
            assert!(tracker.get_by_icao("A1B2C3").unwrap().trail.len() <= 7);
        }

        let trail = &tracker.get_by_icao("A1B2C3").unwrap().trail;
        assert_eq!(trail.len(), 7);
        let newest = trail.points().next_back().unwrap();
        assert_eq!(newest.timestamp, t0() + Duration::seconds(99));
    }

    #[test]
    fn test_trail_points_expire_by_age() {
        let config = TrackerConfig {
            trail_max_age_secs: 30,
            aircraft_timeout_secs: 600,
            ..TrackerConfig::default()
        };
        let mut tracker = AircraftTracker::new(config);
        let vp = viewport(10.0);
        let snapshot = FeedSnapshot::from_aircraft([aircraft("A1B2C3", 27.96, -82.45)]);

        tracker.ingest(&snapshot, &vp, t0());
        tracker.ingest(&snapshot, &vp, t0() + Duration::seconds(10));
        tracker.ingest(&snapshot, &vp, t0() + Duration::seconds(35));
        assert_eq!(tracker.get_by_icao("A1B2C3").unwrap().trail.len(), 2);

        tracker.expire(t0() + Duration::seconds(41));
        assert_eq!(tracker.get_by_icao("A1B2C3").unwrap().trail.len(), 1);
    }

    #[test]
    fn test_stale_aircraft_removed_with_trail() {
        let mut tracker = AircraftTracker::new(TrackerConfig::default());
        let vp = viewport(10.0);
        let snapshot = FeedSnapshot::from_aircraft([aircraft("A1B2C3", 27.96, -82.45)]);
        tracker.ingest(&snapshot, &vp, t0());
        tracker.ingest(&snapshot, &vp, t0() + Duration::seconds(5));
        assert_eq!(tracker.get_by_icao("A1B2C3").unwrap().trail.len(), 1);

        let empty = FeedSnapshot::default();
        let report = tracker.ingest(&empty, &vp, t0() + Duration::seconds(65));
        assert_eq!(report.removed, 0);
        assert_eq!(tracker.len(), 1);

        let report = tracker.ingest(&empty, &vp, t0() + Duration::seconds(66));
        assert_eq!(report.removed, 1);
        assert!(tracker.is_empty());
        assert!(tracker.snapshot().closest().is_none());

        // Reappearing starts over with a fresh trail
        tracker.ingest(&snapshot, &vp, t0() + Duration::seconds(70));
        assert!(tracker.get_by_icao("A1B2C3").unwrap().trail.is_empty());
    }

    #[test]
    fn test_malformed_records_are_counted() {
        let mut tracker = AircraftTracker::new(TrackerConfig::default());
        let mut missing_position = aircraft("BADBAD", 0.0, 0.0);
        missing_position.lat = None;
        let snapshot = FeedSnapshot {
            records: vec![
                RawRecord::Aircraft(aircraft("A1B2C3", 27.96, -82.45)),
                RawRecord::Aircraft(missing_position),
                RawRecord::Undecodable("invalid type".to_string()),
            ],
            ..FeedSnapshot::default()
        };

        let report = tracker.ingest(&snapshot, &viewport(10.0), t0());
        assert_eq!(report.received, 3);
        assert_eq!(report.malformed, 2);
        assert_eq!(report.tracked, 1);
    }

    #[test]
    fn test_highlights_and_tie_breaks() {
        let mut tracker = AircraftTracker::new(TrackerConfig::default());
        let vp = viewport(50.0);

        let mut slow_high = aircraft("AAAAAA", 28.2, -82.4572);
        slow_high.gs = Some(120.0);
        slow_high.alt_baro = Some(RawAltitude::Feet(30_000.0));
        let mut fast_low = aircraft("BBBBBB", 28.0, -82.4572);
        fast_low.gs = Some(480.0);
        fast_low.alt_baro = Some(RawAltitude::Feet(1_000.0));
        tracker.ingest(&FeedSnapshot::from_aircraft([slow_high, fast_low]), &vp, t0());

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.closest().unwrap().icao, "BBBBBB");
        assert_eq!(snapshot.fastest().unwrap().icao, "BBBBBB");
        assert_eq!(snapshot.highest().unwrap().icao, "AAAAAA");
        assert_eq!(snapshot.aircraft[0].icao, "BBBBBB");

        // Same altitude: the more recently updated aircraft wins
        let mut tie = aircraft("CCCCCC", 28.1, -82.4572);
        tie.alt_baro = Some(RawAltitude::Feet(30_000.0));
        tracker.ingest(&FeedSnapshot::from_aircraft([tie]), &vp, t0() + Duration::seconds(1));
        assert_eq!(tracker.highlights().highest.as_deref(), Some("CCCCCC"));

        // Same altitude and same update time: lowest ICAO wins
        let mut a = aircraft("DDDDDD", 28.1, -82.4572);
        a.alt_baro = Some(RawAltitude::Feet(40_000.0));
        let mut b = aircraft("EEEEEE", 28.1, -82.4572);
        b.alt_baro = Some(RawAltitude::Feet(40_000.0));
        tracker.ingest(&FeedSnapshot::from_aircraft([b, a]), &vp, t0() + Duration::seconds(2));
        assert_eq!(tracker.highlights().highest.as_deref(), Some("DDDDDD"));
    }

    #[test]
    fn test_rebase_drops_aircraft_outside_new_radius() {
        let mut tracker = AircraftTracker::new(TrackerConfig::default());
        let snapshot = FeedSnapshot::from_aircraft([
            aircraft("A1B2C3", 27.96, -82.45),
            aircraft("C0FFEE", 28.3, -82.45),
        ]);
        tracker.ingest(&snapshot, &viewport(50.0), t0());
        assert_eq!(tracker.len(), 2);

        assert_eq!(tracker.rebase(&viewport(10.0)), 1);
        assert!(tracker.get_by_icao("C0FFEE").is_none());
        assert_eq!(tracker.highlights().closest.as_deref(), Some("A1B2C3"));
    }
}
