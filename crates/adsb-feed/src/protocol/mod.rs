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


//! Protocol layer for ADS-B feed parsing.
//!
//! The feed arrives pre-decoded as a dump1090/SkyAware `aircraft.json`
//! document. Parsing happens in two steps: the document is split into raw
//! per-aircraft entries (each decoded independently so one bad entry never
//! spoils the rest), then each entry is validated into a [`FeedRecord`] with
//! explicit optionals.

mod skyaware;

pub use skyaware::{FeedSnapshot, RawAircraft, RawAltitude, RawRecord, SkyAwareParser};

use thiserror::Error;

use crate::geo;

/// Errors that can occur while parsing a whole feed document.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid document format: {0}")]
    InvalidFormat(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// A single aircraft entry that could not be turned into a [`FeedRecord`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecordError {
    #[error("undecodable record: {0}")]
    Undecodable(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for field '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// A validated aircraft observation.
///
/// Identity and position are always present; everything else may be absent
/// from any given feed entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRecord {
    /// ICAO 24-bit address, upper-case hex.
    pub icao: String,
    pub callsign: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    /// Feet; aircraft reported on the ground are 0.
    pub altitude: Option<i32>,
    /// Ground speed in knots.
    pub ground_speed: Option<f64>,
    /// Track or heading in degrees, 0..360.
    pub heading: Option<f64>,
    pub registration: Option<String>,
    pub type_code: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn invalid(field: &'static str, value: impl ToString) -> RecordError {
    RecordError::InvalidValue {
        field,
        value: value.to_string(),
    }
}

fn parse_altitude(raw: &RawAltitude) -> Result<i32, RecordError> {
    match raw {
        #[allow(clippy::cast_possible_truncation)]
        RawAltitude::Feet(feet) if feet.is_finite() && feet.abs() < 200_000.0 => {
            Ok(feet.round() as i32)
        }
        RawAltitude::Feet(feet) => Err(invalid("altitude", feet)),
        RawAltitude::Text(text) if text.trim().eq_ignore_ascii_case("ground") => Ok(0),
        RawAltitude::Text(text) => Err(invalid("altitude", text)),
    }
}

impl TryFrom<&RawAircraft> for FeedRecord {
    type Error = RecordError;

    fn try_from(raw: &RawAircraft) -> Result<Self, RecordError> {
        let icao = non_empty(raw.hex.as_deref())
            .ok_or(RecordError::MissingField("hex"))?
            .to_uppercase();

        let latitude = raw.lat.ok_or(RecordError::MissingField("lat"))?;
        let longitude = raw.lon.ok_or(RecordError::MissingField("lon"))?;
        geo::validate_position(latitude, longitude).map_err(|e| match e {
            geo::GeoError::InvalidLatitude(v) => invalid("lat", v),
            _ => invalid("lon", longitude),
        })?;

        let altitude = raw
            .alt_baro
            .as_ref()
            .or(raw.alt_geom.as_ref())
            .map(parse_altitude)
            .transpose()?;

        let ground_speed = match raw.gs {
            Some(gs) if !gs.is_finite() || gs < 0.0 => return Err(invalid("gs", gs)),
            other => other,
        };

        let heading = match raw.track.or(raw.true_heading) {
            Some(h) if !h.is_finite() => return Err(invalid("track", h)),
            other => other.map(|h| h.rem_euclid(360.0)),
        };

        Ok(Self {
            icao,
            callsign: non_empty(raw.flight.as_deref()),
            latitude,
            longitude,
            altitude,
            ground_speed,
            heading,
            registration: non_empty(raw.r.as_deref()),
            type_code: non_empty(raw.t.as_deref()),
        })
    }
}

impl TryFrom<&RawRecord> for FeedRecord {
    type Error = RecordError;

    fn try_from(raw: &RawRecord) -> Result<Self, RecordError> {
        match raw {
            RawRecord::Aircraft(aircraft) => Self::try_from(aircraft),
            RawRecord::Undecodable(reason) => Err(RecordError::Undecodable(reason.clone())),
        }
    }
}

/// Trait for protocol parsers.
///
/// Implement this trait to add support for new feed formats.
pub trait Protocol {
    /// The message type produced by this parser.
    type Message;
    /// The error type for parsing failures.
    type Error;

    /// Parse input bytes into a message.
    ///
    /// Returns `Ok(Some(message))` if parsing succeeded,
    /// `Ok(None)` if the input is valid but doesn't produce a message,
    /// or `Err(error)` if parsing failed.
    fn parse(&mut self, input: &[u8]) -> Result<Option<Self::Message>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(hex: &str, lat: f64, lon: f64) -> RawAircraft {
        RawAircraft {
            hex: Some(hex.to_string()),
            lat: Some(lat),
            lon: Some(lon),
            ..RawAircraft::default()
        }
    }

    #[test]
    fn test_minimal_record() {
        let record = FeedRecord::try_from(&raw("a1b2c3", 27.95, -82.45)).unwrap();
        assert_eq!(record.icao, "A1B2C3");
        assert_eq!(record.callsign, None);
        assert_eq!(record.altitude, None);
        assert_eq!(record.heading, None);
    }

    #[test]
    fn test_optional_fields() {
        let mut aircraft = raw("A1B2C3", 27.95, -82.45);
        aircraft.flight = Some("UAL123  ".to_string());
        aircraft.alt_geom = Some(RawAltitude::Feet(35_012.4));
        aircraft.gs = Some(451.2);
        aircraft.true_heading = Some(-90.0);
        aircraft.r = Some("N12345".to_string());
        aircraft.t = Some(" ".to_string());

        let record = FeedRecord::try_from(&aircraft).unwrap();
        assert_eq!(record.callsign.as_deref(), Some("UAL123"));
        assert_eq!(record.altitude, Some(35_012));
        assert_eq!(record.ground_speed, Some(451.2));
        assert_eq!(record.heading, Some(270.0));
        assert_eq!(record.registration.as_deref(), Some("N12345"));
        assert_eq!(record.type_code, None);
    }

    #[test]
    fn test_ground_altitude_is_zero() {
        let mut aircraft = raw("A1B2C3", 27.95, -82.45);
        aircraft.alt_baro = Some(RawAltitude::Text("ground".to_string()));
        aircraft.alt_geom = Some(RawAltitude::Feet(25.0));
        assert_eq!(FeedRecord::try_from(&aircraft).unwrap().altitude, Some(0));
    }

    #[test]
    fn test_malformed_records() {
        let mut missing_lat = raw("A1B2C3", 0.0, 0.0);
        missing_lat.lat = None;
        assert_eq!(
            FeedRecord::try_from(&missing_lat),
            Err(RecordError::MissingField("lat"))
        );

        let missing_hex = RawAircraft {
            hex: Some("  ".to_string()),
            ..raw("", 1.0, 1.0)
        };
        assert_eq!(
            FeedRecord::try_from(&missing_hex),
            Err(RecordError::MissingField("hex"))
        );

        assert!(matches!(
            FeedRecord::try_from(&raw("A1B2C3", 95.0, 0.0)),
            Err(RecordError::InvalidValue { field: "lat", .. })
        ));
        assert!(matches!(
            FeedRecord::try_from(&raw("A1B2C3", 10.0, -190.0)),
            Err(RecordError::InvalidValue { field: "lon", .. })
        ));

        let mut bad_alt = raw("A1B2C3", 1.0, 1.0);
        bad_alt.alt_baro = Some(RawAltitude::Text("high".to_string()));
        assert!(matches!(
            FeedRecord::try_from(&bad_alt),
            Err(RecordError::InvalidValue { field: "altitude", .. })
        ));

        let undecodable = RawRecord::Undecodable("expected f64".to_string());
        assert!(matches!(
            FeedRecord::try_from(&undecodable),
            Err(RecordError::Undecodable(_))
        ));
    }
}
