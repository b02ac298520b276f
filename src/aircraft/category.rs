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


//! Callsign based aircraft classification.
//!
//! Used as the type fallback when neither the offline database nor a flight
//! plan knows what an aircraft is, and to decide which callsigns are worth a
//! paid flight-plan lookup.

use std::fmt;

const MILITARY_PREFIXES: &[&str] = &[
    "C-", "CF-", "AF-", "NATO-", "USAF-", "USN-", "USMC-", "USCG-", "RAZOR", "VADER", "SPIRIT",
];

const CARGO_PREFIXES: &[&str] = &[
    "UPS", "FDX", "GTI", "ABX", "CPZ", "DHL", "TNT", "QFA", "SIA", "CAL", "CARGO",
];

const AIRLINE_PREFIXES: &[&str] = &[
    "AAL", "UAL", "DAL", "SWA", "JBU", "ASQ", "ENY", "FFT", "NKS", "F9", "G4", "B6", "WN", "AA",
    "UA", "DL",
];

const INTERNATIONAL_AIRLINE_PREFIXES: &[&str] = &[
    "BAW", "AFR", "LUF", "KLM", "SAS", "IBE", "EZY", "RYR", "WZZ", "EIN", "DLH", "AUA", "SWR",
    "AZA", "IBB", "VLG", "TAP",
];

const REGIONAL_PREFIXES: &[&str] = &["NK"];

const COUNTRY_PREFIXES: &[&str] = &[
    "G-", "F-", "D-", "I-", "HB-", "OE-", "PH-", "SE-", "LN-", "OY-", "VH-", "C-G", "C-F", "JA-",
    "B-", "HL-", "9V-", "A6-", "VT-", "PK-", "HS-", "RP-", "ZS-", "4X-", "SU-", "RA-", "UR-",
    "EW-", "S7-", "U6-", "FV-", "DP-",
];

const PACIFIC_PREFIXES: &[&str] = &[
    "P4-", "P5-", "P6-", "P7-", "P8-", "P9-", "P0-", "P1-", "P2-", "P3-",
];

fn has_prefix(callsign: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|prefix| callsign.starts_with(prefix))
}

/// Coarse aircraft category inferred from a callsign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AircraftCategory {
    Airline,
    Cargo,
    Military,
    International,
    Commercial,
    Private,
    GeneralAviation,
    Unknown,
}

impl AircraftCategory {
    #[must_use]
    pub fn from_callsign(callsign: Option<&str>) -> Self {
        let Some(callsign) = callsign.map(str::trim).filter(|c| !c.is_empty()) else {
            return Self::Unknown;
        };
        let upper = callsign.to_uppercase();
        let len = upper.chars().count();

        if has_prefix(&upper, MILITARY_PREFIXES) {
            Self::Military
        } else if has_prefix(&upper, CARGO_PREFIXES) {
            Self::Cargo
        } else if has_prefix(&upper, AIRLINE_PREFIXES) {
            Self::Airline
        } else if has_prefix(&upper, COUNTRY_PREFIXES) || has_prefix(&upper, PACIFIC_PREFIXES) {
            Self::International
        } else if len <= 3 {
            Self::Unknown
        } else if upper.starts_with('N') {
            if len >= 6 {
                Self::Commercial
            } else {
                Self::Private
            }
        } else if upper.chars().any(|c| c.is_ascii_digit()) {
            if len >= 6 {
                Self::Commercial
            } else {
                Self::GeneralAviation
            }
        } else if len >= 5 {
            Self::Commercial
        } else {
            Self::GeneralAviation
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Airline => "Airline",
            Self::Cargo => "Cargo",
            Self::Military => "Military",
            Self::International => "International",
            Self::Commercial => "Commercial",
            Self::Private => "Private",
            Self::GeneralAviation => "General Aviation",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for AircraftCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Whether a paid flight-plan lookup is likely to return a route.
///
/// Scheduled airline, cargo and foreign-registered traffic qualifies;
/// private and military callsigns do not.
#[must_use]
pub fn is_worth_fetching(callsign: &str, min_length: usize) -> bool {
    let upper = callsign.trim().to_uppercase();
    if upper.is_empty() || upper.chars().count() < min_length {
        return false;
    }

    has_prefix(&upper, AIRLINE_PREFIXES)
        || has_prefix(&upper, INTERNATIONAL_AIRLINE_PREFIXES)
        || (has_prefix(&upper, CARGO_PREFIXES) && !upper.starts_with("CARGO"))
        || has_prefix(&upper, REGIONAL_PREFIXES)
        || has_prefix(&upper, COUNTRY_PREFIXES)
}
