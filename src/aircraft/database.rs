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


//! Offline aircraft registration and type database.
//!
//! Provides lookups from ICAO hex codes to registration, type, manufacturer
//! and operator. Data is read from an ADS-B Exchange `basic-ac-db.json`
//! file (JSON lines, optionally gzip compressed). Keeping the file current
//! is left to the user.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use log::{info, warn};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("failed to read aircraft database: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AircraftInfo {
    pub icao: String,
    pub reg: Option<String>,
    #[serde(rename = "icaotype")]
    pub icao_type: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    #[serde(rename = "ownop")]
    pub operator: Option<String>,
}

/// Read-only aircraft lookup by ICAO address.
pub trait AircraftTypeLookup: Send + Sync {
    fn lookup(&self, icao_hex: &str) -> Option<&AircraftInfo>;
}

#[derive(Debug, Default)]
pub struct AircraftDatabase {
    aircraft_map: HashMap<String, AircraftInfo>,
}

impl AircraftDatabase {
    /// Load the database from disk. Files ending in `.gz` are decompressed.
    /// Lines that fail to parse are skipped.
    pub fn load(path: &Path) -> Result<Self, DatabaseError> {
        let file = File::open(path)?;
        let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };

        let db = Self::from_reader(BufReader::new(reader))?;
        info!(
            "Aircraft database loaded from {}: {} aircraft",
            path.display(),
            db.len()
        );
        Ok(db)
    }

    /// Parse JSON Lines format - one JSON object per line
    pub fn from_reader(reader: impl BufRead) -> Result<Self, DatabaseError> {
        let mut aircraft_map = HashMap::new();
        let mut skipped = 0_usize;

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AircraftInfo>(&line) {
                Ok(info) => {
                    aircraft_map.insert(info.icao.to_uppercase(), info);
                }
                Err(_) => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!("Skipped {skipped} unparseable aircraft database lines");
        }

        Ok(Self { aircraft_map })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.aircraft_map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aircraft_map.is_empty()
    }
}

impl AircraftTypeLookup for AircraftDatabase {
    /// Lookup aircraft by ICAO hex code (e.g., "A12F3C")
    fn lookup(&self, icao_hex: &str) -> Option<&AircraftInfo> {
        self.aircraft_map.get(&icao_hex.trim().to_uppercase())
    }
}
