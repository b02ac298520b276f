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


//! Aircraft presentation data.
//!
//! This module provides altitude colors, the offline aircraft database,
//! callsign categorization and flight plan enrichment.

pub mod category;
pub mod colors;
pub mod database;
pub mod flight_plan;

pub use category::AircraftCategory;
pub use colors::{AltitudeBand, AltitudeColorScale};
pub use database::{AircraftDatabase, AircraftInfo, AircraftTypeLookup};
pub use flight_plan::{FlightPlan, FlightPlanService};

use adsb_feed::tracker::AircraftState;

/// Everything known about an aircraft beyond what the feed reports.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub flight_plan: Option<FlightPlan>,
    pub info: Option<AircraftInfo>,
    pub category: AircraftCategory,
}

impl Enrichment {
    /// Gather enrichment for `state` from whichever sources are available.
    #[must_use]
    pub fn gather(
        state: &AircraftState,
        lookup: Option<&dyn AircraftTypeLookup>,
        flight_plan: Option<FlightPlan>,
    ) -> Self {
        Self {
            flight_plan,
            info: lookup.and_then(|db| db.lookup(&state.icao)).cloned(),
            category: AircraftCategory::from_callsign(state.callsign.as_deref()),
        }
    }

    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.flight_plan.as_ref()?.origin.as_deref()
    }

    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.flight_plan.as_ref()?.destination.as_deref()
    }

    #[must_use]
    pub fn manufacturer(&self) -> Option<&str> {
        self.info.as_ref()?.manufacturer.as_deref()
    }

    /// Model from the database, else the flight plan type, else the
    /// callsign category when it says anything.
    #[must_use]
    pub fn model(&self) -> Option<String> {
        self.info
            .as_ref()
            .and_then(|info| info.model.clone())
            .or_else(|| self.flight_plan.as_ref()?.aircraft_type.clone())
            .or_else(|| {
                (self.category != AircraftCategory::Unknown).then(|| self.category.to_string())
            })
    }

    #[must_use]
    pub fn operator(&self) -> Option<&str> {
        self.info.as_ref()?.operator.as_deref()
    }

    /// Short type designator: feed, then database, then flight plan.
    #[must_use]
    pub fn type_code(&self, state: &AircraftState) -> Option<String> {
        state
            .type_code
            .clone()
            .or_else(|| self.info.as_ref()?.icao_type.clone())
            .or_else(|| self.flight_plan.as_ref()?.aircraft_type.clone())
    }
}
