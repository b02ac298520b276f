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


//! Proximity alert state machine.
//!
//! ```text
//!  Inactive --(min distance <= threshold)--> Triggered
//!  Triggered --(condition clears)--> Cooldown
//!  Cooldown --(condition returns within dwell)--> Triggered
//!  Cooldown --(dwell elapsed)--> Inactive
//! ```

use chrono::{DateTime, Duration, Utc};
use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    Inactive,
    Triggered,
    Cooldown,
}

impl AlertState {
    #[must_use]
    pub fn is_active(self) -> bool {
        self != Self::Inactive
    }
}

#[derive(Debug, Clone)]
pub struct ProximityAlertEngine {
    enabled: bool,
    threshold_miles: f64,
    dwell: Duration,
    state: AlertState,
    since: Option<DateTime<Utc>>,
}

impl ProximityAlertEngine {
    #[must_use]
    pub fn new(enabled: bool, threshold_miles: f64, dwell: Duration) -> Self {
        Self {
            enabled,
            threshold_miles,
            dwell,
            state: AlertState::Inactive,
            since: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> AlertState {
        self.state
    }

    /// Time of the last transition.
    #[must_use]
    pub fn since(&self) -> Option<DateTime<Utc>> {
        self.since
    }

    fn transition(&mut self, to: AlertState, now: DateTime<Utc>, min_distance: Option<f64>) {
        info!(
            "Proximity alert {:?} -> {:?} (closest {})",
            self.state,
            to,
            min_distance.map_or_else(|| "none".to_string(), |d| format!("{d:.2} mi"))
        );
        self.state = to;
        self.since = Some(now);
    }

    /// Advance the state machine with the current closest distance.
    pub fn update(&mut self, min_distance: Option<f64>, now: DateTime<Utc>) -> AlertState {
        if !self.enabled {
            return self.state;
        }

        let near = min_distance.is_some_and(|d| d <= self.threshold_miles);
        match (self.state, near) {
            (AlertState::Inactive | AlertState::Cooldown, true) => {
                self.transition(AlertState::Triggered, now, min_distance);
            }
            (AlertState::Triggered, false) => {
                self.transition(AlertState::Cooldown, now, min_distance);
            }
            (AlertState::Cooldown, false) => {
                if self.since.is_some_and(|since| now - since >= self.dwell) {
                    self.transition(AlertState::Inactive, now, min_distance);
                }
            }
            (AlertState::Inactive, false) | (AlertState::Triggered, true) => {}
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn test_hysteresis_sequence() {
        let mut engine = ProximityAlertEngine::new(true, 5.0, Duration::seconds(10));
        assert_eq!(engine.update(Some(8.0), t(0)), AlertState::Inactive);
        assert_eq!(engine.update(Some(3.0), t(1)), AlertState::Triggered);
        assert_eq!(engine.update(Some(2.0), t(2)), AlertState::Triggered);
        assert_eq!(engine.update(Some(7.0), t(3)), AlertState::Cooldown);
        assert_eq!(engine.since(), Some(t(3)));

        // Re-trigger inside the dwell restarts the cycle
        assert_eq!(engine.update(Some(4.0), t(8)), AlertState::Triggered);
        assert_eq!(engine.update(None, t(9)), AlertState::Cooldown);
        assert_eq!(engine.update(None, t(18)), AlertState::Cooldown);
        assert_eq!(engine.update(None, t(19)), AlertState::Inactive);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut engine = ProximityAlertEngine::new(true, 5.0, Duration::seconds(10));
        assert_eq!(engine.update(Some(5.0), t(0)), AlertState::Triggered);
    }

    #[test]
    fn test_disabled_engine_stays_inactive() {
        let mut engine = ProximityAlertEngine::new(false, 5.0, Duration::seconds(10));
        assert_eq!(engine.update(Some(0.1), t(0)), AlertState::Inactive);
        assert_eq!(engine.since(), None);
    }
}
