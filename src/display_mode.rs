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


//! Display mode selection.

use serde::{Deserialize, Serialize};

use crate::alert::AlertState;

/// Mode requested by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    Map,
    Overhead,
    Stats,
    #[default]
    Auto,
}

/// Mode actually rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveMode {
    Map,
    Overhead,
    Stats,
}

/// `Auto` shows the overhead view while a proximity alert is active and
/// statistics otherwise; explicit modes are used as is.
#[must_use]
pub fn resolve(configured: DisplayMode, alert: AlertState) -> EffectiveMode {
    match configured {
        DisplayMode::Map => EffectiveMode::Map,
        DisplayMode::Overhead => EffectiveMode::Overhead,
        DisplayMode::Stats => EffectiveMode::Stats,
        DisplayMode::Auto if alert.is_active() => EffectiveMode::Overhead,
        DisplayMode::Auto => EffectiveMode::Stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_follows_alert() {
        assert_eq!(resolve(DisplayMode::Auto, AlertState::Inactive), EffectiveMode::Stats);
        assert_eq!(resolve(DisplayMode::Auto, AlertState::Triggered), EffectiveMode::Overhead);
        assert_eq!(resolve(DisplayMode::Auto, AlertState::Cooldown), EffectiveMode::Overhead);
    }

    #[test]
    fn test_explicit_modes_ignore_alert() {
        for alert in [AlertState::Inactive, AlertState::Triggered, AlertState::Cooldown] {
            assert_eq!(resolve(DisplayMode::Map, alert), EffectiveMode::Map);
            assert_eq!(resolve(DisplayMode::Stats, alert), EffectiveMode::Stats);
            assert_eq!(resolve(DisplayMode::Overhead, alert), EffectiveMode::Overhead);
        }
    }
}
