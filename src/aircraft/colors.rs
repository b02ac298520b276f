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


//! Altitude to color mapping.
//!
//! Bands follow the usual aviation altitude scale, running from orange-red
//! near the ground through green and blue to magenta in the flight levels.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ColorScaleError {
    #[error("altitude color scale needs at least one band")]
    Empty,

    #[error("altitude band {index} does not start above the previous band")]
    NotAscending { index: usize },
}

/// Altitudes from `min_altitude_ft` up to the next band's lower bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AltitudeBand {
    pub min_altitude_ft: i32,
    pub color: [u8; 3],
}

/// Ordered, gap-free altitude bands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AltitudeColorScale {
    bands: Vec<AltitudeBand>,
}

impl Default for AltitudeColorScale {
    fn default() -> Self {
        Self {
            bands: Self::default_bands(),
        }
    }
}

impl AltitudeColorScale {
    pub fn new(bands: Vec<AltitudeBand>) -> Result<Self, ColorScaleError> {
        if bands.is_empty() {
            return Err(ColorScaleError::Empty);
        }
        if let Some(index) = bands
            .windows(2)
            .position(|pair| pair[1].min_altitude_ft <= pair[0].min_altitude_ft)
        {
            return Err(ColorScaleError::NotAscending { index: index + 1 });
        }
        Ok(Self { bands })
    }

    #[must_use]
    pub fn default_bands() -> Vec<AltitudeBand> {
        [
            (0, [255, 100, 0]),
            (500, [255, 120, 0]),
            (1_000, [255, 140, 0]),
            (2_000, [255, 200, 0]),
            (4_000, [255, 255, 0]),
            (6_000, [200, 255, 0]),
            (8_000, [0, 255, 0]),
            (10_000, [0, 200, 150]),
            (20_000, [0, 150, 255]),
            (30_000, [0, 0, 200]),
            (40_000, [150, 0, 200]),
            (45_000, [200, 0, 150]),
        ]
        .into_iter()
        .map(|(min_altitude_ft, color)| AltitudeBand {
            min_altitude_ft,
            color,
        })
        .collect()
    }

    /// Index of the band containing `altitude_ft`. Altitudes below the first
    /// bound belong to the first band.
    #[must_use]
    pub fn band_index(&self, altitude_ft: i32) -> usize {
        self.bands
            .partition_point(|band| band.min_altitude_ft <= altitude_ft)
            .saturating_sub(1)
    }

    #[must_use]
    pub fn color_for(&self, altitude_ft: i32) -> [u8; 3] {
        self.bands[self.band_index(altitude_ft)].color
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_boundaries() {
        let scale = AltitudeColorScale::default();
        assert_eq!(scale.color_for(0), [255, 100, 0]);
        assert_eq!(scale.color_for(499), [255, 100, 0]);
        assert_eq!(scale.color_for(500), [255, 120, 0]);
        assert_eq!(scale.color_for(35_000), [0, 0, 200]);
        assert_eq!(scale.color_for(60_000), [200, 0, 150]);
        assert_eq!(scale.color_for(-200), [255, 100, 0]);
    }

    #[test]
    fn test_every_altitude_maps_to_its_band() {
        let scale = AltitudeColorScale::default();
        let bands = AltitudeColorScale::default_bands();
        for altitude in (-1_000..=50_000).step_by(7) {
            let index = scale.band_index(altitude);
            assert!(index < bands.len());
            if index > 0 {
                assert!(bands[index].min_altitude_ft <= altitude);
            }
            if let Some(next) = bands.get(index + 1) {
                assert!(altitude < next.min_altitude_ft);
            }
            // pure: repeated lookups agree
            assert_eq!(scale.color_for(altitude), scale.color_for(altitude));
        }
    }

    #[test]
    fn test_validation() {
        assert_eq!(AltitudeColorScale::new(Vec::new()), Err(ColorScaleError::Empty));

        let mut bands = AltitudeColorScale::default_bands();
        bands.swap(2, 3);
        assert_eq!(
            AltitudeColorScale::new(bands),
            Err(ColorScaleError::NotAscending { index: 3 })
        );
    }
}
