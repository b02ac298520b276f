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


//! Stitching tiles into a display-sized background.

use adsb_feed::geo::{TileGrid, Viewport, MAX_TILE_GRID, TILE_SIZE};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// Appearance tweaks applied after resizing, in this order: fade,
/// brightness, contrast, saturation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjustments {
    /// 0.0 leaves the map untouched, 1.0 fades it to black
    pub fade_intensity: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
}

impl Default for Adjustments {
    fn default() -> Self {
        Self {
            fade_intensity: 0.0,
            brightness: 1.0,
            contrast: 1.0,
            saturation: 1.0,
        }
    }
}

/// A decoded tile and its cell in the grid
pub struct PlacedTile {
    pub col: u32,
    pub row: u32,
    pub image: RgbImage,
}

/// Paste `tiles` into the viewport's crop rectangle and scale it to `target`.
///
/// Cells without a tile, and any part of the rectangle outside the grid,
/// stay black. A rectangle wider or taller than the largest grid is drawn
/// scaled down, so the working canvas never exceeds
/// `MAX_TILE_GRID × TILE_SIZE` per axis.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn stitch(viewport: &Viewport, grid: &TileGrid, tiles: &[PlacedTile], target: (u32, u32)) -> RgbImage {
    let (crop_width, crop_height) = viewport.crop_size(target);
    let (center_x, center_y) = viewport.center_world_pixel();
    let (origin_x, origin_y) = grid.origin_world_pixel();

    let max_extent = f64::from(MAX_TILE_GRID * TILE_SIZE);
    let scale = (max_extent / crop_width).min(max_extent / crop_height).min(1.0);

    let crop_left = center_x - crop_width / 2.0;
    let crop_top = center_y - crop_height / 2.0;
    let mut crop = RgbImage::new(
        (crop_width * scale).round().max(1.0) as u32,
        (crop_height * scale).round().max(1.0) as u32,
    );

    let size = f64::from(TILE_SIZE);
    let tile_size = (size * scale).round().max(1.0) as u32;
    for tile in tiles {
        let x = ((origin_x + f64::from(tile.col) * size - crop_left) * scale).round() as i64;
        let y = ((origin_y + f64::from(tile.row) * size - crop_top) * scale).round() as i64;
        if tile.image.dimensions() == (tile_size, tile_size) {
            imageops::replace(&mut crop, &tile.image, x, y);
        } else {
            let scaled = imageops::resize(&tile.image, tile_size, tile_size, FilterType::Triangle);
            imageops::replace(&mut crop, &scaled, x, y);
        }
    }

    if crop.dimensions() == target {
        crop
    } else {
        imageops::resize(&crop, target.0.max(1), target.1.max(1), FilterType::Lanczos3)
    }
}

/// Apply `adjustments` in place.
pub fn adjust(image: &mut RgbImage, adjustments: &Adjustments) {
    let fade = adjustments.fade_intensity.clamp(0.0, 1.0);
    if fade > 0.0 {
        blend_towards(image, |_| [0.0; 3], 1.0 - fade);
    }
    if (adjustments.brightness - 1.0).abs() > f32::EPSILON {
        blend_towards(image, |_| [0.0; 3], adjustments.brightness);
    }
    if (adjustments.contrast - 1.0).abs() > f32::EPSILON {
        let mean = mean_luma(image);
        blend_towards(image, |_| [mean; 3], adjustments.contrast);
    }
    if (adjustments.saturation - 1.0).abs() > f32::EPSILON {
        blend_towards(image, |p| [luma(p); 3], adjustments.saturation);
    }
}

/// ITU-R 601-2 luma, as used for greyscale conversion
fn luma(pixel: &Rgb<u8>) -> f32 {
    let [r, g, b] = pixel.0;
    (f32::from(r) * 299.0 + f32::from(g) * 587.0 + f32::from(b) * 114.0) / 1000.0
}

#[allow(clippy::cast_precision_loss)]
fn mean_luma(image: &RgbImage) -> f32 {
    let count = u64::from(image.width()) * u64::from(image.height());
    if count == 0 {
        return 0.0;
    }
    let total: f64 = image.pixels().map(|p| f64::from(luma(p))).sum();
    #[allow(clippy::cast_possible_truncation)]
    let mean = (total / count as f64).round() as f32;
    mean
}

/// Interpolate each pixel between a degenerate value (factor 0.0) and itself
/// (factor 1.0); factors above 1.0 extrapolate.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn blend_towards(image: &mut RgbImage, degenerate: impl Fn(&Rgb<u8>) -> [f32; 3], factor: f32) {
    for pixel in image.pixels_mut() {
        let base = degenerate(pixel);
        for (channel, base) in pixel.0.iter_mut().zip(base) {
            let value = base + (f32::from(*channel) - base) * factor;
            *channel = value.round().clamp(0.0, 255.0) as u8;
        }
    }
}
