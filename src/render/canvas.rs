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


use std::convert::Infallible;

use embedded_graphics::mono_font::{MonoFont, MonoTextStyle};
use embedded_graphics::pixelcolor::{Rgb888, RgbColor};
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::Line;
use embedded_graphics::text::{Baseline, Text};
use image::{Rgb, RgbImage};

pub const BLACK: [u8; 3] = [0, 0, 0];
pub const WHITE: [u8; 3] = [255, 255, 255];

/// `DrawTarget` over an `RgbImage`; pixels outside the image are dropped.
pub struct Canvas<'a> {
    image: &'a mut RgbImage,
}

impl std::fmt::Debug for Canvas<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canvas")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish()
    }
}

impl<'a> Canvas<'a> {
    pub fn new(image: &'a mut RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    fn index(&self, x: i32, y: i32) -> Option<(u32, u32)> {
        let (x, y) = (u32::try_from(x).ok()?, u32::try_from(y).ok()?);
        (x < self.image.width() && y < self.image.height()).then_some((x, y))
    }

    pub fn pixel(&mut self, x: i32, y: i32, color: [u8; 3]) {
        if let Some((x, y)) = self.index(x, y) {
            self.image.put_pixel(x, y, Rgb(color));
        }
    }

    /// Mix `color` over the existing pixel with `alpha` in 0.0..=1.0
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn blend(&mut self, x: i32, y: i32, color: [u8; 3], alpha: f32) {
        let Some((x, y)) = self.index(x, y) else {
            return;
        };
        let alpha = alpha.clamp(0.0, 1.0);
        let pixel = self.image.get_pixel_mut(x, y);
        for (channel, top) in pixel.0.iter_mut().zip(color) {
            let mixed = f32::from(*channel) * (1.0 - alpha) + f32::from(top) * alpha;
            *channel = mixed.round().clamp(0.0, 255.0) as u8;
        }
    }

    /// Draw text with its top-left corner at (`x`, `y`) and return the x
    /// just past the last glyph.
    pub fn text(&mut self, text: &str, x: i32, y: i32, font: &MonoFont<'_>, color: [u8; 3]) -> i32 {
        let style = MonoTextStyle::new(font, rgb888(color));
        Text::with_baseline(text, Point::new(x, y), style, Baseline::Top)
            .draw(self)
            .map_or(x, |next| next.x)
    }

    /// Line with constant opacity
    pub fn line(&mut self, from: (i32, i32), to: (i32, i32), color: [u8; 3], alpha: f32) {
        let line = Line::new(Point::new(from.0, from.1), Point::new(to.0, to.1));
        for point in line.points() {
            self.blend(point.x, point.y, color, alpha);
        }
    }
}

/// Width in pixels of `text` set in `font`
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn text_width(text: &str, font: &MonoFont<'_>) -> i32 {
    let count = text.chars().count() as u32;
    if count == 0 {
        return 0;
    }
    (count * font.character_size.width + (count - 1) * font.character_spacing) as i32
}

pub fn rgb888(color: [u8; 3]) -> Rgb888 {
    Rgb888::new(color[0], color[1], color[2])
}

impl DrawTarget for Canvas<'_> {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            self.pixel(point.x, point.y, [color.r(), color.g(), color.b()]);
        }
        Ok(())
    }
}

impl OriginDimensions for Canvas<'_> {
    fn size(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_graphics::mono_font::ascii::FONT_4X6;

    #[test]
    fn test_out_of_bounds_pixels_are_ignored() {
        let mut image = RgbImage::new(4, 4);
        let mut canvas = Canvas::new(&mut image);
        canvas.pixel(-1, 0, WHITE);
        canvas.pixel(4, 4, WHITE);
        canvas.pixel(1, 2, WHITE);
        assert_eq!(image.get_pixel(1, 2).0, WHITE);
        assert_eq!(image.pixels().filter(|p| p.0 == WHITE).count(), 1);
    }

    #[test]
    fn test_blend_mixes_with_background() {
        let mut image = RgbImage::from_pixel(1, 1, Rgb([100, 100, 100]));
        Canvas::new(&mut image).blend(0, 0, [200, 0, 100], 0.5);
        assert_eq!(image.get_pixel(0, 0).0, [150, 50, 100]);
    }

    #[test]
    fn test_text_draws_and_advances() {
        let mut image = RgbImage::new(32, 8);
        let end = Canvas::new(&mut image).text("12", 0, 0, &FONT_4X6, WHITE);
        assert_eq!(end, text_width("12", &FONT_4X6));
        assert!(image.pixels().any(|p| p.0 == WHITE));
    }

    #[test]
    fn test_line_covers_endpoints() {
        let mut image = RgbImage::new(8, 8);
        Canvas::new(&mut image).line((0, 0), (7, 7), WHITE, 1.0);
        assert_eq!(image.get_pixel(0, 0).0, WHITE);
        assert_eq!(image.get_pixel(7, 7).0, WHITE);
        assert_eq!(image.get_pixel(3, 3).0, WHITE);
    }
}
