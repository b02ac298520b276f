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


//! Frame composition for the map, overhead and stats views.

pub mod canvas;

use std::collections::HashMap;

use adsb_feed::geo::Viewport;
use adsb_feed::tracker::{AircraftState, TrackerSnapshot};
use chrono::{DateTime, Utc};
use embedded_graphics::mono_font::ascii::{FONT_4X6, FONT_5X8, FONT_6X10};
use embedded_graphics::mono_font::MonoFont;
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::aircraft::{AltitudeColorScale, Enrichment};
use crate::display_mode::EffectiveMode;

use canvas::{text_width, Canvas, BLACK, WHITE};

const LABEL: [u8; 3] = [200, 200, 200];
const DIM: [u8; 3] = [150, 150, 150];
const ROUTE: [u8; 3] = [150, 255, 150];
const UNKNOWN_ALTITUDE: [u8; 3] = [128, 128, 128];

/// 5x5 airplane, nose up
const AIRPLANE_ICON: [(i32, i32); 11] = [
    (2, 0),
    (2, 1),
    (0, 2),
    (1, 2),
    (2, 2),
    (3, 2),
    (4, 2),
    (2, 3),
    (1, 4),
    (2, 4),
    (3, 4),
];

/// Everything needed to draw one frame
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    pub viewport: &'a Viewport,
    /// Composed map background, drawn black when absent
    pub tile_image: Option<&'a RgbImage>,
    pub snapshot: &'a TrackerSnapshot,
    pub mode: EffectiveMode,
    pub target: (u32, u32),
    pub now: DateTime<Utc>,
    /// Enrichment by ICAO address
    pub enrichment: &'a HashMap<String, Enrichment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatPage {
    Closest,
    Fastest,
    Highest,
}

impl StatPage {
    fn title(self) -> &'static str {
        match self {
            Self::Closest => "CLOSEST",
            Self::Fastest => "FASTEST",
            Self::Highest => "HIGHEST",
        }
    }

    fn color(self) -> [u8; 3] {
        match self {
            Self::Closest => [255, 100, 0],
            Self::Fastest => [0, 255, 100],
            Self::Highest => [100, 150, 255],
        }
    }
}

/// Draws frames; holds only presentation settings so one instance can serve
/// every frame.
#[derive(Debug, Clone)]
pub struct RenderCompositor {
    colors: AltitudeColorScale,
    stats_interval_secs: i64,
}

impl RenderCompositor {
    #[must_use]
    pub fn new(colors: AltitudeColorScale, stats_interval_secs: u64) -> Self {
        Self {
            colors,
            stats_interval_secs: i64::try_from(stats_interval_secs).unwrap_or(i64::MAX).max(1),
        }
    }

    #[must_use]
    pub fn render(&self, input: &FrameInput<'_>) -> RgbImage {
        let (width, height) = (input.target.0.max(1), input.target.1.max(1));
        match input.mode {
            EffectiveMode::Map => self.render_map(input, width, height),
            EffectiveMode::Overhead => {
                let mut image = RgbImage::new(width, height);
                self.render_overhead(&mut Canvas::new(&mut image), input);
                image
            }
            EffectiveMode::Stats => {
                let mut image = RgbImage::new(width, height);
                self.render_stats(&mut Canvas::new(&mut image), input);
                image
            }
        }
    }

    fn altitude_color(&self, aircraft: &AircraftState) -> [u8; 3] {
        aircraft
            .altitude
            .map_or(UNKNOWN_ALTITUDE, |altitude| self.colors.color_for(altitude))
    }

    fn render_map(&self, input: &FrameInput<'_>, width: u32, height: u32) -> RgbImage {
        let mut image = match input.tile_image {
            Some(tiles) if tiles.dimensions() == (width, height) => tiles.clone(),
            Some(tiles) => imageops::resize(tiles, width, height, FilterType::Triangle),
            None => RgbImage::new(width, height),
        };
        let target = (width, height);
        let viewport = input.viewport;
        let mut canvas = Canvas::new(&mut image);

        if let Some((x, y)) = viewport.screen_position(viewport.center_lat(), viewport.center_lon(), target) {
            canvas.pixel(x, y, WHITE);
        }

        for aircraft in &input.snapshot.aircraft {
            let color = self.altitude_color(aircraft);
            let points: Vec<(i32, i32)> = aircraft
                .trail
                .points()
                .filter_map(|p| viewport.screen_position(p.lat, p.lon, target))
                .collect();
            #[allow(clippy::cast_precision_loss)]
            let count = points.len() as f32;
            for (i, segment) in points.windows(2).enumerate() {
                #[allow(clippy::cast_precision_loss)]
                let alpha = (i + 1) as f32 / count;
                canvas.line(segment[0], segment[1], color, alpha);
            }
        }

        for aircraft in &input.snapshot.aircraft {
            let Some((x, y)) = viewport.screen_position(aircraft.latitude, aircraft.longitude, target) else {
                continue;
            };
            let color = self.altitude_color(aircraft);
            if let Some(heading) = aircraft.heading {
                let (sin, cos) = heading.to_radians().sin_cos();
                #[allow(clippy::cast_possible_truncation)]
                let tip = (x + (sin * 3.0).round() as i32, y - (cos * 3.0).round() as i32);
                canvas.line((x, y), tip, color, 0.6);
            }
            canvas.pixel(x, y, brighten(color));
        }

        if !input.snapshot.is_empty() {
            let end = canvas.text(&input.snapshot.len().to_string(), 2, 2, &FONT_4X6, LABEL);
            draw_airplane_icon(&mut canvas, end + 2, 2, LABEL);
        }

        image
    }

    fn render_overhead(&self, canvas: &mut Canvas<'_>, input: &FrameInput<'_>) {
        let Some(aircraft) = input.snapshot.closest() else {
            draw_no_aircraft(canvas);
            return;
        };
        let enrichment = input.enrichment.get(&aircraft.icao);
        let type_code = enrichment
            .and_then(|e| e.type_code(aircraft))
            .or_else(|| aircraft.type_code.clone())
            .unwrap_or_else(|| "UNKNOWN".to_string());
        let altitude_color = self.altitude_color(aircraft);
        let height = i64::from(canvas.height());

        if is_small(canvas) {
            let half = half_width(canvas);
            canvas.text(aircraft.display_name(), 2, 1, &FONT_5X8, WHITE);
            canvas.text(&format!("ALT:{}ft", altitude_text(aircraft)), 2, 10, &FONT_4X6, altitude_color);
            canvas.text(&format!("SPD:{}kt", speed_text(aircraft)), half, 10, &FONT_4X6, LABEL);
            canvas.text(&format!("DIST:{:.2}mi", aircraft.distance_miles), 2, 17, &FONT_4X6, LABEL);
            if let Some(heading) = aircraft.heading {
                canvas.text(&format!("HDG:{heading:.0}"), half, 17, &FONT_4X6, LABEL);
            }
            if 24 + 6 <= height {
                canvas.text(&format!("TYPE:{type_code}"), 2, 24, &FONT_4X6, DIM);
            }
            return;
        }

        let title = "OVERHEAD AIRCRAFT";
        let title_x = (i32::try_from(canvas.width()).unwrap_or(i32::MAX) - text_width(title, &FONT_6X10)) / 2;
        canvas.text(title, title_x.max(0), 4, &FONT_6X10, [255, 200, 0]);

        let mut lines = vec![
            (format!("Callsign: {}", aircraft.display_name()), WHITE),
            (format!("Altitude: {} ft", altitude_text(aircraft)), altitude_color),
            (format!("Speed: {} knots", speed_text(aircraft)), LABEL),
            (format!("Distance: {:.2} miles", aircraft.distance_miles), [255, 150, 0]),
        ];
        if let Some(heading) = aircraft.heading {
            lines.push((format!("Heading: {heading:.0}"), LABEL));
        }
        lines.push((format!("Type: {type_code}"), DIM));
        draw_column(canvas, 4, 18, &lines, &FONT_5X8);
    }

    fn stat_page(&self, now: DateTime<Utc>) -> StatPage {
        match now.timestamp().div_euclid(self.stats_interval_secs).rem_euclid(3) {
            0 => StatPage::Closest,
            1 => StatPage::Fastest,
            _ => StatPage::Highest,
        }
    }

    fn render_stats(&self, canvas: &mut Canvas<'_>, input: &FrameInput<'_>) {
        let snapshot = input.snapshot;
        let page = self.stat_page(input.now);
        let chosen = match page {
            StatPage::Closest => snapshot.closest(),
            StatPage::Fastest => snapshot.fastest(),
            StatPage::Highest => snapshot.highest(),
        };
        // no aircraft reports speed or altitude yet
        let Some(aircraft) = chosen.or_else(|| snapshot.closest()) else {
            draw_no_aircraft(canvas);
            return;
        };

        let key_stat = match page {
            StatPage::Closest => format!("{:.2}mi", aircraft.distance_miles),
            StatPage::Fastest => format!("{}kt", speed_text(aircraft)),
            StatPage::Highest => format!("{}ft", altitude_text(aircraft)),
        };
        let altitude_color = self.altitude_color(aircraft);
        let details = detail_lines(input.enrichment.get(&aircraft.icao), is_small(canvas));
        let width = i32::try_from(canvas.width()).unwrap_or(i32::MAX);

        if is_small(canvas) {
            // unlabeled summary leaves room for the detail column
            let summary = if details.is_empty() {
                format!("ALT:{} SPD:{}", altitude_text(aircraft), speed_text(aircraft))
            } else {
                format!("{}ft {}kt", altitude_text(aircraft), speed_text(aircraft))
            };
            let left_end = [
                canvas.text(page.title(), 2, 1, &FONT_5X8, page.color()),
                canvas.text(aircraft.display_name(), 2, 10, &FONT_4X6, WHITE),
                canvas.text(&key_stat, 2, 17, &FONT_4X6, altitude_color),
                canvas.text(&summary, 2, 24, &FONT_4X6, DIM),
            ]
            .into_iter()
            .max()
            .unwrap_or(0);
            draw_column(canvas, (width - 60).max(left_end + 4), 1, &details, &FONT_4X6);
            return;
        }

        canvas.text(page.title(), 4, 4, &FONT_6X10, page.color());
        let mut lines = vec![
            (format!("Callsign: {}", aircraft.display_name()), WHITE),
            (key_stat, page.color()),
            (format!("Altitude: {} ft", altitude_text(aircraft)), altitude_color),
            (format!("Speed: {} knots", speed_text(aircraft)), LABEL),
            (format!("Distance: {:.2} miles", aircraft.distance_miles), LABEL),
        ];
        if let Some(heading) = aircraft.heading {
            lines.push((format!("Heading: {heading:.0}"), DIM));
        }
        draw_column(canvas, 4, 18, &lines, &FONT_5X8);
        draw_column(canvas, (width - 80).max(0), 4, &details, &FONT_5X8);
    }
}

/// Enrichment lines for the stats view; absent fields are left out
fn detail_lines(enrichment: Option<&Enrichment>, small: bool) -> Vec<(String, [u8; 3])> {
    let Some(enrichment) = enrichment else {
        return Vec::new();
    };
    let (mfr, mdl, opr, from, to, max_operator) = if small {
        ("MFR", "MDL", "OPR", "FROM", "TO", 12)
    } else {
        ("Manufacturer", "Model", "Operator", "From", "To", 20)
    };

    let mut lines = Vec::new();
    if let Some(manufacturer) = enrichment.manufacturer() {
        lines.push((format!("{mfr}: {manufacturer}"), LABEL));
    }
    if let Some(model) = enrichment.model() {
        lines.push((format!("{mdl}: {model}"), LABEL));
    }
    if let Some(operator) = enrichment.operator() {
        let operator: String = operator.chars().take(max_operator).collect();
        lines.push((format!("{opr}: {operator}"), LABEL));
    }
    if let (Some(origin), Some(destination)) = (enrichment.origin(), enrichment.destination()) {
        lines.push((format!("{from}: {origin}"), ROUTE));
        lines.push((format!("{to}: {destination}"), ROUTE));
    }
    lines
}

/// Stack lines downwards from `y`, stopping at the first that would not fit
#[allow(clippy::cast_possible_wrap)]
fn draw_column(canvas: &mut Canvas<'_>, x: i32, mut y: i32, lines: &[(String, [u8; 3])], font: &MonoFont<'_>) {
    let line_height = font.character_size.height as i32;
    let spacing = line_height + 1;
    let bottom = i32::try_from(canvas.height()).unwrap_or(i32::MAX);
    for (text, color) in lines {
        if y + line_height > bottom {
            break;
        }
        canvas.text(text, x, y, font, *color);
        y += spacing;
    }
}

fn draw_no_aircraft(canvas: &mut Canvas<'_>) {
    let text = "No Aircraft";
    let width = i32::try_from(canvas.width()).unwrap_or(i32::MAX);
    let height = i32::try_from(canvas.height()).unwrap_or(i32::MAX);
    let x = (width - text_width(text, &FONT_5X8)) / 2;
    canvas.text(text, x.max(0), (height / 2 - 4).max(0), &FONT_5X8, LABEL);
}

/// Airplane icon with a black outline, top-left at (`x`, `y`)
fn draw_airplane_icon(canvas: &mut Canvas<'_>, x: i32, y: i32, color: [u8; 3]) {
    for (px, py) in AIRPLANE_ICON {
        for dx in -1..=1 {
            for dy in -1..=1 {
                if !AIRPLANE_ICON.contains(&(px + dx, py + dy)) {
                    canvas.pixel(x + px + dx, y + py + dy, BLACK);
                }
            }
        }
    }
    for (px, py) in AIRPLANE_ICON {
        canvas.pixel(x + px, y + py, color);
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn brighten(color: [u8; 3]) -> [u8; 3] {
    color.map(|c| (f32::from(c) * 1.3).round().min(255.0) as u8)
}

fn is_small(canvas: &Canvas<'_>) -> bool {
    canvas.width() <= 128 && canvas.height() <= 32
}

fn half_width(canvas: &Canvas<'_>) -> i32 {
    i32::try_from(canvas.width() / 2).unwrap_or(i32::MAX)
}

fn altitude_text(aircraft: &AircraftState) -> String {
    aircraft.altitude.map_or_else(|| "--".to_string(), |altitude| altitude.to_string())
}

fn speed_text(aircraft: &AircraftState) -> String {
    aircraft.speed.map_or_else(|| "--".to_string(), |speed| format!("{speed:.0}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use adsb_feed::geo::ZoomBreakpoints;
    use adsb_feed::tracker::{Highlights, Trail};
    use chrono::TimeZone;
    use image::Rgb;

    use crate::aircraft::{AircraftCategory, AircraftInfo, FlightPlan};

    const HIGH: [u8; 3] = [0, 0, 200];

    fn viewport() -> Viewport {
        Viewport::new(40.0, -74.0, 10.0, &ZoomBreakpoints::default()).unwrap()
    }

    fn aircraft(icao: &str, lat: f64, lon: f64, altitude: i32, speed: f64, distance: f64) -> AircraftState {
        AircraftState {
            icao: icao.to_string(),
            callsign: Some(format!("TST{icao}")),
            registration: None,
            type_code: None,
            latitude: lat,
            longitude: lon,
            altitude: Some(altitude),
            speed: Some(speed),
            heading: None,
            distance_miles: distance,
            bearing: 0.0,
            last_seen: Utc::now(),
            trail: Trail::default(),
        }
    }

    fn snapshot(aircraft: Vec<AircraftState>) -> TrackerSnapshot {
        let first = aircraft.first().map(|a| a.icao.clone());
        TrackerSnapshot {
            highlights: Highlights {
                closest: first.clone(),
                fastest: first.clone(),
                highest: first,
            },
            aircraft,
            last_report: None,
        }
    }

    fn compositor() -> RenderCompositor {
        RenderCompositor::new(AltitudeColorScale::new(AltitudeColorScale::default_bands()).unwrap(), 10)
    }

    fn render(mode: EffectiveMode, snapshot: &TrackerSnapshot, target: (u32, u32), now: DateTime<Utc>) -> RgbImage {
        let viewport = viewport();
        let enrichment = HashMap::new();
        compositor().render(&FrameInput {
            viewport: &viewport,
            tile_image: None,
            snapshot,
            mode,
            target,
            now,
            enrichment: &enrichment,
        })
    }

    fn has_color(image: &RgbImage, color: [u8; 3]) -> bool {
        image.pixels().any(|p| p.0 == color)
    }

    #[test]
    fn test_map_marks_center_and_aircraft() {
        let viewport = viewport();
        let snapshot = snapshot(vec![aircraft("ABC123", 40.01, -73.95, 35_000, 450.0, 2.7)]);
        let image = render(EffectiveMode::Map, &snapshot, (128, 32), Utc::now());

        assert_eq!(image.dimensions(), (128, 32));
        assert_eq!(image.get_pixel(64, 16).0, WHITE);
        let (x, y) = viewport.screen_position(40.01, -73.95, (128, 32)).unwrap();
        #[allow(clippy::cast_sign_loss)]
        let pixel = image.get_pixel(x as u32, y as u32).0;
        assert_eq!(pixel, brighten(HIGH));
        assert!(has_color(&image, LABEL), "count and icon missing");
    }

    #[test]
    fn test_map_draws_over_background() {
        let viewport = viewport();
        let background = RgbImage::from_pixel(128, 32, Rgb([10, 20, 30]));
        let snapshot = TrackerSnapshot::default();
        let enrichment = HashMap::new();
        let image = compositor().render(&FrameInput {
            viewport: &viewport,
            tile_image: Some(&background),
            snapshot: &snapshot,
            mode: EffectiveMode::Map,
            target: (128, 32),
            now: Utc::now(),
            enrichment: &enrichment,
        });
        assert_eq!(image.get_pixel(0, 31).0, [10, 20, 30]);
        assert_eq!(image.get_pixel(64, 16).0, WHITE);
        assert!(!has_color(&image, LABEL), "no count without aircraft");
    }

    #[test]
    fn test_overhead_without_aircraft() {
        let image = render(EffectiveMode::Overhead, &TrackerSnapshot::default(), (128, 32), Utc::now());
        assert!(has_color(&image, LABEL));
        assert!(!has_color(&image, WHITE));
    }

    #[test]
    fn test_overhead_shows_closest() {
        let snapshot = snapshot(vec![aircraft("ABC123", 40.01, -74.0, 35_000, 450.0, 0.7)]);
        for target in [(128, 32), (192, 96)] {
            let image = render(EffectiveMode::Overhead, &snapshot, target, Utc::now());
            assert!(has_color(&image, WHITE), "callsign missing at {target:?}");
            assert!(has_color(&image, HIGH), "altitude missing at {target:?}");
            assert!(has_color(&image, DIM), "type line missing at {target:?}");
        }
    }

    #[test]
    fn test_stats_pages_rotate_with_time() {
        let snapshot = snapshot(vec![aircraft("ABC123", 40.01, -74.0, 35_000, 450.0, 0.7)]);
        let at = |secs| Utc.timestamp_opt(secs, 0).unwrap();

        let closest = render(EffectiveMode::Stats, &snapshot, (128, 32), at(1_000_000_020));
        let fastest = render(EffectiveMode::Stats, &snapshot, (128, 32), at(1_000_000_030));
        let highest = render(EffectiveMode::Stats, &snapshot, (128, 32), at(1_000_000_049));

        assert!(has_color(&closest, StatPage::Closest.color()));
        assert!(has_color(&fastest, StatPage::Fastest.color()));
        assert!(has_color(&highest, StatPage::Highest.color()));
        assert!(!has_color(&closest, StatPage::Fastest.color()));
    }

    #[test]
    fn test_stats_without_aircraft() {
        let image = render(EffectiveMode::Stats, &TrackerSnapshot::default(), (128, 32), Utc::now());
        assert!(has_color(&image, LABEL));
    }

    #[test]
    fn test_small_stats_keeps_details_clear_of_summary() {
        let snapshot = snapshot(vec![aircraft("ABC123", 40.01, -74.0, 35_000, 450.0, 0.7)]);
        let viewport = viewport();
        let enrichment = HashMap::from([(
            "ABC123".to_string(),
            Enrichment {
                flight_plan: Some(FlightPlan {
                    origin: Some("KJFK".to_string()),
                    destination: Some("KLAX".to_string()),
                    aircraft_type: None,
                }),
                info: Some(AircraftInfo {
                    icao: "ABC123".to_string(),
                    reg: None,
                    icao_type: None,
                    manufacturer: Some("Boeing".to_string()),
                    model: Some("737-800".to_string()),
                    operator: Some("Delta".to_string()),
                }),
                category: AircraftCategory::Unknown,
            },
        )]);
        let image = compositor().render(&FrameInput {
            viewport: &viewport,
            tile_image: None,
            snapshot: &snapshot,
            mode: EffectiveMode::Stats,
            target: (128, 32),
            now: Utc.timestamp_opt(1_000_000_020, 0).unwrap(),
            enrichment: &enrichment,
        });

        let blank_column = |x: u32| (0..32).all(|y| image.get_pixel(x, y).0 == BLACK);
        let lit = |xs: std::ops::Range<u32>, ys: std::ops::Range<u32>| {
            xs.flat_map(|x| ys.clone().map(move |y| (x, y)))
                .any(|(x, y)| image.get_pixel(x, y).0 != BLACK)
        };
        assert!(lit(2..40, 24..30), "summary line missing");
        assert!(lit(68..128, 22..28), "fourth detail line missing");
        assert!(
            (40..68).any(|x| blank_column(x) && blank_column(x + 1)),
            "summary and detail column touch"
        );
    }

    #[test]
    fn test_detail_lines_omit_absent_fields() {
        assert!(detail_lines(None, true).is_empty());

        let enrichment = Enrichment {
            flight_plan: Some(FlightPlan {
                origin: Some("KJFK".to_string()),
                destination: None,
                aircraft_type: None,
            }),
            info: Some(AircraftInfo {
                icao: "ABC123".to_string(),
                reg: None,
                icao_type: None,
                manufacturer: Some("Boeing".to_string()),
                model: None,
                operator: Some("A Very Long Operator Name Inc".to_string()),
            }),
            category: AircraftCategory::Unknown,
        };
        let lines: Vec<String> = detail_lines(Some(&enrichment), true).into_iter().map(|(text, _)| text).collect();
        assert_eq!(lines, vec!["MFR: Boeing".to_string(), "OPR: A Very Long ".to_string()]);
    }

    #[test]
    fn test_airplane_icon_has_outline() {
        let mut image = RgbImage::from_pixel(9, 9, Rgb([50, 50, 50]));
        draw_airplane_icon(&mut Canvas::new(&mut image), 2, 2, LABEL);
        assert_eq!(image.get_pixel(4, 2).0, LABEL);
        assert_eq!(image.get_pixel(4, 1).0, BLACK);
        assert_eq!(image.get_pixel(0, 0).0, [50, 50, 50]);
    }
}
