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


//! Frame destinations.

use std::fs;
use std::io;
use std::path::PathBuf;

use image::{ImageFormat, RgbImage};
use log::debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),

    #[error("failed to write frame: {0}")]
    Io(#[from] io::Error),
}

/// Receives every rendered frame in order
pub trait FrameSink: Send {
    fn present(&mut self, frame: &RgbImage, index: u64) -> Result<(), SinkError>;
}

/// Writes frames as PNG.
///
/// By default the same file is replaced on every frame, through a temporary
/// file and a rename so readers never see a partial image. With `numbered`
/// each frame gets its own `<stem>-<index>.png` next to `path`.
#[derive(Debug)]
pub struct PngFileSink {
    path: PathBuf,
    numbered: bool,
}

impl PngFileSink {
    #[must_use]
    pub fn new(path: PathBuf, numbered: bool) -> Self {
        Self { path, numbered }
    }

    fn frame_path(&self, index: u64) -> PathBuf {
        if !self.numbered {
            return self.path.clone();
        }
        let stem = self
            .path
            .file_stem()
            .map_or_else(|| "frame".to_string(), |s| s.to_string_lossy().into_owned());
        self.path.with_file_name(format!("{stem}-{index:05}.png"))
    }
}

impl FrameSink for PngFileSink {
    fn present(&mut self, frame: &RgbImage, index: u64) -> Result<(), SinkError> {
        let path = self.frame_path(index);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("png.tmp");
        frame.save_with_format(&tmp, ImageFormat::Png)?;
        fs::rename(&tmp, &path)?;
        debug!("Wrote frame {index} to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_replaces_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let mut sink = PngFileSink::new(path.clone(), false);

        sink.present(&RgbImage::from_pixel(4, 2, Rgb([1, 2, 3])), 0).unwrap();
        sink.present(&RgbImage::from_pixel(4, 2, Rgb([9, 8, 7])), 1).unwrap();

        let written = image::open(&path).unwrap().to_rgb8();
        assert_eq!(written.get_pixel(0, 0).0, [9, 8, 7]);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_numbered_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = PngFileSink::new(dir.path().join("out/map.png"), true);
        sink.present(&RgbImage::new(2, 2), 3).unwrap();
        assert!(dir.path().join("out/map-00003.png").exists());
    }
}
