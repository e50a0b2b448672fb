//! Detections and the detector seam.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::OverlayError;

/// Binary instance mask, row-major.
///
/// Serialized as run lengths over the row-major pixel order, starting with a
/// run of background pixels (which may be zero).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MaskRle", into = "MaskRle")]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct MaskRle {
    width: u32,
    height: u32,
    counts: Vec<u32>,
}

impl TryFrom<MaskRle> for Mask {
    type Error = OverlayError;

    fn try_from(rle: MaskRle) -> Result<Self, Self::Error> {
        let covered: u64 = rle.counts.iter().map(|&c| c as u64).sum();
        let expected = rle.width as u64 * rle.height as u64;
        if expected == 0 || covered != expected {
            return Err(OverlayError::InvalidMask {
                width: rle.width,
                height: rle.height,
                covered,
            });
        }
        let mut data = Vec::with_capacity(expected as usize);
        for (i, &run) in rle.counts.iter().enumerate() {
            data.extend(std::iter::repeat(i % 2 == 1).take(run as usize));
        }
        Ok(Self {
            width: rle.width,
            height: rle.height,
            data,
        })
    }
}

impl From<Mask> for MaskRle {
    fn from(mask: Mask) -> Self {
        let mut counts = Vec::new();
        let mut current = false;
        let mut run = 0u32;
        for &v in &mask.data {
            if v != current {
                counts.push(run);
                current = v;
                run = 0;
            }
            run += 1;
        }
        counts.push(run);
        MaskRle {
            width: mask.width,
            height: mask.height,
            counts,
        }
    }
}

impl Mask {
    /// Mask from row-major values; `None` for an empty mask or when the
    /// length does not match.
    pub fn from_vec(width: u32, height: u32, data: Vec<bool>) -> Option<Self> {
        (width > 0 && height > 0 && data.len() == width as usize * height as usize).then_some(Self {
            width,
            height,
            data,
        })
    }

    pub fn filled(width: u32, height: u32, value: bool) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize],
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.data[y as usize * self.width as usize + x as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        self.data[y as usize * self.width as usize + x as usize] = value;
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    /// Nearest-neighbour resize: target pixel `(x, y)` samples source pixel
    /// `(floor(x * w / width), floor(y * h / height))`.
    pub fn resize_nearest(&self, width: u32, height: u32) -> Mask {
        if (width, height) == (self.width, self.height) {
            return self.clone();
        }
        if self.data.is_empty() {
            return Mask::filled(width, height, false);
        }
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            let sy = (y as u64 * self.height as u64 / height.max(1) as u64) as u32;
            for x in 0..width {
                let sx = (x as u64 * self.width as u64 / width.max(1) as u64) as u32;
                data.push(self.get(sx, sy));
            }
        }
        Mask {
            width,
            height,
            data,
        }
    }
}

/// One predicted instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class name as reported by the model, e.g. `Tweezers`.
    pub class_name: String,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in frame pixels.
    pub bbox: [f32; 4],
    #[serde(default)]
    pub mask: Option<Mask>,
}

/// Instance segmentation model, queried once per frame in frame order.
pub trait Detector {
    /// Every detection the model reports for `frame`, which is frame number
    /// `index` of its source. Thresholding is left to the caller.
    fn detect(&mut self, frame: &RgbImage, index: usize) -> Result<Vec<Detection>, OverlayError>;
}

impl<T: Detector + ?Sized> Detector for &mut T {
    fn detect(&mut self, frame: &RgbImage, index: usize) -> Result<Vec<Detection>, OverlayError> {
        (**self).detect(frame, index)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FramePredictions {
    #[serde(default)]
    pub detections: Vec<Detection>,
}

/// Replays predictions exported from a model run.
///
/// The JSON file holds `{"frames": [{"detections": [...]}, ...]}`, one entry
/// per frame in order. A still image uses the first entry. Frames past the end
/// of the list have no detections.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PrecomputedDetector {
    pub frames: Vec<FramePredictions>,
}

impl PrecomputedDetector {
    pub fn new(frames: Vec<FramePredictions>) -> Self {
        Self { frames }
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, OverlayError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| OverlayError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let detector: Self = serde_json::from_reader(std::io::BufReader::new(file)).map_err(
            |source| OverlayError::Json {
                path: path.to_path_buf(),
                source,
            },
        )?;
        log::debug!(
            "loaded predictions for {} frames from {}",
            detector.frames.len(),
            path.display()
        );
        Ok(detector)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), OverlayError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let file = std::fs::File::create(&path).map_err(|source| OverlayError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)
            .map_err(|source| OverlayError::Json { path, source })
    }
}

impl Detector for PrecomputedDetector {
    fn detect(&mut self, _frame: &RgbImage, index: usize) -> Result<Vec<Detection>, OverlayError> {
        Ok(self
            .frames
            .get(index)
            .map(|f| f.detections.clone())
            .unwrap_or_default())
    }
}
