//! Frame-sequence video I/O.
//!
//! A sequence is a directory of image frames plus a `sequence.json` manifest
//! with the frame rate, resolution and ordered frame file names. Directories
//! without a manifest are read as their image files in name order.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::OverlayError;

pub const MANIFEST_FILE: &str = "sequence.json";
/// Frame rate assumed for a directory without a manifest.
pub const DEFAULT_FPS: f64 = 30.0;

const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequenceManifest {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Frame files relative to the sequence directory, in playback order.
    pub frames: Vec<String>,
}

impl SequenceManifest {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, OverlayError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| OverlayError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| OverlayError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), OverlayError> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).map_err(|source| OverlayError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(|source| OverlayError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Ordered source of decoded frames.
pub trait FrameSource {
    fn fps(&self) -> f64;
    fn dimensions(&self) -> (u32, u32);
    /// The next frame, `None` once the source is exhausted.
    fn next_frame(&mut self) -> Option<Result<RgbImage, OverlayError>>;
}

/// Ordered sink of encoded frames. `finish` flushes whatever the sink needs
/// to make the written frames readable.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OverlayError>;
    fn finish(&mut self) -> Result<(), OverlayError>;
}

pub struct SequenceReader {
    dir: PathBuf,
    fps: f64,
    dimensions: (u32, u32),
    frames: Vec<String>,
    next: usize,
}

fn is_frame_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.as_str()))
}

impl SequenceReader {
    /// Open `dir`. `fps` overrides the manifest frame rate, or sets it for a
    /// directory without one.
    pub fn open(dir: impl AsRef<Path>, fps: Option<f64>) -> Result<Self, OverlayError> {
        let dir = dir.as_ref().to_path_buf();
        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest = if manifest_path.is_file() {
            SequenceManifest::load_json(&manifest_path)?
        } else {
            Self::scan(&dir, fps.unwrap_or(DEFAULT_FPS))?
        };
        if manifest.frames.is_empty() {
            return Err(OverlayError::EmptySequence(dir));
        }
        log::debug!(
            "sequence {}: {} frames, {}x{} @ {} fps",
            dir.display(),
            manifest.frames.len(),
            manifest.width,
            manifest.height,
            fps.unwrap_or(manifest.fps)
        );
        Ok(Self {
            fps: fps.unwrap_or(manifest.fps),
            dimensions: (manifest.width, manifest.height),
            frames: manifest.frames,
            next: 0,
            dir,
        })
    }

    fn scan(dir: &Path, fps: f64) -> Result<SequenceManifest, OverlayError> {
        let entries = fs::read_dir(dir).map_err(|source| OverlayError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut frames: Vec<String> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| is_frame_file(p))
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        frames.sort();
        let Some(first) = frames.first() else {
            return Err(OverlayError::EmptySequence(dir.to_path_buf()));
        };
        let path = dir.join(first);
        let (width, height) =
            image::image_dimensions(&path).map_err(|source| OverlayError::Decode {
                index: 0,
                path,
                source,
            })?;
        Ok(SequenceManifest {
            fps,
            width,
            height,
            frames,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for SequenceReader {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn next_frame(&mut self) -> Option<Result<RgbImage, OverlayError>> {
        let index = self.next;
        let path = self.dir.join(self.frames.get(index)?);
        self.next += 1;
        let frame = match image::open(&path) {
            Ok(img) => img.to_rgb8(),
            Err(source) => return Some(Err(OverlayError::Decode { index, path, source })),
        };
        if frame.dimensions() != self.dimensions {
            return Some(Err(OverlayError::FrameSize {
                index,
                expected: self.dimensions,
                found: frame.dimensions(),
            }));
        }
        Some(Ok(frame))
    }
}

/// Writes PNG frames `000000.png, 000001.png, ...` and the manifest on
/// [`FrameSink::finish`].
pub struct SequenceWriter {
    dir: PathBuf,
    manifest: SequenceManifest,
}

impl SequenceWriter {
    pub fn create(
        dir: impl AsRef<Path>,
        fps: f64,
        dimensions: (u32, u32),
    ) -> Result<Self, OverlayError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| OverlayError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            manifest: SequenceManifest {
                fps,
                width: dimensions.0,
                height: dimensions.1,
                frames: Vec::new(),
            },
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frames_written(&self) -> usize {
        self.manifest.frames.len()
    }
}

impl FrameSink for SequenceWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OverlayError> {
        let index = self.manifest.frames.len();
        let expected = (self.manifest.width, self.manifest.height);
        if frame.dimensions() != expected {
            return Err(OverlayError::FrameSize {
                index,
                expected,
                found: frame.dimensions(),
            });
        }
        let name = format!("{index:06}.png");
        let path = self.dir.join(&name);
        frame
            .save(&path)
            .map_err(|source| OverlayError::Image { path, source })?;
        self.manifest.frames.push(name);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), OverlayError> {
        self.manifest.write_json(self.dir.join(MANIFEST_FILE))
    }
}
