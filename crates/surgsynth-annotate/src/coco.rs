//! Append-only COCO annotation store.
//!
//! Layout under the store directory:
//!
//! ```text
//! coco_annotations.json
//! images/000000.png
//! images/000001.png
//! ...
//! ```
//!
//! Opening an existing store continues image and annotation numbering after
//! the entries already on disk, so repeated render iterations (and repeated
//! runs) accumulate into one dataset.

use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use surgsynth_core::Category;

use crate::contour::{label_components_of, polygon_area};
use crate::result::{InstanceRecord, RenderResult, RenderedFrame};

pub const ANNOTATIONS_FILE: &str = "coco_annotations.json";
pub const IMAGES_DIR: &str = "images";

#[derive(thiserror::Error, Debug)]
pub enum AnnotationError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("failed to write image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("frame {frame}: label map is {map_w}x{map_h}, color buffer is {img_w}x{img_h}")]
    SizeMismatch {
        frame: usize,
        map_w: usize,
        map_h: usize,
        img_w: u32,
        img_h: u32,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> AnnotationError + '_ {
    move |source| AnnotationError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CocoInfo {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CocoCategory {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub supercategory: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CocoImage {
    pub id: u64,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CocoAnnotation {
    pub id: u64,
    pub image_id: u64,
    pub category_id: u32,
    /// One flat `[x0, y0, x1, y1, ...]` polygon per connected component.
    pub segmentation: Vec<Vec<f64>>,
    pub area: f64,
    /// `[x, y, width, height]` in pixels.
    pub bbox: [f64; 4],
    pub iscrowd: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CocoDataset {
    #[serde(default)]
    pub info: CocoInfo,
    #[serde(default)]
    pub categories: Vec<CocoCategory>,
    #[serde(default)]
    pub images: Vec<CocoImage>,
    #[serde(default)]
    pub annotations: Vec<CocoAnnotation>,
}

impl CocoDataset {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, AnnotationError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(io_err(path))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), AnnotationError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(io_err(path))
    }

    fn next_image_id(&self) -> u64 {
        self.images.iter().map(|i| i.id + 1).max().unwrap_or(0)
    }

    fn next_annotation_id(&self) -> u64 {
        self.annotations.iter().map(|a| a.id + 1).max().unwrap_or(0)
    }

    fn ensure_category(&mut self, record: &InstanceRecord) {
        if self.categories.iter().any(|c| c.id == record.category_id) {
            return;
        }
        let name = Category::from_id(record.category_id)
            .map(|c| c.coco_name().to_string())
            .unwrap_or_else(|| record.name.clone());
        self.categories.push(CocoCategory {
            id: record.category_id,
            name,
            supercategory: "instrument".to_string(),
        });
        self.categories.sort_by_key(|c| c.id);
    }
}

/// Summary of one [`CocoStore::append`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AppendStats {
    pub images: usize,
    pub annotations: usize,
    /// Records dropped because their instance covered no pixel.
    pub skipped_empty: usize,
}

pub struct CocoStore {
    dir: PathBuf,
    dataset: CocoDataset,
}

impl CocoStore {
    /// Open the store in `dir`, loading any annotations already there.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, AnnotationError> {
        let dir = dir.as_ref().to_path_buf();
        let images = dir.join(IMAGES_DIR);
        fs::create_dir_all(&images).map_err(io_err(&images))?;

        let file = dir.join(ANNOTATIONS_FILE);
        let dataset = if file.is_file() {
            let dataset = CocoDataset::load_json(&file)?;
            log::info!(
                "appending to {} ({} images, {} annotations)",
                file.display(),
                dataset.images.len(),
                dataset.annotations.len()
            );
            dataset
        } else {
            CocoDataset {
                info: CocoInfo {
                    description: "surgsynth synthetic surgical tools".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
                ..CocoDataset::default()
            }
        };
        Ok(Self { dir, dataset })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dataset(&self) -> &CocoDataset {
        &self.dataset
    }

    pub fn annotations_path(&self) -> PathBuf {
        self.dir.join(ANNOTATIONS_FILE)
    }

    /// Write every frame's color buffer and its annotations, then persist the
    /// JSON file.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip(self, result), fields(frames = result.len()))
    )]
    pub fn append(&mut self, result: &RenderResult) -> Result<AppendStats, AnnotationError> {
        let mut stats = AppendStats::default();
        for (idx, frame) in result.frames.iter().enumerate() {
            self.append_frame(idx, frame, &mut stats)?;
        }
        self.save()?;
        log::debug!(
            "appended {} images, {} annotations ({} empty instances skipped)",
            stats.images,
            stats.annotations,
            stats.skipped_empty
        );
        Ok(stats)
    }

    fn append_frame(
        &mut self,
        idx: usize,
        frame: &RenderedFrame,
        stats: &mut AppendStats,
    ) -> Result<(), AnnotationError> {
        let map = &frame.instance_segmap;
        let (w, h) = frame.color.dimensions();
        if map.width != w as usize || map.height != h as usize {
            return Err(AnnotationError::SizeMismatch {
                frame: idx,
                map_w: map.width,
                map_h: map.height,
                img_w: w,
                img_h: h,
            });
        }

        let image_id = self.dataset.next_image_id();
        let file_name = format!("{IMAGES_DIR}/{image_id:06}.png");
        let path = self.dir.join(&file_name);
        frame
            .color
            .save(&path)
            .map_err(|source| AnnotationError::Image {
                path: path.clone(),
                source,
            })?;
        self.dataset.images.push(CocoImage {
            id: image_id,
            file_name,
            width: w,
            height: h,
        });
        stats.images += 1;

        for record in &frame.instance_records {
            let components = label_components_of(map.view(), record.instance_id);
            if components.is_empty() {
                stats.skipped_empty += 1;
                continue;
            }

            let area: usize = components.iter().map(|c| c.area).sum();
            let (mut x0, mut y0, mut x1, mut y1) = (u32::MAX, u32::MAX, 0, 0);
            for c in &components {
                let [bx, by, bw, bh] = c.bbox;
                x0 = x0.min(bx);
                y0 = y0.min(by);
                x1 = x1.max(bx + bw);
                y1 = y1.max(by + bh);
            }
            let segmentation = components
                .iter()
                // degenerate outlines are not valid COCO polygons
                .filter(|c| c.polygon.len() >= 3 && polygon_area(&c.polygon) > 0.0)
                .map(|c| c.flat_polygon())
                .collect();

            self.dataset.ensure_category(record);
            let id = self.dataset.next_annotation_id();
            self.dataset.annotations.push(CocoAnnotation {
                id,
                image_id,
                category_id: record.category_id,
                segmentation,
                area: area as f64,
                bbox: [x0 as f64, y0 as f64, (x1 - x0) as f64, (y1 - y0) as f64],
                iscrowd: 0,
            });
            stats.annotations += 1;
        }
        Ok(())
    }

    pub fn save(&self) -> Result<(), AnnotationError> {
        self.dataset.write_json(self.annotations_path())
    }
}
