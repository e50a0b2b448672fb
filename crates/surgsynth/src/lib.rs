//! Facade crate for the `surgsynth-*` workspace.
//!
//! This crate provides:
//! - re-exports of the member crates under short module names
//! - the `surgsynth` command line tool (feature `cli`)
//!
//! ## Quickstart
//!
//! ```no_run
//! use surgsynth::render::{RenderConfig, RenderDriver, SilhouetteBackend};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RenderConfig::load_json("render.json")?;
//! let summary = RenderDriver::new(config, SilhouetteBackend::new())?.run()?;
//! println!("{} images", summary.images);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `surgsynth::core`: scene context, camera model, categories, sampling, logging.
//! - `surgsynth::annotate`: category filter, mask contours and the COCO store.
//! - `surgsynth::render`: render config, randomization and the dataset driver.
//! - `surgsynth::composite`: background compositing of rendered cutouts.
//! - `surgsynth::overlay`: detection overlays on images and frame sequences.

pub use surgsynth_annotate as annotate;
pub use surgsynth_composite as composite;
pub use surgsynth_core as core;
pub use surgsynth_overlay as overlay;
pub use surgsynth_render as render;

pub use surgsynth_annotate::{CocoDataset, CocoStore};
pub use surgsynth_composite::{CompositeOptions, Compositor};
pub use surgsynth_core::{Category, SceneContext};
pub use surgsynth_overlay::{Detector, PrecomputedDetector};
pub use surgsynth_render::{RenderConfig, RenderDriver, RenderSummary};
