//! Randomized render drivers for synthetic surgical-tool datasets.
//!
//! A [`RenderDriver`] walks the units of a [`RenderConfig`] (single meshes or
//! needle holder / tweezers pairs), perturbs an explicit
//! [`surgsynth_core::SceneContext`], accepts camera poses through a
//! [`VisibilityOracle`] (by default [`OcclusionVisibility`], which lets the
//! hand and the other tools hide the target), renders through a [`RenderBackend`] and appends the
//! allow-listed annotations to a COCO store.
//!
//! ```no_run
//! use surgsynth_render::{RenderConfig, RenderDriver, SilhouetteBackend};
//!
//! let config = RenderConfig::load_json("render.json")?;
//! let mut driver = RenderDriver::new(config, SilhouetteBackend::new())?;
//! let summary = driver.run()?;
//! println!("{} images", summary.images);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod backend;
mod config;
mod driver;
pub mod randomize;
mod silhouette;

pub use backend::{FrustumVisibility, RenderBackend, RenderError, RenderSettings, VisibilityOracle};
pub use config::{find_hdr_files, ConfigError, DriverMode, RenderConfig, ShortfallPolicy};
pub use driver::{RenderDriver, RenderSummary, UnitSummary};
pub use silhouette::{OcclusionVisibility, SilhouetteBackend};
