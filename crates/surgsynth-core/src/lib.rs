//! Core types for synthetic surgical-tool scene generation.
//!
//! This crate owns the explicit scene model the render drivers mutate:
//! categories, an arena-backed [`SceneContext`], the pinhole camera, and the
//! samplers used for randomization. It does *not* render anything; rendering
//! lives behind the backend trait in `surgsynth-render`.

mod arena;
mod camera;
mod category;
mod image;
mod logger;
mod mesh;
mod sampling;
mod scene;

use std::path::PathBuf;

pub use arena::{Arena, Handle};
pub use camera::{euler_xyz_to_matrix, rotation_from_forward, CameraIntrinsics, CameraPose};
pub use category::{Category, TARGET_CATEGORY_IDS};
pub use image::{LabelMap, LabelMapView};
pub use mesh::{load_obj_info, Aabb, MaterialSlot, MeshError, MeshInfo};
pub use sampling::{
    sample_and_filter, sample_and_filter_counted, uniform, uniform_vec3, Sampled, Shell,
};
pub use scene::{
    Keyframe, Light, LightHandle, LightKind, Material, MaterialHandle, ObjectHandle, ObjectState,
    Perturbation, SceneContext, SceneError, SceneObject, SceneSnapshot, Transform,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, parse_level};

/// Errors reading JSON inputs owned by this crate.
#[derive(thiserror::Error, Debug)]
pub enum CoreIoError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
