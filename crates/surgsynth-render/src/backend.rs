//! Seams to the rendering engine: the renderer itself and the visibility test
//! used to accept camera poses.

use std::path::PathBuf;

use surgsynth_annotate::{AnnotationError, RenderResult};
use surgsynth_core::{CameraPose, ObjectHandle, SceneContext, SceneError};

use crate::config::ConfigError;

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Annotation(#[from] AnnotationError),
    #[error("camera intrinsics must be set before rendering")]
    MissingIntrinsics,
    #[error("failed to load world background {path}: {source}")]
    Background {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("render engine failed: {0}")]
    Engine(String),
    #[error("{unit}: accepted {accepted} of {requested} poses after {tries} tries")]
    Shortfall {
        unit: String,
        requested: usize,
        accepted: usize,
        tries: usize,
    },
    #[error("failed to wait for debugger: {0}")]
    Debug(#[source] std::io::Error),
}

/// Render options applied to every batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSettings {
    /// Path-tracing sample cap per pixel.
    pub max_samples: u32,
    /// Leave pixels not covered by any object fully transparent.
    pub transparent_background: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            max_samples: 100,
            transparent_background: true,
        }
    }
}

/// A renderer that turns the queued keyframes of a scene into frames.
///
/// Implementations render every keyframe of `scene` in order and return one
/// frame per keyframe, each carrying category and instance label maps plus
/// one [`surgsynth_annotate::InstanceRecord`] per instance that is present in
/// the frame.
pub trait RenderBackend {
    fn render(
        &mut self,
        scene: &SceneContext,
        settings: &RenderSettings,
    ) -> Result<RenderResult, RenderError>;
}

impl<B: RenderBackend + ?Sized> RenderBackend for &mut B {
    fn render(
        &mut self,
        scene: &SceneContext,
        settings: &RenderSettings,
    ) -> Result<RenderResult, RenderError> {
        (**self).render(scene, settings)
    }
}

/// Decides whether an object is visible from a candidate camera pose.
pub trait VisibilityOracle {
    fn is_visible(
        &mut self,
        scene: &SceneContext,
        object: ObjectHandle,
        pose: &CameraPose,
    ) -> Result<bool, RenderError>;
}

impl<V: VisibilityOracle + ?Sized> VisibilityOracle for &mut V {
    fn is_visible(
        &mut self,
        scene: &SceneContext,
        object: ObjectHandle,
        pose: &CameraPose,
    ) -> Result<bool, RenderError> {
        (**self).is_visible(scene, object, pose)
    }
}

/// Frustum test on the object's world-space bounds: visible when the bounds
/// center or any bounds corner lies in front of the camera and projects
/// inside the image.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrustumVisibility;

impl VisibilityOracle for FrustumVisibility {
    fn is_visible(
        &mut self,
        scene: &SceneContext,
        object: ObjectHandle,
        pose: &CameraPose,
    ) -> Result<bool, RenderError> {
        let intrinsics = scene.intrinsics().ok_or(RenderError::MissingIntrinsics)?;
        let obj = scene.object(object)?;
        Ok(obj
            .world_points()
            .iter()
            .filter_map(|p| pose.project(intrinsics, p))
            .any(|uv| intrinsics.contains(uv)))
    }
}
