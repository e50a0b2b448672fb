//! Pinhole camera model and camera poses.
//!
//! Cameras follow the Blender convention: the camera looks down its local
//! `-Z` axis with `+Y` up. Projection into pixel coordinates flips to the
//! image convention (x right, y down).

use nalgebra::{Matrix3, Matrix4, Point2, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::CoreIoError;

/// Camera intrinsics as stored in the `camera_params` JSON file.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
}

impl CameraIntrinsics {
    /// Load intrinsics from a JSON file with `fx, fy, cx, cy, width, height`.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, CoreIoError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| CoreIoError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// The 3×3 calibration matrix `K`.
    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    #[inline]
    pub fn contains(&self, p: Point2<f64>) -> bool {
        p.x >= 0.0 && p.y >= 0.0 && p.x < self.width as f64 && p.y < self.height as f64
    }
}

/// Rigid cam-to-world transform for one rendered frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    pub cam2world: Matrix4<f64>,
}

impl CameraPose {
    /// Build the homogeneous transform from a location and a rotation.
    pub fn from_location_rotation(location: Vector3<f64>, rotation: Matrix3<f64>) -> Self {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&location);
        Self { cam2world: m }
    }

    pub fn location(&self) -> Vector3<f64> {
        self.cam2world.fixed_view::<3, 1>(0, 3).into_owned()
    }

    pub fn rotation(&self) -> Matrix3<f64> {
        self.cam2world.fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// World point in camera coordinates.
    pub fn world_to_camera(&self, p: &Point3<f64>) -> Point3<f64> {
        let r = self.rotation();
        Point3::from(r.transpose() * (p.coords - self.location()))
    }

    /// Project a world point to pixel coordinates.
    ///
    /// Returns `None` for points on or behind the image plane.
    pub fn project(&self, intrinsics: &CameraIntrinsics, p: &Point3<f64>) -> Option<Point2<f64>> {
        let pc = self.world_to_camera(p);
        let depth = -pc.z;
        if depth <= 1e-9 {
            return None;
        }
        let u = intrinsics.fx * pc.x / depth + intrinsics.cx;
        let v = intrinsics.fy * -pc.y / depth + intrinsics.cy;
        Some(Point2::new(u, v))
    }

    /// Distance along the viewing direction; negative when behind the camera.
    pub fn depth(&self, p: &Point3<f64>) -> f64 {
        -self.world_to_camera(p).z
    }
}

/// Rotation that points the camera's `-Z` axis along `forward`, keeping its
/// `+Y` axis as close to world `+Z` as possible, then rolls it by
/// `inplane_rot` radians around the viewing axis.
pub fn rotation_from_forward(forward: Vector3<f64>, inplane_rot: f64) -> Matrix3<f64> {
    let z_cam = -forward.normalize();
    let world_up = Vector3::z();
    let mut x_cam = world_up.cross(&z_cam);
    if x_cam.norm_squared() < 1e-12 {
        // looking straight up or down
        x_cam = Vector3::y().cross(&z_cam);
    }
    let x_cam = x_cam.normalize();
    let y_cam = z_cam.cross(&x_cam);
    let base = Matrix3::from_columns(&[x_cam, y_cam, z_cam]);
    base * Rotation3::from_axis_angle(&Vector3::z_axis(), inplane_rot).into_inner()
}

/// Rotation matrix from XYZ Euler angles (radians), applied X then Y then Z.
pub fn euler_xyz_to_matrix(euler: &Vector3<f64>) -> Matrix3<f64> {
    let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), euler.x);
    let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), euler.y);
    let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), euler.z);
    (rz * ry * rx).into_inner()
}
