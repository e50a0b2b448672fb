//! OBJ mesh metadata loading.
//!
//! Only what the scene orchestration needs is kept: local-space bounds for
//! visibility tests and the material slots declared by the MTL library.

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum MeshError {
    #[error("mesh file does not exist: {0}")]
    Missing(PathBuf),
    #[error("failed to load mesh {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },
    #[error("mesh {0} contains no vertices")]
    Empty(PathBuf),
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Aabb {
    pub fn from_points(points: impl IntoIterator<Item = Point3<f64>>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(lo, hi), p| {
            (
                Point3::new(lo.x.min(p.x), lo.y.min(p.y), lo.z.min(p.z)),
                Point3::new(hi.x.max(p.x), hi.y.max(p.y), hi.z.max(p.z)),
            )
        });
        Some(Self { min, max })
    }

    /// Unit cube centred at the origin, used when no geometry is known.
    pub fn unit() -> Self {
        Self {
            min: Point3::new(-0.5, -0.5, -0.5),
            max: Point3::new(0.5, 0.5, 0.5),
        }
    }

    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn extent(&self) -> Vector3<f64> {
        self.max - self.min
    }

    /// The eight corners, in no particular order.
    pub fn corners(&self) -> [Point3<f64>; 8] {
        let (a, b) = (self.min, self.max);
        [
            Point3::new(a.x, a.y, a.z),
            Point3::new(b.x, a.y, a.z),
            Point3::new(a.x, b.y, a.z),
            Point3::new(b.x, b.y, a.z),
            Point3::new(a.x, a.y, b.z),
            Point3::new(b.x, a.y, b.z),
            Point3::new(a.x, b.y, b.z),
            Point3::new(b.x, b.y, b.z),
        ]
    }
}

/// Material slot declared by a mesh's MTL library.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaterialSlot {
    pub name: String,
    pub diffuse: [f64; 3],
}

/// Metadata for one loaded OBJ file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeshInfo {
    pub path: PathBuf,
    pub name: String,
    pub vertex_count: usize,
    pub bounds: Aabb,
    pub materials: Vec<MaterialSlot>,
}

/// Load an OBJ file and collect its bounds and material slots.
///
/// A missing or unreadable MTL library is not an error: the mesh simply gets
/// no material slots and the scene assigns a default material.
pub fn load_obj_info(path: impl AsRef<Path>) -> Result<MeshInfo, MeshError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(MeshError::Missing(path.to_path_buf()));
    }

    let (models, materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
    )
    .map_err(|source| MeshError::Load {
        path: path.to_path_buf(),
        source,
    })?;

    let materials = materials.unwrap_or_else(|err| {
        log::debug!("no material library for {}: {err}", path.display());
        Vec::new()
    });

    let points = models.iter().flat_map(|m| {
        m.mesh
            .positions
            .chunks_exact(3)
            .map(|p| Point3::new(p[0] as f64, p[1] as f64, p[2] as f64))
    });
    let vertex_count: usize = models.iter().map(|m| m.mesh.positions.len() / 3).sum();
    let bounds = Aabb::from_points(points).ok_or_else(|| MeshError::Empty(path.to_path_buf()))?;

    let materials = materials
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let d = m.diffuse.unwrap_or([0.8, 0.8, 0.8]);
            MaterialSlot {
                name: if m.name.is_empty() {
                    format!("material_{i}")
                } else {
                    m.name.clone()
                },
                diffuse: [d[0] as f64, d[1] as f64, d[2] as f64],
            }
        })
        .collect();

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mesh".to_string());

    Ok(MeshInfo {
        path: path.to_path_buf(),
        name,
        vertex_count,
        bounds,
        materials,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const BOX_OBJ: &str = "\
mtllib box.mtl
v -1.0 -0.5 -0.25
v 1.0 -0.5 -0.25
v 1.0 0.5 -0.25
v -1.0 0.5 0.25
usemtl steel
f 1 2 3
usemtl gold
f 1 3 4
";

    const BOX_MTL: &str = "\
newmtl steel
Kd 0.7 0.7 0.7
newmtl gold
Kd 0.9 0.7 0.2
";

    #[test]
    fn loads_bounds_and_material_slots() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("box.obj"), BOX_OBJ).unwrap();
        fs::write(dir.path().join("box.mtl"), BOX_MTL).unwrap();

        let info = load_obj_info(dir.path().join("box.obj")).expect("load");
        assert_eq!(info.name, "box");
        assert!(info.vertex_count >= 4);
        assert_eq!(info.bounds.min, Point3::new(-1.0, -0.5, -0.25));
        assert_eq!(info.bounds.max, Point3::new(1.0, 0.5, 0.25));
        let names: Vec<_> = info.materials.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["steel", "gold"]);
    }

    #[test]
    fn missing_mesh_is_reported_with_its_path() {
        let err = load_obj_info("/definitely/not/here.obj").unwrap_err();
        assert!(matches!(err, MeshError::Missing(ref p) if p.ends_with("here.obj")));
        assert!(err.to_string().contains("here.obj"));
    }

    #[test]
    fn aabb_corners_span_the_box() {
        let b = Aabb::unit();
        let from_corners = Aabb::from_points(b.corners()).unwrap();
        assert_eq!(from_corners, b);
        assert_eq!(b.center(), Point3::origin());
    }
}
