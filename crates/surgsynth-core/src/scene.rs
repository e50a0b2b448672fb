//! Explicit scene context owned by a render loop.
//!
//! Objects, materials and lights live in generational arenas. Removing an
//! entry invalidates its handle, so a handle kept across `clear_objects`
//! fails loudly with [`SceneError::StaleHandle`] instead of aliasing a newer
//! object.

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use crate::arena::{Arena, Handle};
use crate::camera::{euler_xyz_to_matrix, CameraIntrinsics, CameraPose};
use crate::category::Category;
use crate::mesh::{load_obj_info, Aabb, MeshError, MeshInfo};

pub type ObjectHandle = Handle<SceneObject>;
pub type MaterialHandle = Handle<Material>;
pub type LightHandle = Handle<Light>;

#[derive(thiserror::Error, Debug)]
pub enum SceneError {
    #[error("stale {kind} handle {index}v{generation}")]
    StaleHandle {
        kind: &'static str,
        index: u32,
        generation: u32,
    },
    #[error(transparent)]
    Mesh(#[from] MeshError),
    #[error("world background image does not exist: {0}")]
    MissingBackground(PathBuf),
}

fn stale<T>(kind: &'static str, h: Handle<T>) -> SceneError {
    SceneError::StaleHandle {
        kind,
        index: h.index(),
        generation: h.generation(),
    }
}

/// Principled-shader parameters that the randomization touches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    pub base_color: [f64; 4],
    pub specular: f64,
    pub roughness: f64,
    pub metallic: f64,
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_color: [0.8, 0.8, 0.8, 1.0],
            specular: 0.5,
            roughness: 0.5,
            metallic: 0.0,
        }
    }

    pub fn with_base_color(mut self, rgba: [f64; 4]) -> Self {
        self.base_color = rgba;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightKind {
    Point,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Light {
    pub kind: LightKind,
    pub location: Point3<f64>,
    pub energy: f64,
}

impl Light {
    pub fn point(location: Point3<f64>, energy: f64) -> Self {
        Self {
            kind: LightKind::Point,
            location,
            energy,
        }
    }
}

/// Location, XYZ Euler rotation (radians) and per-axis scale.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub location: Vector3<f64>,
    pub rotation_euler: Vector3<f64>,
    pub scale: Vector3<f64>,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            location: Vector3::zeros(),
            rotation_euler: Vector3::zeros(),
            scale: Vector3::repeat(1.0),
        }
    }
}

impl Transform {
    /// Map a point from mesh-local space into world space.
    pub fn apply(&self, p: &Point3<f64>) -> Point3<f64> {
        let scaled = p.coords.component_mul(&self.scale);
        Point3::from(euler_xyz_to_matrix(&self.rotation_euler) * scaled + self.location)
    }
}

#[derive(Clone, Debug)]
pub struct SceneObject {
    pub name: String,
    pub mesh_path: PathBuf,
    pub category: Category,
    pub instance_id: u32,
    pub transform: Transform,
    /// Mesh-local bounds.
    pub bounds: Aabb,
    pub materials: Vec<MaterialHandle>,
}

impl SceneObject {
    #[inline]
    pub fn location(&self) -> Point3<f64> {
        Point3::from(self.transform.location)
    }

    /// World-space bounds center followed by the eight world-space corners.
    pub fn world_points(&self) -> [Point3<f64>; 9] {
        world_points(&self.transform, &self.bounds)
    }
}

fn world_points(transform: &Transform, bounds: &Aabb) -> [Point3<f64>; 9] {
    let corners = bounds.corners();
    let mut out = [transform.apply(&bounds.center()); 9];
    for (dst, c) in out[1..].iter_mut().zip(corners.iter()) {
        *dst = transform.apply(c);
    }
    out
}

/// Frozen, handle-free copy of one object at keyframe time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectState {
    pub name: String,
    pub mesh_path: PathBuf,
    pub category: Category,
    pub instance_id: u32,
    pub transform: Transform,
    pub bounds: Aabb,
    pub materials: Vec<Material>,
}

impl ObjectState {
    pub fn world_points(&self) -> [Point3<f64>; 9] {
        world_points(&self.transform, &self.bounds)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub objects: Vec<ObjectState>,
    pub lights: Vec<Light>,
    pub world_background: Option<PathBuf>,
}

/// A camera pose queued for rendering together with the scene it sees.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub pose: CameraPose,
    pub scene: SceneSnapshot,
}

pub struct SceneContext {
    objects: Arena<SceneObject>,
    materials: Arena<Material>,
    lights: Arena<Light>,
    world_background: Option<PathBuf>,
    intrinsics: Option<CameraIntrinsics>,
    keyframes: Vec<Keyframe>,
    next_instance_id: u32,
}

impl Default for SceneContext {
    fn default() -> Self {
        Self {
            objects: Arena::new(),
            materials: Arena::new(),
            lights: Arena::new(),
            world_background: None,
            intrinsics: None,
            keyframes: Vec::new(),
            next_instance_id: 1,
        }
    }
}

impl SceneContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_intrinsics(intrinsics: CameraIntrinsics) -> Self {
        Self {
            intrinsics: Some(intrinsics),
            ..Self::default()
        }
    }

    pub fn set_intrinsics(&mut self, intrinsics: CameraIntrinsics) {
        self.intrinsics = Some(intrinsics);
    }

    #[inline]
    pub fn intrinsics(&self) -> Option<&CameraIntrinsics> {
        self.intrinsics.as_ref()
    }

    /// Load an OBJ file and add it to the scene.
    pub fn load_object(
        &mut self,
        path: impl AsRef<Path>,
        category: Category,
    ) -> Result<ObjectHandle, SceneError> {
        let info = load_obj_info(path)?;
        log::debug!(
            "loaded {} ({} vertices, {} materials) as {:?}",
            info.path.display(),
            info.vertex_count,
            info.materials.len(),
            category
        );
        Ok(self.add_object(info, category))
    }

    /// Add an already loaded mesh. Every mesh gets one material per slot, or
    /// a single default material when it declares none.
    ///
    /// Instance ids start at 1 and are never handed out twice, even after the
    /// object is removed.
    pub fn add_object(&mut self, mesh: MeshInfo, category: Category) -> ObjectHandle {
        let materials = if mesh.materials.is_empty() {
            vec![self.create_material(Material::new(format!("{}_material", mesh.name)))]
        } else {
            mesh.materials
                .iter()
                .map(|slot| {
                    let [r, g, b] = slot.diffuse;
                    self.create_material(Material::new(slot.name.clone()).with_base_color([r, g, b, 1.0]))
                })
                .collect()
        };

        let instance_id = self.next_instance_id;
        self.next_instance_id += 1;

        self.objects.insert(SceneObject {
            name: mesh.name,
            mesh_path: mesh.path,
            category,
            instance_id,
            transform: Transform::default(),
            bounds: mesh.bounds,
            materials,
        })
    }

    pub fn object(&self, h: ObjectHandle) -> Result<&SceneObject, SceneError> {
        self.objects.get(h).ok_or_else(|| stale("object", h))
    }

    pub fn object_mut(&mut self, h: ObjectHandle) -> Result<&mut SceneObject, SceneError> {
        self.objects.get_mut(h).ok_or_else(|| stale("object", h))
    }

    pub fn objects(&self) -> impl Iterator<Item = (ObjectHandle, &SceneObject)> {
        self.objects.iter()
    }

    #[inline]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Remove an object together with the materials it references.
    pub fn remove_object(&mut self, h: ObjectHandle) -> Result<SceneObject, SceneError> {
        let obj = self.objects.remove(h).ok_or_else(|| stale("object", h))?;
        for m in &obj.materials {
            // shared materials may already be gone
            self.materials.remove(*m);
        }
        Ok(obj)
    }

    /// Remove every mesh, material and light. Instance ids keep counting.
    pub fn clear_objects(&mut self) {
        self.objects.clear();
        self.materials.clear();
        self.lights.clear();
    }

    pub fn create_material(&mut self, material: Material) -> MaterialHandle {
        self.materials.insert(material)
    }

    pub fn material(&self, h: MaterialHandle) -> Result<&Material, SceneError> {
        self.materials.get(h).ok_or_else(|| stale("material", h))
    }

    pub fn material_mut(&mut self, h: MaterialHandle) -> Result<&mut Material, SceneError> {
        self.materials.get_mut(h).ok_or_else(|| stale("material", h))
    }

    /// Handles of the materials used by an object.
    pub fn object_materials(&self, h: ObjectHandle) -> Result<Vec<MaterialHandle>, SceneError> {
        Ok(self.object(h)?.materials.clone())
    }

    /// Make `material` the only material of the object.
    pub fn replace_materials(
        &mut self,
        h: ObjectHandle,
        material: MaterialHandle,
    ) -> Result<(), SceneError> {
        if !self.materials.contains(material) {
            return Err(stale("material", material));
        }
        self.object_mut(h)?.materials = vec![material];
        Ok(())
    }

    pub fn add_light(&mut self, light: Light) -> LightHandle {
        self.lights.insert(light)
    }

    pub fn remove_light(&mut self, h: LightHandle) -> Result<Light, SceneError> {
        self.lights.remove(h).ok_or_else(|| stale("light", h))
    }

    pub fn lights(&self) -> impl Iterator<Item = (LightHandle, &Light)> {
        self.lights.iter()
    }

    /// Use an environment image as world background and lighting.
    pub fn set_world_background(&mut self, path: impl AsRef<Path>) -> Result<(), SceneError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(SceneError::MissingBackground(path.to_path_buf()));
        }
        self.world_background = Some(path.to_path_buf());
        Ok(())
    }

    #[inline]
    pub fn world_background(&self) -> Option<&Path> {
        self.world_background.as_deref()
    }

    /// Freeze the current scene into a handle-free copy.
    pub fn snapshot(&self) -> SceneSnapshot {
        let objects = self
            .objects
            .iter()
            .map(|(_, obj)| ObjectState {
                name: obj.name.clone(),
                mesh_path: obj.mesh_path.clone(),
                category: obj.category,
                instance_id: obj.instance_id,
                transform: obj.transform,
                bounds: obj.bounds,
                materials: obj
                    .materials
                    .iter()
                    .filter_map(|m| self.materials.get(*m).cloned())
                    .collect(),
            })
            .collect();
        SceneSnapshot {
            objects,
            lights: self.lights.iter().map(|(_, l)| l.clone()).collect(),
            world_background: self.world_background.clone(),
        }
    }

    /// Queue a camera pose; the current scene state is captured with it.
    pub fn add_camera_pose(&mut self, pose: CameraPose) {
        let scene = self.snapshot();
        self.keyframes.push(Keyframe { pose, scene });
    }

    #[inline]
    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    pub fn reset_keyframes(&mut self) {
        self.keyframes.clear();
    }

    /// Number of instance ids handed out so far.
    #[inline]
    pub fn issued_instance_ids(&self) -> u32 {
        self.next_instance_id - 1
    }

    /// Start a scoped perturbation. Every rotation changed through the guard
    /// is restored when it is dropped.
    pub fn perturb(&mut self) -> Perturbation<'_> {
        Perturbation {
            scene: self,
            saved: Vec::new(),
        }
    }
}

/// Scoped "perturb, act, restore" guard returned by [`SceneContext::perturb`].
pub struct Perturbation<'a> {
    scene: &'a mut SceneContext,
    saved: Vec<(ObjectHandle, Vector3<f64>)>,
}

impl Perturbation<'_> {
    /// Add `delta` to the object's Euler rotation.
    pub fn rotate_by(&mut self, h: ObjectHandle, delta: Vector3<f64>) -> Result<(), SceneError> {
        let obj = self.scene.object_mut(h)?;
        if !self.saved.iter().any(|(saved, _)| *saved == h) {
            self.saved.push((h, obj.transform.rotation_euler));
        }
        obj.transform.rotation_euler += delta;
        Ok(())
    }
}

impl Deref for Perturbation<'_> {
    type Target = SceneContext;

    fn deref(&self) -> &SceneContext {
        self.scene
    }
}

impl DerefMut for Perturbation<'_> {
    fn deref_mut(&mut self) -> &mut SceneContext {
        self.scene
    }
}

impl Drop for Perturbation<'_> {
    fn drop(&mut self) {
        for (h, rotation) in self.saved.drain(..).rev() {
            if let Some(obj) = self.scene.objects.get_mut(h) {
                obj.transform.rotation_euler = rotation;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_4;

    fn mesh(name: &str, slots: usize) -> MeshInfo {
        MeshInfo {
            path: PathBuf::from(format!("{name}.obj")),
            name: name.to_string(),
            vertex_count: 8,
            bounds: Aabb::unit(),
            materials: (0..slots)
                .map(|i| crate::mesh::MaterialSlot {
                    name: format!("{name}_{i}"),
                    diffuse: [0.5, 0.5, 0.5],
                })
                .collect(),
        }
    }

    #[test]
    fn instance_ids_keep_increasing_across_clears() {
        let mut scene = SceneContext::new();
        let mut ids = Vec::new();
        for round in 0..3 {
            let a = scene.add_object(mesh(&format!("a{round}"), 2), Category::NeedleHolder);
            let b = scene.add_object(mesh(&format!("b{round}"), 0), Category::Occluder);
            ids.push(scene.object(a).unwrap().instance_id);
            ids.push(scene.object(b).unwrap().instance_id);
            scene.clear_objects();
            assert!(scene.object(a).is_err());
        }
        assert_eq!(ids, [1, 2, 3, 4, 5, 6]);
        assert_eq!(scene.issued_instance_ids(), 6);
    }

    #[test]
    fn objects_get_one_material_per_slot_or_a_default() {
        let mut scene = SceneContext::new();
        let two = scene.add_object(mesh("holder", 2), Category::NeedleHolder);
        let none = scene.add_object(mesh("hand", 0), Category::Occluder);
        assert_eq!(scene.object_materials(two).unwrap().len(), 2);
        let mats = scene.object_materials(none).unwrap();
        assert_eq!(mats.len(), 1);
        assert_eq!(scene.material(mats[0]).unwrap().name, "hand_material");
    }

    #[test]
    fn removed_object_handle_is_stale() {
        let mut scene = SceneContext::new();
        let h = scene.add_object(mesh("t", 1), Category::Tweezers);
        let mat = scene.object_materials(h).unwrap()[0];
        scene.remove_object(h).unwrap();
        assert!(matches!(
            scene.object(h),
            Err(SceneError::StaleHandle { kind: "object", .. })
        ));
        assert!(scene.material(mat).is_err());
        assert!(scene.remove_object(h).is_err());
    }

    #[test]
    fn perturbation_restores_rotation_on_drop() {
        let mut scene = SceneContext::new();
        let h = scene.add_object(mesh("t", 1), Category::Tweezers);
        scene.object_mut(h).unwrap().transform.rotation_euler.y = FRAC_PI_4;
        {
            let mut p = scene.perturb();
            p.rotate_by(h, Vector3::new(0.0, 0.3, 0.0)).unwrap();
            p.rotate_by(h, Vector3::new(0.0, -0.1, 0.0)).unwrap();
            let y = p.object(h).unwrap().transform.rotation_euler.y;
            assert!((y - (FRAC_PI_4 + 0.2)).abs() < 1e-12);
        }
        assert_eq!(scene.object(h).unwrap().transform.rotation_euler.y, FRAC_PI_4);
    }

    #[test]
    fn perturbation_restores_rotation_on_error_path() {
        fn act(scene: &mut SceneContext, h: ObjectHandle) -> Result<(), SceneError> {
            let mut p = scene.perturb();
            p.rotate_by(h, Vector3::new(0.1, 0.2, 0.3))?;
            p.set_world_background("/no/such/world.hdr")?;
            Ok(())
        }

        let mut scene = SceneContext::new();
        let h = scene.add_object(mesh("t", 1), Category::Tweezers);
        assert!(matches!(act(&mut scene, h), Err(SceneError::MissingBackground(_))));
        assert_eq!(
            scene.object(h).unwrap().transform.rotation_euler,
            Vector3::zeros()
        );
    }

    #[test]
    fn keyframes_capture_scene_state_and_reset() {
        let mut scene = SceneContext::new();
        let h = scene.add_object(mesh("t", 1), Category::Tweezers);
        scene.add_light(Light::point(Point3::new(0.0, 0.0, 3.0), 100.0));
        scene.add_camera_pose(CameraPose::from_location_rotation(
            Vector3::new(0.0, -20.0, 0.0),
            nalgebra::Matrix3::identity(),
        ));
        scene.object_mut(h).unwrap().transform.location.x = 5.0;

        let kf = &scene.keyframes()[0];
        assert_eq!(kf.scene.objects[0].transform.location.x, 0.0);
        assert_eq!(kf.scene.lights.len(), 1);
        assert_eq!(kf.scene.objects[0].materials.len(), 1);

        scene.reset_keyframes();
        assert!(scene.keyframes().is_empty());
    }

    #[test]
    fn transform_applies_scale_rotation_then_translation() {
        let t = Transform {
            location: Vector3::new(2.0, 0.0, 0.0),
            rotation_euler: Vector3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2),
            scale: Vector3::new(2.0, 1.0, 1.0),
        };
        let p = t.apply(&Point3::new(1.0, 0.0, 0.0));
        assert!((p - Point3::new(2.0, 2.0, 0.0)).norm() < 1e-12);
    }
}
