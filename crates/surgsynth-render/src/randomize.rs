//! Domain randomization: material perturbation, light placement, camera
//! sampling and the fixed placement constants of the two driver modes.

use nalgebra::{Point3, Vector3};
use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::PI;

use surgsynth_core::{
    rotation_from_forward, uniform, uniform_vec3, CameraPose, Light, LightHandle, Material,
    ObjectHandle, SceneContext, SceneError, Shell,
};

/// Point light placed on a shell around a center, with a uniform energy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightSpec {
    pub shell: Shell,
    pub energy: (f64, f64),
}

const fn shell(radius: (f64, f64), elevation: (f64, f64)) -> Shell {
    Shell {
        radius_min: radius.0,
        radius_max: radius.1,
        elevation_min: elevation.0,
        elevation_max: elevation.1,
        azimuth_min: -180.0,
        azimuth_max: 180.0,
    }
}

/// Dim close light used for single tweezers.
pub const TWEEZERS_LIGHT: LightSpec = LightSpec {
    shell: shell((1.0, 2.0), (10.0, 20.0)),
    energy: (0.0, 4.0),
};

pub const NEEDLE_HOLDER_LIGHT: LightSpec = LightSpec {
    shell: shell((1.0, 3.0), (10.0, 50.0)),
    energy: (4.0, 14.0),
};

/// Paired mode without an HDRI world, centered between the two hands.
pub const STUDIO_LIGHT: LightSpec = LightSpec {
    shell: shell((1.0, 15.0), (10.0, 20.0)),
    energy: (60.0, 170.0),
};

/// Paired mode on an HDRI world, centered on the needle holder's hand.
pub const HDRI_LIGHT: LightSpec = LightSpec {
    shell: shell((1.0, 3.0), (10.0, 30.0)),
    energy: (200.0, 500.0),
};

pub const ORBIT_CAMERA: Shell = shell((10.0, 38.0), (-90.0, 90.0));
pub const LOOKAT_JITTER: f64 = 0.3;
pub const ROLL_JITTER: f64 = 0.3;

pub const FIXED_CAMERA_LOCATION: [f64; 3] = [0.0, -20.0, 0.0];

/// Single mode scales every tool by this.
pub const SINGLE_TOOL_SCALE: f64 = 1.2;
pub const NEEDLE_HOLDER_SCALE: f64 = 1.2;
pub const PAIRED_TWEEZERS_SCALE: f64 = 1.4;
pub const OCCLUDER_SCALE: f64 = 4.0;
/// Extra scale of the hand holding the tweezers in paired mode.
pub const TWEEZERS_HAND_SCALE: f64 = 1.2;

pub const SINGLE_OCCLUDER_OFFSET: [f64; 3] = [0.0, -0.2, -1.6];
pub const NEEDLE_LOCATION: [f64; 3] = [2.0, 0.0, 0.0];
pub const TWEEZERS_LOCATION: [f64; 3] = [-2.0, 0.0, 0.0];
pub const NEEDLE_HAND_OFFSET: [f64; 3] = [0.5, -0.2, -1.2];
pub const TWEEZERS_HAND_OFFSET: [f64; 3] = [-0.5, -0.2, -1.0];
pub const NEEDLE_Y_ROTATION: f64 = -PI / 4.0;
pub const TWEEZERS_Y_ROTATION: f64 = PI / 12.0;
/// Standard deviation of the per-iteration Y rotation jitter in paired mode.
pub const ROTATION_JITTER_STD: f64 = 0.2;

/// Matte dark gray-beige shared by all hands.
pub fn occluder_material() -> Material {
    Material {
        name: "hand_material".to_string(),
        base_color: [0.2, 0.18, 0.16, 1.0],
        specular: 0.1,
        roughness: 0.8,
        metallic: 0.0,
    }
}

/// Dark, mostly rough tweezers. In single mode only the first material is
/// touched; `all_materials` extends it to every slot.
pub fn randomize_tweezers<R: Rng + ?Sized>(
    scene: &mut SceneContext,
    h: ObjectHandle,
    rng: &mut R,
    all_materials: bool,
) -> Result<(), SceneError> {
    let materials = scene.object_materials(h)?;
    let take = if all_materials { materials.len() } else { 1 };
    for m in materials.into_iter().take(take) {
        let gray = uniform(rng, 0.02, 0.08);
        let mat = scene.material_mut(m)?;
        mat.base_color = [gray, gray, gray, 1.0];
        mat.roughness = uniform(rng, 0.5, 1.0);
        mat.metallic = uniform(rng, 0.0, 0.5);
    }
    Ok(())
}

/// Shiny metal on every needle holder material.
pub fn randomize_needle_holder<R: Rng + ?Sized>(
    scene: &mut SceneContext,
    h: ObjectHandle,
    rng: &mut R,
) -> Result<(), SceneError> {
    for m in scene.object_materials(h)? {
        let mat = scene.material_mut(m)?;
        mat.specular = uniform(rng, 0.25, 0.75);
        mat.roughness = uniform(rng, 0.0, 0.8);
        mat.metallic = uniform(rng, 0.5, 1.0);
    }
    Ok(())
}

/// Swap the light in `slot` for a freshly sampled one.
pub fn replace_light<R: Rng + ?Sized>(
    scene: &mut SceneContext,
    slot: &mut Option<LightHandle>,
    spec: &LightSpec,
    center: &Point3<f64>,
    rng: &mut R,
) -> Result<(), SceneError> {
    if let Some(old) = slot.take() {
        scene.remove_light(old)?;
    }
    let location = spec.shell.sample(rng, center);
    let energy = uniform(rng, spec.energy.0, spec.energy.1);
    *slot = Some(scene.add_light(Light::point(location, energy)));
    Ok(())
}

/// Camera on a shell around `center`, looking at a jittered point near it,
/// rolled upside down give or take [`ROLL_JITTER`].
pub fn sample_orbit_pose<R: Rng + ?Sized>(rng: &mut R, center: &Point3<f64>) -> CameraPose {
    let location = ORBIT_CAMERA.sample(rng, center);
    let lookat = center + uniform_vec3(rng, -LOOKAT_JITTER, LOOKAT_JITTER);
    let roll = PI + uniform(rng, -ROLL_JITTER, ROLL_JITTER);
    CameraPose::from_location_rotation(
        location.coords,
        rotation_from_forward(lookat - location, roll),
    )
}

/// The paired-mode camera: fixed location looking along +Y, random roll.
pub fn sample_fixed_pose<R: Rng + ?Sized>(rng: &mut R) -> CameraPose {
    let roll = PI * uniform(rng, 0.75, 1.0);
    CameraPose::from_location_rotation(
        Vector3::from(FIXED_CAMERA_LOCATION),
        rotation_from_forward(Vector3::y(), roll),
    )
}

/// Zero-mean Y rotation offset.
pub fn rotation_jitter<R: Rng + ?Sized>(rng: &mut R) -> Vector3<f64> {
    let n: f64 = rng.sample(StandardNormal);
    Vector3::new(0.0, n * ROTATION_JITTER_STD, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};
    use surgsynth_core::{Aabb, CameraIntrinsics, Category, MaterialSlot, MeshInfo};

    fn tool(scene: &mut SceneContext, slots: usize, category: Category) -> ObjectHandle {
        scene.add_object(
            MeshInfo {
                path: "tool.obj".into(),
                name: "tool".into(),
                vertex_count: 8,
                bounds: Aabb::unit(),
                materials: (0..slots)
                    .map(|i| MaterialSlot {
                        name: format!("m{i}"),
                        diffuse: [0.5, 0.5, 0.5],
                    })
                    .collect(),
            },
            category,
        )
    }

    #[test]
    fn tweezers_materials_stay_in_ranges() {
        let mut scene = SceneContext::new();
        let mut rng = StdRng::seed_from_u64(1);
        let h = tool(&mut scene, 2, Category::Tweezers);
        let before = scene.material(scene.object_materials(h).unwrap()[1]).unwrap().clone();

        for _ in 0..50 {
            randomize_tweezers(&mut scene, h, &mut rng, false).unwrap();
            let first = scene.material(scene.object_materials(h).unwrap()[0]).unwrap();
            let [r, g, b, a] = first.base_color;
            assert!((0.02..0.08).contains(&r) && r == g && g == b && a == 1.0);
            assert!((0.5..1.0).contains(&first.roughness));
            assert!((0.0..0.5).contains(&first.metallic));
        }
        let second = scene.material(scene.object_materials(h).unwrap()[1]).unwrap();
        assert_eq!(second, &before);

        randomize_tweezers(&mut scene, h, &mut rng, true).unwrap();
        let second = scene.material(scene.object_materials(h).unwrap()[1]).unwrap();
        assert_ne!(second, &before);
    }

    #[test]
    fn needle_holder_touches_every_material() {
        let mut scene = SceneContext::new();
        let mut rng = StdRng::seed_from_u64(2);
        let h = tool(&mut scene, 2, Category::NeedleHolder);
        randomize_needle_holder(&mut scene, h, &mut rng).unwrap();
        for m in scene.object_materials(h).unwrap() {
            let mat = scene.material(m).unwrap();
            assert!((0.25..0.75).contains(&mat.specular));
            assert!((0.0..0.8).contains(&mat.roughness));
            assert!((0.5..1.0).contains(&mat.metallic));
        }
    }

    #[test]
    fn light_is_replaced_not_accumulated() {
        let mut scene = SceneContext::new();
        let mut rng = StdRng::seed_from_u64(3);
        let mut slot = None;
        let center = Point3::new(1.0, 2.0, 3.0);
        for _ in 0..5 {
            replace_light(&mut scene, &mut slot, &NEEDLE_HOLDER_LIGHT, &center, &mut rng).unwrap();
        }
        let lights: Vec<_> = scene.lights().collect();
        assert_eq!(lights.len(), 1);
        let light = lights[0].1;
        let d = (light.location - center).norm();
        assert!((1.0..=3.0).contains(&d));
        assert!((4.0..14.0).contains(&light.energy));
        assert!(light.location.z > center.z);
    }

    #[test]
    fn orbit_pose_keeps_target_near_principal_point() {
        let intrinsics = CameraIntrinsics {
            fx: 500.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
            width: 640,
            height: 480,
        };
        let mut rng = StdRng::seed_from_u64(4);
        let center = Point3::origin();
        for _ in 0..100 {
            let pose = sample_orbit_pose(&mut rng, &center);
            let r = pose.location().norm();
            assert!((10.0..=38.0 + 1e-9).contains(&r));
            let uv = pose.project(&intrinsics, &center).expect("in front");
            assert!(intrinsics.contains(uv));
        }
    }

    #[test]
    fn fixed_pose_looks_along_y_from_fixed_spot() {
        let mut rng = StdRng::seed_from_u64(5);
        let pose = sample_fixed_pose(&mut rng);
        assert_relative_eq!(pose.location(), Vector3::new(0.0, -20.0, 0.0));
        assert_relative_eq!(pose.depth(&Point3::origin()), 20.0, epsilon = 1e-9);
    }
}
