use std::fs;
use std::path::{Path, PathBuf};

use surgsynth_annotate::{CocoDataset, CocoStore, RenderResult};
use surgsynth_core::{
    CameraPose, Category, MeshError, ObjectHandle, SceneContext, SceneError,
};
use surgsynth_render::randomize::{NEEDLE_Y_ROTATION, TWEEZERS_Y_ROTATION};
use surgsynth_render::{
    DriverMode, RenderBackend, RenderConfig, RenderDriver, RenderError, RenderSettings,
    ShortfallPolicy, SilhouetteBackend, VisibilityOracle,
};

fn write_box(path: &Path, half: f64) {
    let mut obj = String::new();
    for z in [-half, half] {
        for y in [-half, half] {
            for x in [-half, half] {
                obj.push_str(&format!("v {x} {y} {z}\n"));
            }
        }
    }
    obj.push_str(
        "f 1 2 4 3\nf 5 6 8 7\nf 1 2 6 5\nf 3 4 8 7\nf 1 3 7 5\nf 2 4 8 6\n",
    );
    fs::write(path, obj).unwrap();
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    needle_holders: Vec<PathBuf>,
    tweezers: Vec<PathBuf>,
}

fn fixture(needles: usize, tweezers: usize) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let mk = |name: String, half: f64| {
        let p = root.join(name);
        write_box(&p, half);
        p
    };
    let needle_holders = (0..needles).map(|i| mk(format!("needle_{i}.obj"), 0.5)).collect();
    let tweezers = (0..tweezers).map(|i| mk(format!("tweezers_{i}.obj"), 0.5)).collect();
    mk("hand.obj".to_string(), 0.1);
    fs::write(
        root.join("camera.json"),
        r#"{ "fx": 200.0, "fy": 200.0, "cx": 64.0, "cy": 48.0, "width": 128, "height": 96 }"#,
    )
    .unwrap();
    Fixture {
        _dir: dir,
        root,
        needle_holders,
        tweezers,
    }
}

impl Fixture {
    fn config(&self, mode: DriverMode, num_images: usize) -> RenderConfig {
        RenderConfig {
            needle_holders: self.needle_holders.clone(),
            tweezers: self.tweezers.clone(),
            camera_params: self.root.join("camera.json"),
            output_dir: self.root.join("out"),
            num_images,
            occluder_mesh: self.root.join("hand.obj"),
            mode,
            ..RenderConfig::default()
        }
    }

    fn dataset(&self) -> CocoDataset {
        CocoDataset::load_json(self.root.join("out/coco_data/coco_annotations.json")).unwrap()
    }
}

fn assert_strictly_increasing_from_one(ids: &[u32]) {
    assert_eq!(ids.first(), Some(&1));
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids not increasing: {ids:?}");
}

#[test]
fn paired_run_fills_every_pair_quota() {
    let fx = fixture(2, 3);
    let mut driver =
        RenderDriver::new(fx.config(DriverMode::Paired, 60), SilhouetteBackend::new()).unwrap();
    let summary = driver.run().unwrap();

    assert_eq!(summary.units.len(), 6);
    assert!(summary.units.iter().all(|u| u.requested == 10 && u.accepted == 10));
    assert_eq!(summary.images, 60);

    let dataset = fx.dataset();
    assert_eq!(dataset.images.len(), 60);
    assert!(dataset
        .annotations
        .iter()
        .all(|a| a.category_id == 1 || a.category_id == 2));
    assert!(dataset.annotations.iter().any(|a| a.category_id == 1));
    assert!(dataset.annotations.iter().any(|a| a.category_id == 2));

    let ids: Vec<u32> = summary
        .units
        .iter()
        .flat_map(|u| u.instance_ids.iter().copied())
        .collect();
    assert_eq!(ids.len(), 12);
    assert_strictly_increasing_from_one(&ids);
}

#[test]
fn single_run_renders_each_mesh_quota() {
    let fx = fixture(2, 3);
    let mut driver =
        RenderDriver::new(fx.config(DriverMode::Single, 10), SilhouetteBackend::new()).unwrap();
    let summary = driver.run().unwrap();

    assert_eq!(summary.units.len(), 5);
    for unit in &summary.units {
        assert_eq!(unit.accepted, 2);
        assert!(unit.tries >= 2 && unit.tries <= 300);
    }
    assert_eq!(summary.shortfalls().count(), 0);
    assert_eq!(fx.dataset().images.len(), 10);

    let ids: Vec<u32> = summary
        .units
        .iter()
        .flat_map(|u| u.instance_ids.iter().copied())
        .collect();
    assert_strictly_increasing_from_one(&ids);
}

#[test]
fn same_seed_gives_same_dataset() {
    let a = fixture(1, 2);
    let b = fixture(1, 2);
    for fx in [&a, &b] {
        RenderDriver::new(fx.config(DriverMode::Paired, 4), SilhouetteBackend::new())
            .unwrap()
            .run()
            .unwrap();
    }
    let (da, db) = (a.dataset(), b.dataset());
    assert_eq!(da.annotations, db.annotations);
    assert_eq!(da.images.len(), 4);
}

/// Rejects every pose and counts how often it was asked.
#[derive(Default)]
struct NeverVisible {
    calls: usize,
}

impl VisibilityOracle for NeverVisible {
    fn is_visible(
        &mut self,
        _scene: &SceneContext,
        _object: ObjectHandle,
        _pose: &CameraPose,
    ) -> Result<bool, RenderError> {
        self.calls += 1;
        Ok(false)
    }
}

#[test]
fn retry_ceiling_ends_unit_short_without_error_by_default() {
    let fx = fixture(1, 0);
    let config = RenderConfig {
        max_pose_tries: 7,
        ..fx.config(DriverMode::Single, 4)
    };
    let mut oracle = NeverVisible::default();
    let summary = RenderDriver::with_visibility(config, SilhouetteBackend::new(), &mut oracle)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(oracle.calls, 7);
    let unit = &summary.units[0];
    assert_eq!((unit.requested, unit.accepted, unit.tries), (4, 0, 7));
    assert_eq!(summary.shortfalls().count(), 1);
    assert_eq!(summary.images, 0);
}

#[test]
fn error_policy_turns_shortfall_into_error() {
    let fx = fixture(1, 1);
    let config = RenderConfig {
        max_pose_tries: 3,
        shortfall_policy: ShortfallPolicy::Error,
        ..fx.config(DriverMode::Single, 4)
    };
    let err = RenderDriver::with_visibility(config, SilhouetteBackend::new(), NeverVisible::default())
        .unwrap()
        .run()
        .unwrap_err();
    match err {
        RenderError::Shortfall {
            unit,
            requested,
            accepted,
            tries,
        } => {
            assert_eq!(unit, "needle_0");
            assert_eq!((requested, accepted, tries), (2, 0, 3));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_mesh_aborts_the_run() {
    let fx = fixture(1, 1);
    let mut config = fx.config(DriverMode::Paired, 2);
    config.tweezers = vec![fx.root.join("missing.obj")];
    let err = RenderDriver::new(config, SilhouetteBackend::new())
        .unwrap()
        .run()
        .unwrap_err();
    assert!(matches!(
        err,
        RenderError::Scene(SceneError::Mesh(MeshError::Missing(_)))
    ));
}

/// Silhouette renderer that remembers the tool rotations of every keyframe.
#[derive(Default)]
struct RecordingBackend {
    inner: SilhouetteBackend,
    needle_y: Vec<f64>,
    tweezers_y: Vec<f64>,
}

impl RenderBackend for RecordingBackend {
    fn render(
        &mut self,
        scene: &SceneContext,
        settings: &RenderSettings,
    ) -> Result<RenderResult, RenderError> {
        if let Some(keyframe) = scene.keyframes().last() {
            for obj in &keyframe.scene.objects {
                let y = obj.transform.rotation_euler.y;
                match obj.category {
                    Category::NeedleHolder => self.needle_y.push(y),
                    Category::Tweezers => self.tweezers_y.push(y),
                    _ => {}
                }
            }
        }
        self.inner.render(scene, settings)
    }
}

#[test]
fn paired_jitter_is_undone_after_every_image() {
    let fx = fixture(1, 1);
    let mut scene = SceneContext::with_intrinsics(
        fx.config(DriverMode::Paired, 5).build_intrinsics().unwrap(),
    );
    let mut store = CocoStore::open(fx.root.join("out/coco_data")).unwrap();
    let mut backend = RecordingBackend::default();
    RenderDriver::new(fx.config(DriverMode::Paired, 5), &mut backend)
        .unwrap()
        .run_in(&mut scene, &mut store)
        .unwrap();

    assert_eq!(backend.needle_y.len(), 5);
    assert_eq!(backend.tweezers_y.len(), 5);
    // each image is jittered once around the base rotation, never stacked
    for (ys, base) in [
        (&backend.needle_y, NEEDLE_Y_ROTATION),
        (&backend.tweezers_y, TWEEZERS_Y_ROTATION),
    ] {
        assert!(ys.iter().all(|y| *y != base));
        assert!(ys.iter().all(|y| (y - base).abs() < 1.5), "{ys:?}");
    }

    let rotations: Vec<(Category, f64)> = scene
        .objects()
        .map(|(_, obj)| (obj.category, obj.transform.rotation_euler.y))
        .collect();
    assert!(rotations.contains(&(Category::NeedleHolder, NEEDLE_Y_ROTATION)));
    assert!(rotations.contains(&(Category::Tweezers, TWEEZERS_Y_ROTATION)));
}
