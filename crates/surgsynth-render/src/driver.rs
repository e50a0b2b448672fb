//! Render drivers: iterate the units of work, randomize the scene, queue
//! camera poses, render, filter and append to the COCO store.

use nalgebra::Vector3;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::Serialize;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use surgsynth_annotate::{filter_by_category, CocoStore};
use surgsynth_core::{
    sample_and_filter_counted, CameraPose, Category, LightHandle, ObjectHandle, SceneContext,
    TARGET_CATEGORY_IDS,
};

use crate::backend::{RenderBackend, RenderError, RenderSettings, VisibilityOracle};
use crate::config::{DriverMode, RenderConfig, ShortfallPolicy};
use crate::randomize::*;
use crate::silhouette::OcclusionVisibility;

/// Outcome of one unit of work (a mesh in single mode, a pair in paired mode).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UnitSummary {
    pub label: String,
    pub requested: usize,
    pub accepted: usize,
    /// Camera poses sampled, accepted or not.
    pub tries: usize,
    /// Instance ids of the unit's target objects.
    pub instance_ids: Vec<u32>,
}

impl UnitSummary {
    #[inline]
    pub fn is_short(&self) -> bool {
        self.accepted < self.requested
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RenderSummary {
    pub units: Vec<UnitSummary>,
    pub images: usize,
    pub annotations: usize,
}

impl RenderSummary {
    pub fn accepted(&self) -> usize {
        self.units.iter().map(|u| u.accepted).sum()
    }

    pub fn shortfalls(&self) -> impl Iterator<Item = &UnitSummary> {
        self.units.iter().filter(|u| u.is_short())
    }
}

/// Randomized scene render loop.
///
/// The driver owns the random generator (seeded from the config) and borrows
/// the scene and annotation store for the duration of a run.
pub struct RenderDriver<B, V = OcclusionVisibility> {
    config: RenderConfig,
    backend: B,
    visibility: V,
    rng: StdRng,
    hdris: Vec<PathBuf>,
}

impl<B: RenderBackend> RenderDriver<B, OcclusionVisibility> {
    /// Driver whose poses must leave at least one target pixel unoccluded.
    pub fn new(config: RenderConfig, backend: B) -> Result<Self, RenderError> {
        Self::with_visibility(config, backend, OcclusionVisibility::default())
    }
}

impl<B: RenderBackend, V: VisibilityOracle> RenderDriver<B, V> {
    /// Validate the config and discover HDRIs. Fails before anything is
    /// rendered when the haven layout is wrong or a mode has no units.
    pub fn with_visibility(
        config: RenderConfig,
        backend: B,
        visibility: V,
    ) -> Result<Self, RenderError> {
        config.images_per_unit()?;
        let hdris = config.build_hdris()?;
        if !hdris.is_empty() {
            log::info!("found {} HDRI backgrounds", hdris.len());
        }
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            backend,
            visibility,
            rng,
            hdris,
        })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Load the camera, open `<output_dir>/coco_data` and run every unit.
    pub fn run(&mut self) -> Result<RenderSummary, RenderError> {
        if self.config.debug {
            wait_for_debugger()?;
        }
        let intrinsics = self.config.build_intrinsics()?;
        let mut scene = SceneContext::with_intrinsics(intrinsics);
        let mut store = CocoStore::open(self.config.coco_dir())?;
        self.run_in(&mut scene, &mut store)
    }

    /// Run every unit against a caller-provided scene and store.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "info", skip_all, fields(mode = ?self.config.mode))
    )]
    pub fn run_in(
        &mut self,
        scene: &mut SceneContext,
        store: &mut CocoStore,
    ) -> Result<RenderSummary, RenderError> {
        if let Some(hdri) = self.pick_hdri() {
            scene.set_world_background(hdri)?;
        }
        let summary = match self.config.mode {
            DriverMode::Single => self.run_single(scene, store)?,
            DriverMode::Paired => self.run_paired(scene, store)?,
        };
        log::info!(
            "done: {} units, {} images, {} annotations",
            summary.units.len(),
            summary.images,
            summary.annotations
        );
        Ok(summary)
    }

    fn pick_hdri(&mut self) -> Option<PathBuf> {
        self.hdris.choose(&mut self.rng).cloned()
    }

    fn render_and_write(
        &mut self,
        scene: &mut SceneContext,
        store: &mut CocoStore,
        settings: &RenderSettings,
        summary: &mut RenderSummary,
    ) -> Result<(), RenderError> {
        let result = self.backend.render(scene, settings)?;
        let filtered = filter_by_category(result, &TARGET_CATEGORY_IDS);
        let stats = store.append(&filtered)?;
        summary.images += stats.images;
        summary.annotations += stats.annotations;
        scene.reset_keyframes();
        Ok(())
    }

    fn run_single(
        &mut self,
        scene: &mut SceneContext,
        store: &mut CocoStore,
    ) -> Result<RenderSummary, RenderError> {
        let quota = self.config.images_per_unit()?;
        let units: Vec<(PathBuf, Category)> = self
            .config
            .needle_holders
            .iter()
            .map(|p| (p.clone(), Category::NeedleHolder))
            .chain(self.config.tweezers.iter().map(|p| (p.clone(), Category::Tweezers)))
            .collect();
        log::info!("single mode: {} meshes, {quota} images each", units.len());

        let mut summary = RenderSummary::default();
        for (path, category) in units {
            let unit = self.run_single_unit(scene, store, &path, category, quota, &mut summary)?;
            let short = unit.is_short();
            summary.units.push(unit);
            if short {
                self.handle_shortfall(summary.units.last())?;
            }
        }
        Ok(summary)
    }

    fn run_single_unit(
        &mut self,
        scene: &mut SceneContext,
        store: &mut CocoStore,
        path: &Path,
        category: Category,
        quota: usize,
        summary: &mut RenderSummary,
    ) -> Result<UnitSummary, RenderError> {
        scene.clear_objects();
        scene.reset_keyframes();

        let target = scene.load_object(path, category)?;
        let hand = scene.load_object(&self.config.occluder_mesh, Category::Occluder)?;
        let hand_material = scene.create_material(occluder_material());
        scene.replace_materials(hand, hand_material)?;

        let origin = {
            let obj = scene.object_mut(target)?;
            obj.transform.scale *= SINGLE_TOOL_SCALE;
            obj.transform.location
        };
        {
            let h = scene.object_mut(hand)?;
            h.transform.scale *= OCCLUDER_SCALE;
            h.transform.scale.y = -h.transform.scale.y;
            h.transform.location = origin + Vector3::from(SINGLE_OCCLUDER_OFFSET);
        }

        let mut unit = UnitSummary {
            label: label_of(path),
            requested: quota,
            instance_ids: vec![scene.object(target)?.instance_id],
            ..UnitSummary::default()
        };
        let mut light = None;
        let max_tries = self.config.max_pose_tries;

        while unit.accepted < quota && unit.tries < max_tries {
            let sampled = sample_and_filter_counted(
                || self.attempt_single_pose(scene, target, category, &mut light),
                |attempt| !matches!(attempt, Ok((_, false))),
                max_tries - unit.tries,
            );
            unit.tries += sampled.tries;
            match sampled.value {
                Some(Ok((pose, _))) => {
                    scene.add_camera_pose(pose);
                    unit.accepted += 1;
                }
                Some(Err(err)) => return Err(err),
                None => break,
            }
        }
        log::debug!(
            "{}: {}/{} poses in {} tries",
            unit.label,
            unit.accepted,
            quota,
            unit.tries
        );

        if unit.accepted > 0 {
            let settings = RenderSettings::default();
            self.render_and_write(scene, store, &settings, summary)?;
        }
        Ok(unit)
    }

    /// Re-randomize materials and light, sample a camera pose and test it.
    fn attempt_single_pose(
        &mut self,
        scene: &mut SceneContext,
        target: ObjectHandle,
        category: Category,
        light: &mut Option<LightHandle>,
    ) -> Result<(CameraPose, bool), RenderError> {
        let center = scene.object(target)?.location();
        let spec = match category {
            Category::Tweezers => {
                randomize_tweezers(scene, target, &mut self.rng, false)?;
                &TWEEZERS_LIGHT
            }
            _ => {
                randomize_needle_holder(scene, target, &mut self.rng)?;
                &NEEDLE_HOLDER_LIGHT
            }
        };
        replace_light(scene, light, spec, &center, &mut self.rng)?;

        let pose = sample_orbit_pose(&mut self.rng, &center);
        let visible = self.visibility.is_visible(scene, target, &pose)?;
        Ok((pose, visible))
    }

    fn handle_shortfall(&self, unit: Option<&UnitSummary>) -> Result<(), RenderError> {
        let Some(unit) = unit else {
            return Ok(());
        };
        match self.config.shortfall_policy {
            ShortfallPolicy::Ignore => Ok(()),
            ShortfallPolicy::Warn => {
                log::warn!(
                    "{}: only {} of {} images after {} camera samples",
                    unit.label,
                    unit.accepted,
                    unit.requested,
                    unit.tries
                );
                Ok(())
            }
            ShortfallPolicy::Error => Err(RenderError::Shortfall {
                unit: unit.label.clone(),
                requested: unit.requested,
                accepted: unit.accepted,
                tries: unit.tries,
            }),
        }
    }

    fn run_paired(
        &mut self,
        scene: &mut SceneContext,
        store: &mut CocoStore,
    ) -> Result<RenderSummary, RenderError> {
        let quota = self.config.images_per_unit()?;
        let pairs: Vec<(PathBuf, PathBuf)> = self
            .config
            .needle_holders
            .iter()
            .flat_map(|n| self.config.tweezers.iter().map(move |t| (n.clone(), t.clone())))
            .collect();
        log::info!("paired mode: {} pairs, {quota} images each", pairs.len());

        let mut summary = RenderSummary::default();
        for (needle, tweezers) in pairs {
            let unit = self.run_pair(scene, store, &needle, &tweezers, quota, &mut summary)?;
            summary.units.push(unit);
        }
        Ok(summary)
    }

    fn run_pair(
        &mut self,
        scene: &mut SceneContext,
        store: &mut CocoStore,
        needle_path: &Path,
        tweezers_path: &Path,
        quota: usize,
        summary: &mut RenderSummary,
    ) -> Result<UnitSummary, RenderError> {
        scene.clear_objects();
        scene.reset_keyframes();

        let needle = scene.load_object(needle_path, Category::NeedleHolder)?;
        let tweezers = scene.load_object(tweezers_path, Category::Tweezers)?;
        let needle_hand = scene.load_object(&self.config.occluder_mesh, Category::Occluder)?;
        let tweezers_hand = scene.load_object(&self.config.occluder_mesh, Category::Occluder)?;

        let hand_material = scene.create_material(occluder_material());
        scene.replace_materials(needle_hand, hand_material)?;
        scene.replace_materials(tweezers_hand, hand_material)?;

        let needle_at = Vector3::from(NEEDLE_LOCATION);
        let tweezers_at = Vector3::from(TWEEZERS_LOCATION);
        {
            let t = &mut scene.object_mut(needle)?.transform;
            t.location = needle_at;
            t.rotation_euler.y += NEEDLE_Y_ROTATION;
            t.scale *= NEEDLE_HOLDER_SCALE;
        }
        {
            let t = &mut scene.object_mut(tweezers)?.transform;
            t.location = tweezers_at;
            t.rotation_euler.y += TWEEZERS_Y_ROTATION;
            t.scale *= PAIRED_TWEEZERS_SCALE;
        }
        {
            let t = &mut scene.object_mut(needle_hand)?.transform;
            t.scale *= OCCLUDER_SCALE;
            t.scale.y = -t.scale.y;
            t.location = needle_at + Vector3::from(NEEDLE_HAND_OFFSET);
        }
        {
            let t = &mut scene.object_mut(tweezers_hand)?.transform;
            t.scale *= OCCLUDER_SCALE * TWEEZERS_HAND_SCALE;
            t.scale.y = -t.scale.y;
            t.scale.x = -t.scale.x;
            t.location = tweezers_at + Vector3::from(TWEEZERS_HAND_OFFSET);
        }

        let mut unit = UnitSummary {
            label: format!("{} + {}", label_of(needle_path), label_of(tweezers_path)),
            requested: quota,
            instance_ids: vec![
                scene.object(needle)?.instance_id,
                scene.object(tweezers)?.instance_id,
            ],
            ..UnitSummary::default()
        };

        let hdri_world = !self.hdris.is_empty();
        let settings = RenderSettings {
            transparent_background: !hdri_world,
            ..RenderSettings::default()
        };
        let mut light = None;

        while unit.accepted < quota {
            // rotations are restored when the guard drops, on every path
            let mut jittered = scene.perturb();
            jittered.rotate_by(tweezers, rotation_jitter(&mut self.rng))?;
            jittered.rotate_by(needle, rotation_jitter(&mut self.rng))?;

            if let Some(hdri) = self.pick_hdri() {
                jittered.set_world_background(hdri)?;
            }
            randomize_tweezers(&mut jittered, tweezers, &mut self.rng, true)?;
            randomize_needle_holder(&mut jittered, needle, &mut self.rng)?;

            let needle_hand_at = jittered.object(needle_hand)?.location();
            let (center, spec) = if hdri_world {
                (needle_hand_at, &HDRI_LIGHT)
            } else {
                let tweezers_hand_at = jittered.object(tweezers_hand)?.location();
                (nalgebra::center(&needle_hand_at, &tweezers_hand_at), &STUDIO_LIGHT)
            };
            replace_light(&mut jittered, &mut light, spec, &center, &mut self.rng)?;

            jittered.add_camera_pose(sample_fixed_pose(&mut self.rng));
            unit.tries += 1;
            unit.accepted += 1;
            self.render_and_write(&mut jittered, store, &settings, summary)?;
        }
        Ok(unit)
    }
}

fn label_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Block until a line arrives on stdin so a debugger can attach.
fn wait_for_debugger() -> Result<(), RenderError> {
    log::warn!(
        "debug mode: attach to pid {} and press Enter to continue",
        std::process::id()
    );
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(RenderError::Debug)?;
    Ok(())
}
