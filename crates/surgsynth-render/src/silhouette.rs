//! Preview renderer drawing each object as the projected hull of its bounds.
//!
//! Objects are painted far to near, so a nearer object overwrites the labels
//! of the ones behind it. Color is the object's first material base color
//! scaled by a simple point-light falloff term. Good enough to exercise the
//! whole pipeline and to eyeball camera placement without a path tracer.
//!
//! The same rasterizer backs [`OcclusionVisibility`], the default pose
//! acceptance test of the driver.

use image::{imageops::FilterType, Rgba, RgbaImage};
use nalgebra::{Point2, Point3};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use surgsynth_annotate::{InstanceRecord, RenderResult, RenderedFrame};
use surgsynth_core::{
    CameraIntrinsics, CameraPose, Keyframe, LabelMap, Light, ObjectHandle, ObjectState, SceneContext,
};

use crate::backend::{RenderBackend, RenderError, RenderSettings, VisibilityOracle};

const AMBIENT: f64 = 0.25;
const OPAQUE_BACKDROP: Rgba<u8> = Rgba([96, 96, 104, 255]);

#[derive(Debug, Default)]
pub struct SilhouetteBackend {
    backdrops: HashMap<PathBuf, RgbaImage>,
}

impl SilhouetteBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn backdrop(
        &mut self,
        path: Option<&Path>,
        intrinsics: &CameraIntrinsics,
        settings: &RenderSettings,
    ) -> Result<RgbaImage, RenderError> {
        let (w, h) = (intrinsics.width, intrinsics.height);
        if settings.transparent_background {
            return Ok(RgbaImage::new(w, h));
        }
        let Some(path) = path else {
            return Ok(RgbaImage::from_pixel(w, h, OPAQUE_BACKDROP));
        };
        if let Some(img) = self.backdrops.get(path) {
            if img.dimensions() == (w, h) {
                return Ok(img.clone());
            }
        }
        let img = image::open(path)
            .map_err(|source| RenderError::Background {
                path: path.to_path_buf(),
                source,
            })?
            .resize_exact(w, h, FilterType::Triangle)
            .to_rgba8();
        self.backdrops.insert(path.to_path_buf(), img.clone());
        Ok(img)
    }

    fn render_keyframe(
        &mut self,
        keyframe: &Keyframe,
        intrinsics: &CameraIntrinsics,
        settings: &RenderSettings,
    ) -> Result<RenderedFrame, RenderError> {
        let (w, h) = (intrinsics.width as usize, intrinsics.height as usize);
        let mut color = self.backdrop(
            keyframe.scene.world_background.as_deref(),
            intrinsics,
            settings,
        )?;
        let mut category_segmap = LabelMap::new(w, h);
        let mut instance_segmap = LabelMap::new(w, h);

        let objects = &keyframe.scene.objects;
        let shades: Vec<Rgba<u8>> = objects
            .iter()
            .map(|o| shade(o, &keyframe.scene.lights))
            .collect();
        paint_far_to_near(objects, &keyframe.pose, intrinsics, |i, x, y| {
            instance_segmap.set(x, y, objects[i].instance_id);
            category_segmap.set(x, y, objects[i].category.id());
            color.put_pixel(x as u32, y as u32, shades[i]);
        });

        let instance_records = keyframe
            .scene
            .objects
            .iter()
            .filter(|o| instance_segmap.view().count(o.instance_id) > 0)
            .map(|o| InstanceRecord {
                instance_id: o.instance_id,
                category_id: o.category.id(),
                name: o.name.clone(),
            })
            .collect();

        Ok(RenderedFrame {
            category_segmap,
            instance_segmap,
            instance_records,
            color,
        })
    }
}

impl RenderBackend for SilhouetteBackend {
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip(self, scene, settings), fields(keyframes = scene.keyframes().len()))
    )]
    fn render(
        &mut self,
        scene: &SceneContext,
        settings: &RenderSettings,
    ) -> Result<RenderResult, RenderError> {
        let intrinsics = *scene.intrinsics().ok_or(RenderError::MissingIntrinsics)?;
        let frames = scene
            .keyframes()
            .iter()
            .map(|kf| self.render_keyframe(kf, &intrinsics, settings))
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!("rendered {} silhouette frames", frames.len());
        Ok(RenderResult { frames })
    }
}

/// Visibility from the rasterized instance map of the candidate pose.
///
/// Every object in the scene takes part, so the hand occluder and the other
/// tools can hide the target. The target counts as visible when at least
/// `min_pixels` of its pixels survive painting far to near.
#[derive(Clone, Copy, Debug)]
pub struct OcclusionVisibility {
    pub min_pixels: usize,
}

impl Default for OcclusionVisibility {
    fn default() -> Self {
        Self { min_pixels: 1 }
    }
}

impl VisibilityOracle for OcclusionVisibility {
    fn is_visible(
        &mut self,
        scene: &SceneContext,
        object: ObjectHandle,
        pose: &CameraPose,
    ) -> Result<bool, RenderError> {
        let intrinsics = scene.intrinsics().ok_or(RenderError::MissingIntrinsics)?;
        let target = scene.object(object)?.instance_id;
        let objects = scene.snapshot().objects;
        let mut instance_map = LabelMap::new(intrinsics.width as usize, intrinsics.height as usize);
        paint_far_to_near(&objects, pose, intrinsics, |i, x, y| {
            instance_map.set(x, y, objects[i].instance_id);
        });
        Ok(instance_map.view().count(target) >= self.min_pixels.max(1))
    }
}

/// Paint the projected bounds hull of every object, farthest center first.
/// `paint` receives the object index and pixel; nearer objects come later
/// and overwrite.
fn paint_far_to_near(
    objects: &[ObjectState],
    pose: &CameraPose,
    intrinsics: &CameraIntrinsics,
    mut paint: impl FnMut(usize, usize, usize),
) {
    let (w, h) = (intrinsics.width as usize, intrinsics.height as usize);
    let mut order: Vec<(usize, f64)> = objects
        .iter()
        .enumerate()
        .map(|(i, o)| (i, pose.depth(&o.world_points()[0])))
        .collect();
    order.sort_by(|a, b| b.1.total_cmp(&a.1));

    for (i, _) in order {
        let projected: Vec<Point2<f64>> = objects[i]
            .world_points()
            .iter()
            .skip(1)
            .filter_map(|p| pose.project(intrinsics, p))
            .collect();
        let hull = convex_hull(projected);
        if hull.len() < 3 {
            continue;
        }
        fill_convex(&hull, w, h, |x, y| paint(i, x, y));
    }
}

fn shade(obj: &ObjectState, lights: &[Light]) -> Rgba<u8> {
    let base = obj
        .materials
        .first()
        .map(|m| m.base_color)
        .unwrap_or([0.8, 0.8, 0.8, 1.0]);
    let center: Point3<f64> = obj.world_points()[0];
    let received: f64 = lights
        .iter()
        .map(|l| {
            let d2 = (l.location - center).norm_squared().max(1e-6);
            l.energy / (4.0 * std::f64::consts::PI * d2)
        })
        .sum();
    let k = (AMBIENT + received).clamp(0.0, 1.0);
    let to_u8 = |c: f64| (c * k * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba([to_u8(base[0]), to_u8(base[1]), to_u8(base[2]), 255])
}

fn cross(o: Point2<f64>, a: Point2<f64>, b: Point2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Andrew's monotone chain; counter-clockwise in a y-up frame, no duplicate
/// end point.
fn convex_hull(mut points: Vec<Point2<f64>>) -> Vec<Point2<f64>> {
    points.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    points.dedup();
    if points.len() < 3 {
        return points;
    }

    let mut hull: Vec<Point2<f64>> = Vec::with_capacity(points.len() + 1);
    for &p in &points {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower = hull.len();
    for &p in points.iter().rev().skip(1) {
        while hull.len() > lower && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    // last point repeats the first
    hull.pop();
    hull
}

/// Call `paint` for every pixel whose center lies inside the convex polygon.
fn fill_convex(hull: &[Point2<f64>], w: usize, h: usize, mut paint: impl FnMut(usize, usize)) {
    let (mut x0, mut y0, mut x1, mut y1) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    for p in hull {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
    }
    let clamp = |v: f64, hi: usize| v.clamp(0.0, hi as f64) as usize;
    let (xs, xe) = (clamp(x0.floor(), w), clamp(x1.ceil(), w));
    let (ys, ye) = (clamp(y0.floor(), h), clamp(y1.ceil(), h));

    for y in ys..ye {
        for x in xs..xe {
            let c = Point2::new(x as f64 + 0.5, y as f64 + 0.5);
            let inside = (0..hull.len()).all(|i| cross(hull[i], hull[(i + 1) % hull.len()], c) >= 0.0);
            if inside {
                paint(x, y);
            }
        }
    }
}
