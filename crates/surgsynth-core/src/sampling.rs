//! Random samplers used by the scene randomization.

use nalgebra::{Point3, Vector3};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Spherical shell around a center point.
///
/// Elevation is measured from the XY plane, azimuth around +Z, both in
/// degrees. The radius is drawn uniformly (not uniform in volume).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Shell {
    pub radius_min: f64,
    pub radius_max: f64,
    pub elevation_min: f64,
    pub elevation_max: f64,
    #[serde(default = "default_azimuth_min")]
    pub azimuth_min: f64,
    #[serde(default = "default_azimuth_max")]
    pub azimuth_max: f64,
}

fn default_azimuth_min() -> f64 {
    -180.0
}

fn default_azimuth_max() -> f64 {
    180.0
}

impl Shell {
    pub fn new(radius: (f64, f64), elevation_deg: (f64, f64)) -> Self {
        Self {
            radius_min: radius.0,
            radius_max: radius.1,
            elevation_min: elevation_deg.0,
            elevation_max: elevation_deg.1,
            azimuth_min: default_azimuth_min(),
            azimuth_max: default_azimuth_max(),
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, center: &Point3<f64>) -> Point3<f64> {
        let radius = uniform(rng, self.radius_min, self.radius_max);
        let el = uniform(rng, self.elevation_min, self.elevation_max).to_radians();
        let az = uniform(rng, self.azimuth_min, self.azimuth_max).to_radians();
        let dir = Vector3::new(el.cos() * az.cos(), el.cos() * az.sin(), el.sin());
        center + dir * radius
    }
}

/// Uniform sample in `[lo, hi)`; returns `lo` for an empty range.
#[inline]
pub fn uniform<R: Rng + ?Sized>(rng: &mut R, lo: f64, hi: f64) -> f64 {
    if hi > lo {
        rng.gen_range(lo..hi)
    } else {
        lo
    }
}

/// Per-axis uniform sample in `[lo, hi)`.
pub fn uniform_vec3<R: Rng + ?Sized>(rng: &mut R, lo: f64, hi: f64) -> Vector3<f64> {
    Vector3::new(uniform(rng, lo, hi), uniform(rng, lo, hi), uniform(rng, lo, hi))
}

/// Outcome of a bounded sample-and-test loop.
#[derive(Clone, Debug, PartialEq)]
pub struct Sampled<T> {
    pub value: Option<T>,
    /// Samples drawn, including the accepted one.
    pub tries: usize,
}

/// Draw samples until one passes `predicate`, giving up after `max_tries`.
pub fn sample_and_filter<T>(
    sampler: impl FnMut() -> T,
    predicate: impl FnMut(&T) -> bool,
    max_tries: usize,
) -> Option<T> {
    sample_and_filter_counted(sampler, predicate, max_tries).value
}

/// Like [`sample_and_filter`] but also reports how many samples were drawn.
pub fn sample_and_filter_counted<T>(
    mut sampler: impl FnMut() -> T,
    mut predicate: impl FnMut(&T) -> bool,
    max_tries: usize,
) -> Sampled<T> {
    for attempt in 1..=max_tries {
        let candidate = sampler();
        if predicate(&candidate) {
            return Sampled {
                value: Some(candidate),
                tries: attempt,
            };
        }
    }
    Sampled {
        value: None,
        tries: max_tries,
    }
}
