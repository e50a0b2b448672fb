//! Mask, box and label drawing.

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use surgsynth_core::Category;

use crate::detection::Detection;
use crate::font::draw_text;

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Class name to overlay color.
#[derive(Clone, Debug, PartialEq)]
pub struct ColorMap {
    entries: Vec<(String, Rgb<u8>)>,
    fallback: Rgb<u8>,
}

impl Default for ColorMap {
    /// Tweezers green, needle drivers red, anything else white.
    fn default() -> Self {
        Self {
            entries: vec![
                (Category::Tweezers.coco_name().to_string(), GREEN),
                (Category::NeedleHolder.coco_name().to_string(), RED),
            ],
            fallback: WHITE,
        }
    }
}

impl ColorMap {
    pub fn new(fallback: Rgb<u8>) -> Self {
        Self {
            entries: Vec::new(),
            fallback,
        }
    }

    pub fn with(mut self, class_name: impl Into<String>, color: Rgb<u8>) -> Self {
        let class_name = class_name.into();
        self.entries.retain(|(n, _)| *n != class_name);
        self.entries.push((class_name, color));
        self
    }

    pub fn color_for(&self, class_name: &str) -> Rgb<u8> {
        self.entries
            .iter()
            .find(|(n, _)| n == class_name)
            .map(|(_, c)| *c)
            .unwrap_or(self.fallback)
    }
}

/// Drawing parameters shared by every detection.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverlayStyle {
    /// Weight of the color added inside the mask.
    pub mask_weight: f64,
    pub box_thickness: u32,
    pub font_scale: u32,
    /// Label baseline distance above the box top.
    pub label_offset: i64,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            mask_weight: 0.5,
            box_thickness: 2,
            font_scale: 2,
            label_offset: 10,
        }
    }
}

/// `frame + weight * color`, rounded half to even and saturated.
#[inline]
fn add_weighted(base: u8, color: u8, weight: f64) -> u8 {
    (base as f64 + weight * color as f64)
        .round_ties_even()
        .clamp(0.0, 255.0) as u8
}

/// Brighten the pixels under the detection mask toward `color`. The mask is
/// resized to the frame first.
pub fn blend_mask(img: &mut RgbImage, det: &Detection, color: Rgb<u8>, weight: f64) {
    let Some(mask) = det.mask.as_ref() else {
        return;
    };
    let (w, h) = img.dimensions();
    let mask = mask.resize_nearest(w, h);
    for (x, y, px) in img.enumerate_pixels_mut() {
        if mask.get(x, y) {
            for (c, k) in px.0.iter_mut().zip(color.0) {
                *c = add_weighted(*c, k, weight);
            }
        }
    }
}

/// Outline of the integer-truncated box, `thickness` pixels wide, growing
/// inward from the box edges.
pub fn draw_box(img: &mut RgbImage, bbox: [f32; 4], color: Rgb<u8>, thickness: u32) {
    let [x1, y1, x2, y2] = bbox.map(|v| v as i64);
    let (w, h) = (img.width() as i64, img.height() as i64);
    let mut put = |x: i64, y: i64| {
        if (0..w).contains(&x) && (0..h).contains(&y) {
            img.put_pixel(x as u32, y as u32, color);
        }
    };
    for t in 0..thickness as i64 {
        for x in x1..=x2 {
            put(x, y1 + t);
            put(x, y2 - t);
        }
        for y in y1..=y2 {
            put(x1 + t, y);
            put(x2 - t, y);
        }
    }
}

/// `"{class} {confidence:.2}"`.
pub fn label_text(det: &Detection) -> String {
    format!("{} {:.2}", det.class_name, det.confidence)
}

pub fn draw_detection(img: &mut RgbImage, det: &Detection, color: Rgb<u8>, style: &OverlayStyle) {
    blend_mask(img, det, color, style.mask_weight);
    draw_box(img, det.bbox, color, style.box_thickness);
    let x = det.bbox[0] as i64;
    let baseline = det.bbox[1] as i64 - style.label_offset;
    draw_text(img, &label_text(det), x, baseline, style.font_scale, color);
}

/// Draw every detection in order.
pub fn draw_overlay(
    img: &mut RgbImage,
    detections: &[Detection],
    colors: &ColorMap,
    style: &OverlayStyle,
) {
    for det in detections {
        draw_detection(img, det, colors.color_for(&det.class_name), style);
    }
}
