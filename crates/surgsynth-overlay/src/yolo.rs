//! YOLOv8-seg output decoding and, with the `onnx` feature, an ONNX Runtime
//! backed [`Detector`](crate::Detector).
//!
//! The exported model takes a letterboxed `1x3x640x640` RGB tensor in `[0, 1]`
//! and returns `output0` of shape `1 x (4 + classes + 32) x anchors` (box
//! center and size in input pixels, per-class scores, mask coefficients) and
//! `output1` of shape `1 x 32 x 160 x 160` (mask prototypes).

use image::{imageops, Rgb, RgbImage};

use crate::detection::{Detection, Mask};
use crate::error::OverlayError;

pub const INPUT_SIZE: u32 = 640;
const PAD_VALUE: u8 = 114;

/// Scale-and-pad mapping between a frame and the square model input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub source: (u32, u32),
    pub size: u32,
    pub scale: f32,
    pub pad: (u32, u32),
    resized: (u32, u32),
}

impl Letterbox {
    pub fn new(source: (u32, u32), size: u32) -> Self {
        let (w, h) = (source.0.max(1), source.1.max(1));
        let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
        let resized = (
            ((w as f32 * scale).round() as u32).clamp(1, size),
            ((h as f32 * scale).round() as u32).clamp(1, size),
        );
        let pad = ((size - resized.0) / 2, (size - resized.1) / 2);
        Self {
            source,
            size,
            scale,
            pad,
            resized,
        }
    }

    /// Input-space point to frame pixels.
    #[inline]
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad.0 as f32) / self.scale,
            (y - self.pad.1 as f32) / self.scale,
        )
    }

    /// Frame point to input space.
    #[inline]
    pub fn to_input(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x * self.scale + self.pad.0 as f32,
            y * self.scale + self.pad.1 as f32,
        )
    }

    /// Planar RGB tensor data (`3 x size x size`) of the letterboxed frame.
    pub fn tensor(&self, frame: &RgbImage) -> Vec<f32> {
        let resized = imageops::resize(frame, self.resized.0, self.resized.1, imageops::FilterType::Triangle);
        let mut canvas = RgbImage::from_pixel(self.size, self.size, Rgb([PAD_VALUE; 3]));
        imageops::replace(&mut canvas, &resized, self.pad.0 as i64, self.pad.1 as i64);

        let plane = (self.size * self.size) as usize;
        let mut data = vec![0.0f32; 3 * plane];
        for (i, px) in canvas.pixels().enumerate() {
            for c in 0..3 {
                data[c * plane + i] = px.0[c] as f32 / 255.0;
            }
        }
        data
    }
}

/// `output0` as a flat `channels x anchors` slice.
#[derive(Clone, Copy, Debug)]
pub struct RawPredictions<'a> {
    pub data: &'a [f32],
    pub channels: usize,
    pub anchors: usize,
}

impl RawPredictions<'_> {
    #[inline]
    fn at(&self, channel: usize, anchor: usize) -> f32 {
        self.data[channel * self.anchors + anchor]
    }
}

/// `output1` as a flat `count x height x width` slice.
#[derive(Clone, Copy, Debug)]
pub struct Prototypes<'a> {
    pub data: &'a [f32],
    pub count: usize,
    pub height: usize,
    pub width: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecodeParams {
    /// Candidates scoring at or below this are dropped before NMS.
    pub score_floor: f32,
    /// Same-class boxes overlapping a kept box by more than this are dropped.
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            score_floor: 0.05,
            iou_threshold: 0.7,
            max_detections: 300,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    anchor: usize,
    class: usize,
    score: f32,
    /// `[x1, y1, x2, y2]` in input pixels.
    bbox: [f32; 4],
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let iw = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let ih = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = iw * ih;
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Greedy per-class suppression; survivors come back by descending score.
fn nms(mut candidates: Vec<Candidate>, params: &DecodeParams) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::new();
    for c in candidates {
        if kept.len() >= params.max_detections {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|k| k.class == c.class && iou(&k.bbox, &c.bbox) > params.iou_threshold);
        if !suppressed {
            kept.push(c);
        }
    }
    kept
}

/// Name of class `index`, or `class_{index}` past the end of `names`.
pub fn class_name(names: &[String], index: usize) -> String {
    names
        .get(index)
        .cloned()
        .unwrap_or_else(|| format!("class_{index}"))
}

/// Parse the `names` metadata written by the Ultralytics exporter, e.g.
/// `{0: 'Tweezers', 1: 'Needle_driver'}`.
pub fn parse_class_names(text: &str) -> Vec<String> {
    let inner = text.trim().trim_start_matches('{').trim_end_matches('}');
    let mut entries: Vec<(usize, String)> = inner
        .split(',')
        .filter_map(|entry| {
            let (index, name) = entry.split_once(':')?;
            let index = index.trim().trim_matches(|c| c == '\'' || c == '"').parse().ok()?;
            let name = name.trim().trim_matches(|c| c == '\'' || c == '"');
            Some((index, name.to_string()))
        })
        .collect();
    entries.sort_by_key(|(i, _)| *i);
    let len = entries.last().map(|(i, _)| i + 1).unwrap_or(0);
    let mut names: Vec<String> = (0..len).map(|i| format!("class_{i}")).collect();
    for (i, name) in entries {
        names[i] = name;
    }
    names
}

/// Turn raw model outputs into frame-space detections.
pub fn decode(
    preds: RawPredictions<'_>,
    protos: Option<Prototypes<'_>>,
    class_names: &[String],
    letterbox: &Letterbox,
    params: &DecodeParams,
) -> Result<Vec<Detection>, OverlayError> {
    let coefficients = protos.map(|p| p.count).unwrap_or(0);
    if preds.channels <= 4 + coefficients || preds.data.len() < preds.channels * preds.anchors {
        return Err(OverlayError::Detector(format!(
            "prediction tensor {}x{} does not fit {} mask coefficients",
            preds.channels, preds.anchors, coefficients
        )));
    }
    if let Some(p) = protos {
        if p.height == 0 || p.width == 0 || p.data.len() < p.count * p.height * p.width {
            return Err(OverlayError::Detector(format!(
                "prototype tensor does not hold {}x{}x{}",
                p.count, p.height, p.width
            )));
        }
    }
    let classes = preds.channels - 4 - coefficients;

    let mut candidates = Vec::new();
    for anchor in 0..preds.anchors {
        let (class, score) = (0..classes)
            .map(|c| (c, preds.at(4 + c, anchor)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score.is_nan() || score <= params.score_floor {
            continue;
        }
        let (cx, cy) = (preds.at(0, anchor), preds.at(1, anchor));
        let (w, h) = (preds.at(2, anchor), preds.at(3, anchor));
        candidates.push(Candidate {
            anchor,
            class,
            score,
            bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
        });
    }
    let kept = nms(candidates, params);

    let (fw, fh) = letterbox.source;
    let detections = kept
        .into_iter()
        .map(|c| {
            let (x1, y1) = letterbox.to_source(c.bbox[0], c.bbox[1]);
            let (x2, y2) = letterbox.to_source(c.bbox[2], c.bbox[3]);
            let bbox = [
                x1.clamp(0.0, fw as f32),
                y1.clamp(0.0, fh as f32),
                x2.clamp(0.0, fw as f32),
                y2.clamp(0.0, fh as f32),
            ];
            let mask = protos.and_then(|p| {
                let coeffs: Vec<f32> = (0..p.count)
                    .map(|k| preds.at(4 + classes + k, c.anchor))
                    .collect();
                instance_mask(&coeffs, p, letterbox, &bbox)
            });
            Detection {
                class_name: class_name(class_names, c.class),
                confidence: c.score,
                bbox,
                mask,
            }
        })
        .collect();
    Ok(detections)
}

/// Frame-size mask: prototype mix above zero logit (sigmoid above 0.5),
/// cropped to the box.
fn instance_mask(
    coeffs: &[f32],
    protos: Prototypes<'_>,
    letterbox: &Letterbox,
    bbox: &[f32; 4],
) -> Option<Mask> {
    let (fw, fh) = letterbox.source;
    let plane = protos.height * protos.width;
    let logits: Vec<f32> = (0..plane)
        .map(|i| {
            coeffs
                .iter()
                .enumerate()
                .map(|(k, c)| c * protos.data[k * plane + i])
                .sum()
        })
        .collect();

    let mut mask = Mask::filled(fw, fh, false);
    let (x0, y0) = (bbox[0].floor() as u32, bbox[1].floor() as u32);
    let (x1, y1) = ((bbox[2].ceil() as u32).min(fw), (bbox[3].ceil() as u32).min(fh));
    let cell_w = letterbox.size as f32 / protos.width as f32;
    let cell_h = letterbox.size as f32 / protos.height as f32;
    for y in y0..y1 {
        for x in x0..x1 {
            let (cx, cy) = (x as f32 + 0.5, y as f32 + 0.5);
            if cx < bbox[0] || cx > bbox[2] || cy < bbox[1] || cy > bbox[3] {
                continue;
            }
            let (ix, iy) = letterbox.to_input(cx, cy);
            let px = ((ix / cell_w) as usize).min(protos.width - 1);
            let py = ((iy / cell_h) as usize).min(protos.height - 1);
            if logits[py * protos.width + px] > 0.0 {
                mask.set(x, y, true);
            }
        }
    }
    (fw > 0 && fh > 0).then_some(mask)
}

#[cfg(feature = "onnx")]
mod session {
    use image::RgbImage;
    use ort::session::Session;
    use ort::value::Tensor;
    use std::fmt::Display;
    use std::path::{Path, PathBuf};

    use super::{decode, parse_class_names, DecodeParams, Letterbox, Prototypes, RawPredictions, INPUT_SIZE};
    use crate::detection::{Detection, Detector};
    use crate::error::OverlayError;

    fn ort_error(e: impl Display) -> OverlayError {
        OverlayError::Detector(e.to_string())
    }

    /// YOLOv8-seg model exported to ONNX, run on the CPU.
    pub struct YoloSegDetector {
        path: PathBuf,
        session: Session,
        class_names: Vec<String>,
        params: DecodeParams,
    }

    impl YoloSegDetector {
        /// Load `path`. Class names come from `class_names` when given, then
        /// from the model's `names` metadata.
        pub fn load(path: impl AsRef<Path>, class_names: Option<Vec<String>>) -> Result<Self, OverlayError> {
            let path = path.as_ref().to_path_buf();
            let session = Session::builder()
                .map_err(ort_error)?
                .commit_from_file(&path)
                .map_err(|e| OverlayError::Detector(format!("{}: {e}", path.display())))?;
            let class_names = match class_names {
                Some(names) => names,
                None => session
                    .metadata()
                    .ok()
                    .and_then(|m| m.custom("names").ok().flatten())
                    .map(|text| parse_class_names(&text))
                    .unwrap_or_default(),
            };
            log::info!(
                "loaded {} ({} classes: {})",
                path.display(),
                class_names.len(),
                class_names.join(", ")
            );
            Ok(Self {
                path,
                session,
                class_names,
                params: DecodeParams::default(),
            })
        }

        pub fn with_params(mut self, params: DecodeParams) -> Self {
            self.params = params;
            self
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        pub fn class_names(&self) -> &[String] {
            &self.class_names
        }
    }

    impl Detector for YoloSegDetector {
        fn detect(&mut self, frame: &RgbImage, index: usize) -> Result<Vec<Detection>, OverlayError> {
            let letterbox = Letterbox::new(frame.dimensions(), INPUT_SIZE);
            let side = INPUT_SIZE as usize;
            let input = Tensor::from_array(([1usize, 3, side, side], letterbox.tensor(frame))).map_err(ort_error)?;
            let outputs = self.session.run(ort::inputs![input]).map_err(ort_error)?;

            let (shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(ort_error)?;
            if shape.len() != 3 {
                return Err(OverlayError::Detector(format!("unexpected output0 shape {:?}", &shape[..])));
            }
            let preds = RawPredictions {
                data,
                channels: shape[1] as usize,
                anchors: shape[2] as usize,
            };
            let protos = if outputs.len() > 1 {
                let (shape, data) = outputs[1].try_extract_tensor::<f32>().map_err(ort_error)?;
                if shape.len() != 4 {
                    return Err(OverlayError::Detector(format!("unexpected output1 shape {:?}", &shape[..])));
                }
                Some(Prototypes {
                    data,
                    count: shape[1] as usize,
                    height: shape[2] as usize,
                    width: shape[3] as usize,
                })
            } else {
                None
            };
            let detections = decode(preds, protos, &self.class_names, &letterbox, &self.params)?;
            log::debug!("frame {index}: {} detections", detections.len());
            Ok(detections)
        }
    }
}

#[cfg(feature = "onnx")]
pub use session::YoloSegDetector;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn names() -> Vec<String> {
        vec!["Tweezers".into(), "Needle_driver".into()]
    }

    /// `channels x anchors` predictions from per-anchor rows.
    fn transpose(rows: &[Vec<f32>]) -> Vec<f32> {
        let channels = rows[0].len();
        (0..channels)
            .flat_map(|c| rows.iter().map(move |r| r[c]))
            .collect()
    }

    #[test]
    fn letterbox_pads_the_short_side() {
        let lb = Letterbox::new((1280, 720), INPUT_SIZE);
        assert_relative_eq!(lb.scale, 0.5);
        assert_eq!(lb.pad, (0, 140));
        let (x, y) = lb.to_source(320.0, 320.0);
        assert_relative_eq!(x, 640.0);
        assert_relative_eq!(y, 360.0);
        let (ix, iy) = lb.to_input(x, y);
        assert_relative_eq!(ix, 320.0);
        assert_relative_eq!(iy, 320.0);
    }

    #[test]
    fn tensor_is_planar_and_padded() {
        let lb = Letterbox::new((4, 2), 8);
        let data = lb.tensor(&RgbImage::from_pixel(4, 2, Rgb([255, 0, 51])));
        assert_eq!(data.len(), 3 * 64);
        // rows 0 and 1 are padding, rows 2..6 the frame
        assert_relative_eq!(data[0], 114.0 / 255.0);
        let center = 4 * 8 + 4;
        assert_relative_eq!(data[center], 1.0);
        assert_relative_eq!(data[64 + center], 0.0);
        assert_relative_eq!(data[128 + center], 0.2);
    }

    #[test]
    fn overlapping_same_class_boxes_collapse() {
        // cx, cy, w, h, score(Tweezers), score(Needle_driver)
        let rows = vec![
            vec![100.0, 100.0, 40.0, 40.0, 0.9, 0.1],
            vec![102.0, 101.0, 40.0, 40.0, 0.8, 0.1],
            vec![101.0, 100.0, 40.0, 40.0, 0.1, 0.6],
            vec![300.0, 300.0, 20.0, 20.0, 0.02, 0.01],
        ];
        let data = transpose(&rows);
        let preds = RawPredictions {
            data: &data,
            channels: 6,
            anchors: 4,
        };
        let lb = Letterbox::new((640, 640), INPUT_SIZE);
        let dets = decode(preds, None, &names(), &lb, &DecodeParams::default()).unwrap();

        let summary: Vec<(&str, f32)> = dets.iter().map(|d| (d.class_name.as_str(), d.confidence)).collect();
        assert_eq!(summary, vec![("Tweezers", 0.9), ("Needle_driver", 0.6)]);
        assert_eq!(dets[0].bbox, [80.0, 80.0, 120.0, 120.0]);
        assert!(dets.iter().all(|d| d.mask.is_none()));
    }

    #[test]
    fn boxes_map_back_through_the_letterbox() {
        let rows = vec![vec![320.0, 320.0, 64.0, 32.0, 0.7]];
        let data = transpose(&rows);
        let preds = RawPredictions {
            data: &data,
            channels: 5,
            anchors: 1,
        };
        let lb = Letterbox::new((1280, 720), INPUT_SIZE);
        let dets = decode(preds, None, &[], &lb, &DecodeParams::default()).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_name, "class_0");
        assert_eq!(dets[0].bbox, [576.0, 328.0, 704.0, 392.0]);
    }

    #[test]
    fn mask_is_prototype_mix_cropped_to_box() {
        // two 4x4 prototypes: the first positive on the left half, the
        // second uniformly negative
        let mut proto = vec![0.0f32; 2 * 16];
        for y in 0..4 {
            for x in 0..4 {
                proto[y * 4 + x] = if x < 2 { 1.0 } else { -1.0 };
                proto[16 + y * 4 + x] = -1.0;
            }
        }
        let protos = Prototypes {
            data: &proto,
            count: 2,
            height: 4,
            width: 4,
        };
        // frame and input are both 8x8; box covers the top-left 6x6
        let rows = vec![vec![3.0, 3.0, 6.0, 6.0, 0.8, 2.0, 0.5]];
        let data = transpose(&rows);
        let preds = RawPredictions {
            data: &data,
            channels: 7,
            anchors: 1,
        };
        let lb = Letterbox::new((8, 8), 8);
        let dets = decode(preds, Some(protos), &names(), &lb, &DecodeParams::default()).unwrap();
        let mask = dets[0].mask.as_ref().unwrap();
        assert_eq!((mask.width(), mask.height()), (8, 8));
        // 2 * 1 + 0.5 * -1 > 0 on the left half only, rows 0..6 of the box
        assert!(mask.get(0, 0) && mask.get(3, 5));
        assert!(!mask.get(4, 0));
        assert!(!mask.get(1, 6));
        assert_eq!(mask.count(), 4 * 6);
    }

    #[test]
    fn short_prediction_tensor_is_an_error() {
        let data = vec![0.0f32; 4];
        let preds = RawPredictions {
            data: &data,
            channels: 4,
            anchors: 1,
        };
        let lb = Letterbox::new((8, 8), 8);
        assert!(matches!(
            decode(preds, None, &[], &lb, &DecodeParams::default()),
            Err(OverlayError::Detector(_))
        ));
    }

    #[test]
    fn class_names_from_export_metadata() {
        assert_eq!(
            parse_class_names("{0: 'Tweezers', 1: 'Needle_driver'}"),
            vec!["Tweezers".to_string(), "Needle_driver".to_string()]
        );
        assert_eq!(parse_class_names("{1: 'b'}"), vec!["class_0".to_string(), "b".to_string()]);
        assert!(parse_class_names("").is_empty());
        assert_eq!(class_name(&[], 3), "class_3");
    }

    #[test]
    fn iou_of_disjoint_and_nested_boxes() {
        assert_eq!(iou(&[0.0, 0.0, 1.0, 1.0], &[2.0, 2.0, 3.0, 3.0]), 0.0);
        assert_relative_eq!(iou(&[0.0, 0.0, 2.0, 2.0], &[0.0, 0.0, 1.0, 1.0]), 0.25);
    }
}
