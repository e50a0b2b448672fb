//! Image and video processing around a [`Detector`].

use image::RgbImage;
use std::path::Path;

use crate::detection::{Detection, Detector};
use crate::draw::{draw_overlay, ColorMap, OverlayStyle};
use crate::error::OverlayError;
use crate::sequence::{FrameSink, FrameSource};

/// Default threshold for still images.
pub const IMAGE_CONFIDENCE: f32 = 0.5;
/// Default threshold for video, lower to keep tracks alive between frames.
pub const VIDEO_CONFIDENCE: f32 = 0.1;

/// Threshold and drawing parameters of an overlay run.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayParams {
    /// Detections at or below this confidence are dropped.
    pub confidence: f32,
    pub colors: ColorMap,
    pub style: OverlayStyle,
}

impl OverlayParams {
    pub fn with_confidence(confidence: f32) -> Self {
        Self {
            confidence,
            colors: ColorMap::default(),
            style: OverlayStyle::default(),
        }
    }
}

impl Default for OverlayParams {
    fn default() -> Self {
        Self::with_confidence(IMAGE_CONFIDENCE)
    }
}

/// Detect, threshold and draw on a single frame. Returns the number of
/// detections drawn.
pub fn overlay_frame<D: Detector + ?Sized>(
    frame: &mut RgbImage,
    index: usize,
    detector: &mut D,
    params: &OverlayParams,
) -> Result<usize, OverlayError> {
    let detections: Vec<Detection> = detector
        .detect(frame, index)?
        .into_iter()
        .filter(|d| d.confidence > params.confidence)
        .collect();
    draw_overlay(frame, &detections, &params.colors, &params.style);
    Ok(detections.len())
}

/// Overlay the detections of one image file and write the result.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "info", skip(input, detector, params), fields(input = %input.display()))
)]
pub fn process_image<D: Detector + ?Sized>(
    input: &Path,
    output: &Path,
    detector: &mut D,
    params: &OverlayParams,
) -> Result<usize, OverlayError> {
    let mut frame = image::open(input)
        .map_err(|source| OverlayError::Image {
            path: input.to_path_buf(),
            source,
        })?
        .to_rgb8();
    let drawn = overlay_frame(&mut frame, 0, detector, params)?;
    frame.save(output).map_err(|source| OverlayError::Image {
        path: output.to_path_buf(),
        source,
    })?;
    log::info!(
        "{} detections drawn on {} -> {}",
        drawn,
        input.display(),
        output.display()
    );
    Ok(drawn)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VideoSummary {
    pub frames: usize,
    pub detections: usize,
}

/// Process `source` frame by frame, in order, into `sink`.
///
/// A frame that fails to decode stops the run: the sink is finished so the
/// frames already written stay usable, then the decode error is returned.
pub fn process_video<S, K, D>(
    source: &mut S,
    sink: &mut K,
    detector: &mut D,
    params: &OverlayParams,
) -> Result<VideoSummary, OverlayError>
where
    S: FrameSource + ?Sized,
    K: FrameSink + ?Sized,
    D: Detector + ?Sized,
{
    let mut summary = VideoSummary::default();
    while let Some(next) = source.next_frame() {
        let mut frame = match next {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("stopping after {} frames: {e}", summary.frames);
                sink.finish()?;
                return Err(e);
            }
        };
        summary.detections += overlay_frame(&mut frame, summary.frames, detector, params)?;
        sink.write_frame(&frame)?;
        summary.frames += 1;
        log::trace!("frame {} done", summary.frames);
    }
    sink.finish()?;
    log::info!(
        "{} frames processed, {} detections drawn",
        summary.frames,
        summary.detections
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{FramePredictions, Mask, PrecomputedDetector};
    use image::Rgb;

    fn tweezers(confidence: f32) -> Detection {
        Detection {
            class_name: "Tweezers".into(),
            confidence,
            bbox: [1.0, 1.0, 6.0, 6.0],
            mask: Some(Mask::filled(8, 8, true)),
        }
    }

    #[test]
    fn threshold_is_strict() {
        let mut detector = PrecomputedDetector::new(vec![FramePredictions {
            detections: vec![tweezers(0.5), tweezers(0.51)],
        }]);
        let mut frame = RgbImage::new(8, 8);
        let drawn = overlay_frame(&mut frame, 0, &mut detector, &OverlayParams::default()).unwrap();
        assert_eq!(drawn, 1);
    }

    #[test]
    fn frame_with_nothing_above_threshold_is_untouched() {
        let mut detector = PrecomputedDetector::new(vec![FramePredictions {
            detections: vec![tweezers(0.05)],
        }]);
        let original = RgbImage::from_fn(8, 8, |x, y| Rgb([x as u8 * 9, y as u8 * 7, 3]));
        let mut frame = original.clone();
        let params = OverlayParams::with_confidence(VIDEO_CONFIDENCE);
        assert_eq!(overlay_frame(&mut frame, 0, &mut detector, &params).unwrap(), 0);
        assert_eq!(frame, original);
    }
}
