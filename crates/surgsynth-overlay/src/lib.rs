//! Draw instance segmentation predictions over images and videos.
//!
//! Each detection above the confidence threshold gets its mask tinted in the
//! class color, a box and a `"{class} {score}"` label. The model sits behind
//! the [`Detector`] trait; [`PrecomputedDetector`] replays predictions saved
//! as JSON. Video goes through the [`FrameSource`]/[`FrameSink`] pair, with a
//! frame-sequence directory implementation in [`sequence`] and, with the
//! `video` feature, OpenCV-backed container files in `video`. The [`yolo`]
//! module decodes YOLOv8-seg outputs; with the `onnx` feature it also runs
//! the exported model as `YoloSegDetector`.
//!
//! ```no_run
//! use std::path::Path;
//! use surgsynth_overlay::{process_image, OverlayParams, PrecomputedDetector};
//!
//! let mut detector = PrecomputedDetector::load_json("predictions.json")?;
//! process_image(
//!     Path::new("frame.png"),
//!     Path::new("frame_overlay.png"),
//!     &mut detector,
//!     &OverlayParams::default(),
//! )?;
//! # Ok::<(), surgsynth_overlay::OverlayError>(())
//! ```

mod detection;
mod draw;
mod error;
pub mod font;
mod process;
pub mod sequence;
#[cfg(feature = "video")]
pub mod video;
pub mod yolo;

pub use detection::{Detection, Detector, FramePredictions, Mask, PrecomputedDetector};
pub use draw::{
    blend_mask, draw_box, draw_detection, draw_overlay, label_text, ColorMap, OverlayStyle, GREEN,
    RED, WHITE,
};
pub use error::OverlayError;
pub use process::{
    overlay_frame, process_image, process_video, OverlayParams, VideoSummary, IMAGE_CONFIDENCE,
    VIDEO_CONFIDENCE,
};
pub use sequence::{FrameSink, FrameSource, SequenceManifest, SequenceReader, SequenceWriter};
#[cfg(feature = "video")]
pub use video::{VideoFileReader, VideoFileWriter};
#[cfg(feature = "onnx")]
pub use yolo::YoloSegDetector;
