//! Container video I/O through OpenCV's `videoio`.
//!
//! [`VideoFileReader`] decodes any file OpenCV can open and reports its native
//! frame rate and size; [`VideoFileWriter`] encodes at the rate and size it was
//! created with (`mp4v` for `.mp4`/`.m4v`/`.mov`, `MJPG` for `.avi`).

use image::RgbImage;
use opencv::core::{Mat, Scalar, Size, CV_8UC3};
use opencv::imgproc;
use opencv::prelude::*;
use opencv::videoio::{
    VideoCapture, VideoWriter, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH,
};
use std::fmt::Display;
use std::path::{Path, PathBuf};

use crate::error::OverlayError;
use crate::sequence::{FrameSink, FrameSource, DEFAULT_FPS};

fn video_error(path: &Path, message: impl Display) -> OverlayError {
    OverlayError::Video {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

fn path_str(path: &Path) -> Result<&str, OverlayError> {
    path.to_str()
        .ok_or_else(|| video_error(path, "path is not valid UTF-8"))
}

fn bgr_to_rgb(mat: &Mat) -> opencv::Result<Option<RgbImage>> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(mat, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
    let (w, h) = (rgb.cols() as u32, rgb.rows() as u32);
    Ok(RgbImage::from_raw(w, h, rgb.data_bytes()?.to_vec()))
}

fn rgb_to_bgr(frame: &RgbImage) -> opencv::Result<Mat> {
    let (w, h) = frame.dimensions();
    let mut rgb = Mat::new_rows_cols_with_default(h as i32, w as i32, CV_8UC3, Scalar::all(0.0))?;
    rgb.data_bytes_mut()?.copy_from_slice(frame.as_raw());
    let mut bgr = Mat::default();
    imgproc::cvt_color(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;
    Ok(bgr)
}

/// Four-character codec for an output file name.
pub fn codec_for(path: &Path) -> [char; 4] {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "avi" => ['M', 'J', 'P', 'G'],
        _ => ['m', 'p', '4', 'v'],
    }
}

pub struct VideoFileReader {
    path: PathBuf,
    capture: VideoCapture,
    fps: f64,
    dimensions: (u32, u32),
    next: usize,
    done: bool,
}

impl VideoFileReader {
    /// Open `path`. `fps` overrides the container frame rate; a container that
    /// reports none falls back to [`DEFAULT_FPS`].
    pub fn open(path: impl AsRef<Path>, fps: Option<f64>) -> Result<Self, OverlayError> {
        let path = path.as_ref().to_path_buf();
        let capture = VideoCapture::from_file(path_str(&path)?, CAP_ANY)
            .map_err(|e| video_error(&path, e))?;
        if !capture.is_opened().map_err(|e| video_error(&path, e))? {
            return Err(video_error(&path, "cannot open video"));
        }
        let prop = |id| capture.get(id).map_err(|e| video_error(&path, e));
        let native_fps = prop(CAP_PROP_FPS)?;
        let dimensions = (
            prop(CAP_PROP_FRAME_WIDTH)? as u32,
            prop(CAP_PROP_FRAME_HEIGHT)? as u32,
        );
        if dimensions.0 == 0 || dimensions.1 == 0 {
            return Err(video_error(&path, "video reports no frame size"));
        }
        let fps = fps.unwrap_or(if native_fps > 0.0 { native_fps } else { DEFAULT_FPS });
        log::debug!(
            "video {}: {}x{} @ {} fps",
            path.display(),
            dimensions.0,
            dimensions.1,
            fps
        );
        Ok(Self {
            path,
            capture,
            fps,
            dimensions,
            next: 0,
            done: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&mut self) -> Result<Option<RgbImage>, OverlayError> {
        let mut mat = Mat::default();
        let grabbed = self
            .capture
            .read(&mut mat)
            .map_err(|e| video_error(&self.path, e))?;
        if !grabbed || mat.rows() == 0 || mat.cols() == 0 {
            return Ok(None);
        }
        let index = self.next;
        let frame = bgr_to_rgb(&mat)
            .map_err(|e| video_error(&self.path, e))?
            .ok_or_else(|| video_error(&self.path, format!("frame {index} has an unexpected layout")))?;
        if frame.dimensions() != self.dimensions {
            return Err(OverlayError::FrameSize {
                index,
                expected: self.dimensions,
                found: frame.dimensions(),
            });
        }
        Ok(Some(frame))
    }
}

impl FrameSource for VideoFileReader {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn next_frame(&mut self) -> Option<Result<RgbImage, OverlayError>> {
        if self.done {
            return None;
        }
        let result = self.read();
        self.next += 1;
        match result {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

pub struct VideoFileWriter {
    path: PathBuf,
    writer: VideoWriter,
    dimensions: (u32, u32),
    written: usize,
}

impl VideoFileWriter {
    pub fn create(
        path: impl AsRef<Path>,
        fps: f64,
        dimensions: (u32, u32),
    ) -> Result<Self, OverlayError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| OverlayError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let [a, b, c, d] = codec_for(&path);
        let fourcc = VideoWriter::fourcc(a, b, c, d).map_err(|e| video_error(&path, e))?;
        let size = Size::new(dimensions.0 as i32, dimensions.1 as i32);
        let writer = VideoWriter::new(path_str(&path)?, fourcc, fps, size, true)
            .map_err(|e| video_error(&path, e))?;
        if !writer.is_opened().map_err(|e| video_error(&path, e))? {
            return Err(video_error(&path, "no encoder accepted the output"));
        }
        Ok(Self {
            path,
            writer,
            dimensions,
            written: 0,
        })
    }

    pub fn frames_written(&self) -> usize {
        self.written
    }
}

impl FrameSink for VideoFileWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OverlayError> {
        if frame.dimensions() != self.dimensions {
            return Err(OverlayError::FrameSize {
                index: self.written,
                expected: self.dimensions,
                found: frame.dimensions(),
            });
        }
        let mat = rgb_to_bgr(frame).map_err(|e| video_error(&self.path, e))?;
        self.writer
            .write(&mat)
            .map_err(|e| video_error(&self.path, e))?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), OverlayError> {
        self.writer
            .release()
            .map_err(|e| video_error(&self.path, e))
    }
}
