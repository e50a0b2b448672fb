use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum OverlayError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("frame {index} ({path}) failed to decode: {source}")]
    Decode {
        index: usize,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("frame {index} is {found:?}, sequence is {expected:?}")]
    FrameSize {
        index: usize,
        expected: (u32, u32),
        found: (u32, u32),
    },
    #[error("mask run lengths cover {covered} pixels, expected {width}x{height}")]
    InvalidMask {
        width: u32,
        height: u32,
        covered: u64,
    },
    #[error("no frames in {0}")]
    EmptySequence(PathBuf),
    #[error("video {path}: {message}")]
    Video { path: PathBuf, message: String },
    #[error("detector failed: {0}")]
    Detector(String),
}
