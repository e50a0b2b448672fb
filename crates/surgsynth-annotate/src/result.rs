use image::RgbaImage;
use serde::{Deserialize, Serialize};
use surgsynth_core::LabelMap;

/// Attributes of one rendered object instance in one frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Value of this instance in the frame's instance label map.
    pub instance_id: u32,
    pub category_id: u32,
    pub name: String,
}

/// Everything the renderer produced for one camera pose.
#[derive(Clone, Debug)]
pub struct RenderedFrame {
    pub category_segmap: LabelMap,
    pub instance_segmap: LabelMap,
    pub instance_records: Vec<InstanceRecord>,
    pub color: RgbaImage,
}

/// A batch of rendered frames, in keyframe order.
#[derive(Clone, Debug, Default)]
pub struct RenderResult {
    pub frames: Vec<RenderedFrame>,
}

impl RenderResult {
    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Total number of instance records across all frames.
    pub fn record_count(&self) -> usize {
        self.frames.iter().map(|f| f.instance_records.len()).sum()
    }
}
