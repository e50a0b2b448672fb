use serde::{Deserialize, Serialize};

/// Row-major integer label map (segmentation output), `len = w*h`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMap {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u32>,
}

#[derive(Clone, Copy, Debug)]
pub struct LabelMapView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u32], // row-major, len = w*h
}

impl LabelMap {
    /// A map filled with the background label 0.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height],
        }
    }

    #[inline]
    pub fn view(&self) -> LabelMapView<'_> {
        LabelMapView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u32 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, label: u32) {
        self.data[y * self.width + x] = label;
    }
}

impl LabelMapView<'_> {
    /// Label at `(x, y)`; out-of-bounds reads return the background label.
    #[inline]
    pub fn get(&self, x: i64, y: i64) -> u32 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return 0;
        }
        self.data[y as usize * self.width + x as usize]
    }

    /// Binary mask of the pixels carrying `label`.
    pub fn mask_of(&self, label: u32) -> Vec<bool> {
        self.data.iter().map(|&v| v == label).collect()
    }

    pub fn count(&self, label: u32) -> usize {
        self.data.iter().filter(|&&v| v == label).count()
    }
}
