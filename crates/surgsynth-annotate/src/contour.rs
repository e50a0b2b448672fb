//! Binary-mask to polygon conversion.
//!
//! Each 8-connected component of a mask is traced along pixel edges, keeping
//! the component on the right-hand side (clockwise in image coordinates).
//! Vertices sit on pixel corners, so for a hole-free component the polygon
//! area equals its pixel count.

use surgsynth_core::LabelMapView;

/// Pixel-aligned bounding box `[x, y, w, h]`.
pub type PixelBox = [u32; 4];

/// One connected component of a mask.
#[derive(Clone, Debug, PartialEq)]
pub struct MaskComponent {
    /// Outer boundary vertices `(x, y)` on pixel corners, without repeating
    /// the first vertex.
    pub polygon: Vec<(u32, u32)>,
    pub area: usize,
    pub bbox: PixelBox,
}

impl MaskComponent {
    /// Polygon as the flat `[x0, y0, x1, y1, ...]` list used by COCO.
    pub fn flat_polygon(&self) -> Vec<f64> {
        self.polygon
            .iter()
            .flat_map(|&(x, y)| [x as f64, y as f64])
            .collect()
    }
}

/// Label the 8-connected components of `mask`. Returns the per-pixel label
/// (0 = background, components numbered from 1) and the component count.
fn label_components(mask: &[bool], width: usize, height: usize) -> (Vec<u32>, u32) {
    let mut labels = vec![0u32; mask.len()];
    let mut next = 0u32;
    let mut stack = Vec::new();

    for start in 0..mask.len() {
        if !mask[start] || labels[start] != 0 {
            continue;
        }
        next += 1;
        labels[start] = next;
        stack.push(start);
        while let Some(idx) = stack.pop() {
            let (x, y) = ((idx % width) as i64, (idx / width) as i64);
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                        continue;
                    }
                    let n = ny as usize * width + nx as usize;
                    if mask[n] && labels[n] == 0 {
                        labels[n] = next;
                        stack.push(n);
                    }
                }
            }
        }
    }
    (labels, next)
}

/// Trace the outer boundary of component `label` starting at its first pixel
/// in raster order.
fn trace_outer_boundary(
    labels: &[u32],
    width: usize,
    height: usize,
    label: u32,
    first: usize,
) -> Vec<(u32, u32)> {
    let inside = |px: i64, py: i64| -> bool {
        px >= 0
            && py >= 0
            && px < width as i64
            && py < height as i64
            && labels[py as usize * width + px as usize] == label
    };
    // pixel ahead of corner (x, y) when heading `d`, on side `s`
    let ahead = |x: i64, y: i64, d: (i64, i64), s: (i64, i64)| -> bool {
        let ox = if d.0 + s.0 > 0 { 0 } else { -1 };
        let oy = if d.1 + s.1 > 0 { 0 } else { -1 };
        inside(x + ox, y + oy)
    };

    let start = ((first % width) as i64, (first / width) as i64);
    let mut p = start;
    let mut d = (1i64, 0i64);
    let mut polygon = vec![(start.0 as u32, start.1 as u32)];

    loop {
        p = (p.0 + d.0, p.1 + d.1);
        if p == start {
            break;
        }
        let left = (d.1, -d.0);
        let right = (-d.1, d.0);
        let next = if ahead(p.0, p.1, d, left) {
            left
        } else if ahead(p.0, p.1, d, right) {
            d
        } else {
            right
        };
        if next != d {
            polygon.push((p.0 as u32, p.1 as u32));
            d = next;
        }
    }
    polygon
}

/// Split a mask into components with their outer polygons, areas and boxes.
///
/// `mask` is row-major with `len == width * height`.
pub fn mask_components(mask: &[bool], width: usize, height: usize) -> Vec<MaskComponent> {
    debug_assert_eq!(mask.len(), width * height);
    let (labels, count) = label_components(mask, width, height);
    if count == 0 {
        return Vec::new();
    }

    let n = count as usize;
    let mut first = vec![usize::MAX; n];
    let mut area = vec![0usize; n];
    let mut bounds = vec![[u32::MAX, u32::MAX, 0u32, 0u32]; n];
    for (idx, &l) in labels.iter().enumerate() {
        if l == 0 {
            continue;
        }
        let c = (l - 1) as usize;
        if first[c] == usize::MAX {
            first[c] = idx;
        }
        area[c] += 1;
        let (x, y) = ((idx % width) as u32, (idx / width) as u32);
        let b = &mut bounds[c];
        b[0] = b[0].min(x);
        b[1] = b[1].min(y);
        b[2] = b[2].max(x);
        b[3] = b[3].max(y);
    }

    (0..n)
        .map(|c| {
            let [x0, y0, x1, y1] = bounds[c];
            MaskComponent {
                polygon: trace_outer_boundary(&labels, width, height, c as u32 + 1, first[c]),
                area: area[c],
                bbox: [x0, y0, x1 - x0 + 1, y1 - y0 + 1],
            }
        })
        .collect()
}

/// Components of the pixels carrying `label` in a segmentation map.
pub fn label_components_of(map: LabelMapView<'_>, label: u32) -> Vec<MaskComponent> {
    mask_components(&map.mask_of(label), map.width, map.height)
}

/// Shoelace area of a closed polygon.
pub fn polygon_area(polygon: &[(u32, u32)]) -> f64 {
    if polygon.len() < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    for (i, &(x0, y0)) in polygon.iter().enumerate() {
        let (x1, y1) = polygon[(i + 1) % polygon.len()];
        twice += x0 as f64 * y1 as f64 - x1 as f64 * y0 as f64;
    }
    twice.abs() / 2.0
}
