//! Category allow-list filtering of render results.

use crate::result::{RenderResult, RenderedFrame};

/// Keep only instance records whose category is in `allowed`.
///
/// Label maps and color buffers pass through untouched and no frame is
/// dropped: a frame left without records still has to be written so image
/// and annotation indices stay aligned.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "debug", skip(result), fields(frames = result.len()))
)]
pub fn filter_by_category(result: RenderResult, allowed: &[u32]) -> RenderResult {
    let frames = result
        .frames
        .into_iter()
        .map(|frame| {
            let before = frame.instance_records.len();
            let instance_records: Vec<_> = frame
                .instance_records
                .into_iter()
                .filter(|r| allowed.contains(&r.category_id))
                .collect();
            log::trace!("kept {}/{} instance records", instance_records.len(), before);
            RenderedFrame {
                instance_records,
                ..frame
            }
        })
        .collect();
    RenderResult { frames }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::InstanceRecord;
    use image::RgbaImage;
    use surgsynth_core::{LabelMap, TARGET_CATEGORY_IDS};

    fn record(instance_id: u32, category_id: u32) -> InstanceRecord {
        InstanceRecord {
            instance_id,
            category_id,
            name: format!("obj{instance_id}"),
        }
    }

    fn frame(records: Vec<InstanceRecord>) -> RenderedFrame {
        let mut segmap = LabelMap::new(4, 4);
        segmap.set(1, 1, 7);
        RenderedFrame {
            category_segmap: segmap.clone(),
            instance_segmap: segmap,
            instance_records: records,
            color: RgbaImage::new(4, 4),
        }
    }

    #[test]
    fn keeps_frame_count_and_only_allowed_categories() {
        let input = RenderResult {
            frames: vec![
                frame(vec![record(1, 1), record(2, 10), record(3, 2)]),
                frame(vec![record(4, 10)]),
                frame(vec![]),
            ],
        };
        let segmaps: Vec<_> = input.frames.iter().map(|f| f.instance_segmap.clone()).collect();

        let out = filter_by_category(input, &TARGET_CATEGORY_IDS);
        assert_eq!(out.len(), 3);
        let ids: Vec<Vec<u32>> = out
            .frames
            .iter()
            .map(|f| f.instance_records.iter().map(|r| r.instance_id).collect())
            .collect();
        assert_eq!(ids, vec![vec![1, 3], vec![], vec![]]);
        for (f, s) in out.frames.iter().zip(&segmaps) {
            assert_eq!(&f.instance_segmap, s);
            assert!(f
                .instance_records
                .iter()
                .all(|r| TARGET_CATEGORY_IDS.contains(&r.category_id)));
        }
    }

    #[test]
    fn empty_allow_list_empties_every_frame_but_keeps_it() {
        let input = RenderResult {
            frames: vec![frame(vec![record(1, 1)]), frame(vec![record(2, 2)])],
        };
        let out = filter_by_category(input, &[]);
        assert_eq!(out.len(), 2);
        assert_eq!(out.record_count(), 0);
    }
}
