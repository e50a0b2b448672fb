use image::{Rgba, RgbaImage};
use surgsynth_annotate::{
    filter_by_category, CocoDataset, CocoStore, InstanceRecord, RenderResult, RenderedFrame,
};
use surgsynth_core::{LabelMap, TARGET_CATEGORY_IDS};

fn frame(objects: &[(u32, u32, usize)]) -> RenderedFrame {
    let (w, h) = (16, 12);
    let mut instance = LabelMap::new(w, h);
    let mut category = LabelMap::new(w, h);
    let mut records = Vec::new();
    for &(instance_id, category_id, x0) in objects {
        for y in 2..6 {
            for x in x0..x0 + 3 {
                instance.set(x, y, instance_id);
                category.set(x, y, category_id);
            }
        }
        records.push(InstanceRecord {
            instance_id,
            category_id,
            name: format!("object_{instance_id}"),
        });
    }
    RenderedFrame {
        category_segmap: category,
        instance_segmap: instance,
        instance_records: records,
        color: RgbaImage::from_pixel(w as u32, h as u32, Rgba([30, 60, 90, 255])),
    }
}

#[test]
fn appends_across_stores_continue_numbering() {
    let dir = tempfile::tempdir().unwrap();
    let coco_dir = dir.path().join("coco_data");

    let first = RenderResult {
        frames: vec![frame(&[(1, 1, 1), (2, 10, 6)]), frame(&[(3, 2, 1)])],
    };
    let mut store = CocoStore::open(&coco_dir).unwrap();
    store
        .append(&filter_by_category(first, &TARGET_CATEGORY_IDS))
        .unwrap();
    drop(store);

    // a hand-only frame still produces an image entry
    let second = RenderResult {
        frames: vec![frame(&[(4, 10, 1)]), frame(&[(5, 1, 1), (6, 2, 8)])],
    };
    let mut store = CocoStore::open(&coco_dir).unwrap();
    store
        .append(&filter_by_category(second, &TARGET_CATEGORY_IDS))
        .unwrap();

    let dataset = CocoDataset::load_json(coco_dir.join("coco_annotations.json")).unwrap();
    let image_ids: Vec<u64> = dataset.images.iter().map(|i| i.id).collect();
    assert_eq!(image_ids, vec![0, 1, 2, 3]);
    for i in 0..4 {
        assert!(coco_dir.join(format!("images/{i:06}.png")).is_file());
    }

    let ann_ids: Vec<u64> = dataset.annotations.iter().map(|a| a.id).collect();
    assert_eq!(ann_ids, vec![0, 1, 2, 3]);
    assert!(dataset
        .annotations
        .iter()
        .all(|a| TARGET_CATEGORY_IDS.contains(&a.category_id)));
    let per_image: Vec<u64> = dataset.annotations.iter().map(|a| a.image_id).collect();
    assert_eq!(per_image, vec![0, 1, 3, 3]);

    let category_ids: Vec<u32> = dataset.categories.iter().map(|c| c.id).collect();
    assert_eq!(category_ids, vec![1, 2]);
}
