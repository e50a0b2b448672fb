//! Render results, category allow-list filtering and COCO export.
//!
//! The render drivers hand every batch through [`filter_by_category`] before
//! [`CocoStore::append`], so only target categories end up in the dataset.

mod coco;
mod contour;
mod filter;
mod result;

pub use coco::{
    AnnotationError, AppendStats, CocoAnnotation, CocoCategory, CocoDataset, CocoImage, CocoInfo,
    CocoStore, ANNOTATIONS_FILE, IMAGES_DIR,
};
pub use contour::{label_components_of, mask_components, polygon_area, MaskComponent, PixelBox};
pub use filter::filter_by_category;
pub use result::{InstanceRecord, RenderResult, RenderedFrame};
