use serde::{Deserialize, Serialize};

/// Object category rendered into the scene.
///
/// The numeric ids are what ends up in the category segmentation map and in
/// the COCO `category_id` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    NeedleHolder,
    Tweezers,
    /// The hand mesh placed next to a tool. Never annotated.
    Occluder,
}

/// Category ids allowed to reach the annotation store.
pub const TARGET_CATEGORY_IDS: [u32; 2] = [1, 2];

impl Category {
    pub const ALL: [Category; 3] = [Category::NeedleHolder, Category::Tweezers, Category::Occluder];

    #[inline]
    pub const fn id(self) -> u32 {
        match self {
            Category::NeedleHolder => 1,
            Category::Tweezers => 2,
            Category::Occluder => 10,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.id() == id)
    }

    /// True for the tool classes the detector is trained on.
    #[inline]
    pub const fn is_target(self) -> bool {
        matches!(self, Category::NeedleHolder | Category::Tweezers)
    }

    /// Class name as used by the trained model and in exported annotations.
    pub const fn coco_name(self) -> &'static str {
        match self {
            Category::NeedleHolder => "Needle_driver",
            Category::Tweezers => "Tweezers",
            Category::Occluder => "Hand",
        }
    }
}
