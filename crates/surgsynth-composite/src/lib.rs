//! Background compositing for rendered tool cutouts.
//!
//! Each foreground with an alpha channel is pasted over a background chosen
//! uniformly at random, resized to the foreground and darkened now and then.

mod blend;
mod compositor;

pub use blend::{composite, darken, paste_with_alpha};
pub use compositor::{
    collect_images, default_types, CompositeError, CompositeOptions, CompositeRecord, Compositor,
    DARKEN_PROBABILITY, DARKEN_RANGE, DEFAULT_OUTPUT,
};
