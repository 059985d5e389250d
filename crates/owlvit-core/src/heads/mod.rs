//! Prediction heads on top of the image-text embedder.
//!
//! - [`ClassHead`]: similarity logits between patches and text queries
//! - [`BoxHead`]: one box per patch, biased towards the patch's grid cell

pub(crate) mod box_head;
pub(crate) mod class_head;
pub(crate) mod dense;

pub use box_head::{BoxHead, BOX_COORDS, BOX_HEAD_LAYERS};
pub use class_head::{ClassHead, ClassPrediction, Queries, MASKED_LOGIT};
pub use dense::Dense;

/// Parameter subtree of the class head.
pub const CLASS_HEAD_SCOPE: &str = "class_head";

/// Parameter subtree of the box head.
pub const BOX_HEAD_SCOPE: &str = "obj_box_head";

/// Parameter subtree of the image-text embedder.
pub const BACKBONE_SCOPE: &str = "backbone";
