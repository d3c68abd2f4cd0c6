pub mod batch;
pub mod error;
pub mod geometry;
pub mod validation;

pub use batch::{Batch, BatchSource, Role};
pub use error::{ErrorKind, EvalError, Result};
pub use geometry::{apply_mask, bbox_crop, bbox_from_mask, BoundingBox, MaskBounds};
