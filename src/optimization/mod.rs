pub mod factors;
pub mod refine;

pub use refine::{RefineOptions, RefineOutcome, RefinePoint, refine_pose};
