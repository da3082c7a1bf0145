//! Training target assignment for two-stage region based detectors.
//!
//! Candidates (anchors of the region proposal stage or proposals of the box
//! head) are matched against ground truth boxes by IoU, then converted into
//! classification labels, box regression deltas and mask targets.

mod common;
pub mod assign;
pub mod box_coder;
pub mod config;
pub mod error;
pub mod input;
pub mod iou;
pub mod mask;
pub mod matcher;
pub mod ratio;
pub mod sampler;
pub mod stage;

pub use assign::*;
pub use box_coder::*;
pub use config::*;
pub use error::*;
pub use input::*;
pub use iou::*;
pub use mask::*;
pub use matcher::*;
pub use ratio::*;
pub use sampler::*;
pub use stage::*;
