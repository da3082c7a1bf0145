//! Error categories of target assignment.

use thiserror::Error;

pub type TargetResult<T> = Result<T, TargetError>;

#[derive(Debug, Error)]
pub enum TargetError {
    #[error("box {index} must have 4 coordinates, but get {len}")]
    MalformedBox { index: usize, len: usize },
    #[error("box {index} {coords:?} is invalid: {reason}")]
    InvalidBox {
        index: usize,
        coords: [f64; 4],
        reason: String,
    },
    #[error("expect {expect} {what}, but get {found}")]
    LengthMismatch {
        what: &'static str,
        expect: usize,
        found: usize,
    },
    #[error("ground truth {index} has class {class}, but object classes must be positive")]
    InvalidLabel { index: usize, class: i64 },
    #[error("match refers to ground truth {index}, but only {len} ground truth boxes exist")]
    MatchIndexOutOfRange { index: usize, len: usize },
    #[error("invalid matcher thresholds (high = {high}, low = {low}): {reason}")]
    InvalidThresholds {
        high: f64,
        low: f64,
        reason: &'static str,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("box pair {index} has zero width or height")]
    DegenerateBox { index: usize },
    #[error("invalid instance masks: {0}")]
    InvalidMasks(String),
    #[error("mask targets are requested, but the ground truth has no instance masks")]
    MissingMasks,
}
