use crate::common::*;

/// Pairwise IoU matrix with one row per `lhs` box and one column per `rhs` box.
pub fn box_iou(lhs: &[TLBR<f64>], rhs: &[TLBR<f64>]) -> Array2<f64> {
    Array2::from_shape_fn((lhs.len(), rhs.len()), |(row, col)| {
        lhs[row].iou_with(&rhs[col])
    })
}
