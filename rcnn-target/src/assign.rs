//! Conversion of matches into training labels.

use crate::{
    common::*,
    error::{TargetError, TargetResult},
    matcher::Match,
};

/// Anchor label of foreground candidates.
pub const FOREGROUND_LABEL: f32 = 1.0;
/// Anchor label of background candidates.
pub const BACKGROUND_LABEL: f32 = 0.0;
/// Anchor label of ignored candidates, excluded from the loss.
pub const IGNORE_LABEL: f32 = -1.0;
/// Proposal class of ignored candidates, excluded from the loss.
pub const IGNORE_CLASS: i64 = -1;

/// Supervision of the region proposal stage.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorTargets {
    /// Objectness label per anchor.
    pub labels: Vec<f32>,
    /// The matched ground truth box per anchor, or the zero box when unmatched.
    pub matched_gt_boxes: Vec<TLBR<f64>>,
}

/// Supervision of the box head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalTargets {
    /// Class label per proposal.
    pub labels: Vec<i64>,
    /// Ground truth index per proposal, 0 when not matched. Only meaningful
    /// for foreground proposals.
    pub matched_idxs: Vec<usize>,
}

fn check_gt_index(index: usize, len: usize) -> TargetResult<usize> {
    if index < len {
        Ok(index)
    } else {
        Err(TargetError::MatchIndexOutOfRange { index, len })
    }
}

/// Build anchor labels and regression references from matches.
pub fn assign_anchor_targets(
    matches: &[Match],
    gt_boxes: &[TLBR<f64>],
) -> TargetResult<AnchorTargets> {
    let (labels, matched_gt_boxes) = matches
        .iter()
        .map(|m| -> TargetResult<_> {
            let target = match m.gt_index() {
                Some(index) => {
                    let index = check_gt_index(index, gt_boxes.len())?;
                    (FOREGROUND_LABEL, gt_boxes[index].clone())
                }
                None if m.is_background() => (BACKGROUND_LABEL, TLBR::zero()),
                None => (IGNORE_LABEL, TLBR::zero()),
            };
            Ok(target)
        })
        .collect::<TargetResult<Vec<_>>>()?
        .into_iter()
        .unzip();

    Ok(AnchorTargets {
        labels,
        matched_gt_boxes,
    })
}

/// Build proposal class labels and matched instance indices from matches.
pub fn assign_proposal_targets(
    matches: &[Match],
    gt_classes: &[i64],
) -> TargetResult<ProposalTargets> {
    let (labels, matched_idxs) = matches
        .iter()
        .map(|m| -> TargetResult<_> {
            let target = match m.gt_index() {
                Some(index) => {
                    let index = check_gt_index(index, gt_classes.len())?;
                    (gt_classes[index], index)
                }
                None if m.is_background() => (BACKGROUND_CLASS, 0),
                None => (IGNORE_CLASS, 0),
            };
            Ok(target)
        })
        .collect::<TargetResult<Vec<_>>>()?
        .into_iter()
        .unzip();

    Ok(ProposalTargets {
        labels,
        matched_idxs,
    })
}
