//! IoU based matching of candidates to ground truth boxes.

use crate::{
    common::*,
    error::{TargetError, TargetResult},
    iou::box_iou,
    ratio::Ratio,
};

/// The matching outcome of one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Match {
    /// Matched to the ground truth box at this index.
    Foreground(usize),
    /// The best IoU is below the low threshold.
    Background,
    /// The best IoU is between the thresholds. Excluded from the loss.
    Ignore,
}

impl Match {
    /// Integer code of [Match::Background].
    pub const BELOW_LOW_THRESHOLD: i64 = -1;
    /// Integer code of [Match::Ignore].
    pub const BETWEEN_THRESHOLDS: i64 = -2;

    /// Encode as a ground truth index or one of the negative sentinels.
    pub fn to_index(&self) -> i64 {
        match *self {
            Self::Foreground(index) => index as i64,
            Self::Background => Self::BELOW_LOW_THRESHOLD,
            Self::Ignore => Self::BETWEEN_THRESHOLDS,
        }
    }

    pub fn gt_index(&self) -> Option<usize> {
        match *self {
            Self::Foreground(index) => Some(index),
            _ => None,
        }
    }

    pub fn is_foreground(&self) -> bool {
        matches!(self, Self::Foreground(_))
    }

    pub fn is_background(&self) -> bool {
        matches!(self, Self::Background)
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignore)
    }
}

impl Display for Match {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Foreground(index) => write!(f, "{}", index),
            Self::Background => write!(f, "background"),
            Self::Ignore => write!(f, "ignore"),
        }
    }
}

/// Per-candidate matches and the IoU of each candidate's best ground truth.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutput {
    pub matches: Vec<Match>,
    pub max_ious: Vec<f64>,
}

impl MatchOutput {
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn num_foreground(&self) -> usize {
        self.matches.iter().filter(|m| m.is_foreground()).count()
    }

    pub fn num_background(&self) -> usize {
        self.matches.iter().filter(|m| m.is_background()).count()
    }

    pub fn num_ignored(&self) -> usize {
        self.matches.iter().filter(|m| m.is_ignored()).count()
    }

    /// The matches in integer encoding.
    pub fn indices(&self) -> Vec<i64> {
        self.matches.iter().map(Match::to_index).collect()
    }
}

#[derive(Debug, Clone)]
pub struct MatcherInit {
    pub high_threshold: f64,
    pub low_threshold: f64,
    pub allow_low_quality_matches: bool,
}

impl MatcherInit {
    pub fn build(self) -> TargetResult<Matcher> {
        let Self {
            high_threshold,
            low_threshold,
            allow_low_quality_matches,
        } = self;

        let invalid = |reason| TargetError::InvalidThresholds {
            high: high_threshold,
            low: low_threshold,
            reason,
        };
        let high = Ratio::try_from(high_threshold)
            .map_err(|_| invalid("thresholds must be finite and within [0, 1]"))?;
        let low = Ratio::try_from(low_threshold)
            .map_err(|_| invalid("thresholds must be finite and within [0, 1]"))?;
        if low > high {
            return Err(invalid("low threshold must not exceed high threshold"));
        }
        // zero IoU would make disjoint and zero-area pairs foreground
        if high_threshold <= 0.0 {
            return Err(invalid("high threshold must be positive"));
        }

        Ok(Matcher {
            high,
            low,
            allow_low_quality_matches,
        })
    }
}

/// Assigns each candidate to its best overlapping ground truth box, to the
/// background, or to the ignored set.
#[derive(Debug, Clone)]
pub struct Matcher {
    high: Ratio,
    low: Ratio,
    allow_low_quality_matches: bool,
}

impl Matcher {
    pub fn high_threshold(&self) -> Ratio {
        self.high
    }

    pub fn low_threshold(&self) -> Ratio {
        self.low
    }

    pub fn allow_low_quality_matches(&self) -> bool {
        self.allow_low_quality_matches
    }

    /// Match candidates against ground truth boxes.
    pub fn match_boxes(&self, candidates: &[TLBR<f64>], gt_boxes: &[TLBR<f64>]) -> MatchOutput {
        if gt_boxes.is_empty() {
            return MatchOutput {
                matches: vec![Match::Background; candidates.len()],
                max_ious: vec![0.0; candidates.len()],
            };
        }

        let quality = box_iou(candidates, gt_boxes);
        self.match_quality(quality.view())
    }

    /// Match from a precomputed quality matrix with one row per candidate
    /// and one column per ground truth box.
    pub fn match_quality(&self, quality: ArrayView2<f64>) -> MatchOutput {
        let (num_candidates, num_gt) = quality.dim();

        if num_gt == 0 {
            return MatchOutput {
                matches: vec![Match::Background; num_candidates],
                max_ious: vec![0.0; num_candidates],
            };
        }

        let high = self.high.to_f64();
        let low = self.low.to_f64();

        // best ground truth per candidate, the first one wins on ties
        let (best_gt, max_ious): (Vec<usize>, Vec<f64>) = quality
            .outer_iter()
            .map(|row| {
                row.iter().enumerate().fold(
                    (0, f64::NEG_INFINITY),
                    |(best_index, best_iou), (index, &iou)| {
                        if iou > best_iou {
                            (index, iou)
                        } else {
                            (best_index, best_iou)
                        }
                    },
                )
            })
            .unzip();

        let mut matches: Vec<Match> = izip!(&best_gt, &max_ious)
            .map(|(&gt_index, &iou)| {
                if iou >= high {
                    Match::Foreground(gt_index)
                } else if iou < low {
                    Match::Background
                } else {
                    Match::Ignore
                }
            })
            .collect();

        if self.allow_low_quality_matches {
            self.restore_low_quality_matches(quality, &best_gt, &mut matches);
        }

        trace!(
            "matched {} candidates against {} ground truth boxes",
            num_candidates,
            num_gt
        );

        MatchOutput { matches, max_ious }
    }

    /// For each ground truth box, turn the candidates with the highest IoU
    /// to that box into foreground, matched to their own best ground truth.
    fn restore_low_quality_matches(
        &self,
        quality: ArrayView2<f64>,
        best_gt: &[usize],
        matches: &mut [Match],
    ) {
        quality.columns().into_iter().for_each(|column| {
            let highest = column.iter().copied().fold(0.0, f64::max);

            // a ground truth box overlapping nothing has no candidate to restore
            if highest <= 0.0 {
                return;
            }

            column
                .iter()
                .enumerate()
                .filter(|(_, iou)| **iou == highest)
                .for_each(|(candidate, _)| {
                    matches[candidate] = Match::Foreground(best_gt[candidate]);
                });
        });
    }
}
