//! Per-stage target assignment of a two-stage detector.

use crate::{
    assign::{assign_anchor_targets, assign_proposal_targets, AnchorTargets, ProposalTargets},
    box_coder::{BoxCoder, BoxCoderInit},
    common::*,
    config::ExecutionConfig,
    error::{TargetError, TargetResult},
    input::Sample,
    mask::project_masks_on_boxes,
    matcher::{MatchOutput, Matcher, MatcherInit},
    sampler::{BalancedSampler, BalancedSamplerInit, SampledMasks},
};

/// Apply `f` to every sample of a batch and return the results in input order.
///
/// Every sample gets its own RNG seeded from the base seed and its position,
/// so the outcome does not depend on whether the batch runs in parallel.
pub fn map_batch<T, F>(
    samples: &[Sample],
    execution: &ExecutionConfig,
    f: F,
) -> TargetResult<Vec<T>>
where
    T: Send,
    F: Fn(&Sample, &mut StdRng) -> TargetResult<T> + Sync,
{
    let _span = trace_span!("map_batch", batch_size = samples.len()).entered();

    let run = |(index, sample): (usize, &Sample)| {
        let _span = trace_span!("assign_image", index).entered();
        let mut rng = StdRng::seed_from_u64(execution.seed.wrapping_add(index as u64));
        f(sample, &mut rng)
    };

    if execution.parallel {
        samples.par_iter().enumerate().map(run).collect()
    } else {
        samples.iter().enumerate().map(run).collect()
    }
}

fn encode_foreground(
    box_coder: &BoxCoder,
    is_foreground: impl Iterator<Item = bool>,
    targets: &[TLBR<f64>],
    proposals: &[TLBR<f64>],
) -> TargetResult<Vec<[f64; 4]>> {
    izip!(is_foreground, targets, proposals)
        .enumerate()
        .map(|(index, (is_foreground, target, proposal))| {
            if is_foreground {
                box_coder
                    .encode_one(target, proposal)
                    .ok_or(TargetError::DegenerateBox { index })
            } else {
                Ok([0.0; 4])
            }
        })
        .collect()
}

mod rpn {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct RpnTargetAssignerInit {
        pub matcher: MatcherInit,
        pub sampler: BalancedSamplerInit,
        pub box_coder: BoxCoderInit,
    }

    impl Default for RpnTargetAssignerInit {
        fn default() -> Self {
            Self {
                matcher: MatcherInit {
                    high_threshold: 0.7,
                    low_threshold: 0.3,
                    allow_low_quality_matches: true,
                },
                sampler: BalancedSamplerInit {
                    batch_size_per_image: 256,
                    positive_fraction: 0.5,
                },
                box_coder: BoxCoderInit::default(),
            }
        }
    }

    impl RpnTargetAssignerInit {
        pub fn build(self) -> TargetResult<RpnTargetAssigner> {
            let Self {
                matcher,
                sampler,
                box_coder,
            } = self;

            Ok(RpnTargetAssigner {
                matcher: matcher.build()?,
                sampler: sampler.build()?,
                box_coder: box_coder.build()?,
            })
        }
    }

    /// Targets of the region proposal stage for one image. All vectors have
    /// one entry per anchor.
    #[derive(Debug, Clone, PartialEq)]
    pub struct RpnTargets {
        pub match_output: MatchOutput,
        pub labels: Vec<f32>,
        pub matched_gt_boxes: Vec<TLBR<f64>>,
        /// Encoded deltas of foreground anchors, zero elsewhere.
        pub regression_targets: Vec<[f64; 4]>,
        /// Anchors selected for the objectness loss.
        pub sampled: SampledMasks,
    }

    #[derive(Debug, Clone)]
    pub struct RpnTargetAssigner {
        matcher: Matcher,
        sampler: BalancedSampler,
        box_coder: BoxCoder,
    }

    impl RpnTargetAssigner {
        pub fn matcher(&self) -> &Matcher {
            &self.matcher
        }

        pub fn assign<R>(
            &self,
            anchors: &[TLBR<f64>],
            ground_truth: &GroundTruth,
            rng: &mut R,
        ) -> TargetResult<RpnTargets>
        where
            R: Rng + ?Sized,
        {
            let match_output = self.matcher.match_boxes(anchors, ground_truth.boxes());
            let AnchorTargets {
                labels,
                matched_gt_boxes,
            } = assign_anchor_targets(&match_output.matches, ground_truth.boxes())?;

            let regression_targets = encode_foreground(
                &self.box_coder,
                match_output.matches.iter().map(|m| m.is_foreground()),
                &matched_gt_boxes,
                anchors,
            )?;
            let sampled = self.sampler.sample(&labels, rng);

            debug!(
                "{} anchors: {} foreground, {} background, {} ignored, {} sampled",
                anchors.len(),
                match_output.num_foreground(),
                match_output.num_background(),
                match_output.num_ignored(),
                sampled.num_positive() + sampled.num_negative()
            );

            Ok(RpnTargets {
                match_output,
                labels,
                matched_gt_boxes,
                regression_targets,
                sampled,
            })
        }

        pub fn assign_batch(
            &self,
            samples: &[Sample],
            execution: &ExecutionConfig,
        ) -> TargetResult<Vec<RpnTargets>> {
            map_batch(samples, execution, |sample, rng| {
                self.assign(&sample.candidates, &sample.ground_truth, rng)
            })
        }
    }
}
pub use rpn::*;

mod roi {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct RoiTargetAssignerInit {
        pub matcher: MatcherInit,
        pub sampler: BalancedSamplerInit,
        pub box_coder: BoxCoderInit,
        /// Append the ground truth boxes to the proposals before matching.
        pub add_gt_proposals: bool,
        pub mask_resolution: usize,
    }

    impl Default for RoiTargetAssignerInit {
        fn default() -> Self {
            Self {
                matcher: MatcherInit {
                    high_threshold: 0.5,
                    low_threshold: 0.5,
                    allow_low_quality_matches: false,
                },
                sampler: BalancedSamplerInit {
                    batch_size_per_image: 512,
                    positive_fraction: 0.25,
                },
                box_coder: BoxCoderInit {
                    weights: [10.0, 10.0, 5.0, 5.0],
                    ..Default::default()
                },
                add_gt_proposals: true,
                mask_resolution: 28,
            }
        }
    }

    impl RoiTargetAssignerInit {
        pub fn build(self) -> TargetResult<RoiTargetAssigner> {
            let Self {
                matcher,
                sampler,
                box_coder,
                add_gt_proposals,
                mask_resolution,
            } = self;

            if mask_resolution == 0 {
                return Err(TargetError::InvalidConfig(
                    "mask_resolution must be positive".into(),
                ));
            }

            Ok(RoiTargetAssigner {
                matcher: matcher.build()?,
                sampler: sampler.build()?,
                box_coder: box_coder.build()?,
                add_gt_proposals,
                mask_resolution,
            })
        }
    }

    /// Targets of the box and mask heads for one image. All vectors have
    /// one entry per sampled proposal, in ascending proposal order.
    #[derive(Debug, Clone, PartialEq)]
    pub struct RoiTargets {
        pub proposals: Vec<TLBR<f64>>,
        pub labels: Vec<i64>,
        pub matched_idxs: Vec<usize>,
        /// Encoded deltas of positive proposals, zero elsewhere.
        pub regression_targets: Vec<[f64; 4]>,
        /// One mask per positive proposal when the ground truth carries masks.
        pub mask_targets: Option<Vec<Array2<f32>>>,
    }

    impl RoiTargets {
        /// Positions of positive proposals within the sampled set.
        pub fn positive_positions(&self) -> Vec<usize> {
            self.labels.iter().positions(|&label| label > 0).collect()
        }
    }

    #[derive(Debug, Clone)]
    pub struct RoiTargetAssigner {
        matcher: Matcher,
        sampler: BalancedSampler,
        box_coder: BoxCoder,
        add_gt_proposals: bool,
        mask_resolution: usize,
    }

    impl RoiTargetAssigner {
        pub fn matcher(&self) -> &Matcher {
            &self.matcher
        }

        pub fn assign<R>(
            &self,
            proposals: &[TLBR<f64>],
            ground_truth: &GroundTruth,
            rng: &mut R,
        ) -> TargetResult<RoiTargets>
        where
            R: Rng + ?Sized,
        {
            let gt_boxes = ground_truth.boxes();
            let proposals: Vec<TLBR<f64>> = if self.add_gt_proposals {
                proposals.iter().chain(gt_boxes).cloned().collect()
            } else {
                proposals.to_vec()
            };

            let match_output = self.matcher.match_boxes(&proposals, gt_boxes);
            let ProposalTargets {
                labels,
                matched_idxs,
            } = assign_proposal_targets(&match_output.matches, ground_truth.classes())?;

            let sampled = self.sampler.sample(&labels, rng);
            let indices = sampled.sampled_indices();

            let proposals: Vec<_> = indices.iter().map(|&index| proposals[index].clone()).collect();
            let labels: Vec<_> = indices.iter().map(|&index| labels[index]).collect();
            let matched_idxs: Vec<_> = indices.iter().map(|&index| matched_idxs[index]).collect();

            let matched_gt_boxes: Vec<_> = matched_idxs
                .iter()
                .map(|&index| gt_boxes.get(index).cloned().unwrap_or_else(TLBR::zero))
                .collect();
            let regression_targets = encode_foreground(
                &self.box_coder,
                labels.iter().map(|&label| label > 0),
                &matched_gt_boxes,
                &proposals,
            )?;

            debug!(
                "{} proposals: {} sampled, {} positive",
                match_output.len(),
                proposals.len(),
                sampled.num_positive()
            );

            let mut targets = RoiTargets {
                proposals,
                labels,
                matched_idxs,
                regression_targets,
                mask_targets: None,
            };

            if ground_truth.masks().is_some() {
                targets.mask_targets = Some(self.mask_targets(&targets, ground_truth)?);
            }

            Ok(targets)
        }

        /// Project the matched instance masks of the positive proposals.
        pub fn mask_targets(
            &self,
            targets: &RoiTargets,
            ground_truth: &GroundTruth,
        ) -> TargetResult<Vec<Array2<f32>>> {
            let masks = ground_truth.masks().ok_or(TargetError::MissingMasks)?;
            let positions = targets.positive_positions();
            let proposals: Vec<_> = positions
                .iter()
                .map(|&pos| targets.proposals[pos].clone())
                .collect();
            let matched_idxs: Vec<_> = positions
                .iter()
                .map(|&pos| targets.matched_idxs[pos])
                .collect();

            project_masks_on_boxes(masks, &proposals, &matched_idxs, self.mask_resolution)
        }

        pub fn assign_batch(
            &self,
            samples: &[Sample],
            execution: &ExecutionConfig,
        ) -> TargetResult<Vec<RoiTargets>> {
            map_batch(samples, execution, |sample, rng| {
                self.assign(&sample.candidates, &sample.ground_truth, rng)
            })
        }
    }
}
pub use roi::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{boxes_from_rows, Match};

    fn ground_truth(rows: &[[f64; 4]], classes: &[i64]) -> GroundTruth {
        let boxes = boxes_from_rows(rows).unwrap();
        GroundTruth::from_labels(
            izip!(boxes, classes.iter().copied()).map(|(rect, class)| Label { rect, class }),
        )
    }

    fn anchor_grid(size: f64, step: f64, extent: f64) -> Vec<TLBR<f64>> {
        let steps = (extent / step) as usize;
        (0..steps)
            .cartesian_product(0..steps)
            .map(|(row, col)| {
                let y = row as f64 * step;
                let x = col as f64 * step;
                TLBR::try_from_xyxy([x, y, x + size, y + size]).unwrap()
            })
            .collect()
    }

    #[test]
    fn rpn_targets_have_one_entry_per_anchor() {
        let assigner = RpnTargetAssignerInit::default().build().unwrap();
        let anchors = anchor_grid(16.0, 8.0, 64.0);
        let gt = ground_truth(&[[8.0, 8.0, 24.0, 24.0], [40.0, 40.0, 60.0, 62.0]], &[1, 2]);

        let targets = assigner
            .assign(&anchors, &gt, &mut StdRng::seed_from_u64(0))
            .unwrap();
        assert_eq!(targets.labels.len(), anchors.len());
        assert_eq!(targets.matched_gt_boxes.len(), anchors.len());
        assert_eq!(targets.regression_targets.len(), anchors.len());

        // the anchor at (8, 8) coincides with the first ground truth box
        let exact = anchors
            .iter()
            .position(|anchor| anchor.xyxy() == [8.0, 8.0, 24.0, 24.0])
            .unwrap();
        assert_eq!(targets.match_output.matches[exact], Match::Foreground(0));
        assert_eq!(targets.labels[exact], 1.0);
        assert_eq!(targets.regression_targets[exact], [0.0; 4]);

        // low quality matching guarantees the second box a foreground anchor
        assert!(targets
            .match_output
            .matches
            .iter()
            .any(|m| *m == Match::Foreground(1)));
    }

    #[test]
    fn rpn_without_ground_truth() {
        let assigner = RpnTargetAssignerInit::default().build().unwrap();
        let anchors = anchor_grid(16.0, 16.0, 64.0);

        let targets = assigner
            .assign(&anchors, &GroundTruth::empty(), &mut StdRng::seed_from_u64(0))
            .unwrap();
        assert_eq!(targets.labels.iter().sum::<f32>(), 0.0);
        assert!(targets
            .matched_gt_boxes
            .iter()
            .all(|rect| *rect == TLBR::zero()));
        assert_eq!(targets.sampled.num_positive(), 0);
        assert_eq!(targets.sampled.num_negative(), anchors.len());
    }

    #[test]
    fn roi_appends_ground_truth_proposals() {
        let assigner = RoiTargetAssignerInit::default().build().unwrap();
        let proposals = boxes_from_rows(&[[100.0, 100.0, 120.0, 120.0]]).unwrap();
        let gt = ground_truth(&[[0.0, 0.0, 10.0, 10.0]], &[3]);

        let targets = assigner
            .assign(&proposals, &gt, &mut StdRng::seed_from_u64(0))
            .unwrap();
        assert_eq!(targets.proposals.len(), 2);
        assert_eq!(targets.labels, vec![0, 3]);
        assert_eq!(targets.matched_idxs, vec![0, 0]);
        assert_eq!(targets.regression_targets, vec![[0.0; 4]; 2]);
        assert_eq!(targets.positive_positions(), vec![1]);
        assert!(targets.mask_targets.is_none());
    }

    #[test]
    fn roi_mask_targets() {
        let assigner = RoiTargetAssignerInit {
            mask_resolution: 4,
            ..Default::default()
        }
        .build()
        .unwrap();
        let proposals = boxes_from_rows(&[[0.0, 0.0, 8.0, 8.0], [30.0, 30.0, 32.0, 32.0]]).unwrap();
        let gt = ground_truth(&[[0.0, 0.0, 8.0, 8.0]], &[1])
            .with_masks(vec![Array2::ones((32, 32))])
            .unwrap();

        let targets = assigner
            .assign(&proposals, &gt, &mut StdRng::seed_from_u64(0))
            .unwrap();
        let masks = targets.mask_targets.as_ref().unwrap();
        assert_eq!(masks.len(), targets.positive_positions().len());
        assert_eq!(masks.len(), 2);
        assert!(masks.iter().all(|mask| mask.dim() == (4, 4)));

        let bare = ground_truth(&[[0.0, 0.0, 8.0, 8.0]], &[1]);
        assert!(matches!(
            assigner.mask_targets(&targets, &bare),
            Err(TargetError::MissingMasks)
        ));
    }

    #[test]
    fn parallel_and_sequential_batches_agree() {
        let assigner = RpnTargetAssignerInit {
            sampler: BalancedSamplerInit {
                batch_size_per_image: 16,
                positive_fraction: 0.5,
            },
            ..Default::default()
        }
        .build()
        .unwrap();

        let samples: Vec<_> = (0..6)
            .map(|index| {
                let offset = index as f64 * 4.0;
                Sample {
                    candidates: anchor_grid(16.0, 4.0, 64.0),
                    ground_truth: ground_truth(
                        &[[offset, offset, offset + 20.0, offset + 20.0]],
                        &[1],
                    ),
                }
            })
            .collect();

        let parallel = assigner
            .assign_batch(
                &samples,
                &ExecutionConfig {
                    parallel: true,
                    seed: 42,
                },
            )
            .unwrap();
        let sequential = assigner
            .assign_batch(
                &samples,
                &ExecutionConfig {
                    parallel: false,
                    seed: 42,
                },
            )
            .unwrap();

        assert_eq!(parallel.len(), samples.len());
        assert_eq!(parallel, sequential);
    }
}
