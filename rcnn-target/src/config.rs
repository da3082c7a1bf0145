//! Target assignment configuration format.

use crate::{
    box_coder::{default_bbox_xform_clip, BoxCoderInit},
    common::*,
    matcher::MatcherInit,
    ratio::Ratio,
    sampler::BalancedSamplerInit,
    stage::{RoiTargetAssignerInit, RpnTargetAssignerInit},
};

pub use execution::*;
pub use roi_heads::*;
pub use rpn::*;

/// The main configuration. Every section falls back to its defaults when
/// omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rpn: RpnConfig,
    pub roi_heads: RoiHeadsConfig,
    pub execution: ExecutionConfig,
}

impl Config {
    pub fn open<P>(path: P) -> anyhow::Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = std::fs::read_to_string(path)?;
        let config = json5::from_str(&text)?;
        Ok(config)
    }
}

fn matcher_init(
    fg_iou_thresh: Ratio,
    bg_iou_thresh: Ratio,
    allow_low_quality_matches: bool,
) -> MatcherInit {
    MatcherInit {
        high_threshold: fg_iou_thresh.to_f64(),
        low_threshold: bg_iou_thresh.to_f64(),
        allow_low_quality_matches,
    }
}

fn box_coder_init(weights: &[R64; 4]) -> BoxCoderInit {
    let [wx, wy, ww, wh] = *weights;
    BoxCoderInit {
        weights: [wx.raw(), wy.raw(), ww.raw(), wh.raw()],
        bbox_xform_clip: default_bbox_xform_clip(),
    }
}

mod rpn {
    use super::*;

    /// Region proposal stage options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(default)]
    pub struct RpnConfig {
        /// Anchors with IoU at least this value are foreground.
        pub fg_iou_thresh: Ratio,
        /// Anchors with IoU below this value are background.
        pub bg_iou_thresh: Ratio,
        pub allow_low_quality_matches: bool,
        pub batch_size_per_image: NonZeroUsize,
        pub positive_fraction: Ratio,
        pub box_coder_weights: [R64; 4],
    }

    impl Default for RpnConfig {
        fn default() -> Self {
            Self {
                fg_iou_thresh: Ratio::from_literal(0.7),
                bg_iou_thresh: Ratio::from_literal(0.3),
                allow_low_quality_matches: true,
                batch_size_per_image: NonZeroUsize::new(256).unwrap(),
                positive_fraction: Ratio::from_literal(0.5),
                box_coder_weights: [r64(1.0); 4],
            }
        }
    }

    impl RpnConfig {
        pub fn to_init(&self) -> RpnTargetAssignerInit {
            RpnTargetAssignerInit {
                matcher: matcher_init(
                    self.fg_iou_thresh,
                    self.bg_iou_thresh,
                    self.allow_low_quality_matches,
                ),
                sampler: BalancedSamplerInit {
                    batch_size_per_image: self.batch_size_per_image.get(),
                    positive_fraction: self.positive_fraction.to_f64(),
                },
                box_coder: box_coder_init(&self.box_coder_weights),
            }
        }
    }
}

mod roi_heads {
    use super::*;

    /// Box and mask head options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(default)]
    pub struct RoiHeadsConfig {
        pub fg_iou_thresh: Ratio,
        pub bg_iou_thresh: Ratio,
        pub batch_size_per_image: NonZeroUsize,
        pub positive_fraction: Ratio,
        pub box_coder_weights: [R64; 4],
        /// Append the ground truth boxes to the proposals.
        pub add_gt_proposals: bool,
        /// Side length of the mask targets.
        pub mask_resolution: NonZeroUsize,
    }

    impl Default for RoiHeadsConfig {
        fn default() -> Self {
            Self {
                fg_iou_thresh: Ratio::from_literal(0.5),
                bg_iou_thresh: Ratio::from_literal(0.5),
                batch_size_per_image: NonZeroUsize::new(512).unwrap(),
                positive_fraction: Ratio::from_literal(0.25),
                box_coder_weights: [r64(10.0), r64(10.0), r64(5.0), r64(5.0)],
                add_gt_proposals: true,
                mask_resolution: NonZeroUsize::new(28).unwrap(),
            }
        }
    }

    impl RoiHeadsConfig {
        pub fn to_init(&self) -> RoiTargetAssignerInit {
            RoiTargetAssignerInit {
                matcher: matcher_init(self.fg_iou_thresh, self.bg_iou_thresh, false),
                sampler: BalancedSamplerInit {
                    batch_size_per_image: self.batch_size_per_image.get(),
                    positive_fraction: self.positive_fraction.to_f64(),
                },
                box_coder: box_coder_init(&self.box_coder_weights),
                add_gt_proposals: self.add_gt_proposals,
                mask_resolution: self.mask_resolution.get(),
            }
        }
    }
}

mod execution {
    use super::*;

    /// Batch execution options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(default)]
    pub struct ExecutionConfig {
        /// Process the images of a batch on the rayon thread pool.
        pub parallel: bool,
        /// Base seed of the per-image sampling RNG.
        pub seed: u64,
    }

    impl Default for ExecutionConfig {
        fn default() -> Self {
            Self {
                parallel: true,
                seed: 0,
            }
        }
    }
}
