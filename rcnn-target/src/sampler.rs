//! Balanced positive and negative subsampling of labelled candidates.

use crate::{
    common::*,
    error::{TargetError, TargetResult},
    ratio::Ratio,
};

/// A per-candidate label that can be split into positives and negatives.
pub trait SampleLabel {
    fn is_positive(&self) -> bool;
    fn is_negative(&self) -> bool;
}

impl SampleLabel for f32 {
    fn is_positive(&self) -> bool {
        *self >= 1.0
    }

    fn is_negative(&self) -> bool {
        *self == 0.0
    }
}

impl SampleLabel for i64 {
    fn is_positive(&self) -> bool {
        *self >= 1
    }

    fn is_negative(&self) -> bool {
        *self == 0
    }
}

/// Selected candidates of one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledMasks {
    pub positive: Vec<bool>,
    pub negative: Vec<bool>,
}

impl SampledMasks {
    pub fn positive_indices(&self) -> Vec<usize> {
        self.positive.iter().positions(|&selected| selected).collect()
    }

    pub fn negative_indices(&self) -> Vec<usize> {
        self.negative.iter().positions(|&selected| selected).collect()
    }

    /// Indices of all selected candidates in ascending order.
    pub fn sampled_indices(&self) -> Vec<usize> {
        izip!(&self.positive, &self.negative)
            .positions(|(&pos, &neg)| pos || neg)
            .collect()
    }

    pub fn num_positive(&self) -> usize {
        self.positive.iter().filter(|&&selected| selected).count()
    }

    pub fn num_negative(&self) -> usize {
        self.negative.iter().filter(|&&selected| selected).count()
    }
}

#[derive(Debug, Clone)]
pub struct BalancedSamplerInit {
    pub batch_size_per_image: usize,
    pub positive_fraction: f64,
}

impl BalancedSamplerInit {
    pub fn build(self) -> TargetResult<BalancedSampler> {
        let Self {
            batch_size_per_image,
            positive_fraction,
        } = self;

        if batch_size_per_image == 0 {
            return Err(TargetError::InvalidConfig(
                "batch_size_per_image must be positive".into(),
            ));
        }
        let positive_fraction = Ratio::try_from(positive_fraction).map_err(|err| {
            TargetError::InvalidConfig(format!("invalid positive_fraction: {}", err))
        })?;

        Ok(BalancedSampler {
            batch_size_per_image,
            positive_fraction,
        })
    }
}

/// Keeps at most `batch_size_per_image` candidates per image, of which at
/// most `positive_fraction` are positives. Negatives fill the remainder.
#[derive(Debug, Clone)]
pub struct BalancedSampler {
    batch_size_per_image: usize,
    positive_fraction: Ratio,
}

impl BalancedSampler {
    pub fn batch_size_per_image(&self) -> usize {
        self.batch_size_per_image
    }

    pub fn positive_fraction(&self) -> Ratio {
        self.positive_fraction
    }

    pub fn sample<L, R>(&self, labels: &[L], rng: &mut R) -> SampledMasks
    where
        L: SampleLabel,
        R: Rng + ?Sized,
    {
        let positives: Vec<usize> = labels.iter().positions(L::is_positive).collect();
        let negatives: Vec<usize> = labels.iter().positions(L::is_negative).collect();

        let num_pos = {
            let quota =
                (self.batch_size_per_image as f64 * self.positive_fraction.to_f64()) as usize;
            quota.min(positives.len())
        };
        let num_neg = (self.batch_size_per_image - num_pos).min(negatives.len());

        let mut positive = vec![false; labels.len()];
        let mut negative = vec![false; labels.len()];

        positives
            .choose_multiple(rng, num_pos)
            .for_each(|&index| positive[index] = true);
        negatives
            .choose_multiple(rng, num_neg)
            .for_each(|&index| negative[index] = true);

        trace!(
            "sampled {} positives out of {}, {} negatives out of {}",
            num_pos,
            positives.len(),
            num_neg,
            negatives.len()
        );

        SampledMasks { positive, negative }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampler(batch_size_per_image: usize, positive_fraction: f64) -> BalancedSampler {
        BalancedSamplerInit {
            batch_size_per_image,
            positive_fraction,
        }
        .build()
        .unwrap()
    }

    #[test]
    fn respect_quota() {
        let mut rng = StdRng::seed_from_u64(0);
        let labels: Vec<f32> = (0..100)
            .map(|index| match index % 4 {
                0 => 1.0,
                1 => -1.0,
                _ => 0.0,
            })
            .collect();

        let masks = sampler(16, 0.25).sample(&labels, &mut rng);
        assert_eq!(masks.num_positive(), 4);
        assert_eq!(masks.num_negative(), 12);
        assert!(masks
            .positive_indices()
            .into_iter()
            .all(|index| labels[index] == 1.0));
        assert!(masks
            .negative_indices()
            .into_iter()
            .all(|index| labels[index] == 0.0));
    }

    #[test]
    fn negatives_fill_missing_positives() {
        let mut rng = StdRng::seed_from_u64(1);
        let labels: Vec<i64> = vec![3, 0, 0, 0, 0, 0, -1, 0];

        let masks = sampler(4, 0.5).sample(&labels, &mut rng);
        assert_eq!(masks.positive_indices(), vec![0]);
        assert_eq!(masks.num_negative(), 3);
        assert!(!masks.negative[6]);
        assert_eq!(masks.sampled_indices().len(), 4);
    }

    #[test]
    fn small_images_keep_everything() {
        let mut rng = StdRng::seed_from_u64(2);
        let labels = [1.0f32, 0.0, -1.0];

        let masks = sampler(256, 0.5).sample(&labels, &mut rng);
        assert_eq!(masks.positive, vec![true, false, false]);
        assert_eq!(masks.negative, vec![false, true, false]);
        assert_eq!(masks.sampled_indices(), vec![0, 1]);
    }

    #[test]
    fn same_seed_same_sample() {
        let labels: Vec<f32> = (0..1000).map(|index| (index % 3 == 0) as u8 as f32).collect();
        let lhs = sampler(64, 0.5).sample(&labels, &mut StdRng::seed_from_u64(7));
        let rhs = sampler(64, 0.5).sample(&labels, &mut StdRng::seed_from_u64(7));
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn reject_bad_parameters() {
        assert!(BalancedSamplerInit {
            batch_size_per_image: 0,
            positive_fraction: 0.5,
        }
        .build()
        .is_err());
        assert!(BalancedSamplerInit {
            batch_size_per_image: 8,
            positive_fraction: 1.5,
        }
        .build()
        .is_err());
    }
}
