//! Ground truth annotations of a single image.

use anyhow::{ensure, Result};
use bbox::{Rect, TLBR};
use ndarray::Array2;

/// The class reserved for background.
pub const BACKGROUND_CLASS: i64 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label<R, C>
where
    R: Rect,
{
    pub rect: R,
    pub class: C,
}

/// Per-instance binary mask in image coordinates. Non-zero pixels belong to the instance.
pub type InstanceMask = Array2<u8>;

/// The annotated instances of one image.
///
/// Boxes and classes are kept in parallel sequences so that they can be
/// handed to the matcher without copying. Masks are optional, but when
/// present there is exactly one per instance and all share one shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroundTruth {
    boxes: Vec<TLBR<f64>>,
    classes: Vec<i64>,
    masks: Option<Vec<InstanceMask>>,
}

impl GroundTruth {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_labels<I>(labels: I) -> Self
    where
        I: IntoIterator<Item = Label<TLBR<f64>, i64>>,
    {
        let (boxes, classes) = labels
            .into_iter()
            .map(|Label { rect, class }| (rect, class))
            .unzip();

        Self {
            boxes,
            classes,
            masks: None,
        }
    }

    /// Attach instance masks, one per box.
    pub fn with_masks(self, masks: Vec<InstanceMask>) -> Result<Self> {
        ensure!(
            masks.len() == self.boxes.len(),
            "expect {} instance masks, but get {}",
            self.boxes.len(),
            masks.len()
        );
        if let Some(first) = masks.first() {
            let shape = first.dim();
            ensure!(
                masks.iter().all(|mask| mask.dim() == shape),
                "instance masks must share the same shape"
            );
        }

        Ok(Self {
            masks: Some(masks),
            ..self
        })
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn boxes(&self) -> &[TLBR<f64>] {
        &self.boxes
    }

    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    pub fn masks(&self) -> Option<&[InstanceMask]> {
        self.masks.as_deref()
    }

    pub fn get(&self, index: usize) -> Option<Label<TLBR<f64>, i64>> {
        Some(Label {
            rect: self.boxes.get(index)?.clone(),
            class: *self.classes.get(index)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(xyxy: [f64; 4], class: i64) -> Label<TLBR<f64>, i64> {
        Label {
            rect: TLBR::try_from_xyxy(xyxy).unwrap(),
            class,
        }
    }

    #[test]
    fn labels_stay_parallel() {
        let gt = GroundTruth::from_labels([
            label([0.0, 0.0, 4.0, 4.0], 3),
            label([1.0, 1.0, 2.0, 2.0], 7),
        ]);
        assert_eq!(gt.len(), 2);
        assert_eq!(gt.classes(), &[3, 7]);
        assert_eq!(gt.get(1), Some(label([1.0, 1.0, 2.0, 2.0], 7)));
        assert_eq!(gt.get(2), None);
        assert!(gt.masks().is_none());
    }

    #[test]
    fn mask_count_must_match() {
        let gt = GroundTruth::from_labels([label([0.0, 0.0, 4.0, 4.0], 1)]);
        assert!(gt.clone().with_masks(vec![]).is_err());
        assert!(gt
            .clone()
            .with_masks(vec![Array2::zeros((4, 4)), Array2::zeros((4, 4))])
            .is_err());

        let gt = gt.with_masks(vec![Array2::ones((4, 4))]).unwrap();
        assert_eq!(gt.masks().map(|masks| masks.len()), Some(1));
    }

    #[test]
    fn empty_ground_truth() {
        let gt = GroundTruth::empty();
        assert!(gt.is_empty());
        assert!(gt.boxes().is_empty());
    }
}
