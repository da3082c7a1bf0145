//! Validation of raw per-image annotations.

use crate::{
    common::*,
    error::{TargetError, TargetResult},
};

/// Unvalidated boxes, labels and masks of one image, as read from JSON.
///
/// Boxes are `[x1, y1, x2, y2]` rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSample {
    pub candidates: Vec<Vec<f64>>,
    #[serde(default)]
    pub boxes: Vec<Vec<f64>>,
    #[serde(default)]
    pub labels: Vec<i64>,
    #[serde(default)]
    pub masks: Option<Vec<Vec<Vec<u8>>>>,
}

/// A batch of raw samples.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBatch {
    pub images: Vec<RawSample>,
}

impl RawBatch {
    pub fn open<P>(path: P) -> anyhow::Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = std::fs::read_to_string(path)?;
        let batch = serde_json::from_str(&text)?;
        Ok(batch)
    }

    pub fn to_samples(&self) -> TargetResult<Vec<Sample>> {
        self.images.iter().map(Sample::try_from).collect()
    }
}

/// Validated candidates and ground truth of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub candidates: Vec<TLBR<f64>>,
    pub ground_truth: GroundTruth,
}

impl TryFrom<&RawSample> for Sample {
    type Error = TargetError;

    fn try_from(raw: &RawSample) -> Result<Self, Self::Error> {
        let RawSample {
            candidates,
            boxes,
            labels,
            masks,
        } = raw;

        let candidates = boxes_from_rows(candidates)?;
        let boxes = boxes_from_rows(boxes)?;

        if labels.len() != boxes.len() {
            return Err(TargetError::LengthMismatch {
                what: "ground truth labels",
                expect: boxes.len(),
                found: labels.len(),
            });
        }

        // classes at or below the background class would vanish from the targets
        if let Some((index, &class)) = labels
            .iter()
            .enumerate()
            .find(|(_, class)| **class <= BACKGROUND_CLASS)
        {
            return Err(TargetError::InvalidLabel { index, class });
        }

        boxes
            .iter()
            .enumerate()
            .filter(|(_, rect)| rect.area() <= 0.0)
            .for_each(|(index, rect)| {
                warn!(
                    "ground truth box {} {:?} has zero area and will never be matched",
                    index,
                    rect.xyxy()
                );
            });

        let ground_truth = GroundTruth::from_labels(
            izip!(boxes, labels.iter().copied()).map(|(rect, class)| Label { rect, class }),
        );

        let ground_truth = match masks {
            Some(masks) => {
                let masks: Vec<_> = masks
                    .iter()
                    .map(|rows| mask_from_rows(rows))
                    .collect::<TargetResult<_>>()?;
                if masks.len() != ground_truth.len() {
                    return Err(TargetError::LengthMismatch {
                        what: "instance masks",
                        expect: ground_truth.len(),
                        found: masks.len(),
                    });
                }
                ground_truth
                    .with_masks(masks)
                    .map_err(|err| TargetError::InvalidMasks(err.to_string()))?
            }
            None => ground_truth,
        };

        Ok(Self {
            candidates,
            ground_truth,
        })
    }
}

/// Validate `[x1, y1, x2, y2]` rows into boxes.
///
/// Rows must have exactly four finite coordinates with `x1 <= x2` and
/// `y1 <= y2`. Zero width or height is accepted.
pub fn boxes_from_rows<R>(rows: &[R]) -> TargetResult<Vec<TLBR<f64>>>
where
    R: AsRef<[f64]>,
{
    rows.iter()
        .enumerate()
        .map(|(index, row)| -> TargetResult<TLBR<f64>> {
            let coords: [f64; 4] = row
                .as_ref()
                .try_into()
                .map_err(|_| TargetError::MalformedBox {
                    index,
                    len: row.as_ref().len(),
                })?;

            if !coords.iter().all(|value| value.is_finite()) {
                return Err(TargetError::InvalidBox {
                    index,
                    coords,
                    reason: "coordinates must be finite".into(),
                });
            }

            TLBR::try_from_xyxy(coords).map_err(|err| TargetError::InvalidBox {
                index,
                coords,
                reason: err.to_string(),
            })
        })
        .collect()
}

fn mask_from_rows(rows: &[Vec<u8>]) -> TargetResult<InstanceMask> {
    let height = rows.len();
    let width = rows.first().map(|row| row.len()).unwrap_or(0);

    if let Some(row) = rows.iter().find(|row| row.len() != width) {
        return Err(TargetError::LengthMismatch {
            what: "mask columns",
            expect: width,
            found: row.len(),
        });
    }

    let values: Vec<u8> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((height, width), values)
        .map_err(|err| TargetError::InvalidMasks(err.to_string()))
}
