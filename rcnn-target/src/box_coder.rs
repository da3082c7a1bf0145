//! Box regression delta encoding.

use crate::{
    common::*,
    error::{TargetError, TargetResult},
};

/// Default clamp of the size deltas, keeping `exp()` from overflowing.
pub fn default_bbox_xform_clip() -> f64 {
    (1000.0f64 / 16.0).ln()
}

#[derive(Debug, Clone)]
pub struct BoxCoderInit {
    /// Weights of the `(dx, dy, dw, dh)` deltas.
    pub weights: [f64; 4],
    pub bbox_xform_clip: f64,
}

impl Default for BoxCoderInit {
    fn default() -> Self {
        Self {
            weights: [1.0; 4],
            bbox_xform_clip: default_bbox_xform_clip(),
        }
    }
}

impl BoxCoderInit {
    pub fn build(self) -> TargetResult<BoxCoder> {
        let Self {
            weights,
            bbox_xform_clip,
        } = self;

        if !weights.iter().all(|&weight| weight.is_finite() && weight > 0.0) {
            return Err(TargetError::InvalidConfig(format!(
                "box coder weights must be finite and positive, but get {:?}",
                weights
            )));
        }
        if !(bbox_xform_clip.is_finite() && bbox_xform_clip > 0.0) {
            return Err(TargetError::InvalidConfig(format!(
                "bbox_xform_clip must be finite and positive, but get {}",
                bbox_xform_clip
            )));
        }

        Ok(BoxCoder {
            weights,
            bbox_xform_clip,
        })
    }
}

/// Encodes a box relative to a reference box as
/// `(wx·dx/w, wy·dy/h, ww·ln(w'/w), wh·ln(h'/h))`.
#[derive(Debug, Clone)]
pub struct BoxCoder {
    weights: [f64; 4],
    bbox_xform_clip: f64,
}

impl BoxCoder {
    /// Encode `target` against `proposal`. Returns `None` if either box has
    /// zero width or height.
    pub fn encode_one(&self, target: &TLBR<f64>, proposal: &TLBR<f64>) -> Option<[f64; 4]> {
        let [wx, wy, ww, wh] = self.weights;
        let [pcy, pcx, ph, pw] = proposal.cycxhw();
        let [gcy, gcx, gh, gw] = target.cycxhw();

        if !(ph > 0.0 && pw > 0.0 && gh > 0.0 && gw > 0.0) {
            return None;
        }

        let dx = wx * (gcx - pcx) / pw;
        let dy = wy * (gcy - pcy) / ph;
        let dw = ww * (gw / pw).ln();
        let dh = wh * (gh / ph).ln();
        Some([dx, dy, dw, dh])
    }

    /// Invert [BoxCoder::encode_one].
    pub fn decode_one(&self, deltas: [f64; 4], proposal: &TLBR<f64>) -> Option<TLBR<f64>> {
        let [wx, wy, ww, wh] = self.weights;
        let [pcy, pcx, ph, pw] = proposal.cycxhw();
        let [dx, dy, dw, dh] = deltas;

        let dw = (dw / ww).min(self.bbox_xform_clip);
        let dh = (dh / wh).min(self.bbox_xform_clip);

        let cx = dx / wx * pw + pcx;
        let cy = dy / wy * ph + pcy;
        let w = dw.exp() * pw;
        let h = dh.exp() * ph;

        TLBR::try_from_cycxhw([cy, cx, h, w]).ok()
    }

    /// Encode matched targets against their proposals pairwise.
    pub fn encode(
        &self,
        targets: &[TLBR<f64>],
        proposals: &[TLBR<f64>],
    ) -> TargetResult<Vec<[f64; 4]>> {
        if targets.len() != proposals.len() {
            return Err(TargetError::LengthMismatch {
                what: "regression targets",
                expect: proposals.len(),
                found: targets.len(),
            });
        }

        izip!(targets, proposals)
            .enumerate()
            .map(|(index, (target, proposal))| {
                self.encode_one(target, proposal)
                    .ok_or(TargetError::DegenerateBox { index })
            })
            .collect()
    }

    pub fn decode(
        &self,
        deltas: &[[f64; 4]],
        proposals: &[TLBR<f64>],
    ) -> TargetResult<Vec<TLBR<f64>>> {
        if deltas.len() != proposals.len() {
            return Err(TargetError::LengthMismatch {
                what: "box deltas",
                expect: proposals.len(),
                found: deltas.len(),
            });
        }

        izip!(deltas, proposals)
            .enumerate()
            .map(|(index, (&deltas, proposal))| {
                self.decode_one(deltas, proposal)
                    .ok_or(TargetError::DegenerateBox { index })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes_from_rows;
    use approx::assert_abs_diff_eq;

    fn coder(weights: [f64; 4]) -> BoxCoder {
        BoxCoderInit {
            weights,
            ..Default::default()
        }
        .build()
        .unwrap()
    }

    #[test]
    fn identical_boxes_encode_to_zero() {
        let boxes = boxes_from_rows(&[[1.0, 2.0, 11.0, 22.0]]).unwrap();
        let deltas = coder([10.0, 10.0, 5.0, 5.0])
            .encode(&boxes, &boxes)
            .unwrap();
        assert_eq!(deltas, vec![[0.0; 4]]);
    }

    #[test]
    fn encode_known_values() {
        let target = boxes_from_rows(&[[5.0, 0.0, 25.0, 40.0]]).unwrap();
        let proposal = boxes_from_rows(&[[0.0, 0.0, 10.0, 20.0]]).unwrap();
        let [dx, dy, dw, dh] = coder([1.0; 4]).encode(&target, &proposal).unwrap()[0];
        assert_abs_diff_eq!(dx, 1.0);
        assert_abs_diff_eq!(dy, 0.5);
        assert_abs_diff_eq!(dw, 2f64.ln());
        assert_abs_diff_eq!(dh, 2f64.ln());
    }

    #[test]
    fn decode_inverts_encode() {
        let coder = coder([10.0, 10.0, 5.0, 5.0]);
        let targets = boxes_from_rows(&[[3.0, 4.0, 30.0, 18.0], [50.0, 60.0, 52.0, 90.0]]).unwrap();
        let proposals =
            boxes_from_rows(&[[0.0, 0.0, 32.0, 16.0], [48.0, 64.0, 56.0, 80.0]]).unwrap();

        let deltas = coder.encode(&targets, &proposals).unwrap();
        let decoded = coder.decode(&deltas, &proposals).unwrap();

        izip!(&decoded, &targets).for_each(|(decoded, target)| {
            izip!(decoded.xyxy(), target.xyxy()).for_each(|(lhs, rhs)| {
                assert_abs_diff_eq!(lhs, rhs, epsilon = 1e-9);
            });
        });
    }

    #[test]
    fn decode_clamps_size_deltas() {
        let coder = coder([1.0; 4]);
        let proposal = boxes_from_rows(&[[0.0, 0.0, 1.0, 1.0]]).unwrap();
        let decoded = coder.decode_one([0.0, 0.0, 100.0, 100.0], &proposal[0]).unwrap();
        assert_abs_diff_eq!(decoded.w(), 1000.0 / 16.0, epsilon = 1e-9);
    }

    #[test]
    fn degenerate_proposal_is_rejected() {
        let target = boxes_from_rows(&[[0.0, 0.0, 1.0, 1.0]]).unwrap();
        let proposal = boxes_from_rows(&[[0.0, 0.0, 0.0, 1.0]]).unwrap();
        assert!(matches!(
            coder([1.0; 4]).encode(&target, &proposal),
            Err(TargetError::DegenerateBox { index: 0 })
        ));
    }

    #[test]
    fn reject_bad_weights() {
        assert!(BoxCoderInit {
            weights: [1.0, 0.0, 1.0, 1.0],
            ..Default::default()
        }
        .build()
        .is_err());
    }
}
