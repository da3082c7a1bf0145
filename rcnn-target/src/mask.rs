//! Mask head targets.

use crate::{
    common::*,
    error::{TargetError, TargetResult},
};

/// Crop the matched instance mask of each proposal into a
/// `resolution × resolution` target.
///
/// Each output cell averages `ceil(bin_h) × ceil(bin_w)` bilinear samples
/// of the binary mask spread evenly over the cell, with pixel `i` centred at
/// coordinate `i`. Values lie within `[0, 1]`. Samples falling more than one
/// pixel outside the mask read as zero.
pub fn project_masks_on_boxes(
    masks: &[InstanceMask],
    proposals: &[TLBR<f64>],
    matched_idxs: &[usize],
    resolution: usize,
) -> TargetResult<Vec<Array2<f32>>> {
    if proposals.len() != matched_idxs.len() {
        return Err(TargetError::LengthMismatch {
            what: "matched indices",
            expect: proposals.len(),
            found: matched_idxs.len(),
        });
    }
    if resolution == 0 {
        return Err(TargetError::InvalidConfig(
            "mask resolution must be positive".into(),
        ));
    }

    izip!(proposals, matched_idxs)
        .map(|(proposal, &gt_index)| -> TargetResult<_> {
            let mask = masks
                .get(gt_index)
                .ok_or(TargetError::MatchIndexOutOfRange {
                    index: gt_index,
                    len: masks.len(),
                })?;
            Ok(crop_and_resize(mask, proposal, resolution))
        })
        .collect()
}

fn crop_and_resize(mask: &InstanceMask, proposal: &TLBR<f64>, resolution: usize) -> Array2<f32> {
    let [t, l, _b, _r] = proposal.tlbr();
    // boxes thinner than a pixel are widened to one pixel
    let [h, w] = proposal.hw();
    let bin_h = h.max(1.0) / resolution as f64;
    let bin_w = w.max(1.0) / resolution as f64;

    // sampling points per bin, adapted to the bin size
    let grid_h = bin_h.ceil().max(1.0) as usize;
    let grid_w = bin_w.ceil().max(1.0) as usize;
    let count = (grid_h * grid_w) as f64;

    Array2::from_shape_fn((resolution, resolution), |(row, col)| {
        let sum: f64 = (0..grid_h)
            .cartesian_product(0..grid_w)
            .map(|(iy, ix)| {
                let y = t + row as f64 * bin_h + (iy as f64 + 0.5) * bin_h / grid_h as f64;
                let x = l + col as f64 * bin_w + (ix as f64 + 0.5) * bin_w / grid_w as f64;
                bilinear_sample(mask, y, x)
            })
            .sum();
        (sum / count) as f32
    })
}

fn bilinear_sample(mask: &InstanceMask, y: f64, x: f64) -> f64 {
    let (height, width) = mask.dim();
    if height == 0 || width == 0 {
        return 0.0;
    }
    if y < -1.0 || y > height as f64 || x < -1.0 || x > width as f64 {
        return 0.0;
    }

    let (y_low, y_high, ly) = interpolation_bounds(y, height);
    let (x_low, x_high, lx) = interpolation_bounds(x, width);
    let hy = 1.0 - ly;
    let hx = 1.0 - lx;

    let value = |row: usize, col: usize| if mask[(row, col)] != 0 { 1.0 } else { 0.0 };

    hy * hx * value(y_low, x_low)
        + hy * lx * value(y_low, x_high)
        + ly * hx * value(y_high, x_low)
        + ly * lx * value(y_high, x_high)
}

/// Returns the lower and upper neighbor indices and the fractional offset.
fn interpolation_bounds(coord: f64, len: usize) -> (usize, usize, f64) {
    let coord = coord.max(0.0);
    let low = coord.floor() as usize;

    if low >= len - 1 {
        (len - 1, len - 1, 0.0)
    } else {
        (low, low + 1, coord - low as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes_from_rows;
    use approx::assert_abs_diff_eq;

    #[test]
    fn full_mask_projects_to_ones() {
        let masks = vec![Array2::ones((20, 20))];
        let proposals = boxes_from_rows(&[[2.0, 2.0, 12.0, 12.0]]).unwrap();
        let targets = project_masks_on_boxes(&masks, &proposals, &[0], 4).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].dim(), (4, 4));
        assert!(targets[0].iter().all(|&value| (value - 1.0).abs() < 1e-6));
    }

    #[test]
    fn left_half_mask() {
        // the instance covers columns 0..10 of a 20x20 image
        let mut mask = Array2::zeros((20, 20));
        mask.slice_mut(ndarray::s![.., ..10]).fill(1u8);
        let proposals = boxes_from_rows(&[[0.0, 0.0, 20.0, 20.0]]).unwrap();

        let targets = project_masks_on_boxes(&[mask], &proposals, &[0], 2).unwrap();
        let target = &targets[0];
        // ten samples per bin at x = 0.5 .. 9.5, the last one straddles the edge
        assert_abs_diff_eq!(target[(0, 0)], 0.95, epsilon = 1e-6);
        assert_abs_diff_eq!(target[(1, 0)], 0.95, epsilon = 1e-6);
        assert_abs_diff_eq!(target[(0, 1)], 0.0);
        assert_abs_diff_eq!(target[(1, 1)], 0.0);
    }

    #[test]
    fn bins_average_several_samples() {
        // a single foreground column at x = 1 inside a four pixel wide bin
        let mut mask = Array2::zeros((4, 8));
        mask.column_mut(1).fill(1u8);
        let proposals = boxes_from_rows(&[[0.0, 0.0, 8.0, 4.0]]).unwrap();

        let targets = project_masks_on_boxes(&[mask], &proposals, &[0], 2).unwrap();
        let target = &targets[0];
        // samples at x = 0.5, 1.5, 2.5, 3.5 read 0.5, 0.5, 0, 0
        assert_abs_diff_eq!(target[(0, 0)], 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(target[(0, 1)], 0.0);
    }

    #[test]
    fn thin_proposals_stay_finite() {
        let masks = vec![Array2::ones((10, 10))];
        let proposals = boxes_from_rows(&[[3.0, 3.0, 3.0, 8.0]]).unwrap();
        let targets = project_masks_on_boxes(&masks, &proposals, &[0], 4).unwrap();
        assert!(targets[0]
            .iter()
            .all(|&value| value.is_finite() && (0.0..=1.0).contains(&value)));
    }

    #[test]
    fn proposals_outside_the_mask_read_zero() {
        let masks = vec![Array2::ones((10, 10))];
        let proposals = boxes_from_rows(&[[40.0, 40.0, 50.0, 50.0]]).unwrap();
        let targets = project_masks_on_boxes(&masks, &proposals, &[0], 3).unwrap();
        assert!(targets[0].iter().all(|&value| value == 0.0));
    }

    #[test]
    fn matched_index_must_exist() {
        let masks = vec![Array2::ones((4, 4))];
        let proposals = boxes_from_rows(&[[0.0, 0.0, 1.0, 1.0]]).unwrap();
        assert!(matches!(
            project_masks_on_boxes(&masks, &proposals, &[1], 2),
            Err(TargetError::MatchIndexOutOfRange { index: 1, len: 1 })
        ));
        assert!(project_masks_on_boxes(&masks, &proposals, &[], 2).is_err());
    }
}
