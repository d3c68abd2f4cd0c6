//! Categorical Dice overlap between label stacks.
//!
//! Stacks are `(H, W, S)`: two in-plane axes followed by the slice axis.
//! Labels are stored as floats and compared after rounding.

use ndarray::{ArrayView2, ArrayView3, Axis, Zip};
use regeval_core::validation::validate_same_shape;
use regeval_core::Result;

/// Additive term in the per-slice Dice denominator.
pub const DICE_SMOOTH: f64 = 1e-3;

/// Whether a stored label value encodes `label`.
pub(crate) fn is_label(value: f32, label: u32) -> bool {
    value.round() == label as f32
}

/// `(|A ∩ B|, |A| + |B|)` for one label over a 2D slice.
fn overlap(a: ArrayView2<'_, f32>, b: ArrayView2<'_, f32>, label: u32) -> (f64, f64) {
    Zip::from(&a).and(&b).fold((0.0, 0.0), |(inter, total), &x, &y| {
        let in_a = is_label(x, label);
        let in_b = is_label(y, label);
        (
            inter + f64::from(u8::from(in_a && in_b)),
            total + f64::from(u8::from(in_a) + u8::from(in_b)),
        )
    })
}

/// Dice for one label computed per slice and averaged over slices.
///
/// Each slice scores `2|A∩B| / (|A| + |B| + DICE_SMOOTH)`, so a slice where
/// neither stack contains the label scores 0 and still counts in the mean.
pub fn dice_per_slice(
    mask1: ArrayView3<'_, f32>,
    mask2: ArrayView3<'_, f32>,
    label: u32,
) -> Result<f64> {
    validate_same_shape(mask1.shape(), mask2.shape())?;
    let slices = mask1.len_of(Axis(2));
    if slices == 0 {
        return Ok(f64::NAN);
    }

    let sum: f64 = mask1
        .axis_iter(Axis(2))
        .zip(mask2.axis_iter(Axis(2)))
        .map(|(a, b)| {
            let (inter, total) = overlap(a, b, label);
            2.0 * inter / (total + DICE_SMOOTH)
        })
        .sum();
    Ok(sum / slices as f64)
}

/// Dice for one label over the whole stack as a single region.
///
/// Intersection and sizes are summed over all slices before dividing.
/// Returns NaN when neither stack contains the label.
pub fn dice_volumetric(
    mask1: ArrayView3<'_, f32>,
    mask2: ArrayView3<'_, f32>,
    label: u32,
) -> Result<f64> {
    validate_same_shape(mask1.shape(), mask2.shape())?;

    let (inter, total) = mask1
        .axis_iter(Axis(2))
        .zip(mask2.axis_iter(Axis(2)))
        .map(|(a, b)| overlap(a, b, label))
        .fold((0.0, 0.0), |(i, t), (si, st)| (i + si, t + st));

    if total == 0.0 {
        return Ok(f64::NAN);
    }
    Ok(2.0 * inter / total)
}
