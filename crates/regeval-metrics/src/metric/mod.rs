//! Metric implementations.
//!
//! Displacement and intensity errors reduce on burn tensors; the Jacobian
//! and segmentation metrics work directly on host-side `ndarray` views.

pub mod contour;
pub mod displacement;
pub mod gradient;
pub mod intensity;
pub mod jacobian;
pub mod segmentation;

pub use contour::{
    contour_distance_slice, contour_distance_stack, directed_hausdorff, ContourDistance,
};
pub use displacement::{average_endpoint_error, rmse_displacement};
pub use intensity::rmse_intensity;
pub use jacobian::{jacobian_determinant, jacobian_metrics, JacobianMetrics};
pub use segmentation::{dice_per_slice, dice_volumetric, DICE_SMOOTH};

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use ndarray::ArrayViewD;

/// Pool per-sample arrays of shape `(C, *spatial)` into one `[C, points]` tensor.
///
/// Samples may have different spatial extents (e.g. after per-sample
/// cropping); their points are concatenated along the second axis.
pub(crate) fn pool_points<B: Backend>(
    samples: &[ArrayViewD<'_, f32>],
    device: &B::Device,
) -> Tensor<B, 2> {
    let channels = samples.first().map(|s| s.shape()[0]).unwrap_or(0);
    let points: usize = samples
        .iter()
        .map(|s| if channels == 0 { 0 } else { s.len() / channels })
        .sum();

    let mut rows: Vec<Vec<f32>> = vec![Vec::with_capacity(points); channels];
    for sample in samples {
        for (row, channel) in rows.iter_mut().zip(sample.outer_iter()) {
            row.extend(channel.iter().copied());
        }
    }

    let values: Vec<f32> = rows.into_iter().flatten().collect();
    Tensor::from_data(TensorData::new(values, [channels, points]), device)
}

/// Number of spatial points across all samples.
pub(crate) fn total_points(samples: &[ArrayViewD<'_, f32>]) -> usize {
    samples.iter().map(|s| s.shape()[1..].iter().product::<usize>()).sum()
}
