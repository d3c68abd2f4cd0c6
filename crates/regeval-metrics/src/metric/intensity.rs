//! Image intensity metrics.

use burn::tensor::backend::Backend;
use burn::tensor::ElementConversion;
use ndarray::ArrayViewD;
use regeval_core::validation::{validate_non_empty, validate_paired_samples};
use regeval_core::{EvalError, Result};

use super::{pool_points, total_points};

/// Root mean squared intensity difference.
///
/// RMSE = sqrt((1/N) * sum((pred(x) - reference(x))^2))
///
/// # Arguments
/// * `pred` - Predicted image samples, each `(C, *spatial)`
/// * `reference` - Reference image samples, same shapes as `pred`
/// * `device` - Device used for the reduction
pub fn rmse_intensity<B: Backend>(
    pred: &[ArrayViewD<'_, f32>],
    reference: &[ArrayViewD<'_, f32>],
    device: &B::Device,
) -> Result<f64> {
    validate_non_empty(pred, "image")?;
    validate_paired_samples(pred, reference)?;
    if total_points(pred) == 0 {
        return Err(EvalError::degenerate_input("images have no voxels"));
    }

    let diff = pool_points::<B>(pred, device) - pool_points::<B>(reference, device);
    let rmse = diff.powf_scalar(2.0).mean().sqrt();
    Ok(rmse.into_scalar().elem::<f64>())
}
