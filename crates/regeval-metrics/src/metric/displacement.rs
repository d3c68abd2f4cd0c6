//! Displacement field accuracy metrics.
//!
//! Both metrics compare a predicted and a ground-truth field sample by sample.
//! Samples have shape `(dim, *spatial)`; after ROI cropping their spatial
//! extents may differ between samples, so points are pooled across samples
//! rather than averaged per sample.
//!
//! AEE = mean_p ||pred(p) - gt(p)||
//! RMSE = sqrt(mean_p ||pred(p) - gt(p)||²)

use burn::tensor::backend::Backend;
use burn::tensor::ElementConversion;
use ndarray::ArrayViewD;
use regeval_core::validation::{validate_non_empty, validate_paired_samples, validate_vector_field};
use regeval_core::{EvalError, Result};

use super::{pool_points, total_points};

/// Average end-point error: mean of the per-point Euclidean norm of the difference.
///
/// # Arguments
/// * `pred` - Predicted displacement samples, each `(dim, *spatial)`
/// * `gt` - Ground-truth displacement samples, same shapes as `pred`
/// * `device` - Device used for the reduction
pub fn average_endpoint_error<B: Backend>(
    pred: &[ArrayViewD<'_, f32>],
    gt: &[ArrayViewD<'_, f32>],
    device: &B::Device,
) -> Result<f64> {
    validate_displacement_pair(pred, gt)?;

    let diff = pool_points::<B>(pred, device) - pool_points::<B>(gt, device);
    let aee = diff.powf_scalar(2.0).sum_dim(0).sqrt().mean();
    Ok(aee.into_scalar().elem::<f64>())
}

/// Root mean squared error of the displacement vectors.
///
/// The square root is taken after averaging the squared norms, which is what
/// distinguishes it from [`average_endpoint_error`].
pub fn rmse_displacement<B: Backend>(
    pred: &[ArrayViewD<'_, f32>],
    gt: &[ArrayViewD<'_, f32>],
    device: &B::Device,
) -> Result<f64> {
    validate_displacement_pair(pred, gt)?;

    let diff = pool_points::<B>(pred, device) - pool_points::<B>(gt, device);
    let rmse = diff.powf_scalar(2.0).sum_dim(0).mean().sqrt();
    Ok(rmse.into_scalar().elem::<f64>())
}

fn validate_displacement_pair(
    pred: &[ArrayViewD<'_, f32>],
    gt: &[ArrayViewD<'_, f32>],
) -> Result<()> {
    validate_non_empty(pred, "displacement")?;
    validate_paired_samples(pred, gt)?;
    let dim = validate_vector_field(pred[0].shape())?;
    for sample in &pred[1..] {
        if validate_vector_field(sample.shape())? != dim {
            return Err(EvalError::dimension_mismatch(
                "displacement samples mix 2D and 3D fields",
            ));
        }
    }
    if total_points(pred) == 0 {
        return Err(EvalError::degenerate_input("displacement fields have no points"));
    }
    Ok(())
}
