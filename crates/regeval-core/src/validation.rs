//! Validation utilities for metric inputs and parameters.
//!
//! Metric functions call these before touching any data so that shape and
//! parameter problems surface as typed errors instead of panics.

use ndarray::ArrayViewD;

use crate::error::{EvalError, Result};

/// Validate that two shapes are identical.
pub fn validate_same_shape(expected: &[usize], actual: &[usize]) -> Result<()> {
    if expected != actual {
        return Err(EvalError::shape_mismatch(expected, actual));
    }
    Ok(())
}

/// Validate that two lists of per-sample arrays pair up with identical shapes.
pub fn validate_paired_samples(
    left: &[ArrayViewD<'_, f32>],
    right: &[ArrayViewD<'_, f32>],
) -> Result<()> {
    if left.len() != right.len() {
        return Err(EvalError::shape_mismatch(&[left.len()], &[right.len()]));
    }
    for (l, r) in left.iter().zip(right) {
        validate_same_shape(l.shape(), r.shape())?;
    }
    Ok(())
}

/// Validate the layout of a single displacement sample with components leading.
///
/// The sample must have shape `(dim, *spatial)` with `dim` equal to the number
/// of spatial axes, and `dim` must be 2 or 3.
pub fn validate_vector_field(shape: &[usize]) -> Result<usize> {
    if shape.len() < 2 {
        return Err(EvalError::dimension_mismatch(format!(
            "displacement sample must have shape (dim, *spatial), got {:?}",
            shape
        )));
    }
    let dim = shape[0];
    let spatial_rank = shape.len() - 1;
    if dim != spatial_rank {
        return Err(EvalError::dimension_mismatch(format!(
            "displacement has {} components over {} spatial axes",
            dim, spatial_rank
        )));
    }
    if dim != 2 && dim != 3 {
        return Err(EvalError::dimension_mismatch(format!(
            "only 2D and 3D displacement fields are supported, got {}D",
            dim
        )));
    }
    Ok(dim)
}

/// Validate physical pixel spacing.
pub fn validate_pixel_spacing(spacing: f64) -> Result<()> {
    if !spacing.is_finite() || spacing <= 0.0 {
        return Err(EvalError::invalid_configuration(format!(
            "pixel spacing must be finite and positive, got {}",
            spacing
        )));
    }
    Ok(())
}

/// Validate that at least one sample is present.
pub fn validate_non_empty<T>(samples: &[T], what: &str) -> Result<()> {
    if samples.is_empty() {
        return Err(EvalError::degenerate_input(format!("no {} samples", what)));
    }
    Ok(())
}
