//! Jacobian determinant analysis of displacement fields.
//!
//! For a deformation `x -> x + u(x)` the local volume change is
//! `det(I + ∇u)`. Negative values mark folding (a locally non-invertible
//! mapping); the spatial variation of the determinant measures how smooth
//! the deformation is.

use nalgebra::{Matrix2, Matrix3};
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};
use regeval_core::validation::{validate_non_empty, validate_vector_field};
use regeval_core::{EvalError, Result};
use serde::Serialize;

use super::gradient::{partial_derivative, Boundary};

/// Regularity scalars derived from the Jacobian determinant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JacobianMetrics {
    /// Mean over samples of the fraction of points with negative determinant.
    pub folding_ratio: f64,
    /// Mean over samples of the mean absolute spatial gradient of the determinant.
    pub mag_grad_jac_det: f64,
}

/// Compute the Jacobian determinant of one displacement sample.
///
/// # Arguments
/// * `dvf` - Displacement with shape `(*spatial, dim)`, components trailing;
///   component `k` displaces along spatial axis `k`.
///
/// # Returns
/// Determinant field with the spatial shape. Derivatives are half central
/// differences with clamped (zero-flux) boundaries and unit grid spacing.
pub fn jacobian_determinant(dvf: ArrayViewD<'_, f32>) -> Result<ArrayD<f64>> {
    let shape = dvf.shape();
    if shape.is_empty() {
        return Err(EvalError::dimension_mismatch("displacement sample has no axes"));
    }
    let dim = shape[shape.len() - 1];
    let spatial_rank = shape.len() - 1;
    if dim != spatial_rank || !(2..=3).contains(&dim) {
        return Err(EvalError::dimension_mismatch(format!(
            "expected a 2D or 3D field with trailing components, got shape {:?}",
            shape
        )));
    }
    let spatial = shape[..spatial_rank].to_vec();
    let num_points: usize = spatial.iter().product();

    // derivatives[c][j][p] = d u_c / d x_j at flat point p
    let derivatives: Vec<Vec<Vec<f64>>> = (0..dim)
        .map(|c| {
            let component = dvf.index_axis(Axis(spatial_rank), c).mapv(f64::from);
            (0..dim)
                .map(|j| partial_derivative(component.view(), j, Boundary::ZeroFlux).into_raw_vec())
                .collect()
        })
        .collect();

    let det: Vec<f64> = (0..num_points)
        .map(|p| determinant_at(dim, |c, j| derivatives[c][j][p]))
        .collect();

    ArrayD::from_shape_vec(IxDyn(&spatial), det)
        .map_err(|e| EvalError::dimension_mismatch(e.to_string()))
}

/// `det(I + ∇u)` from the displacement gradient `d(c, j) = du_c/dx_j`.
#[rustfmt::skip]
fn determinant_at(dim: usize, d: impl Fn(usize, usize) -> f64) -> f64 {
    match dim {
        2 => Matrix2::new(
            1.0 + d(0, 0), d(0, 1),
            d(1, 0), 1.0 + d(1, 1),
        )
        .determinant(),
        _ => Matrix3::new(
            1.0 + d(0, 0), d(0, 1), d(0, 2),
            d(1, 0), 1.0 + d(1, 1), d(1, 2),
            d(2, 0), d(2, 1), 1.0 + d(2, 2),
        )
        .determinant(),
    }
}

/// Compute folding ratio and determinant-gradient magnitude over a set of samples.
///
/// # Arguments
/// * `samples` - Displacement samples, each `(dim, *spatial)` (components leading)
pub fn jacobian_metrics(samples: &[ArrayViewD<'_, f32>]) -> Result<JacobianMetrics> {
    validate_non_empty(samples, "displacement")?;

    let mut folding_ratio = 0.0;
    let mut mag_grad_jac_det = 0.0;
    for sample in samples {
        validate_vector_field(sample.shape())?;

        // (dim, *spatial) -> (*spatial, dim)
        let rank = sample.ndim();
        let order: Vec<usize> = (1..rank).chain(std::iter::once(0)).collect();
        let det = jacobian_determinant(sample.view().permuted_axes(order))?;
        if det.is_empty() {
            return Err(EvalError::degenerate_input("displacement sample has no points"));
        }

        let negative = det.iter().filter(|&&v| v < 0.0).count();
        folding_ratio += negative as f64 / det.len() as f64;

        let abs_grad_sum: f64 = (0..det.ndim())
            .map(|axis| {
                partial_derivative(det.view(), axis, Boundary::OneSided)
                    .iter()
                    .map(|v| v.abs())
                    .sum::<f64>()
            })
            .sum();
        mag_grad_jac_det += abs_grad_sum / (det.ndim() * det.len()) as f64;
    }

    let n = samples.len() as f64;
    Ok(JacobianMetrics {
        folding_ratio: folding_ratio / n,
        mag_grad_jac_det: mag_grad_jac_det / n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    #[test]
    fn test_translation_has_unit_determinant() {
        let dvf = Array::from_shape_fn(IxDyn(&[5, 6, 2]), |idx| {
            if idx[2] == 0 {
                1.5f32
            } else {
                -0.7
            }
        });
        let det = jacobian_determinant(dvf.view()).unwrap();
        assert_eq!(det.shape(), &[5, 6]);
        assert!(det.iter().all(|&v| (v - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_linear_stretch_2d() {
        // u_0 = 0.5 * i: interior d u_0 / d x_0 = 0.5, halved at the edges.
        let dvf = Array::from_shape_fn(IxDyn(&[5, 4, 2]), |idx| {
            if idx[2] == 0 {
                0.5 * idx[0] as f32
            } else {
                0.0
            }
        });
        let det = jacobian_determinant(dvf.view()).unwrap();
        for ((i, _), &v) in det
            .view()
            .into_dimensionality::<ndarray::Ix2>()
            .unwrap()
            .indexed_iter()
        {
            let expected = if i == 0 || i == 4 { 1.25 } else { 1.5 };
            assert!((v - expected).abs() < 1e-9, "row {} det {}", i, v);
        }
    }

    #[test]
    fn test_shear_3d() {
        // u_0 = 0.3 * x_1 is a pure shear: determinant stays 1.
        let dvf = Array::from_shape_fn(IxDyn(&[4, 4, 4, 3]), |idx| {
            if idx[3] == 0 {
                0.3 * idx[1] as f32
            } else {
                0.0
            }
        });
        let det = jacobian_determinant(dvf.view()).unwrap();
        assert!(det.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_compression_folds_everywhere() {
        // (dim, *spatial) layout: u_0 = -3 * i
        let dvf = Array::from_shape_fn(IxDyn(&[2, 6, 6]), |idx| {
            if idx[0] == 0 {
                -3.0 * idx[1] as f32
            } else {
                0.0
            }
        });
        let metrics = jacobian_metrics(&[dvf.view()]).unwrap();
        assert_eq!(metrics.folding_ratio, 1.0);
        assert!(metrics.mag_grad_jac_det > 0.0);
    }

    #[test]
    fn test_translation_metrics_are_zero() {
        let dvf = Array::from_elem(IxDyn(&[3, 4, 5, 6]), 2.0f32);
        let metrics = jacobian_metrics(&[dvf.view(), dvf.view()]).unwrap();
        assert_eq!(metrics.folding_ratio, 0.0);
        assert!(metrics.mag_grad_jac_det.abs() < 1e-12);
    }

    #[test]
    fn test_rejects_wrong_component_count() {
        let dvf = ArrayD::<f32>::zeros(IxDyn(&[4, 4, 3]));
        assert!(matches!(
            jacobian_determinant(dvf.view()),
            Err(EvalError::DimensionMismatch(_))
        ));
        let sample = ArrayD::<f32>::zeros(IxDyn(&[3, 4, 4]));
        assert!(jacobian_metrics(&[sample.view()]).is_err());
    }
}
