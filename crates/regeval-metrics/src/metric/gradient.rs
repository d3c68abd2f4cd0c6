//! Finite-difference partial derivatives on dense grids.

use ndarray::{ArrayD, ArrayViewD, Axis, Zip};

/// Boundary handling for [`partial_derivative`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Half central difference everywhere, with neighbour indices clamped to
    /// the grid (zero-flux Neumann). Edge values are therefore halved
    /// one-sided differences.
    ZeroFlux,
    /// Central differences inside, first-order one-sided differences at the
    /// first and last index.
    OneSided,
}

/// Compute the partial derivative of a scalar field along one axis, unit spacing.
///
/// Axes with fewer than two points have a zero derivative. The result is
/// always in standard layout.
pub fn partial_derivative(
    field: ArrayViewD<'_, f64>,
    axis: usize,
    boundary: Boundary,
) -> ArrayD<f64> {
    let mut out = ArrayD::<f64>::zeros(field.raw_dim());
    let n = field.len_of(Axis(axis));
    if n < 2 {
        return out;
    }

    Zip::from(out.lanes_mut(Axis(axis)))
        .and(field.lanes(Axis(axis)))
        .for_each(|mut out_lane, lane| {
            for i in 0..n {
                out_lane[i] = match boundary {
                    Boundary::ZeroFlux => {
                        0.5 * (lane[(i + 1).min(n - 1)] - lane[i.saturating_sub(1)])
                    }
                    Boundary::OneSided if i == 0 => lane[1] - lane[0],
                    Boundary::OneSided if i == n - 1 => lane[n - 1] - lane[n - 2],
                    Boundary::OneSided => 0.5 * (lane[i + 1] - lane[i - 1]),
                };
            }
        });

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, Array2, IxDyn};

    #[test]
    fn test_one_sided_matches_numpy_gradient() {
        let f = arr1(&[1.0, 2.0, 4.0, 7.0, 11.0]).into_dyn();
        let d = partial_derivative(f.view(), 0, Boundary::OneSided);
        assert_eq!(d.as_slice().unwrap(), &[1.0, 1.5, 2.5, 3.5, 4.0]);
    }

    #[test]
    fn test_zero_flux_halves_edges() {
        let f = arr1(&[0.0, 2.0, 4.0, 6.0]).into_dyn();
        let d = partial_derivative(f.view(), 0, Boundary::ZeroFlux);
        assert_eq!(d.as_slice().unwrap(), &[1.0, 2.0, 2.0, 1.0]);
    }

    #[test]
    fn test_derivative_along_second_axis() {
        let f = Array2::from_shape_fn((3, 4), |(i, j)| (10 * i + 3 * j) as f64).into_dyn();
        let d0 = partial_derivative(f.view(), 0, Boundary::OneSided);
        let d1 = partial_derivative(f.view(), 1, Boundary::OneSided);
        assert!(d0.iter().all(|&v| (v - 10.0).abs() < 1e-12));
        assert!(d1.iter().all(|&v| (v - 3.0).abs() < 1e-12));
    }

    #[test]
    fn test_singleton_axis_is_zero() {
        let f = ArrayD::<f64>::from_elem(IxDyn(&[1, 5]), 3.0);
        let d = partial_derivative(f.view(), 0, Boundary::OneSided);
        assert!(d.iter().all(|&v| v == 0.0));
    }
}
