//! Contour distance metrics between 2D binary masks.
//!
//! The contour of a mask is its outer boundary: holes are filled first, then
//! every foreground pixel with a 4-neighbour outside the filled region (or
//! outside the image) is a contour point. Distances are measured between
//! pixel centres and scaled by the physical pixel spacing.

use std::collections::VecDeque;

use ndarray::{Array2, ArrayView2, ArrayView3, Axis};
use regeval_core::validation::{validate_pixel_spacing, validate_same_shape};
use regeval_core::{EvalError, Result};
use serde::Serialize;
use tracing::{debug, warn};

use super::segmentation::is_label;

/// Contour distances between two masks, in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContourDistance {
    /// Symmetric mean nearest-point distance.
    pub mean: f64,
    /// Hausdorff distance (maximum of both directed distances).
    pub hausdorff: f64,
}

const NEIGHBOURS: [(isize, isize); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

fn neighbours(
    (i, j): (usize, usize),
    (rows, cols): (usize, usize),
) -> impl Iterator<Item = Option<(usize, usize)>> {
    NEIGHBOURS.iter().map(move |&(di, dj)| {
        let ni = i.checked_add_signed(di)?;
        let nj = j.checked_add_signed(dj)?;
        (ni < rows && nj < cols).then_some((ni, nj))
    })
}

/// Fill enclosed holes: everything not reachable from the border through background.
fn fill_holes(mask: ArrayView2<'_, bool>) -> Array2<bool> {
    let dim = mask.dim();
    let (rows, cols) = dim;
    let mut outside = Array2::from_elem(dim, false);
    let mut queue = VecDeque::new();

    for i in 0..rows {
        for j in 0..cols {
            let on_border = i == 0 || j == 0 || i + 1 == rows || j + 1 == cols;
            if on_border && !mask[[i, j]] {
                outside[[i, j]] = true;
                queue.push_back((i, j));
            }
        }
    }
    while let Some(p) = queue.pop_front() {
        for (ni, nj) in neighbours(p, dim).flatten() {
            if !mask[[ni, nj]] && !outside[[ni, nj]] {
                outside[[ni, nj]] = true;
                queue.push_back((ni, nj));
            }
        }
    }

    outside.mapv(|o| !o)
}

/// Outer boundary points of a binary mask as `[row, col]` coordinates.
pub(crate) fn boundary_points(mask: ArrayView2<'_, bool>) -> Vec<[f64; 2]> {
    let filled = fill_holes(mask);
    let dim = filled.dim();
    filled
        .indexed_iter()
        .filter(|&(p, &inside)| {
            inside && neighbours(p, dim).any(|n| n.map_or(true, |q| !filled[q]))
        })
        .map(|((i, j), _)| [i as f64, j as f64])
        .collect()
}

fn distance(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// Directed Hausdorff distance `max_{a in A} min_{b in B} |a - b|`.
///
/// The inner scan stops as soon as a point of `b` is closer than the
/// running maximum, since that `a` can no longer raise it.
pub fn directed_hausdorff(a: &[[f64; 2]], b: &[[f64; 2]]) -> f64 {
    let mut cmax = 0.0f64;
    'outer: for pa in a {
        let mut cmin = f64::INFINITY;
        for pb in b {
            let d = distance(pa, pb);
            if d < cmax {
                continue 'outer;
            }
            cmin = cmin.min(d);
        }
        if cmin.is_finite() && cmin > cmax {
            cmax = cmin;
        }
    }
    cmax
}

fn mean_nearest(from: &[[f64; 2]], to: &[[f64; 2]]) -> f64 {
    let total: f64 = from
        .iter()
        .map(|p| to.iter().map(|q| distance(p, q)).fold(f64::INFINITY, f64::min))
        .sum();
    total / from.len() as f64
}

fn contour_distance_masks(
    mask1: ArrayView2<'_, bool>,
    mask2: ArrayView2<'_, bool>,
    pixel_spacing: f64,
) -> Result<ContourDistance> {
    let pts1 = boundary_points(mask1);
    let pts2 = boundary_points(mask2);
    if pts1.is_empty() || pts2.is_empty() {
        return Err(EvalError::degenerate_input("mask has no contour points"));
    }

    let mean = 0.5 * (mean_nearest(&pts1, &pts2) + mean_nearest(&pts2, &pts1));
    let hausdorff = directed_hausdorff(&pts1, &pts2).max(directed_hausdorff(&pts2, &pts1));
    Ok(ContourDistance {
        mean: mean * pixel_spacing,
        hausdorff: hausdorff * pixel_spacing,
    })
}

/// Contour distances between two binary 2D masks (non-zero is foreground).
///
/// # Errors
/// `DegenerateInput` if either mask has no contour points; callers working
/// on stacks should skip empty slices instead.
pub fn contour_distance_slice(
    mask1: ArrayView2<'_, f32>,
    mask2: ArrayView2<'_, f32>,
    pixel_spacing: f64,
) -> Result<ContourDistance> {
    validate_pixel_spacing(pixel_spacing)?;
    let a = mask1.mapv(|v| v != 0.0);
    let b = mask2.mapv(|v| v != 0.0);
    contour_distance_masks(a.view(), b.view(), pixel_spacing)
}

/// Contour distances for one label averaged over the slices of two `(H, W, S)` stacks.
///
/// Slices where either stack lacks the label are skipped. When every slice
/// is skipped both distances are NaN.
pub fn contour_distance_stack(
    stack1: ArrayView3<'_, f32>,
    stack2: ArrayView3<'_, f32>,
    label: u32,
    pixel_spacing: f64,
) -> Result<ContourDistance> {
    validate_pixel_spacing(pixel_spacing)?;
    validate_same_shape(&[stack1.len_of(Axis(2))], &[stack2.len_of(Axis(2))])?;

    let mut mean_sum = 0.0;
    let mut hausdorff_sum = 0.0;
    let mut used = 0usize;
    for (index, (s1, s2)) in stack1.axis_iter(Axis(2)).zip(stack2.axis_iter(Axis(2))).enumerate() {
        let a = s1.mapv(|v| is_label(v, label));
        let b = s2.mapv(|v| is_label(v, label));
        if !a.iter().any(|&v| v) || !b.iter().any(|&v| v) {
            debug!(slice = index, label, "skipping slice without label");
            continue;
        }
        let d = contour_distance_masks(a.view(), b.view(), pixel_spacing)?;
        mean_sum += d.mean;
        hausdorff_sum += d.hausdorff;
        used += 1;
    }

    if used == 0 {
        warn!(label, "no slice contains the label in both stacks; contour distances are NaN");
        return Ok(ContourDistance {
            mean: f64::NAN,
            hausdorff: f64::NAN,
        });
    }
    Ok(ContourDistance {
        mean: mean_sum / used as f64,
        hausdorff: hausdorff_sum / used as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use std::ops::Range;

    fn disc(size: usize, cx: f64, cy: f64, r: f64) -> Array2<f32> {
        Array2::from_shape_fn((size, size), |(i, j)| {
            let d = ((i as f64 - cx).powi(2) + (j as f64 - cy).powi(2)).sqrt();
            if d <= r {
                1.0
            } else {
                0.0
            }
        })
    }

    fn rect(size: usize, rows: Range<usize>, cols: Range<usize>) -> Array2<f32> {
        Array2::from_shape_fn((size, size), |(i, j)| {
            if rows.contains(&i) && cols.contains(&j) {
                1.0
            } else {
                0.0
            }
        })
    }

    #[test]
    fn test_identical_discs() {
        let m = disc(8, 3.5, 3.5, 2.5);
        let d = contour_distance_slice(m.view(), m.view(), 1.0).unwrap();
        assert_eq!(d, ContourDistance { mean: 0.0, hausdorff: 0.0 });
    }

    #[test]
    fn test_boundary_of_filled_square() {
        let m = rect(6, 1..5, 1..5).mapv(|v| v != 0.0);
        let pts = boundary_points(m.view());
        // 4x4 square: 12 boundary pixels, 4 interior
        assert_eq!(pts.len(), 12);
        assert!(!pts.contains(&[2.0, 2.0]));
    }

    #[test]
    fn test_holes_are_not_contours() {
        let mut m = rect(7, 1..6, 1..6).mapv(|v| v != 0.0);
        m[[3, 3]] = false;
        let pts = boundary_points(m.view());
        assert_eq!(pts.len(), 16);
        assert!(!pts.contains(&[3.0, 2.0]));
    }

    #[test]
    fn test_shifted_square_distances() {
        // Same 3x3 square shifted by two columns.
        let a = rect(10, 2..5, 2..5);
        let b = rect(10, 2..5, 4..7);
        let d = contour_distance_slice(a.view(), b.view(), 1.0).unwrap();
        assert!((d.hausdorff - 2.0).abs() < 1e-12);

        let scaled = contour_distance_slice(a.view(), b.view(), 1.5).unwrap();
        assert!((scaled.hausdorff - 3.0).abs() < 1e-12);
        assert!((scaled.mean - 1.5 * d.mean).abs() < 1e-12);
        assert!(d.mean > 0.0 && d.mean < d.hausdorff);
    }

    #[test]
    fn test_directed_hausdorff_is_asymmetric() {
        let a = [[0.0, 0.0]];
        let b = [[0.0, 0.0], [0.0, 5.0]];
        assert_eq!(directed_hausdorff(&a, &b), 0.0);
        assert_eq!(directed_hausdorff(&b, &a), 5.0);
    }

    #[test]
    fn test_empty_slice_is_degenerate() {
        let a = rect(6, 1..3, 1..3);
        let empty = Array2::<f32>::zeros((6, 6));
        assert!(matches!(
            contour_distance_slice(a.view(), empty.view(), 1.0),
            Err(EvalError::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_stack_skips_empty_slices() {
        let mut s1 = Array3::<f32>::zeros((10, 10, 3));
        let mut s2 = Array3::<f32>::zeros((10, 10, 3));
        s1.index_axis_mut(Axis(2), 0).assign(&rect(10, 2..5, 2..5).mapv(|v| v * 2.0));
        s2.index_axis_mut(Axis(2), 0).assign(&rect(10, 2..5, 4..7).mapv(|v| v * 2.0));
        // slice 1 only has the label in one stack, slice 2 in neither
        s1.index_axis_mut(Axis(2), 1).assign(&rect(10, 0..4, 0..4).mapv(|v| v * 2.0));

        let d = contour_distance_stack(s1.view(), s2.view(), 2, 1.0).unwrap();
        assert!((d.hausdorff - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_stack_without_label_is_nan() {
        let s = Array3::<f32>::zeros((6, 6, 2));
        let d = contour_distance_stack(s.view(), s.view(), 1, 1.0).unwrap();
        assert!(d.mean.is_nan() && d.hausdorff.is_nan());
    }

    #[test]
    fn test_stack_slice_count_mismatch() {
        let a = Array3::<f32>::zeros((6, 6, 2));
        let b = Array3::<f32>::zeros((6, 6, 3));
        assert!(matches!(
            contour_distance_stack(a.view(), b.view(), 1, 1.0),
            Err(EvalError::ShapeMismatch { .. })
        ));
    }
}
