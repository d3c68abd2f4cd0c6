//! Region-of-interest geometry: bounding boxes, cropping and masking.
//!
//! Boxes are expressed in index space with an inclusive start and an
//! exclusive end per spatial axis, so they can be used directly as slice
//! ranges.

use ndarray::{ArrayD, ArrayViewD, Axis, Slice};

use crate::error::{EvalError, Result};

/// Axis-aligned box over the spatial axes of an array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundingBox {
    start: Vec<usize>,
    end: Vec<usize>,
}

impl BoundingBox {
    /// Create a box from per-axis start (inclusive) and end (exclusive) indices.
    pub fn new(start: Vec<usize>, end: Vec<usize>) -> Result<Self> {
        if start.len() != end.len() {
            return Err(EvalError::dimension_mismatch(format!(
                "bounding box start has {} axes but end has {}",
                start.len(),
                end.len()
            )));
        }
        if start.iter().zip(&end).any(|(s, e)| s > e) {
            return Err(EvalError::invalid_configuration(format!(
                "bounding box start {:?} exceeds end {:?}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Box covering a whole spatial extent.
    pub fn full(shape: &[usize]) -> Self {
        Self {
            start: vec![0; shape.len()],
            end: shape.to_vec(),
        }
    }

    pub fn start(&self) -> &[usize] {
        &self.start
    }

    pub fn end(&self) -> &[usize] {
        &self.end
    }

    /// Number of spatial axes.
    pub fn ndim(&self) -> usize {
        self.start.len()
    }

    /// Extent of the box along each axis.
    pub fn shape(&self) -> Vec<usize> {
        self.start.iter().zip(&self.end).map(|(s, e)| e - s).collect()
    }

    /// Number of grid points inside the box.
    pub fn num_elements(&self) -> usize {
        self.shape().iter().product()
    }

    /// Whether an index lies inside the box.
    pub fn contains(&self, index: &[usize]) -> bool {
        index.len() == self.ndim()
            && index
                .iter()
                .zip(self.start.iter().zip(&self.end))
                .all(|(&i, (&s, &e))| i >= s && i < e)
    }
}

/// Bounding box of one mask sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskBounds {
    /// Minimal box around the non-zero elements; the full extent when the mask is empty.
    pub bbox: BoundingBox,
    /// Whether the mask had any non-zero element.
    pub non_empty: bool,
}

/// Find the bounding box of the non-zero elements of each mask sample.
///
/// # Arguments
/// * `mask` - Mask with shape `(N, *spatial)`
///
/// # Returns
/// One [`MaskBounds`] per sample. An all-zero sample yields the full spatial
/// extent with `non_empty == false`.
pub fn bbox_from_mask(mask: ArrayViewD<'_, f32>) -> Result<Vec<MaskBounds>> {
    if mask.ndim() < 2 {
        return Err(EvalError::dimension_mismatch(format!(
            "mask must have shape (N, *spatial), got {:?}",
            mask.shape()
        )));
    }
    let spatial = &mask.shape()[1..];

    let bounds = mask
        .outer_iter()
        .map(|sample| {
            let mut lo = spatial.to_vec();
            let mut hi = vec![0usize; spatial.len()];
            let mut non_empty = false;

            for (index, &value) in sample.indexed_iter() {
                if value == 0.0 {
                    continue;
                }
                non_empty = true;
                for axis in 0..spatial.len() {
                    lo[axis] = lo[axis].min(index[axis]);
                    hi[axis] = hi[axis].max(index[axis] + 1);
                }
            }

            if non_empty {
                MaskBounds {
                    bbox: BoundingBox { start: lo, end: hi },
                    non_empty,
                }
            } else {
                tracing::debug!("empty mask sample, using full extent {:?}", spatial);
                MaskBounds {
                    bbox: BoundingBox::full(spatial),
                    non_empty,
                }
            }
        })
        .collect();

    Ok(bounds)
}

/// Crop every sample of an array to its own bounding box.
///
/// # Arguments
/// * `array` - Array with shape `(N, C, *spatial)`
/// * `boxes` - One box per sample
///
/// # Returns
/// One owned array of shape `(C, *box)` per sample.
pub fn bbox_crop(array: ArrayViewD<'_, f32>, boxes: &[BoundingBox]) -> Result<Vec<ArrayD<f32>>> {
    if array.ndim() < 3 {
        return Err(EvalError::dimension_mismatch(format!(
            "array must have shape (N, C, *spatial), got {:?}",
            array.shape()
        )));
    }
    let num_samples = array.len_of(Axis(0));
    if boxes.len() != num_samples {
        return Err(EvalError::shape_mismatch(&[num_samples], &[boxes.len()]));
    }

    let spatial = &array.shape()[2..];
    for bbox in boxes {
        if bbox.ndim() != spatial.len() {
            return Err(EvalError::shape_mismatch(spatial, &bbox.shape()));
        }
        if bbox.end().iter().zip(spatial).any(|(e, s)| e > s) {
            return Err(EvalError::shape_mismatch(spatial, bbox.end()));
        }
    }

    let cropped = array
        .outer_iter()
        .zip(boxes)
        .map(|(sample, bbox)| {
            sample
                .slice_each_axis(|desc| match desc.axis.index() {
                    0 => Slice::from(..),
                    i => Slice::from(bbox.start[i - 1]..bbox.end[i - 1]),
                })
                .to_owned()
        })
        .collect();

    Ok(cropped)
}

/// Multiply an array by a mask broadcast over the channel axis.
///
/// # Arguments
/// * `array` - Array with shape `(N, C, *spatial)`
/// * `mask` - Mask with shape `(N, 1, *spatial)`
pub fn apply_mask(array: ArrayViewD<'_, f32>, mask: ArrayViewD<'_, f32>) -> Result<ArrayD<f32>> {
    let shape = array.shape();
    let mask_shape = mask.shape();
    let compatible = shape.len() == mask_shape.len()
        && shape.len() >= 3
        && mask_shape[0] == shape[0]
        && mask_shape[1] == 1
        && mask_shape[2..] == shape[2..];
    if !compatible {
        return Err(EvalError::shape_mismatch(shape, mask_shape));
    }

    let broadcast = mask
        .broadcast(array.raw_dim())
        .ok_or_else(|| EvalError::shape_mismatch(shape, mask_shape))?;

    let mut masked = array.to_owned();
    masked.zip_mut_with(&broadcast, |value, &m| *value *= m);
    Ok(masked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn};

    #[test]
    fn test_bbox_from_mask_2d() {
        let mut mask = ArrayD::<f32>::zeros(IxDyn(&[2, 6, 5]));
        mask[[0, 1, 2]] = 1.0;
        mask[[0, 3, 4]] = 1.0;
        mask[[1, 5, 0]] = 1.0;

        let bounds = bbox_from_mask(mask.view()).unwrap();
        assert_eq!(bounds.len(), 2);
        assert_eq!(bounds[0].bbox.start(), &[1, 2]);
        assert_eq!(bounds[0].bbox.end(), &[4, 5]);
        assert_eq!(bounds[0].bbox.shape(), vec![3, 3]);
        assert!(bounds[0].non_empty);

        assert_eq!(bounds[1].bbox.start(), &[5, 0]);
        assert_eq!(bounds[1].bbox.end(), &[6, 1]);
    }

    #[test]
    fn test_bbox_from_empty_mask_is_full_extent() {
        let mask = ArrayD::<f32>::zeros(IxDyn(&[1, 4, 3, 2]));
        let bounds = bbox_from_mask(mask.view()).unwrap();
        assert!(!bounds[0].non_empty);
        assert_eq!(bounds[0].bbox, BoundingBox::full(&[4, 3, 2]));
        assert_eq!(bounds[0].bbox.num_elements(), 24);
    }

    #[test]
    fn test_bbox_crop_per_sample() {
        let array = Array::from_shape_fn(IxDyn(&[2, 2, 4, 4]), |idx| {
            (idx[0] * 100 + idx[1] * 10 + idx[2] * 4 + idx[3]) as f32
        });
        let boxes = vec![
            BoundingBox::new(vec![1, 1], vec![3, 3]).unwrap(),
            BoundingBox::new(vec![0, 2], vec![1, 4]).unwrap(),
        ];

        let cropped = bbox_crop(array.view(), &boxes).unwrap();
        assert_eq!(cropped[0].shape(), &[2, 2, 2]);
        assert_eq!(cropped[1].shape(), &[2, 1, 2]);
        assert_eq!(cropped[0][[0, 0, 0]], 5.0);
        assert_eq!(cropped[0][[1, 1, 1]], 10.0 + 10.0);
        assert_eq!(cropped[1][[1, 0, 1]], 100.0 + 10.0 + 3.0);
    }

    #[test]
    fn test_bbox_crop_rejects_rank_mismatch() {
        let array = ArrayD::<f32>::zeros(IxDyn(&[1, 1, 4, 4]));
        let boxes = vec![BoundingBox::full(&[4, 4, 4])];
        let err = bbox_crop(array.view(), &boxes).unwrap_err();
        assert!(matches!(err, EvalError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_bbox_crop_rejects_box_past_extent() {
        let array = ArrayD::<f32>::zeros(IxDyn(&[1, 1, 4, 4]));
        let boxes = vec![BoundingBox::new(vec![0, 0], vec![5, 4]).unwrap()];
        let err = bbox_crop(array.view(), &boxes).unwrap_err();
        assert!(matches!(err, EvalError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_bbox_crop_rejects_box_count_mismatch() {
        let array = ArrayD::<f32>::zeros(IxDyn(&[2, 1, 4, 4]));
        let boxes = vec![BoundingBox::full(&[4, 4])];
        assert!(bbox_crop(array.view(), &boxes).is_err());
    }

    #[test]
    fn test_apply_mask_broadcasts_channels() {
        let array = ArrayD::<f32>::from_elem(IxDyn(&[1, 2, 2, 2]), 3.0);
        let mut mask = ArrayD::<f32>::zeros(IxDyn(&[1, 1, 2, 2]));
        mask[[0, 0, 0, 1]] = 1.0;

        let masked = apply_mask(array.view(), mask.view()).unwrap();
        assert_eq!(masked.sum(), 6.0);
        assert_eq!(masked[[0, 1, 0, 1]], 3.0);
        assert_eq!(masked[[0, 1, 1, 1]], 0.0);
    }

    #[test]
    fn test_apply_mask_rejects_mismatch() {
        let array = ArrayD::<f32>::zeros(IxDyn(&[1, 2, 2, 2]));
        let mask = ArrayD::<f32>::zeros(IxDyn(&[1, 1, 2, 3]));
        assert!(apply_mask(array.view(), mask.view()).is_err());
    }

    #[test]
    fn test_box_contains() {
        let bbox = BoundingBox::new(vec![1, 1], vec![3, 4]).unwrap();
        assert!(bbox.contains(&[1, 3]));
        assert!(!bbox.contains(&[3, 1]));
        assert!(BoundingBox::new(vec![2], vec![1]).is_err());
    }
}
