//! Metric groups and the dispatcher that runs them over a batch.
//!
//! A group is a fixed set of metrics computed from a fixed set of batch
//! roles. The dispatcher parses group names once, checks that a batch holds
//! every role its groups need, and merges the per-group results.

use std::fmt;
use std::str::FromStr;

use burn::tensor::backend::Backend;
use ndarray::{ArrayD, ArrayView3, ArrayViewD, Axis, Ix3};
use regeval_core::validation::validate_pixel_spacing;
use regeval_core::{
    apply_mask, bbox_crop, bbox_from_mask, Batch, BoundingBox, ErrorKind, EvalError, Result, Role,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::metric::{
    average_endpoint_error, contour_distance_stack, dice_per_slice, dice_volumetric,
    jacobian_metrics, rmse_displacement, rmse_intensity,
};

/// Closed set of metric groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricGroup {
    /// Displacement accuracy and regularity: `aee`, `rmse_dvf`, `folding_ratio`,
    /// `mag_grad_jac_det`.
    DvfMetrics,
    /// Intensity error of the predicted target: `rmse`.
    ImageMetrics,
    /// Per-label overlap and contour distances between target and warped source segmentations.
    SegMetrics,
}

impl MetricGroup {
    pub const ALL: [MetricGroup; 3] = [Self::DvfMetrics, Self::ImageMetrics, Self::SegMetrics];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DvfMetrics => "dvf_metrics",
            Self::ImageMetrics => "image_metrics",
            Self::SegMetrics => "seg_metrics",
        }
    }

    /// Batch roles the group reads. `roi_mask` is optional and not listed.
    pub fn required_roles(&self) -> &'static [Role] {
        match self {
            Self::DvfMetrics => &[Role::DvfPred, Role::DvfGt],
            Self::ImageMetrics => &[Role::Target, Role::TargetPred],
            Self::SegMetrics => &[Role::TargetSeg, Role::WarpedSourceSeg],
        }
    }

    /// Names of the metrics the group produces, in output order.
    pub fn metric_names(&self, seg_config: &SegmentationConfig) -> Vec<String> {
        match self {
            Self::DvfMetrics => ["aee", "rmse_dvf", "folding_ratio", "mag_grad_jac_det"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            Self::ImageMetrics => vec!["rmse".to_string()],
            Self::SegMetrics => seg_config
                .labels
                .iter()
                .flat_map(|label| {
                    ["dice_slice", "dice_volume", "mcd", "hd"]
                        .iter()
                        .map(move |prefix| format!("{prefix}_{label}"))
                })
                .collect(),
        }
    }
}

impl fmt::Display for MetricGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricGroup {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|group| group.as_str() == s)
            .ok_or_else(|| {
                EvalError::invalid_configuration(format!(
                    "unknown metric group '{}' (expected one of: {})",
                    s,
                    Self::ALL.map(|g| g.as_str()).join(", ")
                ))
            })
    }
}

/// Parameters of the segmentation group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentationConfig {
    /// Label classes to evaluate
    pub labels: Vec<u32>,
    /// Physical size of a pixel, applied to contour distances
    pub pixel_spacing: f64,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            labels: vec![1, 2, 3],
            pixel_spacing: 1.0,
        }
    }
}

impl SegmentationConfig {
    pub fn with_labels(mut self, labels: Vec<u32>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_pixel_spacing(mut self, pixel_spacing: f64) -> Self {
        self.pixel_spacing = pixel_spacing;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.labels.is_empty() {
            return Err(EvalError::invalid_configuration(
                "segmentation metrics need at least one label",
            ));
        }
        let mut sorted = self.labels.clone();
        sorted.sort_unstable();
        if sorted.windows(2).any(|w| w[0] == w[1]) {
            return Err(EvalError::invalid_configuration(format!(
                "duplicate segmentation labels in {:?}",
                self.labels
            )));
        }
        validate_pixel_spacing(self.pixel_spacing)
    }
}

/// Metric name to scalar, in the order the metrics were produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricResult {
    entries: Vec<(String, f64)>,
}

impl MetricResult {
    /// Build a result, rejecting repeated metric names.
    pub fn from_entries<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut result = Self::default();
        for (name, value) in entries {
            result.push(name.into(), value)?;
        }
        Ok(result)
    }

    fn push(&mut self, name: String, value: f64) -> Result<()> {
        if self.get(&name).is_some() {
            return Err(EvalError::DuplicateMetric(name));
        }
        self.entries.push((name, value));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append the entries of `other`; a shared name is a [`EvalError::DuplicateMetric`].
    pub(crate) fn merge(mut self, other: MetricResult) -> Result<Self> {
        for (name, value) in other.entries {
            self.push(name, value)?;
        }
        Ok(self)
    }
}

/// Runs the configured metric groups over batches.
#[derive(Debug, Clone)]
pub struct MetricDispatcher<B: Backend> {
    groups: Vec<MetricGroup>,
    seg_config: SegmentationConfig,
    device: B::Device,
}

impl<B: Backend> MetricDispatcher<B> {
    /// Parse and validate the group list.
    ///
    /// Every name is checked before anything else happens, so an unknown
    /// group fails without touching any data.
    pub fn new<S: AsRef<str>>(
        group_names: &[S],
        seg_config: SegmentationConfig,
        device: B::Device,
    ) -> Result<Self> {
        let groups = group_names
            .iter()
            .map(|name| name.as_ref().parse::<MetricGroup>())
            .collect::<Result<Vec<_>>>()?;

        if groups.is_empty() {
            return Err(EvalError::invalid_configuration("no metric groups requested"));
        }
        for (i, group) in groups.iter().enumerate() {
            if groups[..i].contains(group) {
                return Err(EvalError::invalid_configuration(format!(
                    "metric group '{}' requested twice",
                    group
                )));
            }
        }
        if groups.contains(&MetricGroup::SegMetrics) {
            seg_config.validate()?;
        }

        Ok(Self {
            groups,
            seg_config,
            device,
        })
    }

    pub fn groups(&self) -> &[MetricGroup] {
        &self.groups
    }

    pub fn segmentation_config(&self) -> &SegmentationConfig {
        &self.seg_config
    }

    /// All metric names a successful [`measure`](Self::measure) produces.
    pub fn metric_names(&self) -> Vec<String> {
        self.groups
            .iter()
            .flat_map(|g| g.metric_names(&self.seg_config))
            .collect()
    }

    /// Compute every configured group on one batch.
    pub fn measure(&self, batch: &Batch) -> Result<MetricResult> {
        for group in &self.groups {
            for &role in group.required_roles() {
                if !batch.contains(role) {
                    return Err(EvalError::missing_array(role.as_str()));
                }
            }
        }

        let mut result = MetricResult::default();
        for group in &self.groups {
            debug!(group = %group, "computing metric group");
            let group_result = match group {
                MetricGroup::DvfMetrics => dvf_metrics::<B>(batch, &self.device)?,
                MetricGroup::ImageMetrics => image_metrics::<B>(batch, &self.device)?,
                MetricGroup::SegMetrics => seg_metrics(batch, &self.seg_config)?,
            };
            result = result.merge(group_result)?;
        }
        Ok(result)
    }
}

/// ROI mask with its per-sample bounding boxes.
struct RegionOfInterest<'a> {
    mask: ArrayViewD<'a, f32>,
    boxes: Vec<BoundingBox>,
}

impl<'a> RegionOfInterest<'a> {
    fn from_batch(batch: &'a Batch) -> Result<Option<Self>> {
        let Some(mask) = batch.try_get(Role::RoiMask) else {
            return Ok(None);
        };
        let bounds = bbox_from_mask(mask.index_axis(Axis(1), 0))?;
        let empty = bounds.iter().filter(|b| !b.non_empty).count();
        if empty > 0 {
            warn!(
                empty,
                total = bounds.len(),
                "ROI mask is empty for some samples; using the full extent"
            );
        }
        Ok(Some(Self {
            mask: mask.view(),
            boxes: bounds.into_iter().map(|b| b.bbox).collect(),
        }))
    }

    /// Zero values outside the mask, then crop each sample to its box.
    fn restrict(&self, array: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>> {
        let masked = apply_mask(array.view(), self.mask.view())?;
        bbox_crop(masked.view(), &self.boxes)
    }
}

/// Split a batch array into per-sample `(C, *spatial)` arrays, restricted to the ROI if any.
fn samples(roi: Option<&RegionOfInterest<'_>>, array: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>> {
    match roi {
        Some(roi) => roi.restrict(array),
        None => Ok(array.outer_iter().map(|s| s.to_owned()).collect()),
    }
}

fn views(arrays: &[ArrayD<f32>]) -> Vec<ArrayViewD<'_, f32>> {
    arrays.iter().map(|a| a.view()).collect()
}

/// Displacement accuracy and regularity of `dvf_pred` against `dvf_gt`.
pub fn dvf_metrics<B: Backend>(batch: &Batch, device: &B::Device) -> Result<MetricResult> {
    let roi = RegionOfInterest::from_batch(batch)?;
    let pred = samples(roi.as_ref(), batch.get(Role::DvfPred)?)?;
    let gt = samples(roi.as_ref(), batch.get(Role::DvfGt)?)?;
    let (pred, gt) = (views(&pred), views(&gt));

    let jacobian = jacobian_metrics(&pred)?;
    MetricResult::from_entries([
        ("aee", average_endpoint_error::<B>(&pred, &gt, device)?),
        ("rmse_dvf", rmse_displacement::<B>(&pred, &gt, device)?),
        ("folding_ratio", jacobian.folding_ratio),
        ("mag_grad_jac_det", jacobian.mag_grad_jac_det),
    ])
}

/// Intensity RMSE of `target_pred` against `target`.
pub fn image_metrics<B: Backend>(batch: &Batch, device: &B::Device) -> Result<MetricResult> {
    let roi = RegionOfInterest::from_batch(batch)?;
    let pred = samples(roi.as_ref(), batch.get(Role::TargetPred)?)?;
    let target = samples(roi.as_ref(), batch.get(Role::Target)?)?;

    let rmse = rmse_intensity::<B>(&views(&pred), &views(&target), device)?;
    MetricResult::from_entries([("rmse", rmse)])
}

/// `(N, 1, H, W)` becomes one `(H, W, N)` stack; `(N, 1, H, W, D)` one
/// `(H, W, D)` stack per sample.
fn label_stacks(array: &ArrayD<f32>) -> Result<Vec<ArrayView3<'_, f32>>> {
    let labels = array.view().index_axis_move(Axis(1), 0);
    match labels.ndim() {
        3 => Ok(vec![to_stack(labels.permuted_axes(vec![1, 2, 0]))?]),
        4 => (0..labels.len_of(Axis(0)))
            .map(|n| to_stack(labels.clone().index_axis_move(Axis(0), n)))
            .collect(),
        n => Err(EvalError::dimension_mismatch(format!(
            "segmentation needs 2D or 3D label maps, got {} axes per channel",
            n
        ))),
    }
}

fn to_stack(view: ArrayViewD<'_, f32>) -> Result<ArrayView3<'_, f32>> {
    view.into_dimensionality::<Ix3>()
        .map_err(|e| EvalError::dimension_mismatch(e.to_string()))
}

/// Mean of the finite values; NaN if there are none.
fn finite_mean(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    finite.iter().sum::<f64>() / finite.len() as f64
}

/// Map degenerate input to a NaN marker; every other error propagates.
fn recover_degenerate<T>(result: Result<T>, fallback: T, what: &str) -> Result<T> {
    match result {
        Err(e) if e.kind() == ErrorKind::DegenerateInput => {
            warn!(metric = what, error = %e, "degenerate input; recording NaN");
            Ok(fallback)
        }
        other => other,
    }
}

/// Dice and contour distances between `target_seg` and `warped_source_seg`
/// for every configured label.
pub fn seg_metrics(batch: &Batch, config: &SegmentationConfig) -> Result<MetricResult> {
    let target = batch.get(Role::TargetSeg)?;
    let warped = batch.get(Role::WarpedSourceSeg)?;
    let target_stacks = label_stacks(target)?;
    let warped_stacks = label_stacks(warped)?;

    let mut entries = Vec::with_capacity(4 * config.labels.len());
    for &label in &config.labels {
        let mut dice_slice = Vec::new();
        let mut dice_volume = Vec::new();
        let mut mcd = Vec::new();
        let mut hd = Vec::new();

        for (a, b) in target_stacks.iter().zip(&warped_stacks) {
            let slice = dice_per_slice(a.view(), b.view(), label);
            dice_slice.push(recover_degenerate(slice, f64::NAN, "dice_slice")?);
            let volume = dice_volumetric(a.view(), b.view(), label);
            dice_volume.push(recover_degenerate(volume, f64::NAN, "dice_volume")?);
            let contour = contour_distance_stack(a.view(), b.view(), label, config.pixel_spacing)
                .map(|d| (d.mean, d.hausdorff));
            let (mean, hausdorff) =
                recover_degenerate(contour, (f64::NAN, f64::NAN), "contour_distance")?;
            mcd.push(mean);
            hd.push(hausdorff);
        }

        entries.push((format!("dice_slice_{label}"), finite_mean(&dice_slice)));
        entries.push((format!("dice_volume_{label}"), finite_mean(&dice_volume)));
        entries.push((format!("mcd_{label}"), finite_mean(&mcd)));
        entries.push((format!("hd_{label}"), finite_mean(&hd)));
    }
    MetricResult::from_entries(entries)
}
