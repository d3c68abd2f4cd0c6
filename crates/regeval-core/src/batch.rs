//! Named arrays evaluated together.
//!
//! A [`Batch`] holds the arrays produced for one subject, keyed by [`Role`].
//! Every array uses the layout `(N, C, *spatial)`: sample axis first, then a
//! channel axis (1 for images, masks and label maps; the spatial rank for
//! displacement fields), then 2 or 3 spatial axes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ndarray::ArrayD;

use crate::error::{EvalError, Result};

/// Role of an array inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Target,
    Source,
    TargetPred,
    WarpedSource,
    DvfPred,
    DvfGt,
    RoiMask,
    SourceSeg,
    WarpedSourceSeg,
    TargetSeg,
}

impl Role {
    /// All roles, in canonical order.
    pub const ALL: [Role; 10] = [
        Role::Target,
        Role::Source,
        Role::TargetPred,
        Role::WarpedSource,
        Role::DvfPred,
        Role::DvfGt,
        Role::RoiMask,
        Role::SourceSeg,
        Role::WarpedSourceSeg,
        Role::TargetSeg,
    ];

    /// Name used for file stems and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Target => "target",
            Role::Source => "source",
            Role::TargetPred => "target_pred",
            Role::WarpedSource => "warped_source",
            Role::DvfPred => "dvf_pred",
            Role::DvfGt => "dvf_gt",
            Role::RoiMask => "roi_mask",
            Role::SourceSeg => "source_seg",
            Role::WarpedSourceSeg => "warped_source_seg",
            Role::TargetSeg => "target_seg",
        }
    }

    /// Whether the channel axis holds displacement components.
    pub fn is_displacement(&self) -> bool {
        matches!(self, Role::DvfPred | Role::DvfGt)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        Role::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| EvalError::invalid_configuration(format!("unknown array role '{}'", s)))
    }
}

/// Arrays of one evaluated subject, keyed by role.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    arrays: BTreeMap<Role, ArrayD<f32>>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an array, checking it against the layout of the arrays already held.
    ///
    /// # Errors
    /// * `DimensionMismatch` if the array does not have 2 or 3 spatial axes,
    ///   or its channel count does not fit the role.
    /// * `ShapeMismatch` if its sample count or spatial extent differs from
    ///   arrays already in the batch.
    pub fn insert(&mut self, role: Role, array: ArrayD<f32>) -> Result<()> {
        let shape = array.shape();
        if shape.len() != 4 && shape.len() != 5 {
            return Err(EvalError::dimension_mismatch(format!(
                "'{}' must have layout (N, C, *spatial) with 2 or 3 spatial axes, got shape {:?}",
                role, shape
            )));
        }

        let spatial_rank = shape.len() - 2;
        let expected_channels = if role.is_displacement() { spatial_rank } else { 1 };
        if shape[1] != expected_channels {
            return Err(EvalError::dimension_mismatch(format!(
                "'{}' must have {} channel(s), got {}",
                role, expected_channels, shape[1]
            )));
        }

        if let Some((_, existing)) = self.arrays.iter().next() {
            let expected = sample_and_spatial(existing.shape());
            let actual = sample_and_spatial(shape);
            if expected != actual {
                return Err(EvalError::ShapeMismatch { expected, actual });
            }
        }

        self.arrays.insert(role, array);
        Ok(())
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, role: Role, array: ArrayD<f32>) -> Result<Self> {
        self.insert(role, array)?;
        Ok(self)
    }

    /// Get the array for a role.
    pub fn get(&self, role: Role) -> Result<&ArrayD<f32>> {
        self.arrays
            .get(&role)
            .ok_or_else(|| EvalError::missing_array(role.as_str()))
    }

    /// Get the array for a role if present.
    pub fn try_get(&self, role: Role) -> Option<&ArrayD<f32>> {
        self.arrays.get(&role)
    }

    pub fn contains(&self, role: Role) -> bool {
        self.arrays.contains_key(&role)
    }

    /// Roles present in this batch.
    pub fn roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.arrays.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// Number of samples (leading axis), if any array is held.
    pub fn num_samples(&self) -> Option<usize> {
        self.arrays.values().next().map(|a| a.shape()[0])
    }

    /// Spatial extent shared by all arrays, if any array is held.
    pub fn spatial_shape(&self) -> Option<&[usize]> {
        self.arrays.values().next().map(|a| &a.shape()[2..])
    }
}

fn sample_and_spatial(shape: &[usize]) -> Vec<usize> {
    std::iter::once(shape[0])
        .chain(shape[2..].iter().copied())
        .collect()
}

/// Provider of per-subject batches.
///
/// Implemented by loaders that turn stored outputs into [`Batch`]es; the
/// analysis runner only relies on this trait.
pub trait BatchSource {
    /// Identifiers of all available subjects.
    fn subject_ids(&self) -> Result<Vec<String>>;

    /// Load the batch of one subject.
    fn load(&self, subject_id: &str) -> Result<Batch>;
}
