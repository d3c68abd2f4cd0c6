//! Per-subject directories of NIfTI outputs.
//!
//! Layout: `<root>/<subject>/<role>.nii[.gz]`, one file per [`Role`].
//! Arrays are stored the way inference writes them and reshaped to the
//! batch layout `(N, C, *spatial)` on load:
//!
//! | stored                     | batch               |
//! |----------------------------|---------------------|
//! | 2D DVF `(H, W, N, 2)`      | `(N, 2, H, W)`      |
//! | 2D other `(H, W, N)`       | `(N, 1, H, W)`      |
//! | 3D DVF `(H, W, D, 3)`      | `(1, 3, H, W, D)`   |
//! | 3D other `(H, W, D)`       | `(1, 1, H, W, D)`   |
//!
//! The dimensionality is taken from the trailing axis of `dvf_pred` (or
//! `dvf_gt`) unless set explicitly.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use ndarray::{ArrayD, Axis};
use regeval_core::{Batch, BatchSource, EvalError, Result, Role};
use tracing::debug;

use crate::nifti_io::read_nifti_array;

/// [`BatchSource`] over a directory of subject directories.
#[derive(Debug, Clone)]
pub struct SubjectDirectory {
    root: PathBuf,
    spatial_dims: Option<usize>,
}

impl SubjectDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            spatial_dims: None,
        }
    }

    /// Fix the dimensionality (2 or 3) instead of inferring it from the DVF.
    pub fn with_spatial_dims(mut self, dims: usize) -> Result<Self> {
        if !(2..=3).contains(&dims) {
            return Err(EvalError::invalid_configuration(format!(
                "spatial dimensionality must be 2 or 3, got {}",
                dims
            )));
        }
        self.spatial_dims = Some(dims);
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn list_subjects(&self) -> anyhow::Result<Vec<String>> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list subjects in {}", self.root.display()))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn load_subject(&self, subject_id: &str) -> anyhow::Result<Batch> {
        let dir = self.root.join(subject_id);
        let mut stored = BTreeMap::new();
        let entries =
            fs::read_dir(&dir).with_context(|| format!("Failed to list {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            let Some(stem) = nifti_stem(&path) else {
                debug!(file = %path.display(), "ignoring non-NIfTI file");
                continue;
            };
            match stem.parse::<Role>() {
                Ok(role) => {
                    let array = read_nifti_array(&path)?;
                    debug!(
                        subject = subject_id,
                        role = %role,
                        shape = ?array.shape(),
                        "loaded array"
                    );
                    stored.insert(role, array);
                }
                Err(_) => debug!(file = %path.display(), "ignoring file with unknown role"),
            }
        }
        if stored.is_empty() {
            bail!("no arrays found in {}", dir.display());
        }

        let dims = match self.spatial_dims {
            Some(dims) => dims,
            None => infer_spatial_dims(&stored)?,
        };

        let mut batch = Batch::new();
        for (role, array) in stored {
            let reshaped = to_batch_layout(array, role, dims)
                .with_context(|| format!("Invalid '{}' array", role))?;
            batch
                .insert(role, reshaped)
                .map_err(|e| anyhow!(e).context(format!("Inconsistent '{}' array", role)))?;
        }
        Ok(batch)
    }
}

impl BatchSource for SubjectDirectory {
    fn subject_ids(&self) -> Result<Vec<String>> {
        self.list_subjects().map_err(|e| EvalError::load(format!("{e:#}")))
    }

    fn load(&self, subject_id: &str) -> Result<Batch> {
        self.load_subject(subject_id)
            .with_context(|| format!("Failed to load subject '{}'", subject_id))
            .map_err(|e| EvalError::load(format!("{e:#}")))
    }
}

/// File name without `.nii` / `.nii.gz`, or `None` for other files.
fn nifti_stem(path: &Path) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    name.strip_suffix(".nii.gz").or_else(|| name.strip_suffix(".nii"))
}

fn infer_spatial_dims(stored: &BTreeMap<Role, ArrayD<f32>>) -> anyhow::Result<usize> {
    let dvf = stored
        .get(&Role::DvfPred)
        .or_else(|| stored.get(&Role::DvfGt))
        .ok_or_else(|| anyhow!("cannot infer 2D/3D layout without a dvf_pred or dvf_gt array"))?;
    let dims = dvf.shape().last().copied().unwrap_or(0);
    if !(2..=3).contains(&dims) {
        bail!("displacement field has {} components, expected 2 or 3", dims);
    }
    Ok(dims)
}

fn to_batch_layout(array: ArrayD<f32>, role: Role, dims: usize) -> anyhow::Result<ArrayD<f32>> {
    let shape = array.shape().to_vec();
    let reshaped = match (dims, role.is_displacement()) {
        // (H, W, N, 2) -> (N, 2, H, W)
        (2, true) if shape.len() == 4 && shape[3] == 2 => array.permuted_axes(vec![2, 3, 0, 1]),
        // (H, W, N) -> (N, 1, H, W)
        (2, false) if shape.len() == 3 => array.permuted_axes(vec![2, 0, 1]).insert_axis(Axis(1)),
        // (H, W, D, 3) -> (1, 3, H, W, D)
        (3, true) if shape.len() == 4 && shape[3] == 3 => {
            array.permuted_axes(vec![3, 0, 1, 2]).insert_axis(Axis(0))
        }
        // (H, W, D) -> (1, 1, H, W, D)
        (3, false) if shape.len() == 3 => array.insert_axis(Axis(0)).insert_axis(Axis(0)),
        _ => bail!("stored shape {:?} does not fit a {}D subject", shape, dims),
    };
    Ok(reshaped.as_standard_layout().into_owned())
}
