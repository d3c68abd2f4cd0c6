//! Error types for metric evaluation.
//!
//! Every fallible operation in the workspace returns [`EvalError`]. Variants
//! are grouped into coarse [`ErrorKind`]s so a cohort run can report how many
//! subjects failed and why.

use serde::Serialize;
use thiserror::Error;

/// Main error type for evaluation operations.
#[derive(Error, Debug)]
pub enum EvalError {
    /// Shape mismatch between inputs that must agree.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Unsupported or inconsistent number of axes / components.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Invalid configuration (unknown metric group, bad parameter).
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A metric group needs an array that the batch does not hold.
    #[error("Invalid configuration: batch has no '{role}' array")]
    MissingArray { role: String },

    /// Two metric groups produced the same metric name.
    #[error("Duplicate metric name: {0}")]
    DuplicateMetric(String),

    /// Empty mask or contour where one is required.
    #[error("Degenerate input: {0}")]
    DegenerateInput(String),

    /// A subject's metric names differ from previously collected subjects.
    #[error("Aggregation inconsistency: expected metrics {expected:?}, got {actual:?}")]
    AggregationInconsistency {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    /// The same subject was collected twice.
    #[error("Aggregation inconsistency: subject '{0}' already collected")]
    DuplicateSubject(String),

    /// Subject data could not be loaded.
    #[error("Load error: {0}")]
    Load(String),

    /// Failure while persisting results.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of [`EvalError`] used in run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ShapeMismatch,
    Configuration,
    DegenerateInput,
    AggregationInconsistency,
    Load,
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ShapeMismatch => "shape_mismatch",
            Self::Configuration => "configuration",
            Self::DegenerateInput => "degenerate_input",
            Self::AggregationInconsistency => "aggregation_inconsistency",
            Self::Load => "load",
            Self::Io => "io",
        };
        f.write_str(name)
    }
}

/// Result type for evaluation operations.
pub type Result<T> = std::result::Result<T, EvalError>;

impl EvalError {
    /// Create a shape mismatch error from two shapes.
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Create a dimension mismatch error.
    pub fn dimension_mismatch(msg: impl Into<String>) -> Self {
        Self::DimensionMismatch(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a missing array error.
    pub fn missing_array(role: impl Into<String>) -> Self {
        Self::MissingArray { role: role.into() }
    }

    /// Create a degenerate input error.
    pub fn degenerate_input(msg: impl Into<String>) -> Self {
        Self::DegenerateInput(msg.into())
    }

    /// Create a load error.
    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ShapeMismatch { .. } | Self::DimensionMismatch(_) => ErrorKind::ShapeMismatch,
            Self::InvalidConfiguration(_)
            | Self::MissingArray { .. }
            | Self::DuplicateMetric(_) => ErrorKind::Configuration,
            Self::DegenerateInput(_) => ErrorKind::DegenerateInput,
            Self::AggregationInconsistency { .. } | Self::DuplicateSubject(_) => {
                ErrorKind::AggregationInconsistency
            }
            Self::Load(_) => ErrorKind::Load,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}
