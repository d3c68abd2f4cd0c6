//! Cohort analysis runner.
//!
//! Loads every subject from a [`BatchSource`], measures it with a
//! [`MetricDispatcher`] and collects the results into a [`MetricReporter`].
//! Subjects are evaluated independently, optionally on the rayon pool, but
//! always collected in sorted subject order so the report does not depend
//! on completion order.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use burn::tensor::backend::Backend;
use rayon::prelude::*;
use regeval_core::{BatchSource, ErrorKind, EvalError, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::group::{MetricDispatcher, MetricResult};
use crate::progress::ProgressTracker;
use crate::reporter::MetricReporter;

/// File name of the serialized [`RunSummary`].
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

/// What to do when a subject fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failed subject.
    #[default]
    Abort,
    /// Record the failure and continue with the remaining subjects.
    Skip,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Skip => "skip",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            other => Err(EvalError::invalid_configuration(format!(
                "unknown failure policy '{}' (expected abort or skip)",
                other
            ))),
        }
    }
}

/// Configuration of an analysis run.
#[derive(Debug, Clone, Default)]
pub struct AnalysisConfig {
    /// Failure handling
    pub failure_policy: FailurePolicy,
    /// Evaluate subjects on the rayon thread pool
    pub parallel: bool,
}

impl AnalysisConfig {
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// One failed subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectFailure {
    pub subject: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl SubjectFailure {
    fn new(subject: &str, error: &EvalError) -> Self {
        Self {
            subject: subject.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Outcome of an analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Subjects offered by the source
    pub total: usize,
    /// Subjects whose results were collected
    pub processed: usize,
    /// Failed subjects, in subject order. A parallel run evaluates every
    /// subject before collecting, so after an abort it still lists the
    /// failures that follow the first one.
    pub failures: Vec<SubjectFailure>,
    /// Whether the run stopped early under [`FailurePolicy::Abort`]
    pub aborted: bool,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Subjects neither collected nor failed: never reached after an abort,
    /// or evaluated in parallel after it without being collected.
    pub fn not_run(&self) -> usize {
        self.total.saturating_sub(self.processed + self.failed())
    }

    /// Number of failures per error kind.
    pub fn failure_counts(&self) -> BTreeMap<ErrorKind, usize> {
        let mut counts = BTreeMap::new();
        for failure in &self.failures {
            *counts.entry(failure.kind).or_insert(0) += 1;
        }
        counts
    }

    /// True when every subject was collected.
    pub fn is_success(&self) -> bool {
        !self.aborted && self.failures.is_empty()
    }

    /// Write the summary as pretty JSON into `dir`; returns the file path.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(RUN_SUMMARY_FILE);
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::from)?;
        fs::write(&path, json)?;
        Ok(path)
    }
}

/// Evaluate every subject of `source` and collect the results into `reporter`.
///
/// Returns `Ok` with the run summary even when subjects failed; only
/// failures to list the subjects are returned as errors.
pub fn run_analysis<B, S>(
    source: &S,
    dispatcher: &MetricDispatcher<B>,
    reporter: &mut MetricReporter,
    config: &AnalysisConfig,
    progress: &ProgressTracker,
) -> Result<RunSummary>
where
    B: Backend,
    S: BatchSource + Sync,
{
    let mut ids = source.subject_ids()?;
    ids.sort();
    let before = ids.len();
    ids.dedup();
    if ids.len() != before {
        warn!(duplicates = before - ids.len(), "source listed duplicate subject ids");
    }

    info!(
        subjects = ids.len(),
        groups = ?dispatcher.groups(),
        policy = %config.failure_policy,
        parallel = config.parallel,
        "starting analysis"
    );
    progress.start(ids.len());

    let evaluate = |id: &String| -> Result<MetricResult> {
        let result = source.load(id).and_then(|batch| dispatcher.measure(&batch));
        progress.subject_done(id, result.is_ok());
        result
    };

    let mut summary = RunSummary {
        total: ids.len(),
        ..Default::default()
    };

    if config.parallel {
        let results: Vec<Result<MetricResult>> = ids.par_iter().map(evaluate).collect();
        for (id, result) in ids.iter().zip(results) {
            if !summary.aborted {
                record(id, result, reporter, config, progress, &mut summary);
            } else if let Err(error) = result {
                // every subject already ran; list later failures but collect nothing
                progress.error(id, &error);
                summary.failures.push(SubjectFailure::new(id, &error));
            }
        }
    } else {
        for id in &ids {
            if !record(id, evaluate(id), reporter, config, progress, &mut summary) {
                break;
            }
        }
    }

    info!(
        processed = summary.processed,
        failed = summary.failed(),
        aborted = summary.aborted,
        "analysis finished"
    );
    progress.complete(&summary);
    Ok(summary)
}

/// Collect one subject's outcome. Returns false when the run must stop.
fn record(
    id: &str,
    result: Result<MetricResult>,
    reporter: &mut MetricReporter,
    config: &AnalysisConfig,
    progress: &ProgressTracker,
    summary: &mut RunSummary,
) -> bool {
    let error = match result.and_then(|r| reporter.collect(id, r)) {
        Ok(()) => {
            debug!(subject = id, "subject collected");
            summary.processed += 1;
            return true;
        }
        Err(e) => e,
    };

    progress.error(id, &error);
    summary.failures.push(SubjectFailure::new(id, &error));
    match config.failure_policy {
        FailurePolicy::Skip => {
            warn!(subject = id, kind = %error.kind(), "skipping failed subject: {}", error);
            true
        }
        FailurePolicy::Abort => {
            summary.aborted = true;
            false
        }
    }
}
