//! Cohort-level aggregation of per-subject metric results.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use regeval_core::{EvalError, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::group::MetricResult;

/// File name of the per-metric summary table.
pub const MEAN_STD_FILE: &str = "mean_std.csv";
/// File name of the per-subject table.
pub const TABLE_FILE: &str = "metric_results.csv";
/// Marker written for missing (NaN) values.
pub const MISSING: &str = "NA";

/// Summary statistics of one metric over the cohort.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub metric: String,
    /// Mean of the finite values (NaN if none)
    pub mean: f64,
    /// Sample standard deviation (N-1) of the finite values (NaN if fewer than two)
    pub std: f64,
    /// Number of finite values
    pub count: usize,
}

/// Paths written by [`MetricReporter::finish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifacts {
    pub mean_std_csv: PathBuf,
    pub table_csv: PathBuf,
}

/// Accumulates one [`MetricResult`] per subject.
///
/// The first collected result fixes the metric names and column order;
/// every later result must carry exactly the same names.
#[derive(Debug)]
pub struct MetricReporter {
    save_dir: PathBuf,
    metric_names: Option<Vec<String>>,
    rows: BTreeMap<String, MetricResult>,
}

impl MetricReporter {
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: save_dir.into(),
            metric_names: None,
            rows: BTreeMap::new(),
        }
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// Metric names fixed by the first collected result.
    pub fn metric_names(&self) -> Option<&[String]> {
        self.metric_names.as_deref()
    }

    /// Number of collected subjects.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Collected subject ids in sorted order.
    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(|s| s.as_str())
    }

    /// Add one subject's result.
    ///
    /// # Errors
    /// `AggregationInconsistency` if the metric names differ from earlier
    /// results, `DuplicateSubject` if the subject was already collected.
    /// On error the reporter is left unchanged.
    pub fn collect(&mut self, subject_id: impl Into<String>, result: MetricResult) -> Result<()> {
        let subject_id = subject_id.into();
        if self.rows.contains_key(&subject_id) {
            return Err(EvalError::DuplicateSubject(subject_id));
        }

        if let Some(expected) = &self.metric_names {
            let mut want: Vec<&str> = expected.iter().map(|s| s.as_str()).collect();
            let mut got: Vec<&str> = result.names().collect();
            want.sort_unstable();
            got.sort_unstable();
            if want != got {
                return Err(EvalError::AggregationInconsistency {
                    expected: expected.clone(),
                    actual: result.names().map(String::from).collect(),
                });
            }
        } else {
            self.metric_names = Some(result.names().map(String::from).collect());
        }

        debug!(subject = %subject_id, metrics = result.len(), "collected metric result");
        self.rows.insert(subject_id, result);
        Ok(())
    }

    /// Mean, sample standard deviation and finite count per metric.
    pub fn summarise(&self) -> Vec<MetricSummary> {
        let Some(names) = &self.metric_names else {
            return Vec::new();
        };
        names
            .iter()
            .map(|name| {
                let values: Vec<f64> = self
                    .rows
                    .values()
                    .filter_map(|r| r.get(name))
                    .filter(|v| v.is_finite())
                    .collect();
                let (mean, std) = mean_std(&values);
                MetricSummary {
                    metric: name.clone(),
                    mean,
                    std,
                    count: values.len(),
                }
            })
            .collect()
    }

    /// Write the summary table; returns its path.
    pub fn save_mean_std(&self) -> Result<PathBuf> {
        let mut out = String::from("metric,mean,std,count\n");
        for s in self.summarise() {
            out.push_str(&format!(
                "{},{},{},{}\n",
                csv_escape(&s.metric),
                format_value(s.mean),
                format_value(s.std),
                s.count
            ));
        }
        self.write_file(MEAN_STD_FILE, &out)
    }

    /// Write the per-subject table, one row per subject in sorted order; returns its path.
    pub fn save_table(&self) -> Result<PathBuf> {
        let names = self.metric_names.as_deref().unwrap_or(&[]);
        let mut out = String::from("subject");
        for name in names {
            out.push(',');
            out.push_str(&csv_escape(name));
        }
        out.push('\n');

        for (subject, result) in &self.rows {
            out.push_str(&csv_escape(subject));
            for name in names {
                out.push(',');
                out.push_str(&format_value(result.get(name).unwrap_or(f64::NAN)));
            }
            out.push('\n');
        }
        self.write_file(TABLE_FILE, &out)
    }

    /// Write both tables and release the collected results.
    pub fn finish(self) -> Result<ReportArtifacts> {
        let artifacts = ReportArtifacts {
            mean_std_csv: self.save_mean_std()?,
            table_csv: self.save_table()?,
        };
        info!(
            subjects = self.rows.len(),
            dir = %self.save_dir.display(),
            "metric report written"
        );
        Ok(artifacts)
    }

    fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.save_dir)?;
        let path = self.save_dir.join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    if n < 2 {
        return (mean, f64::NAN);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    (mean, var.sqrt())
}

/// Non-finite values (NaN, ±inf) are written as [`MISSING`].
fn format_value(value: f64) -> String {
    if !value.is_finite() {
        MISSING.to_string()
    } else {
        value.to_string()
    }
}

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
