use std::collections::BTreeMap;
use std::fs;

use burn_ndarray::NdArray;
use ndarray::{ArrayD, IxDyn};
use regeval_core::{Batch, BatchSource, EvalError, Result, Role};
use regeval_metrics::{
    run_analysis, AnalysisConfig, FailurePolicy, MetricDispatcher, MetricReporter, ProgressTracker,
    SegmentationConfig,
};

type B = NdArray<f32>;

struct Cohort(BTreeMap<String, Batch>);

impl BatchSource for Cohort {
    fn subject_ids(&self) -> Result<Vec<String>> {
        Ok(self.0.keys().cloned().collect())
    }

    fn load(&self, subject_id: &str) -> Result<Batch> {
        self.0
            .get(subject_id)
            .cloned()
            .ok_or_else(|| EvalError::load(subject_id))
    }
}

/// 2D subject with two samples: a constant DVF error, a one-unit image error
/// and a square segmentation shifted by `shift` columns.
fn subject(dvf_error: f32, shift: usize) -> Batch {
    let shape = [2, 1, 10, 10];
    let square = |offset: usize| {
        ArrayD::from_shape_fn(IxDyn(&shape), |idx| {
            let (i, j) = (idx[2], idx[3]);
            if (3..6).contains(&i) && (2 + offset..5 + offset).contains(&j) {
                1.0
            } else {
                0.0
            }
        })
    };

    Batch::new()
        .with(Role::DvfGt, ArrayD::zeros(IxDyn(&[2, 2, 10, 10])))
        .unwrap()
        .with(Role::DvfPred, ArrayD::from_elem(IxDyn(&[2, 2, 10, 10]), dvf_error))
        .unwrap()
        .with(Role::Target, ArrayD::zeros(IxDyn(&shape)))
        .unwrap()
        .with(Role::TargetPred, ArrayD::ones(IxDyn(&shape)))
        .unwrap()
        .with(Role::TargetSeg, square(0))
        .unwrap()
        .with(Role::WarpedSourceSeg, square(shift))
        .unwrap()
}

fn dispatcher() -> MetricDispatcher<B> {
    MetricDispatcher::new(
        &["dvf_metrics", "image_metrics", "seg_metrics"],
        SegmentationConfig::default().with_labels(vec![1]),
        Default::default(),
    )
    .unwrap()
}

#[test]
fn test_cohort_report_files() {
    let dir = tempfile::tempdir().unwrap();
    let cohort = Cohort(
        [("b".to_string(), subject(0.0, 0)), ("a".to_string(), subject(3.0, 2))]
            .into_iter()
            .collect(),
    );
    let mut reporter = MetricReporter::new(dir.path());

    let summary = run_analysis(
        &cohort,
        &dispatcher(),
        &mut reporter,
        &AnalysisConfig::default(),
        &ProgressTracker::new(),
    )
    .unwrap();
    assert!(summary.is_success());

    let artifacts = reporter.finish().unwrap();
    let table = fs::read_to_string(artifacts.table_csv).unwrap();
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(
        lines[0],
        "subject,aee,rmse_dvf,folding_ratio,mag_grad_jac_det,rmse,dice_slice_1,dice_volume_1,mcd_1,hd_1"
    );
    assert!(lines[1].starts_with("a,"));
    assert!(lines[2].starts_with("b,0,0,0,0,1,"));

    // Subject a: constant error of norm 3*sqrt(2) and a 2-column shift.
    let a: Vec<f64> = lines[1].split(',').skip(1).map(|v| v.parse().unwrap()).collect();
    assert!((a[0] - 3.0 * 2f64.sqrt()).abs() < 1e-5);
    assert!((a[6] - 1.0 / 3.0).abs() < 1e-12);
    assert!((a[8] - 2.0).abs() < 1e-12);

    let mean_std = fs::read_to_string(artifacts.mean_std_csv).unwrap();
    assert_eq!(mean_std.lines().count(), 10);
    assert!(mean_std.lines().any(|l| l == "rmse,1,0,2"));

    let summary_path = summary.save(dir.path()).unwrap();
    assert!(summary_path.ends_with("run_summary.json"));
}

#[test]
fn test_missing_role_fails_subject() {
    let mut incomplete = subject(1.0, 0);
    incomplete = Batch::new()
        .with(Role::Target, incomplete.get(Role::Target).unwrap().clone())
        .unwrap();
    let cohort = Cohort(
        [("ok".to_string(), subject(1.0, 1)), ("broken".to_string(), incomplete)]
            .into_iter()
            .collect(),
    );
    let mut reporter = MetricReporter::new("unused");

    let summary = run_analysis(
        &cohort,
        &dispatcher(),
        &mut reporter,
        &AnalysisConfig::default().with_failure_policy(FailurePolicy::Skip).with_parallel(true),
        &ProgressTracker::new(),
    )
    .unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].subject, "broken");
    assert_eq!(summary.failures[0].kind.to_string(), "configuration");
    assert_eq!(reporter.subjects().collect::<Vec<_>>(), vec!["ok"]);
}
