pub mod analysis;
pub mod group;
pub mod metric;
pub mod progress;
pub mod reporter;

pub use analysis::{
    run_analysis, AnalysisConfig, FailurePolicy, RunSummary, SubjectFailure, RUN_SUMMARY_FILE,
};
pub use group::{
    dvf_metrics, image_metrics, seg_metrics, MetricDispatcher, MetricGroup, MetricResult,
    SegmentationConfig,
};
pub use progress::{
    ConsoleProgressCallback, HistoryCallback, ProgressCallback, ProgressInfo, ProgressTracker,
};
pub use reporter::{MetricReporter, MetricSummary, ReportArtifacts, MEAN_STD_FILE, TABLE_FILE};
