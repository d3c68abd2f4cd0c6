use anyhow::{Context, Result};
use burn_ndarray::NdArray;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use regeval_core::EvalError;
use regeval_io::SubjectDirectory;
use regeval_metrics::{
    run_analysis, AnalysisConfig, ConsoleProgressCallback, FailurePolicy, MetricDispatcher,
    MetricGroup, MetricReporter, ProgressCallback, ProgressInfo, ProgressTracker, RunSummary,
    SegmentationConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

type Backend = NdArray<f32>;

#[derive(Parser)]
#[command(name = "regeval")]
#[command(about = "Evaluate deformable registration outputs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute metrics for every subject directory and write the cohort report
    Analyse {
        /// Directory holding one sub-directory of NIfTI outputs per subject
        #[arg(short, long)]
        input: PathBuf,

        /// Directory for mean_std.csv, metric_results.csv and run_summary.json
        #[arg(short, long)]
        output: PathBuf,

        /// Metric groups to compute, in order
        #[arg(
            short,
            long,
            num_args = 1..,
            default_values = ["dvf_metrics", "image_metrics", "seg_metrics"]
        )]
        metric_groups: Vec<String>,

        /// Segmentation labels to evaluate
        #[arg(long, num_args = 1.., default_values_t = vec![1u32, 2, 3])]
        labels: Vec<u32>,

        /// Physical pixel size applied to contour distances
        #[arg(long, default_value_t = 1.0)]
        pixel_spacing: f64,

        /// Spatial dimensionality (2 or 3); inferred from the DVF when omitted
        #[arg(long)]
        dims: Option<usize>,

        /// What to do when a subject fails (abort or skip)
        #[arg(long, default_value = "abort")]
        on_error: FailurePolicy,

        /// Evaluate subjects in parallel
        #[arg(long)]
        parallel: bool,

        /// Log progress instead of drawing a progress bar
        #[arg(long)]
        no_progress_bar: bool,
    },

    /// List metric groups and the metrics they produce
    ListGroups {
        /// Segmentation labels used to name the segmentation metrics
        #[arg(long, num_args = 1.., default_values_t = vec![1u32, 2, 3])]
        labels: Vec<u32>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyse {
            input,
            output,
            metric_groups,
            labels,
            pixel_spacing,
            dims,
            on_error,
            parallel,
            no_progress_bar,
        } => {
            let seg_config = SegmentationConfig::default()
                .with_labels(labels)
                .with_pixel_spacing(pixel_spacing);
            let config = AnalysisConfig::default()
                .with_failure_policy(on_error)
                .with_parallel(parallel);
            let summary = analyse(
                &input,
                &output,
                &metric_groups,
                seg_config,
                dims,
                &config,
                !no_progress_bar,
            )?;
            if summary.aborted {
                anyhow::bail!(
                    "Analysis aborted after {} failed subject(s); see {}",
                    summary.failed(),
                    output.join(regeval_metrics::RUN_SUMMARY_FILE).display()
                );
            }
        }
        Commands::ListGroups { labels } => {
            list_groups(labels);
        }
    }

    Ok(())
}

fn analyse(
    input: &Path,
    output: &Path,
    metric_groups: &[String],
    seg_config: SegmentationConfig,
    dims: Option<usize>,
    config: &AnalysisConfig,
    progress_bar: bool,
) -> Result<RunSummary> {
    // Configuration errors surface before any subject is read.
    let device = Default::default();
    let dispatcher = MetricDispatcher::<Backend>::new(metric_groups, seg_config, device)?;

    let mut source = SubjectDirectory::new(input);
    if let Some(dims) = dims {
        source = source.with_spatial_dims(dims)?;
    }

    info!("Input: {}", input.display());
    info!("Output: {}", output.display());
    info!("Metrics: {}", dispatcher.metric_names().join(", "));

    let mut tracker = ProgressTracker::new();
    if progress_bar {
        tracker.add_callback(Arc::new(BarProgress::new()?));
    } else {
        tracker.add_callback(Arc::new(ConsoleProgressCallback::new(10)));
    }

    let mut reporter = MetricReporter::new(output);
    let summary = run_analysis(&source, &dispatcher, &mut reporter, config, &tracker)?;

    let summary_path = summary.save(output).context("Failed to write run summary")?;
    info!("Run summary written to {}", summary_path.display());

    if summary.aborted {
        warn!("Run aborted; metric tables not written");
        return Ok(summary);
    }
    for failure in &summary.failures {
        warn!("Skipped {} ({}): {}", failure.subject, failure.kind, failure.message);
    }

    let artifacts = reporter.finish().context("Failed to write metric report")?;
    info!("Summary table: {}", artifacts.mean_std_csv.display());
    info!("Subject table: {}", artifacts.table_csv.display());
    info!(
        "Processed {}/{} subjects ({} failed)",
        summary.processed,
        summary.total,
        summary.failed()
    );
    Ok(summary)
}

fn list_groups(labels: Vec<u32>) {
    let seg_config = SegmentationConfig::default().with_labels(labels);
    println!("Available metric groups:");
    for group in MetricGroup::ALL {
        let roles: Vec<&str> = group.required_roles().iter().map(|r| r.as_str()).collect();
        println!();
        println!("  {:<14} needs: {}", group.as_str(), roles.join(", "));
        println!(
            "  {:<14} metrics: {}",
            "",
            group.metric_names(&seg_config).join(", ")
        );
    }
}

/// Progress bar over subjects.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Result<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg} ({eta})",
                )?
                .progress_chars("#>-"),
        );
        Ok(Self { bar })
    }
}

impl ProgressCallback for BarProgress {
    fn on_start(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn on_progress(&self, info: &ProgressInfo) {
        self.bar.set_position(info.completed as u64);
        self.bar.set_message(info.subject.clone());
    }

    fn on_error(&self, subject: &str, error: &EvalError) {
        self.bar.println(format!("{} failed ({}): {}", subject, error.kind(), error));
    }

    fn on_complete(&self, summary: &RunSummary) {
        if summary.aborted {
            self.bar.abandon_with_message("aborted");
        } else {
            self.bar.finish_with_message("done");
        }
    }
}
