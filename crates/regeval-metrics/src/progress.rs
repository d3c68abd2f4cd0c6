//! Progress tracking and callbacks for cohort analysis.
//!
//! The analysis runner reports one [`ProgressInfo`] per finished subject.
//! Callbacks must be `Send + Sync` because subjects may be evaluated on a
//! rayon pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use regeval_core::EvalError;

use crate::analysis::RunSummary;

/// Progress information for one finished subject.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Number of subjects finished so far, including this one.
    pub completed: usize,
    /// Total number of subjects in the run.
    pub total: usize,
    /// Identifier of the subject that just finished.
    pub subject: String,
    /// Whether the subject was measured without error.
    pub succeeded: bool,
    /// Time elapsed since the run started.
    pub elapsed: Duration,
    /// Estimated remaining time.
    pub estimated_remaining: Option<Duration>,
}

impl ProgressInfo {
    /// Create new progress information.
    pub fn new(
        completed: usize,
        total: usize,
        subject: impl Into<String>,
        succeeded: bool,
        elapsed: Duration,
    ) -> Self {
        Self {
            completed,
            total,
            subject: subject.into(),
            succeeded,
            elapsed,
            estimated_remaining: None,
        }
    }

    /// Calculate progress percentage.
    pub fn progress_percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.completed as f64 / self.total as f64) * 100.0
    }

    /// Calculate estimated remaining time.
    pub fn calculate_remaining(&mut self) {
        if self.completed > 0 {
            let avg_time_per_subject = self.elapsed.as_secs_f64() / self.completed as f64;
            let remaining = self.total.saturating_sub(self.completed);
            self.estimated_remaining = Some(Duration::from_secs_f64(
                avg_time_per_subject * remaining as f64,
            ));
        }
    }
}

/// Progress callback trait for monitoring an analysis run.
pub trait ProgressCallback: Send + Sync {
    /// Called each time a subject finishes.
    fn on_progress(&self, info: &ProgressInfo);

    /// Called when the run starts.
    fn on_start(&self, _total: usize) {}

    /// Called when a subject fails.
    fn on_error(&self, _subject: &str, _error: &EvalError) {}

    /// Called when the run ends, whether or not it aborted.
    fn on_complete(&self, _summary: &RunSummary) {}
}

/// Console progress callback that logs to tracing.
#[derive(Debug, Clone)]
pub struct ConsoleProgressCallback {
    /// Log interval (subjects), at least 1.
    log_interval: usize,
}

impl Default for ConsoleProgressCallback {
    fn default() -> Self {
        Self { log_interval: 10 }
    }
}

impl ConsoleProgressCallback {
    /// Create a new console progress callback.
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
        }
    }

    pub fn log_interval(&self) -> usize {
        self.log_interval
    }
}

impl ProgressCallback for ConsoleProgressCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        if info.completed % self.log_interval == 0 || info.completed == info.total {
            let remaining = info
                .estimated_remaining
                .map(|d| format!("{:.2}s", d.as_secs_f64()))
                .unwrap_or_else(|| "N/A".to_string());

            tracing::info!(
                "Subject {}/{} ({:.1}%) | last: {} | Elapsed: {:.2}s | ETA: {}",
                info.completed,
                info.total,
                info.progress_percent(),
                info.subject,
                info.elapsed.as_secs_f64(),
                remaining
            );
        }
    }

    fn on_start(&self, total: usize) {
        tracing::info!("Analysis started on {} subjects", total);
    }

    fn on_error(&self, subject: &str, error: &EvalError) {
        tracing::error!("Subject {} failed ({}): {}", subject, error.kind(), error);
    }

    fn on_complete(&self, summary: &RunSummary) {
        tracing::info!(
            "Analysis finished: {} processed, {} failed{}",
            summary.processed,
            summary.failed(),
            if summary.aborted { " (aborted)" } else { "" }
        );
    }
}

/// History callback that records all progress information.
#[derive(Debug, Clone, Default)]
pub struct HistoryCallback {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
}

impl HistoryCallback {
    /// Create a new history callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the recorded history.
    pub fn get_history(&self) -> Vec<ProgressInfo> {
        lock(&self.history).clone()
    }

    /// Clear the history.
    pub fn clear(&self) {
        lock(&self.history).clear();
    }
}

impl ProgressCallback for HistoryCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        lock(&self.history).push(info.clone());
    }
}

/// Progress tracker that fans events out to registered callbacks.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    callbacks: Vec<Arc<dyn ProgressCallback>>,
    start_time: Arc<Mutex<Option<Instant>>>,
    total: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl ProgressTracker {
    /// Create a new progress tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback.
    pub fn add_callback(&mut self, callback: Arc<dyn ProgressCallback>) {
        self.callbacks.push(callback);
    }

    /// Builder-style [`add_callback`](Self::add_callback).
    pub fn with_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.add_callback(callback);
        self
    }

    /// Start tracking a run over `total` subjects.
    pub fn start(&self, total: usize) {
        *lock(&self.start_time) = Some(Instant::now());
        self.total.store(total, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
        for callback in &self.callbacks {
            callback.on_start(total);
        }
    }

    /// Record one finished subject. Safe to call from several threads.
    pub fn subject_done(&self, subject: &str, succeeded: bool) {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let elapsed = self.elapsed();

        let mut info = ProgressInfo::new(
            completed,
            self.total.load(Ordering::SeqCst),
            subject,
            succeeded,
            elapsed,
        );
        info.calculate_remaining();

        for callback in &self.callbacks {
            callback.on_progress(&info);
        }
    }

    /// Report a failed subject.
    pub fn error(&self, subject: &str, error: &EvalError) {
        for callback in &self.callbacks {
            callback.on_error(subject, error);
        }
    }

    /// Complete tracking.
    pub fn complete(&self, summary: &RunSummary) {
        for callback in &self.callbacks {
            callback.on_complete(summary);
        }
    }

    fn elapsed(&self) -> Duration {
        let start_time = *lock(&self.start_time);
        start_time.map(|t| t.elapsed()).unwrap_or(Duration::ZERO)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
