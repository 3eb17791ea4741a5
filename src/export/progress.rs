//! Progress tracking for export runs
//!
//! Shows delivered records against the record count reported when the run
//! is initialized. The tracker is shared by every deliverer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};

/// Progress tracker for export runs
///
/// Tracks delivered records and displays a progress bar with throughput.
pub struct ProgressTracker {
    /// Number of records delivered so far
    processed: AtomicU64,
    /// Start time of the run
    start_time: Instant,
    /// Progress bar (optional, can be disabled)
    bar: Option<ProgressBar>,
}

impl ProgressTracker {
    /// Create a new progress tracker
    ///
    /// # Arguments
    /// * `enable_bar` - Whether to display a progress bar
    ///
    /// The bar starts as a spinner and switches to a bounded bar once
    /// [`ProgressTracker::set_total`] is called.
    pub fn new(enable_bar: bool) -> Self {
        let bar = if enable_bar {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) =
                ProgressStyle::default_spinner().template("{spinner:.green} {pos} records {msg}")
            {
                bar.set_style(style);
            }
            Some(bar)
        } else {
            None
        };

        Self {
            processed: AtomicU64::new(0),
            start_time: Instant::now(),
            bar,
        }
    }

    /// Set the expected number of records
    pub fn set_total(&self, total: u64) {
        if let Some(ref bar) = self.bar {
            bar.set_length(total);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            {
                bar.set_style(style.progress_chars("#>-"));
            }
        }
    }

    /// Update progress with new count
    ///
    /// # Arguments
    /// * `count` - Total number of records delivered so far
    pub fn update(&self, count: u64) {
        self.processed.fetch_max(count, Ordering::Relaxed);

        if let Some(ref bar) = self.bar {
            bar.set_position(self.processed());

            let elapsed = self.start_time.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                let speed = count as f64 / elapsed;
                bar.set_message(format!("({:.0} records/sec)", speed));
            }
        }
    }

    /// Records delivered so far
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Finish and clear the progress bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}
