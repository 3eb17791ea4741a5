//! Handler that measures a run instead of writing records anywhere
//!
//! Counts records and long-text bytes and folds every long-text value into
//! an order-invariant digest, so two runs over the same data can be compared.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::hash::HashCollector;
use crate::error::{ExportError, Result};
use crate::export::ExportHandler;
use crate::model::{FieldValue, LONG_TEXT_SENTINEL, Record, RunMetadata};
use crate::utils::convert::format_bytes;

/// Records between two progress log lines
const LOG_EVERY: u64 = 1000;

/// Totals of one run
#[derive(Debug, Clone)]
pub struct RunMetrics {
    pub total_count: u64,
    /// Bytes of long-text content, inline and streamed
    pub total_size: u64,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
}

impl RunMetrics {
    /// Elapsed time in milliseconds; measured to now while the run is active
    pub fn elapsed_ms(&self) -> i64 {
        match self.started_at {
            Some(start) => {
                let end = self.finished_at.unwrap_or_else(Local::now);
                (end - start).num_milliseconds()
            }
            None => 0,
        }
    }
}

impl fmt::Display for RunMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "records: {}, size: {}",
            self.total_count,
            format_bytes(self.total_size)
        )?;

        let elapsed = self.elapsed_ms();
        if elapsed > 0 {
            let elapsed = elapsed as u64;
            write!(
                f,
                ", elapsed: {}ms, throughput: {}/sec {} records/sec",
                elapsed,
                format_bytes(1000 * self.total_size / elapsed),
                1000 * self.total_count / elapsed
            )?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct SummaryState {
    long_text_indices: Vec<usize>,
    started_at: Option<DateTime<Local>>,
    finished_at: Option<DateTime<Local>>,
    completed: Option<bool>,
    error: Option<String>,
}

/// Counts records, sizes long text and builds a content digest
///
/// Safe for concurrent delivery. A long-text value that is neither text nor
/// a stream stops the run.
pub struct SummaryHandler {
    count: AtomicU64,
    size: AtomicU64,
    hashes: HashCollector,
    state: RwLock<SummaryState>,
}

impl SummaryHandler {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            size: AtomicU64::new(0),
            hashes: HashCollector::new(),
            state: RwLock::new(SummaryState::default()),
        }
    }

    pub async fn metrics(&self) -> RunMetrics {
        let state = self.state.read().await;
        RunMetrics {
            total_count: self.count.load(Ordering::Relaxed),
            total_size: self.size.load(Ordering::Relaxed),
            started_at: state.started_at,
            finished_at: state.finished_at,
        }
    }

    /// Hex digest of all long-text content delivered so far
    pub fn digest(&self) -> String {
        self.hashes.digest()
    }

    /// `Some(completed)` once the run has ended
    pub async fn completed(&self) -> Option<bool> {
        self.state.read().await.completed
    }

    /// Message and error text of the reported failure, if any
    pub async fn error(&self) -> Option<String> {
        self.state.read().await.error.clone()
    }

    async fn measure(&self, record: &mut Record, index: usize) -> Result<Option<u64>> {
        let Some(value) = record.values.get_mut(index) else {
            return Ok(Some(0));
        };

        let size = match value {
            FieldValue::Null => 0,
            FieldValue::Text(text) if text.as_str() != LONG_TEXT_SENTINEL => {
                self.hashes.add_text(text)
            }
            FieldValue::Stream(stream) => self.hashes.add_stream(stream).await?,
            _ => return Ok(None),
        };
        Ok(Some(size))
    }
}

impl Default for SummaryHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExportHandler for SummaryHandler {
    async fn on_before_run(&self, metadata: &RunMetadata) -> Result<()> {
        let mut state = self.state.write().await;
        state.long_text_indices = metadata.long_text_indices.clone();
        state.started_at = Some(Local::now());
        info!(
            run_id = %metadata.run_id,
            record_count = metadata.record_count,
            "Summary started"
        );
        Ok(())
    }

    async fn on_record(&self, record: &mut Record) -> Result<bool> {
        let current = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if current % LOG_EVERY == 0 {
            info!(records = current, "Summary progress");
        }

        let indices = self.state.read().await.long_text_indices.clone();
        for index in indices {
            match self.measure(record, index).await? {
                Some(size) => {
                    self.size.fetch_add(size, Ordering::Relaxed);
                }
                None => {
                    warn!(
                        artifact_id = record.artifact_id,
                        field = index,
                        value = %record.values[index],
                        "Unexpected long text value, stopping"
                    );
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    async fn on_error(&self, message: &str, error: &ExportError) {
        self.state.write().await.error = Some(format!("{message}: {error}"));
    }

    async fn on_after_run(&self, completed: bool) {
        {
            let mut state = self.state.write().await;
            state.finished_at = Some(Local::now());
            state.completed = Some(completed);
        }
        let metrics = self.metrics().await;
        info!(completed, digest = %self.hashes, %metrics, "Summary finished");
    }

    fn is_concurrency_safe(&self) -> bool {
        true
    }
}
