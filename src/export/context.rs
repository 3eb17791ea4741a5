//! Shared state of one export run
//!
//! Every worker holds an `Arc<RunContext>`: the source, the immutable run
//! metadata, the run counters, and the [`RunSignal`] that owns cancellation
//! and the single-shot error report.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::handler::ExportHandler;
use super::progress::ProgressTracker;
use crate::error::ExportError;
use crate::model::{FieldRef, QueryRequest, RunMetadata};
use crate::source::ExportSource;

/// Cancellation and first-failure reporting for a run
pub(crate) struct RunSignal {
    token: CancellationToken,
    handler: Arc<dyn ExportHandler>,
    report_lock: Mutex<()>,
    failed: AtomicBool,
}

impl RunSignal {
    pub(crate) fn new(token: CancellationToken, handler: Arc<dyn ExportHandler>) -> Self {
        Self {
            token,
            handler,
            report_lock: Mutex::new(()),
            failed: AtomicBool::new(false),
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Report `error` to the handler and cancel the run
    ///
    /// Only the first report of a run that is not already cancelled reaches
    /// the handler; every later one is absorbed.
    ///
    /// # Returns
    /// * `bool` - Whether this call was the one reported
    pub(crate) async fn report(&self, message: &str, error: ExportError) -> bool {
        let _guard = self.report_lock.lock().await;

        if self.token.is_cancelled() {
            debug!(%message, %error, "Absorbed failure after cancellation");
            return false;
        }

        warn!(%message, %error, kind = %error.kind(), "Export run failed");
        self.failed.store(true, Ordering::SeqCst);
        self.handler.on_error(message, &error).await;
        self.token.cancel();
        true
    }

    /// Cancel the run without reporting an error
    pub(crate) fn stop(&self) {
        if !self.token.is_cancelled() {
            debug!("Export run stop requested");
            self.token.cancel();
        }
    }
}

/// Run-wide counters
#[derive(Debug, Default)]
pub(crate) struct RunStats {
    pub blocks_fetched: AtomicU64,
    pub records_fetched: AtomicU64,
    pub records_streamed: AtomicU64,
    pub streams_opened: AtomicU64,
    pub records_delivered: AtomicU64,
    pub records_dropped: AtomicU64,
}

impl RunStats {
    pub(crate) fn add(counter: &AtomicU64, n: u64) -> u64 {
        counter.fetch_add(n, Ordering::Relaxed) + n
    }

    pub(crate) fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Everything a worker needs, shared read-only across the run
pub(crate) struct RunContext {
    pub source: Arc<dyn ExportSource>,
    pub handler: Arc<dyn ExportHandler>,
    pub metadata: Arc<RunMetadata>,
    pub query: Arc<QueryRequest>,
    pub workspace_id: i32,
    pub block_size: usize,
    pub signal: Arc<RunSignal>,
    pub stats: Arc<RunStats>,
    pub progress: Option<Arc<ProgressTracker>>,
}

impl RunContext {
    /// Field reference for the value at `index`
    pub(crate) fn field_ref(&self, index: usize) -> FieldRef {
        match self.query.fields.get(index) {
            Some(field) => field.clone(),
            None => FieldRef::new(
                self.metadata
                    .field(index)
                    .map(|f| f.name.clone())
                    .unwrap_or_default(),
            ),
        }
    }
}
