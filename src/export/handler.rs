//! Consumer-side interface of an export run

use async_trait::async_trait;

use crate::error::{ExportError, Result};
use crate::model::{Record, RunMetadata};

/// Receives the records of an export run
///
/// Lifecycle per run: `on_before_run` once (unless initialization fails),
/// `on_record` once per delivered record, `on_error` at most once, and
/// `on_after_run` exactly once as the last call.
#[async_trait]
pub trait ExportHandler: Send + Sync {
    /// Called once before any record is delivered
    ///
    /// An error here fails the run before any worker is started.
    async fn on_before_run(&self, metadata: &RunMetadata) -> Result<()>;

    /// Called once per record
    ///
    /// Streams in the record's values are readable for the duration of the
    /// call and are closed by the pipeline once it returns.
    ///
    /// # Returns
    /// * `Ok(true)` - keep going
    /// * `Ok(false)` - stop the run early; not reported as an error
    /// * `Err(_)` - fail the run
    async fn on_record(&self, record: &mut Record) -> Result<bool>;

    /// Called at most once, for the first failure of the run
    ///
    /// Not called when the run is stopped by cancellation or by
    /// `on_record` returning `false`.
    async fn on_error(&self, message: &str, error: &ExportError);

    /// Called exactly once, after every worker has stopped
    ///
    /// `completed` is true only if all records were exhausted without
    /// cancellation or failure.
    async fn on_after_run(&self, completed: bool);

    /// Whether `on_record` may be called from several workers at once
    ///
    /// If false, records are delivered from a single worker.
    fn is_concurrency_safe(&self) -> bool {
        false
    }
}
