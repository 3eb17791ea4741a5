//! Delivery stage
//!
//! Takes records from both the ready queue and the delivery queue, hands
//! each to the export handler, and closes the record's streams afterwards.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use flume::Receiver;
use futures::FutureExt;
use tracing::{debug, trace};

use super::context::{RunContext, RunStats};
use super::queue::{EitherQueue, Taken};
use crate::error::ExportError;
use crate::model::Record;

pub(crate) const CALLBACK_FAILED: &str = "export handler on_record failed";

pub(crate) struct Deliverer {
    id: usize,
    ctx: Arc<RunContext>,
    queues: EitherQueue<Record>,
}

impl Deliverer {
    pub(crate) fn new(
        id: usize,
        ctx: Arc<RunContext>,
        delivery_rx: Receiver<Record>,
        ready_rx: Receiver<Record>,
    ) -> Self {
        Self {
            id,
            ctx,
            queues: EitherQueue::new(delivery_rx, ready_rx),
        }
    }

    pub(crate) async fn run(mut self) {
        let ctx = Arc::clone(&self.ctx);
        let cancel = ctx.signal.token();

        debug!(worker = self.id, "Deliverer started");

        while !cancel.is_cancelled() {
            let mut record = match self.queues.take(cancel).await {
                Taken::Item(record) => record,
                Taken::Exhausted | Taken::Cancelled => break,
            };

            if cancel.is_cancelled() {
                record.close_streams();
                RunStats::add(&ctx.stats.records_dropped, 1);
                break;
            }

            let keep_going = self.deliver(&mut record).await;

            let closed = record.close_streams();
            trace!(worker = self.id, artifact_id = record.artifact_id, closed, "Delivered record");

            let delivered = RunStats::add(&ctx.stats.records_delivered, 1);
            if let Some(progress) = &ctx.progress {
                progress.update(delivered);
            }

            if !keep_going {
                ctx.signal.stop();
            }
        }

        debug!(worker = self.id, "Deliverer stopped");
    }

    /// Invoke the handler for one record
    ///
    /// # Returns
    /// * `bool` - Whether the run should continue
    async fn deliver(&self, record: &mut Record) -> bool {
        let ctx = &self.ctx;
        let result = AssertUnwindSafe(ctx.handler.on_record(record))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(keep_going)) => {
                if !keep_going {
                    debug!(
                        worker = self.id,
                        artifact_id = record.artifact_id,
                        "Export handler requested stop"
                    );
                }
                keep_going
            }
            Ok(Err(e)) => {
                ctx.signal
                    .report(CALLBACK_FAILED, ExportError::Callback(e.to_string()))
                    .await;
                false
            }
            Err(panic) => {
                ctx.signal
                    .report(
                        CALLBACK_FAILED,
                        ExportError::Callback(panic_message(panic.as_ref())),
                    )
                    .await;
                false
            }
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}
