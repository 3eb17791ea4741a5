//! Stream open stage
//!
//! Takes records flagged by the fetch stage, replaces every sentinel value
//! with an open [`FieldStream`], and hands the record to the delivery queue.

use std::sync::Arc;

use flume::{Receiver, Sender};
use tracing::{debug, trace};

use super::context::{RunContext, RunStats};
use super::queue::{self, Enqueued};
use crate::error::{ExportError, Result};
use crate::model::{FieldValue, Record};

pub(crate) const STREAM_OPEN_FAILED: &str = "open long text stream failed";

pub(crate) struct StreamOpener {
    id: usize,
    ctx: Arc<RunContext>,
    stream_rx: Receiver<Record>,
    delivery_tx: Sender<Record>,
    delivery_rx: Receiver<Record>,
}

impl StreamOpener {
    pub(crate) fn new(
        id: usize,
        ctx: Arc<RunContext>,
        stream_rx: Receiver<Record>,
        delivery_tx: Sender<Record>,
        delivery_rx: Receiver<Record>,
    ) -> Self {
        Self {
            id,
            ctx,
            stream_rx,
            delivery_tx,
            delivery_rx,
        }
    }

    pub(crate) async fn run(self) {
        let ctx = &self.ctx;
        let cancel = ctx.signal.token();

        debug!(worker = self.id, "Stream opener started");

        while let Some(mut record) = queue::take(&self.stream_rx, cancel).await {
            if cancel.is_cancelled() {
                RunStats::add(&ctx.stats.records_dropped, 1);
                break;
            }

            if let Err(e) = self.open_streams(&mut record).await {
                let closed = record.close_streams();
                debug!(
                    worker = self.id,
                    artifact_id = record.artifact_id,
                    closed,
                    "Closed partially opened streams"
                );
                RunStats::add(&ctx.stats.records_dropped, 1);
                ctx.signal
                    .report(STREAM_OPEN_FAILED, ExportError::StreamOpen(e.to_string()))
                    .await;
                break;
            }

            RunStats::add(&ctx.stats.records_streamed, 1);
            if queue::enqueue(&self.delivery_tx, record, cancel).await != Enqueued::Sent {
                RunStats::add(&ctx.stats.records_dropped, 1);
            }
        }

        if cancel.is_cancelled() {
            self.release_pending();
        }

        debug!(worker = self.id, "Stream opener stopped");
    }

    /// Open a stream for every long-text value still holding the sentinel
    async fn open_streams(&self, record: &mut Record) -> Result<usize> {
        let ctx = &self.ctx;
        let pending: Vec<usize> = record
            .pending_fields(&ctx.metadata.long_text_indices)
            .collect();

        for &index in &pending {
            let field = ctx.field_ref(index);
            let stream = ctx
                .source
                .open_field_stream(ctx.workspace_id, record.artifact_id, &field)
                .await?;
            trace!(
                worker = self.id,
                artifact_id = record.artifact_id,
                field = %field.name,
                "Opened long text stream"
            );
            record.values[index] = FieldValue::Stream(stream);
            RunStats::add(&ctx.stats.streams_opened, 1);
        }

        Ok(pending.len())
    }

    /// Release records left behind by a cancelled run
    ///
    /// Nothing will deliver them any more, so queued open streams are closed
    /// here instead of waiting for the run to be torn down.
    fn release_pending(&self) {
        let stats = &self.ctx.stats;
        let (flagged, _) = queue::drain_closing_streams(&self.stream_rx);
        let (opened, streams) = queue::drain_closing_streams(&self.delivery_rx);
        RunStats::add(&stats.records_dropped, (flagged + opened) as u64);

        if flagged + opened > 0 {
            debug!(
                worker = self.id,
                records = flagged + opened,
                streams,
                "Released queued records after cancellation"
            );
        }
    }
}
