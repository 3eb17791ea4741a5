//! Block fetch stage
//!
//! Each fetcher repeatedly pulls the next block of records from the source,
//! classifies every record, and routes it to the ready queue or the stream
//! queue. Fetchers share the source's run cursor, so together they pull each
//! block exactly once.

use std::sync::Arc;

use flume::Sender;
use tracing::{debug, trace};

use super::context::{RunContext, RunStats};
use super::queue::{self, Enqueued};
use crate::error::ExportError;
use crate::model::Record;

pub(crate) const FETCH_FAILED: &str = "retrieve next results block failed";

/// Where a fetched record goes next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    /// Every long-text value is inline
    Ready,
    /// At least one long-text value is the sentinel marker
    NeedsStream,
}

/// Classify a record by its long-text values
pub(crate) fn classify(record: &Record, long_text_indices: &[usize]) -> Route {
    if record.needs_stream(long_text_indices) {
        Route::NeedsStream
    } else {
        Route::Ready
    }
}

pub(crate) struct BlockFetcher {
    id: usize,
    ctx: Arc<RunContext>,
    ready_tx: Sender<Record>,
    stream_tx: Sender<Record>,
}

impl BlockFetcher {
    pub(crate) fn new(
        id: usize,
        ctx: Arc<RunContext>,
        ready_tx: Sender<Record>,
        stream_tx: Sender<Record>,
    ) -> Self {
        Self {
            id,
            ctx,
            ready_tx,
            stream_tx,
        }
    }

    pub(crate) async fn run(self) {
        let ctx = &self.ctx;
        let cancel = ctx.signal.token();
        let run_id = ctx.metadata.run_id;

        debug!(worker = self.id, "Block fetcher started");

        while !cancel.is_cancelled() {
            let block = match ctx
                .source
                .next_block(ctx.workspace_id, run_id, ctx.block_size)
                .await
            {
                Ok(Some(block)) if !block.is_empty() => block,
                Ok(_) => {
                    debug!(worker = self.id, "No more blocks available");
                    break;
                }
                Err(e) => {
                    ctx.signal
                        .report(FETCH_FAILED, ExportError::Fetch(e.to_string()))
                        .await;
                    break;
                }
            };

            let blocks = RunStats::add(&ctx.stats.blocks_fetched, 1);
            RunStats::add(&ctx.stats.records_fetched, block.len() as u64);
            debug!(worker = self.id, block = blocks, records = block.len(), "Fetched block");

            for record in block {
                if cancel.is_cancelled() {
                    RunStats::add(&ctx.stats.records_dropped, 1);
                    continue;
                }

                let route = classify(&record, &ctx.metadata.long_text_indices);
                trace!(worker = self.id, artifact_id = record.artifact_id, ?route, "Routing record");

                let target = match route {
                    Route::Ready => &self.ready_tx,
                    Route::NeedsStream => &self.stream_tx,
                };

                if queue::enqueue(target, record, cancel).await != Enqueued::Sent {
                    RunStats::add(&ctx.stats.records_dropped, 1);
                }
            }
        }

        debug!(worker = self.id, "Block fetcher stopped");
    }
}
