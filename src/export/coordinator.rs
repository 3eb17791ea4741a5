//! Export coordinator: the run controller of the pipeline
//!
//! Connects to the source, initializes the export, starts the fetch, stream
//! and delivery pools, and shuts them down in dependency order:
//!
//! 1. join the block fetchers, then close the ready and stream queues
//! 2. join the stream openers, then close the delivery queue
//! 3. join the deliverers
//! 4. release anything still queued and call the handler's `on_after_run`
//!
//! Every worker is registered with a [`TaskTracker`]; `on_after_run` waits
//! for all of them, also after a failure in the coordinator itself.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use uuid::Uuid;

use super::context::{RunContext, RunSignal, RunStats};
use super::deliverer::{Deliverer, panic_message};
use super::fetcher::BlockFetcher;
use super::handler::ExportHandler;
use super::progress::ProgressTracker;
use super::queue::{
    self, DELIVERY_QUEUE_CAPACITY, READY_QUEUE_CAPACITY, STREAM_QUEUE_CAPACITY,
};
use super::streamer::StreamOpener;
use crate::config::ExportConfig;
use crate::error::{ExportError, Result};
use crate::model::RunMetadata;
use crate::source::SourceConnector;

pub(crate) const CONNECT_FAILED: &str = "connect to export source failed";
pub(crate) const INITIALIZE_FAILED: &str = "initialize export failed";
pub(crate) const BEFORE_RUN_FAILED: &str = "export handler on_before_run failed";
pub(crate) const WORKER_FAILED: &str = "export worker task failed";
pub(crate) const ORCHESTRATION_FAILED: &str = "unexpected failure in export coordinator";

/// Terminal state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Every record was exhausted without cancellation
    Completed,
    /// Stopped by the caller's token or by the handler, without an error
    Cancelled,
    /// A failure was reported to the handler
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::Completed => "completed",
            RunState::Cancelled => "cancelled",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of an export run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Terminal state
    pub state: RunState,
    /// Run id assigned by the source, if initialization succeeded
    pub run_id: Option<Uuid>,
    /// Record count reported at initialization
    pub records_expected: u64,
    /// Records handed to the handler
    pub records_delivered: u64,
    /// Records fetched but never delivered
    pub records_dropped: u64,
    /// Long-text streams opened
    pub streams_opened: u64,
    /// Time taken for the run
    pub elapsed_ms: u64,
}

impl RunOutcome {
    pub fn completed(&self) -> bool {
        self.state == RunState::Completed
    }
}

/// Coordinator for export runs
///
/// Holds a validated configuration and the connector for the source; each
/// call to [`ExportCoordinator::run`] performs one independent run.
pub struct ExportCoordinator {
    config: ExportConfig,
    connector: Arc<dyn SourceConnector>,
    progress: Option<Arc<ProgressTracker>>,
}

impl ExportCoordinator {
    /// Create a new export coordinator
    ///
    /// # Arguments
    /// * `config` - Export configuration; validated here
    /// * `connector` - Connects to the source at the start of each run
    ///
    /// # Returns
    /// * `Result<Self>` - Coordinator, or the configuration error
    pub fn new(mut config: ExportConfig, connector: Arc<dyn SourceConnector>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            connector,
            progress: None,
        })
    }

    /// Report delivered records to a progress tracker
    pub fn with_progress(mut self, tracker: Arc<ProgressTracker>) -> Self {
        self.progress = Some(tracker);
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Number of deliverers used for `handler`
    pub fn deliverer_count(&self, handler: &dyn ExportHandler) -> usize {
        if handler.is_concurrency_safe() {
            self.config.scale_factor
        } else {
            1
        }
    }

    /// Run an export that can only be stopped by the handler or a failure
    pub async fn run_to_completion(&self, handler: Arc<dyn ExportHandler>) -> RunOutcome {
        self.run(handler, CancellationToken::new()).await
    }

    /// Execute one export run
    ///
    /// Never returns an error: failures are reported once through
    /// [`ExportHandler::on_error`], and `on_after_run` is always called
    /// before this returns.
    ///
    /// # Arguments
    /// * `handler` - Receives the records and lifecycle calls
    /// * `cancel` - Cancelling this token stops the run; the run never cancels it
    pub async fn run(&self, handler: Arc<dyn ExportHandler>, cancel: CancellationToken) -> RunOutcome {
        let start = Instant::now();
        let signal = Arc::new(RunSignal::new(cancel.child_token(), Arc::clone(&handler)));
        let stats = Arc::new(RunStats::default());

        info!(
            workspace_id = self.config.workspace_id,
            block_size = self.config.block_size,
            scale_factor = self.config.scale_factor,
            "Starting export run"
        );

        let workers = TaskTracker::new();
        let metadata = supervise(
            &signal,
            &workers,
            self.drive(&handler, &signal, &stats, &workers),
        )
        .await;

        self.finish(&handler, &signal, &stats, metadata.as_deref(), start)
            .await
    }

    async fn drive(
        &self,
        handler: &Arc<dyn ExportHandler>,
        signal: &Arc<RunSignal>,
        stats: &Arc<RunStats>,
        workers: &TaskTracker,
    ) -> Option<Arc<RunMetadata>> {
        let ctx = self.initialize(handler, signal, stats).await?;
        self.run_stages(&ctx, workers).await;
        Some(Arc::clone(&ctx.metadata))
    }

    /// Connect, initialize the export and call `on_before_run`
    ///
    /// Failures are reported here; `None` means no stage may start.
    async fn initialize(
        &self,
        handler: &Arc<dyn ExportHandler>,
        signal: &Arc<RunSignal>,
        stats: &Arc<RunStats>,
    ) -> Option<Arc<RunContext>> {
        let Some(credentials) = self.config.credentials.as_ref() else {
            signal
                .report(
                    CONNECT_FAILED,
                    ExportError::Initialization("no credentials configured".to_string()),
                )
                .await;
            return None;
        };

        let source = match self.connector.connect(&self.config.endpoint, credentials).await {
            Ok(source) => source,
            Err(e) => {
                signal
                    .report(CONNECT_FAILED, ExportError::Initialization(e.to_string()))
                    .await;
                return None;
            }
        };

        let init = match source
            .initialize_export(self.config.workspace_id, &self.config.query)
            .await
        {
            Ok(init) => init,
            Err(e) => {
                signal
                    .report(INITIALIZE_FAILED, ExportError::Initialization(e.to_string()))
                    .await;
                return None;
            }
        };

        let metadata = Arc::new(RunMetadata::from_initialization(init));
        info!(
            run_id = %metadata.run_id,
            record_count = metadata.record_count,
            fields = metadata.fields.len(),
            long_text_fields = metadata.long_text_indices.len(),
            "Export initialized"
        );

        if let Err(e) = handler.on_before_run(&metadata).await {
            signal
                .report(BEFORE_RUN_FAILED, ExportError::Orchestration(e.to_string()))
                .await;
            return None;
        }

        if let Some(progress) = &self.progress {
            progress.set_total(metadata.record_count);
        }

        Some(Arc::new(RunContext {
            source,
            handler: Arc::clone(handler),
            metadata,
            query: Arc::new(self.config.query.clone()),
            workspace_id: self.config.workspace_id,
            block_size: self.config.block_size,
            signal: Arc::clone(signal),
            stats: Arc::clone(stats),
            progress: self.progress.clone(),
        }))
    }

    /// Start every pool and shut them down in dependency order
    async fn run_stages(&self, ctx: &Arc<RunContext>, workers: &TaskTracker) {
        let scale = self.config.scale_factor;
        let deliverers = self.deliverer_count(ctx.handler.as_ref());

        let (ready_tx, ready_rx) = queue::bounded(READY_QUEUE_CAPACITY);
        let (stream_tx, stream_rx) = queue::bounded(STREAM_QUEUE_CAPACITY);
        let (delivery_tx, delivery_rx) = queue::bounded(DELIVERY_QUEUE_CAPACITY);

        let fetch_pool: Vec<_> = (0..scale)
            .map(|id| {
                let worker =
                    BlockFetcher::new(id, Arc::clone(ctx), ready_tx.clone(), stream_tx.clone());
                spawn_worker(workers, &ctx.signal, "block fetcher", id, worker.run())
            })
            .collect();

        let stream_pool: Vec<_> = (0..scale)
            .map(|id| {
                let worker = StreamOpener::new(
                    id,
                    Arc::clone(ctx),
                    stream_rx.clone(),
                    delivery_tx.clone(),
                    delivery_rx.clone(),
                );
                spawn_worker(workers, &ctx.signal, "stream opener", id, worker.run())
            })
            .collect();

        let delivery_pool: Vec<_> = (0..deliverers)
            .map(|id| {
                let worker =
                    Deliverer::new(id, Arc::clone(ctx), delivery_rx.clone(), ready_rx.clone());
                spawn_worker(workers, &ctx.signal, "deliverer", id, worker.run())
            })
            .collect();

        debug!(
            fetchers = scale,
            stream_openers = scale,
            deliverers,
            "Export workers started"
        );

        join_pool(&ctx.signal, "block fetcher", fetch_pool).await;
        drop(ready_tx);
        drop(stream_tx);
        debug!("Closed ready and stream queues");

        join_pool(&ctx.signal, "stream opener", stream_pool).await;
        drop(delivery_tx);
        debug!("Closed delivery queue");

        join_pool(&ctx.signal, "deliverer", delivery_pool).await;

        let mut released = 0;
        let mut closed = 0;
        for rx in [&ready_rx, &stream_rx, &delivery_rx] {
            let (records, streams) = queue::drain_closing_streams(rx);
            released += records;
            closed += streams;
        }
        if released > 0 {
            RunStats::add(&ctx.stats.records_dropped, released as u64);
            debug!(records = released, streams = closed, "Released undelivered records");
        }
    }

    async fn finish(
        &self,
        handler: &Arc<dyn ExportHandler>,
        signal: &RunSignal,
        stats: &RunStats,
        metadata: Option<&RunMetadata>,
        start: Instant,
    ) -> RunOutcome {
        let state = if signal.has_failed() {
            RunState::Failed
        } else if signal.is_cancelled() {
            RunState::Cancelled
        } else {
            RunState::Completed
        };

        if let Some(progress) = &self.progress {
            progress.finish();
        }

        handler.on_after_run(state == RunState::Completed).await;

        let outcome = RunOutcome {
            state,
            run_id: metadata.map(|m| m.run_id),
            records_expected: metadata.map(|m| m.record_count).unwrap_or(0),
            records_delivered: RunStats::get(&stats.records_delivered),
            records_dropped: RunStats::get(&stats.records_dropped),
            streams_opened: RunStats::get(&stats.streams_opened),
            elapsed_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            state = %outcome.state,
            delivered = outcome.records_delivered,
            dropped = outcome.records_dropped,
            streams = outcome.streams_opened,
            blocks = RunStats::get(&stats.blocks_fetched),
            elapsed_ms = outcome.elapsed_ms,
            "Export run finished"
        );

        outcome
    }
}

/// Drive the run, then wait for every worker it spawned
///
/// A panic in `stages` fails the run; the report cancels the token, so the
/// workers still running wind down before this returns.
async fn supervise<F>(
    signal: &RunSignal,
    workers: &TaskTracker,
    stages: F,
) -> Option<Arc<RunMetadata>>
where
    F: Future<Output = Option<Arc<RunMetadata>>>,
{
    let metadata = match AssertUnwindSafe(stages).catch_unwind().await {
        Ok(metadata) => metadata,
        Err(panic) => {
            signal
                .report(
                    ORCHESTRATION_FAILED,
                    ExportError::Orchestration(panic_message(panic.as_ref())),
                )
                .await;
            None
        }
    };

    workers.close();
    workers.wait().await;
    metadata
}

/// Spawn one worker; a panic inside it fails the run
fn spawn_worker<F>(
    workers: &TaskTracker,
    signal: &Arc<RunSignal>,
    stage: &'static str,
    id: usize,
    worker: F,
) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let signal = Arc::clone(signal);
    workers.spawn(async move {
        if let Err(panic) = AssertUnwindSafe(worker).catch_unwind().await {
            signal
                .report(
                    WORKER_FAILED,
                    ExportError::Orchestration(format!(
                        "{stage} {id} {}",
                        panic_message(panic.as_ref())
                    )),
                )
                .await;
        }
    })
}

async fn join_pool(signal: &RunSignal, stage: &str, pool: Vec<JoinHandle<()>>) {
    for handle in pool {
        if let Err(e) = handle.await {
            signal
                .report(
                    WORKER_FAILED,
                    ExportError::Orchestration(format!("{stage} task failed: {e}")),
                )
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::error::ErrorKind;
    use crate::export::streamer::STREAM_OPEN_FAILED;
    use crate::export::deliverer::CALLBACK_FAILED;
    use crate::export::fetcher::FETCH_FAILED;
    use crate::model::{
        FieldMetadata, FieldType, FieldValue, LONG_TEXT_SENTINEL, QueryRequest, Record,
    };
    use crate::source::FixtureRecord;
    use crate::source::fixture::{FaultPlan, FixtureSource};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Before,
        Record(i64),
        Error(String, ErrorKind),
        After(bool),
    }

    #[derive(Default)]
    struct RecordingHandler {
        events: Mutex<Vec<Event>>,
        texts: Mutex<HashMap<i64, String>>,
        saw_sentinel: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        concurrent: bool,
        stop_on_first: bool,
        fail_on: Option<i64>,
        panic_on: Option<i64>,
        fail_before: bool,
        record_delay: Option<Duration>,
    }

    impl RecordingHandler {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn delivered(&self) -> Vec<i64> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::Record(id) => Some(id),
                    _ => None,
                })
                .collect()
        }

        fn errors(&self) -> Vec<(String, ErrorKind)> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::Error(msg, kind) => Some((msg, kind)),
                    _ => None,
                })
                .collect()
        }

        fn after_calls(&self) -> Vec<bool> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::After(c) => Some(c),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ExportHandler for RecordingHandler {
        async fn on_before_run(&self, _metadata: &RunMetadata) -> Result<()> {
            self.events.lock().unwrap().push(Event::Before);
            if self.fail_before {
                return Err(ExportError::Generic("not ready".into()));
            }
            Ok(())
        }

        async fn on_record(&self, record: &mut Record) -> Result<bool> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if record.values.iter().any(FieldValue::is_sentinel) {
                self.saw_sentinel.fetch_add(1, Ordering::SeqCst);
            }
            for value in record.values.iter_mut() {
                if let Some(stream) = value.as_stream_mut() {
                    let text = stream.read_to_string().await?;
                    self.texts.lock().unwrap().insert(record.artifact_id, text);
                }
            }
            if let Some(delay) = self.record_delay {
                tokio::time::sleep(delay).await;
            }

            self.events
                .lock()
                .unwrap()
                .push(Event::Record(record.artifact_id));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.panic_on == Some(record.artifact_id) {
                panic!("handler exploded");
            }
            if self.fail_on == Some(record.artifact_id) {
                return Err(ExportError::Generic("disk full".into()));
            }
            Ok(!self.stop_on_first)
        }

        async fn on_error(&self, message: &str, error: &ExportError) {
            self.events
                .lock()
                .unwrap()
                .push(Event::Error(message.to_string(), error.kind()));
        }

        async fn on_after_run(&self, completed: bool) {
            self.events.lock().unwrap().push(Event::After(completed));
        }

        fn is_concurrency_safe(&self) -> bool {
            self.concurrent
        }
    }

    fn fields() -> Vec<FieldMetadata> {
        vec![
            FieldMetadata {
                name: "Control Number".into(),
                field_type: FieldType::FixedLengthText,
            },
            FieldMetadata {
                name: "Extracted Text".into(),
                field_type: FieldType::LongText,
            },
        ]
    }

    /// Records 1..=n; every `stream_every`-th one has its text streamed
    fn fixture(n: i64, stream_every: i64) -> FixtureSource {
        let records = (1..=n)
            .map(|id| {
                if stream_every > 0 && id % stream_every == 0 {
                    FixtureRecord {
                        artifact_id: id,
                        values: vec![json!(format!("DOC{id}")), json!(LONG_TEXT_SENTINEL)],
                        streams: HashMap::from([(
                            "Extracted Text".to_string(),
                            format!("long text of {id}"),
                        )]),
                    }
                } else {
                    FixtureRecord {
                        artifact_id: id,
                        values: vec![json!(format!("DOC{id}")), json!(format!("text of {id}"))],
                        streams: HashMap::new(),
                    }
                }
            })
            .collect();
        FixtureSource::new(fields(), records)
    }

    fn coordinator(source: &FixtureSource, block_size: usize, scale_factor: usize) -> ExportCoordinator {
        let query = QueryRequest::with_fields(["Control Number", "Extracted Text"]);
        coordinator_for(source, query, block_size, scale_factor)
    }

    fn coordinator_for(
        source: &FixtureSource,
        query: QueryRequest,
        block_size: usize,
        scale_factor: usize,
    ) -> ExportCoordinator {
        let config = ExportConfig {
            endpoint: "https://fixture.local".into(),
            credentials: Some(Credentials::BearerToken {
                token: "t".into(),
            }),
            workspace_id: 1,
            block_size,
            scale_factor,
            query,
            ..ExportConfig::default()
        };
        ExportCoordinator::new(config, Arc::new(source.clone())).unwrap()
    }

    fn assert_lifecycle(handler: &RecordingHandler, completed: bool) {
        let events = handler.events();
        assert_eq!(handler.after_calls(), vec![completed]);
        assert_eq!(events.last(), Some(&Event::After(completed)));
        assert!(handler.errors().len() <= 1);
    }

    #[tokio::test]
    async fn test_ready_and_streamed_record() {
        let source = fixture(2, 2);
        let handler = Arc::new(RecordingHandler::default());

        let outcome = coordinator(&source, 2, 1)
            .run_to_completion(handler.clone())
            .await;

        assert_eq!(outcome.state, RunState::Completed);
        assert_eq!(handler.events()[0], Event::Before);
        let mut delivered = handler.delivered();
        delivered.sort_unstable();
        assert_eq!(delivered, vec![1, 2]);
        assert_eq!(source.streams_opened(), 1);
        assert_eq!(handler.texts.lock().unwrap()[&2], "long text of 2");
        assert!(!handler.texts.lock().unwrap().contains_key(&1));
        assert!(handler.errors().is_empty());
        assert_eq!(source.live_streams(), 0);
        assert_lifecycle(&handler, true);
    }

    #[tokio::test]
    async fn test_every_record_delivered_once() {
        let source = fixture(600, 3);
        let handler = Arc::new(RecordingHandler {
            concurrent: true,
            ..RecordingHandler::default()
        });

        let outcome = coordinator(&source, 7, 4)
            .run_to_completion(handler.clone())
            .await;

        assert_eq!(outcome.state, RunState::Completed);
        assert_eq!(outcome.records_expected, 600);
        assert_eq!(outcome.records_delivered, 600);
        assert_eq!(outcome.records_dropped, 0);
        assert_eq!(outcome.streams_opened, 200);

        let delivered = handler.delivered();
        let unique: HashSet<i64> = delivered.iter().copied().collect();
        assert_eq!(delivered.len(), 600);
        assert_eq!(unique.len(), 600);
        assert_eq!(handler.saw_sentinel.load(Ordering::SeqCst), 0);
        assert_eq!(handler.texts.lock().unwrap().len(), 200);
        assert_eq!(source.live_streams(), 0);
        assert_lifecycle(&handler, true);
    }

    #[tokio::test]
    async fn test_stream_open_failure() {
        let source = fixture(2, 2).with_faults(FaultPlan {
            fail_streams_for: HashSet::from([2]),
            ..FaultPlan::default()
        });
        let handler = Arc::new(RecordingHandler::default());

        let outcome = coordinator(&source, 2, 1)
            .run_to_completion(handler.clone())
            .await;

        assert_eq!(outcome.state, RunState::Failed);
        assert_eq!(
            handler.errors(),
            vec![(STREAM_OPEN_FAILED.to_string(), ErrorKind::StreamOpenFailure)]
        );
        assert!(!handler.delivered().contains(&2));
        assert_eq!(source.live_streams(), 0);
        assert_lifecycle(&handler, false);
    }

    #[tokio::test]
    async fn test_partially_opened_streams_closed_on_failure() {
        let long_text = |name: &str| FieldMetadata {
            name: name.into(),
            field_type: FieldType::LongText,
        };
        let source = FixtureSource::new(
            vec![long_text("Body"), long_text("Notes")],
            vec![FixtureRecord {
                artifact_id: 1,
                values: vec![json!(LONG_TEXT_SENTINEL), json!(LONG_TEXT_SENTINEL)],
                streams: HashMap::from([("Body".to_string(), "body text".to_string())]),
            }],
        );
        let handler = Arc::new(RecordingHandler::default());

        let outcome = coordinator_for(&source, QueryRequest::with_fields(["Body", "Notes"]), 1, 1)
            .run_to_completion(handler.clone())
            .await;

        assert_eq!(outcome.state, RunState::Failed);
        assert_eq!(source.streams_opened(), 1);
        assert_eq!(outcome.streams_opened, 1);
        assert_eq!(outcome.records_dropped, 1);
        assert_eq!(source.live_streams(), 0);
        assert_eq!(
            handler.errors(),
            vec![(STREAM_OPEN_FAILED.to_string(), ErrorKind::StreamOpenFailure)]
        );
        assert!(handler.delivered().is_empty());
        assert_lifecycle(&handler, false);
    }

    #[tokio::test]
    async fn test_query_order_differs_from_source_layout() {
        let source = FixtureSource::from_json_str(include_str!("../../demos/records.json")).unwrap();
        let handler = Arc::new(RecordingHandler::default());
        let query = QueryRequest::with_fields(["Extracted Text", "Control Number"]);

        let outcome = coordinator_for(&source, query, 2, 1)
            .run_to_completion(handler.clone())
            .await;

        assert_eq!(outcome.state, RunState::Completed);
        assert_eq!(outcome.records_delivered, 5);
        assert_eq!(outcome.streams_opened, 2);
        assert!(handler.errors().is_empty());
        assert_eq!(handler.texts.lock().unwrap()[&1004], "Another streamed body.");
        assert_eq!(handler.saw_sentinel.load(Ordering::SeqCst), 0);
        assert_eq!(source.live_streams(), 0);
        assert_lifecycle(&handler, true);
    }

    #[tokio::test]
    async fn test_stream_failures_do_not_leak_handles() {
        let source = fixture(400, 2).with_faults(FaultPlan {
            fail_streams_for: (200..400).collect(),
            ..FaultPlan::default()
        });
        let handler = Arc::new(RecordingHandler {
            concurrent: true,
            ..RecordingHandler::default()
        });

        let outcome = coordinator(&source, 5, 4)
            .run_to_completion(handler.clone())
            .await;

        assert_eq!(outcome.state, RunState::Failed);
        assert_eq!(handler.errors().len(), 1);
        assert_eq!(source.live_streams(), 0);
        assert_lifecycle(&handler, false);
    }

    #[tokio::test]
    async fn test_handler_stop_is_not_an_error() {
        let source = fixture(50, 5);
        let handler = Arc::new(RecordingHandler {
            stop_on_first: true,
            ..RecordingHandler::default()
        });
        let cancel = CancellationToken::new();

        let outcome = coordinator(&source, 2, 1)
            .run(handler.clone(), cancel.clone())
            .await;

        assert_eq!(outcome.state, RunState::Cancelled);
        assert!(handler.errors().is_empty());
        assert_eq!(handler.delivered().len(), 1);
        assert!(!cancel.is_cancelled());
        assert_eq!(source.live_streams(), 0);
        assert_lifecycle(&handler, false);
    }

    #[tokio::test]
    async fn test_fetch_failure_reported_once() {
        let source = fixture(100, 4).with_faults(FaultPlan {
            fail_block_from: Some(3),
            ..FaultPlan::default()
        });
        let handler = Arc::new(RecordingHandler {
            concurrent: true,
            ..RecordingHandler::default()
        });

        let outcome = coordinator(&source, 5, 4)
            .run_to_completion(handler.clone())
            .await;

        assert_eq!(outcome.state, RunState::Failed);
        assert_eq!(
            handler.errors(),
            vec![(FETCH_FAILED.to_string(), ErrorKind::FetchFailure)]
        );
        assert_eq!(source.live_streams(), 0);
        assert_lifecycle(&handler, false);
    }

    #[tokio::test]
    async fn test_initialization_failure_starts_nothing() {
        let source = fixture(10, 2).with_faults(FaultPlan {
            fail_initialize: true,
            ..FaultPlan::default()
        });
        let handler = Arc::new(RecordingHandler::default());

        let outcome = coordinator(&source, 2, 2)
            .run_to_completion(handler.clone())
            .await;

        assert_eq!(outcome.state, RunState::Failed);
        assert!(outcome.run_id.is_none());
        assert_eq!(
            handler.errors(),
            vec![(INITIALIZE_FAILED.to_string(), ErrorKind::InitializationFailure)]
        );
        assert!(!handler.events().contains(&Event::Before));
        assert_eq!(source.block_calls(), 0);
        assert_lifecycle(&handler, false);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let source = fixture(10, 2).with_faults(FaultPlan {
            fail_connect: true,
            ..FaultPlan::default()
        });
        let handler = Arc::new(RecordingHandler::default());

        let outcome = coordinator(&source, 2, 2)
            .run_to_completion(handler.clone())
            .await;

        assert_eq!(outcome.state, RunState::Failed);
        assert_eq!(handler.errors()[0].0, CONNECT_FAILED);
        assert_lifecycle(&handler, false);
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let source = fixture(10, 2).with_faults(FaultPlan {
            reject_credentials: true,
            ..FaultPlan::default()
        });
        let handler = Arc::new(RecordingHandler::default());

        let outcome = coordinator(&source, 2, 2)
            .run_to_completion(handler.clone())
            .await;

        assert_eq!(outcome.state, RunState::Failed);
        assert_eq!(
            handler.errors(),
            vec![(CONNECT_FAILED.to_string(), ErrorKind::InitializationFailure)]
        );
        assert!(!handler.events().contains(&Event::Before));
        assert_lifecycle(&handler, false);
    }

    async fn exploding_stages() -> Option<Arc<RunMetadata>> {
        panic!("coordinator exploded")
    }

    #[tokio::test]
    async fn test_coordinator_panic_waits_for_workers() {
        let handler = Arc::new(RecordingHandler::default());
        let signal = Arc::new(RunSignal::new(CancellationToken::new(), handler.clone()));
        let workers = TaskTracker::new();
        let stopped = Arc::new(AtomicUsize::new(0));

        for id in 0..3 {
            let token = signal.token().clone();
            let stopped = Arc::clone(&stopped);
            spawn_worker(&workers, &signal, "deliverer", id, async move {
                token.cancelled().await;
                tokio::time::sleep(Duration::from_millis(20)).await;
                stopped.fetch_add(1, Ordering::SeqCst);
            });
        }

        let metadata = supervise(&signal, &workers, exploding_stages()).await;

        assert!(metadata.is_none());
        assert_eq!(stopped.load(Ordering::SeqCst), 3);
        assert!(signal.has_failed());
        assert_eq!(
            handler.errors(),
            vec![(ORCHESTRATION_FAILED.to_string(), ErrorKind::OrchestrationFailure)]
        );
    }

    #[tokio::test]
    async fn test_before_run_failure() {
        let source = fixture(10, 2);
        let handler = Arc::new(RecordingHandler {
            fail_before: true,
            ..RecordingHandler::default()
        });

        let outcome = coordinator(&source, 2, 2)
            .run_to_completion(handler.clone())
            .await;

        assert_eq!(outcome.state, RunState::Failed);
        assert_eq!(
            handler.errors(),
            vec![(BEFORE_RUN_FAILED.to_string(), ErrorKind::OrchestrationFailure)]
        );
        assert!(handler.delivered().is_empty());
        assert_eq!(source.block_calls(), 0);
        assert_lifecycle(&handler, false);
    }

    #[tokio::test]
    async fn test_handler_error_fails_run() {
        let source = fixture(30, 3);
        let handler = Arc::new(RecordingHandler {
            fail_on: Some(9),
            ..RecordingHandler::default()
        });

        let outcome = coordinator(&source, 4, 2)
            .run_to_completion(handler.clone())
            .await;

        assert_eq!(outcome.state, RunState::Failed);
        assert_eq!(
            handler.errors(),
            vec![(CALLBACK_FAILED.to_string(), ErrorKind::ConsumerCallbackFailure)]
        );
        assert_eq!(source.live_streams(), 0);
        assert_lifecycle(&handler, false);
    }

    #[tokio::test]
    async fn test_handler_panic_fails_run() {
        let source = fixture(30, 3);
        let handler = Arc::new(RecordingHandler {
            panic_on: Some(6),
            concurrent: true,
            ..RecordingHandler::default()
        });

        let outcome = coordinator(&source, 4, 2)
            .run_to_completion(handler.clone())
            .await;

        assert_eq!(outcome.state, RunState::Failed);
        assert_eq!(handler.errors().len(), 1);
        assert_eq!(handler.errors()[0].1, ErrorKind::ConsumerCallbackFailure);
        assert_eq!(source.live_streams(), 0);
        assert_lifecycle(&handler, false);
    }

    #[tokio::test]
    async fn test_external_cancellation_mid_run() {
        let source = fixture(1000, 2).with_faults(FaultPlan {
            fetch_delay: Some(Duration::from_millis(5)),
            ..FaultPlan::default()
        });
        let handler = Arc::new(RecordingHandler {
            concurrent: true,
            ..RecordingHandler::default()
        });
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            })
        };

        let outcome = coordinator(&source, 10, 2)
            .run(handler.clone(), cancel)
            .await;
        canceller.await.unwrap();

        assert_eq!(outcome.state, RunState::Cancelled);
        assert!(outcome.records_delivered < 1000);
        assert!(handler.errors().is_empty());
        assert_eq!(source.live_streams(), 0);
        assert_lifecycle(&handler, false);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let source = fixture(10, 2);
        let handler = Arc::new(RecordingHandler::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = coordinator(&source, 2, 2).run(handler.clone(), cancel).await;

        assert_eq!(outcome.state, RunState::Cancelled);
        assert!(handler.delivered().is_empty());
        assert!(handler.errors().is_empty());
        assert_lifecycle(&handler, false);
    }

    #[tokio::test]
    async fn test_unsafe_handler_gets_single_deliverer() {
        let source = fixture(40, 4);
        let handler = Arc::new(RecordingHandler {
            record_delay: Some(Duration::from_millis(1)),
            ..RecordingHandler::default()
        });
        let coordinator = coordinator(&source, 3, 4);
        assert_eq!(coordinator.deliverer_count(handler.as_ref()), 1);

        let outcome = coordinator.run_to_completion(handler.clone()).await;

        assert_eq!(outcome.state, RunState::Completed);
        assert_eq!(handler.delivered().len(), 40);
        assert_eq!(handler.max_in_flight.load(Ordering::SeqCst), 1);
        assert_lifecycle(&handler, true);
    }

    #[tokio::test]
    async fn test_empty_source() {
        let source = fixture(0, 0);
        let handler = Arc::new(RecordingHandler::default());

        let outcome = coordinator(&source, 10, 3)
            .run_to_completion(handler.clone())
            .await;

        assert_eq!(outcome.state, RunState::Completed);
        assert_eq!(outcome.records_delivered, 0);
        assert_eq!(handler.events(), vec![Event::Before, Event::After(true)]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let source = fixture(1, 0);
        let config = ExportConfig {
            scale_factor: 0,
            ..ExportConfig::default()
        };
        assert!(ExportCoordinator::new(config, Arc::new(source)).is_err());
    }
}
