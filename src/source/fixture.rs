//! In-process export source backed by a fixed set of records
//!
//! Serves blocks from a shared cursor exactly like a remote source would,
//! resolves sentinel fields from per-record stream content, and can inject
//! faults at each remote operation. Used for dry runs from the command line
//! and as the source in pipeline tests.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{ExportSource, SourceConnector};
use crate::config::Credentials;
use crate::error::{ConfigError, ExportError, Result, SourceError};
use crate::model::{
    ExportInitialization, FieldMetadata, FieldRef, FieldStream, FieldValue, QueryRequest, Record,
};

/// One record as stored in a fixture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureRecord {
    pub artifact_id: i64,

    /// Values in the fixture's field order; the sentinel string marks streamed fields
    pub values: Vec<JsonValue>,

    /// Full long-text content by field name, served by `open_field_stream`
    #[serde(default)]
    pub streams: HashMap<String, String>,
}

/// Fixture file layout
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FixtureFile {
    fields: Vec<FieldMetadata>,
    records: Vec<FixtureRecord>,
}

/// Faults to inject into a fixture source
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    pub fail_connect: bool,
    /// Reject the credentials on connect
    pub reject_credentials: bool,
    pub fail_initialize: bool,
    /// Fail the n-th block fetch (0-based) and every later one
    pub fail_block_from: Option<usize>,
    /// Fail `open_field_stream` for these records
    pub fail_streams_for: HashSet<i64>,
    /// Delay every block fetch
    pub fetch_delay: Option<Duration>,
}

#[derive(Default)]
struct FixtureState {
    run_id: Mutex<Option<Uuid>>,
    /// Fixture column of each queried field, in query order
    projection: Mutex<Vec<usize>>,
    cursor: Mutex<usize>,
    block_calls: AtomicUsize,
    streams_opened: AtomicUsize,
    live_streams: Arc<AtomicUsize>,
}

/// Export source serving records from memory
///
/// Clones share the cursor and counters, so a clone kept by the caller
/// observes what the pipeline did with its own copy.
#[derive(Clone)]
pub struct FixtureSource {
    fields: Arc<Vec<FieldMetadata>>,
    records: Arc<Vec<FixtureRecord>>,
    by_artifact: Arc<HashMap<i64, usize>>,
    faults: FaultPlan,
    state: Arc<FixtureState>,
}

impl FixtureSource {
    /// Create a fixture source over `records` with the given field layout
    pub fn new(fields: Vec<FieldMetadata>, records: Vec<FixtureRecord>) -> Self {
        let by_artifact = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.artifact_id, i))
            .collect();

        Self {
            fields: Arc::new(fields),
            records: Arc::new(records),
            by_artifact: Arc::new(by_artifact),
            faults: FaultPlan::default(),
            state: Arc::new(FixtureState::default()),
        }
    }

    /// Load a fixture from a JSON file with `fields` and `records` arrays
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let file: FixtureFile = serde_json::from_str(content)
            .map_err(|e| ConfigError::InvalidFormat(format!("fixture: {e}")))?;
        Ok(Self::new(file.fields, file.records))
    }

    /// Replace the fault plan
    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Number of block fetches served so far, including the final empty one
    pub fn block_calls(&self) -> usize {
        self.state.block_calls.load(Ordering::SeqCst)
    }

    /// Number of streams opened so far
    pub fn streams_opened(&self) -> usize {
        self.state.streams_opened.load(Ordering::SeqCst)
    }

    /// Number of opened streams not yet closed
    pub fn live_streams(&self) -> usize {
        self.state.live_streams.load(Ordering::SeqCst)
    }

    /// Build a record holding the queried fields in query order
    fn to_record(fixture: &FixtureRecord, projection: &[usize]) -> Record {
        Record::new(
            fixture.artifact_id,
            projection
                .iter()
                .map(|&column| {
                    fixture
                        .values
                        .get(column)
                        .cloned()
                        .map_or(FieldValue::Null, FieldValue::from_json)
                })
                .collect(),
        )
    }
}

#[async_trait]
impl ExportSource for FixtureSource {
    async fn initialize_export(
        &self,
        workspace_id: i32,
        query: &QueryRequest,
    ) -> Result<ExportInitialization> {
        if self.faults.fail_initialize {
            return Err(SourceError::Transport("initialization rejected".to_string()).into());
        }

        let projection = query
            .fields
            .iter()
            .map(|field| {
                self.fields
                    .iter()
                    .position(|f| f.name == field.name)
                    .ok_or_else(|| SourceError::FieldNotFound(field.name.clone()))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let field_data = projection.iter().map(|&i| self.fields[i].clone()).collect();

        let run_id = Uuid::new_v4();
        *self.state.run_id.lock().await = Some(run_id);
        *self.state.projection.lock().await = projection;
        *self.state.cursor.lock().await = 0;

        debug!(
            workspace_id,
            %run_id,
            records = self.records.len(),
            "Fixture export initialized"
        );

        Ok(ExportInitialization {
            run_id,
            record_count: self.records.len() as u64,
            field_data,
        })
    }

    async fn next_block(
        &self,
        _workspace_id: i32,
        run_id: Uuid,
        block_size: usize,
    ) -> Result<Option<Vec<Record>>> {
        let call = self.state.block_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.faults.fetch_delay {
            tokio::time::sleep(delay).await;
        }

        if self.faults.fail_block_from.is_some_and(|n| call >= n) {
            return Err(SourceError::Transport(format!("block fetch {call} rejected")).into());
        }

        if *self.state.run_id.lock().await != Some(run_id) {
            return Err(SourceError::RunNotFound(run_id).into());
        }

        let projection = self.state.projection.lock().await.clone();
        let mut cursor = self.state.cursor.lock().await;
        let start = *cursor;
        let end = (start + block_size).min(self.records.len());
        *cursor = end;
        drop(cursor);

        if start >= end {
            return Ok(None);
        }

        Ok(Some(
            self.records[start..end]
                .iter()
                .map(|r| Self::to_record(r, &projection))
                .collect(),
        ))
    }

    async fn open_field_stream(
        &self,
        _workspace_id: i32,
        artifact_id: i64,
        field: &FieldRef,
    ) -> Result<FieldStream> {
        if self.faults.fail_streams_for.contains(&artifact_id) {
            return Err(SourceError::Transport(format!(
                "stream for record {artifact_id} rejected"
            ))
            .into());
        }

        let record = self
            .by_artifact
            .get(&artifact_id)
            .map(|&i| &self.records[i])
            .ok_or(SourceError::RecordNotFound(artifact_id))?;

        let content = record
            .streams
            .get(&field.name)
            .ok_or_else(|| SourceError::FieldNotFound(field.name.clone()))?;

        self.state.streams_opened.fetch_add(1, Ordering::SeqCst);
        let reader = TrackedReader::new(
            content.clone().into_bytes(),
            Arc::clone(&self.state.live_streams),
        );

        Ok(FieldStream::new(artifact_id, field.name.clone(), reader))
    }
}

#[async_trait]
impl SourceConnector for FixtureSource {
    async fn connect(
        &self,
        endpoint: &str,
        _credentials: &Credentials,
    ) -> Result<Arc<dyn ExportSource>> {
        if self.faults.fail_connect {
            return Err(ExportError::Source(SourceError::ConnectionFailed(
                endpoint.to_string(),
            )));
        }
        if self.faults.reject_credentials {
            return Err(SourceError::Unauthorized.into());
        }
        Ok(Arc::new(self.clone()))
    }
}

/// In-memory reader counting itself in a shared live-handle gauge
struct TrackedReader {
    inner: io::Cursor<Vec<u8>>,
    live: Arc<AtomicUsize>,
}

impl TrackedReader {
    fn new(bytes: Vec<u8>, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            inner: io::Cursor::new(bytes),
            live,
        }
    }
}

impl AsyncRead for TrackedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Drop for TrackedReader {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
