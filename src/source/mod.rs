//! Remote export source abstractions
//!
//! The export pipeline talks to its source only through the traits in this
//! module. The transport and wire format behind them are left to the
//! implementor; [`FixtureSource`] is an in-process implementation used for
//! dry runs and tests.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::Credentials;
use crate::error::Result;
use crate::model::{ExportInitialization, FieldRef, FieldStream, QueryRequest, Record};

pub mod fixture;

pub use fixture::{FixtureRecord, FixtureSource};

/// Operations the export pipeline needs from a remote source
///
/// Implementations are shared by every worker of a run, so all methods take
/// `&self` and must tolerate concurrent calls.
#[async_trait]
pub trait ExportSource: Send + Sync {
    /// Start an export run for `query` and describe its fields
    async fn initialize_export(
        &self,
        workspace_id: i32,
        query: &QueryRequest,
    ) -> Result<ExportInitialization>;

    /// Fetch the next block of at most `block_size` records
    ///
    /// # Returns
    /// * `Result<Option<Vec<Record>>>` - Next block, or `None`/empty once exhausted
    async fn next_block(
        &self,
        workspace_id: i32,
        run_id: Uuid,
        block_size: usize,
    ) -> Result<Option<Vec<Record>>>;

    /// Open the full content of a long-text field as a byte stream
    async fn open_field_stream(
        &self,
        workspace_id: i32,
        artifact_id: i64,
        field: &FieldRef,
    ) -> Result<FieldStream>;
}

/// Factory connecting to an export source
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Connect to `endpoint` with `credentials`
    async fn connect(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ExportSource>>;
}
