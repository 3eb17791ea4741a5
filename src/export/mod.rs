//! Concurrent export pipeline
//!
//! Pulls every record of an export run from a source and hands each one to
//! an [`ExportHandler`] exactly once, resolving long-text fields the source
//! truncated into open streams along the way.
//!
//! # Architecture
//!
//! Three worker pools connected by bounded queues:
//!
//! 1. **BlockFetcher**: pulls blocks from the source and routes each record
//!    to the ready queue or, if a long-text value holds the sentinel, to the
//!    stream queue
//! 2. **StreamOpener**: opens a stream for every sentinel value and moves the
//!    record to the delivery queue
//! 3. **Deliverer**: takes from the delivery and ready queues, calls the
//!    handler and closes the record's streams
//!
//! These pools are started and shut down by the **ExportCoordinator**. The
//! first failure anywhere is reported to the handler once and cancels the
//! whole run.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use export_pipeline::config::ExportConfig;
//! use export_pipeline::export::ExportCoordinator;
//! use export_pipeline::handlers::SummaryHandler;
//! use export_pipeline::source::FixtureSource;
//!
//! # async fn example() -> export_pipeline::error::Result<()> {
//! let config = ExportConfig::from_file("export.toml")?;
//! let source = FixtureSource::from_json_file("records.json")?;
//! let coordinator = ExportCoordinator::new(config, Arc::new(source))?;
//!
//! let handler = Arc::new(SummaryHandler::new());
//! let outcome = coordinator.run_to_completion(handler.clone()).await;
//! println!("{} records, {}", outcome.records_delivered, outcome.state);
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod handler;
pub mod progress;
pub mod queue;

mod context;
mod deliverer;
mod fetcher;
mod streamer;

pub use coordinator::{ExportCoordinator, RunOutcome, RunState};
pub use handler::ExportHandler;
pub use progress::ProgressTracker;
