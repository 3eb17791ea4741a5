//! Export Pipeline Library
//!
//! A concurrent pipeline that pulls every record of an export run from a
//! paged source, opens streams for long-text fields the source only returned
//! as a placeholder, and delivers each record exactly once to a handler.
//!
//! # Modules
//!
//! - `cli`: Command-line interface and argument parsing
//! - `config`: Configuration management
//! - `error`: Error types and handling
//! - `export`: The pipeline stages and the run coordinator
//! - `handlers`: Bundled export handlers
//! - `model`: Records, field values and run metadata
//! - `source`: Source traits and the in-process fixture source
//! - `utils`: Utility functions and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use export_pipeline::{ExportConfig, ExportCoordinator, FixtureSource, SummaryHandler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExportConfig::from_file("export.toml")?;
//!     let source = FixtureSource::from_json_file("records.json")?;
//!     let coordinator = ExportCoordinator::new(config, Arc::new(source))?;
//!
//!     let summary = Arc::new(SummaryHandler::new());
//!     let outcome = coordinator.run_to_completion(summary.clone()).await;
//!
//!     println!("{}: {}", outcome.state, summary.metrics().await);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod handlers;
pub mod model;
pub mod source;
pub mod utils;

// Re-export commonly used types
pub use config::ExportConfig;
pub use error::{ExportError, Result};
pub use export::{ExportCoordinator, ExportHandler, RunOutcome, RunState};
pub use handlers::{PrintHandler, SummaryHandler};
pub use model::{FieldValue, Record, RunMetadata};
pub use source::{ExportSource, FixtureSource, SourceConnector};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
///
/// # Returns
/// * `&str` - Version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
