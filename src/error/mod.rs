//! Error handling for export runs.
//!
//! This module provides:
//! - A single crate-wide error type, [`ExportError`], with one variant per
//!   pipeline failure class
//! - Source- and configuration-specific error kinds
//! - [`ErrorKind`] for classifying a reported failure by stage
//!
//! # Example
//!
//! ```rust
//! use export_pipeline::error::{ErrorKind, ExportError, Result};
//!
//! fn open() -> Result<()> {
//!     Err(ExportError::StreamOpen("connection reset".to_string()))
//! }
//!
//! assert_eq!(open().unwrap_err().kind(), ErrorKind::StreamOpenFailure);
//! ```

pub mod kinds;

// Re-export commonly used types
pub use kinds::{ConfigError, ErrorKind, ExportError, Result, SourceError};
