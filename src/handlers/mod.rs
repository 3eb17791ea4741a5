//! Bundled export handlers
//!
//! - [`PrintHandler`]: writes each record as text
//! - [`SummaryHandler`]: counts, sizes and digests the long-text content

pub mod hash;
pub mod print;
pub mod summary;

pub use hash::HashCollector;
pub use print::PrintHandler;
pub use summary::{RunMetrics, SummaryHandler};
