//! Export Pipeline
//!
//! Runs an export against a source and reports what was delivered.
//!
//! # Usage
//!
//! ```bash
//! # Dry run against a fixture, summarizing long-text content
//! export-pipeline --config export.toml --fixture records.json
//!
//! # Print every record
//! export-pipeline --config export.toml --fixture records.json --print
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{Level, info};

use export_pipeline::cli::CliInterface;
use export_pipeline::error::{ExportError, Result};
use export_pipeline::export::{
    ExportCoordinator, ExportHandler, ProgressTracker, RunOutcome, RunState,
};
use export_pipeline::handlers::{PrintHandler, SummaryHandler};
use export_pipeline::source::FixtureSource;
use export_pipeline::utils::time::format_duration;

/// Application entry point
#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Main application logic
///
/// 1. Parse command-line arguments and load configuration
/// 2. Initialize logging
/// 3. Handle subcommands or run the export
///
/// # Returns
/// * `Result<bool>` - Whether the export completed
async fn run() -> Result<bool> {
    let cli = CliInterface::new()?;

    initialize_logging(&cli);

    if cli.handle_subcommand()? {
        return Ok(true);
    }

    let Some(fixture) = cli.fixture_path() else {
        return Err(ExportError::Generic(
            "no remote transport is built into this binary; pass --fixture <FILE> for a dry run"
                .to_string(),
        ));
    };

    let source = FixtureSource::from_json_file(&fixture)?;
    info!(fixture = %fixture.display(), records = source.record_count(), "Loaded fixture");

    let show_progress = !cli.args().no_progress && !cli.args().print;
    let progress = Arc::new(ProgressTracker::new(show_progress));
    let coordinator =
        ExportCoordinator::new(cli.config().clone(), Arc::new(source))?.with_progress(progress);

    let cancel = CancellationToken::new();
    let ctrl_c_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => cancel.cancel(),
                Err(err) => eprintln!("Failed to listen for Ctrl+C: {}", err),
            }
        })
    };

    let outcome = if cli.args().print {
        let handler: Arc<dyn ExportHandler> = Arc::new(PrintHandler::stdout());
        coordinator.run(handler, cancel).await
    } else {
        let summary = Arc::new(SummaryHandler::new());
        let outcome = coordinator.run(summary.clone(), cancel).await;
        print_summary(&summary, &outcome).await;
        outcome
    };

    ctrl_c_handle.abort();

    print_outcome(&outcome);
    Ok(outcome.completed())
}

async fn print_summary(summary: &SummaryHandler, outcome: &RunOutcome) {
    println!("{}", summary.metrics().await);
    if outcome.records_delivered > 0 {
        println!("Digest: {}", summary.digest());
    }
    if let Some(error) = summary.error().await {
        eprintln!("Export failed: {}", error);
    }
}

fn print_outcome(outcome: &RunOutcome) {
    let elapsed = std::time::Duration::from_millis(outcome.elapsed_ms);
    let line = format!(
        "Export {}: {}/{} records delivered, {} streams opened in {}",
        outcome.state,
        outcome.records_delivered,
        outcome.records_expected,
        outcome.streams_opened,
        format_duration(elapsed)
    );

    match outcome.state {
        RunState::Completed => println!("{}", line),
        RunState::Cancelled | RunState::Failed => eprintln!("{}", line),
    }
}

/// Initialize logging system based on verbosity level
///
/// # Arguments
/// * `cli` - CLI interface with verbosity settings
fn initialize_logging(cli: &CliInterface) {
    let level = if cli.args().very_verbose {
        Level::TRACE
    } else if cli.args().verbose {
        Level::DEBUG
    } else {
        cli.config().logging.level.to_tracing_level()
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if cli.config().logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}
