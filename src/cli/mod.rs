//! Command-line interface for export-pipeline
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Configuration loading and command-line overrides
//! - The `version` and `config` subcommands

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::{Credentials, ExportConfig, LogLevel};
use crate::error::Result;
use crate::utils::fs::expand_home;

/// Concurrent export pipeline
#[derive(Parser, Debug)]
#[command(
    name = "export-pipeline",
    version,
    about = "Concurrent record export pipeline",
    long_about = "Pulls every record of an export run in blocks, streams long-text fields
that were truncated inline, and hands each record to a handler exactly once."
)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Serve records from a JSON fixture file instead of a remote source
    #[arg(short = 'f', long, value_name = "FILE")]
    pub fixture: Option<String>,

    /// Records requested per block
    #[arg(long, value_name = "N")]
    pub block_size: Option<usize>,

    /// Workers per stage
    #[arg(long, value_name = "N")]
    pub scale_factor: Option<usize>,

    /// Print every record instead of summarizing the run
    #[arg(long)]
    pub print: bool,

    /// Disable the progress bar
    #[arg(long = "no-progress")]
    pub no_progress: bool,

    /// Verbose mode (detailed logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Very verbose mode (debug logging)
    #[arg(long = "vv")]
    pub very_verbose: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Subcommands for export-pipeline
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show version information
    Version,

    /// Show configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Validate configuration file
        #[arg(long)]
        validate: bool,
    },
}

/// CLI interface handler
pub struct CliInterface {
    /// Parsed command-line arguments
    args: CliArgs,

    /// Loaded configuration with overrides applied
    config: ExportConfig,
}

impl CliInterface {
    /// Create a new CLI interface from the process arguments
    ///
    /// # Returns
    /// * `Result<Self>` - New CLI interface or error
    pub fn new() -> Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    /// Create a CLI interface from already parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let config = Self::load_config(&args)?;
        Ok(Self { args, config })
    }

    /// Load configuration from file and merge with arguments
    ///
    /// The result is not validated here; the coordinator validates it
    /// before a run starts.
    fn load_config(args: &CliArgs) -> Result<ExportConfig> {
        let mut config = ExportConfig::load_from_file(args.config_file.as_deref())?;
        Self::apply_args_to_config(&mut config, args);
        Ok(config)
    }

    /// Override configuration values with CLI arguments where provided
    fn apply_args_to_config(config: &mut ExportConfig, args: &CliArgs) {
        if let Some(block_size) = args.block_size {
            config.block_size = block_size;
        }

        if let Some(scale_factor) = args.scale_factor {
            config.scale_factor = scale_factor;
        }

        config.logging.level = if args.very_verbose {
            LogLevel::Trace
        } else if args.verbose {
            LogLevel::Debug
        } else {
            config.logging.level
        };
    }

    /// Get the configuration
    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Get the CLI arguments
    pub fn args(&self) -> &CliArgs {
        &self.args
    }

    /// Fixture file to serve records from, with `~` expanded
    pub fn fixture_path(&self) -> Option<PathBuf> {
        self.args.fixture.as_deref().map(expand_home)
    }

    /// Handle subcommands
    ///
    /// # Returns
    /// * `Result<bool>` - True if subcommand was handled, false to continue
    pub fn handle_subcommand(&self) -> Result<bool> {
        match &self.args.command {
            Some(Commands::Version) => {
                self.show_version();
                Ok(true)
            }
            Some(Commands::Config { show, validate }) => {
                self.handle_config_command(*show, *validate)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Show version information
    fn show_version(&self) {
        println!("export-pipeline version {}", env!("CARGO_PKG_VERSION"));
        println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
    }

    fn handle_config_command(&self, show: bool, validate: bool) -> Result<()> {
        if validate {
            self.validate_config_file();
        }

        if show {
            self.show_config()?;
        }

        Ok(())
    }

    /// Validate the configuration file and report the result
    fn validate_config_file(&self) {
        let path = self.config_path();
        println!("Validating configuration file: {}", path.display());

        if !path.exists() {
            println!("❌ Configuration file does not exist");
            return;
        }

        match ExportConfig::from_file(&path) {
            Ok(mut config) => match config.validate() {
                Ok(()) => println!("✅ Configuration is valid"),
                Err(e) => println!("❌ Configuration validation failed: {}", e),
            },
            Err(e) => println!("❌ Failed to load configuration: {}", e),
        }
    }

    /// Show effective configuration with secrets redacted
    fn show_config(&self) -> Result<()> {
        println!("Configuration file: {}", self.config_path().display());
        println!();
        println!("=== Effective Configuration ===");
        println!();
        println!("{}", redacted(&self.config).to_toml_string()?);
        Ok(())
    }

    /// Get configuration file path (from args or default)
    fn config_path(&self) -> PathBuf {
        self.args
            .config_file
            .as_deref()
            .map(Path::to_path_buf)
            .unwrap_or_else(ExportConfig::default_path)
    }
}

/// Copy of `config` safe to print
fn redacted(config: &ExportConfig) -> ExportConfig {
    const HIDDEN: &str = "***";
    let mut shown = config.clone();
    shown.credentials = shown.credentials.map(|credentials| match credentials {
        Credentials::UsernamePassword { username, .. } => Credentials::UsernamePassword {
            username,
            password: HIDDEN.to_string(),
        },
        Credentials::BearerToken { .. } => Credentials::BearerToken {
            token: HIDDEN.to_string(),
        },
    });
    shown
}
