//! Configuration for export runs
//!
//! This module handles loading and validating the export configuration:
//! - Configuration files (TOML format)
//! - Command-line overrides applied by the binary
//!
//! Validation happens once, before a run is constructed; nothing here is
//! re-checked while the pipeline is running.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};
use crate::model::{DOCUMENT_ARTIFACT_TYPE_ID, ObjectTypeRef, QueryRequest};

/// Smallest accepted scale factor
pub const MIN_SCALE_FACTOR: usize = 1;

/// Largest accepted scale factor
pub const MAX_SCALE_FACTOR: usize = 16;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Source instance, scheme and authority only (e.g. `https://export.example.com`)
    #[serde(default)]
    pub endpoint: String,

    /// Credentials used to connect to the source
    #[serde(default)]
    pub credentials: Option<Credentials>,

    /// Workspace the records are exported from
    #[serde(default)]
    pub workspace_id: i32,

    /// Number of records requested per block fetch
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Degree of parallelism of the fetch and stream stages
    #[serde(default = "default_scale_factor")]
    pub scale_factor: usize,

    /// Export query
    #[serde(default)]
    pub query: QueryRequest,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Credentials for the export source
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credentials {
    UsernamePassword { username: String, password: String },
    BearerToken { token: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::BearerToken { .. } => f
                .debug_struct("BearerToken")
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_log_timestamps")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_block_size() -> usize {
    1000
}

fn default_scale_factor() -> usize {
    4
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

fn default_log_timestamps() -> bool {
    true
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            credentials: None,
            workspace_id: 0,
            block_size: default_block_size(),
            scale_factor: default_scale_factor(),
            query: QueryRequest::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: default_log_timestamps(),
        }
    }
}

impl ExportConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// * `Result<ExportConfig>` - Parsed (not yet validated) configuration
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Load configuration from the given path, or from the default path
    ///
    /// A missing file at the default path yields the default configuration;
    /// a missing file at an explicit path is an error.
    pub fn load_from_file(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".export-pipeline")
            .join("config.toml")
    }

    /// Serialize the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Validate the configuration and fill in defaults that depend on it
    ///
    /// # Returns
    /// * `Result<()>` - Ok if valid, error otherwise
    pub fn validate(&mut self) -> Result<()> {
        validate_endpoint(&self.endpoint)?;

        if self.credentials.is_none() {
            return Err(ConfigError::MissingField("credentials".to_string()).into());
        }

        if self.workspace_id == 0 {
            return Err(ConfigError::MissingField("workspace_id".to_string()).into());
        }

        if self.block_size == 0 {
            return Err(invalid("block_size", self.block_size));
        }

        if !(MIN_SCALE_FACTOR..=MAX_SCALE_FACTOR).contains(&self.scale_factor) {
            return Err(invalid("scale_factor", self.scale_factor));
        }

        if self.query.fields.is_empty() {
            return Err(ConfigError::MissingField("query.fields".to_string()).into());
        }

        if self.query.object_type.is_none() {
            self.query.object_type = Some(ObjectTypeRef {
                artifact_type_id: DOCUMENT_ARTIFACT_TYPE_ID,
            });
        }

        Ok(())
    }
}

fn invalid(field: &str, value: impl ToString) -> crate::error::ExportError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}

/// Check that an endpoint is `http(s)://authority` with no path
fn validate_endpoint(endpoint: &str) -> Result<()> {
    if endpoint.is_empty() {
        return Err(ConfigError::MissingField("endpoint".to_string()).into());
    }

    let rest = endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("http://"))
        .ok_or_else(|| invalid("endpoint", endpoint))?;

    let authority = rest.strip_suffix('/').unwrap_or(rest);
    if authority.is_empty() || authority.contains(['/', '?', '#']) {
        return Err(invalid("endpoint", endpoint));
    }

    Ok(())
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}
