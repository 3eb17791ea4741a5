use std::{fmt, io};

use uuid::Uuid;

/// Crate-wide `Result` type using [`ExportError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, ExportError>;

/// Top-level error type for export operations.
///
/// The pipeline-facing variants map one-to-one onto the failure classes a
/// run can report through [`crate::export::ExportHandler::on_error`].
#[derive(Debug)]
pub enum ExportError {
    /// Configuration errors, raised before a run starts.
    Config(ConfigError),

    /// Connecting to the source or initializing the export failed.
    Initialization(String),

    /// Retrieving a block of records failed.
    Fetch(String),

    /// Opening a long-text stream failed.
    StreamOpen(String),

    /// The export handler's per-record callback failed or panicked.
    Callback(String),

    /// Unexpected fault in the run controller itself.
    Orchestration(String),

    /// Error reported by the remote export source.
    Source(SourceError),

    /// I/O errors.
    Io(io::Error),

    /// Generic error with a free-form message.
    Generic(String),
}

/// Classification of an [`ExportError`] by the pipeline stage that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InitializationFailure,
    FetchFailure,
    StreamOpenFailure,
    ConsumerCallbackFailure,
    OrchestrationFailure,
    Other,
}

/// Errors reported by an export source implementation.
#[derive(Debug)]
pub enum SourceError {
    /// Could not reach the source endpoint.
    ConnectionFailed(String),

    /// Credentials were rejected.
    Unauthorized,

    /// The run id is unknown to the source.
    RunNotFound(Uuid),

    /// A requested field does not exist.
    FieldNotFound(String),

    /// A record referenced by a stream request does not exist.
    RecordNotFound(i64),

    /// Transport-level failure with a free-form message.
    Transport(String),
}

/// Configuration-specific errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Missing required field.
    MissingField(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },
}

impl ExportError {
    /// Stage classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExportError::Initialization(_) => ErrorKind::InitializationFailure,
            ExportError::Fetch(_) => ErrorKind::FetchFailure,
            ExportError::StreamOpen(_) => ErrorKind::StreamOpenFailure,
            ExportError::Callback(_) => ErrorKind::ConsumerCallbackFailure,
            ExportError::Orchestration(_) => ErrorKind::OrchestrationFailure,
            _ => ErrorKind::Other,
        }
    }
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Config(e) => write!(f, "Configuration error: {e}"),
            ExportError::Initialization(msg) => write!(f, "Initialization failed: {msg}"),
            ExportError::Fetch(msg) => write!(f, "Block fetch failed: {msg}"),
            ExportError::StreamOpen(msg) => write!(f, "Stream open failed: {msg}"),
            ExportError::Callback(msg) => write!(f, "Export handler failed: {msg}"),
            ExportError::Orchestration(msg) => write!(f, "Orchestration failed: {msg}"),
            ExportError::Source(e) => write!(f, "Source error: {e}"),
            ExportError::Io(e) => write!(f, "I/O error: {e}"),
            ExportError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::ConnectionFailed(msg) => write!(f, "Failed to connect: {msg}"),
            SourceError::Unauthorized => write!(f, "Credentials rejected"),
            SourceError::RunNotFound(id) => write!(f, "Export run not found: {id}"),
            SourceError::FieldNotFound(name) => write!(f, "Field not found: {name}"),
            SourceError::RecordNotFound(id) => write!(f, "Record not found: {id}"),
            SourceError::Transport(msg) => write!(f, "Transport error: {msg}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::MissingField(field) => write!(f, "Missing required field: {field}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InitializationFailure => "InitializationFailure",
            ErrorKind::FetchFailure => "FetchFailure",
            ErrorKind::StreamOpenFailure => "StreamOpenFailure",
            ErrorKind::ConsumerCallbackFailure => "ConsumerCallbackFailure",
            ErrorKind::OrchestrationFailure => "OrchestrationFailure",
            ErrorKind::Other => "Other",
        };
        f.write_str(name)
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Config(e) => Some(e),
            ExportError::Source(e) => Some(e),
            ExportError::Io(e) => Some(e),
            _ => None,
        }
    }
}
impl std::error::Error for SourceError {}
impl std::error::Error for ConfigError {}

/* ========================= Conversions to ExportError ========================= */

impl From<io::Error> for ExportError {
    fn from(err: io::Error) -> Self {
        ExportError::Io(err)
    }
}

impl From<SourceError> for ExportError {
    fn from(err: SourceError) -> Self {
        ExportError::Source(err)
    }
}

impl From<ConfigError> for ExportError {
    fn from(err: ConfigError) -> Self {
        ExportError::Config(err)
    }
}

impl From<String> for ExportError {
    fn from(msg: String) -> Self {
        ExportError::Generic(msg)
    }
}

impl From<&str> for ExportError {
    fn from(msg: &str) -> Self {
        ExportError::Generic(msg.to_owned())
    }
}
