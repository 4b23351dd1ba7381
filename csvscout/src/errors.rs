use std::path::PathBuf;
use thiserror::Error;

/// Result type for scan operations
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors that can occur while preparing or running a scan.
///
/// Configuration problems (`InvalidPattern`, `EmptyQuery`, `ConfigError`)
/// are reported synchronously before any input is read. Stream problems
/// (`IoError`, `EncodingError`, `RecordTooLong`) fail the lane that hit
/// them; in a parallel run the other shards keep going.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Invalid pattern for field '{field}': {message}")]
    InvalidPattern { field: String, message: String },
    #[error("Query has no field/pattern entries")]
    EmptyQuery,
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid UTF-8 on line {line}")]
    EncodingError {
        line: u64,
        #[source]
        source: std::str::Utf8Error,
    },
    #[error("Record exceeded {limit} bytes without a line terminator")]
    RecordTooLong { limit: usize },
    #[error("Worker {index} stopped without reporting a result")]
    WorkerFault { index: usize },
    #[error("Run cancelled")]
    Cancelled,
}

impl ScanError {
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound(path.into())
    }

    pub fn permission_denied(path: impl Into<PathBuf>) -> Self {
        Self::PermissionDenied(path.into())
    }

    pub fn invalid_pattern(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPattern {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// True for errors that must block the run from starting at all.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidPattern { .. } | Self::EmptyQuery | Self::ConfigError(_)
        )
    }
}
