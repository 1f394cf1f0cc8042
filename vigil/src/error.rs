//! Error types for the Vigil monitoring library
//!
//! The taxonomy separates caller misuse (reported synchronously by the
//! tracer), startup configuration failures, and degradable persistence
//! conditions that must never take down the host application.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the Vigil library
#[derive(Error, Debug)]
pub enum VigilError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Identity cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Collector error: {0}")]
    Collector(#[from] CollectorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors, fatal to startup but never to running
/// instrumentation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse configuration: {reason}")]
    ParseFailed { reason: String },

    #[error("Invalid duration for {field}: '{value}' ({reason})")]
    InvalidDuration {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Failed to write configuration to {path}: {reason}")]
    WriteFailed { path: PathBuf, reason: String },
}

/// Function-tracing errors reported synchronously to the call site
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Invalid trace target: {reason}")]
    InvalidTarget { reason: String },

    #[error("Argument count mismatch for '{function}': expected {expected}, got {actual}")]
    ArityMismatch {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("Argument type mismatch for '{function}' at position {index}: expected {expected}")]
    ArgumentMismatch {
        function: String,
        index: usize,
        expected: &'static str,
    },

    #[error("Traced function '{function}' panicked: {message}")]
    TargetPanicked { function: String, message: String },
}

impl TraceError {
    /// Fill in the traced function's key on errors constructed inside a
    /// call-site adapter, which only knows argument positions and types.
    pub(crate) fn for_function(self, key: &str) -> TraceError {
        match self {
            TraceError::ArgumentMismatch {
                function,
                index,
                expected,
            } if function.is_empty() => TraceError::ArgumentMismatch {
                function: key.to_string(),
                index,
                expected,
            },
            TraceError::ArityMismatch {
                function,
                expected,
                actual,
            } if function.is_empty() => TraceError::ArityMismatch {
                function: key.to_string(),
                expected,
                actual,
            },
            other => other,
        }
    }
}

/// Metrics-store persistence errors; the store keeps serving from memory
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Metrics flush to {path} failed: {reason}")]
    FlushFailed { path: PathBuf, reason: String },

    #[error("Metrics load from {path} failed: {reason}")]
    LoadFailed { path: PathBuf, reason: String },
}

/// Service-identity cache errors; the cache falls back to an empty mapping
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Identity cache load from {path} failed: {reason}")]
    LoadFailed { path: PathBuf, reason: String },

    #[error("Identity cache persist to {path} failed: {reason}")]
    PersistFailed { path: PathBuf, reason: String },
}

/// Periodic collector lifecycle errors
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Collector is already running")]
    AlreadyRunning,

    #[error("Collector is not running")]
    NotRunning,
}

/// Result type alias for Vigil operations
pub type Result<T> = std::result::Result<T, VigilError>;

/// Result type aliases for subsystem operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type TraceResult<T> = std::result::Result<T, TraceError>;
pub type StorageResult<T> = std::result::Result<T, StorageError>;
pub type CacheResult<T> = std::result::Result<T, CacheError>;
pub type CollectorResult<T> = std::result::Result<T, CollectorError>;

impl VigilError {
    /// Whether the host application can keep running unaffected.
    ///
    /// Persistence and lifecycle failures degrade observability only;
    /// configuration errors are fatal to startup and caller-misuse errors
    /// need a code fix at the call site.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VigilError::Storage(_)
                | VigilError::Cache(_)
                | VigilError::Collector(_)
                | VigilError::Trace(TraceError::TargetPanicked { .. })
        )
    }

    /// Whether the error indicates misuse of the tracing API by the
    /// integrating application
    pub fn is_caller_misuse(&self) -> bool {
        matches!(
            self,
            VigilError::Trace(TraceError::InvalidTarget { .. })
                | VigilError::Trace(TraceError::ArityMismatch { .. })
                | VigilError::Trace(TraceError::ArgumentMismatch { .. })
        )
    }

    /// Category label used in logs and dashboards
    pub fn category(&self) -> &'static str {
        match self {
            VigilError::Config(_) => "config",
            VigilError::Trace(_) => "trace",
            VigilError::Storage(_) => "storage",
            VigilError::Cache(_) => "cache",
            VigilError::Collector(_) => "collector",
            VigilError::Io(_) => "io",
            VigilError::Serialization(_) => "serialization",
            VigilError::Internal(_) => "internal",
        }
    }
}

impl From<String> for VigilError {
    fn from(message: String) -> Self {
        VigilError::Internal(message)
    }
}

impl From<&str> for VigilError {
    fn from(message: &str) -> Self {
        VigilError::Internal(message.to_string())
    }
}
