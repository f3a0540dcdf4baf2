//! Error types for the ingestion and persistence pipeline
//!
//! Per-event failures (`DecodeError`) are logged and skipped, per-batch
//! failures (`StoreError`) are retried and deferred, and subscriber
//! failures (`SinkError`) only ever remove the failing subscriber.

use std::fmt;
use std::io::Error as IoError;

/// A line from a producer that could not become a `MetricEvent`
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Line is not valid JSON (or not valid UTF-8)
    Malformed(String),
    /// A required field (producer id, metric name, value) is absent
    MissingField(&'static str),
    /// A field is present but has an unusable value
    InvalidValue { field: &'static str, reason: String },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(msg) => write!(f, "malformed record: {}", msg),
            DecodeError::MissingField(field) => write!(f, "missing required field: {}", field),
            DecodeError::InvalidValue { field, reason } => {
                write!(f, "invalid value for {}: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl DecodeError {
    /// Validation errors concern content, malformed records concern syntax
    pub fn is_validation(&self) -> bool {
        !matches!(self, DecodeError::Malformed(_))
    }
}

/// Error type for durable store operations
#[derive(Debug)]
pub enum StoreError {
    /// Store could not be reached or timed out
    Unavailable(String),
    /// Store refused the write (constraint, aborted transaction, ...)
    Rejected(String),
    /// I/O error
    Io(IoError),
    /// Rows could not be encoded for the store
    Serialization(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
            StoreError::Rejected(msg) => write!(f, "store rejected write: {}", msg),
            StoreError::Io(e) => write!(f, "I/O error: {}", e),
            StoreError::Serialization(msg) => write!(f, "serialization error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for StoreError {
    fn from(e: IoError) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::ConnectionRefused => {
                StoreError::Unavailable(e.to_string())
            }
            _ => StoreError::Io(e),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Producer registration failed; the connection that needed it is closed
#[derive(Debug)]
pub struct RegistrationError {
    pub producer_id: String,
    pub source: StoreError,
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to register producer {}: {}",
            self.producer_id, self.source
        )
    }
}

impl std::error::Error for RegistrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// A subscriber's push channel refused a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Receiving side is gone
    Closed,
    /// Subscriber is not draining its queue fast enough
    Full,
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Closed => write!(f, "subscriber channel closed"),
            SinkError::Full => write!(f, "subscriber channel full"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Dashboard broadcaster errors
#[derive(Debug)]
pub enum BroadcastError {
    /// Snapshot could not be serialized
    Serialization(String),
    /// The initial snapshot could not be delivered to a new subscriber
    InitFailed(SinkError),
}

impl fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BroadcastError::Serialization(msg) => write!(f, "serialization error: {}", msg),
            BroadcastError::InitFailed(e) => write!(f, "initial snapshot not delivered: {}", e),
        }
    }
}

impl std::error::Error for BroadcastError {}

impl From<serde_json::Error> for BroadcastError {
    fn from(e: serde_json::Error) -> Self {
        BroadcastError::Serialization(e.to_string())
    }
}

/// Configuration loading and validation errors
#[derive(Debug)]
pub enum ConfigError {
    Io(IoError),
    Parse(String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "cannot read config: {}", e),
            ConfigError::Parse(msg) => write!(f, "cannot parse config: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<IoError> for ConfigError {
    fn from(e: IoError) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}
