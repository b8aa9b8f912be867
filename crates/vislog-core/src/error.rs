//! Error types for vislog-core.
//!
//! `VislogError` covers everything reported synchronously to the caller of a
//! recording API. `SinkError` covers transport failures, which travel through
//! the sink error observer instead of unwinding a `log` call.

use thiserror::Error;

use crate::component::ValueTypeTag;
use crate::time::TimeType;

#[derive(Error, Debug)]
pub enum VislogError {
    #[error("Malformed entity path {path:?}: {reason}")]
    MalformedPath { path: String, reason: String },

    #[error("Timeline '{timeline}' holds {expected} values, refusing to set a {found} value")]
    TimelineTypeConflict {
        timeline: String,
        expected: TimeType,
        found: TimeType,
    },

    #[error("Component '{component}' declared as {declared} but data is {actual}")]
    TypeMismatch {
        component: String,
        declared: ValueTypeTag,
        actual: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Recording stream is closed")]
    StreamClosed,

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, VislogError>;

/// Failure of a single sink. Never aborts a `log` call.
#[derive(Error, Debug)]
pub enum SinkError {
    /// The target could not be reached or launched.
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    /// The bounded send queue is full.
    #[error("Sink queue overflow (capacity {capacity})")]
    Overflow { capacity: usize },

    /// The sink has been closed and accepts no more messages.
    #[error("Sink is closed")]
    Closed,

    /// A previous write failed; the sink instance is no longer usable.
    #[error("Sink failed permanently: {0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encode(String),
}

/// A sink failure together with the name of the sink that produced it.
#[derive(Debug)]
pub struct SinkFailure {
    pub sink: String,
    pub error: SinkError,
}

impl std::fmt::Display for SinkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.sink, self.error)
    }
}
