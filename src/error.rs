//! ==============================================================================
//! error.rs - error types for the telemetry core
//! ==============================================================================
//!
//! relationships:
//!     - used by: time_codec.rs, ingest.rs, query.rs
//!     - mapped to status codes in server.rs (ApiError)
//!
//! ==============================================================================

use thiserror::Error;

/// A reading timestamp that does not match the wire layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed timestamp {text:?}: {reason}")]
pub struct MalformedTimestamp {
    pub text: String,
    pub reason: String,
}

impl MalformedTimestamp {
    pub fn new(text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reason: reason.into(),
        }
    }
}

/// Rejections that stop a batch before anything is merged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("device id must not be empty")]
    EmptyDeviceId,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("no device with id {0:?} found")]
    DeviceNotFound(String),
}
