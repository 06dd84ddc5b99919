//! Typed errors for the tracker core
//!
//! Uses thiserror for derive macros that make error types that:
//! 1. Implement std::error::Error automatically
//! 2. Provide consistent, structured error messages
//! 3. Serialize to plain strings for Tauri's IPC layer

use thiserror::Error;

/// Main error type for tracker operations
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Transport-level failure talking to the remote store or push service
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote store answered with a non-success status
    #[error("Remote store rejected {operation} on '{path}': {status}")]
    RemoteRejected {
        operation: &'static str,
        path: String,
        status: u16,
    },

    /// The remote store is unreachable (memory store failure injection, closed stream)
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file error
    #[error("Config error: {0}")]
    Config(String),

    /// A history record id that cannot address a single record
    #[error("Invalid record id: '{0}'")]
    InvalidRecordId(String),

    /// Push notification delivery error
    #[error("Notification error: {0}")]
    Notification(String),

    /// Operation attempted after the store was disposed
    #[error("Store has been disposed")]
    Disposed,
}

/// Convert TrackerError to String for Tauri commands
/// Tauri commands expect Result<T, String> or impl Into<InvokeError>
impl From<TrackerError> for String {
    fn from(err: TrackerError) -> Self {
        err.to_string()
    }
}

/// Helper trait for converting Result<T, E> to Result<T, TrackerError>
pub trait ResultExt<T> {
    fn map_tracker_err<F: FnOnce(String) -> TrackerError>(self, f: F) -> Result<T, TrackerError>;
}

impl<T, E: ToString> ResultExt<T> for Result<T, E> {
    fn map_tracker_err<F: FnOnce(String) -> TrackerError>(self, f: F) -> Result<T, TrackerError> {
        self.map_err(|e| f(e.to_string()))
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
