//! Error types for the sync engine.
//!
//! Only programmer errors and setup failures surface as `Err` from the
//! public API. Transport drops, resume failures, and malformed patches are
//! state transitions plus log events, never errors crossing into UI code.

use thiserror::Error;

/// Errors that can occur setting up the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The base endpoint is not a parseable URL.
    #[error("invalid base endpoint {base:?}: {message}")]
    InvalidBase { base: String, message: String },

    /// The push-event endpoint rejected the connection outright.
    #[error("event endpoint returned status {status}")]
    Endpoint { status: u16 },

    /// HTTP client failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
