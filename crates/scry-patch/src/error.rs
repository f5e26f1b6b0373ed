//! Error types for patch application.

use thiserror::Error;

/// Errors that can occur while applying a patch operation.
///
/// All of these describe malformed input, never engine state; the sync layer
/// treats them as local no-ops and counts them as anomalies.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatchError {
    /// An ancestor on the path resolved to a scalar and cannot be traversed.
    #[error("cannot traverse scalar at segment {segment:?} of pointer {pointer:?}")]
    UnresolvablePath { pointer: String, segment: String },

    /// The parent is an array but the segment is not a usable index.
    #[error("invalid array index {segment:?} in pointer {pointer:?}")]
    InvalidIndex { pointer: String, segment: String },

    /// The `from` pointer of a `move`/`copy` does not resolve to a value.
    #[error("source pointer {pointer:?} does not resolve")]
    SourceNotFound { pointer: String },
}
