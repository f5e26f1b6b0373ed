//! # Scry Patch
//!
//! In-place JSON Patch application for the Scry read-model mirrors.
//!
//! The server publishes document changes as RFC 6902-shaped operation lists
//! (`add`/`remove`/`replace`/`move`/`copy`) against slash-delimited pointers.
//! This crate applies one operation to an in-memory `serde_json::Value`,
//! with the tolerant semantics the surrounding sync engine relies on:
//!
//! - Missing intermediate containers are auto-created as plain objects,
//!   unless the value already present at that level is an array, in which
//!   case array semantics apply (numeric index descends, the final segment
//!   `-` appends).
//! - `replace` of a missing target degrades to `add` and is reported as
//!   [`Outcome::ReplacedMissing`] so the caller can keep real inconsistency
//!   visible without dropping the stream.
//! - `copy` inserts a deep, independent clone; mutating either path later
//!   never affects the other.
//! - Malformed pointers yield a [`PatchError`] instead of panicking; the
//!   caller decides whether to skip, count, or resync.
//!
//! ## Example
//!
//! ```rust
//! use scry_patch::{apply, PatchOp};
//! use serde_json::json;
//!
//! let mut doc = json!({});
//! apply(&mut doc, &PatchOp::Add { path: "/items".into(), value: json!([]) }).unwrap();
//! apply(&mut doc, &PatchOp::Add { path: "/items/-".into(), value: json!({"name": "alpha"}) }).unwrap();
//!
//! assert_eq!(doc, json!({"items": [{"name": "alpha"}]}));
//! ```

pub mod apply;
pub mod error;
pub mod op;
pub mod pointer;

pub use apply::{apply, Outcome};
pub use error::PatchError;
pub use op::PatchOp;
pub use pointer::{resolve, Pointer};
