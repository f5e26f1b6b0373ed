//! # Scry Sync
//!
//! Read-model synchronization engine for the Scry launcher UI.
//!
//! Every panel in the launcher renders from named JSON documents mirrored
//! from server-authoritative state. This crate keeps those mirrors
//! consistent: it applies an ordered stream of JSON Patch operations
//! delivered over a resumable, auto-reconnecting SSE transport, and fans
//! updates out to many independent subscribers without forcing them to
//! re-fetch or re-parse whole documents.
//!
//! ## Components
//!
//! - **Model Store** ([`ModelStore`]): registry of named documents with
//!   version counters, stale flags, and per-name subscriber lists.
//! - **Event Router** ([`EventRouter`]): classifies envelopes by kind against
//!   exact, wildcard, predicate, and lifecycle selectors.
//! - **Session Manager** ([`session::SessionManager`], driven through
//!   [`SyncClient`]): connection lifecycle, bounded-backoff reconnect,
//!   resume-vs-resync decisions, server-side prefix filtering.
//! - **Patch Engine** (re-exported from `scry-patch`): pure, in-place JSON
//!   Patch application.
//!
//! ## Control flow
//!
//! ```text
//! ┌────────────────┐   envelopes   ┌─────────────┐   kind match   ┌──────────┐
//! │ SessionManager ├──────────────►│ EventRouter ├───────────────►│ handlers │
//! └──────┬─────────┘               └─────────────┘                └──────────┘
//!        │ state.read.model.patch
//!        ▼
//! ┌────────────┐  apply + emit  ┌─────────────┐
//! │ ModelStore ├───────────────►│ subscribers │
//! └────────────┘                └─────────────┘
//! ```
//!
//! ## Correctness guard
//!
//! Patches are only trustworthy immediately after a known-good snapshot or a
//! provably continuous stream. A reconnect that cannot present a fresh resume
//! token flags every mirrored model stale; callers re-prime flagged models
//! with [`ModelStore::set`] before trusting further patches.
//!
//! ## Example
//!
//! ```rust,ignore
//! use scry_sync::{ConnectOptions, SyncClient};
//!
//! let client = SyncClient::new()?;
//! client.store().subscribe("models", |doc| {
//!     // re-render from doc.read(); keep this quick
//! });
//! client.connect("http://127.0.0.1:8091", ConnectOptions::new(), true)?;
//! ```

pub mod client;
pub mod envelope;
pub mod error;
pub mod router;
pub mod session;
pub mod sse;
pub mod store;
pub mod subscription;
pub mod topics;

// Re-export main types
pub use client::SyncClient;
pub use envelope::{Envelope, PatchEvent};
pub use error::SyncError;
pub use router::{EventRouter, RouterStats};
pub use session::{
    ConnectOptions, RetryPolicy, SessionManager, SessionState, SyncConfig, DEFAULT_EVENTS_PATH,
};
pub use sse::{SseFrame, SseParser};
pub use store::{Document, ModelStore, StoreStats};
pub use subscription::{Lifecycle, Selector, SubscriptionId};

// The patch engine doubles as the store's test surface.
pub use scry_patch::{apply, Outcome, PatchError, PatchOp};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_store_router_full_flow() {
        let store = ModelStore::new();
        let router = EventRouter::new();

        let model_hits = Arc::new(AtomicUsize::new(0));
        let counter = model_hits.clone();
        store.subscribe("models", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let routed = Arc::new(AtomicUsize::new(0));
        let counter = routed.clone();
        router.subscribe(Selector::exact(topics::TOPIC_READMODEL_PATCH), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // What the session manager does per patch envelope.
        let envelope = Envelope {
            time: "2024-01-01T00:00:00Z".into(),
            kind: topics::TOPIC_READMODEL_PATCH.into(),
            payload: json!({
                "id": "models",
                "patch": [{"op": "add", "path": "/items", "value": [1, 2]}]
            }),
        };
        store.apply_patch_event(&envelope.payload);
        router.route(&envelope);

        assert_eq!(model_hits.load(Ordering::SeqCst), 1);
        assert_eq!(routed.load(Ordering::SeqCst), 1);
        assert_eq!(store.get("models").snapshot(), json!({"items": [1, 2]}));
    }
}
