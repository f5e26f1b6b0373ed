//! Event routing: classify incoming envelopes against registered interests
//! and dispatch to matching handlers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::subscription::{next_subscription_id, Lifecycle, Selector, SubscriptionId};

struct RouterSubscription {
    id: SubscriptionId,
    selector: Selector,
    handler: Box<dyn Fn(&Envelope) + Send + Sync>,
}

/// Dispatches event envelopes to subscribers.
///
/// Subscriptions are held in insertion order and dispatched in that order.
/// Dispatch iterates a snapshot of the list, so a handler registered during
/// delivery of an envelope is not invoked for that envelope. A panicking
/// handler is isolated, logged, and counted; delivery to the remaining
/// handlers continues.
pub struct EventRouter {
    subscriptions: RwLock<Vec<Arc<RouterSubscription>>>,
    stats: RwLock<RouterStats>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            stats: RwLock::new(RouterStats::default()),
        }
    }

    /// Register interest in envelopes matching `selector`.
    pub fn subscribe(
        &self,
        selector: Selector,
        handler: impl Fn(&Envelope) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = next_subscription_id();
        debug!(subscription = id, selector = ?selector, "event subscription added");
        self.subscriptions.write().push(Arc::new(RouterSubscription {
            id,
            selector,
            handler: Box::new(handler),
        }));
        id
    }

    /// Remove a subscription. Takes effect for future dispatches; a dispatch
    /// already in progress completes with its snapshot.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|sub| sub.id != id);
        before != subscriptions.len()
    }

    /// Dispatch a wire envelope to every matching subscription.
    pub fn route(&self, envelope: &Envelope) {
        let matching: Vec<_> = self
            .subscriptions
            .read()
            .iter()
            .filter(|sub| sub.selector.matches_kind(&envelope.kind))
            .cloned()
            .collect();
        self.stats.write().events_routed += 1;
        self.dispatch(envelope, matching);
    }

    /// Dispatch a synthesized transport sentinel. Delivered only to
    /// [`Selector::Lifecycle`] subscriptions; wildcard and kind subscribers
    /// see wire envelopes only.
    pub fn route_lifecycle(&self, lifecycle: Lifecycle, payload: Value) {
        let envelope = Envelope::synthetic(lifecycle.kind(), payload);
        let matching: Vec<_> = self
            .subscriptions
            .read()
            .iter()
            .filter(|sub| sub.selector.matches_lifecycle(lifecycle))
            .cloned()
            .collect();
        self.stats.write().lifecycle_routed += 1;
        debug!(kind = %envelope.kind, subscribers = matching.len(), "routing lifecycle sentinel");
        self.dispatch(&envelope, matching);
    }

    fn dispatch(&self, envelope: &Envelope, matching: Vec<Arc<RouterSubscription>>) {
        for sub in matching {
            let outcome = catch_unwind(AssertUnwindSafe(|| (sub.handler)(envelope)));
            if outcome.is_err() {
                self.stats.write().handler_panics += 1;
                warn!(
                    subscription = sub.id,
                    kind = %envelope.kind,
                    "event handler panicked; continuing delivery"
                );
            }
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn stats(&self) -> RouterStats {
        self.stats.read().clone()
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Router statistics.
#[derive(Debug, Clone, Default)]
pub struct RouterStats {
    /// Wire envelopes routed since start.
    pub events_routed: u64,
    /// Lifecycle sentinels routed since start.
    pub lifecycle_routed: u64,
    /// Handler panics swallowed since start.
    pub handler_panics: u64,
}
