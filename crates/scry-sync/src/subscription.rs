//! Subscription selectors and identifiers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::topics;

/// Identifier of a subscription. Monotonic and process-unique; the same
/// counter feeds model-store and event-router subscriptions.
pub type SubscriptionId = u64;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_subscription_id() -> SubscriptionId {
    NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Transport lifecycle sentinels, synthesized by the session manager rather
/// than arriving from the wire. Status badges subscribe to these through the
/// same router API as domain events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// The push-event stream opened (initial connect or reconnect).
    Open,
    /// The push-event stream dropped or failed to connect.
    Error,
}

impl Lifecycle {
    /// Kind string carried by the synthesized envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Lifecycle::Open => topics::TOPIC_TRANSPORT_OPEN,
            Lifecycle::Error => topics::TOPIC_TRANSPORT_ERROR,
        }
    }
}

/// What a router subscription is interested in.
///
/// One tagged type instead of sniffing strings against functions: an invalid
/// selector is unrepresentable.
#[derive(Clone)]
pub enum Selector {
    /// Fires only when the envelope kind equals the string.
    Exact(String),
    /// Fires for every wire envelope.
    Wildcard,
    /// Fires for the given transport sentinel; never for wire envelopes.
    Lifecycle(Lifecycle),
    /// Fires when the predicate over the kind string returns true.
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl Selector {
    pub fn exact(kind: impl Into<String>) -> Self {
        Selector::Exact(kind.into())
    }

    pub fn predicate(pred: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Selector::Predicate(Arc::new(pred))
    }

    /// Match against a wire envelope kind.
    pub(crate) fn matches_kind(&self, kind: &str) -> bool {
        match self {
            Selector::Exact(expected) => expected == kind,
            Selector::Wildcard => true,
            Selector::Lifecycle(_) => false,
            Selector::Predicate(pred) => pred(kind),
        }
    }

    /// Match against a synthesized lifecycle sentinel.
    pub(crate) fn matches_lifecycle(&self, lifecycle: Lifecycle) -> bool {
        matches!(self, Selector::Lifecycle(expected) if *expected == lifecycle)
    }
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Exact(kind) => f.debug_tuple("Exact").field(kind).finish(),
            Selector::Wildcard => write!(f, "Wildcard"),
            Selector::Lifecycle(lifecycle) => f.debug_tuple("Lifecycle").field(lifecycle).finish(),
            Selector::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}
