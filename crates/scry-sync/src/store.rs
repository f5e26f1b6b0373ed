//! Named read-model documents, their versions, and per-model subscribers.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use scry_patch::{apply, Outcome, PatchOp};

use crate::envelope::PatchEvent;
use crate::subscription::{next_subscription_id, SubscriptionId};

/// Sentinel for "this subscription has never been emitted to".
const NEVER_EMITTED: u64 = u64::MAX;

/// Handle to a named document.
///
/// The handle stays valid across patches and full replacements: the store
/// writes through it, so a panel can hold one `Document` for its lifetime and
/// re-read on every notification. Consumers must not hold the read guard
/// across calls back into the store, and must [`snapshot`](Self::snapshot)
/// if they need a copy that later patches will not touch.
#[derive(Debug, Clone)]
pub struct Document(Arc<RwLock<Value>>);

impl Document {
    fn new() -> Self {
        Self(Arc::new(RwLock::new(Value::Object(Map::new()))))
    }

    /// Read access to the current document value.
    pub fn read(&self) -> RwLockReadGuard<'_, Value> {
        self.0.read()
    }

    /// Deep copy of the current document value.
    pub fn snapshot(&self) -> Value {
        self.0.read().clone()
    }
}

struct ModelEntry {
    doc: Document,
    version: u64,
    stale: bool,
}

impl ModelEntry {
    fn new() -> Self {
        Self {
            doc: Document::new(),
            version: 0,
            stale: false,
        }
    }
}

struct ModelSubscription {
    id: SubscriptionId,
    model: String,
    handler: Box<dyn Fn(&Document) + Send + Sync>,
    /// Version last delivered to this handler; suppresses no-op re-renders.
    last_version: AtomicU64,
}

/// Registry of named documents plus per-name subscriber lists.
///
/// Owns document identity and mutation: panels read through [`Document`]
/// handles and never write. Operations for one model are serialized; emits
/// iterate a snapshot of the subscriber list in insertion order, so handlers
/// registered during a dispatch are not invoked for it.
pub struct ModelStore {
    entries: RwLock<HashMap<String, ModelEntry>>,
    subscribers: RwLock<Vec<Arc<ModelSubscription>>>,
    stats: RwLock<StoreStats>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
            stats: RwLock::new(StoreStats::default()),
        }
    }

    /// Current document for `name`, creating an empty-object entry if unseen
    /// so consumers can subscribe before the first snapshot arrives.
    pub fn get(&self, name: &str) -> Document {
        let mut entries = self.entries.write();
        entries
            .entry(name.to_string())
            .or_insert_with(ModelEntry::new)
            .doc
            .clone()
    }

    /// Full replacement: priming from an initial snapshot fetch, or a resync.
    /// Clears the stale flag, bumps the version, and emits.
    pub fn set(&self, name: &str, value: Value) {
        {
            let mut entries = self.entries.write();
            let entry = entries
                .entry(name.to_string())
                .or_insert_with(ModelEntry::new);
            *entry.doc.0.write() = value;
            entry.version += 1;
            entry.stale = false;
        }
        self.stats.write().full_replaces += 1;
        debug!(model = %name, "model primed from snapshot");
        self.emit(name);
    }

    /// Apply one patch operation and emit.
    pub fn apply_op(&self, name: &str, op: &PatchOp) -> bool {
        self.apply_ops(name, std::slice::from_ref(op)) == 1
    }

    /// Apply a batch of operations in order, emitting once at the end.
    /// Returns the number of operations that applied.
    pub fn apply_ops(&self, name: &str, ops: &[PatchOp]) -> usize {
        if ops.is_empty() {
            return 0;
        }
        let mut applied = 0usize;
        let mut fallbacks = 0u64;
        let mut anomalies = 0u64;
        {
            let mut entries = self.entries.write();
            let entry = entries
                .entry(name.to_string())
                .or_insert_with(ModelEntry::new);
            let doc = entry.doc.clone();
            let mut value = doc.0.write();
            for op in ops {
                match apply(&mut value, op) {
                    Ok(Outcome::Applied) => {
                        entry.version += 1;
                        applied += 1;
                    }
                    Ok(Outcome::ReplacedMissing) => {
                        entry.version += 1;
                        applied += 1;
                        fallbacks += 1;
                        warn!(model = %name, path = %op.path(), "replace target missing; applied as add");
                    }
                    Ok(Outcome::Noop) => {
                        debug!(model = %name, op = %op.kind(), path = %op.path(), "patch op was a no-op");
                    }
                    Err(err) => {
                        warn!(model = %name, op = %op.kind(), error = %err, "skipping unapplicable patch op");
                        anomalies += 1;
                        entry.stale = true;
                    }
                }
            }
        }
        {
            let mut stats = self.stats.write();
            stats.patches_applied += applied as u64;
            stats.replace_fallbacks += fallbacks;
            stats.anomalies += anomalies;
        }
        self.emit(name);
        applied
    }

    /// Apply the wire payload of a read-model patch event (`{id, patch}`).
    /// Undecodable operations are skipped individually so one bad op does not
    /// poison the batch. Returns the number of operations that applied.
    pub fn apply_patch_event(&self, payload: &Value) -> usize {
        let Some(event) = PatchEvent::from_payload(payload) else {
            warn!("discarding malformed read-model patch payload");
            self.stats.write().anomalies += 1;
            return 0;
        };
        let mut ops = Vec::with_capacity(event.patch.len());
        for raw in &event.patch {
            match serde_json::from_value::<PatchOp>(raw.clone()) {
                Ok(op) => ops.push(op),
                Err(err) => {
                    warn!(model = %event.id, error = %err, "skipping undecodable patch op");
                    self.stats.write().anomalies += 1;
                }
            }
        }
        self.apply_ops(&event.id, &ops)
    }

    /// Synchronously notify subscribers of `name`, in insertion order.
    ///
    /// A subscriber is skipped when it has already seen the current version,
    /// so an emit that follows no change is a no-op re-render guard rather
    /// than a duplicate delivery.
    pub fn emit(&self, name: &str) {
        let Some((doc, version)) = self
            .entries
            .read()
            .get(name)
            .map(|entry| (entry.doc.clone(), entry.version))
        else {
            return;
        };
        let matching: Vec<_> = self
            .subscribers
            .read()
            .iter()
            .filter(|sub| sub.model == name)
            .cloned()
            .collect();
        for sub in matching {
            let seen = sub.last_version.swap(version, Ordering::AcqRel);
            if seen != version {
                let outcome = catch_unwind(AssertUnwindSafe(|| (sub.handler)(&doc)));
                if outcome.is_err() {
                    self.stats.write().handler_panics += 1;
                    warn!(
                        subscription = sub.id,
                        model = %name,
                        "model subscriber panicked; continuing delivery"
                    );
                }
            }
        }
    }

    /// Subscribe to updates of `name`. The handler receives the live document
    /// handle; lifetime is caller-controlled via [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&Document) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = next_subscription_id();
        let model = name.into();
        debug!(subscription = id, model = %model, "model subscription added");
        self.subscribers.write().push(Arc::new(ModelSubscription {
            id,
            model,
            handler: Box::new(handler),
            last_version: AtomicU64::new(NEVER_EMITTED),
        }));
        id
    }

    /// Remove a subscription. Future emits skip it; an emit already iterating
    /// its snapshot completes.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|sub| sub.id != id);
        before != subscribers.len()
    }

    /// Version counter for `name`; 0 for unseen models. Meaningless across
    /// restarts, only useful to detect no-op re-renders.
    pub fn version(&self, name: &str) -> u64 {
        self.entries
            .read()
            .get(name)
            .map(|entry| entry.version)
            .unwrap_or(0)
    }

    /// Whether `name` may have missed updates and needs a fresh snapshot.
    pub fn is_stale(&self, name: &str) -> bool {
        self.entries
            .read()
            .get(name)
            .map(|entry| entry.stale)
            .unwrap_or(false)
    }

    pub fn mark_stale(&self, name: &str) {
        if let Some(entry) = self.entries.write().get_mut(name) {
            entry.stale = true;
        }
    }

    /// Flag every model as possibly-stale. Invoked by the session manager
    /// when stream continuity cannot be guaranteed.
    pub fn mark_all_stale(&self) {
        for entry in self.entries.write().values_mut() {
            entry.stale = true;
        }
    }

    /// Names of all models seen so far.
    pub fn models(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = self.stats.read().clone();
        stats.models = self.entries.read().len();
        stats
    }
}

impl Default for ModelStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Store statistics.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Models currently registered.
    pub models: usize,
    /// Operations applied since start.
    pub patches_applied: u64,
    /// `replace` ops that degraded to `add` (possible inconsistency signal).
    pub replace_fallbacks: u64,
    /// Malformed patches and payloads skipped.
    pub anomalies: u64,
    /// Full replacements (snapshot primes and resyncs).
    pub full_replaces: u64,
    /// Subscriber panics swallowed since start.
    pub handler_panics: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn add_op(path: &str, value: Value) -> PatchOp {
        PatchOp::Add {
            path: path.into(),
            value,
        }
    }

    #[test]
    fn test_get_creates_empty_object() {
        let store = ModelStore::new();
        let doc = store.get("models");
        assert_eq!(*doc.read(), json!({}));
        assert_eq!(store.version("models"), 0);
    }

    #[test]
    fn test_set_then_emit_fires_exactly_once() {
        let store = ModelStore::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Value::Null));

        let counter = hits.clone();
        let captured = seen.clone();
        store.subscribe("projects", move |doc| {
            counter.fetch_add(1, Ordering::SeqCst);
            *captured.lock().unwrap() = doc.snapshot();
        });

        store.set("projects", json!({"list": ["p1"]}));
        store.emit("projects");

        // set() emitted; the explicit emit() saw no new version.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), json!({"list": ["p1"]}));
    }

    #[test]
    fn test_subscribe_before_data_sees_updates() {
        let store = ModelStore::new();
        let seen = Arc::new(Mutex::new(Value::Null));

        let captured = seen.clone();
        store.subscribe("models", move |doc| {
            *captured.lock().unwrap() = doc.snapshot();
        });

        // Nothing yet; the document exists but is empty.
        assert_eq!(store.get("models").snapshot(), json!({}));

        store.apply_op("models", &add_op("/items", json!([1])));
        assert_eq!(*seen.lock().unwrap(), json!({"items": [1]}));
    }

    #[test]
    fn test_document_handle_survives_set() {
        let store = ModelStore::new();
        let doc = store.get("models");
        store.set("models", json!({"fresh": true}));
        assert_eq!(*doc.read(), json!({"fresh": true}));
    }

    #[test]
    fn test_version_bumps_per_applied_op() {
        let store = ModelStore::new();
        store.apply_ops(
            "m",
            &[
                add_op("/a", json!(1)),
                add_op("/b", json!(2)),
                PatchOp::Remove { path: "/zz".into() },
            ],
        );
        // Two applied, one no-op.
        assert_eq!(store.version("m"), 2);
    }

    #[test]
    fn test_batch_emits_once() {
        let store = ModelStore::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        store.subscribe("m", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.apply_ops("m", &[add_op("/a", json!(1)), add_op("/b", json!(2))]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_stops_future_delivery() {
        let store = ModelStore::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = store.subscribe("m", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.set("m", json!({"v": 1}));
        assert!(store.unsubscribe(id));
        store.set("m", json!({"v": 2}));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_subscribed_during_emit_waits_for_next() {
        let store = Arc::new(ModelStore::new());
        let late_hits = Arc::new(AtomicUsize::new(0));

        let store_inner = store.clone();
        let late = late_hits.clone();
        let outer = store.subscribe("m", move |_| {
            let late = late.clone();
            store_inner.subscribe("m", move |_| {
                late.fetch_add(1, Ordering::SeqCst);
            });
        });

        store.set("m", json!({"v": 1}));
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);
        store.unsubscribe(outer);

        store.set("m", json!({"v": 2}));
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_malformed_op_flags_stale_and_counts_anomaly() {
        let store = ModelStore::new();
        store.set("m", json!({"scalar": 5}));
        assert!(!store.is_stale("m"));

        store.apply_op("m", &add_op("/scalar/deep", json!(1)));

        assert!(store.is_stale("m"));
        assert_eq!(store.stats().anomalies, 1);
        // Resync clears the flag.
        store.set("m", json!({"scalar": 5}));
        assert!(!store.is_stale("m"));
    }

    #[test]
    fn test_replace_fallback_counted_separately() {
        let store = ModelStore::new();
        store.apply_op(
            "m",
            &PatchOp::Replace {
                path: "/missing".into(),
                value: json!(1),
            },
        );
        let stats = store.stats();
        assert_eq!(stats.replace_fallbacks, 1);
        assert_eq!(stats.anomalies, 0);
        assert!(!store.is_stale("m"));
    }

    #[test]
    fn test_apply_patch_event_skips_bad_ops() {
        let store = ModelStore::new();
        let applied = store.apply_patch_event(&json!({
            "id": "models",
            "patch": [
                {"op": "add", "path": "/items", "value": []},
                {"op": "bogus", "path": "/x"},
                {"op": "add", "path": "/items/-", "value": {"name": "alpha"}}
            ]
        }));

        assert_eq!(applied, 2);
        assert_eq!(store.get("models").snapshot(), json!({"items": [{"name": "alpha"}]}));
        assert_eq!(store.stats().anomalies, 1);
    }

    #[test]
    fn test_apply_patch_event_rejects_malformed_payload() {
        let store = ModelStore::new();
        assert_eq!(store.apply_patch_event(&json!(42)), 0);
        assert_eq!(store.stats().anomalies, 1);
    }

    #[test]
    fn test_panicking_subscriber_does_not_break_delivery() {
        let store = ModelStore::new();
        let hits = Arc::new(AtomicUsize::new(0));

        store.subscribe("m", |_| {
            panic!("misbehaving panel");
        });
        let counter = hits.clone();
        store.subscribe("m", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.set("m", json!({"v": 1}));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(store.stats().handler_panics, 1);
    }

    #[test]
    fn test_mark_all_stale() {
        let store = ModelStore::new();
        store.get("a");
        store.get("b");
        store.mark_all_stale();
        assert!(store.is_stale("a"));
        assert!(store.is_stale("b"));
        assert!(!store.is_stale("unseen"));
    }

    #[test]
    fn test_ops_within_a_model_apply_in_order() {
        let store = ModelStore::new();
        store.apply_ops(
            "m",
            &[
                add_op("/items", json!([])),
                add_op("/items/-", json!("a")),
                add_op("/items/0", json!("b")),
                PatchOp::Move {
                    from: "/items/0".into(),
                    path: "/items/-".into(),
                },
            ],
        );
        assert_eq!(store.get("m").snapshot(), json!({"items": ["a", "b"]}));
    }
}
