//! The engine's context object: one store, one router, one session slot.

use std::sync::Arc;

use crate::error::SyncError;
use crate::router::EventRouter;
use crate::session::{ConnectOptions, SessionManager, SessionState, SyncConfig};
use crate::store::ModelStore;

/// Read-model synchronization client.
///
/// Instantiated once at the application root and injected into every panel;
/// no ambient global state. The client owns the model store (document
/// identity and mutation), the event router (envelope fan-out), and the
/// transport session (connection lifecycle).
///
/// # Examples
///
/// ```rust,ignore
/// use scry_sync::{ConnectOptions, Selector, SyncClient};
///
/// let client = SyncClient::new()?;
///
/// // A panel mirrors the "models" document.
/// let doc = client.store().get("models");
/// client.store().subscribe("models", move |doc| {
///     // schedule a re-render; return quickly
/// });
///
/// // A status badge watches the transport.
/// client.router().subscribe(
///     Selector::Lifecycle(scry_sync::Lifecycle::Error),
///     |_| { /* show the reconnecting indicator */ },
/// );
///
/// client.connect(
///     "http://127.0.0.1:8091",
///     ConnectOptions::new().replay(25).prefix("models."),
///     true,
/// )?;
/// ```
pub struct SyncClient {
    store: Arc<ModelStore>,
    router: Arc<EventRouter>,
    session: SessionManager,
}

impl SyncClient {
    /// Build a client with default configuration.
    pub fn new() -> Result<Self, SyncError> {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Result<Self, SyncError> {
        let store = Arc::new(ModelStore::new());
        let router = Arc::new(EventRouter::new());
        let session = SessionManager::new(config, store.clone(), router.clone())?;
        Ok(Self {
            store,
            router,
            session,
        })
    }

    /// The model store: `get`/`set`/`subscribe`/`unsubscribe`/`apply_op`.
    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    /// The event router: kind, wildcard, predicate, and lifecycle
    /// subscriptions.
    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Open (or adjust) the push-event session. See
    /// [`SessionManager::connect`].
    pub fn connect(
        &self,
        base: &str,
        options: ConnectOptions,
        resume: bool,
    ) -> Result<(), SyncError> {
        self.session.connect(base, options, resume)
    }

    /// Clean close of the current session, if any.
    pub fn stop(&self) {
        self.session.stop();
    }

    /// Current transport state.
    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }
}
