//! Transport session management: connect, detect drops, reconnect with
//! backoff, resume when continuity can be proven, force resync when it
//! cannot.
//!
//! One physical connection per base endpoint. Lanes of interest (per-panel
//! prefix filters) are merged into that single stream at connect time; the
//! event router does the fine-grained split afterwards. Patches are only
//! trustworthy immediately after a known-good snapshot or a provably
//! continuous stream, so every reconnect that cannot present a fresh resume
//! token first flags all mirrored models stale.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::router::EventRouter;
use crate::sse::SseParser;
use crate::store::ModelStore;
use crate::envelope::Envelope;
use crate::subscription::Lifecycle;
use crate::topics;

/// Default path suffix of the push-event endpoint.
pub const DEFAULT_EVENTS_PATH: &str = "/events";

/// Per-connect options recognized by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Ask the server to redeliver up to N recent matching events on
    /// connect, for panels that want recent history without a snapshot call.
    #[serde(default)]
    pub replay: Option<u32>,
    /// Restrict delivery server-side to kinds starting with these prefixes.
    /// Empty means everything.
    #[serde(default)]
    pub prefixes: Vec<String>,
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replay(mut self, count: u32) -> Self {
        self.replay = Some(count);
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }
}

/// Bounded exponential backoff between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(15),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before reconnect attempt `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let initial = self.initial.as_millis() as f64;
        let max = self.max.as_millis() as f64;
        let delay = (initial * self.factor.powi(attempt.min(32) as i32)).min(max);
        Duration::from_millis(delay as u64)
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Reconnect backoff curve.
    pub retry: RetryPolicy,
    /// Treat a stream with no bytes (not even heartbeats) for this long as
    /// dropped. `None` disables the guard.
    pub idle_timeout: Option<Duration>,
    /// Resume tokens older than this are not trusted; the reconnect falls
    /// back to a forced resync. `None` trusts any held token.
    pub max_resume_age: Option<Duration>,
    /// Event kind whose payload carries read-model patches.
    pub patch_kind: String,
    /// Path suffix of the push-event endpoint.
    pub events_path: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            idle_timeout: Some(Duration::from_secs(60)),
            max_resume_age: Some(Duration::from_secs(300)),
            patch_kind: topics::TOPIC_READMODEL_PATCH.to_string(),
            events_path: DEFAULT_EVENTS_PATH.to_string(),
        }
    }
}

/// Transport session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session exists (never connected, or explicitly stopped).
    Idle,
    /// Attempting to open the stream.
    Connecting,
    /// Stream open, envelopes flowing.
    Open,
    /// Dropped unexpectedly; backing off before reconnect.
    Erroring,
    /// Session wound down.
    Closed,
}

struct ActiveSession {
    base: String,
    options: ConnectOptions,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<SessionState>,
}

/// Owns the push-event connection lifecycle.
pub struct SessionManager {
    config: SyncConfig,
    store: Arc<ModelStore>,
    router: Arc<EventRouter>,
    http: reqwest::Client,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionManager {
    pub fn new(
        config: SyncConfig,
        store: Arc<ModelStore>,
        router: Arc<EventRouter>,
    ) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            config,
            store,
            router,
            http,
            active: Mutex::new(None),
        })
    }

    /// Open (or adjust) the session for `base`.
    ///
    /// Reconnecting to the same base with new prefix lanes merges the filters
    /// and restarts the stream once. Connecting to a different base tears the
    /// old session down and flags all mirrored models stale. `resume` asks
    /// the manager to attempt continuity across drops by replaying from the
    /// last seen event id.
    ///
    /// Must be called from within a tokio runtime; the stream is driven by a
    /// spawned task and never blocks the caller.
    pub fn connect(
        &self,
        base: &str,
        options: ConnectOptions,
        resume: bool,
    ) -> Result<(), SyncError> {
        let url = reqwest::Url::parse(base).map_err(|err| SyncError::InvalidBase {
            base: base.to_string(),
            message: err.to_string(),
        })?;
        let base = url.as_str().trim_end_matches('/').to_string();

        let mut guard = self.active.lock();
        if let Some(current) = guard.take() {
            if current.base == base {
                let merged = merge_options(&current.options, &options);
                if merged == current.options {
                    debug!(base = %base, "session already covers requested lanes");
                    *guard = Some(current);
                    return Ok(());
                }
                info!(base = %base, "restarting stream with merged lane filters");
                let _ = current.shutdown.send(true);
                // The restart loses the stream position; force a resync.
                self.store.mark_all_stale();
                *guard = Some(self.spawn_session(base, merged, resume));
                return Ok(());
            }
            info!(old = %current.base, new = %base, "switching transport base endpoint");
            let _ = current.shutdown.send(true);
            self.store.mark_all_stale();
        }
        *guard = Some(self.spawn_session(base, options, resume));
        Ok(())
    }

    /// Clean close: no retry, no error sentinel.
    pub fn stop(&self) {
        if let Some(session) = self.active.lock().take() {
            let _ = session.shutdown.send(true);
            info!(base = %session.base, "transport session stopped");
        }
    }

    /// Current session state; [`SessionState::Idle`] when no session exists.
    pub fn state(&self) -> SessionState {
        self.active
            .lock()
            .as_ref()
            .map(|session| *session.state.borrow())
            .unwrap_or(SessionState::Idle)
    }

    fn spawn_session(&self, base: String, options: ConnectOptions, resume: bool) -> ActiveSession {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let ctx = SessionContext {
            config: self.config.clone(),
            store: self.store.clone(),
            router: self.router.clone(),
            http: self.http.clone(),
            base: base.clone(),
            options: options.clone(),
            resume,
        };
        tokio::spawn(run_session(ctx, shutdown_rx, state_tx));
        ActiveSession {
            base,
            options,
            shutdown: shutdown_tx,
            state: state_rx,
        }
    }
}

/// Merge the lane filters of an existing session with a new request.
/// An empty prefix set means "everything", so either side being unfiltered
/// widens the merged stream to unfiltered.
fn merge_options(current: &ConnectOptions, requested: &ConnectOptions) -> ConnectOptions {
    let prefixes = if current.prefixes.is_empty() || requested.prefixes.is_empty() {
        Vec::new()
    } else {
        let mut merged = current.prefixes.clone();
        for prefix in &requested.prefixes {
            if !merged.contains(prefix) {
                merged.push(prefix.clone());
            }
        }
        merged
    };
    ConnectOptions {
        replay: current.replay.max(requested.replay),
        prefixes,
    }
}

struct SessionContext {
    config: SyncConfig,
    store: Arc<ModelStore>,
    router: Arc<EventRouter>,
    http: reqwest::Client,
    base: String,
    options: ConnectOptions,
    resume: bool,
}

struct ResumeToken {
    id: String,
    at: Instant,
}

enum StreamEnd {
    Dropped,
    Shutdown,
}

async fn run_session(
    ctx: SessionContext,
    mut shutdown: watch::Receiver<bool>,
    state: watch::Sender<SessionState>,
) {
    let mut attempt: u32 = 0;
    let mut resume_token: Option<ResumeToken> = None;
    loop {
        if *shutdown.borrow() {
            break;
        }
        let _ = state.send(SessionState::Connecting);
        let token = if ctx.resume {
            resume_token
                .as_ref()
                .filter(|token| token_fresh(&ctx.config, token))
                .map(|token| token.id.clone())
        } else {
            None
        };
        match open_stream(&ctx, token.as_deref()).await {
            Ok(response) => {
                attempt = 0;
                let _ = state.send(SessionState::Open);
                info!(base = %ctx.base, resumed = token.is_some(), "event stream open");
                ctx.router.route_lifecycle(
                    Lifecycle::Open,
                    json!({"base": ctx.base, "resumed": token.is_some()}),
                );
                if let StreamEnd::Shutdown =
                    read_stream(&ctx, response, &mut resume_token, &mut shutdown).await
                {
                    break;
                }
            }
            Err(err) => {
                debug!(base = %ctx.base, error = %err, "event stream connect failed");
            }
        }
        if *shutdown.borrow() {
            break;
        }

        let _ = state.send(SessionState::Erroring);
        ctx.router
            .route_lifecycle(Lifecycle::Error, json!({"base": ctx.base}));

        let resumable = ctx.resume
            && resume_token
                .as_ref()
                .map(|token| token_fresh(&ctx.config, token))
                .unwrap_or(false);
        if !resumable {
            // Continuity cannot be proven; anything mirrored so far may miss
            // updates until re-primed from a snapshot.
            warn!(base = %ctx.base, "stream continuity not guaranteed; flagging models for resync");
            resume_token = None;
            ctx.store.mark_all_stale();
        }

        let delay = ctx.config.retry.delay(attempt);
        attempt = attempt.saturating_add(1);
        warn!(
            base = %ctx.base,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "event stream dropped; reconnecting"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }
    let _ = state.send(SessionState::Closed);
    debug!(base = %ctx.base, "transport session task finished");
}

fn token_fresh(config: &SyncConfig, token: &ResumeToken) -> bool {
    config
        .max_resume_age
        .map(|max| token.at.elapsed() <= max)
        .unwrap_or(true)
}

async fn open_stream(
    ctx: &SessionContext,
    token: Option<&str>,
) -> Result<reqwest::Response, SyncError> {
    let url = format!("{}{}", ctx.base, ctx.config.events_path);
    let mut request = ctx.http.get(&url).header("Accept", "text/event-stream");
    if let Some(id) = token {
        request = request.header("Last-Event-ID", id);
    } else if let Some(count) = ctx.options.replay.filter(|count| *count > 0) {
        // The server prioritizes resume over replay, so replay is only asked
        // for when no resume position is in play.
        request = request.query(&[("replay", count)]);
    }
    if !ctx.options.prefixes.is_empty() {
        request = request.query(&[("prefix", ctx.options.prefixes.join(","))]);
    }
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(SyncError::Endpoint {
            status: response.status().as_u16(),
        });
    }
    Ok(response)
}

async fn read_stream(
    ctx: &SessionContext,
    response: reqwest::Response,
    resume_token: &mut Option<ResumeToken>,
    shutdown: &mut watch::Receiver<bool>,
) -> StreamEnd {
    let mut stream = Box::pin(response.bytes_stream());
    let mut parser = SseParser::new();
    loop {
        let next = tokio::select! {
            _ = shutdown.changed() => return StreamEnd::Shutdown,
            next = async {
                match ctx.config.idle_timeout {
                    Some(window) => tokio::time::timeout(window, stream.next()).await,
                    None => Ok(stream.next().await),
                }
            } => next,
        };
        match next {
            Ok(Some(Ok(bytes))) => {
                for frame in parser.push(&bytes) {
                    handle_frame(ctx, frame, resume_token);
                }
            }
            Ok(Some(Err(err))) => {
                debug!(base = %ctx.base, error = %err, "event stream read error");
                return StreamEnd::Dropped;
            }
            Ok(None) => {
                debug!(base = %ctx.base, "event stream ended");
                return StreamEnd::Dropped;
            }
            Err(_) => {
                warn!(base = %ctx.base, "event stream idle past the timeout window");
                return StreamEnd::Dropped;
            }
        }
    }
}

fn handle_frame(ctx: &SessionContext, frame: crate::sse::SseFrame, token: &mut Option<ResumeToken>) {
    if let Some(id) = &frame.id {
        *token = Some(ResumeToken {
            id: id.clone(),
            at: Instant::now(),
        });
    }
    let envelope: Envelope = match serde_json::from_str(&frame.data) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(event = ?frame.event, error = %err, "discarding undecodable envelope");
            return;
        }
    };
    // Model patches update the store first so subscribers reached through the
    // router observe the patched documents.
    if envelope.kind == ctx.config.patch_kind {
        ctx.store.apply_patch_event(&envelope.payload);
    }
    ctx.router.route(&envelope);
}
