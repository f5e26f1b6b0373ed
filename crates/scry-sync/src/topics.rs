//! Canonical event kind strings the engine itself recognizes.
//!
//! Kinds are dot.case namespace strings; prefix matching on them is how both
//! server-side and client-side filtering work. Panels define their own domain
//! kinds; only the kinds below have meaning to the engine.

/// Read-model patch events: payload `{id, patch}` where `patch` is an
/// RFC 6902 operation list for the document named by `id`.
pub const TOPIC_READMODEL_PATCH: &str = "state.read.model.patch";

/// Synthesized when the push-event stream opens (initial connect or
/// reconnect). Never arrives from the wire.
pub const TOPIC_TRANSPORT_OPEN: &str = "transport.open";

/// Synthesized when the push-event stream drops or fails to connect.
/// Never arrives from the wire.
pub const TOPIC_TRANSPORT_ERROR: &str = "transport.error";
