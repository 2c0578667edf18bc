//! Error types for the event bus.
//!
//! One enum covers every failure domain named in the delivery contract:
//! transport (Redis), codec, and lifecycle. Handler failures never reach
//! here — the dispatcher logs them and keeps going (see `bus::dispatch`).

use thiserror::Error;

/// Errors surfaced by the public `EventBus` API.
#[derive(Debug, Error)]
pub enum Error {
    /// Store connection or RPC failure (XADD/XREADGROUP/XACK/XGROUP/...).
    #[error("transport error: {0}")]
    Transport(#[from] redis::RedisError),

    /// Envelope failed to deserialize from the stream's `message` field.
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Envelope failed to serialize for publish.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Operation attempted after `close()`.
    #[error("event bus is closed")]
    Closed,

    /// Catch-all for errors that don't fit the variants above.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Result type alias for event bus operations.
pub type Result<T> = std::result::Result<T, Error>;
