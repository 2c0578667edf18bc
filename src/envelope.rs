//! The wire envelope carried by every stream record.

use serde::{Deserialize, Serialize};

/// Delivery discipline for a published record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Every live, subscribed instance delivers the record once.
    Broadcast,
    /// Exactly one named target instance delivers the record.
    Unicast,
    /// Exactly one arbitrary live, subscribed instance delivers the record.
    Anycast,
}

/// A record as it travels through a stream: topic, payload, and routing
/// metadata. `D` is the caller-chosen payload type; the whole envelope is
/// what the codec (see `codec.rs`) serializes into a stream record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<D> {
    pub mode: Mode,
    /// Present iff `mode == Mode::Unicast`.
    pub target: Option<String>,
    /// Topic string chosen by the publisher.
    pub event: String,
    /// Caller payload.
    pub data: D,
    /// Milliseconds since epoch at publish time.
    pub timestamp: i64,
    /// Publisher's instance id. Never rewritten — there are no relays.
    pub source: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unicast_envelope_carries_target() {
        let env = Envelope {
            mode: Mode::Unicast,
            target: Some("abc123".to_string()),
            event: "e".to_string(),
            data: 42,
            timestamp: 0,
            source: "src".to_string(),
        };
        assert_eq!(env.target.as_deref(), Some("abc123"));
    }
}
