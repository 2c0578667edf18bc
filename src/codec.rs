//! Envelope <-> wire bytes.
//!
//! Redis stream field values are binary-safe, so the encoded bytes go
//! straight into the `message` field with no intermediate text encoding.
//! MessagePack (via `rmp-serde`) is used instead of plain JSON because it
//! round-trips binary blobs, dates, and other typed scalars that a JSON
//! string would coerce or lose precision on.

use serde::{Serialize, de::DeserializeOwned};

use crate::envelope::Envelope;
use crate::error::{Error, Result};

/// Serializes an envelope to the bytes stored in a stream record's
/// `message` field.
pub fn encode<D: Serialize>(envelope: &Envelope<D>) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(envelope).map_err(Error::from)
}

/// Deserializes a stream record's `message` field back into an envelope.
pub fn decode<D: DeserializeOwned>(bytes: &[u8]) -> Result<Envelope<D>> {
    rmp_serde::from_slice(bytes).map_err(Error::from)
}
