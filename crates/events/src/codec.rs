//! JSON codec for the work item envelope.
//!
//! Decoding is strict about shape (the payload must be a JSON object whose known
//! fields have the right types) and lenient about content: a missing `order_id`
//! still decodes, so the caller can reject it with a precise reason.

use ordermail_core::WorkItem;
use thiserror::Error;

/// The payload is not a valid envelope. Terminal for the message.
#[derive(Debug, Error)]
#[error("invalid envelope: {source}")]
pub struct DecodeError {
    #[from]
    source: serde_json::Error,
}

/// A work item could not be serialized.
#[derive(Debug, Error)]
#[error("failed to encode envelope: {source}")]
pub struct EncodeError {
    #[from]
    source: serde_json::Error,
}

pub fn decode(raw: &[u8]) -> Result<WorkItem, DecodeError> {
    Ok(serde_json::from_slice(raw)?)
}

pub fn encode(item: &WorkItem) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(item)?)
}
