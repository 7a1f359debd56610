//! PayloadCodec - typed payloads to bytes and back.
//!
//! Payloads are stored as JSON so that a task enqueued by one build can be
//! decoded by the next one as long as field names are kept.

use super::task::TaskPayload;
use crate::error::TaskerError;

pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode<T: TaskPayload>(payload: &T) -> Result<Vec<u8>, TaskerError> {
        Ok(serde_json::to_vec(payload)?)
    }

    /// Failure here is permanent: retrying cannot fix a malformed payload.
    pub fn decode<T: TaskPayload>(bytes: &[u8]) -> Result<T, TaskerError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
