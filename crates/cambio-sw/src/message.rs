//! Control messages posted from pages to the worker.
//!
//! The wire shape is `{"action": "..."}`. Only `skipWaiting` is defined;
//! anything else is ignored and logged, never answered with an error.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Messages a page may post to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlMessage {
    /// Ask a waiting worker to activate now instead of waiting for every
    /// controlled page to close.
    SkipWaiting,
}

impl ControlMessage {
    /// Parse a raw message, ignoring unknown actions and malformed shapes.
    pub fn parse(raw: &serde_json::Value) -> Option<Self> {
        match serde_json::from_value(raw.clone()) {
            Ok(message) => Some(message),
            Err(err) => {
                debug!(message = %raw, error = %err, "ignoring unrecognized control message");
                None
            }
        }
    }
}
