//! Stream position tokens.

use serde::{Deserialize, Serialize};

use crate::value_object::ValueObject;

/// Position of the last event a saga has processed in its inbound stream.
///
/// Tokens are opaque to the repository: they are persisted and handed back
/// verbatim so an event processor can resume consumption where it left off.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingToken(u64);

impl TrackingToken {
    pub fn new(position: u64) -> Self {
        Self(position)
    }

    pub fn position(&self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for TrackingToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl ValueObject for TrackingToken {}
