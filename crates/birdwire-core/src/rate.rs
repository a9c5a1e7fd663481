//! Rate-limit window snapshot attached to responses.

use serde::{Deserialize, Serialize};

/// The rate-limit window the server reported on one response. A snapshot,
/// not live state: the engine does no rate-limit bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Request ceiling for the current window.
    pub limit: u32,
    /// Requests remaining in the current window.
    pub remaining: u32,
    /// Unix timestamp (seconds) at which the window resets.
    pub reset: u64,
}

impl RateLimit {
    /// Returns `true` if the window has no requests left.
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}
