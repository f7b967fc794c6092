use serde::{Deserialize, Serialize};

/// Bearer token and its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    pub expiry: i64, // UNIX TIMESTAMP, seconds
}

impl Credential {
    pub fn new(token: String, expiry: i64) -> Self {
        Self { token, expiry }
    }

    /// Expired, or close enough to expiry that a request could race it.
    pub fn is_expired_at(&self, now: i64, lead_seconds: i64) -> bool {
        now >= self.expiry.saturating_sub(lead_seconds)
    }
}
