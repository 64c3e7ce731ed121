use serde::{Deserialize, Serialize};

/// Zero-knowledge proof of passphrase possession. The client self-encrypts
/// one half of a SHA-256 digest with the other half; the server only ever
/// compares the resulting bytes and never interprets them.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Fingerprint {
    pub iv: Vec<u8>,
    pub data: Vec<u8>,
}

impl Fingerprint {
    pub fn new(iv: Vec<u8>, data: Vec<u8>) -> Self {
        Self { iv, data }
    }

    /// Constant-time equality over both halves.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        // Evaluate both halves unconditionally to keep timing independent of
        // where a mismatch occurs.
        let iv_eq = ct_eq(&self.iv, &other.iv);
        let data_eq = ct_eq(&self.data, &other.data);
        iv_eq & data_eq
    }
}

/// Byte comparison that does not short-circuit on the first difference.
pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Durable session record: exists iff the session exists.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: String,
    pub fingerprint: Fingerprint,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds; drives inactivity expiry.
    pub last_activity: i64,
}

/// A connected member of a session. Lifetime = the connection; never
/// persisted.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub client_id: String,
    pub client_name: String,
    /// 256-bit hex token authorizing content-plane events.
    pub token: String,
}

/// Outcome of a successful join.
#[derive(Debug, Clone)]
pub struct JoinGrant {
    pub token: String,
    /// True when this join created the session record.
    pub created: bool,
}
