//! Durable per-device attestation state (SPEC_FULL.md §3).
//!
//! Keyed by the client-chosen `device_id` string rather than a
//! server-generated UUID — the identifier a device picks on first
//! install is exactly the thing the whole state machine hangs off of.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DeviceRecord {
    pub device_id: String,
    /// Set once attestation has completed; `None` while only a nonce has
    /// been issued.
    pub key_id: Option<String>,
    /// PEM-encoded SEC1 uncompressed P-256 point.
    pub public_key_pem: Option<String>,
    /// Outstanding base64 nonce (§3) awaiting consumption by a
    /// registration ceremony; cleared once consumed.
    pub pending_nonce: Option<String>,
    pub nonce_issued_at: Option<DateTime<Utc>>,
    /// Monotonic signature counter; 0 until the first successful
    /// assertion.
    pub counter: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceRecord {
    pub fn new(device_id: String) -> Self {
        let now = Utc::now();
        Self {
            device_id,
            key_id: None,
            public_key_pem: None,
            pending_nonce: None,
            nonce_issued_at: None,
            counter: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
