//! In-memory `Store` implementation: an `Arc<RwLock<HashMap>>` keyed by
//! `device_id`, with a background task expiring stale pending nonces.
//!
//! Grounded on the teacher's `ChallengeStore` — same `Arc<RwLock<HashMap>>`
//! + TTL + `tokio::spawn` cleanup-loop shape, re-keyed by `device_id`
//! instead of a random challenge value. Rate limiting is dropped; it's
//! out of scope here (SPEC_FULL.md Non-goals).

use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::models::device_record::DeviceRecord;
use crate::services::store::{Store, StoreError};

const NONCE_TTL_MINUTES: i64 = 5;
const CLEANUP_INTERVAL_SECS: u64 = 60;

pub struct InMemoryStore {
    records: RwLock<HashMap<String, DeviceRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            records: RwLock::new(HashMap::new()),
        })
    }

    /// Spawns the background task that clears expired pending nonces so
    /// they don't accumulate for devices that request a nonce and never
    /// complete attestation.
    pub fn spawn_cleanup_task(store: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(CLEANUP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                store.cleanup_expired_nonces().await;
            }
        })
    }

    async fn cleanup_expired_nonces(&self) {
        let now = Utc::now();
        let mut records = self.records.write().await;
        for record in records.values_mut() {
            let expired = record
                .nonce_issued_at
                .map(|issued| now - issued > Duration::minutes(NONCE_TTL_MINUTES))
                .unwrap_or(false);
            if expired {
                record.pending_nonce = None;
                record.nonce_issued_at = None;
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Store for InMemoryStore {
    async fn issue_nonce(&self, device_id: &str) -> Result<String, StoreError> {
        let mut raw = [0u8; 32];
        OsRng.fill_bytes(&mut raw);
        let nonce = STANDARD.encode(raw);

        let mut records = self.records.write().await;
        let record = records
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceRecord::new(device_id.to_string()));
        record.pending_nonce = Some(nonce.clone());
        record.nonce_issued_at = Some(Utc::now());
        record.updated_at = Utc::now();

        Ok(nonce)
    }

    async fn lookup_pending_nonce(&self, device_id: &str) -> Result<Option<String>, StoreError> {
        let records = self.records.read().await;
        let Some(record) = records.get(device_id) else {
            return Ok(None);
        };
        let expired = record
            .nonce_issued_at
            .map(|issued| Utc::now() - issued > Duration::minutes(NONCE_TTL_MINUTES))
            .unwrap_or(true);
        if expired {
            return Ok(None);
        }
        Ok(record.pending_nonce.clone())
    }

    async fn lookup_by_key_and_device(
        &self,
        device_id: &str,
        key_id: &str,
    ) -> Result<Option<DeviceRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(device_id)
            .filter(|r| r.key_id.as_deref() == Some(key_id))
            .cloned())
    }

    async fn upsert_attestation(
        &self,
        device_id: &str,
        key_id: &str,
        public_key_pem: &str,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceRecord::new(device_id.to_string()));

        if record.pending_nonce.is_none() {
            return Err(StoreError::NoPendingNonce);
        }
        let expired = record
            .nonce_issued_at
            .map(|issued| Utc::now() - issued > Duration::minutes(NONCE_TTL_MINUTES))
            .unwrap_or(true);
        if expired {
            return Err(StoreError::StaleNonce);
        }

        record.key_id = Some(key_id.to_string());
        record.public_key_pem = Some(public_key_pem.to_string());
        record.pending_nonce = None;
        record.nonce_issued_at = None;
        record.counter = 0;
        record.updated_at = Utc::now();

        Ok(())
    }

    async fn advance_counter(
        &self,
        device_id: &str,
        key_id: &str,
        expected_prior: u32,
        new_counter: u32,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(device_id)
            .filter(|r| r.key_id.as_deref() == Some(key_id))
            .ok_or(StoreError::NoKeyForDevice)?;

        if record.counter != i64::from(expected_prior) {
            return Err(StoreError::ConcurrentModification);
        }

        record.counter = i64::from(new_counter);
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn issue_nonce_creates_a_pending_record() {
        let store = InMemoryStore::new();
        let nonce = store.issue_nonce("device-1").await.unwrap();
        // base64 of 32 random bytes, standard padding.
        assert_eq!(nonce.len(), 44);
    }

    #[tokio::test]
    async fn lookup_pending_nonce_returns_the_issued_value() {
        let store = InMemoryStore::new();
        let nonce = store.issue_nonce("device-1").await.unwrap();
        let found = store.lookup_pending_nonce("device-1").await.unwrap();
        assert_eq!(found, Some(nonce));
    }

    #[tokio::test]
    async fn lookup_pending_nonce_is_none_for_unknown_device() {
        let store = InMemoryStore::new();
        let found = store.lookup_pending_nonce("unknown").await.unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn upsert_attestation_without_a_nonce_is_rejected() {
        let store = InMemoryStore::new();
        let result = store
            .upsert_attestation("device-1", "key-1", "pem-data")
            .await;
        assert_matches!(result, Err(StoreError::NoPendingNonce));
    }

    #[tokio::test]
    async fn upsert_attestation_succeeds_after_issuing_a_nonce() {
        let store = InMemoryStore::new();
        store.issue_nonce("device-1").await.unwrap();
        store
            .upsert_attestation("device-1", "key-1", "pem-data")
            .await
            .unwrap();

        let record = store
            .lookup_by_key_and_device("device-1", "key-1")
            .await
            .unwrap();
        assert!(record.is_some());
        assert_eq!(record.unwrap().counter, 0);
    }

    #[tokio::test]
    async fn advance_counter_rejects_wrong_prior_value() {
        let store = InMemoryStore::new();
        store.issue_nonce("device-1").await.unwrap();
        store
            .upsert_attestation("device-1", "key-1", "pem-data")
            .await
            .unwrap();

        let result = store.advance_counter("device-1", "key-1", 5, 6).await;
        assert_matches!(result, Err(StoreError::ConcurrentModification));
    }

    #[tokio::test]
    async fn advance_counter_succeeds_with_correct_prior_value() {
        let store = InMemoryStore::new();
        store.issue_nonce("device-1").await.unwrap();
        store
            .upsert_attestation("device-1", "key-1", "pem-data")
            .await
            .unwrap();

        store.advance_counter("device-1", "key-1", 0, 1).await.unwrap();
        let record = store
            .lookup_by_key_and_device("device-1", "key-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.counter, 1);
    }

    #[tokio::test]
    async fn advance_counter_unknown_key_is_rejected() {
        let store = InMemoryStore::new();
        let result = store.advance_counter("device-1", "key-1", 0, 1).await;
        assert_matches!(result, Err(StoreError::NoKeyForDevice));
    }
}
