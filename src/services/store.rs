//! Narrow storage-capability abstraction over the device attestation
//! state machine (nonce -> attested key -> monotonic counter).
//!
//! `Store` uses native `async fn` in the trait rather than the
//! `async-trait` crate, since its only consumer, [`AnyStore`], is a
//! concrete enum rather than a `dyn Trait` object — native async-fn
//! traits aren't object-safe, but an enum dispatch doesn't need them to
//! be. See DESIGN.md for the reasoning.

use std::sync::Arc;

use crate::models::device_record::DeviceRecord;
use crate::services::memory_store::InMemoryStore;
use crate::services::postgres_store::PostgresStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("no pending nonce for this device")]
    NoPendingNonce,
    #[error("no attested key on file for this device")]
    NoKeyForDevice,
    #[error("nonce has expired")]
    StaleNonce,
    #[error("stored counter has moved since it was read")]
    ConcurrentModification,
    #[error("underlying storage error: {0}")]
    Backend(String),
}

/// The durable state machine behind both verification ceremonies.
pub trait Store: Send + Sync {
    /// Issues (or reissues) a fresh nonce for `device_id`, valid for a
    /// short TTL, and returns it base64-encoded — the same representation
    /// the client receives and later signs over. Called at the start of
    /// attestation (§4.4 `issueNonce`).
    async fn issue_nonce(&self, device_id: &str) -> Result<String, StoreError>;

    /// Reads back the nonce most recently issued to `device_id`, if any
    /// and not yet expired. `registerAttestation` needs this value to run
    /// the attestation verifier (SPEC_FULL.md §4.2 step 2) before it can
    /// atomically consume it via [`Store::upsert_attestation`].
    async fn lookup_pending_nonce(&self, device_id: &str) -> Result<Option<String>, StoreError>;

    /// Looks up the device record by `device_id`, checking that its
    /// stored `key_id` matches, if a key has already been attested.
    async fn lookup_by_key_and_device(
        &self,
        device_id: &str,
        key_id: &str,
    ) -> Result<Option<DeviceRecord>, StoreError>;

    /// Persists a newly verified attestation: binds `key_id` and the
    /// extracted public key to `device_id`, clears the pending nonce,
    /// and resets the counter to 0.
    async fn upsert_attestation(
        &self,
        device_id: &str,
        key_id: &str,
        public_key_pem: &str,
    ) -> Result<(), StoreError>;

    /// Compare-and-swap the stored counter: succeeds only if the
    /// currently stored value is exactly `expected_prior`. Concurrent
    /// assertions racing on the same prior value have exactly one
    /// winner; the loser gets [`StoreError::ConcurrentModification`].
    async fn advance_counter(
        &self,
        device_id: &str,
        key_id: &str,
        expected_prior: u32,
        new_counter: u32,
    ) -> Result<(), StoreError>;
}

/// Concrete dispatch over the two `Store` implementations, held by
/// `AppState`. A runtime choice (`Config::use_in_memory_store`) rather
/// than a compile-time generic, so a single binary can run against
/// either backend depending on environment.
#[derive(Clone)]
pub enum AnyStore {
    InMemory(Arc<InMemoryStore>),
    Postgres(Arc<PostgresStore>),
}

impl Store for AnyStore {
    async fn issue_nonce(&self, device_id: &str) -> Result<String, StoreError> {
        match self {
            AnyStore::InMemory(s) => s.issue_nonce(device_id).await,
            AnyStore::Postgres(s) => s.issue_nonce(device_id).await,
        }
    }

    async fn lookup_pending_nonce(&self, device_id: &str) -> Result<Option<String>, StoreError> {
        match self {
            AnyStore::InMemory(s) => s.lookup_pending_nonce(device_id).await,
            AnyStore::Postgres(s) => s.lookup_pending_nonce(device_id).await,
        }
    }

    async fn lookup_by_key_and_device(
        &self,
        device_id: &str,
        key_id: &str,
    ) -> Result<Option<DeviceRecord>, StoreError> {
        match self {
            AnyStore::InMemory(s) => s.lookup_by_key_and_device(device_id, key_id).await,
            AnyStore::Postgres(s) => s.lookup_by_key_and_device(device_id, key_id).await,
        }
    }

    async fn upsert_attestation(
        &self,
        device_id: &str,
        key_id: &str,
        public_key_pem: &str,
    ) -> Result<(), StoreError> {
        match self {
            AnyStore::InMemory(s) => s.upsert_attestation(device_id, key_id, public_key_pem).await,
            AnyStore::Postgres(s) => s.upsert_attestation(device_id, key_id, public_key_pem).await,
        }
    }

    async fn advance_counter(
        &self,
        device_id: &str,
        key_id: &str,
        expected_prior: u32,
        new_counter: u32,
    ) -> Result<(), StoreError> {
        match self {
            AnyStore::InMemory(s) => {
                s.advance_counter(device_id, key_id, expected_prior, new_counter).await
            }
            AnyStore::Postgres(s) => {
                s.advance_counter(device_id, key_id, expected_prior, new_counter).await
            }
        }
    }
}
