//! API error handling module
//!
//! Defines error types and their HTTP response conversions. Variants map
//! to SPEC_FULL.md §7's error taxonomy; `safe_message` deliberately
//! avoids leaking which verification step failed for crypto-sensitive
//! variants, so a caller cannot use error text as a verification oracle.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use uuid::Uuid;

use crate::services::assertion::AssertionError;
use crate::services::attestation::AttestationError;
use crate::services::store::StoreError;
use crate::types::ApiErrorResponse;

/// Error codes as defined in SPEC_FULL.md §7.
pub mod codes {
    pub const INVALID_INPUT: &str = "INVALID_INPUT";
    pub const NO_PENDING_NONCE: &str = "NO_PENDING_NONCE";
    pub const NONCE_MISMATCH: &str = "NONCE_MISMATCH";
    pub const INVALID_CERT_CHAIN: &str = "INVALID_CERT_CHAIN";
    pub const KEY_ID_MISMATCH: &str = "KEY_ID_MISMATCH";
    pub const RP_ID_MISMATCH: &str = "RP_ID_MISMATCH";
    pub const NON_ZERO_COUNTER: &str = "NON_ZERO_COUNTER";
    pub const WRONG_ENVIRONMENT: &str = "WRONG_ENVIRONMENT";
    pub const CREDENTIAL_ID_MISMATCH: &str = "CREDENTIAL_ID_MISMATCH";
    pub const MALFORMED_CBOR: &str = "MALFORMED_CBOR";
    pub const BAD_SIGNATURE: &str = "BAD_SIGNATURE";
    pub const COUNTER_REGRESSION: &str = "COUNTER_REGRESSION";
    pub const STALE_NONCE: &str = "STALE_NONCE";
    pub const NO_KEY_FOR_DEVICE: &str = "NO_KEY_FOR_DEVICE";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// API error type with associated HTTP status codes.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no pending nonce for this device")]
    NoPendingNonce,

    #[error("attested nonce does not match the issued challenge")]
    NonceMismatch,

    #[error("certificate chain failed verification")]
    InvalidCertChain,

    #[error("key id does not match the attested credential")]
    KeyIdMismatch,

    #[error("rpIdHash does not match the configured app identity")]
    RpIdMismatch,

    #[error("initial counter was not zero")]
    NonZeroCounter,

    #[error("attestation environment does not match server configuration")]
    WrongEnvironment,

    #[error("credential id does not match the stored record")]
    CredentialIdMismatch,

    #[error("malformed CBOR envelope")]
    MalformedCbor,

    #[error("signature verification failed")]
    BadSignature,

    #[error("signed counter did not advance")]
    CounterRegression,

    #[error("nonce has expired")]
    StaleNonce,

    #[error("no attested key on file for this device")]
    NoKeyForDevice,

    #[error("storage error")]
    StorageError,

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl CoreError {
    /// Returns the error code for this error type.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidInput(_) => codes::INVALID_INPUT,
            CoreError::NoPendingNonce => codes::NO_PENDING_NONCE,
            CoreError::NonceMismatch => codes::NONCE_MISMATCH,
            CoreError::InvalidCertChain => codes::INVALID_CERT_CHAIN,
            CoreError::KeyIdMismatch => codes::KEY_ID_MISMATCH,
            CoreError::RpIdMismatch => codes::RP_ID_MISMATCH,
            CoreError::NonZeroCounter => codes::NON_ZERO_COUNTER,
            CoreError::WrongEnvironment => codes::WRONG_ENVIRONMENT,
            CoreError::CredentialIdMismatch => codes::CREDENTIAL_ID_MISMATCH,
            CoreError::MalformedCbor => codes::MALFORMED_CBOR,
            CoreError::BadSignature => codes::BAD_SIGNATURE,
            CoreError::CounterRegression => codes::COUNTER_REGRESSION,
            CoreError::StaleNonce => codes::STALE_NONCE,
            CoreError::NoKeyForDevice => codes::NO_KEY_FOR_DEVICE,
            CoreError::StorageError => codes::STORAGE_ERROR,
            CoreError::Database(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Returns the HTTP status code for this error type.
    ///
    /// SPEC_FULL.md §6/§7 reserve 422 for exactly one case —
    /// `NoKeyForDevice`, the sentinel that tells the client to re-attest.
    /// Every other verification failure, including the attestation
    /// pipeline's and the assertion pipeline's, is a 400: the request
    /// itself was invalid, not merely "needs a different ceremony".
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            CoreError::NoPendingNonce => StatusCode::BAD_REQUEST,
            CoreError::NonceMismatch => StatusCode::BAD_REQUEST,
            CoreError::InvalidCertChain => StatusCode::BAD_REQUEST,
            CoreError::KeyIdMismatch => StatusCode::BAD_REQUEST,
            CoreError::RpIdMismatch => StatusCode::BAD_REQUEST,
            CoreError::NonZeroCounter => StatusCode::BAD_REQUEST,
            CoreError::WrongEnvironment => StatusCode::BAD_REQUEST,
            CoreError::CredentialIdMismatch => StatusCode::BAD_REQUEST,
            CoreError::MalformedCbor => StatusCode::BAD_REQUEST,
            CoreError::BadSignature => StatusCode::BAD_REQUEST,
            CoreError::CounterRegression => StatusCode::BAD_REQUEST,
            CoreError::StaleNonce => StatusCode::BAD_REQUEST,
            CoreError::NoKeyForDevice => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::StorageError => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a safe message for external consumption. Every
    /// verification-failure variant collapses to the same generic
    /// message so a caller cannot distinguish "bad signature" from
    /// "wrong rpId" from response text alone.
    pub fn safe_message(&self) -> String {
        match self {
            CoreError::InvalidInput(msg) => format!("Invalid input: {msg}"),
            CoreError::NoPendingNonce => "No pending nonce for this device".to_string(),
            CoreError::StaleNonce => "Nonce has expired".to_string(),
            CoreError::MalformedCbor => "Malformed attestation or assertion envelope".to_string(),
            CoreError::NonceMismatch
            | CoreError::InvalidCertChain
            | CoreError::KeyIdMismatch
            | CoreError::RpIdMismatch
            | CoreError::NonZeroCounter
            | CoreError::WrongEnvironment
            | CoreError::CredentialIdMismatch
            | CoreError::BadSignature
            | CoreError::CounterRegression => "Verification failed".to_string(),
            CoreError::NoKeyForDevice => "No attested key on file for this device".to_string(),
            CoreError::StorageError => "A storage error occurred".to_string(),
            CoreError::Database(_) => "A database error occurred".to_string(),
        }
    }

    /// Converts the error to a response with the given request ID.
    pub fn into_response_with_request_id(self, request_id: Uuid) -> Response {
        let status = self.status_code();
        let body = ApiErrorResponse::new(self.code(), self.safe_message(), request_id);

        (status, Json(body)).into_response()
    }
}

impl From<AttestationError> for CoreError {
    fn from(err: AttestationError) -> Self {
        match err {
            AttestationError::Decode(_) => CoreError::MalformedCbor,
            AttestationError::IncompleteCertChain
            | AttestationError::InvalidCertificate(_)
            | AttestationError::CertificateExpired
            | AttestationError::ChainVerificationFailed(_) => CoreError::InvalidCertChain,
            AttestationError::MissingNonceExtension
            | AttestationError::InvalidNonceFormat
            | AttestationError::NonceMismatch => CoreError::NonceMismatch,
            AttestationError::AppIdMismatch => CoreError::RpIdMismatch,
            AttestationError::WrongEnvironment => CoreError::WrongEnvironment,
            AttestationError::InvalidPublicKey(_) => CoreError::InvalidCertChain,
            AttestationError::NonZeroCounter(_) => CoreError::NonZeroCounter,
            AttestationError::KeyIdMismatch => CoreError::KeyIdMismatch,
            AttestationError::CredentialIdMismatch => CoreError::CredentialIdMismatch,
            AttestationError::InvalidKeyIdEncoding(_) => CoreError::InvalidInput("keyId".to_string()),
        }
    }
}

impl From<AssertionError> for CoreError {
    fn from(err: AssertionError) -> Self {
        match err {
            AssertionError::Decode(_) => CoreError::MalformedCbor,
            AssertionError::RpIdMismatch => CoreError::RpIdMismatch,
            AssertionError::CounterRegression => CoreError::CounterRegression,
            AssertionError::InvalidStoredPublicKey(_) => CoreError::StorageError,
            AssertionError::InvalidSignatureEncoding | AssertionError::BadSignature => {
                CoreError::BadSignature
            }
            AssertionError::StaleNonce => CoreError::StaleNonce,
            AssertionError::InvalidNonceHeader => CoreError::InvalidInput("nonce".to_string()),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NoPendingNonce => CoreError::NoPendingNonce,
            StoreError::NoKeyForDevice => CoreError::NoKeyForDevice,
            StoreError::StaleNonce => CoreError::StaleNonce,
            StoreError::ConcurrentModification => CoreError::CounterRegression,
            StoreError::Backend(_) => CoreError::StorageError,
        }
    }
}

/// A wrapper that carries the request ID with an error for response generation.
pub struct ApiErrorWithRequestId {
    pub error: CoreError,
    pub request_id: Uuid,
}

impl IntoResponse for ApiErrorWithRequestId {
    fn into_response(self) -> Response {
        self.error.into_response_with_request_id(self.request_id)
    }
}
