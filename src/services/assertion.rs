//! Assertion verifier: the per-request ceremony proving possession of a
//! previously attested Secure Enclave key.
//!
//! See SPEC_FULL.md §4.3. The signed message is the "double hash"
//! convention Apple documents for `generateAssertion`: the client computes
//! `nonce = SHA256(authenticatorData || clientDataHash)` and signs that,
//! and the ECDSA verify call below hashes `nonce` again internally (the
//! same pattern the teacher's `device_auth.rs::verify_device_assertion`
//! and `assertion.rs` in the wider pack both use, and the same
//! construction [`crate::services::attestation::verify_attestation`]
//! uses for the registration-time nonce binding) — callers must not
//! pre-hash a second time before calling [`verify_assertion`].

use p256::ecdsa::signature::Verifier as _;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey as _;
use sha2::{Digest, Sha256};

use crate::cbor::{self, AssertionEnvelope, DecodeError};

/// Tolerance window for the nonce's embedded timestamp, mirroring the
/// teacher's device-auth middleware constants.
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 300;
pub const FUTURE_TOLERANCE_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssertionError {
    #[error("malformed envelope: {0}")]
    Decode(#[from] DecodeError),
    #[error("rpIdHash does not match the configured app identity")]
    RpIdMismatch,
    #[error("signed counter must be strictly greater than the stored counter")]
    CounterRegression,
    #[error("invalid stored public key: {0}")]
    InvalidStoredPublicKey(String),
    #[error("invalid signature encoding")]
    InvalidSignatureEncoding,
    #[error("signature verification failed")]
    BadSignature,
    #[error("nonce header timestamp is outside the allowed freshness window")]
    StaleNonce,
    #[error("nonce header is not a valid Unix timestamp")]
    InvalidNonceHeader,
}

/// Validates the `nonce` header (Unix epoch seconds, decimal string) against
/// the freshness window from SPEC_FULL.md §5: reject if it differs from the
/// current time by more than +60s (future skew) or -300s (age). This
/// defeats replay of captured signed headers, independent of the
/// credential-bound challenge checked during registration.
pub fn validate_nonce_freshness(nonce_header: &str, now_unix: i64) -> Result<(), AssertionError> {
    let issued: i64 = nonce_header
        .parse()
        .map_err(|_| AssertionError::InvalidNonceHeader)?;
    let age = now_unix - issued;
    if age > TIMESTAMP_TOLERANCE_SECS || age < -FUTURE_TOLERANCE_SECS {
        return Err(AssertionError::StaleNonce);
    }
    Ok(())
}

/// Everything the caller needs to persist after a successful assertion.
#[derive(Debug, Clone, Copy)]
pub struct AssertionResult {
    pub new_counter: u32,
}

/// Verifies an assertion envelope against a stored public key and prior
/// counter. `client_data_hash` is SHA256 of the caller-reconstructed
/// client data (method, path, body, nonce — see SPEC_FULL.md §4.3);
/// `stored_public_key_pem` is what [`crate::services::attestation`]
/// persisted at registration time.
pub fn verify_assertion(
    assertion_b64: &str,
    client_data_hash: &[u8; 32],
    stored_public_key_pem: &str,
    rp_id_hash_expected: &[u8; 32],
    stored_counter: u32,
) -> Result<AssertionResult, AssertionError> {
    let envelope = cbor::decode_assertion_envelope(assertion_b64)?;
    let auth_data = cbor::parse_assertion_auth_data(&envelope.authenticator_data)?;

    if &auth_data.rp_id_hash != rp_id_hash_expected {
        return Err(AssertionError::RpIdMismatch);
    }

    if auth_data.sign_count <= stored_counter {
        return Err(AssertionError::CounterRegression);
    }

    verify_signature(&envelope, client_data_hash, stored_public_key_pem)?;

    Ok(AssertionResult {
        new_counter: auth_data.sign_count,
    })
}

fn verify_signature(
    envelope: &AssertionEnvelope,
    client_data_hash: &[u8; 32],
    stored_public_key_pem: &str,
) -> Result<(), AssertionError> {
    let verifying_key = VerifyingKey::from_public_key_pem(stored_public_key_pem)
        .map_err(|e| AssertionError::InvalidStoredPublicKey(e.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(&envelope.authenticator_data);
    hasher.update(client_data_hash);
    let nonce = hasher.finalize();

    let signature = parse_signature(&envelope.signature)?;

    verifying_key
        .verify(&nonce, &signature)
        .map_err(|_| AssertionError::BadSignature)
}

/// Apple signs in DER; some clients emit raw 64-byte r||s instead.
fn parse_signature(bytes: &[u8]) -> Result<Signature, AssertionError> {
    Signature::from_der(bytes)
        .or_else(|_| Signature::from_slice(bytes))
        .map_err(|_| AssertionError::InvalidSignatureEncoding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::SigningKey;
    use p256::pkcs8::EncodePublicKey;
    use rand::rngs::OsRng;

    fn sample_key_pair() -> (SigningKey, String) {
        let signing_key = SigningKey::random(&mut OsRng);
        let pem = signing_key
            .verifying_key()
            .to_public_key_pem(p256::pkcs8::LineEnding::LF)
            .unwrap();
        (signing_key, pem)
    }

    fn build_assertion_envelope_b64(
        signing_key: &SigningKey,
        rp_id_hash: [u8; 32],
        sign_count: u32,
        client_data_hash: &[u8; 32],
    ) -> String {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        use ciborium::Value;
        use p256::ecdsa::signature::Signer;

        let mut auth_data = Vec::with_capacity(37);
        auth_data.extend_from_slice(&rp_id_hash);
        auth_data.push(0x40);
        auth_data.extend_from_slice(&sign_count.to_be_bytes());

        let mut hasher = Sha256::new();
        hasher.update(&auth_data);
        hasher.update(client_data_hash);
        let nonce = hasher.finalize();

        let signature: Signature = signing_key.sign(&nonce);

        let map = Value::Map(vec![
            (
                Value::Text("signature".into()),
                Value::Bytes(signature.to_der().as_bytes().to_vec()),
            ),
            (
                Value::Text("authenticatorData".into()),
                Value::Bytes(auth_data),
            ),
        ]);

        let mut buf = Vec::new();
        ciborium::into_writer(&map, &mut buf).unwrap();
        STANDARD.encode(&buf)
    }

    #[test]
    fn valid_assertion_is_accepted_and_advances_counter() {
        let (signing_key, pem) = sample_key_pair();
        let rp_id_hash = [7u8; 32];
        let client_data_hash = [9u8; 32];
        let envelope = build_assertion_envelope_b64(&signing_key, rp_id_hash, 5, &client_data_hash);

        let result = verify_assertion(&envelope, &client_data_hash, &pem, &rp_id_hash, 4).unwrap();
        assert_eq!(result.new_counter, 5);
    }

    #[test]
    fn counter_regression_is_rejected() {
        let (signing_key, pem) = sample_key_pair();
        let rp_id_hash = [7u8; 32];
        let client_data_hash = [9u8; 32];
        let envelope = build_assertion_envelope_b64(&signing_key, rp_id_hash, 5, &client_data_hash);

        let result = verify_assertion(&envelope, &client_data_hash, &pem, &rp_id_hash, 5);
        assert!(matches!(result, Err(AssertionError::CounterRegression)));
    }

    #[test]
    fn rp_id_mismatch_is_rejected() {
        let (signing_key, pem) = sample_key_pair();
        let rp_id_hash = [7u8; 32];
        let client_data_hash = [9u8; 32];
        let envelope = build_assertion_envelope_b64(&signing_key, rp_id_hash, 5, &client_data_hash);

        let wrong_rp_id_hash = [1u8; 32];
        let result = verify_assertion(&envelope, &client_data_hash, &pem, &wrong_rp_id_hash, 4);
        assert!(matches!(result, Err(AssertionError::RpIdMismatch)));
    }

    #[test]
    fn nonce_freshness_accepts_current_timestamp() {
        assert!(validate_nonce_freshness("1000", 1000).is_ok());
    }

    #[test]
    fn nonce_freshness_rejects_too_old() {
        let result = validate_nonce_freshness("1000", 1000 + TIMESTAMP_TOLERANCE_SECS + 1);
        assert!(matches!(result, Err(AssertionError::StaleNonce)));
    }

    #[test]
    fn nonce_freshness_rejects_too_far_in_future() {
        let result = validate_nonce_freshness("1000", 1000 - FUTURE_TOLERANCE_SECS - 1);
        assert!(matches!(result, Err(AssertionError::StaleNonce)));
    }

    #[test]
    fn nonce_freshness_rejects_non_numeric_header() {
        let result = validate_nonce_freshness("not-a-number", 1000);
        assert!(matches!(result, Err(AssertionError::InvalidNonceHeader)));
    }

    #[test]
    fn tampered_client_data_hash_fails_signature_check() {
        let (signing_key, pem) = sample_key_pair();
        let rp_id_hash = [7u8; 32];
        let client_data_hash = [9u8; 32];
        let envelope = build_assertion_envelope_b64(&signing_key, rp_id_hash, 5, &client_data_hash);

        let tampered_hash = [2u8; 32];
        let result = verify_assertion(&envelope, &tampered_hash, &pem, &rp_id_hash, 4);
        assert!(matches!(result, Err(AssertionError::BadSignature)));
    }
}
