//! Attestation verifier: the registration-time ceremony that binds a
//! device's Secure Enclave key to a server-issued nonce and walks the
//! certificate chain back to Apple's root CA.
//!
//! See SPEC_FULL.md §4.2 for the eight verification steps this module
//! implements in sequence.

use der_parser::ber::{parse_ber, BerObjectContent};
use p256::ecdsa::signature::Verifier as _;
use p256::ecdsa::{Signature as P256Signature, VerifyingKey as P256VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint as _;
use p256::pkcs8::{DecodePublicKey as _, EncodePublicKey};
use p384::ecdsa::{Signature as P384Signature, VerifyingKey as P384VerifyingKey};
use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::cbor::{self, AttestationEnvelope, DecodeError};
use crate::config::Config;
use crate::trust_anchor::APPLE_APP_ATTEST_ROOT_CA_DER;

/// Apple's proprietary nonce extension, carried in the leaf certificate.
const APPLE_NONCE_EXTENSION_OID: &str = "1.2.840.113635.100.8.2";

const AAGUID_DEVELOPMENT: &[u8; 16] = b"appattestdevelop";
const AAGUID_PRODUCTION: &[u8; 16] = &[
    b'a', b'p', b'p', b'a', b't', b't', b'e', b's', b't', 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttestationError {
    #[error("malformed envelope: {0}")]
    Decode(#[from] DecodeError),
    #[error("certificate chain is incomplete")]
    IncompleteCertChain,
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),
    #[error("certificate is not valid at the current time")]
    CertificateExpired,
    #[error("chain does not terminate at Apple's App Attest root CA: {0}")]
    ChainVerificationFailed(String),
    #[error("leaf certificate is missing Apple's nonce extension")]
    MissingNonceExtension,
    #[error("nonce extension is not in the expected ASN.1 shape")]
    InvalidNonceFormat,
    #[error("attested nonce does not match the expected challenge binding")]
    NonceMismatch,
    #[error("rpIdHash does not match the configured app identity")]
    AppIdMismatch,
    #[error("authData environment tag (AAGUID) does not match the configured environment")]
    WrongEnvironment,
    #[error("invalid public key encoding: {0}")]
    InvalidPublicKey(String),
    #[error("initial counter must be zero, got {0}")]
    NonZeroCounter(u32),
    #[error("leaf certificate public key hash does not match the supplied keyId")]
    KeyIdMismatch,
    #[error("authData credentialId does not match the supplied keyId")]
    CredentialIdMismatch,
    #[error("keyId is not valid base64: {0}")]
    InvalidKeyIdEncoding(String),
}

/// Everything the caller needs to persist after a successful attestation.
#[derive(Debug, Clone)]
pub struct VerificationResult {
    /// SEC1 uncompressed point, PEM-wrapped for storage/transport.
    pub public_key_pem: String,
    pub key_id_b64: String,
    pub counter: u32,
    pub credential_id: Vec<u8>,
}

/// Runs the full 8-step attestation ceremony (SPEC_FULL.md §4.2) against a
/// freshly decoded envelope.
///
/// `nonce` is the base64 challenge string exactly as issued by
/// [`crate::services::store::Store::issue_nonce`] and returned to the
/// client — *not* a pre-hashed value. Steps 2 and 4 need the envelope's
/// own `authData`, so the nonce-hash and the credential checks can only
/// happen after decoding, not before it.
pub async fn verify_attestation(
    attestation_object_b64: &str,
    key_id_b64: &str,
    nonce: &str,
    config: &Config,
    request_id: &str,
) -> Result<VerificationResult, AttestationError> {
    let envelope = cbor::decode_attestation_envelope(attestation_object_b64)?;
    tracing::info!(request_id, step = "decode_envelope", status = "pass");

    let certs = parse_der_chain(&envelope)?;
    tracing::info!(request_id, step = "parse_certificates", status = "pass");

    verify_certificate_chain(&certs)?;
    tracing::info!(request_id, step = "verify_chain_of_trust", status = "pass");

    let leaf_der = &envelope.x5c[0];
    let expected_nonce_hash = compute_nonce_hash(&envelope.auth_data, nonce);
    verify_nonce_binding(leaf_der, &expected_nonce_hash)?;
    tracing::info!(request_id, step = "verify_nonce_binding", status = "pass");

    let auth_data = cbor::parse_attestation_auth_data(&envelope.auth_data)?;
    tracing::info!(request_id, step = "parse_auth_data", status = "pass");

    let public_key_pem = extract_public_key_pem(leaf_der)?;
    tracing::info!(request_id, step = "extract_public_key", status = "pass");

    verify_key_id(&public_key_pem, key_id_b64)?;
    tracing::info!(request_id, step = "verify_key_id", status = "pass");

    verify_app_identity(&auth_data.rp_id_hash, config)?;
    tracing::info!(request_id, step = "verify_app_identity", status = "pass");

    verify_environment(&auth_data.aaguid, config)?;
    tracing::info!(request_id, step = "verify_environment", status = "pass");

    verify_initial_counter(auth_data.sign_count)?;
    tracing::info!(request_id, step = "verify_initial_counter", status = "pass");

    verify_credential_id(&auth_data.credential_id, key_id_b64)?;
    tracing::info!(request_id, step = "verify_credential_id", status = "pass");

    Ok(VerificationResult {
        public_key_pem,
        key_id_b64: key_id_b64.to_string(),
        counter: auth_data.sign_count,
        credential_id: auth_data.credential_id,
    })
}

/// `nonceHash = SHA256(authData || SHA256(nonce))` (SPEC_FULL.md §4.2 step 2).
fn compute_nonce_hash(auth_data: &[u8], nonce: &str) -> [u8; 32] {
    let client_data_hash = Sha256::digest(nonce.as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(auth_data);
    hasher.update(client_data_hash);
    hasher.finalize().into()
}

fn decode_key_id(key_id_b64: &str) -> Result<Vec<u8>, AttestationError> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD
        .decode(key_id_b64)
        .map_err(|e| AttestationError::InvalidKeyIdEncoding(e.to_string()))
}

/// Step 4: `SHA256(publicKeyBytes) == base64_decode(keyId)`.
fn verify_key_id(public_key_pem: &str, key_id_b64: &str) -> Result<(), AttestationError> {
    let key = P256VerifyingKey::from_public_key_pem(public_key_pem)
        .map_err(|e| AttestationError::InvalidPublicKey(e.to_string()))?;
    let sec1_point = key.to_encoded_point(false);
    let computed = Sha256::digest(sec1_point.as_bytes());
    let expected = decode_key_id(key_id_b64)?;
    if computed.as_slice() == expected.as_slice() {
        Ok(())
    } else {
        Err(AttestationError::KeyIdMismatch)
    }
}

/// Step 8: `authData.credentialId == base64_decode(keyId)`.
fn verify_credential_id(credential_id: &[u8], key_id_b64: &str) -> Result<(), AttestationError> {
    let expected = decode_key_id(key_id_b64)?;
    if credential_id == expected.as_slice() {
        Ok(())
    } else {
        Err(AttestationError::CredentialIdMismatch)
    }
}

fn parse_der_chain(envelope: &AttestationEnvelope) -> Result<Vec<Vec<u8>>, AttestationError> {
    if envelope.x5c.is_empty() {
        return Err(AttestationError::IncompleteCertChain);
    }
    for der in &envelope.x5c {
        X509Certificate::from_der(der)
            .map_err(|e| AttestationError::InvalidCertificate(e.to_string()))?;
    }
    Ok(envelope.x5c.clone())
}

/// Walks the chain leaf -> intermediate -> (root), verifying each link's
/// signature against the next certificate's public key, then verifies the
/// final link against the compiled-in Apple root CA.
fn verify_certificate_chain(chain_der: &[Vec<u8>]) -> Result<(), AttestationError> {
    if chain_der.len() < 2 {
        return Err(AttestationError::IncompleteCertChain);
    }

    let now = x509_parser::time::ASN1Time::now();

    let mut certs = Vec::with_capacity(chain_der.len());
    for der in chain_der {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| AttestationError::InvalidCertificate(e.to_string()))?;
        if !cert.validity().is_valid_at(now) {
            return Err(AttestationError::CertificateExpired);
        }
        certs.push(cert);
    }

    // certs[0] is the leaf credCert; every certificate above it in the
    // chain must assert CA:TRUE, or a leaf could be substituted in as an
    // "intermediate" and still pass the issuer/subject and signature
    // checks below.
    for intermediate in &certs[1..] {
        require_ca_basic_constraint(intermediate)?;
    }

    for window in certs.windows(2) {
        let (child, parent) = (&window[0], &window[1]);
        if child.issuer() != parent.subject() {
            return Err(AttestationError::ChainVerificationFailed(
                "issuer/subject mismatch between adjacent certificates".to_string(),
            ));
        }
        verify_signed_by(child, parent)?;
    }

    let (_, root) = X509Certificate::from_der(APPLE_APP_ATTEST_ROOT_CA_DER).map_err(|e| {
        AttestationError::ChainVerificationFailed(format!(
            "trust anchor is not a valid certificate (is it provisioned?): {e}"
        ))
    })?;
    require_ca_basic_constraint(&root)?;

    let last = certs.last().expect("checked len >= 2 above");
    if last.issuer() != root.subject() {
        return Err(AttestationError::ChainVerificationFailed(
            "chain does not terminate at the Apple App Attest root CA".to_string(),
        ));
    }
    verify_signed_by(last, &root)
}

/// X.509 `basicConstraints` extension OID (RFC 5280 §4.2.1.9).
const BASIC_CONSTRAINTS_OID: &str = "2.5.29.19";

/// Step 3 also requires basic constraints to be checked (spec.md §4.2):
/// every CA certificate in the chain (intermediates and the root) must
/// carry a `BasicConstraints` extension with `cA: TRUE`. Located and
/// parsed the same way [`verify_nonce_binding`]/`extract_nonce_from_extension`
/// handle Apple's nonce extension: find by OID among the certificate's
/// extensions, then walk the raw DER value by hand rather than relying on
/// a library-typed accessor.
fn require_ca_basic_constraint(cert: &X509Certificate) -> Result<(), AttestationError> {
    let is_ca = cert
        .extensions()
        .iter()
        .find(|e| e.oid.to_string() == BASIC_CONSTRAINTS_OID)
        .and_then(|ext| parse_ber(ext.value).ok())
        .map(|(_, seq)| basic_constraints_ca_flag(&seq))
        .unwrap_or(false);

    if is_ca {
        Ok(())
    } else {
        Err(AttestationError::ChainVerificationFailed(
            "non-leaf certificate is missing BasicConstraints CA:TRUE".to_string(),
        ))
    }
}

/// `BasicConstraints ::= SEQUENCE { cA BOOLEAN DEFAULT FALSE, ... }` — a
/// present-and-true leading BOOLEAN means the certificate may act as a CA.
/// Absent (common for leaf certs, which never reach this function) or
/// explicitly `FALSE` both mean "not a CA".
fn basic_constraints_ca_flag(seq: &der_parser::ber::BerObject) -> bool {
    let BerObjectContent::Sequence(items) = &seq.content else {
        return false;
    };
    items
        .iter()
        .any(|item| matches!(item.content, BerObjectContent::Boolean(true)))
}

/// Verifies `child`'s signature was produced by `parent`'s public key.
/// Apple's intermediate and root CAs sign with P-384, so the curve is
/// determined by the parent's SPKI point length rather than assumed.
fn verify_signed_by(
    child: &X509Certificate,
    parent: &X509Certificate,
) -> Result<(), AttestationError> {
    let tbs = child.tbs_certificate.as_ref();
    let sig_bytes = child.signature_value.data.as_ref();
    let spki = &parent.tbs_certificate.subject_pki;
    let parent_point = spki.subject_public_key.data.as_ref();

    match spki.algorithm.algorithm.to_string().as_str() {
        // id-ecPublicKey; curve is determined by the point length since
        // both P-256 and P-384 share this OID.
        "1.2.840.10045.2.1" => match parent_point.len() {
            97 => {
                let key = P384VerifyingKey::from_sec1_bytes(parent_point).map_err(|e| {
                    AttestationError::ChainVerificationFailed(format!("bad P-384 key: {e}"))
                })?;
                let sig = P384Signature::from_der(sig_bytes).map_err(|e| {
                    AttestationError::ChainVerificationFailed(format!("bad P-384 signature: {e}"))
                })?;
                key.verify(tbs, &sig).map_err(|_| {
                    AttestationError::ChainVerificationFailed(
                        "P-384 signature verification failed".to_string(),
                    )
                })
            }
            65 => {
                let key = P256VerifyingKey::from_sec1_bytes(parent_point).map_err(|e| {
                    AttestationError::ChainVerificationFailed(format!("bad P-256 key: {e}"))
                })?;
                let sig = P256Signature::from_der(sig_bytes).map_err(|e| {
                    AttestationError::ChainVerificationFailed(format!("bad P-256 signature: {e}"))
                })?;
                key.verify(tbs, &sig).map_err(|_| {
                    AttestationError::ChainVerificationFailed(
                        "P-256 signature verification failed".to_string(),
                    )
                })
            }
            n => Err(AttestationError::ChainVerificationFailed(format!(
                "unsupported EC point length {n}"
            ))),
        },
        other => Err(AttestationError::ChainVerificationFailed(format!(
            "unsupported signature algorithm OID {other}"
        ))),
    }
}

/// Extracts Apple's nonce extension (OID 1.2.840.113635.100.8.2) from the
/// leaf certificate and compares it against the expected nonce.
///
/// The extension value is `SEQUENCE { [1] OCTET STRING nonce }`.
fn verify_nonce_binding(leaf_der: &[u8], expected_nonce: &[u8; 32]) -> Result<(), AttestationError> {
    let (_, leaf) = X509Certificate::from_der(leaf_der)
        .map_err(|e| AttestationError::InvalidCertificate(e.to_string()))?;

    let ext = leaf
        .extensions()
        .iter()
        .find(|e| e.oid.to_string() == APPLE_NONCE_EXTENSION_OID)
        .ok_or(AttestationError::MissingNonceExtension)?;

    let nonce = extract_nonce_from_extension(ext.value)?;
    if nonce.as_slice() == expected_nonce {
        Ok(())
    } else {
        Err(AttestationError::NonceMismatch)
    }
}

fn extract_nonce_from_extension(der: &[u8]) -> Result<Vec<u8>, AttestationError> {
    let (_, outer) = parse_ber(der).map_err(|_| AttestationError::InvalidNonceFormat)?;
    let BerObjectContent::Sequence(items) = outer.content else {
        return Err(AttestationError::InvalidNonceFormat);
    };

    for item in items {
        match item.content {
            BerObjectContent::OctetString(bytes) => return Ok(bytes.to_vec()),
            BerObjectContent::Unknown(any) => {
                if let Ok((_, inner)) = parse_ber(any.data) {
                    if let BerObjectContent::OctetString(bytes) = inner.content {
                        return Ok(bytes.to_vec());
                    }
                }
            }
            _ => continue,
        }
    }

    Err(AttestationError::InvalidNonceFormat)
}

/// Confirms `rpIdHash == SHA256("{team_id}.{bundle_id}")`.
fn verify_app_identity(rp_id_hash: &[u8; 32], config: &Config) -> Result<(), AttestationError> {
    let app_id = format!("{}.{}", config.apple_team_id, config.apple_bundle_id);
    let expected = Sha256::digest(app_id.as_bytes());
    if expected.as_slice() == rp_id_hash {
        Ok(())
    } else {
        Err(AttestationError::AppIdMismatch)
    }
}

fn verify_environment(aaguid: &[u8; 16], config: &Config) -> Result<(), AttestationError> {
    let expected = if config.allow_development_environment {
        AAGUID_DEVELOPMENT
    } else {
        AAGUID_PRODUCTION
    };
    if aaguid == expected {
        Ok(())
    } else {
        Err(AttestationError::WrongEnvironment)
    }
}

fn verify_initial_counter(counter: u32) -> Result<(), AttestationError> {
    if counter == 0 {
        Ok(())
    } else {
        Err(AttestationError::NonZeroCounter(counter))
    }
}

/// Extracts the SEC1 uncompressed P-256 point from the leaf credential
/// certificate's SubjectPublicKeyInfo (SPEC_FULL.md §4.2 step 4) and
/// re-encodes it as PEM for storage. App Attest's `authData` carries no
/// COSE public key of its own — unlike general WebAuthn, the credential's
/// key lives only in the X.509 leaf, so this reads the certificate rather
/// than the authenticator data.
fn extract_public_key_pem(leaf_der: &[u8]) -> Result<String, AttestationError> {
    let (_, leaf) = X509Certificate::from_der(leaf_der)
        .map_err(|e| AttestationError::InvalidCertificate(e.to_string()))?;

    let spki = &leaf.tbs_certificate.subject_pki;
    let point = spki.subject_public_key.data.as_ref();

    let verifying_key = P256VerifyingKey::from_sec1_bytes(point)
        .map_err(|e| AttestationError::InvalidPublicKey(e.to_string()))?;
    verifying_key
        .to_public_key_pem(p256::pkcs8::LineEnding::LF)
        .map_err(|e| AttestationError::InvalidPublicKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_counter_zero_accepted() {
        assert!(verify_initial_counter(0).is_ok());
    }

    #[test]
    fn initial_counter_nonzero_rejected() {
        assert!(matches!(
            verify_initial_counter(3),
            Err(AttestationError::NonZeroCounter(3))
        ));
    }

    #[test]
    fn app_identity_matches_expected_hash() {
        let config = Config::default_for_test();
        let app_id = format!("{}.{}", config.apple_team_id, config.apple_bundle_id);
        let hash: [u8; 32] = Sha256::digest(app_id.as_bytes()).into();
        assert!(verify_app_identity(&hash, &config).is_ok());
    }

    #[test]
    fn app_identity_mismatch_rejected() {
        let config = Config::default_for_test();
        let hash = [0u8; 32];
        assert!(matches!(
            verify_app_identity(&hash, &config),
            Err(AttestationError::AppIdMismatch)
        ));
    }

    #[test]
    fn environment_development_aaguid_accepted_in_dev_mode() {
        let mut config = Config::default_for_test();
        config.allow_development_environment = true;
        assert!(verify_environment(AAGUID_DEVELOPMENT, &config).is_ok());
    }

    #[test]
    fn environment_production_aaguid_rejected_in_dev_mode() {
        let mut config = Config::default_for_test();
        config.allow_development_environment = true;
        assert!(matches!(
            verify_environment(AAGUID_PRODUCTION, &config),
            Err(AttestationError::WrongEnvironment)
        ));
    }

    #[test]
    fn incomplete_chain_of_one_certificate_rejected() {
        let chain = vec![vec![0u8; 10]];
        assert!(matches!(
            parse_der_chain(&AttestationEnvelope {
                fmt: "apple-appattest".to_string(),
                x5c: chain,
                receipt: vec![],
                auth_data: vec![],
            }),
            Err(AttestationError::InvalidCertificate(_))
        ));
    }

    fn sample_pem_and_key_id() -> (String, String) {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        use p256::ecdsa::SigningKey;
        use rand::rngs::OsRng;

        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        let pem = verifying_key
            .to_public_key_pem(p256::pkcs8::LineEnding::LF)
            .unwrap();
        let point = verifying_key.to_encoded_point(false);
        let key_id = STANDARD.encode(Sha256::digest(point.as_bytes()));
        (pem, key_id)
    }

    #[test]
    fn key_id_matching_public_key_hash_accepted() {
        let (pem, key_id) = sample_pem_and_key_id();
        assert!(verify_key_id(&pem, &key_id).is_ok());
    }

    #[test]
    fn key_id_not_matching_public_key_hash_rejected() {
        let (pem, _) = sample_pem_and_key_id();
        let (_, wrong_key_id) = sample_pem_and_key_id();
        assert!(matches!(
            verify_key_id(&pem, &wrong_key_id),
            Err(AttestationError::KeyIdMismatch)
        ));
    }

    #[test]
    fn credential_id_matching_key_id_accepted() {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        let credential_id = vec![1u8, 2, 3, 4];
        let key_id = STANDARD.encode(&credential_id);
        assert!(verify_credential_id(&credential_id, &key_id).is_ok());
    }

    #[test]
    fn credential_id_not_matching_key_id_rejected() {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        let credential_id = vec![1u8, 2, 3, 4];
        let key_id = STANDARD.encode([9u8, 9, 9, 9]);
        assert!(matches!(
            verify_credential_id(&credential_id, &key_id),
            Err(AttestationError::CredentialIdMismatch)
        ));
    }

    #[test]
    fn nonce_hash_changes_with_auth_data() {
        let a = compute_nonce_hash(b"authdata1", "nonce");
        let b = compute_nonce_hash(b"authdata2", "nonce");
        assert_ne!(a, b);
    }
}
