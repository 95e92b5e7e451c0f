//! CBOR/ASN.1 decoder for the two App Attest wire envelopes: the
//! attestation object produced at registration time, and the shorter
//! assertion envelope produced for each protected request.
//!
//! Both envelopes are CBOR maps; the traversal helpers below are shared
//! between them.

use ciborium::Value;

/// Errors produced while decoding either envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid base64 encoding")]
    InvalidBase64,
    #[error("malformed CBOR: {0}")]
    MalformedCbor(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("unexpected attestation format: {0}")]
    WrongFormat(String),
    #[error("authData truncated: {0}")]
    TruncatedAuthData(String),
}

/// The attestation envelope: `{fmt, attStmt: {x5c, receipt}, authData}`.
#[derive(Debug, Clone)]
pub struct AttestationEnvelope {
    pub fmt: String,
    /// Ordered certificate chain, leaf first, DER-encoded. Excludes the
    /// Apple root (never present in `x5c`).
    pub x5c: Vec<Vec<u8>>,
    /// Opaque, not independently verified per spec.md §4.1.
    pub receipt: Vec<u8>,
    pub auth_data: Vec<u8>,
}

/// The assertion envelope: `{signature, authenticatorData}`.
#[derive(Debug, Clone)]
pub struct AssertionEnvelope {
    /// DER-encoded ECDSA signature bytes (some clients emit raw r||s).
    pub signature: Vec<u8>,
    /// Exactly 37 bytes: rpIdHash(32) || flags(1) || signCount(4).
    pub authenticator_data: Vec<u8>,
}

/// Fixed-layout fields parsed out of an attestation `authData` blob.
///
/// | Offset | Length | Field                     |
/// |--------|--------|---------------------------|
/// | 0      | 32     | rpIdHash                  |
/// | 32     | 1      | flags (presence only)     |
/// | 33     | 4      | signCount, big-endian u32 |
/// | 37     | 16     | AAGUID                    |
/// | 53     | 2      | credentialId length (u16) |
/// | 55     | L      | credentialId              |
///
/// Unlike general WebAuthn attested credential data, App Attest's
/// `authData` carries no trailing COSE public key — the device's public
/// key lives in the leaf certificate's SubjectPublicKeyInfo instead.
#[derive(Debug, Clone)]
pub struct AttestationAuthData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
}

/// Fixed-layout fields parsed out of an assertion `authenticatorData`
/// blob (no credential ID or public key — those live only in attestation).
#[derive(Debug, Clone)]
pub struct AssertionAuthData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
}

const ATTESTATION_AUTH_DATA_MIN_LEN: usize = 32 + 1 + 4 + 16 + 2;
const ASSERTION_AUTH_DATA_LEN: usize = 32 + 1 + 4;

/// Decodes a base64-encoded attestation object into its CBOR structure.
pub fn decode_attestation_envelope(base64_data: &str) -> Result<AttestationEnvelope, DecodeError> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    let bytes = STANDARD
        .decode(base64_data)
        .map_err(|_| DecodeError::InvalidBase64)?;

    let value: Value =
        ciborium::from_reader(&bytes[..]).map_err(|e| DecodeError::MalformedCbor(e.to_string()))?;

    let map = value
        .as_map()
        .ok_or_else(|| DecodeError::MalformedCbor("expected a CBOR map".to_string()))?;

    let fmt = find_text(map, "fmt")
        .ok_or(DecodeError::MissingField("fmt"))?
        .to_string();
    if fmt != "apple-appattest" {
        return Err(DecodeError::WrongFormat(fmt));
    }

    let auth_data = find_bytes(map, "authData")
        .ok_or(DecodeError::MissingField("authData"))?
        .to_vec();

    let att_stmt = find_map(map, "attStmt").ok_or(DecodeError::MissingField("attStmt"))?;

    let x5c_array = find_array(att_stmt, "x5c").ok_or(DecodeError::MissingField("x5c"))?;
    let x5c: Vec<Vec<u8>> = x5c_array
        .iter()
        .filter_map(|v| v.as_bytes().map(|b| b.to_vec()))
        .collect();
    if x5c.is_empty() {
        return Err(DecodeError::MissingField("x5c"));
    }

    let receipt = find_bytes(att_stmt, "receipt").map(|b| b.to_vec()).unwrap_or_default();

    Ok(AttestationEnvelope {
        fmt,
        x5c,
        receipt,
        auth_data,
    })
}

/// Decodes a base64-encoded assertion envelope.
pub fn decode_assertion_envelope(base64_data: &str) -> Result<AssertionEnvelope, DecodeError> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    let bytes = STANDARD
        .decode(base64_data)
        .map_err(|_| DecodeError::InvalidBase64)?;

    let value: Value =
        ciborium::from_reader(&bytes[..]).map_err(|e| DecodeError::MalformedCbor(e.to_string()))?;

    let map = value
        .as_map()
        .ok_or_else(|| DecodeError::MalformedCbor("expected a CBOR map".to_string()))?;

    let signature = find_bytes(map, "signature")
        .ok_or(DecodeError::MissingField("signature"))?
        .to_vec();
    let authenticator_data = find_bytes(map, "authenticatorData")
        .ok_or(DecodeError::MissingField("authenticatorData"))?
        .to_vec();

    Ok(AssertionEnvelope {
        signature,
        authenticator_data,
    })
}

/// Parses the attestation-flavored authData layout (§4.1).
pub fn parse_attestation_auth_data(data: &[u8]) -> Result<AttestationAuthData, DecodeError> {
    if data.len() < ATTESTATION_AUTH_DATA_MIN_LEN {
        return Err(DecodeError::TruncatedAuthData(format!(
            "{} bytes, need at least {}",
            data.len(),
            ATTESTATION_AUTH_DATA_MIN_LEN
        )));
    }

    let rp_id_hash: [u8; 32] = data[0..32].try_into().unwrap();
    let flags = data[32];
    let sign_count = u32::from_be_bytes(data[33..37].try_into().unwrap());
    let aaguid: [u8; 16] = data[37..53].try_into().unwrap();
    let cred_id_len = u16::from_be_bytes(data[53..55].try_into().unwrap()) as usize;

    if data.len() < 55 + cred_id_len {
        return Err(DecodeError::TruncatedAuthData(format!(
            "{} bytes, need at least {} for credentialId",
            data.len(),
            55 + cred_id_len
        )));
    }

    let credential_id = data[55..55 + cred_id_len].to_vec();

    Ok(AttestationAuthData {
        rp_id_hash,
        flags,
        sign_count,
        aaguid,
        credential_id,
    })
}

/// Parses the assertion-flavored authenticatorData layout (§4.1): exactly
/// 37 bytes, no credential ID or public key.
pub fn parse_assertion_auth_data(data: &[u8]) -> Result<AssertionAuthData, DecodeError> {
    if data.len() < ASSERTION_AUTH_DATA_LEN {
        return Err(DecodeError::TruncatedAuthData(format!(
            "{} bytes, need at least {}",
            data.len(),
            ASSERTION_AUTH_DATA_LEN
        )));
    }

    let rp_id_hash: [u8; 32] = data[0..32].try_into().unwrap();
    let flags = data[32];
    let sign_count = u32::from_be_bytes(data[33..37].try_into().unwrap());

    Ok(AssertionAuthData {
        rp_id_hash,
        flags,
        sign_count,
    })
}

fn find_text<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a str> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .and_then(|(_, v)| v.as_text())
}

fn find_bytes<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a [u8]> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .and_then(|(_, v)| v.as_bytes())
        .map(Vec::as_slice)
}

fn find_map<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a [(Value, Value)]> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .and_then(|(_, v)| v.as_map())
        .map(Vec::as_slice)
}

fn find_array<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a [Value]> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .and_then(|(_, v)| v.as_array())
        .map(Vec::as_slice)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_attestation_auth_data(cred_id_len: u16, sign_count: u32) -> Vec<u8> {
        let mut data = vec![0u8; 55];
        data[33..37].copy_from_slice(&sign_count.to_be_bytes());
        data[53..55].copy_from_slice(&cred_id_len.to_be_bytes());
        data.extend(std::iter::repeat(0xAB).take(cred_id_len as usize));
        data
    }

    #[test]
    fn attestation_auth_data_too_short_is_truncated() {
        let data = vec![0u8; 40];
        assert!(matches!(
            parse_attestation_auth_data(&data),
            Err(DecodeError::TruncatedAuthData(_))
        ));
    }

    #[test]
    fn attestation_auth_data_parses_minimal_valid() {
        let data = minimal_attestation_auth_data(16, 0);
        let parsed = parse_attestation_auth_data(&data).unwrap();
        assert_eq!(parsed.sign_count, 0);
        assert_eq!(parsed.credential_id.len(), 16);
    }

    #[test]
    fn attestation_auth_data_rejects_truncated_credential_id() {
        let mut data = minimal_attestation_auth_data(16, 0);
        data.truncate(60); // shorter than 55 + 16
        assert!(matches!(
            parse_attestation_auth_data(&data),
            Err(DecodeError::TruncatedAuthData(_))
        ));
    }

    #[test]
    fn assertion_auth_data_exact_37_bytes() {
        let mut data = vec![0u8; 37];
        data[33..37].copy_from_slice(&7u32.to_be_bytes());
        let parsed = parse_assertion_auth_data(&data).unwrap();
        assert_eq!(parsed.sign_count, 7);
    }

    #[test]
    fn assertion_auth_data_too_short() {
        let data = vec![0u8; 36];
        assert!(matches!(
            parse_assertion_auth_data(&data),
            Err(DecodeError::TruncatedAuthData(_))
        ));
    }

    #[test]
    fn decode_attestation_envelope_rejects_invalid_base64() {
        let result = decode_attestation_envelope("not-valid-base64!!!");
        assert!(matches!(result, Err(DecodeError::InvalidBase64)));
    }

    #[test]
    fn decode_attestation_envelope_rejects_invalid_cbor() {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        let encoded = STANDARD.encode([0xff, 0xff, 0xff]);
        let result = decode_attestation_envelope(&encoded);
        assert!(matches!(result, Err(DecodeError::MalformedCbor(_))));
    }

    #[test]
    fn decode_attestation_envelope_round_trips_a_hand_built_map() {
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        let leaf = vec![1u8, 2, 3];
        let auth_data = vec![9u8; 200];
        let map = Value::Map(vec![
            (Value::Text("fmt".into()), Value::Text("apple-appattest".into())),
            (
                Value::Text("attStmt".into()),
                Value::Map(vec![
                    (
                        Value::Text("x5c".into()),
                        Value::Array(vec![Value::Bytes(leaf.clone())]),
                    ),
                    (Value::Text("receipt".into()), Value::Bytes(vec![7, 7])),
                ]),
            ),
            (Value::Text("authData".into()), Value::Bytes(auth_data.clone())),
        ]);

        let mut buf = Vec::new();
        ciborium::into_writer(&map, &mut buf).unwrap();
        let encoded = STANDARD.encode(&buf);

        let decoded = decode_attestation_envelope(&encoded).unwrap();
        assert_eq!(decoded.fmt, "apple-appattest");
        assert_eq!(decoded.x5c, vec![leaf]);
        assert_eq!(decoded.receipt, vec![7, 7]);
        assert_eq!(decoded.auth_data, auth_data);
    }
}
