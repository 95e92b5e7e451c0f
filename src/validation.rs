//! Request-field format validation shared by the nonce, registration and
//! assertion routes (SPEC_FULL.md §6).

use thiserror::Error;

const MIN_DEVICE_ID_LEN: usize = 8;
const MAX_DEVICE_ID_LEN: usize = 64;
const KEY_ID_B64_LEN: usize = 44;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("device-id must be {MIN_DEVICE_ID_LEN}-{MAX_DEVICE_ID_LEN} characters of [a-zA-Z0-9-]")]
    InvalidDeviceId,
    #[error("keyId must be a {KEY_ID_B64_LEN}-character base64-encoded SHA-256 digest")]
    InvalidKeyId,
}

/// Validates a `device-id`: 8-64 characters, `[a-zA-Z0-9-]` only.
pub fn validate_device_id(device_id: &str) -> Result<(), ValidationError> {
    let len = device_id.len();
    if !(MIN_DEVICE_ID_LEN..=MAX_DEVICE_ID_LEN).contains(&len) {
        return Err(ValidationError::InvalidDeviceId);
    }
    if !device_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(ValidationError::InvalidDeviceId);
    }
    Ok(())
}

/// Validates a `keyId`: the base64 encoding of a SHA-256 digest is always
/// 44 characters (43 data + 1 padding `=`).
pub fn validate_key_id(key_id: &str) -> Result<(), ValidationError> {
    if key_id.len() != KEY_ID_B64_LEN {
        return Err(ValidationError::InvalidKeyId);
    }
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    match STANDARD.decode(key_id) {
        Ok(bytes) if bytes.len() == 32 => Ok(()),
        _ => Err(ValidationError::InvalidKeyId),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("device-0001", true)]
    #[case("short", false)]
    #[case("device_id_0001!!", false)]
    fn device_id_format_cases(#[case] candidate: &str, #[case] expect_ok: bool) {
        assert_eq!(validate_device_id(candidate).is_ok(), expect_ok);
    }

    #[test]
    fn device_id_accepts_max_length() {
        assert!(validate_device_id(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn device_id_rejects_too_long() {
        assert!(validate_device_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn key_id_accepts_valid_sha256_base64() {
        let key_id = base64::engine::general_purpose::STANDARD.encode([0u8; 32]);
        assert!(validate_key_id(&key_id).is_ok());
    }

    #[test]
    fn key_id_rejects_wrong_length() {
        assert!(validate_key_id("too-short").is_err());
    }

    #[test]
    fn key_id_rejects_non_base64() {
        let bogus = "!".repeat(44);
        assert!(validate_key_id(&bogus).is_err());
    }
}
