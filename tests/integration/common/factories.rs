//! Test data generators for the App Attest API.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use uuid::Uuid;

/// Generates a valid-format `device-id`: 8-64 chars of `[a-zA-Z0-9-]`.
pub fn random_device_id() -> String {
    format!("device-{}", Uuid::new_v4().simple())
}

/// Generates a syntactically valid (but not attested) `keyId`: the base64
/// encoding of 32 arbitrary bytes.
pub fn random_key_id() -> String {
    let bytes: [u8; 32] = std::array::from_fn(|i| i as u8);
    STANDARD.encode(bytes)
}
