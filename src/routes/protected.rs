//! An illustrative assertion-protected route, demonstrating
//! [`crate::middleware::assertion_auth`] wired in front of a handler.

use axum::{Extension, Json};
use serde::Serialize;

use crate::middleware::assertion_auth::AssertedDevice;

#[derive(Debug, Serialize)]
pub struct WhoAmIResponse {
    pub device_id: String,
    pub key_id: String,
    pub counter: u32,
}

/// GET /protected/whoami — echoes back the identity the assertion
/// middleware established for this request, after verifying the caller
/// holds the Secure Enclave key bound to that device.
pub async fn whoami(Extension(device): Extension<AssertedDevice>) -> Json<WhoAmIResponse> {
    Json(WhoAmIResponse {
        device_id: device.device_id,
        key_id: device.key_id,
        counter: device.counter,
    })
}
