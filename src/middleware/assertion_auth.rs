//! Assertion authentication middleware.
//!
//! Tower middleware enforcing the per-request assertion ceremony
//! (SPEC_FULL.md §4.3, §5, §6) in front of any protected route: verifies
//! the signed `signature` header against the device's previously attested
//! public key, checks RP-ID and counter monotonicity, and — unlike the
//! teacher's `device_auth::DeviceAuthMiddleware`, which signs over
//! `timestamp || body` — reconstructs the signed payload from a canonical
//! JSON encoding of whichever application headers the client named in
//! `assertion-inputs`. The request body is never part of the signed
//! payload, so (also unlike the teacher) this middleware never buffers it.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{
    body::Body,
    http::{HeaderMap, Request, Response},
};
use chrono::Utc;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tower::{Layer, Service};
use uuid::Uuid;

use crate::config::Config;
use crate::error::CoreError;
use crate::services::canonical_json;
use crate::services::assertion;
use crate::services::store::{AnyStore, Store};
use crate::validation;

const HEADER_DEVICE_ID: &str = "device-id";
const HEADER_KEY_ID: &str = "key-id";
const HEADER_SIGNATURE: &str = "signature";
const HEADER_NONCE: &str = "nonce";
const HEADER_ASSERTION_INPUTS: &str = "assertion-inputs";
const X_REQUEST_ID: &str = "x-request-id";

const MAX_ASSERTION_INPUTS: usize = 20;

/// Device/key identity recovered by a successful assertion, injected into
/// request extensions for downstream handlers.
#[derive(Debug, Clone)]
pub struct AssertedDevice {
    pub device_id: String,
    pub key_id: String,
    pub counter: u32,
}

#[derive(Clone)]
pub struct AssertionAuthLayer {
    store: AnyStore,
    config: Arc<Config>,
}

impl AssertionAuthLayer {
    pub fn new(store: AnyStore, config: Arc<Config>) -> Self {
        Self { store, config }
    }
}

impl<S> Layer<S> for AssertionAuthLayer {
    type Service = AssertionAuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AssertionAuthMiddleware {
            inner,
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AssertionAuthMiddleware<S> {
    inner: S,
    store: AnyStore,
    config: Arc<Config>,
}

impl<S> Service<Request<Body>> for AssertionAuthMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let store = self.store.clone();
        let config = self.config.clone();
        let mut inner = std::mem::replace(&mut self.inner, self.inner.clone());

        Box::pin(async move {
            let request_id = extract_request_id(&request);

            match authenticate(&request, &store, &config, request_id).await {
                Ok(asserted) => {
                    let mut request = request;
                    request.extensions_mut().insert(request_id);
                    request.extensions_mut().insert(asserted);
                    inner.call(request).await
                }
                Err(err) => Ok(err.into_response_with_request_id(request_id)),
            }
        })
    }
}

async fn authenticate(
    request: &Request<Body>,
    store: &AnyStore,
    config: &Config,
    request_id: Uuid,
) -> Result<AssertedDevice, CoreError> {
    let headers = request.headers();

    let device_id = header_str(headers, HEADER_DEVICE_ID)?;
    validation::validate_device_id(device_id).map_err(|e| CoreError::InvalidInput(e.to_string()))?;

    let key_id = header_str(headers, HEADER_KEY_ID)?;
    let signature_b64 = header_str(headers, HEADER_SIGNATURE)?;
    let nonce_header = header_str(headers, HEADER_NONCE)?;
    let assertion_inputs_header = header_str(headers, HEADER_ASSERTION_INPUTS)?;

    assertion::validate_nonce_freshness(nonce_header, Utc::now().timestamp())
        .map_err(CoreError::from)?;

    let input_names = parse_assertion_inputs(assertion_inputs_header)?;
    let client_data = build_client_data(headers, &input_names)?;
    let canonical_bytes = canonical_json::to_canonical_bytes(&client_data);
    let client_data_hash: [u8; 32] = Sha256::digest(&canonical_bytes).into();

    let record = store
        .lookup_by_key_and_device(device_id, key_id)
        .await
        .map_err(CoreError::from)?
        .ok_or(CoreError::NoKeyForDevice)?;

    let public_key_pem = record
        .public_key_pem
        .as_deref()
        .ok_or(CoreError::NoKeyForDevice)?;

    let app_id = format!("{}.{}", config.apple_team_id, config.apple_bundle_id);
    let rp_id_hash_expected: [u8; 32] = Sha256::digest(app_id.as_bytes()).into();

    let stored_counter = u32::try_from(record.counter).unwrap_or(u32::MAX);

    let result = assertion::verify_assertion(
        signature_b64,
        &client_data_hash,
        public_key_pem,
        &rp_id_hash_expected,
        stored_counter,
    )
    .map_err(CoreError::from)?;

    store
        .advance_counter(device_id, key_id, stored_counter, result.new_counter)
        .await
        .map_err(CoreError::from)?;

    tracing::info!(
        request_id = %request_id,
        device_id,
        new_counter = result.new_counter,
        "assertion verified"
    );

    Ok(AssertedDevice {
        device_id: device_id.to_string(),
        key_id: key_id.to_string(),
        counter: result.new_counter,
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, CoreError> {
    headers
        .get(name)
        .ok_or_else(|| CoreError::InvalidInput(format!("missing `{name}` header")))?
        .to_str()
        .map_err(|_| CoreError::InvalidInput(format!("`{name}` header is not valid UTF-8")))
}

/// Parses and validates the `assertion-inputs` header: semicolon-separated
/// lowercased header names, at most 20 entries, each `[a-z0-9-]{1,50}`.
fn parse_assertion_inputs(raw: &str) -> Result<Vec<String>, CoreError> {
    let names: Vec<&str> = raw.split(';').filter(|s| !s.is_empty()).collect();
    if names.is_empty() {
        return Err(CoreError::InvalidInput(
            "assertion-inputs must name at least one header".to_string(),
        ));
    }
    if names.len() > MAX_ASSERTION_INPUTS {
        return Err(CoreError::InvalidInput(format!(
            "assertion-inputs names more than {MAX_ASSERTION_INPUTS} headers"
        )));
    }
    for name in &names {
        if name.len() > 50 || !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
            return Err(CoreError::InvalidInput(format!(
                "invalid header name in assertion-inputs: {name}"
            )));
        }
    }
    Ok(names.into_iter().map(str::to_string).collect())
}

/// Builds the `{headerName: headerValue}` map the client signed over.
/// SPEC_FULL.md §4.3 requires sorted keys and `/`-escaping, which
/// [`canonical_json::to_canonical_bytes`] handles — this just assembles
/// the unordered map from request headers.
fn build_client_data(headers: &HeaderMap, names: &[String]) -> Result<Value, CoreError> {
    let mut map = Map::new();
    for name in names {
        let value = headers
            .get(name.as_str())
            .ok_or_else(|| CoreError::InvalidInput(format!("missing header named in assertion-inputs: {name}")))?
            .to_str()
            .map_err(|_| CoreError::InvalidInput(format!("header `{name}` is not valid UTF-8")))?;
        map.insert(name.clone(), Value::String(value.to_string()));
    }
    Ok(Value::Object(map))
}

fn extract_request_id(request: &Request<Body>) -> Uuid {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4)
}
