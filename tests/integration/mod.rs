//! Integration tests for the App Attest verification core.
//!
//! These tests run against a real PostgreSQL container and drive the
//! actual HTTP router. Use `cargo test --test integration` to run them.
//!
//! Test organization:
//! - `attestation_test.rs` - nonce issuance and attestation registration
//! - `protected_route_test.rs` - assertion middleware in front of a route

mod attestation_test;
mod common;
mod protected_route_test;
