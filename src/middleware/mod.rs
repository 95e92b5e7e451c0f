//! Middleware modules.
//!
//! Contains the assertion-verification middleware protecting routes that
//! require a live per-request proof of Secure Enclave key possession.

pub mod assertion_auth;

pub use assertion_auth::{AssertedDevice, AssertionAuthLayer};
