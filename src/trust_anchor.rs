//! Apple App Attest Root CA trust anchor.
//!
//! The certificate is provisioned at build time by `build.rs` (fetched from
//! Apple's published certificate authority page, converted to DER) rather
//! than hand-copied into source control. See DESIGN.md for why.

/// DER-encoded Apple App Attest Root CA certificate.
///
/// Empty if `build.rs` could not reach Apple's CA page at build time (e.g.
/// an offline build); chain verification against an empty anchor always
/// fails closed, it never silently accepts an unverified chain.
pub static APPLE_APP_ATTEST_ROOT_CA_DER: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/apple_app_attest_root_ca.der"));

/// True once a real trust anchor has been provisioned.
pub fn is_provisioned() -> bool {
    !APPLE_APP_ATTEST_ROOT_CA_DER.is_empty()
}
