//! Fetches Apple's published App Attest Root CA certificate at build time,
//! converts it from PEM to DER, and writes it to `OUT_DIR` so
//! `trust_anchor.rs` can pull it in via `include_bytes!`.
//!
//! Mirrors the fetch-and-cache approach used by sibling App Attest crates
//! in the wild (download once, skip if already cached) rather than
//! vendoring a byte blob directly into version control.

use std::path::Path;
use std::time::Duration;
use std::{env, fs};

use base64::{engine::general_purpose::STANDARD, Engine as _};

const PEM_URL: &str =
    "https://www.apple.com/certificateauthority/Apple_App_Attestation_Root_CA.pem";

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set by cargo");
    let der_path = Path::new(&out_dir).join("apple_app_attest_root_ca.der");

    println!("cargo:rerun-if-changed=build.rs");

    if der_path.exists() {
        return;
    }

    match fetch_pem(PEM_URL) {
        Ok(pem_bytes) => match pem_to_der(&pem_bytes) {
            Ok(der_bytes) => {
                fs::write(&der_path, der_bytes).expect("unable to write Apple root CA DER");
            }
            Err(e) => panic!("failed to convert Apple root CA PEM to DER: {e}"),
        },
        Err(e) => {
            // Offline builds (CI without network, air-gapped dev boxes) still
            // need to produce a crate that links; write an empty placeholder
            // so `include_bytes!` resolves, and let the first chain
            // verification at runtime fail loudly instead of the build.
            eprintln!(
                "warning: could not fetch Apple App Attest Root CA ({e}); \
                 writing an empty trust anchor. Chain verification will \
                 fail at runtime until a real certificate is provisioned."
            );
            fs::write(&der_path, []).expect("unable to write placeholder trust anchor");
        }
    }
}

fn fetch_pem(url: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()?;

    let resp = client.get(url).send()?;
    if !resp.status().is_success() {
        return Err(format!("HTTP error fetching Apple root CA: {}", resp.status()).into());
    }

    Ok(resp.bytes()?.to_vec())
}

fn pem_to_der(pem: &[u8]) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let pem_str = std::str::from_utf8(pem)?;
    let b64: String = pem_str
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    Ok(STANDARD.decode(b64.trim())?)
}
