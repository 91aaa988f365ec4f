//! Request authentication for the webhook endpoint

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::net::IpAddr;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Check an `X-Hub-Signature-256` header against the raw body.
pub fn verify_github_signature(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    let Some(hex_signature) = signature_header.strip_prefix(SIGNATURE_PREFIX) else {
        warn!("Signature header without '{}' prefix", SIGNATURE_PREFIX);
        return false;
    };
    let Ok(signature) = hex::decode(hex_signature) else {
        warn!("Signature header is not valid hex");
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    // constant-time comparison
    mac.verify_slice(&signature).is_ok()
}

/// Empty `allowed` admits everyone; otherwise the client must be listed.
pub fn is_ip_allowed(allowed: &[IpAddr], client: Option<IpAddr>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match client {
        Some(ip) => {
            let ip = ip.to_canonical();
            allowed.iter().any(|a| a.to_canonical() == ip)
        }
        None => false,
    }
}
