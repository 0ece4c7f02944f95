//! Parameters derived from the configured device id or a timestamp.

use super::cipher::KeyedCipher;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// `msToken` for Douyin web requests: a device-derived base run through the
/// keyed cipher with the timestamp key.
pub fn douyin_ms_token(device_id: &str, timestamp_ms: u64) -> String {
    let base = URL_SAFE_NO_PAD.encode(Sha256::digest(device_id.as_bytes()));
    match KeyedCipher::from_timestamp(&timestamp_ms.to_string()) {
        Some(cipher) => cipher.encrypt(&base),
        None => base,
    }
}

/// `did` cookie value for Kuaishou web pages.
pub fn kuaishou_did(device_id: &str) -> String {
    let digest = hex::encode(Sha256::digest(device_id.as_bytes()));
    format!("web_{}", &digest[..32])
}

/// Cache-busting `mrd` query value for Pear Video's status endpoint.
pub fn pear_mrd(timestamp_ms: u64) -> String {
    let mixed = timestamp_ms
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    format!("0.{:016}", mixed % 10_000_000_000_000_000)
}

/// Short stable digest of a raw upstream response.
pub fn fingerprint(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))[..16].to_string()
}
