//! Refresh token primitive (§4.3). 32 random bytes, base64-url-unpadded;
//! SHA3-256 hash; constant-time hash comparison.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use cp_core::error::{CoreError, CoreResult};
use rand::RngCore;
use sha3::{Digest, Sha3_256};
use subtle::ConstantTimeEq;

const RAW_BYTE_LEN: usize = 32;

/// Generates a fresh `(raw, hash)` pair. `raw` is what's handed to the
/// caller; `hash` is what gets persisted.
pub fn mint() -> (String, String) {
    let mut bytes = [0u8; RAW_BYTE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let raw = URL_SAFE_NO_PAD.encode(bytes);
    let hash = hash_raw(&raw).expect("freshly minted raw is never empty");
    (raw, hash)
}

/// Deterministically hashes a raw refresh token. Fails on empty input.
pub fn hash_raw(raw: &str) -> CoreResult<String> {
    if raw.is_empty() {
        return Err(CoreError::InvalidRefresh);
    }
    let mut hasher = Sha3_256::new();
    hasher.update(raw.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Constant-time comparison between a freshly-hashed raw token and a
/// stored hash, so equal-length string comparison never leaks timing.
pub fn hashes_match(computed: &str, stored: &str) -> bool {
    let computed = computed.as_bytes();
    let stored = stored.as_bytes();
    if computed.len() != stored.len() {
        return false;
    }
    bool::from(computed.ct_eq(stored))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_32_bytes_hex() {
        let (raw, hash) = mint();
        assert_eq!(hash_raw(&raw).unwrap(), hash);
        // SHA3-256 digest is 32 bytes -> 64 hex chars.
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn two_mints_differ() {
        let (raw_a, hash_a) = mint();
        let (raw_b, hash_b) = mint();
        assert_ne!(raw_a, raw_b);
        assert_ne!(hash_a, hash_b);
    }

    #[test]
    fn empty_input_fails() {
        assert_eq!(hash_raw("").unwrap_err(), CoreError::InvalidRefresh);
    }
}
