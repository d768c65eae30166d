//! API-key hashing and verification (specification §4.10).
//!
//! Stored shape is `base64(salt)$base64(hash)` rather than the `argon2`
//! crate's own PHC string format — the specification names the exact
//! on-disk shape, so this hand-rolls it directly against `argon2`'s
//! low-level `hash_password_into`, the same "decode raw bytes, reject
//! anything that doesn't fit" posture as the key-loading code in
//! `decision-gate-cli`/`decision-gate-mcp` this crate's `keys` module is
//! grounded on.

use akashi_core::{Error, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use rand::RngCore;
use subtle::ConstantTimeEq;

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

const SALT_LEN: usize = 16;
const OUTPUT_LEN: usize = 32;
const MEMORY_KIB: u32 = 64 * 1024;
const TIME_COST: u32 = 1;
const PARALLELISM: u32 = 4;

fn hasher() -> Result<Argon2<'static>> {
    let params = Params::new(MEMORY_KIB, TIME_COST, PARALLELISM, Some(OUTPUT_LEN))
        .map_err(|e| Error::Fatal(format!("invalid argon2 params: {e}")))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Generate a fresh API key (the plaintext to hand to the caller once) and
/// its `base64(salt)$base64(hash)` storage form.
pub fn generate_api_key() -> Result<(String, String)> {
    let mut key_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key_bytes);
    let plaintext = BASE64.encode(key_bytes);
    let stored = hash_api_key(&plaintext)?;
    Ok((plaintext, stored))
}

/// Hash a plaintext API key into its `base64(salt)$base64(hash)` storage
/// form, with a freshly generated salt.
pub fn hash_api_key(plaintext: &str) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut output = [0u8; OUTPUT_LEN];
    hasher()?
        .hash_password_into(plaintext.as_bytes(), &salt, &mut output)
        .map_err(|e| Error::Fatal(format!("argon2 hashing failed: {e}")))?;
    Ok(format!("{}${}", BASE64.encode(salt), BASE64.encode(output)))
}

/// Verify `plaintext` against a stored `base64(salt)$base64(hash)` value.
/// Constant-time over the hash comparison; a malformed stored value is
/// treated as "does not match" rather than propagated as an error, since a
/// corrupt record shouldn't become an auth bypass or a crash.
pub fn verify_api_key(plaintext: &str, stored: &str) -> bool {
    let Some((salt_b64, hash_b64)) = stored.split_once('$') else {
        return false;
    };
    let Ok(salt) = BASE64.decode(salt_b64) else {
        return false;
    };
    let Ok(expected) = BASE64.decode(hash_b64) else {
        return false;
    };
    let Ok(hasher) = hasher() else {
        return false;
    };
    let mut actual = [0u8; OUTPUT_LEN];
    if hasher.hash_password_into(plaintext.as_bytes(), &salt, &mut actual).is_err() {
        return false;
    }
    actual.as_slice().ct_eq(expected.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_verifies_against_its_own_hash() {
        let (plaintext, stored) = generate_api_key().unwrap();
        assert!(verify_api_key(&plaintext, &stored));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let (_plaintext, stored) = generate_api_key().unwrap();
        assert!(!verify_api_key("not-the-key", &stored));
    }

    #[test]
    fn malformed_stored_value_fails_closed() {
        assert!(!verify_api_key("anything", "not-a-valid-stored-value"));
    }

    #[test]
    fn two_hashes_of_the_same_key_use_different_salts() {
        let a = hash_api_key("same-plaintext").unwrap();
        let b = hash_api_key("same-plaintext").unwrap();
        assert_ne!(a, b);
        assert!(verify_api_key("same-plaintext", &a));
        assert!(verify_api_key("same-plaintext", &b));
    }
}
