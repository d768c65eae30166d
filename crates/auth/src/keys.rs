//! Ed25519 key material for signed tokens.
//!
//! Grounded on the key-loading idiom in `decision-gate-cli`
//! (`load_signing_key`/`load_public_key` in the `decision-gate` example
//! pack): accept either a raw 32-byte file or its base64 text encoding,
//! reject anything else. Generalized here to also cover the dev-mode
//! in-memory keypair the specification requires when no key file is
//! configured.

use akashi_core::{Error, Result};
use base64::Engine;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// The signing and verifying halves of a process's token keypair.
pub struct TokenKeys {
    pub(crate) signing_key: SigningKey,
    pub(crate) verifying_key: VerifyingKey,
}

impl TokenKeys {
    /// Generate a fresh in-memory keypair. Tokens issued under this key
    /// become unverifiable the moment the process restarts — fine for dev,
    /// never for prod.
    pub fn generate_dev() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self { signing_key, verifying_key }
    }

    /// Load a signing key from raw bytes: exactly 32 bytes, or their
    /// base64 text encoding. Anything else is a fatal startup
    /// misconfiguration — per specification §4.10, prod without a loadable
    /// key must refuse to start rather than fall back to a dev keypair.
    pub fn from_pem_bytes(bytes: &[u8]) -> Result<Self> {
        let key_bytes = decode_32_bytes(bytes)?;
        let signing_key = SigningKey::from_bytes(&key_bytes);
        let verifying_key = signing_key.verifying_key();
        tracing::info!("loaded token signing key from configured key material");
        Ok(Self { signing_key, verifying_key })
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.verifying_key
    }
}

fn decode_32_bytes(bytes: &[u8]) -> Result<[u8; 32]> {
    let raw = if bytes.len() == 32 {
        bytes.to_vec()
    } else {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Error::Fatal("signing key file is neither 32 raw bytes nor valid utf-8".into()))?;
        BASE64
            .decode(text.trim().as_bytes())
            .map_err(|_| Error::Fatal("signing key file is not valid base64".into()))?
    };
    raw.as_slice()
        .try_into()
        .map_err(|_| Error::Fatal(format!("signing key must decode to 32 bytes, got {}", raw.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_keypair_round_trips_through_from_bytes() {
        let keys = TokenKeys::generate_dev();
        let reloaded = TokenKeys::from_pem_bytes(&keys.signing_key.to_bytes()).unwrap();
        assert_eq!(reloaded.verifying_key().as_bytes(), keys.verifying_key().as_bytes());
    }

    #[test]
    fn base64_encoded_key_loads() {
        let keys = TokenKeys::generate_dev();
        let encoded = BASE64.encode(keys.signing_key.to_bytes());
        let reloaded = TokenKeys::from_pem_bytes(encoded.as_bytes()).unwrap();
        assert_eq!(reloaded.verifying_key().as_bytes(), keys.verifying_key().as_bytes());
    }

    #[test]
    fn malformed_key_is_fatal() {
        let err = TokenKeys::from_pem_bytes(b"not a key").unwrap_err();
        assert!(matches!(err, Error::Fatal(_)));
    }
}
