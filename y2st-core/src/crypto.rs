//! `SecretBox` — authenticated symmetric encryption for small blobs at rest
//! (cookies, bot tokens, settings). AES-256-GCM with a fresh random nonce per
//! seal, carried inside the ciphertext envelope.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;

use crate::error::SecretBoxError;

const NONCE_LEN: usize = 12;

/// Holds a 256-bit key loaded once at process startup. Cloning is cheap —
/// the key bytes live behind an `Arc` so every store can share one instance.
#[derive(Clone)]
pub struct SecretBox {
    key: std::sync::Arc<[u8; 32]>,
}

impl SecretBox {
    /// Build a `SecretBox` from raw key bytes. Callers normally reach this
    /// through [`Config`](crate::config::Config), which decodes the
    /// `COOKIE_ENCRYPTION_KEY` environment variable exactly once.
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key: std::sync::Arc::new(key),
        }
    }

    /// Encrypt `plaintext`, returning a base64 envelope of `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> String {
        let cipher = Aes256Gcm::new_from_slice(self.key.as_ref())
            .expect("key is always exactly 32 bytes");
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // encrypt() only fails on catastrophic buffer-length bugs in the aead
        // crate itself; there is nothing a caller could do differently.
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .expect("AES-256-GCM encryption does not fail for in-memory buffers");

        let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);
        BASE64.encode(envelope)
    }

    /// Decrypt an envelope produced by [`seal`](Self::seal). Any tampering —
    /// truncation, bit-flips, or a wrong key — yields `AuthFailure`.
    pub fn open(&self, envelope: &str) -> Result<Vec<u8>, SecretBoxError> {
        let bytes = BASE64.decode(envelope)?;
        if bytes.len() <= NONCE_LEN {
            return Err(SecretBoxError::MalformedEnvelope);
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new_from_slice(self.key.as_ref())
            .expect("key is always exactly 32 bytes");
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| SecretBoxError::AuthFailure)
    }
}
