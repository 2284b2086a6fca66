//! Key management and AEAD primitives for the data vault.
//!
//! Per-(classification, version) ChaCha20-Poly1305 ciphers are derived from a
//! single 32-byte master secret with HKDF-SHA256; the info string binds both
//! the tier and the key version, so rotation is a version bump and every
//! historical version stays derivable for reads. The active version sits
//! behind a read/write lock: rotation swaps it atomically and decryptors of
//! older versions never block on it.

use crate::vault::{Classification, VaultError};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::sync::RwLock;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// Master key length (32 bytes)
pub const MASTER_KEY_LEN: usize = 32;

/// Versioned key material for all classification tiers.
pub struct KeyRing {
    master: [u8; MASTER_KEY_LEN],
    active_version: RwLock<u32>,
}

// Key material stays out of Debug output.
impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRing")
            .field("active_version", &self.active_version())
            .finish_non_exhaustive()
    }
}

impl KeyRing {
    /// Build a key ring from master secret material. Version numbering starts
    /// at 1.
    pub fn new(master: [u8; MASTER_KEY_LEN]) -> Self {
        Self {
            master,
            active_version: RwLock::new(1),
        }
    }

    /// Version used for new writes.
    pub fn active_version(&self) -> u32 {
        *self.active_version.read().unwrap()
    }

    /// Introduce a new key version for future writes. Existing records keep
    /// their stored version and remain decryptable.
    pub fn rotate(&self) -> u32 {
        let mut version = self.active_version.write().unwrap();
        *version += 1;
        *version
    }

    /// Cipher for a tier at a specific key version.
    pub fn cipher_for(
        &self,
        classification: Classification,
        version: u32,
    ) -> Result<ChaCha20Poly1305, VaultError> {
        let info = format!("vault:{classification}:v{version}");
        derive_cipher(&self.master, info.as_bytes())
    }

    /// Cipher for a tier at the current active version, returned together
    /// with that version so the caller can stamp it on the record.
    pub fn active_cipher_for(
        &self,
        classification: Classification,
    ) -> Result<(ChaCha20Poly1305, u32), VaultError> {
        let version = self.active_version();
        Ok((self.cipher_for(classification, version)?, version))
    }
}

fn derive_cipher(ikm: &[u8], info: &[u8]) -> Result<ChaCha20Poly1305, VaultError> {
    let hk = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; 32];
    hk.expand(info, &mut okm)
        .map_err(|_| VaultError::KeyDerivation)?;
    Ok(ChaCha20Poly1305::new(Key::from_slice(&okm)))
}

/// Fresh random nonce from the OS RNG. Never reused: one per `store`.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt a serialized payload, binding `aad` into the authentication tag.
pub fn encrypt(
    cipher: &ChaCha20Poly1305,
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, VaultError> {
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| VaultError::Encryption)
}

/// Decrypt and authenticate. A tag mismatch (tampered ciphertext, wrong key,
/// or wrong associated data) maps to [`VaultError::Encryption`], an
/// integrity failure, never retried.
pub fn decrypt(
    cipher: &ChaCha20Poly1305,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, VaultError> {
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| VaultError::Encryption)
}
