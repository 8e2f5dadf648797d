//! ChaCha20-Poly1305 cipher contexts
//!
//! A `CipherContext` owns one random 256-bit key for its whole life.
//! Every encryption draws a fresh nonce and prepends it, so a chunk can be
//! decrypted later without any external state.

use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use zeroize::Zeroizing;

/// 256-bit key (32 bytes)
pub const KEY_SIZE: usize = 32;
/// 96-bit nonce (12 bytes)
pub const NONCE_SIZE: usize = 12;
/// Poly1305 tag (16 bytes)
pub const TAG_SIZE: usize = 16;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("Random number generator unavailable: {0}")]
    Rng(String),

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed - data may be corrupted or tampered")]
    DecryptionFailed,

    #[error("Invalid key size: expected {KEY_SIZE}, got {0}")]
    InvalidKeySize(usize),
}

pub type Result<T> = std::result::Result<T, CipherError>;

/// Generate a cryptographically secure random key
pub fn generate_key() -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    OsRng
        .try_fill_bytes(key.as_mut())
        .map_err(|e| CipherError::Rng(e.to_string()))?;
    Ok(key)
}

/// Generate a cryptographically secure random nonce
pub fn generate_nonce() -> Result<[u8; NONCE_SIZE]> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| CipherError::Rng(e.to_string()))?;
    Ok(nonce)
}

/// An initialized symmetric cipher with its key fixed at creation.
///
/// The key lives in a `Secret`, so it is wiped when the last holder drops
/// the context.
pub struct CipherContext {
    id: u64,
    key: Secret<[u8; KEY_SIZE]>,
}

impl CipherContext {
    /// Create a context with a fresh random key
    pub fn new() -> Result<Self> {
        let key = generate_key()?;
        Ok(Self::from_key(&key))
    }

    /// Create a context from existing key material
    pub fn from_slice(key: &[u8]) -> Result<Self> {
        let key: [u8; KEY_SIZE] = key
            .try_into()
            .map_err(|_| CipherError::InvalidKeySize(key.len()))?;
        let key = Zeroizing::new(key);
        Ok(Self::from_key(&key))
    }

    fn from_key(key: &Zeroizing<[u8; KEY_SIZE]>) -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            key: Secret::new(**key),
        }
    }

    /// Process-unique sequence number, safe to log
    pub fn id(&self) -> u64 {
        self.id
    }

    fn aead(&self) -> Result<ChaCha20Poly1305> {
        let key = self.key.expose_secret();
        ChaCha20Poly1305::new_from_slice(key).map_err(|_| CipherError::InvalidKeySize(key.len()))
    }

    /// Encrypt plaintext
    ///
    /// Returns: nonce || ciphertext || tag
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = self.aead()?;
        let nonce_bytes = generate_nonce()?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt a block produced by [`CipherContext::encrypt`].
    ///
    /// The plaintext is wiped when the returned buffer drops.
    pub fn decrypt(&self, block: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if block.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CipherError::DecryptionFailed);
        }

        let cipher = self.aead()?;
        let (nonce_bytes, encrypted) = block.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, encrypted)
            .map_err(|_| CipherError::DecryptionFailed)?;

        Ok(Zeroizing::new(plaintext))
    }

    /// Size of the block `encrypt` produces for `len` plaintext bytes
    pub const fn sealed_len(len: usize) -> usize {
        NONCE_SIZE + len + TAG_SIZE
    }

    /// Plaintext length of a sealed block, without decrypting it
    pub const fn opened_len(sealed: usize) -> usize {
        sealed.saturating_sub(NONCE_SIZE + TAG_SIZE)
    }
}

impl fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherContext")
            .field("id", &self.id)
            .field("key", &"[REDACTED]")
            .finish()
    }
}
