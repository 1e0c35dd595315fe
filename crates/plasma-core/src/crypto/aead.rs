//! Session encryption using ChaCha20-Poly1305.
//!
//! The session key is HKDF-SHA256 over the exchanged secret. Each record is
//! `base64(nonce (12) || ciphertext || tag (16))`; base64 keeps the framing
//! sentinel out of encrypted records.

use super::{hkdf_derive, Cipher, SharedSecret, KEY_SIZE};
use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce as ChaNonce,
};
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroizing, ZeroizeOnDrop};

/// Size of nonce in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Size of authentication tag in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

const KDF_SALT: &[u8] = b"plasma-session-v1";
const KDF_INFO: &[u8] = b"plasma session key";

/// Encrypt with a random nonce, prepending it to output.
///
/// Output format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`
pub fn encrypt_with_random_nonce(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let ciphertext = cipher
        .encrypt(ChaNonce::from_slice(&nonce), plaintext)
        .map_err(|_| Error::Crypto("encryption failed".into()))?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Decrypt data produced by [`encrypt_with_random_nonce`].
///
/// Returns a generic error on failure to prevent oracle attacks.
pub fn decrypt_with_prepended_nonce(
    key: &[u8; KEY_SIZE],
    data: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Crypto("ciphertext too short".into()));
    }
    let (nonce, ciphertext) = data.split_at(NONCE_SIZE);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let plaintext = cipher
        .decrypt(ChaNonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Crypto("decryption failed".into()))?;

    Ok(Zeroizing::new(plaintext))
}

/// Default [`Cipher`] installed on a session after the key exchange.
#[derive(ZeroizeOnDrop)]
pub struct SessionCipher {
    key: [u8; KEY_SIZE],
}

impl SessionCipher {
    /// Derive the session key from the exchanged secret.
    pub fn new(secret: &SharedSecret) -> Result<Self> {
        let ikm = secret.to_bytes();
        let okm = hkdf_derive(Some(KDF_SALT), &ikm[..], KDF_INFO, KEY_SIZE)?;
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&okm);
        Ok(Self { key })
    }
}

impl Cipher for SessionCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let sealed = encrypt_with_random_nonce(&self.key, plaintext)?;
        Ok(STANDARD.encode(sealed).into_bytes())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let sealed = STANDARD
            .decode(ciphertext)
            .map_err(|_| Error::Crypto("record is not base64".into()))?;
        let plaintext = decrypt_with_prepended_nonce(&self.key, &sealed)?;
        Ok(plaintext.to_vec())
    }
}

impl fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionCipher([REDACTED])")
    }
}
