//! Cryptographic primitives for Plasma.
//!
//! - **Modular-exponent exchange**: per-connection shared secret
//! - **HKDF-SHA256**: session key derivation
//! - **ChaCha20-Poly1305**: record encryption
//! - **HMAC-SHA256**: server-side peer identifiers
//!
//! ## Security Properties
//!
//! - Confidentiality against passive observers only
//! - No peer authentication, a malicious server sees everything
//! - Key zeroization on drop

mod aead;
mod exchange;
mod uid;

pub use aead::{
    decrypt_with_prepended_nonce, encrypt_with_random_nonce, SessionCipher, NONCE_SIZE, TAG_SIZE,
};
pub use exchange::{mod_pow, KeyExchange, SharedSecret, BASE_RANGE, MODULUS_RANGE};
pub use uid::UidKey;

use crate::error::{Error, Result};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Key size for ChaCha20-Poly1305.
pub const KEY_SIZE: usize = 32;

/// Symmetric record cipher installed on a session after the handshake.
///
/// Sessions treat the algorithm as opaque; anything that can seal and open
/// a byte string keyed by the exchanged secret fits.
pub trait Cipher: Send + Sync {
    /// Seal one record.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Open one record. Fails with [`Error::Crypto`] on tampering or a wrong key.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Derive keys using HKDF-SHA256.
pub fn hkdf_derive(
    salt: Option<&[u8]>,
    input_key_material: &[u8],
    info: &[u8],
    output_length: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let hkdf = Hkdf::<Sha256>::new(salt, input_key_material);
    let mut output = Zeroizing::new(vec![0u8; output_length]);
    hkdf.expand(info, &mut output)
        .map_err(|_| Error::Crypto("HKDF expansion failed".into()))?;
    Ok(output)
}

/// Generate cryptographically secure random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hkdf_derive() {
        let ikm = b"input key material";
        let salt = b"salt";
        let info = b"plasma key derivation";

        let out1 = hkdf_derive(Some(salt), ikm, info, 32).expect("should derive");
        assert_eq!(out1.len(), 32);

        // Deterministic
        let out2 = hkdf_derive(Some(salt), ikm, info, 32).expect("should derive");
        assert_eq!(&*out1, &*out2);

        // Different info -> different output
        let out3 = hkdf_derive(Some(salt), ikm, b"different", 32).expect("should derive");
        assert_ne!(&*out1, &*out3);
    }

    #[test]
    fn test_random_bytes() {
        let a: [u8; 32] = random_bytes();
        let b: [u8; 32] = random_bytes();
        assert_ne!(a, b);
    }
}
