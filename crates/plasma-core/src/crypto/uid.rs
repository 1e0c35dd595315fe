//! Server-side peer identifiers.
//!
//! A uid is HMAC-SHA256 over `"{name}-{ip}"` under a key drawn once per
//! server process, so clients can neither choose nor precompute it.

use super::random_bytes;
use crate::error::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::net::IpAddr;
use zeroize::ZeroizeOnDrop;

type HmacSha256 = Hmac<Sha256>;

/// Process-wide key for uid derivation.
#[derive(ZeroizeOnDrop)]
pub struct UidKey([u8; 32]);

impl UidKey {
    /// Draw a fresh random key.
    pub fn generate() -> Self {
        Self(random_bytes())
    }

    /// Derive the uid for a name connecting from an address.
    pub fn derive(&self, name: &str, ip: IpAddr) -> Result<String> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.0)
            .map_err(|_| Error::Crypto("invalid hmac key".into()))?;
        mac.update(format!("{}-{}", name, ip).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl fmt::Debug for UidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UidKey([REDACTED])")
    }
}
