//! Per-connection Diffie-Hellman style key exchange.
//!
//! The server picks a random `base` and `modulus`, each side picks a private
//! exponent and publishes `base^exp mod modulus`. The group is not a vetted
//! prime group: the exchange only defeats passive eavesdroppers and
//! authenticates nobody.

use crate::error::{Error, Result};
use crate::protocol::HandshakeOffer;
use rand::rngs::OsRng;
use rand::Rng;
use std::fmt;
use std::ops::RangeInclusive;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Range the server draws `base` from.
pub const BASE_RANGE: RangeInclusive<u64> = 1_000..=9_999;

/// Range the server draws `modulus` from (10^15 to 15^15).
pub const MODULUS_RANGE: RangeInclusive<u64> = 1_000_000_000_000_000..=437_893_890_380_859_375;

/// Smallest modulus a client will accept from a server.
const MIN_MODULUS: u64 = 5;

/// Modular exponentiation by square-and-multiply with 128-bit intermediates.
pub fn mod_pow(base: u64, exponent: u64, modulus: u64) -> u64 {
    if modulus == 1 {
        return 0;
    }
    let m = modulus as u128;
    let mut result: u128 = 1;
    let mut b = base as u128 % m;
    let mut e = exponent;

    while e > 0 {
        if e & 1 == 1 {
            result = result * b % m;
        }
        b = b * b % m;
        e >>= 1;
    }
    result as u64
}

/// Ephemeral exchange state for one session.
///
/// Consumed by [`KeyExchange::derive`]; only the resulting secret outlives it.
#[derive(ZeroizeOnDrop)]
pub struct KeyExchange {
    #[zeroize(skip)]
    base: u64,
    #[zeroize(skip)]
    modulus: u64,
    private_exponent: u64,
    #[zeroize(skip)]
    public_value: u64,
}

impl KeyExchange {
    /// Server side: generate fresh parameters and a keypair.
    pub fn offer() -> Self {
        let mut rng = OsRng;
        let base = rng.gen_range(BASE_RANGE);
        let modulus = rng.gen_range(MODULUS_RANGE);
        Self::generate(base, modulus)
    }

    /// Client side: build a keypair over the parameters a server offered.
    pub fn accept(offer: &HandshakeOffer) -> Result<Self> {
        if offer.modu < MIN_MODULUS {
            return Err(Error::Handshake(format!("modulus too small: {}", offer.modu)));
        }
        if offer.base < 2 {
            return Err(Error::Handshake("degenerate base".into()));
        }
        Ok(Self::generate(offer.base, offer.modu))
    }

    fn generate(base: u64, modulus: u64) -> Self {
        let private_exponent = OsRng.gen_range(2..modulus - 1);
        let public_value = mod_pow(base, private_exponent, modulus);
        Self {
            base,
            modulus,
            private_exponent,
            public_value,
        }
    }

    /// Parameters and public value as sent in the server's handshake.
    pub fn offer_payload(&self) -> HandshakeOffer {
        HandshakeOffer {
            base: self.base,
            modu: self.modulus,
            public: self.public_value,
        }
    }

    /// Our public value.
    pub fn public_value(&self) -> u64 {
        self.public_value
    }

    /// Combine with the peer's public value to obtain the shared secret.
    pub fn derive(self, peer_public: u64) -> Result<SharedSecret> {
        if peer_public == 0 || peer_public >= self.modulus {
            return Err(Error::Handshake("peer public value out of range".into()));
        }
        Ok(SharedSecret(mod_pow(
            peer_public,
            self.private_exponent,
            self.modulus,
        )))
    }
}

impl fmt::Debug for KeyExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyExchange")
            .field("base", &self.base)
            .field("modulus", &self.modulus)
            .field("public_value", &self.public_value)
            .field("private_exponent", &"[REDACTED]")
            .finish()
    }
}

/// Secret both sides arrive at. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop, PartialEq, Eq)]
pub struct SharedSecret(u64);

impl SharedSecret {
    /// Big-endian bytes, used as key material.
    pub fn to_bytes(&self) -> Zeroizing<[u8; 8]> {
        Zeroizing::new(self.0.to_be_bytes())
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mod_pow_known_values() {
        assert_eq!(mod_pow(4, 13, 497), 445);
        assert_eq!(mod_pow(2, 10, 1_000), 24);
        assert_eq!(mod_pow(7, 0, 13), 1);
        assert_eq!(mod_pow(5, 3, 1), 0);
    }

    #[test]
    fn test_mod_pow_no_overflow_near_max_modulus() {
        let m = *MODULUS_RANGE.end();
        // (m - 1)^2 ≡ 1 (mod m)
        assert_eq!(mod_pow(m - 1, 2, m), 1);
    }

    #[test]
    fn test_offer_parameters_in_range() {
        let exchange = KeyExchange::offer();
        let offer = exchange.offer_payload();
        assert!(BASE_RANGE.contains(&offer.base));
        assert!(MODULUS_RANGE.contains(&offer.modu));
        assert!(offer.public < offer.modu);
    }

    #[test]
    fn test_both_sides_agree() {
        for _ in 0..32 {
            let server = KeyExchange::offer();
            let offer = server.offer_payload();
            let client = KeyExchange::accept(&offer).expect("valid offer");
            let client_public = client.public_value();

            let client_secret = client.derive(offer.public).expect("derive");
            let server_secret = server.derive(client_public).expect("derive");
            assert_eq!(client_secret, server_secret);
        }
    }

    #[test]
    fn test_rejects_degenerate_offer() {
        let offer = HandshakeOffer { base: 1234, modu: 3, public: 1 };
        assert!(matches!(KeyExchange::accept(&offer), Err(Error::Handshake(_))));
    }

    #[test]
    fn test_rejects_out_of_range_peer_value() {
        let exchange = KeyExchange::offer();
        let modulus = exchange.offer_payload().modu;
        assert!(KeyExchange::offer().derive(0).is_err());
        assert!(exchange.derive(modulus).is_err());
    }

    #[test]
    fn test_debug_redacts_exponent() {
        let exchange = KeyExchange::offer();
        let debug = format!("{:?}", exchange);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains(&exchange.private_exponent.to_string()));
    }
}
