//! The clear-text `s.handshake` exchange that turns on session encryption.
//!
//! ```text
//! server                                   client
//!   │ s.handshake {base, modu, pub}  ───────▶ │
//!   │ ◀─────────────────────────  s.handshake {pub}
//!   │        both derive secret, install cipher
//! ```
//!
//! Each wait is bounded; a timeout or malformed record is fatal.

use crate::crypto::{Cipher, KeyExchange, SessionCipher, SharedSecret};
use crate::error::{Error, Result};
use crate::logging::Redacted;
use crate::protocol::{kind, HandshakeOffer, HandshakeReply, Packet};
use crate::session::Session;
use crate::FALLBACK_PACKET_LIMIT;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Default bound on waiting for the peer's handshake record.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Builds the record cipher from the exchanged secret.
pub type CipherFactory = fn(&SharedSecret) -> Result<Arc<dyn Cipher>>;

/// ChaCha20-Poly1305 session cipher.
pub fn default_cipher(secret: &SharedSecret) -> Result<Arc<dyn Cipher>> {
    Ok(Arc::new(SessionCipher::new(secret)?))
}

/// Handshake settings.
#[derive(Clone)]
pub struct Handshake {
    wait: Duration,
    limit: usize,
    cipher: CipherFactory,
}

impl Default for Handshake {
    fn default() -> Self {
        Self {
            wait: HANDSHAKE_TIMEOUT,
            limit: FALLBACK_PACKET_LIMIT,
            cipher: default_cipher,
        }
    }
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("wait", &self.wait)
            .field("limit", &self.limit)
            .finish()
    }
}

impl Handshake {
    /// Override the reply timeout.
    pub fn with_timeout(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Override the byte ceiling for handshake records.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Override the cipher construction.
    pub fn with_cipher(mut self, cipher: CipherFactory) -> Self {
        self.cipher = cipher;
        self
    }

    /// Offer parameters, wait for the client's value, install the cipher.
    pub async fn as_server(&self, session: &mut Session) -> Result<()> {
        let exchange = KeyExchange::offer();
        let offer = Packet::with_data(kind::HANDSHAKE, &exchange.offer_payload())?;
        session
            .send_packet(&offer)
            .await
            .map_err(|e| Error::Handshake(format!("sending offer: {}", e)))?;

        let reply: HandshakeReply = self.receive(session).await?;
        let secret = exchange.derive(reply.public)?;
        debug!(secret = ?Redacted(&secret), "Handshake complete (server)");
        session.install_cipher((self.cipher)(&secret)?)
    }

    /// Wait for the server's offer, answer it, install the cipher.
    pub async fn as_client(&self, session: &mut Session) -> Result<()> {
        let offer: HandshakeOffer = self.receive(session).await?;
        let exchange = KeyExchange::accept(&offer)?;

        let reply = Packet::with_data(
            kind::HANDSHAKE,
            &HandshakeReply {
                public: exchange.public_value(),
            },
        )?;
        session
            .send_packet(&reply)
            .await
            .map_err(|e| Error::Handshake(format!("sending reply: {}", e)))?;

        let secret = exchange.derive(offer.public)?;
        debug!(secret = ?Redacted(&secret), "Handshake complete (client)");
        session.install_cipher((self.cipher)(&secret)?)
    }

    async fn receive<T: serde::de::DeserializeOwned>(&self, session: &mut Session) -> Result<T> {
        let packet = timeout(self.wait, session.receive_packet(self.limit))
            .await
            .map_err(|_| Error::Handshake("timed out waiting for peer".into()))?
            .map_err(|e| Error::Handshake(e.to_string()))?;

        if packet.kind != kind::HANDSHAKE {
            return Err(Error::Handshake(format!("unexpected {:?} record", packet.kind)));
        }
        packet
            .data_as()
            .map_err(|e| Error::Handshake(format!("malformed handshake: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Framer;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_handshake_then_encrypted_traffic() {
        let (a, b) = tokio::io::duplex(8192);
        let mut server = Session::new(a);
        let mut client = Session::new(b);

        let handshake = Handshake::default();
        let (s, c) = tokio::join!(handshake.as_server(&mut server), handshake.as_client(&mut client));
        s.expect("server handshake");
        c.expect("client handshake");
        assert!(server.is_encrypted() && client.is_encrypted());

        let packet = Packet::new(kind::CONNECT, json!({"name": "alice"}));
        client.send_packet(&packet).await.expect("send");
        assert_eq!(server.receive_packet(8192).await.expect("receive"), packet);
    }

    /// Leaves records untouched, so its frames are plain JSON.
    struct Passthrough;

    impl Cipher for Passthrough {
        fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
            Ok(plaintext.to_vec())
        }

        fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
            Ok(ciphertext.to_vec())
        }
    }

    fn passthrough(_: &SharedSecret) -> Result<Arc<dyn Cipher>> {
        Ok(Arc::new(Passthrough))
    }

    #[tokio::test]
    async fn test_cipher_factory_decides_record_format() {
        let (a, b) = tokio::io::duplex(8192);
        let mut server = Session::new(a);
        let mut client = Session::new(b);

        let custom = Handshake::default().with_cipher(passthrough);
        let standard = Handshake::default();
        let (s, c) = tokio::join!(custom.as_server(&mut server), standard.as_client(&mut client));
        s.expect("server handshake");
        c.expect("client handshake");

        // Plain JSON from the server is not a sealed record for the client.
        let packet = Packet::new(kind::MESSAGE, json!({"content": "hi"}));
        server.send_packet(&packet).await.expect("send");
        assert!(matches!(client.receive_packet(8192).await, Err(Error::Crypto(_))));

        // A sealed record from the client is not JSON for the server.
        client.send_packet(&packet).await.expect("send");
        assert!(server.receive_packet(8192).await.is_err());
    }

    #[tokio::test]
    async fn test_server_times_out_without_reply() {
        let (a, _b) = tokio::io::duplex(8192);
        let mut server = Session::new(a);

        let handshake = Handshake::default().with_timeout(Duration::from_millis(50));
        let result = handshake.as_server(&mut server).await;
        assert!(matches!(result, Err(Error::Handshake(_))));
        assert!(!server.is_encrypted());
    }

    #[tokio::test]
    async fn test_malformed_reply_is_fatal() {
        let (a, b) = tokio::io::duplex(8192);
        let mut server = Session::new(a);
        let mut raw = b;

        raw.write_all(&Framer::encode(br#"{"type":"s.handshake","data":{"pub":"nope"}}"#))
            .await
            .expect("write");
        let result = Handshake::default().as_server(&mut server).await;
        assert!(matches!(result, Err(Error::Handshake(_))));
    }

    #[tokio::test]
    async fn test_wrong_type_is_fatal() {
        let (a, b) = tokio::io::duplex(8192);
        let mut client = Session::new(b);
        let mut raw = a;

        raw.write_all(&Framer::encode(br#"{"type":"m.msg","data":{}}"#))
            .await
            .expect("write");
        let result = Handshake::default().as_client(&mut client).await;
        assert!(matches!(result, Err(Error::Handshake(_))));
    }
}
