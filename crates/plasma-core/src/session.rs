//! One framed, optionally encrypted connection.
//!
//! A [`Session`] starts in clear text and gains a [`Cipher`] exactly once,
//! after the handshake. It can then be split into a reader and a writer so
//! that a receive loop and broadcasters can use it concurrently.

use crate::crypto::Cipher;
use crate::error::{Error, Result};
use crate::protocol::{FrameDecoder, Framer, Packet};
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bytes requested from the transport per read.
const READ_CHUNK: usize = 4096;

type BoxedReader = Box<dyn AsyncRead + Unpin + Send + Sync>;
type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send + Sync>;

/// Receiving half: framing, decryption and packet parsing.
pub struct SessionReader {
    stream: BoxedReader,
    decoder: FrameDecoder,
    cipher: Option<Arc<dyn Cipher>>,
}

impl SessionReader {
    /// Receive the next packet.
    ///
    /// `limit` is the byte ceiling for the frame being assembled. On
    /// [`Error::TransportOverflow`], [`Error::Crypto`] or [`Error::Parse`]
    /// the offending frame is gone and the reader can be polled again.
    pub async fn receive_packet(&mut self, limit: usize) -> Result<Packet> {
        let frame = self.receive_frame(limit).await?;
        match &self.cipher {
            Some(cipher) => Packet::from_bytes(&cipher.decrypt(&frame)?),
            None => Packet::from_bytes(&frame),
        }
    }

    async fn receive_frame(&mut self, limit: usize) -> Result<Vec<u8>> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.decoder.next_frame(limit)? {
                return Ok(frame);
            }
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::Disconnected);
            }
            self.decoder.push(&chunk[..n]);
        }
    }
}

/// Sending half: serialization, encryption and framing.
pub struct SessionWriter {
    stream: BoxedWriter,
    cipher: Option<Arc<dyn Cipher>>,
}

impl SessionWriter {
    /// Send one packet.
    pub async fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        self.send_payload(&packet.to_bytes()?).await
    }

    /// Send an already serialized packet, encrypting it for this session.
    pub async fn send_payload(&mut self, payload: &[u8]) -> Result<()> {
        let framed = match &self.cipher {
            Some(cipher) => Framer::encode(&cipher.encrypt(payload)?),
            None => Framer::encode(payload),
        };
        self.stream.write_all(&framed).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Shut down the write side of the connection.
    pub async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Whether records are encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }
}

/// A connection plus its framing and cipher state.
pub struct Session {
    reader: SessionReader,
    writer: SessionWriter,
}

impl Session {
    /// Wrap a connected byte stream.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Sync + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: SessionReader {
                stream: Box::new(read),
                decoder: FrameDecoder::new(),
                cipher: None,
            },
            writer: SessionWriter {
                stream: Box::new(write),
                cipher: None,
            },
        }
    }

    /// Switch both directions to encrypted records.
    ///
    /// Encryption can be enabled once; a second call is rejected.
    pub fn install_cipher(&mut self, cipher: Arc<dyn Cipher>) -> Result<()> {
        if self.is_encrypted() {
            return Err(Error::Handshake("cipher already installed".into()));
        }
        self.reader.cipher = Some(Arc::clone(&cipher));
        self.writer.cipher = Some(cipher);
        Ok(())
    }

    /// Whether the handshake has completed.
    pub fn is_encrypted(&self) -> bool {
        self.writer.is_encrypted()
    }

    /// Send one packet.
    pub async fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        self.writer.send_packet(packet).await
    }

    /// Receive the next packet under the given byte ceiling.
    pub async fn receive_packet(&mut self, limit: usize) -> Result<Packet> {
        self.reader.receive_packet(limit).await
    }

    /// Shut down the write side of the connection.
    pub async fn close(&mut self) -> Result<()> {
        self.writer.close().await
    }

    /// Split into independently usable halves.
    pub fn split(self) -> (SessionReader, SessionWriter) {
        (self.reader, self.writer)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("encrypted", &self.is_encrypted())
            .field("buffered", &self.reader.decoder.buffered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyExchange, SessionCipher};
    use crate::protocol::{kind, SENTINEL};
    use serde_json::json;

    fn cipher_pair() -> (Arc<dyn Cipher>, Arc<dyn Cipher>) {
        let server = KeyExchange::offer();
        let offer = server.offer_payload();
        let client = KeyExchange::accept(&offer).expect("accept");
        let client_public = client.public_value();
        let a = SessionCipher::new(&client.derive(offer.public).expect("derive")).expect("cipher");
        let b = SessionCipher::new(&server.derive(client_public).expect("derive")).expect("cipher");
        (Arc::new(a), Arc::new(b))
    }

    #[tokio::test]
    async fn test_plain_roundtrip() {
        let (a, b) = tokio::io::duplex(1024);
        let mut left = Session::new(a);
        let mut right = Session::new(b);

        let packet = Packet::new(kind::MESSAGE, json!({"content": "hi"}));
        left.send_packet(&packet).await.expect("send");
        let received = right.receive_packet(1024).await.expect("receive");
        assert_eq!(received, packet);
    }

    #[tokio::test]
    async fn test_encrypted_roundtrip() {
        let (a, b) = tokio::io::duplex(4096);
        let mut left = Session::new(a);
        let mut right = Session::new(b);
        let (ca, cb) = cipher_pair();
        left.install_cipher(ca).expect("install");
        right.install_cipher(cb).expect("install");

        let packet = Packet::new(kind::MESSAGE, json!({"content": "secret"}));
        left.send_packet(&packet).await.expect("send");
        assert_eq!(right.receive_packet(4096).await.expect("receive"), packet);
    }

    #[tokio::test]
    async fn test_cipher_installs_once() {
        let (a, _b) = tokio::io::duplex(64);
        let mut session = Session::new(a);
        let (ca, cb) = cipher_pair();
        session.install_cipher(ca).expect("first install");
        assert!(session.install_cipher(cb).is_err());
        assert!(session.is_encrypted());
    }

    #[tokio::test]
    async fn test_overflow_then_next_packet() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut raw = a;
        let mut session = Session::new(b);

        let mut oversized = vec![b'x'; 300];
        oversized.extend_from_slice(&SENTINEL);
        raw.write_all(&oversized).await.expect("write");
        raw.write_all(&Framer::encode(br#"{"type":"m.msg","data":{}}"#))
            .await
            .expect("write");

        match session.receive_packet(256).await {
            Err(Error::TransportOverflow { size, limit }) => {
                assert_eq!(limit, 256);
                assert!(size > limit);
            }
            other => panic!("expected overflow, got {:?}", other),
        }

        let packet = session.receive_packet(256).await.expect("next packet parses");
        assert_eq!(packet.kind, "m.msg");
    }

    #[tokio::test]
    async fn test_garbage_in_encrypted_session_is_crypto_error() {
        let (a, b) = tokio::io::duplex(4096);
        let mut raw = a;
        let mut session = Session::new(b);
        let (ca, _) = cipher_pair();
        session.install_cipher(ca).expect("install");

        raw.write_all(&Framer::encode(b"{\"type\":\"m.msg\"}")).await.expect("write");
        assert!(matches!(session.receive_packet(4096).await, Err(Error::Crypto(_))));
    }

    #[tokio::test]
    async fn test_eof_is_disconnect() {
        let (a, b) = tokio::io::duplex(64);
        let mut session = Session::new(b);
        drop(a);
        assert!(matches!(session.receive_packet(64).await, Err(Error::Disconnected)));
    }
}
