//! Wire protocol for Plasma.
//!
//! JSON packets framed by a fixed sentinel and, once the handshake is done,
//! encrypted record by record.
//!
//! ## Record Structure
//!
//! ```text
//! ┌──────────────────────────────────────┬──────────────────┐
//! │  JSON packet, or base64(nonce‖ct‖tag) │  00 78 35 35     │
//! │             (variable)                │  (sentinel)      │
//! └──────────────────────────────────────┴──────────────────┘
//! ```
//!
//! The first record in each direction is the `s.handshake` exchange and is
//! always plain JSON.

mod framer;
mod packet;
mod types;

pub use framer::{FrameDecoder, Framer, SENTINEL};
pub use packet::Packet;
pub use types::{
    ErrorKind, FileContent, FileNotice, GuildSnapshot, HandshakeOffer, HandshakeReply,
    PacketType, PeerSummary, ServerData,
};

/// Type strings used on the wire.
pub mod kind {
    /// Key exchange.
    pub const HANDSHAKE: &str = "s.handshake";
    /// Authenticate under a name.
    pub const CONNECT: &str = "u.connect";
    /// Join notice.
    pub const JOIN: &str = "u.join";
    /// Leave request or notice.
    pub const LEAVE: &str = "u.leave";
    /// Chat message.
    pub const MESSAGE: &str = "m.msg";
    /// File upload or notice.
    pub const BINARY: &str = "m.bin";
    /// Download request.
    pub const DOWNLOAD: &str = "d.down";
    /// Download response.
    pub const DOWNLOAD_CONTENT: &str = "d.content";
    /// Unknown download id.
    pub const DOWNLOAD_INVALID_ID: &str = "d.invalid_id";
    /// Malformed request.
    pub const ERR_PARSE: &str = "e.parse";
    /// Required field missing.
    pub const ERR_MISSING: &str = "e.missing";
    /// Byte ceiling or content limit exceeded.
    pub const ERR_OVERFLOW: &str = "e.overflow";
    /// Invalid field value.
    pub const ERR_INVALID: &str = "e.invalid";
    /// Name already in use.
    pub const ERR_TAKEN: &str = "e.taken";
    /// Request not valid in the current state.
    pub const ERR_UNEXPECTED: &str = "e.unexpected";
    /// Internal server failure.
    pub const ERR_SERVER: &str = "e.server";
    /// Decryption failure.
    pub const ERR_SSL: &str = "e.ssl";
}
