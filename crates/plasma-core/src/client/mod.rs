//! Plasma chat client.
//!
//! ```text
//! connect ─▶ Session ─▶ Handshake ─▶ u.connect ─▶ split
//!                                                  │
//!                     receiver task ◀── reader ────┤
//!                          │ ClientEvent            │ writer
//!                          ▼                        ▼
//!                    ClientDispatcher ──packets──▶ send
//! ```
//!
//! The receiver task only decodes; one owner holds the dispatcher and the
//! writer, so plugin state is never shared across tasks.

mod config;
mod dispatch;
mod file_manager;
mod plugins;
mod render;

pub use config::{parse_address, ClientConfig};
pub use dispatch::{message_packet, ClientDispatcher, Update};
pub use file_manager::{estimated_frame_len, FileManager};
pub use plugins::{
    split_args, EmojiShortcodes, Inbound, Outgoing, Plugin, PluginOutput, PluginRegistry,
    SendAction, MANAGER_ID,
};
pub use render::{format_size, layout, TimeFormat};

use crate::error::{Error, Result};
use crate::handshake::Handshake;
use crate::protocol::{kind, Packet};
use crate::session::{Session, SessionReader};
use serde_json::json;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to wait for the TCP connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Byte ceiling for frames received from the server (256 MiB).
///
/// The server bounds what it relays by its own packet limit.
pub const CLIENT_FRAME_LIMIT: usize = 256 * 1024 * 1024;

/// Something the receiver task observed.
#[derive(Debug)]
pub enum ClientEvent {
    /// A decoded packet.
    Packet(Packet),
    /// The connection ended, with the error if it failed.
    Closed(Option<Error>),
}

/// Registry with the built-in plugins.
pub fn default_plugins(workdir: impl Into<PathBuf>) -> Result<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    registry.register(Box::new(FileManager::new(workdir)))?;
    registry.register(Box::new(EmojiShortcodes))?;
    Ok(registry)
}

/// Open a TCP connection within [`CONNECT_TIMEOUT`].
pub async fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
        .await
        .map_err(|_| {
            Error::Transport(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connecting to {}:{} timed out", host, port),
            ))
        })??;
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }
    Ok(stream)
}

/// Run the client handshake and identify as `name`.
pub async fn establish(session: &mut Session, handshake: &Handshake, name: &str) -> Result<()> {
    handshake.as_client(session).await?;
    session.send_packet(&connect_packet(name)).await
}

/// `u.connect` for `name`.
pub fn connect_packet(name: &str) -> Packet {
    Packet::new(kind::CONNECT, json!({ "name": name }))
}

/// `u.leave`.
pub fn leave_packet() -> Packet {
    Packet::bare(kind::LEAVE)
}

/// Decode packets on a task and forward them as [`ClientEvent`]s.
///
/// Malformed or oversized frames are skipped. A decryption failure ends
/// the connection, since the server never sends anything we cannot read.
pub fn spawn_receiver(mut reader: SessionReader, events: mpsc::Sender<ClientEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match reader.receive_packet(CLIENT_FRAME_LIMIT).await {
                Ok(packet) => {
                    if events.send(ClientEvent::Packet(packet)).await.is_err() {
                        return;
                    }
                }
                Err(Error::Parse(detail)) => debug!(detail = %detail, "Skipped malformed packet"),
                Err(Error::TransportOverflow { size, limit }) => {
                    warn!(size, limit, "Skipped oversized packet")
                }
                Err(Error::Disconnected) => {
                    let _ = events.send(ClientEvent::Closed(None)).await;
                    return;
                }
                Err(e) => {
                    let _ = events.send(ClientEvent::Closed(Some(e))).await;
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Framer;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_receiver_skips_malformed_frames() {
        let (ours, mut theirs) = tokio::io::duplex(4096);
        let (reader, _writer) = Session::new(ours).split();
        let (tx, mut rx) = mpsc::channel(8);
        let task = spawn_receiver(reader, tx);

        theirs.write_all(&Framer::encode(b"not json")).await.expect("write");
        let good = leave_packet().to_bytes().expect("encode");
        theirs.write_all(&Framer::encode(&good)).await.expect("write");
        drop(theirs);

        match rx.recv().await {
            Some(ClientEvent::Packet(packet)) => assert_eq!(packet.kind, "u.leave"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(rx.recv().await, Some(ClientEvent::Closed(None))));
        task.await.expect("join");
    }

    #[test]
    fn test_default_plugins() {
        let registry = default_plugins(".").expect("registry");
        assert!(registry.get("file").is_some());
        assert!(registry.get("emoji").is_some());
    }

    #[test]
    fn test_connect_packet() {
        let packet = connect_packet("alice");
        assert_eq!(packet.kind, "u.connect");
        assert_eq!(packet.text_field("name").as_deref(), Some("alice"));
    }
}
