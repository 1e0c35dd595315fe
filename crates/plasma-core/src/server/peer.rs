//! Per-connection state machine.
//!
//! `Unauthenticated → Authenticated → Closed`. Application errors become an
//! `e.*` reply and the loop continues; transport errors end it.

use super::roster::{PeerId, SharedWriter};
use super::ServerContext;
use crate::error::{Error, Result};
use crate::logging::{sanitize_for_log, RedactedBytes, RedactedHex};
use crate::protocol::{kind, FileContent, FileNotice, Packet, PacketType, PeerSummary};
use crate::session::SessionReader;
use crate::server::file_store::FileStore;
use chrono::Utc;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Longest accepted display name, in characters.
pub const MAX_NAME_LEN: usize = 16;

const INVALID_NAME: &str = "Invalid name or field missing.";

/// Check a requested display name.
///
/// Names are 1 to 16 characters with no whitespace, `:` or control characters.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().count() <= MAX_NAME_LEN
        && !name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == ':')
}

/// Text sent back to the peer for an application error.
fn reply_text(error: &Error) -> String {
    match error {
        Error::Parse(_) => "Invalid type/data or field(s) missing.".into(),
        Error::TransportOverflow { limit, .. } => format!("Packet limit is {} bytes!", limit),
        Error::ContentOverflow { limit } => format!("Message limit is {} char(s).", limit),
        Error::MissingField(text) | Error::InvalidInput(text) | Error::ProtocolViolation(text) => {
            text.clone()
        }
        Error::NameConflict => "A user with that name already exists.".into(),
        Error::NotFound(_) => "File ID is invalid.".into(),
        Error::Crypto(_) => "Something went wrong while decrypting your request.".into(),
        _ => "Server error has occured, try your request again later.".into(),
    }
}

/// Whether the receive loop keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Wait for the next packet.
    Continue,
    /// End the session.
    Close,
}

/// Serves one established session until it leaves or fails.
pub struct PeerHandler {
    id: PeerId,
    addr: SocketAddr,
    ctx: Arc<ServerContext>,
    reader: SessionReader,
    writer: SharedWriter,
    identity: Option<PeerSummary>,
}

impl PeerHandler {
    /// Create a handler for a peer already inserted into the roster.
    pub fn new(
        id: PeerId,
        addr: SocketAddr,
        ctx: Arc<ServerContext>,
        reader: SessionReader,
        writer: SharedWriter,
    ) -> Self {
        Self {
            id,
            addr,
            ctx,
            reader,
            writer,
            identity: None,
        }
    }

    /// Receive and dispatch until the session ends, then leave the roster.
    pub async fn run(mut self) {
        loop {
            let limit = self.ctx.packet_limit().await;
            let result = match self.reader.receive_packet(limit).await {
                Ok(packet) => self.dispatch(packet).await,
                Err(e) => Err(e),
            };

            let flow = match result {
                Ok(flow) => flow,
                Err(e) => self.handle_error(e).await,
            };
            if flow == Flow::Close {
                break;
            }
        }
        self.teardown().await;
    }

    async fn handle_error(&mut self, error: Error) -> Flow {
        match &error {
            Error::Disconnected => {
                debug!(peer = %self.addr, "Peer closed connection");
                return Flow::Close;
            }
            Error::Transport(e) => {
                debug!(peer = %self.addr, error = %e, "Transport error");
                return Flow::Close;
            }
            Error::TransportOverflow { size, limit } => {
                let excess = error.excess().unwrap_or_default();
                warn!(peer = %self.addr, size, limit, excess, "Ignored oversized packet");
            }
            Error::Crypto(_) => warn!(peer = %self.addr, "Failed to decrypt packet"),
            Error::Parse(detail) => debug!(peer = %self.addr, detail = %detail, "Malformed packet"),
            Error::Server(_) | Error::Encoding(_) => {
                warn!(peer = %self.addr, error = %error, "Request failed")
            }
            other => debug!(peer = %self.addr, error = %other, "Request rejected"),
        }

        let Some(reply_kind) = error.reply_kind() else {
            return Flow::Close;
        };
        if self.reply(reply_kind, &reply_text(&error)).await.is_err() {
            return Flow::Close;
        }
        if error.is_fatal() {
            Flow::Close
        } else {
            Flow::Continue
        }
    }

    async fn dispatch(&mut self, packet: Packet) -> Result<Flow> {
        let packet_type = packet.packet_type()?;

        if packet_type.requires_auth() && self.identity.is_none() {
            debug!(peer = %self.addr, kind = %packet.kind, "Ignored packet from unauthenticated peer");
            return Ok(Flow::Continue);
        }

        match packet_type {
            PacketType::Connect => self.handle_connect(&packet).await,
            PacketType::Leave => self.handle_leave().await,
            PacketType::Message => self.handle_message(&packet).await,
            PacketType::Binary => self.handle_upload(&packet).await,
            PacketType::Download => self.handle_download(&packet).await,
            _ => Ok(Flow::Continue),
        }
    }

    async fn handle_connect(&mut self, packet: &Packet) -> Result<Flow> {
        if self.identity.is_some() {
            return Err(Error::ProtocolViolation(
                "Client is already authenticated.".into(),
            ));
        }

        let Some(name) = packet.text_field("name").filter(|n| is_valid_name(n)) else {
            self.reply(kind::ERR_PARSE, INVALID_NAME).await?;
            return Ok(Flow::Continue);
        };

        let uid = self
            .ctx
            .uid_key
            .derive(&name, self.addr.ip())
            .map_err(|e| Error::Server(e.to_string()))?;
        let identity = PeerSummary { uid, name };
        match self.ctx.roster.authenticate(self.id, identity.clone()).await {
            Ok(()) => {}
            Err(Error::NotFound(_)) => {
                debug!(peer = %self.addr, "Peer already dropped from roster");
                return Ok(Flow::Close);
            }
            Err(e) => return Err(e),
        }

        info!(
            peer = %self.addr,
            name = %identity.name,
            uid = %RedactedHex(&identity.uid),
            "Peer authenticated"
        );

        let welcome = format!(
            "Welcome to {}! {} UTC",
            self.ctx.name,
            Utc::now().format("%H:%M")
        );
        self.reply(kind::MESSAGE, &welcome).await?;

        let notice = format!("{} has joined the server.", identity.name);
        self.identity = Some(identity);
        self.ctx
            .broadcast(kind::JOIN, PeerSummary::system(), json!(notice))
            .await?;
        Ok(Flow::Continue)
    }

    async fn handle_leave(&mut self) -> Result<Flow> {
        let name = self
            .identity
            .as_ref()
            .map(|identity| identity.name.as_str())
            .unwrap_or("A guest");
        let notice = format!("{} has left the server.", name);
        self.ctx
            .broadcast(kind::LEAVE, PeerSummary::system(), json!(notice))
            .await?;
        Ok(Flow::Close)
    }

    async fn handle_message(&mut self, packet: &Packet) -> Result<Flow> {
        let Some(author) = self.identity.clone() else {
            return Ok(Flow::Continue);
        };
        let content = packet.text_field("content");
        let text = self.ctx.limits.check_message(content.as_deref())?;

        self.ctx.broadcast(kind::MESSAGE, author, json!(text)).await?;
        Ok(Flow::Continue)
    }

    async fn handle_upload(&mut self, packet: &Packet) -> Result<Flow> {
        let Some(author) = self.identity.clone() else {
            return Ok(Flow::Continue);
        };
        let (Some(name), Some(content)) = (packet.text_field("name"), packet.text_field("content"))
        else {
            return Err(Error::MissingField("Content or filename is missing.".into()));
        };

        FileStore::validate_name(&name)?;
        let bytes = hex::decode(content.trim())
            .map_err(|_| Error::InvalidInput("File content is not valid hex.".into()))?;

        let id = self.ctx.files.store(&name, &bytes).await?;
        info!(
            peer = %self.addr,
            file = %sanitize_for_log(&name),
            id = %id,
            size = %RedactedBytes(&bytes),
            "File uploaded"
        );

        let notice = serde_json::to_value(FileNotice { name, id })?;
        self.ctx.broadcast(kind::BINARY, author, notice).await?;
        Ok(Flow::Continue)
    }

    async fn handle_download(&mut self, packet: &Packet) -> Result<Flow> {
        let Some(id) = packet.text_field("id") else {
            return Err(Error::MissingField("File ID is missing.".into()));
        };

        let (name, bytes) = self.ctx.files.load(id.trim()).await?;
        debug!(peer = %self.addr, id = %id, size = %RedactedBytes(&bytes), "File requested");

        let content = serde_json::to_value(FileContent {
            name,
            data: hex::encode(bytes),
        })?;
        let response = self
            .ctx
            .pack(kind::DOWNLOAD_CONTENT, PeerSummary::system(), content)
            .await?;
        self.send(&response).await?;
        Ok(Flow::Continue)
    }

    /// Send a System-authored text reply to this peer only.
    async fn reply(&self, reply_kind: &str, text: &str) -> Result<()> {
        let packet = self
            .ctx
            .pack(reply_kind, PeerSummary::system(), json!(text))
            .await?;
        self.send(&packet).await
    }

    async fn send(&self, packet: &Packet) -> Result<()> {
        self.writer.lock().await.send_packet(packet).await
    }

    async fn teardown(self) {
        let identity = self.ctx.roster.remove(self.id).await;
        if let Err(e) = self.writer.lock().await.close().await {
            debug!(peer = %self.addr, error = %e, "Close failed");
        }
        match identity {
            Some(identity) => info!(peer = %self.addr, name = %identity.name, "Peer disconnected"),
            None => info!(peer = %self.addr, "Peer disconnected"),
        }
    }
}
