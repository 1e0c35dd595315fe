//! Client-side dispatcher.
//!
//! Turns typed lines into packets and received packets into console lines.
//! It holds no connection state of its own; the caller owns the writer and
//! the console.

use super::plugins::{Inbound, Outgoing, PluginOutput, PluginRegistry};
use super::render::{layout, TimeFormat};
use crate::error::Result;
use crate::protocol::{kind, FileNotice, Packet, PacketType};
use chrono::Utc;
use serde_json::json;
use tracing::debug;

/// Lines to print and packets to send after one input or packet.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Update {
    /// Console lines, in order.
    pub lines: Vec<String>,
    /// Packets for the server, in order.
    pub packets: Vec<Packet>,
}

impl From<PluginOutput> for Update {
    fn from(out: PluginOutput) -> Self {
        Self {
            lines: out.lines,
            packets: out.packets,
        }
    }
}

/// Build an outgoing chat message.
pub fn message_packet(content: &str, timestamp: f64) -> Packet {
    Packet::new(kind::MESSAGE, json!({ "content": content, "ts": timestamp }))
}

/// Routes input and received packets through the plugin registry.
pub struct ClientDispatcher {
    plugins: PluginRegistry,
    time_format: TimeFormat,
}

impl ClientDispatcher {
    /// Create a dispatcher.
    pub fn new(plugins: PluginRegistry, time_format: TimeFormat) -> Self {
        Self {
            plugins,
            time_format,
        }
    }

    /// Handle one typed line.
    pub fn handle_input(&mut self, line: &str) -> Update {
        if line.trim().is_empty() {
            return Update::default();
        }
        match self.plugins.pre_send(line) {
            Outgoing::Message(text) => Update {
                lines: Vec::new(),
                packets: vec![message_packet(&text, now())],
            },
            Outgoing::Handled(out) => out.into(),
        }
    }

    /// Handle one received packet.
    ///
    /// Fails with [`Error::Parse`](crate::Error::Parse) when the packet is
    /// not a well-formed server packet.
    pub fn handle_packet(&mut self, packet: &Packet) -> Result<Update> {
        let inbound = Inbound::from_packet(packet)?;
        let observed = self.plugins.observe(&inbound);

        let mut update = Update::default();
        match inbound.kind {
            PacketType::Message | PacketType::Join | PacketType::Leave | PacketType::Error(_) => {
                let text = self.plugins.pre_render(&inbound);
                let lines: Vec<&str> = text.split('\n').collect();
                update.lines = layout(&self.prefix(&inbound), &lines);
            }
            PacketType::Binary => match serde_json::from_value::<FileNotice>(inbound.content.clone()) {
                Ok(notice) => {
                    let hint = format!("use '/file down {}' to download", notice.id);
                    update.lines = layout(&self.prefix(&inbound), &[notice.name.as_str(), hint.as_str()]);
                }
                Err(e) => debug!(error = %e, "Malformed file notice"),
            },
            _ => {}
        }

        update.lines.extend(observed.lines);
        update.packets.extend(observed.packets);
        Ok(update)
    }

    fn prefix(&self, inbound: &Inbound) -> String {
        format!(
            "{} {}{}",
            self.time_format.format(inbound.timestamp),
            self.plugins.name_prefix(&inbound.author),
            inbound.author.name
        )
    }
}

fn now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
