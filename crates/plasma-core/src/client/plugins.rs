//! Client plugin hooks and the statically compiled registry.
//!
//! Plugins see every outgoing line before it is sent (`on_send`), every
//! received packet (`on_packet`), can rewrite displayed text (`on_receive`)
//! and answer slash commands addressed to their id (`/{id} args...`).

use crate::error::{Error, Result};
use crate::protocol::{GuildSnapshot, Packet, PacketType, PeerSummary, ServerData};
use serde_json::Value;
use std::collections::BTreeSet;

/// Id of the built-in plugin manager command.
pub const MANAGER_ID: &str = "plugins";

const MANAGER_NAME: &str = "Plasma Plugin Manager";
const BUILTIN_AUTHOR: &str = "Plasma";

/// A server-originated packet, decoded for the hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    /// Classified type.
    pub kind: PacketType,
    /// Sender, or the system author.
    pub author: PeerSummary,
    /// Message text or structured content.
    pub content: Value,
    /// Unix seconds.
    pub timestamp: f64,
    /// Server snapshot, when attached.
    pub guild: Option<GuildSnapshot>,
}

impl Inbound {
    /// Decode a received packet.
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        let kind = packet.packet_type()?;
        let data: ServerData = packet.data_as()?;
        Ok(Self {
            kind,
            author: data.author,
            content: data.content,
            timestamp: data.timestamp,
            guild: packet.guild.clone(),
        })
    }

    /// Content as display text.
    pub fn text(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// What to do with an outgoing line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendAction {
    /// Send unchanged.
    Keep,
    /// Send this text instead.
    Rewrite(String),
    /// Send nothing.
    Suppress,
}

/// Lines to show and packets to send, produced by a hook.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PluginOutput {
    /// Lines for the console.
    pub lines: Vec<String>,
    /// Packets for the server.
    pub packets: Vec<Packet>,
}

impl PluginOutput {
    /// Add a console line.
    pub fn line(&mut self, text: impl Into<String>) {
        self.lines.push(text.into());
    }

    /// Queue a packet.
    pub fn send(&mut self, packet: Packet) {
        self.packets.push(packet);
    }

    /// Whether nothing was produced.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.packets.is_empty()
    }
}

/// Result of running an outgoing line through the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// Send this text as a chat message.
    Message(String),
    /// Consumed locally.
    Handled(PluginOutput),
}

/// A client extension.
pub trait Plugin: Send {
    /// Command id, used as `/{id}`.
    fn id(&self) -> &str;

    /// Display name.
    fn name(&self) -> &str;

    /// Author shown by `/plugins list`.
    fn author(&self) -> &str {
        "Unknown"
    }

    /// Inspect or rewrite an outgoing chat line.
    fn on_send(&mut self, _text: &str) -> SendAction {
        SendAction::Keep
    }

    /// Replace the displayed text of a received message.
    fn on_receive(&mut self, _inbound: &Inbound) -> Option<String> {
        None
    }

    /// Observe every received packet.
    fn on_packet(&mut self, _inbound: &Inbound, _out: &mut PluginOutput) {}

    /// Run `/{id} command args...`. Returns `false` for unknown commands.
    fn on_command(&mut self, _command: &str, _args: &[String], _out: &mut PluginOutput) -> bool {
        false
    }

    /// Prefix for an author's display name.
    fn name_prefix(&self, _author: &PeerSummary) -> Option<String> {
        None
    }
}

/// Split command arguments on spaces, keeping double-quoted runs together.
///
/// Empty and whitespace-only arguments are dropped.
pub fn split_args(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in input.chars() {
        match c {
            '"' if quoted => {
                args.push(std::mem::take(&mut current));
                quoted = false;
            }
            '"' => quoted = true,
            ' ' if !quoted => args.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    args.push(current);
    args.retain(|arg| !arg.trim().is_empty());
    args
}

/// Registered plugins, in registration order.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. Ids must be unique and `plugins` is reserved.
    pub fn register(&mut self, plugin: Box<dyn Plugin>) -> Result<()> {
        let id = plugin.id();
        if id == MANAGER_ID || self.get(id).is_some() {
            return Err(Error::InvalidInput(format!(
                "plugin {} is already registered",
                id
            )));
        }
        self.plugins.push(plugin);
        Ok(())
    }

    /// Find a plugin by id.
    pub fn get(&self, id: &str) -> Option<&dyn Plugin> {
        self.plugins
            .iter()
            .find(|plugin| plugin.id() == id)
            .map(|plugin| plugin.as_ref())
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Box<dyn Plugin>> {
        self.plugins.iter_mut().find(|plugin| plugin.id() == id)
    }

    /// Number of registered plugins, not counting the manager.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether no plugins are registered.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run a typed line through commands and `on_send` hooks.
    ///
    /// `/{id}` lines for a registered id are consumed; any other `/` line is
    /// sent as typed.
    pub fn pre_send(&mut self, line: &str) -> Outgoing {
        if let Some(command) = line.strip_prefix('/') {
            let (id, rest) = command.split_once(' ').unwrap_or((command, ""));
            let args = split_args(rest);

            if id == MANAGER_ID {
                return Outgoing::Handled(self.manager_command(&args));
            }
            return match self.get_mut(id) {
                Some(plugin) => Outgoing::Handled(fire(plugin.as_mut(), &args)),
                None => Outgoing::Message(line.to_string()),
            };
        }

        let mut text = line.to_string();
        for plugin in &mut self.plugins {
            match plugin.on_send(&text) {
                SendAction::Keep => {}
                SendAction::Rewrite(new) => text = new,
                SendAction::Suppress => return Outgoing::Handled(PluginOutput::default()),
            }
        }
        Outgoing::Message(text)
    }

    /// Display text for a received message. The last plugin to answer wins.
    pub fn pre_render(&mut self, inbound: &Inbound) -> String {
        let mut text = inbound.text();
        for plugin in &mut self.plugins {
            if let Some(new) = plugin.on_receive(inbound) {
                text = new;
            }
        }
        text
    }

    /// Let every plugin observe a received packet.
    pub fn observe(&mut self, inbound: &Inbound) -> PluginOutput {
        let mut out = PluginOutput::default();
        for plugin in &mut self.plugins {
            plugin.on_packet(inbound, &mut out);
        }
        out
    }

    /// Name prefix from the first plugin that provides one.
    pub fn name_prefix(&self, author: &PeerSummary) -> String {
        self.plugins
            .iter()
            .find_map(|plugin| plugin.name_prefix(author))
            .unwrap_or_default()
    }

    fn entries(&self) -> Vec<(&str, &str)> {
        std::iter::once((MANAGER_NAME, BUILTIN_AUTHOR))
            .chain(self.plugins.iter().map(|p| (p.name(), p.author())))
            .collect()
    }

    fn manager_command(&self, args: &[String]) -> PluginOutput {
        let mut out = PluginOutput::default();
        let Some((command, rest)) = args.split_first() else {
            out.line("No command specified.");
            return out;
        };

        match command.as_str() {
            "help" => {
                out.line("Plasma Plugin Manager");
                out.line("  help                  | Shows this message");
                out.line("  list                  | Lists all plugins");
                out.line("  list names            | Lists all plugin names");
                out.line("  list authors          | Lists all plugin authors");
                out.line("  list author <author>  | Lists all plugins by an author");
            }
            "list" => self.list(rest, &mut out),
            other => out.line(format!("Unknown command: '{}'.", other)),
        }
        out
    }

    fn list(&self, args: &[String], out: &mut PluginOutput) {
        let entries = self.entries();
        match args.first().map(String::as_str) {
            None => {
                let mut authors: Vec<&str> = Vec::new();
                for (_, author) in &entries {
                    if !authors.contains(author) {
                        authors.push(author);
                    }
                }
                for author in authors {
                    out.line(format!("{}:", author));
                    for (name, _) in entries.iter().filter(|(_, a)| *a == author) {
                        out.line(format!("  - {}", name));
                    }
                }
            }
            Some("names") => {
                let names: BTreeSet<&str> = entries.iter().map(|(name, _)| *name).collect();
                out.line("Listing plugins (by name):");
                out.line(names.into_iter().collect::<Vec<_>>().join(", "));
            }
            Some("authors") => {
                let authors: BTreeSet<&str> = entries
                    .iter()
                    .map(|(_, author)| *author)
                    .filter(|author| *author != "Unknown")
                    .collect();
                out.line("Listing plugin authors (by name):");
                out.line(authors.into_iter().collect::<Vec<_>>().join(", "));
            }
            Some("author") => {
                let Some(wanted) = args.get(1) else {
                    out.line("No author provided to lookup.");
                    return;
                };
                let wanted = wanted.to_lowercase();
                let names: Vec<&str> = entries
                    .iter()
                    .filter(|(_, author)| author.to_lowercase() == wanted)
                    .map(|(name, _)| *name)
                    .collect();
                out.line(format!("Listing plugins (made by {}):", wanted));
                out.line(names.join(", "));
            }
            Some(other) => out.line(format!("Plugin List: no known option '{}'", other)),
        }
    }
}

fn fire(plugin: &mut dyn Plugin, args: &[String]) -> PluginOutput {
    let mut out = PluginOutput::default();
    match args.split_first() {
        None => out.line("No command specified."),
        Some((command, rest)) => {
            if !plugin.on_command(command, rest, &mut out) {
                out.line(format!("Unknown command: '{}'.", command));
            }
        }
    }
    out
}

/// Replaces `:shortcode:` aliases with emoji in outgoing messages.
#[derive(Debug, Default)]
pub struct EmojiShortcodes;

const EMOJI: &[(&str, &str)] = &[
    ("+1", "👍"),
    ("-1", "👎"),
    ("100", "💯"),
    ("angry", "😠"),
    ("blush", "😊"),
    ("broken_heart", "💔"),
    ("clap", "👏"),
    ("cry", "😢"),
    ("eyes", "👀"),
    ("fire", "🔥"),
    ("grin", "😁"),
    ("heart", "❤️"),
    ("joy", "😂"),
    ("laughing", "😆"),
    ("ok_hand", "👌"),
    ("pensive", "😔"),
    ("pray", "🙏"),
    ("rocket", "🚀"),
    ("shrug", "🤷"),
    ("skull", "💀"),
    ("slightly_smiling_face", "🙂"),
    ("smile", "😄"),
    ("sob", "😭"),
    ("sparkles", "✨"),
    ("star", "⭐"),
    ("sunglasses", "😎"),
    ("tada", "🎉"),
    ("thinking", "🤔"),
    ("thumbsdown", "👎"),
    ("thumbsup", "👍"),
    ("wave", "👋"),
    ("wink", "😉"),
    ("x", "❌"),
    ("white_check_mark", "✅"),
];

fn is_alias_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '+' | '&' | '.' | '!' | '#' | '*' | '?' | ',')
}

impl EmojiShortcodes {
    /// Look up one alias, without colons.
    pub fn lookup(alias: &str) -> Option<&'static str> {
        EMOJI
            .iter()
            .find(|(name, _)| *name == alias)
            .map(|(_, emoji)| *emoji)
    }

    /// Replace every known `:alias:` in `text`; unknown aliases are kept.
    pub fn substitute(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find(':') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let alias_len = after
                .char_indices()
                .find(|(_, c)| !is_alias_char(*c))
                .map(|(i, _)| i)
                .unwrap_or(after.len());

            if alias_len > 0 && after[alias_len..].starts_with(':') {
                if let Some(emoji) = Self::lookup(&after[..alias_len]) {
                    out.push_str(emoji);
                    rest = &after[alias_len + 1..];
                    continue;
                }
            }
            out.push(':');
            rest = after;
        }
        out.push_str(rest);
        out
    }
}

impl Plugin for EmojiShortcodes {
    fn id(&self) -> &str {
        "emoji"
    }

    fn name(&self) -> &str {
        "Plasma Emoji"
    }

    fn author(&self) -> &str {
        BUILTIN_AUTHOR
    }

    fn on_send(&mut self, text: &str) -> SendAction {
        let replaced = Self::substitute(text);
        if replaced == text {
            SendAction::Keep
        } else {
            SendAction::Rewrite(replaced)
        }
    }

    fn on_command(&mut self, command: &str, args: &[String], out: &mut PluginOutput) -> bool {
        match command {
            "help" => {
                out.line("Plasma Emoji");
                out.line("Commands:");
                out.line("  list");
                out.line("  show <alias>");
            }
            "list" => {
                let names: Vec<&str> = EMOJI.iter().map(|(name, _)| *name).collect();
                out.line(names.join(", "));
            }
            "show" => match args.first() {
                Some(alias) => match Self::lookup(alias.trim_matches(':')) {
                    Some(emoji) => out.line(format!(":{}: {}", alias.trim_matches(':'), emoji)),
                    None => out.line(format!("Unknown emoji: '{}'.", alias)),
                },
                None => out.line("No emoji alias provided."),
            },
            _ => return false,
        }
        true
    }
}
