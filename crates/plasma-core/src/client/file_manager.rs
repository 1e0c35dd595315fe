//! `/file` plugin: upload, download and the local work directory.

use super::plugins::{Inbound, Plugin, PluginOutput};
use super::render::format_size;
use crate::crypto::{NONCE_SIZE, TAG_SIZE};
use crate::protocol::{kind, FileContent, FileNotice, Packet, PacketType};
use crate::server::FILE_ID_LEN;
use serde_json::json;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Size of the encrypted frame carrying `payload_len` plaintext bytes.
pub fn estimated_frame_len(payload_len: usize) -> usize {
    (payload_len + NONCE_SIZE + TAG_SIZE).div_ceil(3) * 4
}

/// Tracks known file ids and the server's packet limit, and writes downloads.
#[derive(Debug)]
pub struct FileManager {
    workdir: PathBuf,
    packet_limit: Option<usize>,
    awaiting: bool,
    known: HashMap<String, String>,
}

impl FileManager {
    /// Create a manager rooted at `workdir`.
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            packet_limit: None,
            awaiting: false,
            known: HashMap::new(),
        }
    }

    /// Directory uploads are read from and downloads written to.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Last packet limit the server advertised.
    pub fn packet_limit(&self) -> Option<usize> {
        self.packet_limit
    }

    /// Name recorded for a file id.
    pub fn known_name(&self, id: &str) -> Option<&str> {
        self.known.get(id).map(String::as_str)
    }

    /// Whether a download request is outstanding.
    pub fn is_awaiting(&self) -> bool {
        self.awaiting
    }

    fn help(&self, out: &mut PluginOutput) {
        out.line("Plasma File Manager");
        out.line("Commands:");
        for command in ["up <file>", "down <id>", "workdir [dir]"] {
            out.line(format!("  {}", command));
        }
    }

    fn set_workdir(&mut self, args: &[String], out: &mut PluginOutput) {
        let Some(dir) = args.first() else {
            out.line("Current working directory:");
            out.line(self.workdir.display().to_string());
            return;
        };
        let dir = Path::new(dir);
        if !dir.is_dir() {
            out.line("Invalid directory specified.");
            return;
        }
        self.workdir = dir.to_path_buf();
        out.line("Working dir changed.");
    }

    fn upload(&self, args: &[String], out: &mut PluginOutput) {
        let Some(file) = args.first() else {
            out.line("No filename specified to upload.");
            return;
        };
        let Some(limit) = self.packet_limit else {
            out.line("No packet size is known, wait until a message is received.");
            return;
        };

        let path = self.workdir.join(file);
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if path.is_file() => name.to_string(),
            _ => {
                out.line("No such file exists.");
                return;
            }
        };
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                out.line(format!("Failed to read '{}': {}", name, e));
                return;
            }
        };

        let packet = Packet::new(
            kind::BINARY,
            json!({ "content": hex::encode(&bytes), "name": name }),
        );
        let payload_len = match packet.to_bytes() {
            Ok(payload) => payload.len(),
            Err(e) => {
                out.line(format!("Failed to encode '{}': {}", name, e));
                return;
            }
        };
        if estimated_frame_len(payload_len) > limit {
            out.line(format!("File too large, packet limit: {}", format_size(limit)));
            return;
        }

        debug!(file = %name, size = bytes.len(), "Uploading file");
        out.line(format!("Uploading '{}' ({})...", name, format_size(bytes.len())));
        out.send(packet);
    }

    fn download(&mut self, args: &[String], out: &mut PluginOutput) {
        let Some(id) = args.first() else {
            out.line("No file ID provided to download.");
            return;
        };
        if id.chars().count() != FILE_ID_LEN {
            out.line("Invalid file ID.");
            return;
        }
        if let Some(name) = self.known.get(id.as_str()) {
            if self.workdir.join(name).is_file() {
                out.line(format!("'{}' already exists locally.", name));
                return;
            }
        }

        out.send(Packet::new(kind::DOWNLOAD, json!({ "id": id })));
        self.awaiting = true;
    }

    fn save(&self, inbound: &Inbound, out: &mut PluginOutput) {
        let file: FileContent = match serde_json::from_value(inbound.content.clone()) {
            Ok(file) => file,
            Err(e) => {
                debug!(error = %e, "Malformed download response");
                out.line("Received a malformed file.");
                return;
            }
        };

        let Some(name) = Path::new(&file.name)
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
        else {
            out.line("Received file has an invalid name.");
            return;
        };
        let bytes = match hex::decode(&file.data) {
            Ok(bytes) => bytes,
            Err(_) => {
                out.line(format!("'{}' could not be decoded.", name));
                return;
            }
        };

        let path = self.workdir.join(&name);
        let written = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .and_then(|mut f| f.write_all(&bytes));
        match written {
            Ok(()) => out.line(format!("'{}' downloaded successfully!", name)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                out.line(format!("'{}' already exists locally.", name))
            }
            Err(e) => out.line(format!("Failed to save '{}': {}", name, e)),
        }
    }
}

impl Plugin for FileManager {
    fn id(&self) -> &str {
        "file"
    }

    fn name(&self) -> &str {
        "Plasma File Manager"
    }

    fn author(&self) -> &str {
        "Plasma"
    }

    fn on_packet(&mut self, inbound: &Inbound, out: &mut PluginOutput) {
        if let Some(guild) = &inbound.guild {
            self.packet_limit = Some(guild.packet_limit);
        }

        match inbound.kind {
            PacketType::Binary => {
                if let Ok(notice) = serde_json::from_value::<FileNotice>(inbound.content.clone()) {
                    self.known.insert(notice.id, notice.name);
                }
            }
            PacketType::Content | PacketType::InvalidId if self.awaiting => {
                self.awaiting = false;
                if inbound.kind == PacketType::InvalidId {
                    out.line("No file has that ID.");
                } else {
                    self.save(inbound, out);
                }
            }
            _ => {}
        }
    }

    fn on_command(&mut self, command: &str, args: &[String], out: &mut PluginOutput) -> bool {
        match command {
            "help" => self.help(out),
            "up" => self.upload(args, out),
            "down" => self.download(args, out),
            "workdir" => self.set_workdir(args, out),
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{GuildSnapshot, PeerSummary};
    use serde_json::Value;

    fn inbound(kind: PacketType, content: Value, packet_limit: usize) -> Inbound {
        Inbound {
            kind,
            author: PeerSummary::system(),
            content,
            timestamp: 0.0,
            guild: Some(GuildSnapshot {
                name: "Server".into(),
                users: vec![],
                packet_limit,
            }),
        }
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn run(manager: &mut FileManager, command: &str, list: &[&str]) -> PluginOutput {
        let mut out = PluginOutput::default();
        assert!(manager.on_command(command, &args(list), &mut out));
        out
    }

    #[test]
    fn test_frame_estimate() {
        assert_eq!(estimated_frame_len(2), 40);
        assert!(estimated_frame_len(1000) > 1000);
    }

    #[test]
    fn test_upload_requires_known_limit() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), b"hi").expect("write");
        let mut manager = FileManager::new(dir.path());

        let out = run(&mut manager, "up", &["a.txt"]);
        assert!(out.packets.is_empty());
        assert!(out.lines[0].starts_with("No packet size is known"));
    }

    #[test]
    fn test_upload_builds_packet() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), b"hi").expect("write");
        let mut manager = FileManager::new(dir.path());
        manager.on_packet(&inbound(PacketType::Message, json!("x"), 1_000_000), &mut PluginOutput::default());

        let out = run(&mut manager, "up", &["a.txt"]);
        assert_eq!(out.packets.len(), 1);
        assert_eq!(out.packets[0].kind, "m.bin");
        assert_eq!(out.packets[0].text_field("content").as_deref(), Some("6869"));
        assert_eq!(out.packets[0].text_field("name").as_deref(), Some("a.txt"));

        let missing = run(&mut manager, "up", &["nope.txt"]);
        assert_eq!(missing.lines, vec!["No such file exists."]);
    }

    #[test]
    fn test_upload_rejects_oversized_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("big.bin"), vec![7u8; 100]).expect("write");
        let mut manager = FileManager::new(dir.path());
        manager.on_packet(&inbound(PacketType::Message, json!("x"), 150), &mut PluginOutput::default());

        let out = run(&mut manager, "up", &["big.bin"]);
        assert!(out.packets.is_empty());
        assert_eq!(out.lines, vec!["File too large, packet limit: 150.0B"]);
    }

    #[test]
    fn test_download_flow() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut manager = FileManager::new(dir.path());
        let mut sink = PluginOutput::default();
        manager.on_packet(
            &inbound(PacketType::Binary, json!({"name": "notes.txt", "id": "abcd1234"}), 4096),
            &mut sink,
        );
        assert_eq!(manager.known_name("abcd1234"), Some("notes.txt"));

        assert_eq!(run(&mut manager, "down", &["short"]).lines, vec!["Invalid file ID."]);

        let out = run(&mut manager, "down", &["abcd1234"]);
        assert_eq!(out.packets[0].kind, "d.down");
        assert!(manager.is_awaiting());

        let mut out = PluginOutput::default();
        let content = json!({"name": "../notes.txt", "data": hex::encode(b"hello")});
        manager.on_packet(&inbound(PacketType::Content, content, 4096), &mut out);
        assert_eq!(out.lines, vec!["'notes.txt' downloaded successfully!"]);
        assert!(!manager.is_awaiting());
        assert_eq!(std::fs::read(dir.path().join("notes.txt")).expect("read"), b"hello");

        // Now present locally.
        let again = run(&mut manager, "down", &["abcd1234"]);
        assert!(again.packets.is_empty());
        assert_eq!(again.lines, vec!["'notes.txt' already exists locally."]);
    }

    #[test]
    fn test_download_never_overwrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("keep.txt"), b"original").expect("write");
        let mut manager = FileManager::new(dir.path());
        run(&mut manager, "down", &["zzzz9999"]);

        let mut out = PluginOutput::default();
        let content = json!({"name": "keep.txt", "data": hex::encode(b"replaced")});
        manager.on_packet(&inbound(PacketType::Content, content, 4096), &mut out);

        assert_eq!(out.lines, vec!["'keep.txt' already exists locally."]);
        assert_eq!(std::fs::read(dir.path().join("keep.txt")).expect("read"), b"original");
    }

    #[test]
    fn test_unrequested_responses_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut manager = FileManager::new(dir.path());

        let mut out = PluginOutput::default();
        manager.on_packet(&inbound(PacketType::InvalidId, json!("File ID is invalid."), 4096), &mut out);
        assert!(out.is_empty());

        run(&mut manager, "down", &["abcd1234"]);
        manager.on_packet(&inbound(PacketType::InvalidId, json!("File ID is invalid."), 4096), &mut out);
        assert_eq!(out.lines, vec!["No file has that ID."]);
    }

    #[test]
    fn test_workdir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut manager = FileManager::new(".");

        let bad = run(&mut manager, "workdir", &["/definitely/not/here"]);
        assert_eq!(bad.lines, vec!["Invalid directory specified."]);

        let path = dir.path().to_string_lossy().to_string();
        let ok = run(&mut manager, "workdir", &[path.as_str()]);
        assert_eq!(ok.lines, vec!["Working dir changed."]);
        assert_eq!(manager.workdir(), dir.path());
    }
}
