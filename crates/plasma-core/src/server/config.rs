//! Server configuration.
//!
//! Read once at startup from an optional JSON file:
//!
//! ```json
//! { "name": "Server", "host": "0.0.0.0", "port": 2075,
//!   "files_dir": "files", "limits": { "content": 280, "packet": 512 } }
//! ```
//!
//! Every key is optional. `limits.packet` is in kilobytes; leaving it out
//! sizes the byte ceiling from available memory.

use super::limits::{ByteCeiling, Limits};
use crate::error::{Error, Result};
use crate::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default characters per chat message.
pub const DEFAULT_CONTENT_LIMIT: usize = 280;

/// Server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name shown to clients.
    pub name: String,
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Directory for uploaded files. Purged at startup.
    pub files_dir: PathBuf,
    /// Message and packet limits.
    pub limits: LimitsConfig,
}

/// `limits` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum characters per chat message.
    pub content: usize,
    /// Fixed byte ceiling in kilobytes.
    pub packet: Option<f64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "Server".into(),
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            files_dir: PathBuf::from("files"),
            limits: LimitsConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            content: DEFAULT_CONTENT_LIMIT,
            packet: None,
        }
    }
}

impl ServerConfig {
    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_json(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::Config(format!("reading {}: {}", path.display(), e))),
        }
    }

    /// Parse from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make the server unusable.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("server name is empty".into()));
        }
        if self.limits.content == 0 {
            return Err(Error::Config("content limit must be at least 1".into()));
        }
        Ok(())
    }

    /// Resolve the configured limits.
    pub fn limits(&self) -> Result<Limits> {
        Ok(Limits {
            content: self.limits.content,
            packet: ByteCeiling::from_kilobytes(self.limits.packet)?,
        })
    }

    /// `host:port` to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
