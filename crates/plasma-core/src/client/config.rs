//! Client settings and server address parsing.

use crate::error::{Error, Result};
use crate::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings read from the client's JSON config file.
///
/// Every key is optional; command-line flags take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Display name to connect under.
    pub username: Option<String>,
    /// Server to connect to when none is given.
    pub autoconnect: Option<String>,
    /// Timestamp style: `12`, `24`, `utc12` or `utc24`.
    pub timeformat: Option<String>,
}

impl ClientConfig {
    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| Error::Config(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::Config(format!("reading {}: {}", path.display(), e))),
        }
    }
}

/// Split `host[:port]` into a host and port.
///
/// The port defaults to 2075 and an empty host means `localhost`, so `":"`
/// is the local default server.
pub fn parse_address(input: &str) -> Result<(String, u16)> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidInput("server address is empty".into()));
    }

    let (host, port) = match input.split_once(':') {
        None => (input, DEFAULT_PORT),
        Some((host, port)) => {
            if port.contains(':') {
                return Err(Error::InvalidInput(format!("invalid address: {}", input)));
            }
            let port = port.trim();
            let port = if port.is_empty() && host.is_empty() {
                DEFAULT_PORT
            } else {
                match port.parse::<u16>() {
                    Ok(port) if port >= 1 => port,
                    _ => return Err(Error::InvalidInput(format!("invalid port: {:?}", port))),
                }
            };
            (host, port)
        }
    };

    let host = match host.trim() {
        "" => "localhost",
        host => host,
    };
    Ok((host.to_string(), port))
}
