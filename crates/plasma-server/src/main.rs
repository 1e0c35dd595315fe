//! Plasma Chat Server
//!
//! Accepts clients, runs the key exchange on every connection and relays
//! messages and file notices to everyone connected.

use anyhow::{Context, Result};
use clap::Parser;
use plasma_core::server::{ChatServer, ServerConfig};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Plasma - Encrypted text chat server
#[derive(Parser, Debug)]
#[command(name = "plasma-server")]
#[command(author, version, about)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Listen host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server name shown to clients (overrides config)
    #[arg(short, long)]
    name: Option<String>,

    /// Maximum characters per message (overrides config)
    #[arg(long)]
    content_limit: Option<usize>,

    /// Fixed packet limit in KB instead of sizing by available memory
    #[arg(long)]
    packet_limit_kb: Option<f64>,

    /// Upload directory, purged at startup (overrides config)
    #[arg(long)]
    files_dir: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Load the config file and apply command-line overrides.
    fn resolve(&self) -> Result<ServerConfig> {
        let path = PathBuf::from(shellexpand::tilde(&self.config).to_string());
        let mut config = ServerConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(content) = self.content_limit {
            config.limits.content = content;
        }
        if let Some(kb) = self.packet_limit_kb {
            config.limits.packet = Some(kb);
        }
        if let Some(dir) = &self.files_dir {
            config.files_dir = PathBuf::from(dir);
        }
        config.files_dir = PathBuf::from(shellexpand::tilde(&config.files_dir.to_string_lossy()).to_string());

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = args.resolve()?;
    let server = ChatServer::new(&config)
        .await
        .context("Failed to initialize server")?;

    let address = config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;

    tracing::info!(
        address = %address,
        name = %config.name,
        content_limit = config.limits.content,
        files = %config.files_dir.display(),
        "Plasma server started"
    );

    tokio::select! {
        result = server.serve(listener) => {
            result.context("Server stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
            server.shutdown().await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"name": "From File", "port": 4000}"#).expect("write");
        let config_arg = path.to_string_lossy().to_string();

        let args = Args::parse_from([
            "plasma-server",
            "--config",
            config_arg.as_str(),
            "--port",
            "5000",
            "--content-limit",
            "100",
        ]);
        let config = args.resolve().expect("resolve");

        assert_eq!(config.name, "From File");
        assert_eq!(config.port, 5000);
        assert_eq!(config.limits.content, 100);
        assert_eq!(config.bind_address(), "0.0.0.0:5000");
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_arg = dir.path().join("absent.json").to_string_lossy().to_string();

        let args = Args::parse_from(["plasma-server", "-c", config_arg.as_str()]);
        let config = args.resolve().expect("resolve");

        assert_eq!(config.name, "Server");
        assert_eq!(config.bind_address(), "0.0.0.0:2075");
        assert_eq!(config.limits.packet, None);
    }

    #[test]
    fn test_rejects_zero_content_limit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_arg = dir.path().join("absent.json").to_string_lossy().to_string();

        let args = Args::parse_from(["plasma-server", "-c", config_arg.as_str(), "--content-limit", "0"]);
        assert!(args.resolve().is_err());
    }
}
