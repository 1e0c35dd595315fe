//! Plasma Command-Line Client
//!
//! A line-based terminal client: type to chat, `/plugins help` and
//! `/file help` for local commands, Ctrl-C to leave.

use anyhow::{bail, Context, Result};
use clap::Parser;
use plasma_core::client::{parse_address, ClientConfig, TimeFormat};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

/// Plasma - Encrypted text chat client
#[derive(Parser, Debug)]
#[command(name = "plasma")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server address, `host[:port]` (defaults to the config's autoconnect)
    address: Option<String>,

    /// Display name (defaults to the config's username)
    #[arg(short, long)]
    name: Option<String>,

    /// Config file path
    #[arg(short, long, default_value = "~/.plasma/config.json")]
    config: String,

    /// Timestamp format: 12, 24, utc12 or utc24
    #[arg(short, long)]
    time_format: Option<String>,

    /// Directory for file uploads and downloads
    #[arg(short, long, default_value = ".")]
    workdir: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Everything needed to start a session.
#[derive(Debug, Clone, PartialEq)]
struct Settings {
    host: String,
    port: u16,
    name: String,
    time_format: TimeFormat,
    workdir: PathBuf,
}

impl Cli {
    /// Merge flags over the config file.
    fn settings(&self) -> Result<Settings> {
        let path = PathBuf::from(shellexpand::tilde(&self.config).to_string());
        let config = ClientConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        let Some(address) = self.address.clone().or(config.autoconnect) else {
            bail!("No server address given; pass one or set \"autoconnect\" in {}", path.display());
        };
        let (host, port) = parse_address(&address).context("Invalid server address")?;

        let Some(name) = self.name.clone().or(config.username) else {
            bail!("No username given; pass --name or set \"username\" in {}", path.display());
        };

        let time_format = self
            .time_format
            .as_deref()
            .or(config.timeformat.as_deref())
            .map(TimeFormat::parse)
            .unwrap_or_default();

        Ok(Settings {
            host,
            port,
            name,
            time_format,
            workdir: PathBuf::from(shellexpand::tilde(&self.workdir).to_string()),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let settings = cli.settings()?;
    commands::chat(
        &settings.host,
        settings.port,
        &settings.name,
        settings.time_format,
        settings.workdir,
    )
    .await
}
