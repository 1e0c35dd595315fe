//! # Plasma Core Library
//!
//! Protocol engine for a small text-chat system: one server, many clients,
//! JSON packets over a sentinel-framed TCP stream that is encrypted after a
//! per-connection key exchange.
//!
//! ## Security Model
//!
//! The key exchange authenticates nobody. It keeps passive observers from
//! reading traffic; it does not protect against a malicious server or an
//! active man in the middle.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        server        │      client      │
//! ├─────────────────────────────────────────┤
//! │       session       │     handshake     │
//! ├─────────────────────────────────────────┤
//! │           protocol (wire)               │
//! ├─────────────────────────────────────────┤
//! │                 crypto                  │
//! └─────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod client;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod session;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Port servers listen on and clients dial when none is given.
pub const DEFAULT_PORT: u16 = 2075;

/// Byte ceiling used when available memory cannot be determined (1 MiB).
pub const FALLBACK_PACKET_LIMIT: usize = 1_048_576;
