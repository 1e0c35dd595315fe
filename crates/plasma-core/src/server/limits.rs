//! Overflow guards.
//!
//! The byte ceiling bounds how much a session may buffer for one frame. The
//! content limit bounds the characters in one chat message. The two are
//! independent.

use crate::error::{Error, Result};
use crate::FALLBACK_PACKET_LIMIT;
use std::fmt;
use std::sync::Arc;

/// Source of the "available memory" figure used to size the byte ceiling.
pub trait MemoryProbe: Send + Sync {
    /// Available system memory in bytes, if it can be determined.
    fn available_memory(&self) -> Option<u64>;
}

/// Reads available memory from the operating system.
#[cfg(feature = "memory-probe")]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

#[cfg(feature = "memory-probe")]
impl MemoryProbe for SystemMemory {
    fn available_memory(&self) -> Option<u64> {
        let mut system = sysinfo::System::new();
        system.refresh_memory();
        match system.available_memory() {
            0 => None,
            bytes => Some(bytes),
        }
    }
}

/// Probe for platforms without memory introspection.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMemoryProbe;

impl MemoryProbe for NoMemoryProbe {
    fn available_memory(&self) -> Option<u64> {
        None
    }
}

/// Probe used when nothing else is configured.
pub fn default_probe() -> Arc<dyn MemoryProbe> {
    #[cfg(feature = "memory-probe")]
    {
        Arc::new(SystemMemory)
    }
    #[cfg(not(feature = "memory-probe"))]
    {
        Arc::new(NoMemoryProbe)
    }
}

/// Per-frame byte ceiling.
#[derive(Clone)]
pub enum ByteCeiling {
    /// Operator-configured value.
    Fixed(usize),
    /// `(available memory / 2) / max(1, peers)`, or 1 MiB without a probe reading.
    Dynamic(Arc<dyn MemoryProbe>),
}

impl ByteCeiling {
    /// Ceiling from a configured size in kilobytes (×1000), or dynamic if unset.
    pub fn from_kilobytes(kilobytes: Option<f64>) -> Result<Self> {
        match kilobytes {
            None => Ok(Self::Dynamic(default_probe())),
            Some(kb) if kb.is_finite() && kb > 0.0 => {
                let bytes = (kb * 1000.0) as usize;
                if bytes == 0 {
                    return Err(Error::Config(format!("packet limit of {}KB is too small", kb)));
                }
                Ok(Self::Fixed(bytes))
            }
            Some(kb) => Err(Error::Config(format!("invalid packet limit: {}KB", kb))),
        }
    }

    /// Effective ceiling for the current number of connected peers.
    pub fn resolve(&self, peers: usize) -> usize {
        match self {
            Self::Fixed(bytes) => *bytes,
            Self::Dynamic(probe) => match probe.available_memory() {
                Some(available) => {
                    let share = (available / 2) / peers.max(1) as u64;
                    usize::try_from(share).unwrap_or(usize::MAX).max(1)
                }
                None => FALLBACK_PACKET_LIMIT,
            },
        }
    }
}

impl fmt::Debug for ByteCeiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(bytes) => write!(f, "Fixed({})", bytes),
            Self::Dynamic(_) => write!(f, "Dynamic"),
        }
    }
}

/// Both limits as configured for a server.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum characters in one chat message.
    pub content: usize,
    /// Per-frame byte ceiling.
    pub packet: ByteCeiling,
}

impl Limits {
    /// Trim a chat message and check it against the content limit.
    ///
    /// Leading and trailing control characters are removed. Empty text is
    /// [`Error::MissingField`], text over the limit is
    /// [`Error::ContentOverflow`].
    pub fn check_message(&self, content: Option<&str>) -> Result<String> {
        let text = content.unwrap_or_default().trim_matches(char::is_control);
        if text.trim().is_empty() {
            return Err(Error::MissingField("Message missing.".into()));
        }
        if text.chars().count() > self.content {
            return Err(Error::ContentOverflow {
                limit: self.content,
            });
        }
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(Option<u64>);

    impl MemoryProbe for FixedProbe {
        fn available_memory(&self) -> Option<u64> {
            self.0
        }
    }

    fn limits(content: usize) -> Limits {
        Limits {
            content,
            packet: ByteCeiling::Fixed(FALLBACK_PACKET_LIMIT),
        }
    }

    #[test]
    fn test_dynamic_ceiling_divides_by_peers() {
        let ceiling = ByteCeiling::Dynamic(Arc::new(FixedProbe(Some(8_000))));
        assert_eq!(ceiling.resolve(0), 4_000);
        assert_eq!(ceiling.resolve(1), 4_000);
        assert_eq!(ceiling.resolve(4), 1_000);
    }

    #[test]
    fn test_dynamic_ceiling_fallback() {
        let ceiling = ByteCeiling::Dynamic(Arc::new(NoMemoryProbe));
        assert_eq!(ceiling.resolve(3), FALLBACK_PACKET_LIMIT);
    }

    #[test]
    fn test_configured_kilobytes() {
        let ceiling = ByteCeiling::from_kilobytes(Some(1.5)).expect("valid");
        assert_eq!(ceiling.resolve(100), 1_500);
        assert!(ByteCeiling::from_kilobytes(Some(-1.0)).is_err());
        assert!(ByteCeiling::from_kilobytes(Some(f64::NAN)).is_err());
        assert!(matches!(
            ByteCeiling::from_kilobytes(None).expect("valid"),
            ByteCeiling::Dynamic(_)
        ));
    }

    #[test]
    fn test_message_at_limit_passes_unchanged() {
        let text = "a".repeat(280);
        assert_eq!(limits(280).check_message(Some(&text)).expect("fits"), text);
    }

    #[test]
    fn test_message_over_limit() {
        let text = "a".repeat(281);
        assert!(matches!(
            limits(280).check_message(Some(&text)),
            Err(Error::ContentOverflow { limit: 280 })
        ));
    }

    #[test]
    fn test_message_limit_counts_characters() {
        let text = "é".repeat(10);
        assert!(limits(10).check_message(Some(&text)).is_ok());
    }

    #[test]
    fn test_message_trims_control_characters() {
        let trimmed = limits(280).check_message(Some("\r\x08hello\r")).expect("valid");
        assert_eq!(trimmed, "hello");
    }

    #[test]
    fn test_empty_message() {
        for input in [None, Some(""), Some("\r\x08"), Some("   ")] {
            assert!(matches!(
                limits(280).check_message(input),
                Err(Error::MissingField(_))
            ));
        }
    }
}
