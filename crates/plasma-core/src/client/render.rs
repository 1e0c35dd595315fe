//! Text layout for received messages.

use chrono::{DateTime, Local, Utc};

/// Timestamp style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeFormat {
    /// Local time, `07:05 PM`.
    Local12,
    /// Local time, `19:05`.
    #[default]
    Local24,
    /// UTC, `07:05 PM`.
    Utc12,
    /// UTC, `19:05`.
    Utc24,
}

impl TimeFormat {
    /// Parse a config value. A trailing `h` is accepted; unknown values fall back to 24-hour local.
    pub fn parse(value: &str) -> Self {
        match value.trim().trim_end_matches('h') {
            "12" => Self::Local12,
            "utc12" => Self::Utc12,
            "utc24" => Self::Utc24,
            _ => Self::Local24,
        }
    }

    /// Format a unix timestamp.
    pub fn format(self, timestamp: f64) -> String {
        let micros = (timestamp * 1_000_000.0) as i64;
        let utc = DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or_default();
        match self {
            Self::Local12 => utc.with_timezone(&Local).format("%I:%M %p").to_string(),
            Self::Local24 => utc.with_timezone(&Local).format("%H:%M").to_string(),
            Self::Utc12 => utc.format("%I:%M %p").to_string(),
            Self::Utc24 => utc.format("%H:%M").to_string(),
        }
    }
}

/// Lay out a message as `"{prefix} | {line}"`, aligning continuation lines.
pub fn layout(prefix: &str, lines: &[&str]) -> Vec<String> {
    let indent = " ".repeat(prefix.chars().count());
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let lead = if i == 0 { prefix } else { indent.as_str() };
            format!("{} | {}", lead, line)
        })
        .collect()
}

/// Human-readable binary size, e.g. `1.5MiB`.
pub fn format_size(bytes: usize) -> String {
    let mut value = bytes as f64;
    for unit in ["", "Ki", "Mi", "Gi", "Ti"] {
        if value < 1024.0 {
            return format!("{:.1}{}B", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.1}PiB", value)
}
