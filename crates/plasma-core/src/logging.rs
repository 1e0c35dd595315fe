//! Logging helpers that keep secrets and peer payloads out of log output.
//!
//! Shared secrets, uids and uploaded blobs pass through these wrappers
//! before they reach a `tracing` field.

use std::fmt;

/// A wrapper that redacts sensitive data when displayed.
pub struct Redacted<T>(pub T);

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Redact a byte slice, showing only length.
pub struct RedactedBytes<'a>(pub &'a [u8]);

impl fmt::Display for RedactedBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} bytes]", self.0.len())
    }
}

impl fmt::Debug for RedactedBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Redact a hex string such as a uid, showing only first and last 4 characters.
pub struct RedactedHex<'a>(pub &'a str);

impl fmt::Display for RedactedHex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        if s.len() > 12 && s.is_ascii() {
            write!(f, "{}...{}", &s[..4], &s[s.len() - 4..])
        } else {
            write!(f, "[REDACTED HEX]")
        }
    }
}

impl fmt::Debug for RedactedHex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Replace control characters so peer-supplied text cannot forge log lines.
pub fn sanitize_for_log(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_control() { '\u{FFFD}' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted() {
        let secret = 437_893_890_380_859_375u64;
        assert_eq!(format!("{}", Redacted(secret)), "[REDACTED]");
        assert_eq!(format!("{:?}", Redacted(secret)), "[REDACTED]");
    }

    #[test]
    fn test_redacted_bytes() {
        let data = [1u8, 2, 3, 4, 5];
        assert_eq!(format!("{}", RedactedBytes(&data)), "[5 bytes]");
    }

    #[test]
    fn test_redacted_hex() {
        let uid = "abcdef0123456789abcdef";
        assert_eq!(format!("{}", RedactedHex(uid)), "abcd...cdef");
        assert_eq!(format!("{}", RedactedHex("abc")), "[REDACTED HEX]");
    }

    #[test]
    fn test_sanitize_for_log() {
        assert_eq!(sanitize_for_log("hi\nthere"), "hi\u{FFFD}there");
        assert_eq!(sanitize_for_log("plain text"), "plain text");
    }
}
