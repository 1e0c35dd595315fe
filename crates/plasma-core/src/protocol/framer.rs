//! Sentinel-delimited framing.
//!
//! Every record on the wire is followed by the 4-byte sentinel
//! `00 78 35 35` (a zero byte, then `x55`). Frames are not length-prefixed:
//! a sentinel inside a payload would split it. JSON text never contains a
//! raw zero byte and encrypted records are base64, so nothing this crate
//! emits can collide with the delimiter.

use crate::error::{Error, Result};

/// Frame delimiter.
pub const SENTINEL: [u8; 4] = [0x00, b'x', b'5', b'5'];

/// Stateless encode/decode over whole buffers.
pub struct Framer;

impl Framer {
    /// Append the sentinel to a payload.
    pub fn encode(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + SENTINEL.len());
        out.extend_from_slice(payload);
        out.extend_from_slice(&SENTINEL);
        out
    }

    /// Split a buffer into complete frames and the trailing partial fragment.
    ///
    /// Empty fragments (back-to-back sentinels) are discarded.
    pub fn decode(buffer: &[u8]) -> (Vec<Vec<u8>>, Vec<u8>) {
        let mut frames = Vec::new();
        let mut start = 0;

        while let Some(offset) = find_sentinel(&buffer[start..]) {
            if offset > 0 {
                frames.push(buffer[start..start + offset].to_vec());
            }
            start += offset + SENTINEL.len();
        }

        (frames, buffer[start..].to_vec())
    }
}

fn find_sentinel(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(SENTINEL.len())
        .position(|window| window == SENTINEL)
}

/// Streaming frame accumulator for partial reads.
///
/// Enforces a byte ceiling per frame: a partial fragment that grows past
/// the ceiling is thrown away along with everything up to its sentinel, and
/// a complete frame over the ceiling is dropped. Either case reports
/// [`Error::TransportOverflow`] and the decoder stays usable.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Offset up to which the buffer is known to be sentinel-free.
    scanned: usize,
    /// Skipping the tail of an oversized frame.
    discarding: bool,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add received bytes to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to extract the next complete frame.
    ///
    /// Returns `Ok(None)` when more data is needed.
    pub fn next_frame(&mut self, limit: usize) -> Result<Option<Vec<u8>>> {
        loop {
            let Some(offset) = find_sentinel(&self.buffer[self.scanned..]) else {
                return self.await_more(limit);
            };
            let end = self.scanned + offset;
            let frame: Vec<u8> = self.buffer.drain(..end).collect();
            self.buffer.drain(..SENTINEL.len());
            self.scanned = 0;

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if frame.is_empty() {
                continue;
            }
            if frame.len() > limit {
                return Err(Error::TransportOverflow {
                    size: frame.len(),
                    limit,
                });
            }
            return Ok(Some(frame));
        }
    }

    fn await_more(&mut self, limit: usize) -> Result<Option<Vec<u8>>> {
        // Keep enough of the tail that a sentinel split across reads is still found.
        let keep = SENTINEL.len() - 1;

        if self.discarding {
            let cut = self.buffer.len().saturating_sub(keep);
            self.buffer.drain(..cut);
            self.scanned = 0;
            return Ok(None);
        }

        let size = self.buffer.len();
        if size > limit {
            self.discarding = true;
            let cut = size.saturating_sub(keep);
            self.buffer.drain(..cut);
            self.scanned = 0;
            return Err(Error::TransportOverflow { size, limit });
        }

        self.scanned = size.saturating_sub(keep);
        Ok(None)
    }

    /// Get current buffer size.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
