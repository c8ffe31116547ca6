//! Line-oriented SSE decoding.
//!
//! Handles:
//! - Partial lines across TCP chunks
//! - CRLF and LF line endings
//! - `data:` prefixes and the `[DONE]` terminator
//! - Malformed JSON lines, which are skipped rather than failing the stream

use bytes::{Buf, Bytes, BytesMut};
use memchr::memchr;
use serde_json::Value;

/// Outcome of decoding one line.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A JSON payload.
    Data(Value),
    /// End-of-stream marker.
    Done,
    /// Blank line, comment, or undecodable payload.
    Skip,
}

/// Splits a byte stream into lines.
pub struct LineDecoder {
    buffer: BytesMut,
}

impl LineDecoder {
    /// Create a new decoder with default buffer capacity.
    pub fn new() -> Self {
        Self::with_capacity(8192)
    }

    /// Create a new decoder with specified initial capacity.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(cap),
        }
    }

    /// Feed bytes into the decoder.
    #[inline]
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Next complete line without its terminator, or `None` if more data is needed.
    pub fn next_line(&mut self) -> Option<Bytes> {
        let end = memchr(b'\n', &self.buffer)?;
        let mut line = self.buffer.split_to(end + 1);
        line.truncate(end);
        if line.ends_with(b"\r") {
            line.truncate(end - 1);
        }
        Some(line.freeze())
    }

    /// Whatever is left once the underlying stream has ended.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut rest = self.buffer.split();
        if rest.ends_with(b"\r") {
            rest.truncate(rest.len() - 1);
        }
        Some(rest.freeze())
    }

    /// Bytes buffered but not yet returned as a line.
    pub fn buffer_len(&self) -> usize {
        self.buffer.remaining()
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if the payload is the `[DONE]` marker.
#[inline]
pub fn is_done(data: &[u8]) -> bool {
    data == b"[DONE]"
}

/// Decode a single SSE line.
pub fn decode_line(line: &[u8]) -> Frame {
    let line = line.trim_ascii();
    if line.is_empty() || line.starts_with(b":") {
        return Frame::Skip;
    }

    let payload = match line.strip_prefix(b"data:") {
        Some(rest) => rest.trim_ascii_start(),
        None => line,
    };

    if is_done(payload) {
        return Frame::Done;
    }

    match serde_json::from_slice(payload) {
        Ok(value) => Frame::Data(value),
        Err(e) => {
            tracing::trace!(error = %e, len = payload.len(), "skipping undecodable SSE line");
            Frame::Skip
        }
    }
}
