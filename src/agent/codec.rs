//! Line framer for agent output streams.
//!
//! Reassembles arbitrarily chunked bytes into `\n`-delimited records and
//! best-effort decodes each one as JSON. Framing never fails and never
//! drops data:
//! - a trailing partial line stays buffered until its newline arrives;
//! - the first [`MAX_LINE_BYTES`] of a longer line are flushed as raw text,
//!   whether or not its newline has arrived yet;
//! - invalid UTF-8 is decoded lossily;
//! - at EOF the remaining partial line is emitted as a final record.
//!
//! Blank lines (whitespace only) are discarded.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use agent_tether::agent::codec::AgentCodec;
//!
//! let lines = FramedRead::new(child_stdout, AgentCodec::new());
//! ```

use bytes::BytesMut;
use serde_json::Value;
use tokio_util::codec::Decoder;
use tracing::warn;

use crate::{AppError, Result};

/// Longest line buffered before it is flushed without a terminator: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// One framed record from an agent stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    /// The line parsed as strict JSON.
    Structured(Value),
    /// The line was not JSON; carried verbatim.
    Raw(String),
}

impl Line {
    /// Decode one line of text. Returns `None` when the line is blank.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.strip_suffix('\r').unwrap_or(text);
        if text.trim().is_empty() {
            return None;
        }
        Some(match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::Structured(value),
            Err(_) => Self::Raw(text.to_owned()),
        })
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Self::parse(&String::from_utf8_lossy(bytes))
    }

    /// Decoded JSON value, if this line was structured.
    #[must_use]
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => Some(value),
            Self::Raw(_) => None,
        }
    }
}

/// Newline-delimited, best-effort JSON decoder for agent pipes.
#[derive(Debug, Default)]
pub struct AgentCodec {
    /// Offset already scanned for a newline in the current buffer.
    next_index: usize,
}

impl AgentCodec {
    /// Create a codec with an empty scan position.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for AgentCodec {
    type Item = Line;
    type Error = AppError;

    /// Decode the next non-blank line from `src`.
    ///
    /// Returns `Ok(None)` when `src` holds no complete line yet.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let scan_from = self.next_index.min(src.len());
            let newline = src[scan_from..].iter().position(|byte| *byte == b'\n');
            let line_len = newline.map_or(src.len(), |offset| scan_from + offset);

            if line_len >= MAX_LINE_BYTES {
                let raw = src.split_to(MAX_LINE_BYTES);
                self.next_index = 0;
                warn!(
                    limit = MAX_LINE_BYTES,
                    "agent line exceeded limit, flushing as raw text"
                );
                return Ok(Some(Line::Raw(String::from_utf8_lossy(&raw).into_owned())));
            }

            if let Some(offset) = newline {
                let end = scan_from + offset;
                let raw = src.split_to(end + 1);
                self.next_index = 0;
                if let Some(line) = Line::from_bytes(&raw[..end]) {
                    return Ok(Some(line));
                }
                continue;
            }

            self.next_index = src.len();
            return Ok(None);
        }
    }

    /// Decode the final line when the stream reaches EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let raw = src.split_to(src.len());
        self.next_index = 0;
        Ok(Line::from_bytes(&raw))
    }
}
