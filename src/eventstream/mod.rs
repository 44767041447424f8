//! Incremental decoder for the length-prefixed, CRC-checked binary frame
//! format the backend streams responses in.
//!
//! ```text
//! | total_len u32 | header_len u32 | prelude_crc u32 | headers | payload | message_crc u32 |
//! ```
//!
//! Both checksums are CRC-32 (IEEE). The prelude CRC covers the first 8 bytes,
//! the message CRC covers everything before itself.

pub mod decoder;
pub mod header;
pub mod stream;

pub use decoder::FrameDecoder;
pub use header::{HeaderError, HeaderValueType, ValueWidth};
pub use stream::frame_stream;

use bytes::Bytes;
use smallvec::SmallVec;

/// Size of `total_len + header_len + prelude_crc`.
pub const PRELUDE_LEN: usize = 12;
/// Prelude plus the trailing message CRC; the smallest legal frame.
pub const MIN_FRAME_LEN: usize = PRELUDE_LEN + 4;
/// Largest frame the decoder accepts (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

pub const MESSAGE_TYPE_HEADER: &str = ":message-type";
pub const EVENT_TYPE_HEADER: &str = ":event-type";
pub const EXCEPTION_TYPE_HEADER: &str = ":exception-type";
pub const CONTENT_TYPE_HEADER: &str = ":content-type";
pub const ERROR_CODE_HEADER: &str = "error-code";

/// Fatal framing errors. The response stream cannot continue past these.
///
/// Only a prelude whose CRC checks out can produce one; an out-of-range
/// length behind a bad prelude CRC is skipped by resynchronization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame too small: {0} < {MIN_FRAME_LEN}")]
    FrameTooSmall(usize),
    #[error("frame too large: {length} > {limit}")]
    FrameTooLarge { length: usize, limit: usize },
}

/// String-valued headers of one frame, in wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: SmallVec<[(String, String); 4]>,
}

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header; a repeated name replaces the earlier value.
    pub fn insert(&mut self, name: &str, value: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value.to_owned();
        } else {
            self.entries.push((name.to_owned(), value.to_owned()));
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn message_type(&self) -> Option<&str> {
        self.get(MESSAGE_TYPE_HEADER)
    }

    #[must_use]
    pub fn event_type(&self) -> Option<&str> {
        self.get(EVENT_TYPE_HEADER)
    }

    #[must_use]
    pub fn exception_type(&self) -> Option<&str> {
        self.get(EXCEPTION_TYPE_HEADER)
    }

    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        self.get(ERROR_CODE_HEADER)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// One decoded frame. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub headers: Headers,
    pub payload: Bytes,
}

impl Frame {
    #[must_use]
    pub fn message_type(&self) -> Option<&str> {
        self.headers.message_type()
    }

    #[must_use]
    pub fn event_type(&self) -> Option<&str> {
        self.headers.event_type()
    }
}

/// Encode one frame with string-valued headers.
///
/// Header names longer than 255 bytes or values longer than 65535 bytes are
/// truncated to the wire limits.
#[must_use]
pub fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut header_block = Vec::with_capacity(headers.len() * 32);
    for (name, value) in headers {
        let name = &name.as_bytes()[..name.len().min(usize::from(u8::MAX))];
        let value = &value.as_bytes()[..value.len().min(usize::from(u16::MAX))];
        header_block.push(name.len() as u8);
        header_block.extend_from_slice(name);
        header_block.push(HeaderValueType::String as u8);
        header_block.extend_from_slice(&(value.len() as u16).to_be_bytes());
        header_block.extend_from_slice(value);
    }

    let total_len = MIN_FRAME_LEN + header_block.len() + payload.len();
    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(&(total_len as u32).to_be_bytes());
    out.extend_from_slice(&(header_block.len() as u32).to_be_bytes());
    let prelude_crc = crc32fast::hash(&out[..8]);
    out.extend_from_slice(&prelude_crc.to_be_bytes());
    out.extend_from_slice(&header_block);
    out.extend_from_slice(payload);
    let message_crc = crc32fast::hash(&out);
    out.extend_from_slice(&message_crc.to_be_bytes());
    out
}

/// Encode a backend `event` frame carrying a JSON payload.
#[must_use]
pub fn encode_event_frame(event_type: &str, payload: &[u8]) -> Vec<u8> {
    encode_frame(
        &[
            (MESSAGE_TYPE_HEADER, "event"),
            (EVENT_TYPE_HEADER, event_type),
            (CONTENT_TYPE_HEADER, "application/json"),
        ],
        payload,
    )
}
