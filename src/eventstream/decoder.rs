use bytes::{Buf, BytesMut};

use super::header::{parse_headers, HeaderError};
use super::{Frame, FrameError, MAX_FRAME_LEN, MIN_FRAME_LEN, PRELUDE_LEN};

const INITIAL_CAPACITY: usize = 8 * 1024;

/// Why a fully-buffered frame position was judged corrupt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum Corruption {
    #[error("prelude CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    PreludeCrc { expected: u32, actual: u32 },
    #[error("message CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    MessageCrc { expected: u32, actual: u32 },
    #[error("header block of {0} bytes overruns the frame")]
    HeaderOverrun(usize),
    #[error("malformed header block: {0}")]
    Header(#[from] HeaderError),
}

enum Attempt {
    NeedMore,
    Frame(Frame),
    Corrupt(Corruption),
}

#[inline]
fn read_u32_be(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Streaming frame decoder.
///
/// Bytes arrive in arbitrary chunks through [`FrameDecoder::feed`]; complete
/// frames are pulled out with [`FrameDecoder::decode_ready_frames`]. A
/// position that fails a checksum or carries a malformed header block is
/// skipped one byte at a time until a valid frame lines up again.
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_len: usize,
    resync_count: u64,
    resyncing: bool,
    skipped_since_resync: usize,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            max_frame_len: MAX_FRAME_LEN,
            resync_count: 0,
            resyncing: false,
            skipped_since_resync: 0,
        }
    }

    /// Lower the accepted frame size. Values are clamped to
    /// `[MIN_FRAME_LEN, MAX_FRAME_LEN]`.
    #[must_use]
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len.clamp(MIN_FRAME_LEN, MAX_FRAME_LEN);
        self
    }

    /// Append raw bytes to the internal buffer.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes currently buffered and not yet consumed by a decoded frame.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of bytes dropped so far while resynchronizing.
    #[must_use]
    pub fn resync_count(&self) -> u64 {
        self.resync_count
    }

    /// Decode every frame fully contained in the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] when the frame at the buffer head declares a
    /// length outside the accepted range. Frames decoded before that point
    /// are lost; use [`FrameDecoder::decode_ready_frames_into`] to keep them.
    pub fn decode_ready_frames(&mut self) -> Result<Vec<Frame>, FrameError> {
        let mut out = Vec::new();
        self.decode_ready_frames_into(&mut out)?;
        Ok(out)
    }

    /// Decode every frame fully contained in the buffer into `out`.
    ///
    /// Returns the number of frames appended. On error, frames already
    /// appended stay in `out` and the offending bytes stay buffered.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] when the frame at the buffer head declares a
    /// length outside the accepted range.
    pub fn decode_ready_frames_into(&mut self, out: &mut Vec<Frame>) -> Result<usize, FrameError> {
        let start = out.len();
        loop {
            match self.try_decode_one()? {
                Attempt::NeedMore => break,
                Attempt::Frame(frame) => {
                    if self.resyncing {
                        tracing::debug!(
                            skipped_bytes = self.skipped_since_resync,
                            "event stream resynchronized"
                        );
                        self.resyncing = false;
                        self.skipped_since_resync = 0;
                    }
                    out.push(frame);
                }
                Attempt::Corrupt(reason) => {
                    if !self.resyncing {
                        tracing::debug!(%reason, "corrupt frame, resynchronizing");
                        self.resyncing = true;
                    }
                    // Strictly shrinking the buffer keeps this loop finite.
                    self.buffer.advance(1);
                    self.resync_count += 1;
                    self.skipped_since_resync += 1;
                }
            }
        }
        Ok(out.len() - start)
    }

    fn try_decode_one(&mut self) -> Result<Attempt, FrameError> {
        let buf = &self.buffer[..];
        if buf.len() < PRELUDE_LEN {
            return Ok(Attempt::NeedMore);
        }

        // The prelude CRC is checked before the length fields are trusted so
        // a misaligned position resyncs instead of failing the stream or
        // waiting on a bogus length.
        let expected = read_u32_be(buf, 8);
        let actual = crc32fast::hash(&buf[..8]);
        if expected != actual {
            return Ok(Attempt::Corrupt(Corruption::PreludeCrc { expected, actual }));
        }

        let total_len = read_u32_be(buf, 0) as usize;
        let header_len = read_u32_be(buf, 4) as usize;
        if total_len < MIN_FRAME_LEN {
            return Err(FrameError::FrameTooSmall(total_len));
        }
        if total_len > self.max_frame_len {
            return Err(FrameError::FrameTooLarge {
                length: total_len,
                limit: self.max_frame_len,
            });
        }
        if buf.len() < total_len {
            return Ok(Attempt::NeedMore);
        }

        let payload_end = total_len - 4;
        let expected = read_u32_be(buf, payload_end);
        let actual = crc32fast::hash(&buf[..payload_end]);
        if expected != actual {
            return Ok(Attempt::Corrupt(Corruption::MessageCrc { expected, actual }));
        }

        let headers_end = match PRELUDE_LEN.checked_add(header_len) {
            Some(end) if end <= payload_end => end,
            _ => return Ok(Attempt::Corrupt(Corruption::HeaderOverrun(header_len))),
        };
        let headers = match parse_headers(&buf[PRELUDE_LEN..headers_end]) {
            Ok(headers) => headers,
            Err(err) => return Ok(Attempt::Corrupt(err.into())),
        };

        let frame_bytes = self.buffer.split_to(total_len).freeze();
        let payload = frame_bytes.slice(headers_end..payload_end);
        Ok(Attempt::Frame(Frame { headers, payload }))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
