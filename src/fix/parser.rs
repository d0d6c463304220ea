//! Streaming FIX frame parser
//!
//! Accumulates raw socket bytes and yields complete messages:
//! - Resynchronizes on `8=` when garbage precedes a frame
//! - Uses BodyLength(9) to locate the frame end without scanning the body
//! - Verifies CheckSum(10) before decoding fields
//! - Reads length-prefixed data fields (e.g. SecureData) by length, so they may contain SOH
//!
//! Field values are zero-copy slices of the frame buffer.

use crate::fix::message::{checksum, FixMessage, SOH};
use crate::fix::tags;
use crate::log_session;
use bytes::{Bytes, BytesMut};
use tracing::Level;

/// Trailer length: "10=" + 3 digits + SOH
const TRAILER_LEN: usize = 7;

/// Default upper bound for a single frame
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Framing and decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FixParseError {
    #[error("BodyLength(9) must follow BeginString(8)")]
    MissingBodyLength,
    #[error("invalid BodyLength(9) value")]
    InvalidBodyLength,
    #[error("frame does not end with CheckSum(10)")]
    MissingChecksum,
    #[error("checksum mismatch: computed {computed:03}, received {received:03}")]
    ChecksumMismatch { computed: u8, received: u8 },
    #[error("malformed field at offset {0}")]
    MalformedField(usize),
    #[error("frame of {0} bytes exceeds the size limit")]
    TooLarge(usize),
}

/// Incremental FIX parser
pub struct FixParser {
    buffer: BytesMut,
    max_message_size: usize,
}

impl FixParser {
    /// Create parser with default frame size limit
    pub fn new() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            max_message_size,
        }
    }

    /// Append received bytes
    #[inline]
    pub fn append_buffer(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Direct access for `AsyncReadExt::read_buf`
    #[inline]
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Bytes held but not yet consumed as a message
    #[inline]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Extract the next complete message, if one is buffered
    ///
    /// Returns `Ok(None)` when more bytes are needed. On error the offending
    /// bytes are discarded so the next call resynchronizes.
    pub fn get_message(&mut self) -> Result<Option<FixMessage>, FixParseError> {
        if !self.sync_to_frame_start() {
            return Ok(None);
        }

        // BeginString value ends at the first SOH
        let begin_end = match find_soh(&self.buffer, 2) {
            Some(pos) => pos + 1,
            None => return Ok(None),
        };

        if self.buffer.len() < begin_end + 2 {
            return Ok(None);
        }
        if &self.buffer[begin_end..begin_end + 2] != b"9=" {
            let _ = self.buffer.split_to(begin_end);
            return Err(FixParseError::MissingBodyLength);
        }

        let length_end = match find_soh(&self.buffer, begin_end + 2) {
            Some(pos) => pos,
            None => return Ok(None),
        };
        let body_len = match parse_u64(&self.buffer[begin_end + 2..length_end])
            .and_then(|len| usize::try_from(len).ok())
        {
            Some(len) => len,
            None => {
                let _ = self.buffer.split_to(length_end + 1);
                return Err(FixParseError::InvalidBodyLength);
            }
        };

        let body_start = length_end + 1;
        let (trailer_start, frame_len) = match body_start
            .checked_add(body_len)
            .and_then(|t| Some((t, t.checked_add(TRAILER_LEN)?)))
        {
            Some((t, f)) if f <= self.max_message_size => (t, f),
            bounds => {
                let _ = self.buffer.split_to(body_start);
                return Err(FixParseError::TooLarge(bounds.map_or(usize::MAX, |(_, f)| f)));
            }
        };
        if self.buffer.len() < frame_len {
            return Ok(None);
        }

        let trailer = &self.buffer[trailer_start..frame_len];
        if &trailer[..3] != b"10=" || trailer[TRAILER_LEN - 1] != SOH {
            let _ = self.buffer.split_to(body_start);
            return Err(FixParseError::MissingChecksum);
        }
        let received = parse_u64(&trailer[3..6]).map(|v| v as u8);
        let computed = checksum(&self.buffer[..trailer_start]);

        let frame = self.buffer.split_to(frame_len).freeze();
        match received {
            Some(received) if received == computed => {}
            Some(received) => return Err(FixParseError::ChecksumMismatch { computed, received }),
            None => return Err(FixParseError::MissingChecksum),
        }

        decode_fields(frame).map(Some)
    }

    /// Drop bytes preceding the next `8=`; false if no frame start is buffered
    fn sync_to_frame_start(&mut self) -> bool {
        if self.buffer.starts_with(b"8=") {
            return true;
        }
        match self.buffer.windows(2).position(|w| w == b"8=") {
            Some(pos) => {
                log_session!(Level::WARN, skipped = pos, "discarding bytes before frame start");
                let _ = self.buffer.split_to(pos);
                true
            }
            None => {
                // Keep a trailing '8' that may begin the next frame
                let keep = usize::from(self.buffer.last() == Some(&b'8'));
                let drop = self.buffer.len() - keep;
                let _ = self.buffer.split_to(drop);
                false
            }
        }
    }
}

impl Default for FixParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a verified frame into fields
fn decode_fields(frame: Bytes) -> Result<FixMessage, FixParseError> {
    let mut msg = FixMessage::new();
    let mut pos = 0usize;
    let mut raw_len: Option<(u32, usize)> = None;

    while pos < frame.len() {
        let eq = frame[pos..]
            .iter()
            .position(|b| *b == b'=')
            .map(|p| pos + p)
            .ok_or(FixParseError::MalformedField(pos))?;
        let tag = parse_u64(&frame[pos..eq])
            .and_then(|t| u32::try_from(t).ok())
            .ok_or(FixParseError::MalformedField(pos))?;
        let value_start = eq + 1;

        let value_end = match raw_len.take() {
            Some((data_tag, len)) if data_tag == tag => match value_start.checked_add(len) {
                Some(end) if end < frame.len() && frame[end] == SOH => end,
                _ => return Err(FixParseError::MalformedField(value_start)),
            },
            _ => find_soh(&frame, value_start).ok_or(FixParseError::MalformedField(value_start))?,
        };

        if let Some((_, data_tag)) = tags::RAW_DATA_PAIRS.iter().find(|(len_tag, _)| *len_tag == tag) {
            let len = parse_u64(&frame[value_start..value_end])
                .ok_or(FixParseError::MalformedField(value_start))?;
            let len = usize::try_from(len).map_err(|_| FixParseError::MalformedField(value_start))?;
            raw_len = Some((*data_tag, len));
        }

        msg.append_bytes(tag, frame.slice(value_start..value_end));
        pos = value_end + 1;
    }

    Ok(msg)
}

#[inline]
fn find_soh(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .iter()
        .position(|b| *b == SOH)
        .map(|p| from + p)
}

/// Parse u64 from ASCII digits
#[inline]
pub fn parse_u64(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: u64 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        result = result.checked_mul(10)?;
        result = result.checked_add((b - b'0') as u64)?;
    }

    Some(result)
}
