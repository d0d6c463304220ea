//! Decoded FIX message
//!
//! A message is an ordered list of (tag, value) pairs exactly as they appeared
//! on the wire. Repeating groups are not modelled as nested objects: a field
//! belongs to the nth group instance if it appears after the nth occurrence of
//! the group's delimiter tag.

use crate::fix::tags;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;

/// SOH field separator
pub const SOH: u8 = 0x01;

/// Ordered tag=value message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixMessage {
    fields: Vec<(u32, Bytes)>,
}

impl FixMessage {
    /// Create empty message
    pub fn new() -> Self {
        Self { fields: Vec::with_capacity(16) }
    }

    /// Append a field, formatting the value with `Display`
    pub fn append<V: fmt::Display>(&mut self, tag: u32, value: V) -> &mut Self {
        self.fields.push((tag, Bytes::from(value.to_string())));
        self
    }

    /// Append a raw byte value
    pub fn append_bytes(&mut self, tag: u32, value: impl Into<Bytes>) -> &mut Self {
        self.fields.push((tag, value.into()));
        self
    }

    /// All fields in wire order
    #[inline]
    pub fn fields(&self) -> &[(u32, Bytes)] {
        &self.fields
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// First occurrence of `tag`
    #[inline]
    pub fn get(&self, tag: u32) -> Option<&[u8]> {
        self.get_occurrence(tag, 1)
    }

    /// The nth (1-based) occurrence of `tag`, ignoring group boundaries
    pub fn get_occurrence(&self, tag: u32, nth: usize) -> Option<&[u8]> {
        if nth == 0 {
            return None;
        }
        self.fields
            .iter()
            .filter(|(t, _)| *t == tag)
            .nth(nth - 1)
            .map(|(_, v)| v.as_ref())
    }

    /// Field `tag` inside the nth (1-based) instance of the group delimited by `sep`
    ///
    /// Membership is resolved by counting occurrences of `sep`: a field belongs
    /// to instance n if exactly n delimiters precede it (inclusive when the
    /// field is the delimiter itself).
    pub fn get_in_group(&self, tag: u32, nth: usize, sep: u32) -> Option<&[u8]> {
        let mut seen = 0usize;
        for (t, v) in &self.fields {
            if *t == sep {
                seen += 1;
                if seen > nth {
                    return None;
                }
            }
            if *t == tag && seen == nth {
                return Some(v.as_ref());
            }
        }
        None
    }

    /// First occurrence of `tag` as UTF-8
    #[inline]
    pub fn get_str(&self, tag: u32) -> Option<&str> {
        self.get(tag).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Group-scoped lookup as UTF-8
    #[inline]
    pub fn get_str_in_group(&self, tag: u32, nth: usize, sep: u32) -> Option<&str> {
        self.get_in_group(tag, nth, sep)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    /// First occurrence of `tag` parsed as `T`
    pub fn parse<T: FromStr>(&self, tag: u32) -> Option<T> {
        self.get_str(tag).and_then(|s| s.trim().parse().ok())
    }

    /// Group-scoped lookup parsed as `T`
    pub fn parse_in_group<T: FromStr>(&self, tag: u32, nth: usize, sep: u32) -> Option<T> {
        self.get_str_in_group(tag, nth, sep)
            .and_then(|s| s.trim().parse().ok())
    }

    /// Number of occurrences of `tag`
    pub fn count(&self, tag: u32) -> usize {
        self.fields.iter().filter(|(t, _)| *t == tag).count()
    }

    /// MsgType(35)
    #[inline]
    pub fn msg_type(&self) -> Option<&str> {
        self.get_str(tags::MSG_TYPE)
    }

    /// MsgSeqNum(34)
    #[inline]
    pub fn seq_num(&self) -> Option<u64> {
        self.get(tags::MSG_SEQ_NUM).and_then(crate::fix::parser::parse_u64)
    }

    /// Encode to wire format
    ///
    /// BodyLength(9) and CheckSum(10) are always recomputed; any values for
    /// them already present in the message are ignored. BeginString(8), when
    /// present, is emitted first.
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::with_capacity(256);
        for (tag, value) in &self.fields {
            if matches!(*tag, tags::BEGIN_STRING | tags::BODY_LENGTH | tags::CHECK_SUM) {
                continue;
            }
            put_field(&mut body, *tag, value);
        }

        let mut out = BytesMut::with_capacity(body.len() + 32);
        if let Some(begin) = self.get(tags::BEGIN_STRING) {
            put_field(&mut out, tags::BEGIN_STRING, begin);
        }
        put_field(&mut out, tags::BODY_LENGTH, body.len().to_string().as_bytes());
        out.extend_from_slice(&body);

        let checksum = checksum(&out);
        put_field(&mut out, tags::CHECK_SUM, format!("{:03}", checksum).as_bytes());
        out.freeze()
    }
}

/// Sum of all bytes modulo 256
#[inline]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

#[inline]
fn put_field(buf: &mut BytesMut, tag: u32, value: &[u8]) {
    buf.put_slice(tag.to_string().as_bytes());
    buf.put_u8(b'=');
    buf.put_slice(value);
    buf.put_u8(SOH);
}

impl fmt::Display for FixMessage {
    /// Log-friendly rendering with `|` in place of SOH
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (tag, value) in &self.fields {
            if *tag == tags::PASSWORD {
                write!(f, "{}=***|", tag)?;
            } else {
                write!(f, "{}={}|", tag, String::from_utf8_lossy(value))?;
            }
        }
        Ok(())
    }
}
