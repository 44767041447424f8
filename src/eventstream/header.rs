//! Typed header block parsing.
//!
//! Each header entry is `name_len:u8, name, type_tag:u8, value`. Only string
//! values are retained; every other value type is skipped by width.

use super::Headers;

/// Wire tag of a header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HeaderValueType {
    BoolTrue = 0,
    BoolFalse = 1,
    Byte = 2,
    Short = 3,
    Integer = 4,
    Long = 5,
    ByteArray = 6,
    String = 7,
    Timestamp = 8,
    Uuid = 9,
}

/// How many value bytes follow a header type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueWidth {
    Fixed(usize),
    /// `u16` big-endian length prefix followed by that many bytes.
    Variable,
}

impl HeaderValueType {
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::BoolTrue,
            1 => Self::BoolFalse,
            2 => Self::Byte,
            3 => Self::Short,
            4 => Self::Integer,
            5 => Self::Long,
            6 => Self::ByteArray,
            7 => Self::String,
            8 => Self::Timestamp,
            9 => Self::Uuid,
            _ => return None,
        })
    }

    #[must_use]
    pub fn skip_width(self) -> ValueWidth {
        match self {
            Self::BoolTrue | Self::BoolFalse => ValueWidth::Fixed(0),
            Self::Byte => ValueWidth::Fixed(1),
            Self::Short => ValueWidth::Fixed(2),
            Self::Integer => ValueWidth::Fixed(4),
            Self::Long | Self::Timestamp => ValueWidth::Fixed(8),
            Self::Uuid => ValueWidth::Fixed(16),
            Self::ByteArray | Self::String => ValueWidth::Variable,
        }
    }
}

/// Reasons a header block is rejected. Any of these makes the decoder treat
/// the current position as corrupt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("invalid header name length {0}")]
    InvalidNameLength(usize),
    #[error("header name is not valid UTF-8")]
    InvalidName,
    #[error("unknown header value type {0}")]
    UnknownValueType(u8),
    #[error("header value truncated at offset {0}")]
    Truncated(usize),
    #[error("string header value is not valid UTF-8")]
    InvalidValue,
}

/// Parse a complete header block.
///
/// # Errors
///
/// Returns [`HeaderError`] when an entry is truncated, carries an unknown
/// type tag, or holds non-UTF-8 name/string bytes.
pub fn parse_headers(block: &[u8]) -> Result<Headers, HeaderError> {
    let mut headers = Headers::new();
    let mut offset = 0usize;

    while offset < block.len() {
        let name_len = usize::from(block[offset]);
        offset += 1;
        if name_len == 0 || offset + name_len > block.len() {
            return Err(HeaderError::InvalidNameLength(name_len));
        }
        let name = std::str::from_utf8(&block[offset..offset + name_len])
            .map_err(|_| HeaderError::InvalidName)?;
        offset += name_len;

        let tag = *block.get(offset).ok_or(HeaderError::Truncated(offset))?;
        offset += 1;
        let value_type = HeaderValueType::from_tag(tag).ok_or(HeaderError::UnknownValueType(tag))?;

        match value_type.skip_width() {
            ValueWidth::Fixed(width) => {
                if offset + width > block.len() {
                    return Err(HeaderError::Truncated(offset));
                }
                offset += width;
            }
            ValueWidth::Variable => {
                let len_bytes = block
                    .get(offset..offset + 2)
                    .ok_or(HeaderError::Truncated(offset))?;
                let value_len = usize::from(u16::from_be_bytes([len_bytes[0], len_bytes[1]]));
                offset += 2;
                let value = block
                    .get(offset..offset + value_len)
                    .ok_or(HeaderError::Truncated(offset))?;
                offset += value_len;
                if value_type == HeaderValueType::String {
                    let value =
                        std::str::from_utf8(value).map_err(|_| HeaderError::InvalidValue)?;
                    headers.insert(name, value);
                }
            }
        }
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_entry(out: &mut Vec<u8>, name: &str, value: &str) {
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
        out.push(HeaderValueType::String as u8);
        out.extend_from_slice(&(value.len() as u16).to_be_bytes());
        out.extend_from_slice(value.as_bytes());
    }

    #[test]
    fn test_skip_widths() {
        assert_eq!(HeaderValueType::BoolTrue.skip_width(), ValueWidth::Fixed(0));
        assert_eq!(HeaderValueType::Short.skip_width(), ValueWidth::Fixed(2));
        assert_eq!(HeaderValueType::Timestamp.skip_width(), ValueWidth::Fixed(8));
        assert_eq!(HeaderValueType::Uuid.skip_width(), ValueWidth::Fixed(16));
        assert_eq!(HeaderValueType::ByteArray.skip_width(), ValueWidth::Variable);
        assert_eq!(HeaderValueType::from_tag(10), None);
    }

    #[test]
    fn test_parse_string_headers() {
        let mut block = Vec::new();
        string_entry(&mut block, ":message-type", "event");
        string_entry(&mut block, ":event-type", "assistantResponseEvent");
        let headers = parse_headers(&block).unwrap();
        assert_eq!(headers.message_type(), Some("event"));
        assert_eq!(headers.event_type(), Some("assistantResponseEvent"));
    }

    #[test]
    fn test_non_string_values_are_skipped() {
        let mut block = Vec::new();
        block.push(4);
        block.extend_from_slice(b"flag");
        block.push(HeaderValueType::BoolTrue as u8);
        block.push(3);
        block.extend_from_slice(b"seq");
        block.push(HeaderValueType::Long as u8);
        block.extend_from_slice(&7u64.to_be_bytes());
        block.push(4);
        block.extend_from_slice(b"blob");
        block.push(HeaderValueType::ByteArray as u8);
        block.extend_from_slice(&3u16.to_be_bytes());
        block.extend_from_slice(&[1, 2, 3]);
        string_entry(&mut block, ":event-type", "meteringEvent");

        let headers = parse_headers(&block).unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("flag"), None);
        assert_eq!(headers.get("seq"), None);
        assert_eq!(headers.event_type(), Some("meteringEvent"));
    }

    #[test]
    fn test_truncated_and_unknown_tags_are_rejected() {
        let mut block = Vec::new();
        block.push(3);
        block.extend_from_slice(b"seq");
        block.push(HeaderValueType::Integer as u8);
        block.extend_from_slice(&[0, 0]);
        assert!(matches!(parse_headers(&block), Err(HeaderError::Truncated(_))));

        let block = [1, b'x', 42];
        assert_eq!(parse_headers(&block), Err(HeaderError::UnknownValueType(42)));

        let block = [0];
        assert_eq!(parse_headers(&block), Err(HeaderError::InvalidNameLength(0)));
    }
}
