//! Structural `<thinking>` tag detection over partially-received text.
//!
//! A tag counts only when the byte before it (or the last byte already
//! handed out, when the tag sits at the start of the buffer) and the byte
//! after it are outside [`QUOTE_CHARS`]. Close tags additionally need a
//! blank line after them, except on a forced close.

use std::sync::LazyLock;

use memchr::memmem;

pub const OPEN_TAG: &str = "<thinking>";
pub const CLOSE_TAG: &str = "</thinking>";
/// What an accepted close consumes from the buffer.
pub const CLOSE_MARKER: &str = "</thinking>\n\n";

/// Bytes that mark a neighbouring tag as quoted or inline.
pub const QUOTE_CHARS: &[u8] = b"`\"'\\#!@$%^&*()-_=+[]{};:<>,.?/";

static OPEN_FINDER: LazyLock<memmem::Finder<'static>> =
    LazyLock::new(|| memmem::Finder::new(OPEN_TAG.as_bytes()));
static CLOSE_FINDER: LazyLock<memmem::Finder<'static>> =
    LazyLock::new(|| memmem::Finder::new(CLOSE_TAG.as_bytes()));

#[inline]
#[must_use]
pub fn is_quote_char(byte: u8) -> bool {
    QUOTE_CHARS.contains(&byte)
}

#[inline]
fn bare_before(text: &[u8], pos: usize, prev: Option<u8>) -> bool {
    let before = if pos == 0 { prev } else { Some(text[pos - 1]) };
    !before.is_some_and(is_quote_char)
}

#[inline]
fn bare_after(text: &[u8], end: usize) -> bool {
    !text.get(end).copied().is_some_and(is_quote_char)
}

/// Largest char boundary of `text` at or below `index`.
#[must_use]
pub fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut index = index;
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn find_open_tag_with(text: &str, prev: Option<u8>, accept_at_end: bool) -> Option<usize> {
    let bytes = text.as_bytes();
    OPEN_FINDER.find_iter(bytes).find(|&pos| {
        let end = pos + OPEN_TAG.len();
        let after_ok = if end < bytes.len() {
            bare_after(bytes, end)
        } else {
            accept_at_end
        };
        bare_before(bytes, pos, prev) && after_ok
    })
}

/// Position of the first structural open tag. A tag ending the buffer is not
/// reported until the byte after it has arrived.
#[must_use]
pub fn find_open_tag(text: &str, prev: Option<u8>) -> Option<usize> {
    find_open_tag_with(text, prev, false)
}

/// Like [`find_open_tag`], but once no more text can arrive: a tag ending
/// the buffer counts.
#[must_use]
pub fn find_open_tag_final(text: &str, prev: Option<u8>) -> Option<usize> {
    find_open_tag_with(text, prev, true)
}

/// Position of the first structural close tag followed by `\n\n`.
#[must_use]
pub fn find_close_tag(text: &str, prev: Option<u8>) -> Option<usize> {
    let bytes = text.as_bytes();
    CLOSE_FINDER.find_iter(bytes).find(|&pos| {
        bare_before(bytes, pos, prev) && bytes[pos + CLOSE_TAG.len()..].starts_with(b"\n\n")
    })
}

/// Position of the first structural close tag followed only by whitespace.
/// Used when a tool call or the end of the stream forces the block shut.
#[must_use]
pub fn find_close_tag_at_end(text: &str, prev: Option<u8>) -> Option<usize> {
    let bytes = text.as_bytes();
    CLOSE_FINDER.find_iter(bytes).find(|&pos| {
        let end = pos + CLOSE_TAG.len();
        bare_before(bytes, pos, prev)
            && bare_after(bytes, end)
            && text[end..].trim().is_empty()
    })
}

/// Start of the earliest suffix that is a prefix of `marker` (the whole
/// marker included) and could still become a structural tag. `text.len()`
/// when there is none.
fn partial_marker_start(text: &str, marker: &str, prev: Option<u8>) -> usize {
    let bytes = text.as_bytes();
    let from = floor_char_boundary(text, text.len().saturating_sub(marker.len()));
    (from..text.len())
        .find(|&pos| {
            marker.as_bytes().starts_with(&bytes[pos..]) && bare_before(bytes, pos, prev)
        })
        .unwrap_or(text.len())
}

/// How much of a pre-reasoning buffer can be released as text: everything
/// before a trailing fragment that may still complete an open tag, or a
/// complete one still waiting for its next byte.
#[must_use]
pub fn open_safe_len(text: &str, prev: Option<u8>) -> usize {
    partial_marker_start(text, OPEN_TAG, prev)
}

/// How much of an in-reasoning buffer can be released as reasoning content.
///
/// Holds back a trailing fragment of [`CLOSE_MARKER`] and any bare close tag
/// followed only by whitespace, which a forced close would still accept.
#[must_use]
pub fn close_safe_len(text: &str, prev: Option<u8>) -> usize {
    let pending = find_close_tag_at_end(text, prev).unwrap_or(text.len());
    pending.min(partial_marker_start(text, CLOSE_MARKER, prev))
}
