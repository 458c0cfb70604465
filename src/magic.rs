//! Marker scanning and operator-supplied marker parsing.
//!
//! A marker is a short byte sequence that announces a structure inside a
//! sample: the UPX `l_info` magic, or the encrypted Mozi config header.
//!
//! # Scan semantics
//!
//! [`find_all`] resumes one byte past every hit rather than one marker length
//! past it, so a marker that overlaps itself (`"aaa"` in `"aaaa"`) is
//! reported at every position.  The header repair logic indexes the result
//! by first/last occurrence and relies on this exact behaviour.

use memchr::memmem;
use thiserror::Error;

/// The canonical UPX marker written after `l_checksum` in every `l_info`.
pub const UPX_MAGIC: &[u8; 4] = b"UPX!";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MagicParseError {
    #[error("Custom magic number is empty")]
    Empty,
    #[error("Custom magic number contains non-ASCII character {0:?}")]
    NonAscii(char),
}

/// Offsets of every occurrence of `marker` in `data`, ascending.
///
/// Returns an empty list when the marker is absent or empty; callers decide
/// whether that matters.
pub fn find_all(data: &[u8], marker: &[u8]) -> Vec<usize> {
    let mut offsets = Vec::new();
    if marker.is_empty() {
        return offsets;
    }

    let finder = memmem::Finder::new(marker);
    let mut cursor = 0usize;
    while cursor < data.len() {
        match finder.find(&data[cursor..]) {
            Some(rel) => {
                let at = cursor + rel;
                offsets.push(at);
                cursor = at + 1;
            }
            None => break,
        }
    }
    offsets
}

/// Offset of the first occurrence of `marker` in `data`.
pub fn find_first(data: &[u8], marker: &[u8]) -> Option<usize> {
    if marker.is_empty() {
        return None;
    }
    memmem::find(data, marker)
}

/// Parse an operator-supplied marker such as `"UP0x58!"` or `"0x7f0x45LF"`.
///
/// Every `0xHH` token becomes one byte; the literal text between tokens is
/// taken as ASCII.  Pieces are concatenated in input order.
pub fn parse_magic(input: &str) -> Result<Vec<u8>, MagicParseError> {
    if let Some(c) = input.chars().find(|c| !c.is_ascii()) {
        return Err(MagicParseError::NonAscii(c));
    }

    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        if let Some(byte) = hex_token(&bytes[i..]) {
            out.push(byte);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    if out.is_empty() {
        return Err(MagicParseError::Empty);
    }
    tracing::debug!(magic = %hex::encode(&out), "parsed custom magic number");
    Ok(out)
}

/// Decode a leading `0xHH` token, if `rest` starts with one.
fn hex_token(rest: &[u8]) -> Option<u8> {
    match rest {
        [b'0', b'x', hi, lo, ..] => hex::decode([*hi, *lo]).ok()?.first().copied(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn finds_every_distinct_occurrence() {
        let data = b"..UPX!....UPX!..UPX!";
        assert_eq!(find_all(data, UPX_MAGIC), vec![2, 10, 16]);
    }

    #[test]
    fn reports_overlapping_hits() {
        assert_eq!(find_all(b"aaaa", b"aaa"), vec![0, 1]);
        assert_eq!(find_all(b"abababa", b"aba"), vec![0, 2, 4]);
    }

    #[test]
    fn absent_marker_gives_empty_list() {
        assert!(find_all(b"nothing here", UPX_MAGIC).is_empty());
        assert!(find_all(b"", UPX_MAGIC).is_empty());
        assert!(find_all(b"abc", b"").is_empty());
        assert_eq!(find_first(b"xxUPX!", UPX_MAGIC), Some(2));
    }

    #[test]
    fn parse_plain_ascii() {
        assert_eq!(parse_magic("UPX!").unwrap(), b"UPX!".to_vec());
    }

    #[test]
    fn parse_mixed_tokens() {
        assert_eq!(parse_magic("0x7fELF").unwrap(), vec![0x7f, b'E', b'L', b'F']);
        assert_eq!(parse_magic("AB0x0aC0xFf").unwrap(), vec![b'A', b'B', 0x0a, b'C', 0xff]);
        assert_eq!(parse_magic("0x010x02").unwrap(), vec![1, 2]);
    }

    #[test]
    fn parse_keeps_incomplete_tokens_literal() {
        assert_eq!(parse_magic("0xZZ").unwrap(), b"0xZZ".to_vec());
        assert_eq!(parse_magic("A0x4").unwrap(), b"A0x4".to_vec());
        assert_eq!(parse_magic("0x+1").unwrap(), b"0x+1".to_vec());
    }

    #[test]
    fn hex_tokens_accept_either_case() {
        assert_eq!(hex_token(b"0xaB!"), Some(0xab));
        assert_eq!(hex_token(b"0x00"), Some(0));
        assert_eq!(hex_token(b"0xg1"), None);
        assert_eq!(hex_token(b"0x1"), None);
    }

    #[test]
    fn parse_rejects_empty_and_non_ascii() {
        assert_eq!(parse_magic(""), Err(MagicParseError::Empty));
        assert_eq!(parse_magic("UPé"), Err(MagicParseError::NonAscii('é')));
    }

    fn naive_count(data: &[u8], marker: &[u8]) -> usize {
        data.windows(marker.len()).filter(|w| *w == marker).count()
    }

    proptest! {
        #[test]
        fn offsets_are_strictly_ascending_and_complete(
            data in proptest::collection::vec(0u8..3, 0..256),
            marker in proptest::collection::vec(0u8..3, 1..4),
        ) {
            let offsets = find_all(&data, &marker);
            prop_assert!(offsets.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(offsets.len(), naive_count(&data, &marker));
            for &o in &offsets {
                prop_assert_eq!(&data[o..o + marker.len()], marker.as_slice());
            }
        }
    }
}
