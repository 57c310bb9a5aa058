//! Token extraction from raw artifact bytes.

use ledgerbridge_types::EngineVersion;
use regex_lite::Regex;
use std::sync::LazyLock;

static GUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12}",
    )
    .expect("static GUID pattern")
});

// A four-digit 20xx year that forms a whole path segment.
static YEAR_SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[\\/](20[0-9]{2})(?:[\\/"';,]|\s|$)"#).expect("static year pattern")
});

/// Decodes artifact bytes into the text views worth scanning.
///
/// Engine artifacts mix single-byte and UTF-16LE strings, so both views are
/// produced when the bytes look like they might contain wide text.
pub(crate) fn text_views(bytes: &[u8]) -> Vec<String> {
    let narrow: String = bytes
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '\n' })
        .collect();

    let mut views = vec![narrow];

    let zero_high = bytes.chunks_exact(2).filter(|pair| pair[1] == 0).count();
    if zero_high * 4 >= bytes.len() / 2 && bytes.len() >= 2 {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let wide: String = char::decode_utf16(units)
            .map(|c| match c {
                Ok(c) if c.is_ascii_graphic() || c == ' ' => c,
                _ => '\n',
            })
            .collect();
        views.push(wide);
    }

    views
}

/// Every GUID-shaped token in `text`, in order of appearance.
pub(crate) fn guid_tokens(text: &str) -> Vec<String> {
    GUID_RE
        .find_iter(text)
        .map(|m| m.as_str().to_ascii_uppercase())
        .collect()
}

/// Four-digit years found as whole path segments, e.g. `...\Accounts\2026\`.
pub(crate) fn year_segments(text: &str) -> Vec<u16> {
    YEAR_SEGMENT_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

/// True if `version` appears in `text` as a standalone `major.minor` literal.
pub(crate) fn contains_version_literal(text: &str, version: &EngineVersion) -> bool {
    let needle = version.to_string();
    let bytes = text.as_bytes();

    text.match_indices(&needle).any(|(start, _)| {
        let end = start + needle.len();
        let before_ok = start == 0 || !bytes[start - 1].is_ascii_digit();
        let after_ok = end >= bytes.len() || !bytes[end].is_ascii_digit();
        before_ok && after_ok
    })
}
