//! Best-effort tag extraction from suite source text.
//!
//! Suites declare tags on lines such as `[Tags]    smoke    apiMagazord`. This is
//! not a grammar: malformed or missing tag sections yield no tags, never an error.

use std::sync::LazyLock;

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE};
use regex::Regex;

/// Marker that opens a tag section (matched case-insensitively after trimming).
pub const TAG_MARKER: &str = "[tags]";

static TAG_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}|\t+").unwrap());

/// Share of NUL bytes in the sniffed prefix above which BOM-less UTF-16 is tried.
const UTF16_NUL_RATIO: f64 = 0.10;
const SNIFF_BYTES: usize = 512;

/// Normalize a tag: strip all whitespace and lower-case.
pub fn normalize_tag(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Parse normalized, deduplicated tags in order of first appearance.
pub fn parse_tags(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        let Some(head) = trimmed.get(..TAG_MARKER.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(TAG_MARKER) {
            continue;
        }
        let rest = trimmed[TAG_MARKER.len()..].trim();
        for candidate in TAG_SEPARATOR.split(rest) {
            let tag = normalize_tag(candidate);
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
    }
    tags
}

/// Decode suite source bytes: BOM, then UTF-16 (LE/BE), then UTF-8, then Latin-1.
///
/// BOM-less UTF-16 is only attempted when the content is NUL-heavy. NUL bytes are
/// valid UTF-8, so that check must come first; a Latin-1 file of even length is
/// never misread as UTF-16.
pub fn decode_suite_text(bytes: &[u8]) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes)
        && let Some(text) =
            encoding.decode_without_bom_handling_and_without_replacement(&bytes[bom_len..])
    {
        return text.into_owned();
    }

    if looks_like_utf16(bytes) {
        for encoding in [UTF_16LE, UTF_16BE] {
            if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes)
            {
                return text.into_owned();
            }
        }
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }

    bytes.iter().map(|&b| char::from(b)).collect()
}

fn looks_like_utf16(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(SNIFF_BYTES)];
    if sample.is_empty() {
        return false;
    }
    let nuls = sample.iter().filter(|&&b| b == 0).count();
    nuls as f64 / sample.len() as f64 > UTF16_NUL_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUITE: &str = "*** Test Cases ***\n\
        Listar produtos\n    [Tags]    apiMagazord    smoke\n    Log    ok\n\
        Criar produto\n    [TAGS]\tRegression\tapimagazord\n    Log    ok\n";

    #[test]
    fn parse_tags_splits_on_wide_spaces_and_tabs() {
        assert_eq!(
            parse_tags(SUITE),
            vec!["apimagazord", "smoke", "regression"]
        );
    }

    #[test]
    fn parse_tags_removes_internal_whitespace() {
        // A single space is not a separator, so "api Magazord" is one tag.
        assert_eq!(parse_tags("[Tags]    api Magazord"), vec!["apimagazord"]);
    }

    #[test]
    fn parse_tags_ignores_lines_without_marker() {
        assert!(parse_tags("Documentation    [Tags] are mentioned here").is_empty());
        assert!(parse_tags("").is_empty());
        assert!(parse_tags("[Tags]").is_empty());
    }

    #[test]
    fn normalize_tag_lowercases_and_strips() {
        assert_eq!(normalize_tag("  E2E Magazord \t"), "e2emagazord");
        assert_eq!(normalize_tag("   "), "");
    }

    #[test]
    fn decode_prefers_utf8() {
        assert_eq!(decode_suite_text("ação".as_bytes()), "ação");
    }

    #[test]
    fn decode_handles_utf16_with_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "[Tags]    smoke".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(parse_tags(&decode_suite_text(&bytes)), vec!["smoke"]);
    }

    #[test]
    fn decode_handles_bomless_utf16_le() {
        let mut bytes = Vec::new();
        for unit in "[Tags]    smoke".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_suite_text(&bytes), "[Tags]    smoke");
    }

    #[test]
    fn decode_falls_back_to_latin1() {
        let bytes = b"[Tags]    a\xe7\xe3o";
        assert_eq!(decode_suite_text(bytes), "[Tags]    ação");
    }
}
