//! Byte-safe decoding of child process output.

use std::borrow::Cow;

/// Decode raw process output. Never fails.
///
/// Valid UTF-8 is borrowed as-is. Anything else is decoded with U+FFFD in place of
/// each undecodable sequence, so corrupted output is visible instead of dropped.
pub fn decode_output(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

/// Decode one output line and strip its trailing line terminator.
pub fn decode_line(bytes: &[u8]) -> String {
    decode_output(bytes)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

/// Keep the last `max_chars` characters of `text`, prefixed with `...` when cut.
pub fn tail_text(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let tail: String = text.chars().skip(total - max_chars).collect();
    format!("...\n{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_utf8_becomes_replacement_characters() {
        let decoded = decode_output(b"ok \xff\xfe done");
        assert_eq!(decoded, "ok \u{FFFD}\u{FFFD} done");
    }

    #[test]
    fn decode_line_strips_crlf() {
        assert_eq!(decode_line(b"PASS\r\n"), "PASS");
        assert_eq!(decode_line(b"no terminator"), "no terminator");
    }

    #[test]
    fn tail_text_keeps_short_text() {
        assert_eq!(tail_text("abc", 4), "abc");
    }

    #[test]
    fn tail_text_counts_characters_not_bytes() {
        assert_eq!(tail_text("ççççç", 2), "...\nçç");
    }
}
