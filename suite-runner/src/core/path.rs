//! Helpers for normalizing caller-supplied relative paths and deriving slugs.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;

static SLUG_INVALID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9/_-]+").unwrap());

const SLUG_MAX_CHARS: usize = 120;

/// Normalize a UI-supplied relative path: trim, `\` to `/`, strip leading `/`.
pub fn normalize_rel(rel: &str) -> String {
    rel.trim().replace('\\', "/").trim_start_matches('/').to_string()
}

/// Render `rel` as a filesystem-safe run id label.
///
/// Runs of characters outside `[A-Za-z0-9/_-]` collapse to `_`, separators become
/// `__`, and the result is capped at 120 characters.
pub fn slug(rel: &str) -> String {
    let unified = rel.replace('\\', "/");
    let replaced = SLUG_INVALID.replace_all(&unified, "_");
    let trimmed = replaced.trim_matches('_').replace('/', "__");
    let capped: String = trimmed.chars().take(SLUG_MAX_CHARS).collect();
    if capped.is_empty() {
        "suite".to_string()
    } else {
        capped
    }
}

/// Compare names with runs of ASCII digits ordered by numeric value, so `run_9`
/// sorts before `run_10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let left = digit_chunks(a);
    let right = digit_chunks(b);
    for (x, y) in left.iter().zip(&right) {
        let ord = if starts_with_digit(x) && starts_with_digit(y) {
            let (x, y) = (x.trim_start_matches('0'), y.trim_start_matches('0'));
            x.len().cmp(&y.len()).then_with(|| x.cmp(y))
        } else {
            x.cmp(y)
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    left.len().cmp(&right.len()).then_with(|| a.cmp(b))
}

fn starts_with_digit(chunk: &str) -> bool {
    chunk.bytes().next().is_some_and(|b| b.is_ascii_digit())
}

/// Split `s` into maximal runs of ASCII digits and non-digits.
fn digit_chunks(s: &str) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut chunks = Vec::new();
    let mut start = 0;
    for i in 1..=bytes.len() {
        if i == bytes.len() || bytes[i].is_ascii_digit() != bytes[i - 1].is_ascii_digit() {
            chunks.push(&s[start..i]);
            start = i;
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_rel_unifies_separators_and_strips_root() {
        assert_eq!(
            normalize_rel("\\parte1-api\\questao1.1\\tests\\1.1test.robot"),
            "parte1-api/questao1.1/tests/1.1test.robot"
        );
        assert_eq!(normalize_rel("///etc/passwd"), "etc/passwd");
        assert_eq!(normalize_rel("  a/b  "), "a/b");
    }

    #[test]
    fn slug_replaces_separators_and_punctuation() {
        assert_eq!(
            slug("parte1-api/questao1.1/tests/1.1test.robot"),
            "parte1-api__questao1_1__tests__1_1test_robot"
        );
    }

    #[test]
    fn slug_falls_back_for_empty_input() {
        assert_eq!(slug("..."), "suite");
        assert_eq!(slug(""), "suite");
    }

    #[test]
    fn slug_is_capped() {
        let long = "a".repeat(300);
        assert_eq!(slug(&long).len(), 120);
    }

    #[test]
    fn natural_cmp_orders_numeric_suffixes_by_value() {
        let mut ids = vec![
            "20260101_090000_a_10",
            "20260101_090000_a",
            "20260101_090000_a_9",
            "20251231_235959_z",
            "20260101_090000_a_2",
        ];
        ids.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(
            ids,
            vec![
                "20251231_235959_z",
                "20260101_090000_a",
                "20260101_090000_a_2",
                "20260101_090000_a_9",
                "20260101_090000_a_10",
            ]
        );
        assert_eq!(natural_cmp("", ""), Ordering::Equal);
        assert_eq!(natural_cmp("a", "b"), Ordering::Less);
        assert_eq!(natural_cmp("r007", "r7"), Ordering::Less);
    }
}
