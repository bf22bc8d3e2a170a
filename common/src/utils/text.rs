use std::fmt::Write as _;

use sha2::{Digest, Sha256};

/// Rough token estimate at four characters per token, used for admission
/// checks and chunk sizing. Intentionally model-agnostic.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Normalizes whitespace and strips control characters. The cleaned text is
/// what gets hashed, chunked and embedded.
pub fn clean_text(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut last_was_space = true;
    for c in text.chars() {
        if c.is_control() && c != '\n' {
            continue;
        }
        if c == ' ' || c == '\t' {
            if !last_was_space {
                cleaned.push(' ');
            }
            last_was_space = true;
        } else {
            cleaned.push(c);
            last_was_space = c == '\n';
        }
    }
    cleaned.trim().to_string()
}

/// SHA-256 over the cleaned text, hex-encoded. Duplicate detection key.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

const ENGLISH_STOPWORDS: [&str; 16] = [
    "the", "and", "is", "are", "was", "of", "to", "in", "that", "it", "for", "with", "on", "as",
    "this", "at",
];

/// Detects the language of a text. `auto` requests always run this; there
/// is no silent fallback. Returns a BCP-47-ish code, `und` when the text
/// gives no usable signal.
pub fn detect_language(text: &str) -> String {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    if words.is_empty() {
        return "und".to_string();
    }

    let stopword_hits = words
        .iter()
        .filter(|word| ENGLISH_STOPWORDS.contains(&word.trim_matches(|c: char| !c.is_alphanumeric())))
        .count();
    let non_ascii = text.chars().filter(|c| !c.is_ascii()).count();
    let non_ascii_ratio = non_ascii as f32 / text.chars().count().max(1) as f32;

    if stopword_hits >= 1 && non_ascii_ratio < 0.2 {
        "en".to_string()
    } else {
        "und".to_string()
    }
}

/// Resolves a document's language field: `auto` triggers detection,
/// anything else is taken verbatim.
pub fn resolve_language(requested: &str, text: &str) -> String {
    if requested.eq_ignore_ascii_case("auto") {
        detect_language(text)
    } else {
        requested.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn clean_text_collapses_whitespace_and_strips_controls() {
        assert_eq!(clean_text("  hello\t\tworld \u{0000} "), "hello world");
        assert_eq!(clean_text("line one\nline two"), "line one\nline two");
    }

    #[test]
    fn content_hash_is_deterministic_and_hex() {
        let a = content_hash("hello world hello");
        let b = content_hash("hello world hello");
        let c = content_hash("something else");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn detect_language_recognizes_english_prose() {
        assert_eq!(
            detect_language("the quick brown fox jumps over the lazy dog"),
            "en"
        );
        assert_eq!(detect_language(""), "und");
        assert_eq!(detect_language("zxcv qwer asdf"), "und");
    }

    #[test]
    fn resolve_language_only_detects_on_auto() {
        assert_eq!(resolve_language("sv", "the cat is here"), "sv");
        assert_eq!(resolve_language("auto", "the cat is here"), "en");
        assert_eq!(resolve_language("AUTO", "zxcv"), "und");
    }
}
