//! Text helpers shared by retrieval, guardrails and the pipeline

use regex_lite::Regex;
use std::sync::OnceLock;

static SCRIPT_BLOCK: OnceLock<Option<Regex>> = OnceLock::new();
static STYLE_BLOCK: OnceLock<Option<Regex>> = OnceLock::new();
static HTML_TAG: OnceLock<Option<Regex>> = OnceLock::new();
static URL: OnceLock<Option<Regex>> = OnceLock::new();
static WHITESPACE: OnceLock<Option<Regex>> = OnceLock::new();
static SENTENCE_END: OnceLock<Option<Regex>> = OnceLock::new();

fn pattern(cell: &'static OnceLock<Option<Regex>>, src: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(src).ok()).as_ref()
}

fn replace(cell: &'static OnceLock<Option<Regex>>, src: &str, text: &str, with: &str) -> String {
    match pattern(cell, src) {
        Some(re) => re.replace_all(text, with).into_owned(),
        None => text.to_string(),
    }
}

/// Strip markup, neutralize links and collapse whitespace in retrieved content
pub fn sanitize(text: &str) -> String {
    let text = replace(&SCRIPT_BLOCK, r"(?is)<script\b[^>]*>.*?</script>", text, " ");
    let text = replace(&STYLE_BLOCK, r"(?is)<style\b[^>]*>.*?</style>", &text, " ");
    let text = replace(&HTML_TAG, r"<[^>]+>", &text, " ");
    let text = replace(&URL, r"https?://\S+", &text, "[external-link]");
    let text = replace(&WHITESPACE, r"\s+", &text, " ");
    text.trim().to_string()
}

/// Lowercased alphanumeric tokens; keeps non-ASCII letters
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Non-empty sentences split on runs of `.`, `!` or `?`
pub fn sentences(text: &str) -> Vec<String> {
    let parts: Vec<String> = match pattern(&SENTENCE_END, r"[.!?]+") {
        Some(re) => re.split(text).map(|s| s.trim().to_string()).collect(),
        None => text.split(['.', '!', '?']).map(|s| s.trim().to_string()).collect(),
    };
    parts.into_iter().filter(|s| !s.is_empty()).collect()
}

/// Truncate to at most `max` characters without splitting a code point
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Cut at the last word boundary at or before `max` characters
pub fn truncate_at_word(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head = truncate_chars(text, max);
    match head.rfind(' ') {
        Some(idx) if idx > 0 => head[..idx].trim_end().to_string(),
        _ => head,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_markup_and_links() {
        let raw = "<p>Saturn <b>return</b></p><script>alert(1)</script> see https://example.com/x  now";
        assert_eq!(sanitize(raw), "Saturn return see [external-link] now");
    }

    #[test]
    fn test_tokenize_keeps_turkish_letters() {
        assert_eq!(tokenize("Yükselen, Burç!"), vec!["yükselen", "burç"]);
    }

    #[test]
    fn test_sentences() {
        let s = sentences("One. Two!! Three? ");
        assert_eq!(s, vec!["One", "Two", "Three"]);
    }

    #[test]
    fn test_truncate_at_word() {
        assert_eq!(truncate_at_word("alpha beta gamma", 12), "alpha beta");
        assert_eq!(truncate_at_word("short", 12), "short");
    }
}
