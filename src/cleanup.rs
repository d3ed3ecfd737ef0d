//! Strips URLs and link citations from research text before it is sent to
//! the proposal workflow.

use std::sync::LazyLock;

use regex::Regex;

/// A pattern and what matches are replaced with, applied in order.
struct Rule {
    pattern: LazyLock<Regex>,
    replacement: &'static str,
}

macro_rules! rule {
    ($pattern:expr, $replacement:expr) => {
        Rule {
            pattern: LazyLock::new(|| Regex::new($pattern).expect("valid regex")),
            replacement: $replacement,
        }
    };
}

static RULES: [Rule; 14] = [
    // ([www.example.com](https://example.com/...))
    rule!(r"\(\[www\.[^\]]+\]\(https?://[^)]+\)\)", ""),
    // [text](https://...) keeps the text
    rule!(r"\[([^\]]+)\]\(https?://[^)]+\)", "$1"),
    rule!(r"\(https?://[^)]+\)", ""),
    rule!(r"\(www\.[^)]+\)", ""),
    rule!(r"\[https?://[^\]]+\]", ""),
    rule!(r"\[www\.[^\]]+\]", ""),
    rule!(r"https?://[^\s)\](]+(?:#:~:text=[^\s)\](]+)?", ""),
    rule!(r"\bwww\.[^\s)\](]+", ""),
    rule!(r"\s+", " "),
    rule!(r"\s+\.", "."),
    rule!(r"\s+,", ","),
    rule!(r"\s+\)", ")"),
    rule!(r"\(\s+", "("),
    rule!(r"\s+\)", ")"),
];

/// Remove URLs from `text`, collapse whitespace and tidy the punctuation the
/// removals leave behind.
pub fn remove_urls(text: &str) -> String {
    let mut out = text.to_string();
    for rule in &RULES {
        out = rule.pattern.replace_all(&out, rule.replacement).into_owned();
    }
    out.trim().to_string()
}
