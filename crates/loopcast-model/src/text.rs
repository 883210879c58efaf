use regex::Regex;
use std::sync::LazyLock;

/// Listing cards show at most this many characters of body text.
pub const PREVIEW_MAX_CHARS: usize = 200;

static SCRIPT_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("script/style regex")
});

/// Remove script and style blocks, elide remaining tags, and collapse
/// whitespace runs to single spaces.
#[must_use]
pub fn strip_tags(html: &str) -> String {
    let without_blocks = SCRIPT_STYLE_RE.replace_all(html, "");
    let mut out = String::with_capacity(without_blocks.len());
    let mut in_tag = false;
    for c in without_blocks.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Preview text for listing cards: the first 200 characters of the trimmed
/// markdown when present, otherwise of the stripped HTML.
#[must_use]
pub fn preview_text(markdown: Option<&str>, html: Option<&str>) -> Option<String> {
    if let Some(md) = markdown {
        if !md.is_empty() {
            return Some(truncate_chars(md.trim(), PREVIEW_MAX_CHARS));
        }
    }
    if let Some(h) = html {
        if !h.is_empty() {
            return Some(truncate_chars(&strip_tags(h), PREVIEW_MAX_CHARS));
        }
    }
    None
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
