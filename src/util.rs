use scraper::{ElementRef, Selector};
use url::Url;

pub fn sel(selector: &str) -> Selector {
    Selector::parse(selector).unwrap()
}

/// All text of the first element matching `sel`, trimmed
pub fn get_text(e: &ElementRef, sel: &Selector) -> Option<String> {
    e.select(sel).next().map(|v| element_text(&v).trim().into())
}

/// Concatenated text of an element and all its descendants
pub fn element_text(e: &ElementRef) -> String {
    e.text().collect()
}

/// Like [`element_text`], but gives up once the text reaches `limit` chars, since we're only
/// interested in short snippets and don't want to collect whole documents for every ancestor.
pub fn bounded_text(e: &ElementRef, limit: usize) -> Option<String> {
    let mut out = String::new();
    let mut count = 0;
    for t in e.text() {
        count += t.chars().count();
        if count >= limit {
            return None;
        }
        out.push_str(t);
    }
    Some(out)
}

pub fn reduce_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Truncate to at most `max` chars, never splitting a char
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Resolve a possibly relative `href` against `base`.
/// Protocol relative links inherit the scheme of `base`.
pub fn absolutize(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    Url::parse(base)
        .and_then(|b| b.join(href))
        .map(String::from)
        .ok()
}
