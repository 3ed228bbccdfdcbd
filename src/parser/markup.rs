use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Node};

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static BLOCK_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</(?:p|div|h[1-6]|li|tr|blockquote|pre|dt|dd|table|ul|ol)\s*>|<br\s*/?>").unwrap()
});
static ITALIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(i|em)\b[^>]*>(.*?)</(?:i|em)\s*>").unwrap());

pub const BLOCK_TAGS: &[&str] = &[
    "p", "div", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "li", "table", "thead", "tbody",
    "tfoot", "tr", "td", "th", "blockquote", "pre", "section", "article", "header", "footer",
    "main", "aside", "nav", "dl", "dt", "dd", "figure", "figcaption", "hr", "br", "body", "html",
    "center", "address",
];

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

pub fn strip_tags(html: &str) -> String {
    decode_entities(&TAG_RE.replace_all(html, " "))
}

/// Plain text of a markup string with one line per block-level element.
pub fn html_to_text(html: &str) -> String {
    let broken = BLOCK_END_RE.replace_all(html, "\n");
    decode_entities(&TAG_RE.replace_all(&broken, ""))
}

/// Text of the first `<i>`/`<em>` run in a markup string.
pub fn first_italic(markup: &str) -> Option<String> {
    ITALIC_RE.captures_iter(markup).find_map(|caps| {
        let text = strip_tags(&caps[2]);
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        (!text.is_empty()).then_some(text)
    })
}

/// Element text with `<br>` read as a space.
pub fn node_text(el: ElementRef) -> String {
    let mut out = String::new();
    for node in el.descendants() {
        match node.value() {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) if e.name() == "br" => out.push(' '),
            _ => {}
        }
    }
    out
}

pub fn is_block_tag(name: &str) -> bool {
    BLOCK_TAGS.contains(&name)
}

pub fn has_block_child(el: ElementRef) -> bool {
    el.children()
        .filter_map(ElementRef::wrap)
        .any(|c| is_block_tag(c.value().name()) && c.value().name() != "br")
}

/// A `<br>` directly inside `el`: each side of it is its own line.
pub fn has_line_break(el: ElementRef) -> bool {
    el.children()
        .filter_map(ElementRef::wrap)
        .any(|c| c.value().name() == "br")
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
