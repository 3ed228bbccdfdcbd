use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node};
use tracing::warn;

use super::extract::Metadata;
use super::labels::{fold, Field, LabelVocabulary};
use super::markup::{html_to_text, is_block_tag, node_text, truncate_chars};

static BLOCK_EDGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(/?)(?:p|div|h[1-6]|li|ul|ol|tr|table|blockquote|pre|dt|dd|section|article)\b[^>]*>|<br\s*/?>")
        .unwrap()
});

/// Label categories whose values already live in metadata.
const CAPTURED: [Field; 4] = [Field::Scientific, Field::Family, Field::OtherNames, Field::Synonyms];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sanitized {
    pub excerpt: String,
    pub html: String,
    pub text: String,
}

pub struct Sanitizer {
    vocabulary: LabelVocabulary,
    excerpt_chars: usize,
    label_paragraph: Option<Regex>,
}

impl Sanitizer {
    pub fn new(vocabulary: &LabelVocabulary, excerpt_chars: usize) -> Self {
        let captions = vocabulary.caption_alternation(&CAPTURED);
        let label_paragraph = if captions.is_empty() {
            None
        } else {
            let pattern = ["p", "div", "li"]
                .iter()
                .map(|tag| {
                    format!(
                        r"<{t}\b[^>]*>\s*(?:<[^>]+>\s*)*(?:{c})\s*(?:<[^>]+>\s*)*[:：].*?</{t}\s*>",
                        t = tag,
                        c = captions
                    )
                })
                .collect::<Vec<_>>()
                .join("|");
            let pattern = format!("(?is){}", pattern);
            match Regex::new(&pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("label deletion pattern unavailable: {}", e);
                    None
                }
            }
        };
        Sanitizer { vocabulary: vocabulary.clone(), excerpt_chars, label_paragraph }
    }

    /// Drop what metadata already holds, then split off the first remaining
    /// block as the excerpt. Never fails: degrades to regex deletion, then to
    /// the input unchanged.
    pub fn sanitize(&self, html: &str, meta: &Metadata) -> Sanitized {
        if let Some(s) = self.structural(html, meta) {
            return s;
        }
        warn!("no block structure in entry markup, using pattern deletion");
        match &self.label_paragraph {
            Some(re) => self.split_first(&re.replace_all(html, "")),
            None => {
                warn!("pattern deletion unavailable, keeping entry markup as is");
                let text = html_to_text(html);
                Sanitized {
                    excerpt: truncate_chars(first_line(&text), self.excerpt_chars),
                    html: html.to_string(),
                    text: text.trim().to_string(),
                }
            }
        }
    }

    fn structural(&self, html: &str, meta: &Metadata) -> Option<Sanitized> {
        let fragment = Html::parse_fragment(html);
        let root = fragment.root_element();
        let nodes: Vec<ElementRef> = root
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|el| is_block_tag(el.value().name()))
            .collect();
        if nodes.is_empty() {
            return None;
        }
        let stray_text = root.children().any(|n| matches!(n.value(), Node::Text(t) if !t.trim().is_empty()));
        if stray_text {
            return None;
        }

        let names = header_names(meta);
        let mut kept: Vec<(String, String)> = Vec::new();
        // A captured label with no inline value owns the list right after it.
        let mut owned_list = false;
        for el in nodes {
            let is_list = matches!(el.value().name(), "ul" | "ol");
            if std::mem::take(&mut owned_list) && is_list {
                continue;
            }
            let text = node_text(el).split_whitespace().collect::<Vec<_>>().join(" ");
            if text.is_empty() {
                continue;
            }
            if let Some(line) = self.vocabulary.match_line(&text) {
                if CAPTURED.contains(&line.field) {
                    owned_list = line.value.is_empty();
                    continue;
                }
            }
            if kept.is_empty() && repeats_name(&text, &names) {
                continue;
            }
            kept.push((text, el.html()));
        }

        let mut kept = kept.into_iter();
        let excerpt = kept
            .next()
            .map(|(text, _)| truncate_chars(&text, self.excerpt_chars))
            .unwrap_or_default();
        let (texts, htmls): (Vec<String>, Vec<String>) = kept.unzip();
        Some(Sanitized { excerpt, html: htmls.join("\n"), text: texts.join("\n") })
    }

    /// Cut at the first block edge that closes some text: that prefix is the
    /// excerpt, the rest is the body.
    fn split_first(&self, html: &str) -> Sanitized {
        let cut = BLOCK_EDGE_RE
            .captures_iter(html)
            .filter_map(|caps| {
                let m = caps.get(0)?;
                // Group 1 only takes part for block tags; `<br>` leaves it unset.
                let opening = caps.get(1).is_some_and(|slash| slash.as_str().is_empty());
                Some(if opening { m.start() } else { m.end() })
            })
            .find(|&at| !html_to_text(&html[..at]).trim().is_empty())
            .unwrap_or(html.len());
        let (first, rest) = html.split_at(cut);

        let first = html_to_text(first).split_whitespace().collect::<Vec<_>>().join(" ");
        let text = html_to_text(rest);
        let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        Sanitized {
            excerpt: truncate_chars(&first, self.excerpt_chars),
            html: rest.trim().to_string(),
            text: lines.join("\n"),
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}

fn header_names(meta: &Metadata) -> Vec<String> {
    let binomial = match (&meta.genus, &meta.species) {
        (Some(g), Some(s)) => Some(format!("{} {}", g, s)),
        _ => None,
    };
    [meta.scientific.clone(), binomial, meta.official.clone()]
        .into_iter()
        .flatten()
        .map(|n| fold(&n))
        .filter(|n| !n.is_empty())
        .collect()
}

const HEADER_SLACK_CHARS: usize = 40;

/// A leading line that restates the headword or binomial.
fn repeats_name(text: &str, names: &[String]) -> bool {
    let folded = fold(text);
    let len = folded.chars().count();
    names.iter().any(|n| {
        folded == *n
            || folded.starts_with(&format!("{} ", n))
            || (folded.contains(n.as_str()) && len <= n.chars().count() + HEADER_SLACK_CHARS)
    })
}
