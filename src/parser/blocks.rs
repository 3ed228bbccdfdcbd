use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node};

use super::labels::LabelVocabulary;
use super::markup::{
    escape_html, has_block_child, has_line_break, is_block_tag, node_text, truncate_chars,
};
use super::normalize::Normalizer;

static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[•●○◦▪■□‣⁃➢►✓❖·]\s*|[-–—*]\s+)(\S.*)$").unwrap()
});
static ORDINAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[0-9]{1,3}|[๐-๙]{1,3})[.)]\s+(\S.*)$").unwrap());

pub const UNPARSED_TAG: &str = "[unparsed]";

const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "head", "title", "template"];

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading {
        level: u8,
        text: String,
    },
    Paragraph {
        text: String,
        /// Inner markup of the source node(s), when segmented from markup.
        markup: Option<String>,
    },
    List {
        ordered: bool,
        items: Vec<String>,
    },
    Label {
        name: String,
        value: String,
        markup: Option<String>,
    },
}

impl Block {
    /// The text this block was built from, with list glyphs and label colons normalised.
    pub fn source_text(&self) -> String {
        match self {
            Block::Heading { text, .. } | Block::Paragraph { text, .. } => text.clone(),
            Block::List { items, .. } => items.join("\n"),
            Block::Label { name, value, .. } if value.is_empty() => format!("{}:", name),
            Block::Label { name, value, .. } => format!("{}: {}", name, value),
        }
    }

    pub fn markup(&self) -> Option<&str> {
        match self {
            Block::Paragraph { markup, .. } | Block::Label { markup, .. } => markup.as_deref(),
            _ => None,
        }
    }

    pub fn to_html(&self) -> String {
        match self {
            Block::Heading { level, text } => {
                format!("<h{0}>{1}</h{0}>", level, escape_html(text))
            }
            Block::Paragraph { text, markup } => match markup {
                Some(m) => format!("<p>{}</p>", m),
                None => format!("<p>{}</p>", escape_html(text)),
            },
            Block::List { ordered, items } => {
                let tag = if *ordered { "ol" } else { "ul" };
                let lis: String = items
                    .iter()
                    .map(|i| format!("<li>{}</li>", escape_html(i)))
                    .collect();
                format!("<{0}>{1}</{0}>", tag, lis)
            }
            Block::Label { name, value, markup } => match markup {
                Some(m) => format!("<p class=\"label\">{}</p>", m),
                None => format!(
                    "<p class=\"label\"><span class=\"label-name\">{}:</span> {}</p>",
                    escape_html(name),
                    escape_html(value)
                ),
            },
        }
    }

    pub fn is_unparsed(&self) -> bool {
        matches!(self, Block::Paragraph { text, .. } if text.starts_with(UNPARSED_TAG))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Shape {
    Blank,
    Heading(u8),
    Item { ordered: bool },
    Label { name: String, value: String },
    Text,
}

#[derive(Debug, Clone)]
struct Line {
    text: String,
    markup: Option<String>,
    shape: Shape,
}

impl Line {
    fn blank() -> Self {
        Line { text: String::new(), markup: None, shape: Shape::Blank }
    }

    fn classify(text: &str, markup: Option<String>, vocab: &LabelVocabulary) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return Line::blank();
        }
        if let Some(caps) = BULLET_RE.captures(text) {
            return Line { text: caps[1].to_string(), markup: None, shape: Shape::Item { ordered: false } };
        }
        if let Some(caps) = ORDINAL_RE.captures(text) {
            return Line { text: caps[1].to_string(), markup: None, shape: Shape::Item { ordered: true } };
        }
        if let Some(label) = vocab.match_line(text) {
            return Line {
                text: text.to_string(),
                markup,
                shape: Shape::Label { name: label.caption.to_string(), value: label.value.to_string() },
            };
        }
        Line { text: text.to_string(), markup, shape: Shape::Text }
    }
}

enum Open {
    Paragraph(Vec<(String, Option<String>)>),
    List { ordered: bool, items: Vec<String> },
    Label { name: String, value: String, markup: Option<String> },
}

/// Folds classified lines into blocks. Blank lines only separate.
#[derive(Default)]
struct Grouper {
    blocks: Vec<Block>,
    open: Option<Open>,
}

impl Grouper {
    fn feed(&mut self, line: Line) {
        match line.shape {
            Shape::Blank => self.flush(),
            Shape::Heading(level) => {
                self.flush();
                self.blocks.push(Block::Heading { level, text: line.text });
            }
            Shape::Item { ordered } => match &mut self.open {
                Some(Open::List { ordered: o, items }) if *o == ordered => items.push(line.text),
                _ => {
                    self.flush();
                    self.open = Some(Open::List { ordered, items: vec![line.text] });
                }
            },
            Shape::Label { name, value } => {
                self.flush();
                self.open = Some(Open::Label { name, value, markup: line.markup });
            }
            Shape::Text => match &mut self.open {
                Some(Open::Label { value, markup, .. }) => {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(&line.text);
                    if let Some(m) = markup {
                        m.push(' ');
                        m.push_str(&line.markup.unwrap_or_else(|| escape_html(&line.text)));
                    }
                }
                Some(Open::Paragraph(lines)) => lines.push((line.text, line.markup)),
                _ => {
                    self.flush();
                    self.open = Some(Open::Paragraph(vec![(line.text, line.markup)]));
                }
            },
        }
    }

    fn flush(&mut self) {
        let Some(open) = self.open.take() else { return };
        let block = match open {
            Open::Paragraph(lines) => {
                let text = lines.iter().map(|(t, _)| t.as_str()).collect::<Vec<_>>().join(" ");
                let markup = lines.iter().any(|(_, m)| m.is_some()).then(|| {
                    lines
                        .iter()
                        .map(|(t, m)| m.clone().unwrap_or_else(|| escape_html(t)))
                        .collect::<Vec<_>>()
                        .join(" ")
                });
                Block::Paragraph { text, markup }
            }
            Open::List { ordered, items } => Block::List { ordered, items },
            Open::Label { name, value, markup } => Block::Label { name, value, markup },
        };
        self.blocks.push(block);
    }

    fn finish(mut self) -> Vec<Block> {
        self.flush();
        self.blocks
    }
}

/// Splits normalized text or markup into blocks using the label vocabulary.
pub struct Segmenter<'a> {
    vocabulary: &'a LabelVocabulary,
    unparsed_prefix_chars: usize,
}

impl<'a> Segmenter<'a> {
    pub fn new(vocabulary: &'a LabelVocabulary, unparsed_prefix_chars: usize) -> Self {
        Segmenter { vocabulary, unparsed_prefix_chars }
    }

    /// Line-by-line segmentation of normalized text. Never returns an empty list:
    /// degenerate input becomes one `[unparsed]` paragraph.
    pub fn segment(&self, text: &str) -> Vec<Block> {
        let mut grouper = Grouper::default();
        for raw in text.lines() {
            grouper.feed(Line::classify(raw, None, self.vocabulary));
        }
        let blocks = grouper.finish();
        if blocks.is_empty() {
            vec![self.unparsed(text)]
        } else {
            blocks
        }
    }

    /// Node-by-node segmentation of markup. May return an empty list when the
    /// markup carries no text; callers fall back to `segment`.
    pub fn segment_markup(&self, html: &str, normalizer: &Normalizer) -> Vec<Block> {
        let fragment = Html::parse_fragment(html);
        let mut lines = Vec::new();
        self.walk(fragment.root_element(), normalizer, &mut lines);
        let mut grouper = Grouper::default();
        for line in lines {
            grouper.feed(line);
        }
        grouper.finish()
    }

    pub fn unparsed(&self, text: &str) -> Block {
        let prefix = truncate_chars(text.trim(), self.unparsed_prefix_chars);
        let text = format!("{} {}", UNPARSED_TAG, prefix).trim_end().to_string();
        Block::Paragraph { text, markup: None }
    }

    fn walk(&self, element: ElementRef, normalizer: &Normalizer, out: &mut Vec<Line>) {
        let mut inline_text = String::new();
        let mut inline_markup = String::new();

        for child in element.children() {
            match child.value() {
                Node::Text(t) => {
                    inline_text.push_str(t);
                    inline_markup.push_str(&escape_html(t));
                }
                Node::Element(el) => {
                    let Some(child_ref) = ElementRef::wrap(child) else { continue };
                    let name = el.name();
                    if SKIPPED_TAGS.contains(&name) {
                        continue;
                    }
                    if !is_block_tag(name) {
                        inline_text.push_str(&node_text(child_ref));
                        inline_markup.push_str(&child_ref.html());
                        continue;
                    }
                    self.push_inline(&mut inline_text, &mut inline_markup, normalizer, out);
                    self.visit_block(child_ref, name, normalizer, out);
                }
                _ => {}
            }
        }
        self.push_inline(&mut inline_text, &mut inline_markup, normalizer, out);
    }

    fn visit_block(&self, el: ElementRef, name: &str, normalizer: &Normalizer, out: &mut Vec<Line>) {
        match name {
            "br" | "hr" => {}
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let text = normalizer.normalize_inline(&node_text(el));
                if !text.is_empty() {
                    let level = name[1..].parse().unwrap_or(1);
                    out.push(Line { text, markup: None, shape: Shape::Heading(level) });
                    out.push(Line::blank());
                }
            }
            "ul" | "ol" => {
                for li in el.children().filter_map(ElementRef::wrap) {
                    if li.value().name() != "li" {
                        continue;
                    }
                    let text = normalizer.normalize_inline(&node_text(li));
                    if text.is_empty() {
                        continue;
                    }
                    let line = Line::classify(&text, None, self.vocabulary);
                    let (text, ordered) = match line.shape {
                        Shape::Item { ordered } => (line.text, ordered || name == "ol"),
                        _ => (text, name == "ol"),
                    };
                    out.push(Line { text, markup: None, shape: Shape::Item { ordered } });
                }
                out.push(Line::blank());
            }
            "tr" => {
                let cells: Vec<String> = el
                    .children()
                    .filter_map(ElementRef::wrap)
                    .map(|c| normalizer.normalize_inline(&node_text(c)))
                    .filter(|t| !t.is_empty())
                    .collect();
                self.push_line(&cells.join(" "), None, out);
            }
            _ if has_block_child(el) || has_line_break(el) => self.walk(el, normalizer, out),
            _ => {
                let text = normalizer.normalize_inline(&node_text(el));
                let inner = el.inner_html();
                let markup = inner.contains('<').then(|| normalizer.normalize_inline(&inner));
                self.push_line(&text, markup, out);
            }
        }
    }

    fn push_inline(
        &self,
        text: &mut String,
        markup: &mut String,
        normalizer: &Normalizer,
        out: &mut Vec<Line>,
    ) {
        let t = normalizer.normalize_inline(text);
        if !t.is_empty() {
            let m = markup.contains('<').then(|| normalizer.normalize_inline(markup));
            self.push_line(&t, m, out);
        }
        text.clear();
        markup.clear();
    }

    /// One markup node is one line; everything but list items is closed off by a blank.
    fn push_line(&self, text: &str, markup: Option<String>, out: &mut Vec<Line>) {
        let line = Line::classify(text, markup, self.vocabulary);
        let is_item = matches!(line.shape, Shape::Item { .. });
        if line.shape == Shape::Blank {
            return;
        }
        out.push(line);
        if !is_item {
            out.push(Line::blank());
        }
    }
}
