pub mod blocks;
pub mod entries;
pub mod extract;
pub mod labels;
pub mod markup;
pub mod normalize;
pub mod sanitize;

use scraper::Html;
use serde::Serialize;
use tracing::debug;

use crate::settings::Settings;
use blocks::{Block, Segmenter};
use entries::{split_entries, Entry};
use extract::fallback::FallbackPatterns;
use extract::{Metadata, MetadataExtractor};
use labels::LabelVocabulary;
use markup::{html_to_text, truncate_chars};
use normalize::Normalizer;
use sanitize::{Sanitized, Sanitizer};

/// What a format reader hands to the pipeline.
#[derive(Debug, Clone, Default)]
pub struct SourceDocument {
    pub html: String,
    pub text: String,
    /// `html` carries real document structure, not a wrapper around `text`.
    pub has_markup: bool,
}

impl SourceDocument {
    pub fn from_text(text: impl Into<String>) -> Self {
        SourceDocument { html: String::new(), text: text.into(), has_markup: false }
    }

    pub fn from_html(html: impl Into<String>) -> Self {
        let html = html.into();
        let text = html_to_text(&html);
        SourceDocument { html, text, has_markup: true }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedEntry {
    pub entry: Entry,
    pub metadata: Metadata,
    pub sanitized: Sanitized,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStats {
    pub paragraphs: usize,
    pub html_length: usize,
    pub sections: usize,
    pub dom_nodes: usize,
}

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub entries: Vec<ParsedEntry>,
    /// Segmentation fell back to a single `[unparsed]` block.
    pub degraded: bool,
    pub stats: DocumentStats,
    pub preview_html: String,
}

/// normalize → segment → split → extract → sanitize, compiled once from settings.
pub struct DocumentParser {
    normalizer: Normalizer,
    vocabulary: LabelVocabulary,
    fallback: FallbackPatterns,
    sanitizer: Sanitizer,
    title_chars: usize,
    preview_chars: usize,
    unparsed_prefix_chars: usize,
}

impl DocumentParser {
    pub fn new(settings: &Settings) -> Result<Self, regex::Error> {
        let normalizer = Normalizer::new(&settings.garble)?;
        let vocabulary = LabelVocabulary::new(&settings.labels);
        let fallback = FallbackPatterns::new(&vocabulary)?;
        let sanitizer = Sanitizer::new(&vocabulary, settings.excerpt_chars);
        Ok(DocumentParser {
            normalizer,
            vocabulary,
            fallback,
            sanitizer,
            title_chars: settings.title_chars,
            preview_chars: settings.preview_chars,
            unparsed_prefix_chars: settings.unparsed_prefix_chars,
        })
    }

    pub fn parse(&self, doc: &SourceDocument) -> ParsedDocument {
        let blocks = self.segment(doc);
        let degraded = matches!(blocks.as_slice(), [only] if only.is_unparsed());
        let entries = split_entries(&blocks, &self.vocabulary, self.title_chars);
        debug!("{} blocks, {} entries", blocks.len(), entries.len());

        let extractor = MetadataExtractor::new(&self.vocabulary, &self.normalizer, &self.fallback);
        let entries: Vec<ParsedEntry> = entries
            .into_iter()
            .map(|entry| {
                let metadata = extractor.extract(&entry);
                let sanitized = self.sanitizer.sanitize(&entry.html, &metadata);
                ParsedEntry { entry, metadata, sanitized }
            })
            .collect();

        let rendered = entries.iter().map(|e| e.entry.html.as_str()).collect::<Vec<_>>().join("\n");
        let stats = DocumentStats {
            paragraphs: blocks
                .iter()
                .filter(|b| matches!(b, Block::Paragraph { .. } | Block::Label { .. }))
                .count(),
            html_length: rendered.chars().count(),
            sections: entries.len(),
            dom_nodes: count_elements(&rendered),
        };

        ParsedDocument {
            preview_html: truncate_chars(&rendered, self.preview_chars),
            entries,
            degraded,
            stats,
        }
    }

    /// Markup first when there is any; plain text when markup yields nothing.
    fn segment(&self, doc: &SourceDocument) -> Vec<Block> {
        let segmenter = Segmenter::new(&self.vocabulary, self.unparsed_prefix_chars);
        if doc.has_markup && !doc.html.trim().is_empty() {
            let blocks = segmenter.segment_markup(&doc.html, &self.normalizer);
            if !blocks.is_empty() {
                return blocks;
            }
            debug!("markup produced no blocks, segmenting plain text");
        }
        let text = if doc.text.trim().is_empty() && !doc.html.is_empty() {
            html_to_text(&doc.html)
        } else {
            doc.text.clone()
        };
        segmenter.segment(&self.normalizer.normalize(&text))
    }
}

fn count_elements(html: &str) -> usize {
    if html.is_empty() {
        return 0;
    }
    let fragment = Html::parse_fragment(html);
    // The fragment root is a synthetic <html> element.
    fragment.root_element().descendants().filter(|n| n.value().is_element()).count() - 1
}
