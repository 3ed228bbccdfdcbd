use super::blocks::Block;
use super::labels::{Field, LabelVocabulary};
use super::markup::{first_italic, truncate_chars};

pub const PLACEHOLDER_TITLE: &str = "topic";

/// One catalog item's worth of blocks.
#[derive(Debug, Clone)]
pub struct Entry {
    pub title: String,
    pub html: String,
    pub text: String,
    pub blocks: Vec<Block>,
}

impl Entry {
    fn from_blocks(blocks: Vec<Block>, title_chars: usize) -> Self {
        let title = select_title(&blocks, title_chars);
        let html = blocks.iter().map(Block::to_html).collect::<Vec<_>>().join("\n");
        let text = blocks.iter().map(Block::source_text).collect::<Vec<_>>().join("\n");
        Entry { title, html, text, blocks }
    }
}

/// Group blocks into entries, closing an entry at each author-of-description marker.
///
/// With no marker the whole document is one entry. Blocks trailing the last
/// marker belong to the last entry, so n markers always give n entries.
pub fn split_entries(blocks: &[Block], vocab: &LabelVocabulary, title_chars: usize) -> Vec<Entry> {
    let mut groups: Vec<Vec<Block>> = Vec::new();
    let mut current: Vec<Block> = Vec::new();

    for block in blocks {
        current.push(block.clone());
        if is_author_marker(block, vocab) {
            groups.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        match groups.last_mut() {
            Some(last) => last.extend(current),
            None => groups.push(current),
        }
    }

    groups
        .into_iter()
        .filter(|g| !g.is_empty())
        .map(|g| Entry::from_blocks(g, title_chars))
        .collect()
}

pub fn is_author_marker(block: &Block, vocab: &LabelVocabulary) -> bool {
    match block {
        Block::Label { name, value, .. } => {
            vocab.field_for(name) == Some(Field::Author) && !value.trim().is_empty()
        }
        Block::Paragraph { text, .. } => vocab.starts_with_caption(text, Field::Author),
        _ => false,
    }
}

/// Heading, then first italic run, then first label value, then the first
/// block's text, then the placeholder.
fn select_title(blocks: &[Block], title_chars: usize) -> String {
    let heading = blocks.iter().find_map(|b| match b {
        Block::Heading { text, .. } if !text.trim().is_empty() => Some(text.clone()),
        _ => None,
    });
    let italic = || blocks.iter().filter_map(Block::markup).find_map(first_italic);
    let label = || {
        blocks.iter().find_map(|b| match b {
            Block::Label { value, .. } if !value.trim().is_empty() => Some(value.clone()),
            _ => None,
        })
    };
    let first = || {
        blocks
            .iter()
            .map(Block::source_text)
            .find(|t| !t.trim().is_empty())
    };

    heading
        .or_else(italic)
        .or_else(label)
        .or_else(first)
        .map(|t| truncate_chars(t.trim(), title_chars))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| PLACEHOLDER_TITLE.to_string())
}
