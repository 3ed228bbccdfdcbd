use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Metadata slot a label caption feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Official,
    Scientific,
    Genus,
    Species,
    Family,
    OtherNames,
    Author,
    AuthorsDisplay,
    AuthorsPeriod,
    Synonyms,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Official => "official",
            Field::Scientific => "scientific",
            Field::Genus => "genus",
            Field::Species => "species",
            Field::Family => "family",
            Field::OtherNames => "otherNames",
            Field::Author => "author",
            Field::AuthorsDisplay => "authorsDisplay",
            Field::AuthorsPeriod => "authorsPeriod",
            Field::Synonyms => "synonyms",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelMapping {
    pub field: Field,
    pub names: Vec<String>,
}

/// A line of the form `<caption>: <value>` whose caption is in the vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelLine<'a> {
    pub caption: &'a str,
    pub field: Field,
    pub value: &'a str,
}

const MAX_CAPTION_CHARS: usize = 60;

#[derive(Debug, Clone)]
pub struct LabelVocabulary {
    by_fold: HashMap<String, Field>,
    captions: Vec<(Field, String)>,
}

impl LabelVocabulary {
    pub fn new(mappings: &[LabelMapping]) -> Self {
        let mut by_fold = HashMap::new();
        let mut captions = Vec::new();
        for mapping in mappings {
            for name in &mapping.names {
                let folded = fold(name);
                if folded.is_empty() {
                    continue;
                }
                by_fold.entry(folded).or_insert(mapping.field);
                captions.push((mapping.field, name.nfc().collect()));
            }
        }
        LabelVocabulary { by_fold, captions }
    }

    pub fn field_for(&self, caption: &str) -> Option<Field> {
        self.by_fold.get(&fold(caption)).copied()
    }

    pub fn match_line<'a>(&self, line: &'a str) -> Option<LabelLine<'a>> {
        let idx = line.find([':', '：'])?;
        let caption = line[..idx].trim();
        if caption.is_empty() || caption.chars().count() > MAX_CAPTION_CHARS {
            return None;
        }
        let field = self.field_for(caption)?;
        let sep_len = line[idx..].chars().next().map_or(1, char::len_utf8);
        Some(LabelLine {
            caption,
            field,
            value: line[idx + sep_len..].trim(),
        })
    }

    /// True when `text` opens with a caption for `field` followed by more content,
    /// with or without the colon.
    pub fn starts_with_caption(&self, text: &str, field: Field) -> bool {
        let folded = fold(text);
        self.captions
            .iter()
            .filter(|(f, _)| *f == field)
            .any(|(_, caption)| {
                let cap = fold(caption);
                match folded.strip_prefix(cap.as_str()) {
                    Some(rest) if rest.starts_with([' ', ':', '：']) => {
                        !rest.trim_start_matches([' ', ':', '：']).is_empty()
                    }
                    _ => false,
                }
            })
    }

    pub fn captions(&self, field: Field) -> impl Iterator<Item = &str> {
        self.captions
            .iter()
            .filter(move |(f, _)| *f == field)
            .map(|(_, c)| c.as_str())
    }

    /// Case-insensitive alternation of every caption for `fields`, longest first.
    pub fn caption_alternation(&self, fields: &[Field]) -> String {
        let mut names: Vec<&str> = fields.iter().flat_map(|f| self.captions(*f)).collect();
        names.sort_by_key(|n| std::cmp::Reverse(n.len()));
        names.iter().map(|n| regex::escape(n)).collect::<Vec<_>>().join("|")
    }
}

/// Lowercase, drop every combining mark (Latin accents, Thai vowels and tones),
/// treat hyphens as spaces and collapse whitespace.
pub fn fold(s: &str) -> String {
    let folded: String = s
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c == '-' || c == '_' { ' ' } else { c })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}
