use regex::Regex;

use super::Metadata;
use crate::parser::labels::{Field, LabelVocabulary};
use crate::parser::markup::decode_entities;

/// Fields the raw-markup scan may fill.
pub const FALLBACK_FIELDS: [Field; 4] = [Field::Family, Field::Synonyms, Field::OtherNames, Field::Author];

// Inline tags may wrap the caption or the colon; block tags end the value.
// Captions start on a word boundary so `Subfamily:` is not read as `Family:`.
const INLINE_TAG: &str = r"</?(?:span|b|strong|i|em|u|font|a|sup|sub|small)\b[^>]*>";

/// Caption regexes compiled from the label vocabulary.
#[derive(Debug, Clone)]
pub struct FallbackPatterns {
    fields: Vec<(Field, Regex)>,
    synonyms_mention: Option<Regex>,
}

impl FallbackPatterns {
    pub fn new(vocabulary: &LabelVocabulary) -> Result<Self, regex::Error> {
        let mut fields = Vec::new();
        for field in FALLBACK_FIELDS {
            let captions = vocabulary.caption_alternation(&[field]);
            if captions.is_empty() {
                continue;
            }
            let pattern = format!(
                r"(?i)\b(?:{captions})[ \t]*(?:{tag}[ \t]*)*[:：][ \t]*(?:{tag}[ \t]*)*([^<\n]+)",
                captions = captions,
                tag = INLINE_TAG,
            );
            fields.push((field, Regex::new(&pattern)?));
        }

        let synonyms = vocabulary.caption_alternation(&[Field::Synonyms]);
        let synonyms_mention = if synonyms.is_empty() {
            None
        } else {
            Some(Regex::new(&format!(
                r"(?im)\b(?:{s})[ \t]*[:：]|^[ \t]*(?:{s})[ \t]*$",
                s = synonyms
            ))?)
        };

        Ok(FallbackPatterns { fields, synonyms_mention })
    }

    /// Whether `text` carries a synonyms caption, with or without a value after it.
    pub fn mentions_synonyms(&self, text: &str) -> bool {
        self.synonyms_mention.as_ref().is_some_and(|re| re.is_match(text))
    }

    pub fn apply(&self, html: &str, text: &str, meta: &mut Metadata) {
        if self.mentions_synonyms(text) {
            meta.synonyms_label_present = true;
        }
        for (field, re) in &self.fields {
            if meta.get(*field).is_some() {
                continue;
            }
            let value = re.captures_iter(html).find_map(|caps| {
                let v = decode_entities(&caps[1]);
                let v = v.trim();
                (!v.is_empty()).then(|| v.to_string())
            });
            if let Some(v) = value {
                meta.fill(*field, &v);
            }
        }
    }
}
