pub mod emphasis;
pub mod fallback;

use std::collections::HashSet;

use serde::Serialize;

use super::blocks::Block;
use super::entries::Entry;
use super::labels::{Field, LabelVocabulary};
use super::normalize::Normalizer;
use fallback::FallbackPatterns;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub official: Option<String>,
    pub scientific: Option<String>,
    pub genus: Option<String>,
    pub species: Option<String>,
    pub authors_display: Option<String>,
    pub authors_period: Option<String>,
    pub other_names: Option<String>,
    pub author: Option<String>,
    pub synonyms: Option<String>,
    pub family: Option<String>,
    /// A synonyms caption was seen, whether or not a value was captured.
    pub synonyms_label_present: bool,
}

impl Metadata {
    pub fn get(&self, field: Field) -> Option<&str> {
        let slot = match field {
            Field::Official => &self.official,
            Field::Scientific => &self.scientific,
            Field::Genus => &self.genus,
            Field::Species => &self.species,
            Field::Family => &self.family,
            Field::OtherNames => &self.other_names,
            Field::Author => &self.author,
            Field::AuthorsDisplay => &self.authors_display,
            Field::AuthorsPeriod => &self.authors_period,
            Field::Synonyms => &self.synonyms,
        };
        slot.as_deref()
    }

    fn slot_mut(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Official => &mut self.official,
            Field::Scientific => &mut self.scientific,
            Field::Genus => &mut self.genus,
            Field::Species => &mut self.species,
            Field::Family => &mut self.family,
            Field::OtherNames => &mut self.other_names,
            Field::Author => &mut self.author,
            Field::AuthorsDisplay => &mut self.authors_display,
            Field::AuthorsPeriod => &mut self.authors_period,
            Field::Synonyms => &mut self.synonyms,
        }
    }

    /// Set `field` unless it already holds a value. Blank values are ignored.
    pub fn fill(&mut self, field: Field, value: &str) -> bool {
        let value = value.trim();
        let slot = self.slot_mut(field);
        if slot.is_some() || value.is_empty() {
            return false;
        }
        *slot = Some(value.to_string());
        true
    }

    fn renormalize(&mut self, normalizer: &Normalizer) {
        for field in ALL_FIELDS {
            let slot = self.slot_mut(field);
            *slot = slot
                .take()
                .map(|v| normalizer.normalize_inline(&v))
                .filter(|v| !v.is_empty());
        }
    }
}

const ALL_FIELDS: [Field; 10] = [
    Field::Official,
    Field::Scientific,
    Field::Genus,
    Field::Species,
    Field::Family,
    Field::OtherNames,
    Field::Author,
    Field::AuthorsDisplay,
    Field::AuthorsPeriod,
    Field::Synonyms,
];

/// Three best-effort passes: emphasis, labels, then raw-markup regexes.
/// Later passes only fill what earlier ones left empty.
pub struct MetadataExtractor<'a> {
    vocabulary: &'a LabelVocabulary,
    normalizer: &'a Normalizer,
    fallback: &'a FallbackPatterns,
}

impl<'a> MetadataExtractor<'a> {
    pub fn new(
        vocabulary: &'a LabelVocabulary,
        normalizer: &'a Normalizer,
        fallback: &'a FallbackPatterns,
    ) -> Self {
        MetadataExtractor { vocabulary, normalizer, fallback }
    }

    pub fn extract(&self, entry: &Entry) -> Metadata {
        let mut meta = Metadata::default();
        emphasis::extract(&entry.html, self.vocabulary, &mut meta);
        self.label_pass(&entry.blocks, &mut meta);
        self.fallback.apply(&entry.html, &entry.text, &mut meta);
        derive_names(&mut meta);
        meta.renormalize(self.normalizer);
        meta
    }

    fn label_pass(&self, blocks: &[Block], meta: &mut Metadata) {
        let mut seen: HashSet<Field> = HashSet::new();
        for (i, block) in blocks.iter().enumerate() {
            let Block::Label { name, value, .. } = block else { continue };
            let Some(field) = self.vocabulary.field_for(name) else { continue };
            if field == Field::Synonyms {
                meta.synonyms_label_present = true;
            }
            if seen.contains(&field) {
                continue;
            }
            let value = match (value.trim().is_empty(), blocks.get(i + 1)) {
                (true, Some(Block::List { items, .. })) => items.join("; "),
                _ => value.clone(),
            };
            if value.trim().is_empty() {
                continue;
            }
            seen.insert(field);
            meta.fill(field, &value);
        }
    }
}

/// `scientific` from `genus species` and the reverse, whichever is missing.
fn derive_names(meta: &mut Metadata) {
    if meta.scientific.is_none() {
        if let (Some(g), Some(s)) = (&meta.genus, &meta.species) {
            meta.scientific = Some(format!("{} {}", g, s));
        }
    }
    if let Some(sci) = meta.scientific.clone() {
        let mut tokens = sci.split_whitespace();
        if let Some(g) = tokens.next() {
            meta.fill(Field::Genus, g);
        }
        if let Some(s) = tokens.next() {
            meta.fill(Field::Species, s);
        }
    }
}
