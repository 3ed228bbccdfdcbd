use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::error::{ImportError, PersistError, StoreError};
use crate::parser::ParsedEntry;
use crate::settings::PersistSettings;

const UNKNOWN_FIELD_MARKERS: &[&str] = &[
    "no column named",
    "has no column",
    "unknown field",
    "unknown argument",
    "unknown column",
    "no such column",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Taxonomy,
    Dictionary,
}

impl Collection {
    pub fn table(self) -> &'static str {
        match self {
            Collection::Taxonomy => "taxa",
            Collection::Dictionary => "dictionaryEntries",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Taxonomy => "taxonomy",
            Collection::Dictionary => "dictionary",
        }
    }

    /// Column/value pairs for one entry, before the HTML body and rank are chosen.
    pub fn row(self, parsed: &ParsedEntry, source_file: &str) -> Vec<(String, String)> {
        let m = &parsed.metadata;
        let mut row: Vec<(&str, Option<&str>)> = match self {
            Collection::Taxonomy => vec![
                ("title", Some(parsed.entry.title.as_str())),
                ("officialName", m.official.as_deref()),
                ("scientificName", m.scientific.as_deref()),
                ("genus", m.genus.as_deref()),
                ("species", m.species.as_deref()),
                ("family", m.family.as_deref()),
                ("authorsDisplay", m.authors_display.as_deref()),
                ("authorsPeriod", m.authors_period.as_deref()),
                ("otherNames", m.other_names.as_deref()),
                ("synonyms", m.synonyms.as_deref()),
                ("author", m.author.as_deref()),
            ],
            Collection::Dictionary => vec![
                ("headword", m.official.as_deref().or(Some(parsed.entry.title.as_str()))),
                ("scientificName", m.scientific.as_deref()),
                ("otherNames", m.other_names.as_deref()),
                ("synonyms", m.synonyms.as_deref()),
                ("author", m.author.as_deref()),
            ],
        };
        row.push(("excerpt", Some(parsed.sanitized.excerpt.as_str())));
        row.push(("sourceFile", Some(source_file)));
        row.into_iter()
            .filter_map(|(k, v)| v.map(|v| (k.to_string(), v.to_string())))
            .collect()
    }
}

impl FromStr for Collection {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "taxonomy" | "taxa" | "taxon" => Ok(Collection::Taxonomy),
            "dictionary" | "dictionaryentries" | "dictionary-entries" => Ok(Collection::Dictionary),
            _ => Err(ImportError::UnknownCollection(s.to_string())),
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Columns of a table and the values its `rank` CHECK constraint allows
/// (empty when unconstrained).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableShape {
    pub columns: HashSet<String>,
    pub rank_values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportRun {
    pub file_name: String,
    pub collection: Collection,
    pub entries: usize,
    pub saved: usize,
    pub warnings: Vec<String>,
}

pub trait RecordStore {
    /// `Ok(None)` when the store cannot describe its tables.
    fn describe(&self, table: &str) -> Result<Option<TableShape>, StoreError>;

    fn insert(&mut self, table: &str, row: &[(String, String)]) -> Result<i64, StoreError>;

    fn record_import(&mut self, _run: &ImportRun) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRecord {
    pub id: i64,
    pub table: &'static str,
    pub html_field: Option<String>,
    pub rank: Option<String>,
}

enum Rejection {
    UnknownField,
    Rank,
    Other(String),
}

fn classify(err: StoreError) -> Result<Rejection, PersistError> {
    match err {
        StoreError::Rejected(message) => {
            let lower = message.to_lowercase();
            Ok(if UNKNOWN_FIELD_MARKERS.iter().any(|m| lower.contains(m)) {
                Rejection::UnknownField
            } else if lower.contains("rank") {
                Rejection::Rank
            } else {
                Rejection::Other(message)
            })
        }
        other => Err(PersistError::Store(other)),
    }
}

/// Writes entries whose HTML column name and rank requirement vary across
/// deployments. Table shapes are described once and cached; without a shape
/// the candidates are tried in order.
pub struct Persister<S: RecordStore> {
    store: S,
    html_candidates: Vec<String>,
    rank_guesses: Vec<String>,
    introspect: bool,
    shapes: HashMap<&'static str, Option<TableShape>>,
}

impl<S: RecordStore> Persister<S> {
    pub fn new(store: S, settings: &PersistSettings) -> Self {
        Persister {
            store,
            html_candidates: settings.html_candidates.clone(),
            rank_guesses: settings.rank_guesses.clone(),
            introspect: settings.introspect,
            shapes: HashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn persist(
        &mut self,
        collection: Collection,
        parsed: &ParsedEntry,
        source_file: &str,
    ) -> Result<PersistedRecord, PersistError> {
        let table = collection.table();
        let base = collection.row(parsed, source_file);
        let html = parsed.sanitized.html.as_str();

        if let Some(shape) = self.shape(table) {
            let html_field = self
                .html_candidates
                .iter()
                .find(|c| shape.columns.contains(c.as_str()))
                .cloned();
            let rank = self.permitted_rank(&shape);
            let row = build_row(&base, html_field.as_deref(), html, rank.as_deref());
            match self.store.insert(table, &row) {
                Ok(id) => return Ok(PersistedRecord { id, table, html_field, rank }),
                Err(e) => match classify(e)? {
                    Rejection::Other(message) => {
                        return Err(PersistError::Rejected { table: table.to_string(), message })
                    }
                    _ => {
                        warn!("{} no longer matches its described layout, probing candidates", table);
                        self.shapes.remove(table);
                    }
                },
            }
        }

        self.insert_adaptive(table, &base, html)
    }

    fn shape(&mut self, table: &'static str) -> Option<TableShape> {
        if !self.introspect {
            return None;
        }
        if let Some(cached) = self.shapes.get(table) {
            return cached.clone();
        }
        let shape = match self.store.describe(table) {
            Ok(shape) => shape,
            Err(e) => {
                warn!("cannot describe {}: {}", table, e);
                None
            }
        };
        debug!("{} shape: {:?}", table, shape);
        self.shapes.insert(table, shape.clone());
        shape
    }

    fn permitted_rank(&self, shape: &TableShape) -> Option<String> {
        if !shape.columns.contains("rank") || shape.rank_values.is_empty() {
            return None;
        }
        self.rank_guesses
            .iter()
            .find(|g| shape.rank_values.contains(g))
            .or_else(|| shape.rank_values.first())
            .cloned()
    }

    /// Trial inserts: each HTML candidate, then none; a rank rejection switches
    /// to rank guesses for the current HTML choice.
    fn insert_adaptive(
        &mut self,
        table: &'static str,
        base: &[(String, String)],
        html: &str,
    ) -> Result<PersistedRecord, PersistError> {
        let choices: Vec<Option<String>> = self
            .html_candidates
            .iter()
            .cloned()
            .map(Some)
            .chain(std::iter::once(None))
            .collect();
        let mut tried = Vec::new();

        for html_field in choices {
            tried.push(html_field.clone().unwrap_or_else(|| "(no html)".to_string()));
            let row = build_row(base, html_field.as_deref(), html, None);
            let err = match self.store.insert(table, &row) {
                Ok(id) => return Ok(PersistedRecord { id, table, html_field, rank: None }),
                Err(e) => e,
            };
            match classify(err)? {
                Rejection::UnknownField => {
                    warn!("{} has no usable column {:?}, trying next candidate", table, html_field);
                }
                Rejection::Rank => return self.insert_by_rank(table, base, html, html_field, tried),
                Rejection::Other(message) => {
                    return Err(PersistError::Rejected { table: table.to_string(), message })
                }
            }
        }

        Err(PersistError::SchemaMismatch { table: table.to_string(), tried })
    }

    fn insert_by_rank(
        &mut self,
        table: &'static str,
        base: &[(String, String)],
        html: &str,
        html_field: Option<String>,
        mut tried: Vec<String>,
    ) -> Result<PersistedRecord, PersistError> {
        for guess in self.rank_guesses.clone() {
            warn!("{} requires a rank, trying {}", table, guess);
            tried.push(format!("rank={}", guess));
            let row = build_row(base, html_field.as_deref(), html, Some(&guess));
            let err = match self.store.insert(table, &row) {
                Ok(id) => {
                    return Ok(PersistedRecord { id, table, html_field, rank: Some(guess) });
                }
                Err(e) => e,
            };
            match classify(err)? {
                Rejection::Rank | Rejection::UnknownField => continue,
                Rejection::Other(message) => {
                    return Err(PersistError::Rejected { table: table.to_string(), message })
                }
            }
        }
        Err(PersistError::SchemaMismatch { table: table.to_string(), tried })
    }
}

fn build_row(
    base: &[(String, String)],
    html_field: Option<&str>,
    html: &str,
    rank: Option<&str>,
) -> Vec<(String, String)> {
    let mut row = base.to_vec();
    if let Some(field) = html_field {
        row.push((field.to_string(), html.to_string()));
    }
    if let Some(rank) = rank {
        row.push(("rank".to_string(), rank.to_string()));
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{DocumentParser, SourceDocument};
    use crate::settings::Settings;

    /// In-memory table that phrases rejections the way SQLite does.
    #[derive(Default)]
    struct MockStore {
        columns: HashSet<String>,
        rank_required: bool,
        rank_values: Vec<String>,
        describable: bool,
        other_failure: Option<String>,
        attempts: Vec<Vec<String>>,
        rows: Vec<Vec<(String, String)>>,
    }

    impl MockStore {
        fn with_columns(cols: &[&str]) -> Self {
            let mut columns: HashSet<String> =
                ["title", "officialName", "scientificName", "genus", "species", "family",
                 "authorsDisplay", "authorsPeriod", "otherNames", "synonyms", "author",
                 "excerpt", "sourceFile"]
                    .iter()
                    .map(|c| c.to_string())
                    .collect();
            columns.extend(cols.iter().map(|c| c.to_string()));
            MockStore { columns, ..Default::default() }
        }
    }

    impl RecordStore for MockStore {
        fn describe(&self, _table: &str) -> Result<Option<TableShape>, StoreError> {
            if !self.describable {
                return Ok(None);
            }
            Ok(Some(TableShape { columns: self.columns.clone(), rank_values: self.rank_values.clone() }))
        }

        fn insert(&mut self, table: &str, row: &[(String, String)]) -> Result<i64, StoreError> {
            self.attempts.push(row.iter().map(|(k, _)| k.clone()).collect());
            if let Some(msg) = &self.other_failure {
                return Err(StoreError::Rejected(msg.clone()));
            }
            if let Some((k, _)) = row.iter().find(|(k, _)| !self.columns.contains(k)) {
                return Err(StoreError::Rejected(format!("table {} has no column named {}", table, k)));
            }
            match row.iter().find(|(k, _)| k == "rank") {
                None if self.rank_required => {
                    return Err(StoreError::Rejected(format!("NOT NULL constraint failed: {}.rank", table)))
                }
                Some((_, v)) if !self.rank_values.is_empty() && !self.rank_values.contains(v) => {
                    return Err(StoreError::Rejected("CHECK constraint failed: rank_enum".into()))
                }
                _ => {}
            }
            self.rows.push(row.to_vec());
            Ok(self.rows.len() as i64)
        }
    }

    fn settings(introspect: bool) -> PersistSettings {
        let mut s = Settings::defaults().unwrap().persist;
        s.introspect = introspect;
        s
    }

    fn entry() -> ParsedEntry {
        let parser = DocumentParser::new(&Settings::defaults().unwrap()).unwrap();
        let doc = SourceDocument::from_text(
            "Scientific name: Tectona grandis\nFamily: Lamiaceae\n\nA tall tree.\n\nMore.\n\nAuthor of description: Somchai",
        );
        parser.parse(&doc).entries.remove(0)
    }

    fn html_field(row: &[(String, String)]) -> Option<&str> {
        row.iter()
            .find(|(k, _)| k.ends_with("Html") || k == "html")
            .map(|(k, _)| k.as_str())
    }

    #[test]
    fn unknown_html_field_falls_through_to_next_candidate() {
        let mut store = MockStore::with_columns(&["descriptionHtml"]);
        store.describable = false;
        let mut p = Persister::new(store, &settings(true));
        let rec = p.persist(Collection::Taxonomy, &entry(), "teak.txt").unwrap();
        assert_eq!(rec.html_field.as_deref(), Some("descriptionHtml"));
        assert_eq!(p.store().attempts.len(), 2);
        assert_eq!(html_field(&p.store().rows[0]), Some("descriptionHtml"));
    }

    #[test]
    fn described_table_inserts_once() {
        let mut store = MockStore::with_columns(&["bodyHtml", "rank"]);
        store.describable = true;
        store.rank_required = true;
        store.rank_values = vec!["GENUS".into(), "species".into()];
        let mut p = Persister::new(store, &settings(true));
        let rec = p.persist(Collection::Taxonomy, &entry(), "a").unwrap();
        assert_eq!(rec.html_field.as_deref(), Some("bodyHtml"));
        assert_eq!(rec.rank.as_deref(), Some("species"));
        p.persist(Collection::Taxonomy, &entry(), "a").unwrap();
        assert_eq!(p.store().attempts.len(), 2);
    }

    #[test]
    fn bare_insert_when_no_candidate_exists() {
        let store = MockStore::with_columns(&[]);
        let mut p = Persister::new(store, &settings(false));
        let rec = p.persist(Collection::Taxonomy, &entry(), "a").unwrap();
        assert_eq!(rec.html_field, None);
        assert_eq!(p.store().attempts.len(), 5);
    }

    #[test]
    fn rank_rejection_walks_guesses() {
        let mut store = MockStore::with_columns(&["contentHtml", "rank"]);
        store.rank_required = true;
        store.rank_values = vec!["Species".into()];
        let mut p = Persister::new(store, &settings(false));
        let rec = p.persist(Collection::Taxonomy, &entry(), "a").unwrap();
        assert_eq!(rec.html_field.as_deref(), Some("contentHtml"));
        assert_eq!(rec.rank.as_deref(), Some("Species"));
        // contentHtml, then SPECIES, species, Species
        assert_eq!(p.store().attempts.len(), 4);
    }

    #[test]
    fn exhausted_candidates_are_a_schema_mismatch() {
        let mut store = MockStore::with_columns(&["rank"]);
        store.rank_required = true;
        store.rank_values = vec!["SUBSPECIES".into()];
        let mut p = Persister::new(store, &settings(false));
        match p.persist(Collection::Taxonomy, &entry(), "a") {
            Err(PersistError::SchemaMismatch { table, tried }) => {
                assert_eq!(table, "taxa");
                assert_eq!(tried.len(), 5 + 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unrelated_rejection_aborts_without_retry() {
        let mut store = MockStore::with_columns(&["contentHtml"]);
        store.other_failure = Some("UNIQUE constraint failed: taxa.title".into());
        let mut p = Persister::new(store, &settings(false));
        let err = p.persist(Collection::Taxonomy, &entry(), "a").unwrap_err();
        assert!(matches!(err, PersistError::Rejected { .. }));
        assert_eq!(p.store().attempts.len(), 1);
    }

    #[test]
    fn stale_shape_falls_back_to_probing() {
        let mut store = MockStore::with_columns(&["descriptionHtml"]);
        store.describable = true;
        let mut p = Persister::new(store, &settings(true));
        p.store_mut().columns.insert("contentHtml".into());
        p.persist(Collection::Taxonomy, &entry(), "a").unwrap();
        p.store_mut().columns.remove("contentHtml");
        let rec = p.persist(Collection::Taxonomy, &entry(), "a").unwrap();
        assert_eq!(rec.html_field.as_deref(), Some("descriptionHtml"));
    }

    #[test]
    fn collection_names() {
        assert_eq!("Taxonomy".parse::<Collection>().unwrap(), Collection::Taxonomy);
        assert_eq!("dictionary".parse::<Collection>().unwrap().table(), "dictionaryEntries");
        assert!(matches!("plants".parse::<Collection>(), Err(ImportError::UnknownCollection(_))));
    }

    #[test]
    fn dictionary_row_uses_headword() {
        let row = Collection::Dictionary.row(&entry(), "d.txt");
        assert!(row.iter().any(|(k, v)| k == "headword" && v == "Tectona grandis"));
        assert!(!row.iter().any(|(k, _)| k == "genus"));
    }
}
