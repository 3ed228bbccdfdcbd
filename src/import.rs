use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{ImportError, PersistError};
use crate::parser::entries::PLACEHOLDER_TITLE;
use crate::parser::extract::Metadata;
use crate::parser::{DocumentParser, DocumentStats, ParsedDocument, ParsedEntry};
use crate::persist::{Collection, ImportRun, PersistedRecord, Persister, RecordStore};
use crate::reader::{self, Format};

/// A file as received, before format detection.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn from_path(path: &Path) -> std::io::Result<Upload> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Upload { file_name, content_type: None, bytes: std::fs::read(path)? })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub ok: bool,
    pub message: String,
    pub stats: DocumentStats,
    pub preview_html: String,
    pub created: Vec<CreatedRecord>,
    pub warnings: Vec<String>,
    pub entries: Vec<EntrySummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRecord {
    pub id: i64,
    pub title: String,
    /// Blocks that made up the entry.
    pub entries: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySummary {
    pub index: usize,
    pub title: String,
    pub excerpt: String,
    pub metadata: Metadata,
    pub warnings: Vec<String>,
}

/// Size check, format detection, reading and parsing. Nothing is written.
pub fn parse_upload(
    parser: &DocumentParser,
    max_upload_bytes: usize,
    upload: &Upload,
) -> Result<ParsedDocument, ImportError> {
    if upload.bytes.len() > max_upload_bytes {
        return Err(ImportError::TooLarge { size: upload.bytes.len(), max: max_upload_bytes });
    }
    let format = Format::detect(&upload.file_name, upload.content_type.as_deref())?;
    let source = reader::read(format, &upload.bytes)?;
    Ok(parser.parse(&source))
}

pub fn preview(parsed: &ParsedDocument, collection: Collection, file_name: &str) -> ImportReport {
    let outcomes = parsed.entries.iter().map(|_| None).collect();
    assemble(parsed, collection, file_name, outcomes)
}

/// Persists every entry, one at a time. A failed entry becomes a warning and
/// its siblings are still written.
pub fn commit<S: RecordStore>(
    parsed: &ParsedDocument,
    collection: Collection,
    file_name: &str,
    persister: &mut Persister<S>,
) -> ImportReport {
    let outcomes = parsed
        .entries
        .iter()
        .map(|e| Some(persister.persist(collection, e, file_name)))
        .collect();
    let report = assemble(parsed, collection, file_name, outcomes);

    let run = ImportRun {
        file_name: file_name.to_string(),
        collection,
        entries: parsed.entries.len(),
        saved: report.created.len(),
        warnings: report.warnings.clone(),
    };
    if let Err(e) = persister.store_mut().record_import(&run) {
        warn!("import ledger not updated for {}: {}", file_name, e);
    }
    report
}

fn assemble(
    parsed: &ParsedDocument,
    collection: Collection,
    file_name: &str,
    outcomes: Vec<Option<Result<PersistedRecord, PersistError>>>,
) -> ImportReport {
    let committing = outcomes.iter().any(Option::is_some);
    let mut created = Vec::new();
    let mut warnings = Vec::new();
    let mut entries = Vec::new();

    if parsed.degraded {
        warnings.push(format!(
            "{}: no structure recognised, content kept as a single unparsed block",
            file_name
        ));
    }

    for (i, (pe, outcome)) in parsed.entries.iter().zip(outcomes).enumerate() {
        let index = i + 1;
        let saved = match outcome {
            Some(Ok(record)) => Some(record),
            Some(Err(e)) => {
                warn!("entry #{} of {} not saved: {}", index, file_name, e);
                warnings.push(format!("\"{}\" was not saved: {}", pe.entry.title, e));
                None
            }
            None => None,
        };
        let reference = match &saved {
            Some(record) => record.id.to_string(),
            None => format!("#{}", index),
        };

        let entry_warnings: Vec<String> = metadata_misses(collection, pe)
            .into_iter()
            .map(|m| format!("entry {}: {}", reference, m))
            .collect();
        if pe.metadata.synonyms_label_present && pe.metadata.synonyms.is_none() {
            warnings.push(format!(
                "entry {}: synonyms label present but no synonyms were captured",
                reference
            ));
        }

        if let Some(record) = saved {
            created.push(CreatedRecord {
                id: record.id,
                title: pe.entry.title.clone(),
                entries: pe.entry.blocks.len(),
                warnings: entry_warnings.clone(),
            });
        }
        entries.push(EntrySummary {
            index,
            title: pe.entry.title.clone(),
            excerpt: pe.sanitized.excerpt.clone(),
            metadata: pe.metadata.clone(),
            warnings: entry_warnings,
        });
    }

    let total = parsed.entries.len();
    let ok = !(committing && total > 0 && created.is_empty());
    let message = if committing {
        format!("Imported {} of {} entries into {}", created.len(), total, collection)
    } else {
        format!("Parsed {} entries (preview only)", total)
    };
    info!(
        file = file_name,
        collection = collection.as_str(),
        entries = total,
        saved = created.len(),
        warnings = warnings.len(),
        "{}",
        message
    );

    ImportReport {
        ok,
        message,
        stats: parsed.stats.clone(),
        preview_html: parsed.preview_html.clone(),
        created,
        warnings,
        entries,
    }
}

fn metadata_misses(collection: Collection, pe: &ParsedEntry) -> Vec<&'static str> {
    let m = &pe.metadata;
    let mut misses = Vec::new();
    match collection {
        Collection::Taxonomy => {
            if m.scientific.is_none() {
                misses.push("no scientific name found");
            }
            if m.family.is_none() {
                misses.push("no family found");
            }
        }
        Collection::Dictionary => {
            if m.official.is_none() && pe.entry.title == PLACEHOLDER_TITLE {
                misses.push("no headword found");
            }
        }
    }
    if pe.entry.blocks.iter().any(|b| b.is_unparsed()) {
        misses.push("entry text could not be segmented");
    }
    misses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_schema, SqliteStore};
    use crate::parser::SourceDocument;
    use crate::settings::Settings;
    use rusqlite::Connection;

    fn parser() -> DocumentParser {
        DocumentParser::new(&Settings::defaults().unwrap()).unwrap()
    }

    fn upload(name: &str) -> Upload {
        let path = format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name);
        let upload = Upload::from_path(Path::new(&path)).unwrap();
        assert_eq!(upload.file_name, name);
        upload
    }

    fn persister(conn: Connection) -> Persister<SqliteStore> {
        Persister::new(SqliteStore::new(conn), &Settings::defaults().unwrap().persist)
    }

    fn schema() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn commit_two_entries() {
        let parsed = parse_upload(&parser(), 1 << 20, &upload("two_entries.txt")).unwrap();
        let mut p = persister(schema());
        let report = commit(&parsed, Collection::Taxonomy, "two_entries.txt", &mut p);

        assert!(report.ok);
        assert_eq!(report.created.len(), 2);
        assert_eq!(report.created[0].title, "Tectona grandis");
        assert!(report.created[0].entries >= 4);
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.entries[1].metadata.family.as_deref(), Some("Fabaceae"));

        let second = report.created[1].id;
        let mentions: Vec<_> = report
            .warnings
            .iter()
            .filter(|w| w.starts_with(&format!("entry {}:", second)))
            .collect();
        assert_eq!(mentions.len(), 1);
        assert!(mentions[0].contains("synonyms"));

        let runs: usize = p
            .store()
            .conn()
            .query_row("SELECT COUNT(*) FROM importRuns", [], |r| r.get(0))
            .unwrap();
        assert_eq!(runs, 1);
    }

    #[test]
    fn preview_writes_nothing_and_uses_positions() {
        let parsed = parse_upload(&parser(), 1 << 20, &upload("two_entries.txt")).unwrap();
        let report = preview(&parsed, Collection::Taxonomy, "two_entries.txt");
        assert!(report.ok);
        assert!(report.created.is_empty());
        assert_eq!(report.entries.len(), 2);
        assert_eq!(
            report.warnings,
            vec!["entry #2: synonyms label present but no synonyms were captured".to_string()]
        );
        assert!(report.message.contains("preview"));
    }

    #[test]
    fn failed_entry_does_not_stop_siblings() {
        let conn = schema();
        conn.execute_batch(
            "CREATE TRIGGER block_dalbergia BEFORE INSERT ON taxa
             WHEN NEW.scientificName = 'Dalbergia cochinchinensis'
             BEGIN SELECT RAISE(ABORT, 'blocked by curator'); END;",
        )
        .unwrap();
        let parsed = parse_upload(&parser(), 1 << 20, &upload("two_entries.html")).unwrap();
        let mut p = persister(conn);
        let report = commit(&parsed, Collection::Taxonomy, "two_entries.html", &mut p);

        assert!(report.ok);
        assert_eq!(report.created.len(), 1);
        assert!(report.warnings.iter().any(|w| w.contains("blocked by curator")));
        assert!(report.message.starts_with("Imported 1 of 2"));
    }

    #[test]
    fn nothing_saved_is_not_ok() {
        let conn = schema();
        conn.execute_batch(
            "CREATE TRIGGER block_all BEFORE INSERT ON taxa BEGIN SELECT RAISE(ABORT, 'read only'); END;",
        )
        .unwrap();
        let parsed = parser().parse(&SourceDocument::from_text("Family: Lamiaceae"));
        let report = commit(&parsed, Collection::Taxonomy, "x.txt", &mut persister(conn));
        assert!(!report.ok);
        assert_eq!(report.entries[0].warnings, vec!["entry #1: no scientific name found".to_string()]);
    }

    #[test]
    fn degraded_document_is_flagged() {
        let parsed = parser().parse(&SourceDocument::from_text("\u{200B}"));
        let report = preview(&parsed, Collection::Dictionary, "blank.txt");
        assert!(report.warnings[0].contains("unparsed"));
        assert!(report.entries[0].warnings.iter().any(|w| w.contains("segmented")));
    }

    #[test]
    fn upload_limits_and_formats() {
        let big = Upload { file_name: "a.txt".into(), content_type: None, bytes: vec![b'a'; 11] };
        assert!(matches!(
            parse_upload(&parser(), 10, &big),
            Err(ImportError::TooLarge { size: 11, max: 10 })
        ));
        let odd = Upload { file_name: "a.xls".into(), content_type: None, bytes: vec![] };
        assert!(matches!(parse_upload(&parser(), 10, &odd), Err(ImportError::Reader(_))));
    }

    #[test]
    fn envelope_field_names() {
        let parsed = parser().parse(&SourceDocument::from_text("Family: Lamiaceae"));
        let json = serde_json::to_value(preview(&parsed, Collection::Taxonomy, "x.txt")).unwrap();
        for key in ["ok", "message", "stats", "previewHtml", "created", "warnings", "entries"] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert!(json["stats"].get("htmlLength").is_some());
        assert!(json["stats"].get("domNodes").is_some());
        assert_eq!(json["entries"][0]["metadata"]["family"], "Lamiaceae");
        assert_eq!(json["entries"][0]["metadata"]["synonymsLabelPresent"], false);
    }
}
