use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use rusqlite::{Connection, OptionalExtension};

use crate::error::StoreError;
use crate::persist::{ImportRun, RecordStore, TableShape};

static RANK_CHECK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)CHECK\s*\(\s*["`\[]?rank["`\]]?\s+IN\s*\(([^)]*)\)"#).unwrap()
});
static QUOTED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"'((?:[^']|'')*)'").unwrap());

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS taxa (
            id             INTEGER PRIMARY KEY,
            title          TEXT NOT NULL,
            officialName   TEXT,
            scientificName TEXT,
            genus          TEXT,
            species        TEXT,
            family         TEXT,
            authorsDisplay TEXT,
            authorsPeriod  TEXT,
            otherNames     TEXT,
            synonyms       TEXT,
            author         TEXT,
            excerpt        TEXT,
            contentHtml    TEXT,
            sourceFile     TEXT,
            rank           TEXT NOT NULL DEFAULT 'SPECIES'
                CONSTRAINT rank_enum CHECK (rank IN ('KINGDOM','PHYLUM','CLASS','ORDER','FAMILY',
                                                     'GENUS','SPECIES','SUBSPECIES','VARIETY','FORM')),
            createdAt      TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_taxa_scientific ON taxa(scientificName);
        CREATE INDEX IF NOT EXISTS idx_taxa_family ON taxa(family);

        CREATE TABLE IF NOT EXISTS dictionaryEntries (
            id              INTEGER PRIMARY KEY,
            headword        TEXT NOT NULL,
            scientificName  TEXT,
            otherNames      TEXT,
            synonyms        TEXT,
            author          TEXT,
            excerpt         TEXT,
            descriptionHtml TEXT,
            sourceFile      TEXT,
            createdAt       TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_dictionary_headword ON dictionaryEntries(headword);

        CREATE TABLE IF NOT EXISTS importRuns (
            id          INTEGER PRIMARY KEY,
            fileName    TEXT NOT NULL,
            collection  TEXT NOT NULL CHECK(collection IN ('taxonomy','dictionary')),
            entryCount  INTEGER NOT NULL,
            savedCount  INTEGER NOT NULL,
            warnings    TEXT NOT NULL DEFAULT '[]',
            importedAt  TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Values allowed by a `CHECK (rank IN (...))` clause in a table definition.
pub fn parse_rank_values(create_sql: &str) -> Vec<String> {
    let Some(caps) = RANK_CHECK_RE.captures(create_sql) else {
        return Vec::new();
    };
    QUOTED_RE
        .captures_iter(&caps[1])
        .map(|c| c[1].replace("''", "'"))
        .collect()
}

/// Refusals of a row (constraint or column errors) carry the SQLite message;
/// anything else stays a driver error.
fn rejection(err: rusqlite::Error) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(e, msg) => {
            StoreError::Rejected(msg.unwrap_or_else(|| e.to_string()))
        }
        other => StoreError::Sqlite(other),
    }
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        SqliteStore { conn }
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl RecordStore for SqliteStore {
    fn describe(&self, table: &str) -> Result<Option<TableShape>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<HashSet<_>, _>>()?;
        if columns.is_empty() {
            return Ok(None);
        }
        let create_sql: Option<String> = self
            .conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |r| r.get(0),
            )
            .optional()?;
        let rank_values = create_sql.as_deref().map(parse_rank_values).unwrap_or_default();
        Ok(Some(TableShape { columns, rank_values }))
    }

    fn insert(&mut self, table: &str, row: &[(String, String)]) -> Result<i64, StoreError> {
        let columns: Vec<String> = row.iter().map(|(c, _)| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.join(", "),
            placeholders.join(", ")
        );
        let mut stmt = self.conn.prepare(&sql).map_err(rejection)?;
        stmt.execute(rusqlite::params_from_iter(row.iter().map(|(_, v)| v)))
            .map_err(rejection)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn record_import(&mut self, run: &ImportRun) -> Result<(), StoreError> {
        let warnings = serde_json::to_string(&run.warnings).unwrap_or_else(|_| "[]".to_string());
        self.conn.execute(
            "INSERT INTO importRuns (fileName, collection, entryCount, savedCount, warnings, importedAt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                run.file_name,
                run.collection.as_str(),
                run.entries as i64,
                run.saved as i64,
                warnings,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

// ── Stats ──

pub struct Stats {
    pub taxa: usize,
    pub dictionary_entries: usize,
    pub imports: usize,
    pub last_import: Option<String>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let taxa: usize = conn.query_row("SELECT COUNT(*) FROM taxa", [], |r| r.get(0))?;
    let dictionary_entries: usize =
        conn.query_row("SELECT COUNT(*) FROM dictionaryEntries", [], |r| r.get(0))?;
    let imports: usize = conn.query_row("SELECT COUNT(*) FROM importRuns", [], |r| r.get(0))?;
    let last_import: Option<String> =
        conn.query_row("SELECT MAX(importedAt) FROM importRuns", [], |r| r.get(0))?;
    Ok(Stats { taxa, dictionary_entries, imports, last_import })
}
