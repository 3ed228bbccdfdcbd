use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("{format} support is not available: {hint}")]
    Unavailable { format: &'static str, hint: &'static str },
    #[error("malformed {format} document: {reason}")]
    Malformed { format: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store refused the row; the message is what schema fallback inspects.
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("no column layout of {table} accepted the record (tried {tried:?})")]
    SchemaMismatch { table: String, tried: Vec<String> },
    #[error("{table} rejected the record: {message}")]
    Rejected { table: String, message: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("upload of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },
    #[error("unknown collection: {0}")]
    UnknownCollection(String),
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error("no file in upload")]
    MissingFile,
}
