use std::panic;

use crate::error::ReaderError;
use crate::parser::SourceDocument;

pub fn read(bytes: &[u8]) -> Result<SourceDocument, ReaderError> {
    // pdf-extract panics on some malformed font tables.
    let extracted = panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| malformed("text extraction aborted".to_string()))?
        .map_err(|e| malformed(e.to_string()))?;

    // Page breaks separate blocks.
    let text = extracted.replace('\u{c}', "\n\n");
    Ok(SourceDocument::from_text(text))
}

fn malformed(reason: String) -> ReaderError {
    ReaderError::Malformed { format: "pdf", reason }
}
