#[cfg(feature = "docx")]
mod docx;
#[cfg(feature = "pdf")]
mod pdf;

use std::fmt;
use std::path::Path;

use crate::error::ReaderError;
use crate::parser::SourceDocument;

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Html,
    Text,
    Docx,
    Pdf,
}

impl Format {
    /// By file extension, then by declared content type.
    pub fn detect(file_name: &str, content_type: Option<&str>) -> Result<Format, ReaderError> {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        let by_ext = match ext.as_deref() {
            Some("html" | "htm" | "xhtml") => Some(Format::Html),
            Some("txt" | "text") => Some(Format::Text),
            Some("docx") => Some(Format::Docx),
            Some("pdf") => Some(Format::Pdf),
            _ => None,
        };
        if let Some(format) = by_ext {
            return Ok(format);
        }

        let mime = content_type
            .and_then(|c| c.split(';').next())
            .map(|c| c.trim().to_ascii_lowercase());
        match mime.as_deref() {
            Some("text/html" | "application/xhtml+xml") => Ok(Format::Html),
            Some("text/plain") => Ok(Format::Text),
            Some(DOCX_MIME) => Ok(Format::Docx),
            Some("application/pdf") => Ok(Format::Pdf),
            _ => Err(ReaderError::Unsupported(
                ext.unwrap_or_else(|| file_name.to_string()),
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Format::Html => "html",
            Format::Text => "txt",
            Format::Docx => "docx",
            Format::Pdf => "pdf",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn read(format: Format, bytes: &[u8]) -> Result<SourceDocument, ReaderError> {
    match format {
        Format::Html => Ok(SourceDocument::from_html(decode(bytes))),
        Format::Text => Ok(SourceDocument::from_text(decode(bytes))),
        Format::Docx => read_docx(bytes),
        Format::Pdf => read_pdf(bytes),
    }
}

/// UTF-8 with the BOM dropped; invalid sequences become U+FFFD for garble repair.
fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(feature = "docx")]
fn read_docx(bytes: &[u8]) -> Result<SourceDocument, ReaderError> {
    docx::read(bytes)
}

#[cfg(not(feature = "docx"))]
fn read_docx(_bytes: &[u8]) -> Result<SourceDocument, ReaderError> {
    Err(ReaderError::Unavailable {
        format: "docx",
        hint: "rebuild with `--features docx` or upload the document saved as HTML",
    })
}

#[cfg(feature = "pdf")]
fn read_pdf(bytes: &[u8]) -> Result<SourceDocument, ReaderError> {
    pdf::read(bytes)
}

#[cfg(not(feature = "pdf"))]
fn read_pdf(_bytes: &[u8]) -> Result<SourceDocument, ReaderError> {
    Err(ReaderError::Unavailable {
        format: "pdf",
        hint: "rebuild with `--features pdf` or upload the document as text",
    })
}
