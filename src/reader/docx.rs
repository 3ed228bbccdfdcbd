use std::io::{Cursor, Read};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::ZipArchive;

use crate::error::ReaderError;
use crate::parser::markup::escape_html;
use crate::parser::SourceDocument;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct RunFormat {
    italic: bool,
    bold: bool,
}

#[derive(Debug, Default)]
struct Paragraph {
    heading: Option<u8>,
    list_item: bool,
    runs: Vec<(RunFormat, String)>,
}

impl Paragraph {
    fn push_run(&mut self, format: RunFormat, text: String) {
        if text.is_empty() {
            return;
        }
        match self.runs.last_mut() {
            Some((f, t)) if *f == format => t.push_str(&text),
            _ => self.runs.push((format, text)),
        }
    }

    fn text(&self) -> String {
        self.runs.iter().map(|(_, t)| t.as_str()).collect()
    }

    fn inner_html(&self) -> String {
        let mut out = String::new();
        for (format, text) in &self.runs {
            let mut piece = escape_html(text).replace('\n', "<br>");
            if format.italic {
                piece = format!("<i>{}</i>", piece);
            }
            if format.bold {
                piece = format!("<b>{}</b>", piece);
            }
            out.push_str(&piece);
        }
        out
    }
}

/// Renders `word/document.xml` as simple markup: headings, paragraphs with
/// italic/bold runs, and numbered/bulleted paragraphs as list items.
pub fn read(bytes: &[u8]) -> Result<SourceDocument, ReaderError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| malformed(e.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| malformed(e.to_string()))?
        .read_to_string(&mut xml)
        .map_err(|e| malformed(e.to_string()))?;

    let paragraphs = parse_document(&xml)?;
    Ok(render(&paragraphs))
}

fn parse_document(xml: &str) -> Result<Vec<Paragraph>, ReaderError> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current: Option<Paragraph> = None;
    let mut run: Option<(RunFormat, String)> = None;
    let mut in_run_props = false;
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => current = Some(Paragraph::default()),
                b"r" if current.is_some() => run = Some((RunFormat::default(), String::new())),
                b"rPr" => in_run_props = run.is_some(),
                b"t" => in_text = run.is_some(),
                _ => apply_property(&e, current.as_mut(), run.as_mut(), in_run_props),
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => {
                    if let Some((_, text)) = run.as_mut() {
                        text.push(' ');
                    }
                }
                b"br" | b"cr" => {
                    if let Some((_, text)) = run.as_mut() {
                        text.push('\n');
                    }
                }
                _ => apply_property(&e, current.as_mut(), run.as_mut(), in_run_props),
            },
            Ok(Event::Text(e)) if in_text => {
                let text = e.unescape().map_err(|e| malformed(e.to_string()))?;
                if let Some((_, buf)) = run.as_mut() {
                    buf.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"rPr" => in_run_props = false,
                b"r" => {
                    if let (Some(p), Some((format, text))) = (current.as_mut(), run.take()) {
                        p.push_run(format, text);
                    }
                }
                b"p" => {
                    if let Some(p) = current.take() {
                        paragraphs.push(p);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(e.to_string())),
            _ => {}
        }
    }
    Ok(paragraphs)
}

fn apply_property(
    e: &BytesStart,
    paragraph: Option<&mut Paragraph>,
    run: Option<&mut (RunFormat, String)>,
    in_run_props: bool,
) {
    match e.local_name().as_ref() {
        b"pStyle" => {
            if let (Some(p), Some(style)) = (paragraph, attr(e, "w:val")) {
                p.heading = heading_level(&style);
            }
        }
        b"numPr" => {
            if let Some(p) = paragraph {
                p.list_item = true;
            }
        }
        b"i" if in_run_props => {
            if let Some((format, _)) = run {
                format.italic = is_on(e);
            }
        }
        b"b" if in_run_props => {
            if let Some((format, _)) = run {
                format.bold = is_on(e);
            }
        }
        _ => {}
    }
}

fn attr(e: &BytesStart, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// `<w:i/>` is on; `<w:i w:val="0"/>` and `"false"` are off.
fn is_on(e: &BytesStart) -> bool {
    !matches!(attr(e, "w:val").as_deref(), Some("0" | "false" | "off"))
}

fn heading_level(style: &str) -> Option<u8> {
    let lower = style.to_ascii_lowercase();
    if lower == "title" {
        return Some(1);
    }
    let digits = lower.strip_prefix("heading")?.trim();
    digits.parse::<u8>().ok().filter(|l| (1..=6).contains(l))
}

fn render(paragraphs: &[Paragraph]) -> SourceDocument {
    let mut html = String::new();
    let mut text = String::new();
    let mut in_list = false;

    for p in paragraphs {
        let plain = p.text();
        if plain.trim().is_empty() {
            if in_list {
                html.push_str("</ul>\n");
                in_list = false;
            }
            continue;
        }
        if p.list_item {
            if !in_list {
                html.push_str("<ul>");
                in_list = true;
            }
            html.push_str(&format!("<li>{}</li>", p.inner_html()));
            text.push_str(&plain);
            text.push('\n');
            continue;
        }
        if in_list {
            html.push_str("</ul>\n");
            in_list = false;
            text.push('\n');
        }
        match p.heading {
            Some(level) => html.push_str(&format!(
                "<h{0}>{1}</h{0}>\n",
                level,
                escape_html(&plain.replace('\n', " "))
            )),
            None => html.push_str(&format!("<p>{}</p>\n", p.inner_html())),
        }
        text.push_str(&plain);
        text.push_str("\n\n");
    }
    if in_list {
        html.push_str("</ul>\n");
    }

    SourceDocument { html, text, has_markup: true }
}

fn malformed(reason: String) -> ReaderError {
    ReaderError::Malformed { format: "docx", reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const BODY: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body>
<w:p><w:pPr><w:pStyle w:val="Heading2"/></w:pPr><w:r><w:t>สัก</w:t></w:r></w:p>
<w:p>
  <w:r><w:t xml:space="preserve">สัก </w:t></w:r>
  <w:r><w:rPr><w:i/></w:rPr><w:t>Tectona</w:t></w:r>
  <w:r><w:rPr><w:i/></w:rPr><w:t xml:space="preserve"> grandis</w:t></w:r>
  <w:r><w:t xml:space="preserve"> L.f.</w:t></w:r>
</w:p>
<w:p><w:r><w:rPr><w:b/></w:rPr><w:t>วงศ์:</w:t></w:r><w:r><w:t xml:space="preserve"> Lamiaceae &amp; co</w:t></w:r></w:p>
<w:p><w:pPr><w:numPr><w:ilvl w:val="0"/><w:numId w:val="1"/></w:numPr></w:pPr><w:r><w:t>leaf</w:t></w:r></w:p>
<w:p><w:pPr><w:numPr><w:ilvl w:val="0"/><w:numId w:val="1"/></w:numPr></w:pPr><w:r><w:t>flower</w:t></w:r></w:p>
<w:p/>
<w:p><w:r><w:rPr><w:i w:val="0"/></w:rPr><w:t>plain</w:t></w:r></w:p>
<w:p><w:r><w:t>Family: Lamiaceae</w:t><w:br/><w:t>Author of description: Somchai</w:t></w:r></w:p>
</w:body>
</w:document>"#;

    fn docx(xml: &str) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        zip.start_file("word/document.xml", options).unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn renders_structure_and_emphasis() {
        let doc = read(&docx(BODY)).unwrap();
        assert!(doc.has_markup);
        assert!(doc.html.contains("<h2>สัก</h2>"));
        assert!(doc.html.contains("<p>สัก <i>Tectona grandis</i> L.f.</p>"));
        assert!(doc.html.contains("<p><b>วงศ์:</b> Lamiaceae &amp; co</p>"));
        assert!(doc.html.contains("<ul><li>leaf</li><li>flower</li></ul>"));
        assert!(doc.html.contains("<p>plain</p>"));
        assert!(doc.text.contains("วงศ์: Lamiaceae & co"));
    }

    #[test]
    fn soft_breaks_become_line_breaks() {
        let doc = read(&docx(BODY)).unwrap();
        assert!(doc.html.contains("<p>Family: Lamiaceae<br>Author of description: Somchai</p>"));
        assert!(doc.text.contains("Family: Lamiaceae\nAuthor of description: Somchai"));
    }

    #[test]
    fn missing_document_part_is_malformed() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("other.xml", SimpleFileOptions::default()).unwrap();
        let bytes = zip.finish().unwrap().into_inner();
        assert!(matches!(read(&bytes), Err(ReaderError::Malformed { format: "docx", .. })));
        assert!(matches!(read(b"not a zip"), Err(ReaderError::Malformed { .. })));
    }

    #[test]
    fn heading_styles() {
        assert_eq!(heading_level("Heading1"), Some(1));
        assert_eq!(heading_level("heading 3"), Some(3));
        assert_eq!(heading_level("Title"), Some(1));
        assert_eq!(heading_level("Normal"), None);
    }
}
