use regex::Regex;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::OnceLock;

/// Extensions read as UTF-8 text without further processing.
const PLAIN_TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "csv", "tsv", "json", "xml", "html", "js", "ts", "py", "log",
];

/// Parsed document content
#[derive(Debug)]
pub struct ParsedDocument {
    pub content: String,
    pub file_type: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Unsupported file type: .{0}")]
    Unsupported(String),
    #[error("PDF parse error: {0}")]
    Pdf(String),
    #[error("Office document could not be read: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("Read error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No extractable text in {0} (scanned, image-only or encrypted file?)")]
    NoText(String),
}

/// Lowercase extension of `file_name`, or an empty string.
pub fn file_type_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Parse uploaded bytes into plain text, choosing the format from the file name.
pub fn parse_bytes(file_name: &str, bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
    let ext = file_type_of(file_name);

    let content = match ext.as_str() {
        e if PLAIN_TEXT_EXTENSIONS.contains(&e) => String::from_utf8_lossy(bytes).into_owned(),
        "docx" => require_text(file_name, extract_docx(bytes)?)?,
        "pptx" => require_text(file_name, extract_pptx(bytes)?)?,
        "pdf" => {
            let text = pdf_extract::extract_text_from_mem(bytes)
                .map_err(|e| ParseError::Pdf(e.to_string()))?;
            require_text(file_name, text.trim().to_string())?
        }
        _ => return Err(ParseError::Unsupported(ext)),
    };

    Ok(ParsedDocument {
        content,
        file_type: ext,
    })
}

fn require_text(file_name: &str, text: String) -> Result<String, ParseError> {
    if text.trim().is_empty() {
        Err(ParseError::NoText(file_name.to_string()))
    } else {
        Ok(text)
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, ParseError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut xml = String::new();
    archive.by_name("word/document.xml")?.read_to_string(&mut xml)?;

    static RUN: OnceLock<Regex> = OnceLock::new();
    let run = RUN.get_or_init(|| Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>").expect("docx run pattern is valid"));

    let paragraphs: Vec<String> = xml
        .split("</w:p>")
        .map(|para| {
            run.captures_iter(para)
                .filter_map(|c| c.get(1))
                .map(|m| unescape_xml(m.as_str()))
                .collect::<String>()
        })
        .filter(|p| !p.trim().is_empty())
        .collect();
    Ok(paragraphs.join("\n"))
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ParseError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

    static SLIDE: OnceLock<Regex> = OnceLock::new();
    let slide_name = SLIDE.get_or_init(|| Regex::new(r"^ppt/slides/slide(\d+)\.xml$").expect("slide pattern is valid"));
    static RUN: OnceLock<Regex> = OnceLock::new();
    let run = RUN.get_or_init(|| Regex::new(r"<a:t>([^<]*)</a:t>").expect("pptx run pattern is valid"));

    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = slide_name.captures(name)?.get(1)?.as_str().parse().ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    slides.sort_by_key(|(number, _)| *number);

    let mut texts = Vec::with_capacity(slides.len());
    for (_, name) in slides {
        let mut xml = String::new();
        archive.by_name(&name)?.read_to_string(&mut xml)?;
        let text = run
            .captures_iter(&xml)
            .filter_map(|c| c.get(1))
            .map(|m| unescape_xml(m.as_str()))
            .collect::<Vec<_>>()
            .join(" ");
        if !text.trim().is_empty() {
            texts.push(text);
        }
    }
    Ok(texts.join("\n\n"))
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    /// Build a zip archive in memory from (path, contents) pairs.
    pub(crate) fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, contents) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    pub(crate) fn docx_bytes(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!(r#"<w:p><w:r><w:t xml:space="preserve">{}</w:t></w:r></w:p>"#, p))
            .collect();
        let xml = format!(
            r#"<?xml version="1.0"?><w:document xmlns:w="x"><w:body>{}</w:body></w:document>"#,
            body
        );
        zip_bytes(&[("word/document.xml", &xml)])
    }

    #[test]
    fn test_plain_text_passthrough() {
        let parsed = parse_bytes("Notes.MD", b"# Title\nbody").unwrap();
        assert_eq!(parsed.file_type, "md");
        assert_eq!(parsed.content, "# Title\nbody");
    }

    #[test]
    fn test_empty_text_file_is_still_a_success() {
        let parsed = parse_bytes("empty.txt", b"").unwrap();
        assert_eq!(parsed.content, "");
    }

    #[test]
    fn test_unsupported_extension() {
        let err = parse_bytes("slides.key", b"whatever").unwrap_err();
        assert!(matches!(err, ParseError::Unsupported(ref ext) if ext == "key"));
        assert_eq!(err.to_string(), "Unsupported file type: .key");
    }

    #[test]
    fn test_docx_paragraphs_and_entities() {
        let bytes = docx_bytes(&["Carbon &amp; climate", "Second paragraph"]);
        let parsed = parse_bytes("essay.docx", &bytes).unwrap();
        assert_eq!(parsed.file_type, "docx");
        assert_eq!(parsed.content, "Carbon & climate\nSecond paragraph");
    }

    #[test]
    fn test_docx_without_document_part_fails() {
        let bytes = zip_bytes(&[("other.xml", "<x/>")]);
        assert!(matches!(
            parse_bytes("broken.docx", &bytes),
            Err(ParseError::Archive(_))
        ));
    }

    #[test]
    fn test_pptx_slides_in_numeric_order() {
        let bytes = zip_bytes(&[
            ("ppt/slides/slide10.xml", "<p:sld><a:t>Ten</a:t></p:sld>"),
            ("ppt/slides/slide2.xml", "<p:sld><a:t>Two</a:t><a:t>words</a:t></p:sld>"),
            ("ppt/slides/_rels/slide2.xml.rels", "<Relationships/>"),
        ]);
        let parsed = parse_bytes("deck.pptx", &bytes).unwrap();
        assert_eq!(parsed.content, "Two words\n\nTen");
    }

    #[test]
    fn test_pptx_without_text_is_reported() {
        let bytes = zip_bytes(&[("ppt/slides/slide1.xml", "<p:sld><p:pic/></p:sld>")]);
        assert!(matches!(
            parse_bytes("pictures.pptx", &bytes),
            Err(ParseError::NoText(_))
        ));
    }

    #[test]
    fn test_garbage_pdf_is_an_error() {
        assert!(parse_bytes("scan.pdf", b"not a pdf").is_err());
    }
}
