//! Text Extractor: turns a PDF, DOCX, or TXT buffer into sanitized plain text.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PDF_MIME: &str = "application/pdf";
pub const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const TXT_MIME: &str = "text/plain";

#[derive(Debug, Error, PartialEq)]
pub enum ExtractionError {
    #[error("Invalid file type: {0}. Only PDF, DOCX and TXT are supported")]
    InvalidFileType(String),

    #[error("pdf-decode-failed: {0}")]
    PdfDecode(String),

    #[error("docx-decode-failed: {0}")]
    DocxDecode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Docx,
    Txt,
}

impl FileKind {
    /// Resolves the kind from the file extension, falling back to the MIME type.
    /// Anything outside {pdf, docx, txt} is rejected before extraction is attempted.
    pub fn detect(file_name: &str, mime_type: Option<&str>) -> Result<Self, ExtractionError> {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("pdf") => return Ok(FileKind::Pdf),
            Some("docx") => return Ok(FileKind::Docx),
            Some("txt") => return Ok(FileKind::Txt),
            _ => {}
        }

        let mime = mime_type
            .map(|m| m.split(';').next().unwrap_or(m).trim().to_ascii_lowercase())
            .unwrap_or_default();
        match mime.as_str() {
            PDF_MIME => Ok(FileKind::Pdf),
            DOCX_MIME => Ok(FileKind::Docx),
            TXT_MIME => Ok(FileKind::Txt),
            _ if !mime.is_empty() => Err(ExtractionError::InvalidFileType(mime)),
            _ => Err(ExtractionError::InvalidFileType(
                extension.unwrap_or_else(|| file_name.to_string()),
            )),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            FileKind::Pdf => PDF_MIME,
            FileKind::Docx => DOCX_MIME,
            FileKind::Txt => TXT_MIME,
        }
    }
}

/// Extracts plain text from `bytes`. The decoders are CPU-bound and may panic
/// on hostile input, so they run on the blocking pool; a panic becomes a decode error.
pub async fn extract_text(bytes: Vec<u8>, kind: FileKind) -> Result<String, ExtractionError> {
    let raw = tokio::task::spawn_blocking(move || decode(&bytes, kind))
        .await
        .map_err(|e| match kind {
            FileKind::Docx => ExtractionError::DocxDecode(format!("decoder aborted: {e}")),
            _ => ExtractionError::PdfDecode(format!("decoder aborted: {e}")),
        })??;

    Ok(sanitize_text(&raw))
}

fn decode(bytes: &[u8], kind: FileKind) -> Result<String, ExtractionError> {
    match kind {
        FileKind::Pdf => decode_pdf(bytes),
        FileKind::Docx => decode_docx(bytes),
        FileKind::Txt => Ok(String::from_utf8(bytes.to_vec()).unwrap_or_default()),
    }
}

fn decode_pdf(bytes: &[u8]) -> Result<String, ExtractionError> {
    if !bytes.starts_with(b"%PDF-") {
        return Err(ExtractionError::PdfDecode(
            "missing %PDF- header".to_string(),
        ));
    }
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractionError::PdfDecode(e.to_string()))
}

fn decode_docx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractionError::DocxDecode(format!("not a DOCX archive: {e}")))?;

    let mut document_xml = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractionError::DocxDecode(format!("missing document.xml: {e}")))?;

    let mut xml = String::new();
    document_xml
        .read_to_string(&mut xml)
        .map_err(|e| ExtractionError::DocxDecode(format!("unreadable document.xml: {e}")))?;

    parse_docx_xml(&xml)
}

/// Collects `<w:t>` runs, one line per `<w:p>` paragraph, tabs and breaks preserved.
fn parse_docx_xml(xml: &str) -> Result<String, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut text = String::new();
    let mut in_text_element = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text_element = true;
                }
            }
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"tab" => text.push('\t'),
                b"br" => text.push('\n'),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_element = false,
                b"p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text_element {
                    let decoded = e.unescape().unwrap_or_default();
                    text.push_str(&decoded);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ExtractionError::DocxDecode(format!("XML parsing error: {e}")));
            }
            _ => {}
        }
    }

    Ok(text)
}

/// Removes NUL and other control characters the database rejects or chokes on.
/// Newlines and tabs survive; runs of blank lines collapse to one.
pub fn sanitize_text(raw: &str) -> String {
    let cleaned: String = raw
        .replace("\r\n", "\n")
        .chars()
        .map(|c| match c {
            '\r' => '\n',
            '\n' | '\t' => c,
            c if c.is_control() => ' ',
            c => c,
        })
        .filter(|c| *c != '\u{FFFD}')
        .collect();

    let mut out = String::with_capacity(cleaned.len());
    let mut blank_run = 0;
    for line in cleaned.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}
