//! PDF text extraction module
//!
//! Extracts text content from PDF files using lopdf.

use crate::errors::IngestionError;
use lopdf::{Document, ObjectId};
use std::path::Path;
use tracing::{debug, warn};

/// Text of a whole document
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    pub page_count: usize,
}

/// Extract text content from a PDF file
pub fn extract_text_from_pdf(path: &Path) -> Result<ExtractedText, IngestionError> {
    if !path.exists() {
        return Err(IngestionError::FileNotFound(path.display().to_string()));
    }

    let doc = Document::load(path).map_err(|e| IngestionError::PdfParseError {
        path: path.display().to_string(),
        message: format!("Failed to load PDF: {}", e),
    })?;

    extract_document(&doc, &path.display().to_string())
}

/// Extract text content from an in-memory PDF
pub fn extract_text_from_bytes(bytes: &[u8], name: &str) -> Result<ExtractedText, IngestionError> {
    let doc = Document::load_mem(bytes).map_err(|e| IngestionError::PdfParseError {
        path: name.to_string(),
        message: format!("Failed to load PDF: {}", e),
    })?;

    extract_document(&doc, name)
}

fn extract_document(doc: &Document, name: &str) -> Result<ExtractedText, IngestionError> {
    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "Extracting text from PDF");

    let mut text = String::new();
    for (page_num, page_id) in pages.iter() {
        match extract_page_text(doc, *page_num, *page_id) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(e) => {
                warn!(page = page_num, error = %e, "Failed to extract text from page, skipping");
            }
        }
    }

    if text.trim().is_empty() {
        return Err(IngestionError::PdfParseError {
            path: name.to_string(),
            message: "No text content extracted from PDF".to_string(),
        });
    }

    let cleaned = clean_text(&text);

    debug!(
        original_len = text.len(),
        cleaned_len = cleaned.len(),
        "Text extraction complete"
    );

    Ok(ExtractedText {
        text: cleaned,
        page_count: pages.len(),
    })
}

/// Extract text from a single page, falling back to a raw content scan
/// when lopdf can't decode it
fn extract_page_text(doc: &Document, page_num: u32, page_id: ObjectId) -> Result<String, String> {
    match doc.extract_text(&[page_num]) {
        Ok(text) if !text.trim().is_empty() => return Ok(text),
        Ok(_) => debug!(page = page_num, "lopdf returned no text, scanning content stream"),
        Err(e) => debug!(page = page_num, error = %e, "lopdf extraction failed, scanning content stream"),
    }

    let content = doc.get_page_content(page_id).map_err(|e| e.to_string())?;
    Ok(extract_text_from_content(&content))
}

/// Extract text from PDF content stream
fn extract_text_from_content(content: &[u8]) -> String {
    // Text between BT and ET operators; each block ends a line
    let content_str = String::from_utf8_lossy(content);
    let mut text = String::new();
    let mut in_text_block = false;
    let mut current_text = String::new();

    for line in content_str.lines() {
        let trimmed = line.trim();

        if trimmed == "BT" {
            in_text_block = true;
            continue;
        }

        if trimmed == "ET" {
            in_text_block = false;
            if !current_text.is_empty() {
                text.push_str(&current_text);
                text.push('\n');
                current_text.clear();
            }
            continue;
        }

        if in_text_block {
            if let Some(text_content) = extract_text_from_operator(trimmed) {
                current_text.push_str(&text_content);
            }
        }
    }

    text
}

/// Extract text from a PDF text operator
fn extract_text_from_operator(line: &str) -> Option<String> {
    // (text) Tj, (text) ' and (text) "
    if line.ends_with("Tj") || line.ends_with('\'') || line.ends_with('"') {
        if let (Some(start), Some(end)) = (line.find('('), line.rfind(')')) {
            if start < end {
                return Some(decode_pdf_string(&line[start + 1..end]));
            }
        }
    }

    // [(text) num (text) num] TJ
    if line.ends_with("TJ") {
        let mut result = String::new();
        let mut in_paren = false;
        let mut escaped = false;
        let mut current = String::new();

        for ch in line.chars() {
            match ch {
                _ if escaped => {
                    current.push(ch);
                    escaped = false;
                }
                '\\' if in_paren => {
                    current.push(ch);
                    escaped = true;
                }
                '(' if !in_paren => in_paren = true,
                ')' if in_paren => {
                    in_paren = false;
                    result.push_str(&decode_pdf_string(&current));
                    current.clear();
                }
                _ if in_paren => current.push(ch),
                _ => {}
            }
        }

        if !result.is_empty() {
            return Some(result);
        }
    }

    None
}

/// Decode PDF string escapes
fn decode_pdf_string(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some('\\') => result.push('\\'),
                Some('(') => result.push('('),
                Some(')') => result.push(')'),
                Some(c) => result.push(c),
                None => {}
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// Clean extracted text.
///
/// Line breaks survive: the character splitter separates on them.
/// Whitespace inside a line collapses and blank-line runs shrink to one.
pub fn clean_text(text: &str) -> String {
    let normalized = text
        .replace('\u{FEFF}', "")
        .replace(|c: char| matches!(c, '\u{201C}' | '\u{201D}'), "\"")
        .replace(|c: char| matches!(c, '\u{2018}' | '\u{2019}'), "'");

    let mut lines: Vec<String> = Vec::new();
    for line in normalized.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        let previous_blank = lines.last().map_or(true, |l| l.is_empty());
        if line.is_empty() && previous_blank {
            continue;
        }
        lines.push(line);
    }

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    lines.join("\n")
}
