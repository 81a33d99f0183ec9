//! PDF text extraction wrapper
//!
//! Wraps the pdf-extract crate. Only the leading part of a document is ever
//! needed (title page), so callers always pass a character limit.

use crate::cache::PdfRecord;
use crate::error::{PaperError, Result};
use crate::utils::take_chars;
use std::fs;
use std::path::{Path, PathBuf};

/// True for `*.pdf` (case-insensitive)
pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Extract full text from PDF bytes.
///
/// pdf-extract can panic on malformed fonts; that is reported as an error too.
pub fn extract_text_from_pdf(pdf_bytes: &[u8]) -> std::result::Result<String, String> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(pdf_bytes))) {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err("pdf-extract panicked on malformed document".to_string()),
    }
}

/// First `limit` characters of a document's text.
///
/// Unsupported extensions are rejected before the file is read.
pub fn extract_leading_text(path: &Path, limit: usize) -> Result<String> {
    if !is_pdf(path) {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string();
        return Err(PaperError::Unsupported { path: path.to_path_buf(), extension });
    }
    if !path.exists() {
        return Err(PaperError::FileNotFound { path: path.to_path_buf() });
    }

    let bytes = fs::read(path)?;
    let text = extract_text_from_pdf(&bytes).map_err(|message| PaperError::Enrichment {
        file: display_name(path),
        message: format!("text extraction failed: {}", message),
    })?;

    Ok(take_chars(text.trim(), limit).to_string())
}

/// Sorted `*.pdf` paths directly inside `dir`
pub fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_pdf(p))
        .collect();
    files.sort();
    Ok(files)
}

/// Sorted file stems of the PDFs in `dir`
pub fn load_pdf_names(dir: &Path) -> Result<Vec<String>> {
    Ok(list_pdfs(dir)?
        .iter()
        .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(String::from))
        .collect())
}

/// Name + leading text for each PDF in `dir`. Extraction failures keep the
/// record with empty content.
pub fn load_pdf_snapshot(dir: &Path, limit: usize) -> Result<Vec<PdfRecord>> {
    let mut records = Vec::new();
    for path in list_pdfs(dir)? {
        let Some(filename) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
            continue;
        };
        let content = match extract_leading_text(&path, limit) {
            Ok(text) => text,
            Err(e) => {
                crate::elog!("[Snapshot] {}: {}", filename, e);
                String::new()
            }
        };
        records.push(PdfRecord { filename, content });
    }
    Ok(records)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}
