//! PDF page-range extraction with a two-tier extractor fallback.
//! `pdf-extract` is tried first — it handles a wider variety of
//! font encodings — and `lopdf`'s per-page `extract_text` is the fallback
//! when the richer extractor raises on a malformed document. Both paths
//! clamp the requested range to `[1, page_count]` and skip (rather than
//! fail on) any single page that doesn't decode.

use std::path::Path;

/// Extract text for 1-based page range `[start_index, end_index]`
/// (inclusive, order-independent). Returns `""` if the document has zero
/// pages; never returns an `Err` for a malformed or out-of-range request
/// — a caller that can't get page text for a node should just drop it.
pub fn extract_page_range(path: &Path, start_index: i64, end_index: i64) -> String {
    if let Some(text) = extract_rich(path, start_index, end_index) {
        return text;
    }
    extract_simple(path, start_index, end_index).unwrap_or_default()
}

/// Primary extractor: `pdf-extract`. Pages in its plain-text output are
/// separated by form-feed (`\x0c`); splitting on that gives per-page
/// chunks without a second parse pass.
fn extract_rich(path: &Path, start_index: i64, end_index: i64) -> Option<String> {
    let full_text = pdf_extract::extract_text(path).ok()?;
    let pages: Vec<&str> = full_text.split('\u{c}').collect();
    join_clamped_range(&pages, start_index, end_index)
}

/// Fallback extractor: `lopdf`, asking for one page at a time so a single
/// undecodable page doesn't sink the whole range.
fn extract_simple(path: &Path, start_index: i64, end_index: i64) -> Option<String> {
    let doc = lopdf::Document::load(path).ok()?;
    let total = doc.get_pages().len();
    if total == 0 {
        return Some(String::new());
    }
    let (lo, hi) = clamp_range(start_index, end_index, total);
    let mut out = String::new();
    for page_num in lo..=hi {
        if let Ok(text) = doc.extract_text(&[page_num as u32]) {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&text);
        }
        // A page that fails to decode is skipped, not fatal.
    }
    Some(out)
}

fn clamp_range(start_index: i64, end_index: i64, total: usize) -> (usize, usize) {
    let total = total as i64;
    let a = start_index.clamp(1, total);
    let b = end_index.clamp(1, total);
    if a <= b { (a as usize, b as usize) } else { (b as usize, a as usize) }
}

fn join_clamped_range(pages: &[&str], start_index: i64, end_index: i64) -> Option<String> {
    let total = pages.len();
    if total == 0 {
        return Some(String::new());
    }
    let (lo, hi) = clamp_range(start_index, end_index, total);
    let mut out = String::new();
    for i in lo..=hi {
        if let Some(p) = pages.get(i - 1) {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(p.trim());
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_range_handles_out_of_bounds_start() {
        assert_eq!(clamp_range(50, 60, 5), (5, 5));
    }

    #[test]
    fn clamp_range_handles_reversed_bounds() {
        assert_eq!(clamp_range(4, 2, 10), (2, 4));
    }

    #[test]
    fn join_clamped_range_empty_pages_returns_empty_string() {
        let pages: Vec<&str> = vec![];
        assert_eq!(join_clamped_range(&pages, 1, 1), Some(String::new()));
    }

    #[test]
    fn join_clamped_range_out_of_range_start_clamps_to_last_page() {
        let pages = vec!["one", "two", "three"];
        assert_eq!(join_clamped_range(&pages, 99, 99), Some("three".to_string()));
    }
}
