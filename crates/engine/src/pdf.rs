//! PDF text extraction.
//!
//! Walks each page's content stream and decodes text-showing operators,
//! consulting the font's ToUnicode map when one is present. Glyph strings
//! without a usable map fall back to lossy literal bytes.

use std::collections::HashMap;

use marginalia_core::SourceType;
use pdf::content::{Op, TextDrawAdjusted};
use pdf::file::FileOptions;
use pdf::font::ToUnicodeMap;
use pdf::object::{Resolve, Resources};
use pdf::primitive::{Name, PdfString};

use crate::IngestError;

/// Capability handle for the external PDF engine: raw bytes in, one text
/// string per physical page out.
pub trait PdfTextEngine {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, IngestError>;
}

/// TJ adjustments more negative than this are treated as word gaps.
const TJ_WORD_GAP_THRESHOLD: f32 = -200.0;

#[derive(Debug, Default)]
pub struct PdfEngine;

impl PdfEngine {
    pub fn new() -> Self {
        Self
    }
}

impl PdfTextEngine for PdfEngine {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, IngestError> {
        let file = FileOptions::cached()
            .load(bytes.to_vec())
            .map_err(|err| pdf_error(err.to_string()))?;
        let resolver = file.resolver();

        let mut pages = Vec::new();
        for page_index in 0..file.num_pages() {
            let page = file
                .get_page(page_index)
                .map_err(|err| pdf_error(format!("page {}: {err}", page_index + 1)))?;
            let resources = match page.resources() {
                Ok(resources) => resources,
                Err(_) => {
                    pages.push(String::new());
                    continue;
                }
            };
            let Some(content) = &page.contents else {
                pages.push(String::new());
                continue;
            };
            let ops = content
                .operations(&resolver)
                .map_err(|err| pdf_error(format!("page {}: {err}", page_index + 1)))?;
            pages.push(page_text(&ops, &resolver, resources));
        }

        Ok(pages)
    }
}

fn pdf_error(message: String) -> IngestError {
    IngestError::Extraction {
        format: SourceType::Pdf,
        message,
    }
}

fn page_text(ops: &[Op], resolver: &impl Resolve, resources: &Resources) -> String {
    let mut glyph_maps: HashMap<Name, Option<ToUnicodeMap>> = HashMap::new();
    let mut current_font: Option<Name> = None;
    let mut pending_space = false;
    let mut out = String::new();

    for op in ops {
        match op {
            Op::TextFont { name, .. } => {
                current_font = Some(name.clone());
            }
            Op::TextDraw { text } => {
                let piece = decode_text(
                    text,
                    current_font.as_ref(),
                    resolver,
                    resources,
                    &mut glyph_maps,
                );
                push_piece(&mut out, &piece, &mut pending_space);
            }
            Op::TextDrawAdjusted { array } => {
                for item in array {
                    match item {
                        TextDrawAdjusted::Text(text) => {
                            let piece = decode_text(
                                text,
                                current_font.as_ref(),
                                resolver,
                                resources,
                                &mut glyph_maps,
                            );
                            push_piece(&mut out, &piece, &mut pending_space);
                        }
                        TextDrawAdjusted::Spacing(spacing) => {
                            if *spacing <= TJ_WORD_GAP_THRESHOLD {
                                pending_space = true;
                            }
                        }
                    }
                }
            }
            Op::TextNewline => {
                out.push('\n');
                pending_space = false;
            }
            Op::MoveTextPosition { translation } => {
                if translation.y < 0.0 {
                    out.push('\n');
                    pending_space = false;
                }
            }
            _ => {}
        }
    }

    out.trim().to_string()
}

fn push_piece(out: &mut String, piece: &str, pending_space: &mut bool) {
    let cleaned = sanitize(piece);
    let cleaned = cleaned.trim_matches('\0');
    if cleaned.is_empty() {
        return;
    }

    if *pending_space {
        let starts_with_closer = cleaned
            .chars()
            .next()
            .is_some_and(|ch| matches!(ch, ',' | '.' | ';' | ':' | '!' | '?' | ')' | ']' | '}'));
        if !out.is_empty() && !starts_with_closer && !out.ends_with([' ', '\n', '\t']) {
            out.push(' ');
        }
        *pending_space = false;
    }
    out.push_str(cleaned);
}

fn decode_text(
    text: &PdfString,
    font_name: Option<&Name>,
    resolver: &impl Resolve,
    resources: &Resources,
    glyph_maps: &mut HashMap<Name, Option<ToUnicodeMap>>,
) -> String {
    let Some(font_name) = font_name else {
        return text.to_string_lossy();
    };

    if !glyph_maps.contains_key(font_name) {
        let map = resources
            .fonts
            .get(font_name)
            .and_then(|lazy| lazy.load(resolver).ok())
            .and_then(|font| font.to_unicode(resolver))
            .and_then(|result| result.ok());
        glyph_maps.insert(font_name.clone(), map);
    }

    match glyph_maps.get(font_name).and_then(|map| map.as_ref()) {
        Some(map) => decode_with_map(text.as_bytes(), map).unwrap_or_else(|| text.to_string_lossy()),
        None => text.to_string_lossy(),
    }
}

/// Decode glyph bytes through a ToUnicode map, trying one- and two-byte
/// codes and keeping whichever maps more glyphs. Returns `None` when the
/// map barely applies, so the caller falls back to the literal bytes.
fn decode_with_map(bytes: &[u8], map: &ToUnicodeMap) -> Option<String> {
    let mut best: Option<(String, usize, usize)> = None;

    for width in [1usize, 2] {
        if width == 2 && bytes.len() % 2 != 0 {
            continue;
        }
        let mut decoded = String::new();
        let mut mapped = 0usize;
        let mut total = 0usize;
        for chunk in bytes.chunks_exact(width) {
            total += 1;
            let code = match width {
                1 => chunk[0] as u16,
                _ => u16::from_be_bytes([chunk[0], chunk[1]]),
            };
            match map.get(code) {
                Some(s) => {
                    decoded.push_str(s);
                    mapped += 1;
                }
                None => decoded.push('\u{FFFD}'),
            }
        }
        let better = match &best {
            None => true,
            Some((text, best_mapped, _)) => {
                mapped > *best_mapped || (mapped == *best_mapped && decoded.len() > text.len())
            }
        };
        if better {
            best = Some((decoded, mapped, total));
        }
    }

    let (decoded, mapped, total) = best?;
    if total == 0 || (mapped as f32 / total as f32) < 0.3 {
        return None;
    }
    Some(decoded)
}

fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\n' | '\t' => out.push(ch),
            '\r' => out.push('\n'),
            '\u{FFFD}' => {}
            _ if ch.is_control() => {}
            _ => {
                let code = ch as u32;
                if is_private_use(code) || is_noncharacter(code) {
                    continue;
                }
                out.push(ch);
            }
        }
    }
    out
}

fn is_private_use(code: u32) -> bool {
    (0xE000..=0xF8FF).contains(&code)
        || (0xF0000..=0xFFFFD).contains(&code)
        || (0x100000..=0x10FFFD).contains(&code)
}

fn is_noncharacter(code: u32) -> bool {
    (0xFDD0..=0xFDEF).contains(&code) || (code & 0xFFFF == 0xFFFE) || (code & 0xFFFF == 0xFFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_are_an_extraction_error() {
        let engine = PdfEngine::new();
        let err = engine.extract_pages(b"this is not a pdf").unwrap_err();
        assert!(matches!(
            err,
            IngestError::Extraction {
                format: SourceType::Pdf,
                ..
            }
        ));
    }

    #[test]
    fn sanitize_drops_control_and_replacement_chars() {
        assert_eq!(sanitize("a\u{0007}b\u{FFFD}c"), "abc");
        assert_eq!(sanitize("line\rbreak"), "line\nbreak");
        assert_eq!(sanitize("keep\ttabs\nand newlines"), "keep\ttabs\nand newlines");
    }

    #[test]
    fn pending_space_suppressed_before_punctuation() {
        let mut out = String::from("word");
        let mut pending = true;
        push_piece(&mut out, ", next", &mut pending);
        assert_eq!(out, "word, next");

        let mut out = String::from("word");
        let mut pending = true;
        push_piece(&mut out, "next", &mut pending);
        assert_eq!(out, "word next");
    }
}
