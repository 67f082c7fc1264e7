//! Paragraph-preserving pagination.

use std::sync::OnceLock;

use regex::Regex;

/// Split `text` into pages of at most `max_chars_per_page` characters
/// without breaking paragraphs.
///
/// Paragraphs are runs of text separated by one-or-more blank lines. They
/// are greedily accumulated into a page buffer; a paragraph that would push
/// the buffer past the limit starts a new page instead. A single paragraph
/// longer than the limit is never split mid-paragraph and becomes an
/// oversized page by itself. The result is never empty: empty input yields
/// one page containing the empty string.
pub fn paginate(text: &str, max_chars_per_page: usize) -> Vec<String> {
    let mut pages = Vec::new();
    let mut buffer = String::new();
    let mut buffer_chars = 0usize;

    for paragraph in paragraph_split().split(text) {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        let paragraph_chars = paragraph.chars().count();

        if !buffer.is_empty() && buffer_chars + 2 + paragraph_chars > max_chars_per_page {
            pages.push(std::mem::take(&mut buffer));
            buffer_chars = 0;
        }

        if !buffer.is_empty() {
            buffer.push_str("\n\n");
            buffer_chars += 2;
        }
        buffer.push_str(paragraph);
        buffer_chars += paragraph_chars;
    }

    if !buffer.is_empty() || pages.is_empty() {
        pages.push(buffer);
    }
    pages
}

fn paragraph_split() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").expect("static pattern"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_one_empty_page() {
        assert_eq!(paginate("", 100), vec![String::new()]);
        assert_eq!(paginate("\n\n\n", 100), vec![String::new()]);
    }

    #[test]
    fn never_returns_an_empty_sequence() {
        for text in ["", "a", "a\n\nb", "   "] {
            assert!(!paginate(text, 5).is_empty());
        }
    }

    #[test]
    fn paragraphs_are_packed_greedily() {
        let text = "aaaa\n\nbbbb\n\ncccc";
        let pages = paginate(text, 10);
        assert_eq!(pages, vec!["aaaa\n\nbbbb".to_string(), "cccc".to_string()]);
    }

    #[test]
    fn paragraph_structure_survives_reassembly() {
        let text = "one two\n\nthree four\n\nfive\n\nsix seven eight";
        let pages = paginate(text, 12);
        let reassembled = pages.join("\n\n");
        let original: Vec<&str> = text.split("\n\n").collect();
        let restored: Vec<&str> = reassembled.split("\n\n").collect();
        assert_eq!(original, restored);
    }

    #[test]
    fn oversized_paragraph_becomes_its_own_page() {
        let long = "x".repeat(50);
        let text = format!("short\n\n{long}\n\ntail");
        let pages = paginate(&text, 10);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[1], long);
    }

    #[test]
    fn no_page_exceeds_limit_by_more_than_one_paragraph() {
        let text = "alpha beta\n\ngamma\n\ndelta epsilon zeta\n\neta\n\ntheta iota";
        let limit = 12;
        let max_paragraph = text
            .split("\n\n")
            .map(|p| p.chars().count())
            .max()
            .unwrap_or(0);
        for page in paginate(text, limit) {
            assert!(page.chars().count() <= limit + max_paragraph + 2);
        }
    }

    #[test]
    fn multiple_blank_lines_count_as_one_boundary() {
        let pages = paginate("a\n\n\n\n\nb", 100);
        assert_eq!(pages, vec!["a\n\nb".to_string()]);
    }

    #[test]
    fn blank_lines_with_whitespace_still_separate() {
        let pages = paginate("a\n   \nb", 1);
        assert_eq!(pages, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn spec_scenario_small_page_size_yields_multiple_pages() {
        let text = "Chapter 1: Intro\n\nHello world.\n\nChapter 2: Body\n\nMore text.";
        let pages = paginate(text, 10);
        assert!(pages.len() >= 2);
    }
}
