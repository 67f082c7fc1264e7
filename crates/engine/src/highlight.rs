//! Highlight anchoring.
//!
//! Highlights store only the selected text, not offsets. Rendering
//! re-locates each highlight by a first-match substring search, line by
//! line. A highlight whose text is not found verbatim on the page (page
//! boundaries shifted, or the page changed) silently fails to render; a
//! highlight whose text repeats on a line may anchor to the earlier
//! occurrence. Both are accepted, documented behavior.

use marginalia_core::Highlight;

/// One run of page text, optionally marked with the index of the highlight
/// (into the slice passed to [`render_page`]) that covers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
    pub highlight: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightedLine {
    pub fragments: Vec<Fragment>,
}

impl HighlightedLine {
    /// The line's text with markers dropped.
    pub fn plain(&self) -> String {
        self.fragments
            .iter()
            .map(|fragment| fragment.text.as_str())
            .collect()
    }
}

/// Wrap every highlight found on this page's text, in highlight creation
/// order, marking at most the first occurrence per line.
pub fn render_page(page_text: &str, highlights: &[&Highlight]) -> Vec<HighlightedLine> {
    page_text
        .split('\n')
        .map(|line| render_line(line, highlights))
        .collect()
}

fn render_line(line: &str, highlights: &[&Highlight]) -> HighlightedLine {
    let mut fragments = vec![Fragment {
        text: line.to_string(),
        highlight: None,
    }];

    for (index, highlight) in highlights.iter().enumerate() {
        if highlight.text.is_empty() {
            continue;
        }
        mark_first_match(&mut fragments, &highlight.text, index);
    }

    HighlightedLine { fragments }
}

/// Split the first unmarked fragment containing `needle` into
/// before / marked / after. Later highlights keep searching the resulting
/// fragment list, so several can coexist on one line.
fn mark_first_match(fragments: &mut Vec<Fragment>, needle: &str, highlight_index: usize) {
    for position in 0..fragments.len() {
        if fragments[position].highlight.is_some() {
            continue;
        }
        let Some(start) = fragments[position].text.find(needle) else {
            continue;
        };

        let fragment = fragments.remove(position);
        let end = start + needle.len();
        let mut insert_at = position;

        if start > 0 {
            fragments.insert(
                insert_at,
                Fragment {
                    text: fragment.text[..start].to_string(),
                    highlight: None,
                },
            );
            insert_at += 1;
        }
        fragments.insert(
            insert_at,
            Fragment {
                text: fragment.text[start..end].to_string(),
                highlight: Some(highlight_index),
            },
        );
        insert_at += 1;
        if end < fragment.text.len() {
            fragments.insert(
                insert_at,
                Fragment {
                    text: fragment.text[end..].to_string(),
                    highlight: None,
                },
            );
        }
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marginalia_core::{DocumentId, HighlightColor};

    fn make_highlight(text: &str) -> Highlight {
        Highlight::new(
            DocumentId("doc".to_string()),
            text,
            HighlightColor::Yellow,
            "",
            0,
        )
    }

    fn marked_texts(lines: &[HighlightedLine]) -> Vec<(String, usize)> {
        lines
            .iter()
            .flat_map(|line| line.fragments.iter())
            .filter_map(|fragment| {
                fragment
                    .highlight
                    .map(|index| (fragment.text.clone(), index))
            })
            .collect()
    }

    #[test]
    fn round_trip_marks_created_text_exactly_once() {
        let highlight = make_highlight("quick brown");
        let lines = render_page("the quick brown fox", &[&highlight]);
        let marked = marked_texts(&lines);
        assert_eq!(marked, vec![("quick brown".to_string(), 0)]);
        assert_eq!(lines[0].plain(), "the quick brown fox");
    }

    #[test]
    fn missing_text_renders_nothing_without_error() {
        let highlight = make_highlight("not on this page");
        let lines = render_page("some other words", &[&highlight]);
        assert!(marked_texts(&lines).is_empty());
        assert_eq!(lines[0].plain(), "some other words");
    }

    #[test]
    fn first_occurrence_wins_even_when_wrong() {
        // The stored selection came from the second "bank", but first-match
        // anchoring picks the earlier one. Expected behavior, not a defect.
        let highlight = make_highlight("bank");
        let lines = render_page("river bank and savings bank", &[&highlight]);
        let marked = marked_texts(&lines);
        assert_eq!(marked.len(), 1);
        let mark_start = lines[0].fragments[0].text.len();
        assert_eq!(mark_start, "river ".len());
    }

    #[test]
    fn multiple_highlights_coexist_on_one_line() {
        let first = make_highlight("alpha");
        let second = make_highlight("gamma");
        let lines = render_page("alpha beta gamma delta", &[&first, &second]);
        let marked = marked_texts(&lines);
        assert_eq!(
            marked,
            vec![("alpha".to_string(), 0), ("gamma".to_string(), 1)]
        );
    }

    #[test]
    fn marked_spans_are_not_rematched_by_later_highlights() {
        let first = make_highlight("one two");
        let second = make_highlight("two");
        let lines = render_page("one two three two", &[&first, &second]);
        let marked = marked_texts(&lines);
        // The second highlight must match the trailing "two", not the text
        // already wrapped by the first.
        assert_eq!(
            marked,
            vec![("one two".to_string(), 0), ("two".to_string(), 1)]
        );
        assert_eq!(lines[0].plain(), "one two three two");
    }

    #[test]
    fn text_spanning_lines_is_never_found() {
        let highlight = make_highlight("end\nstart");
        let lines = render_page("the end\nstart again", &[&highlight]);
        assert!(marked_texts(&lines).is_empty());
    }

    #[test]
    fn rendering_is_idempotent() {
        let highlight = make_highlight("stable");
        let first = render_page("a stable anchor", &[&highlight]);
        let second = render_page("a stable anchor", &[&highlight]);
        assert_eq!(first, second);
    }

    #[test]
    fn only_first_occurrence_per_line_is_marked() {
        let highlight = make_highlight("dot");
        let lines = render_page("dot dot dot", &[&highlight]);
        assert_eq!(marked_texts(&lines).len(), 1);
    }

    #[test]
    fn empty_line_renders_one_empty_fragment() {
        let highlight = make_highlight("x");
        let lines = render_page("", &[&highlight]);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].fragments.len(), 1);
        assert_eq!(lines[0].fragments[0].text, "");
    }
}
