//! DOCX conversion via an external `pandoc` subprocess, plus the HTML
//! stripping shared with chapter detection.

use std::cell::RefCell;
use std::io::Write as _;
use std::process::Command;

use marginalia_core::SourceType;

use crate::IngestError;

/// Capability handle for the external DOCX converter: raw bytes in,
/// rendered HTML out.
pub trait DocxConverter {
    fn convert_to_html(&self, bytes: &[u8]) -> Result<String, IngestError>;
}

#[derive(Debug, Default)]
enum PandocState {
    #[default]
    Unprobed,
    Available,
    Unavailable(String),
}

/// `pandoc -f docx -t html` wrapper. Availability is probed once per
/// session and cached; a missing binary is the "converter unavailable"
/// engine failure, reported before any conversion is attempted.
#[derive(Debug)]
pub struct PandocConverter {
    command: String,
    state: RefCell<PandocState>,
}

impl Default for PandocConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl PandocConverter {
    pub fn new() -> Self {
        Self::with_command("pandoc")
    }

    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            state: RefCell::new(PandocState::Unprobed),
        }
    }

    fn ensure_available(&self) -> Result<(), IngestError> {
        let mut state = self.state.borrow_mut();
        if let PandocState::Unprobed = *state {
            *state = match Command::new(&self.command).arg("--version").output() {
                Ok(output) if output.status.success() => PandocState::Available,
                Ok(output) => PandocState::Unavailable(format!(
                    "`{} --version` exited with {}",
                    self.command, output.status
                )),
                Err(err) => PandocState::Unavailable(format!("{}: {err}", self.command)),
            };
        }

        match &*state {
            PandocState::Available => Ok(()),
            PandocState::Unavailable(message) => Err(IngestError::EngineUnavailable {
                engine: "pandoc",
                message: message.clone(),
            }),
            PandocState::Unprobed => unreachable!("state probed above"),
        }
    }
}

impl DocxConverter for PandocConverter {
    fn convert_to_html(&self, bytes: &[u8]) -> Result<String, IngestError> {
        self.ensure_available()?;

        let mut input = tempfile::Builder::new().suffix(".docx").tempfile()?;
        input.write_all(bytes)?;
        input.flush()?;

        let output = Command::new(&self.command)
            .arg("-f")
            .arg("docx")
            .arg("-t")
            .arg("html")
            .arg("--wrap=none")
            .arg(input.path())
            .output()?;

        if !output.status.success() {
            return Err(IngestError::Extraction {
                format: SourceType::Docx,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Strip tags from HTML, keeping paragraph boundaries as blank lines so the
/// result paginates the same way plain text does. Closing block tags become
/// paragraph breaks, `<br>` a line break; common entities are decoded.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(lt) = rest.find('<') {
        decode_entities_into(&mut out, &rest[..lt]);
        let after = &rest[lt + 1..];
        match after.find('>') {
            Some(gt) => {
                push_tag_break(&mut out, &after[..gt]);
                rest = &after[gt + 1..];
            }
            None => {
                // Unterminated tag: discard the remainder.
                rest = "";
            }
        }
    }
    decode_entities_into(&mut out, rest);

    let collapsed = collapse_blank_runs(&out);
    collapsed.trim().to_string()
}

fn push_tag_break(out: &mut String, tag: &str) {
    let closing = tag.starts_with('/');
    let name: String = tag
        .trim_start_matches('/')
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();

    match name.as_str() {
        "br" => out.push('\n'),
        "p" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "li" | "div" | "tr" | "blockquote"
        | "pre" | "ul" | "ol" | "table" => {
            if closing {
                out.push_str("\n\n");
            }
        }
        _ => {}
    }
}

fn decode_entities_into(out: &mut String, text: &str) {
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];
        let semi = tail
            .char_indices()
            .take(8)
            .find(|(_, ch)| *ch == ';')
            .map(|(index, _)| index);
        match semi {
            Some(semi) => {
                let name = &tail[..semi];
                match decode_entity(name) {
                    Some(ch) => out.push(ch),
                    None => {
                        out.push('&');
                        rest = tail;
                        continue;
                    }
                }
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" | "#39" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x") {
                u32::from_str_radix(hex, 16).ok()
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok()
            } else {
                None
            };
            code.and_then(char::from_u32)
        }
    }
}

fn collapse_blank_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newline_run = 0usize;
    for ch in text.chars() {
        if ch == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                out.push(ch);
            }
        } else {
            newline_run = 0;
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_become_blank_line_boundaries() {
        let html = "<p>first para</p><p>second para</p>";
        assert_eq!(html_to_text(html), "first para\n\nsecond para");
    }

    #[test]
    fn nested_inline_tags_are_stripped_flat() {
        let html = "<p>some <strong>bold <em>and italic</em></strong> text</p>";
        assert_eq!(html_to_text(html), "some bold and italic text");
    }

    #[test]
    fn entities_are_decoded() {
        assert_eq!(html_to_text("a &amp; b &lt;c&gt;"), "a & b <c>");
        assert_eq!(html_to_text("it&#39;s &#x41;"), "it's A");
        assert_eq!(html_to_text("AT&T rocks"), "AT&T rocks");
    }

    #[test]
    fn br_is_a_single_line_break() {
        assert_eq!(html_to_text("one<br/>two"), "one\ntwo");
    }

    #[test]
    fn blank_runs_collapse_to_one_boundary() {
        let html = "<div><p>a</p></div><p>b</p>";
        assert_eq!(html_to_text(html), "a\n\nb");
    }

    #[test]
    fn unterminated_tag_discards_remainder() {
        assert_eq!(html_to_text("ok <broken"), "ok");
    }

    #[test]
    fn missing_converter_binary_is_engine_unavailable() {
        let converter = PandocConverter::with_command("marginalia-no-such-binary");
        let err = converter.convert_to_html(b"PK..").unwrap_err();
        assert!(matches!(
            err,
            IngestError::EngineUnavailable {
                engine: "pandoc",
                ..
            }
        ));
        // Probe result is cached; the second call fails the same way.
        let err = converter.convert_to_html(b"PK..").unwrap_err();
        assert!(matches!(err, IngestError::EngineUnavailable { .. }));
    }
}
