//! ratatui-based UI.

use std::io::{self, Stdout};
use std::time::Duration;

use anyhow::Context as _;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{event, terminal};
use marginalia_application::AppContext;
use marginalia_chat::{AgentClient, AgentConfig};
use marginalia_core::{
    ChatMessage, Chapter, Document, DocumentColor, DocumentId, Highlight, HighlightColor,
    SourceType,
};
use marginalia_engine::{PAGE_CHARS, paginate, render_page, split_pdf_pages};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, Borders, Clear, HighlightSpacing, List, ListItem, ListState, Paragraph, Wrap,
};
use unicode_width::UnicodeWidthStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiExit {
    Quit,
    /// Ingest this file, then re-enter the UI.
    Import { path: String },
}

#[derive(Debug, Clone)]
pub struct UiOutcome {
    pub ctx: AppContext,
    pub exit: UiExit,
}

pub struct Ui {
    ctx: AppContext,
    agent: AgentClient,
    reader: ReaderPanel,
    chat_panel: ChatPanel,
    highlight_panel: HighlightPanel,
    goto_panel: GotoPanel,
    annotations_panel: AnnotationsPanel,
    import_panel: ImportPanel,
    confirm_delete: Option<DocumentId>,
}

impl Ui {
    pub fn new(mut ctx: AppContext) -> Self {
        ctx.settings.normalize();
        let agent = AgentClient::new(AgentConfig::from_settings(&ctx.settings));
        Self {
            ctx,
            agent,
            reader: ReaderPanel::default(),
            chat_panel: ChatPanel::default(),
            highlight_panel: HighlightPanel::default(),
            goto_panel: GotoPanel::default(),
            annotations_panel: AnnotationsPanel::default(),
            import_panel: ImportPanel::default(),
            confirm_delete: None,
        }
    }

    pub fn run(&mut self) -> anyhow::Result<UiOutcome> {
        let mut terminal = setup_terminal()?;
        terminal.clear().ok();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.event_loop(&mut terminal)
        }));
        let restore_result = restore_terminal(&mut terminal);

        match (result, restore_result) {
            (Ok(outcome), Ok(())) => outcome,
            (Ok(outcome), Err(err)) => outcome.and(Err(err)),
            (Err(panic), _) => Err(anyhow::anyhow!(panic_to_string(panic))),
        }
    }

    fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    ) -> anyhow::Result<UiOutcome> {
        let tick_rate = Duration::from_millis(250);
        let mut needs_redraw = true;

        loop {
            if needs_redraw {
                terminal.draw(|frame| self.draw(frame.area(), frame))?;
                needs_redraw = false;
            }

            if !event::poll(tick_rate)? {
                continue;
            }

            match event::read()? {
                Event::Resize(_, _) => {
                    needs_redraw = true;
                }
                Event::Key(key) => {
                    if key.kind == KeyEventKind::Release {
                        continue;
                    }
                    needs_redraw = true;

                    let exit = if self.chat_panel.open {
                        self.handle_chat_key(key)
                    } else if self.import_panel.open {
                        self.handle_import_key(key)
                    } else if self.confirm_delete.is_some() {
                        self.handle_confirm_delete_key(key)
                    } else if self.reader.open && self.highlight_panel.open {
                        self.handle_highlight_key(key)
                    } else if self.reader.open && self.goto_panel.open {
                        self.handle_goto_key(key)
                    } else if self.reader.open && self.annotations_panel.open {
                        self.handle_annotations_key(key)
                    } else if self.reader.open {
                        self.handle_reader_key(key)
                    } else {
                        self.handle_library_key(key)
                    };

                    if let Some(exit) = exit {
                        return Ok(UiOutcome {
                            ctx: self.ctx.clone(),
                            exit,
                        });
                    }
                }
                _ => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Key handling
    // ------------------------------------------------------------------

    fn handle_library_key(&mut self, key: KeyEvent) -> Option<UiExit> {
        self.ctx.status = None;
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Some(UiExit::Quit),
            KeyCode::Up | KeyCode::Char('k') => {
                self.ctx.selected = self.ctx.selected.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if !self.ctx.documents.is_empty() {
                    self.ctx.selected = (self.ctx.selected + 1).min(self.ctx.documents.len() - 1);
                }
            }
            KeyCode::Enter => {
                if let Some(doc) = self.ctx.selected_document() {
                    self.reader.open_document(doc);
                }
            }
            KeyCode::Char('a') => {
                self.import_panel.open = true;
                self.import_panel.input.clear();
                self.import_panel.error = None;
            }
            KeyCode::Char('d') => {
                if let Some(doc) = self.ctx.selected_document() {
                    self.confirm_delete = Some(doc.id.clone());
                }
            }
            KeyCode::Char('c') => {
                self.chat_panel.open = true;
            }
            KeyCode::Char('e') => {
                self.export_selected();
            }
            _ => {}
        }
        None
    }

    fn handle_reader_key(&mut self, key: KeyEvent) -> Option<UiExit> {
        let Some(id) = self.reader.document_id.clone() else {
            self.reader.close();
            return None;
        };
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') => {
                self.reader.close();
            }
            KeyCode::Right | KeyCode::Char('l') | KeyCode::PageDown => {
                let next = (self.reader.page + 1).min(self.reader.last_page());
                self.turn_to(&id, next);
            }
            KeyCode::Left | KeyCode::Char('h') | KeyCode::PageUp => {
                let previous = self.reader.page.saturating_sub(1);
                self.turn_to(&id, previous);
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.reader.scroll = self.reader.scroll.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.reader.scroll = self.reader.scroll.saturating_add(1);
            }
            KeyCode::Char('b') => {
                self.ctx.toggle_bookmark(&id, self.reader.page);
            }
            KeyCode::Char('g') => {
                self.goto_panel.open = true;
                self.goto_panel.input.clear();
                self.goto_panel.error = None;
            }
            KeyCode::Char('m') => {
                self.highlight_panel = HighlightPanel {
                    open: true,
                    ..HighlightPanel::default()
                };
            }
            KeyCode::Char('n') => {
                self.annotations_panel.open = true;
                self.annotations_panel.selected = 0;
            }
            KeyCode::Char('c') => {
                self.chat_panel.open = true;
            }
            _ => {}
        }
        None
    }

    fn turn_to(&mut self, id: &DocumentId, page: u32) {
        if page != self.reader.page {
            self.reader.page = page;
            self.reader.scroll = 0;
            self.ctx.set_current_page(id, page);
        }
    }

    fn handle_goto_key(&mut self, key: KeyEvent) -> Option<UiExit> {
        match key.code {
            KeyCode::Esc => self.goto_panel.open = false,
            KeyCode::Enter => {
                match self.goto_panel.input.trim().parse::<u32>() {
                    Ok(number) if number >= 1 && number <= self.reader.page_count() => {
                        let id = self.reader.document_id.clone();
                        if let Some(id) = id {
                            self.turn_to(&id, number - 1);
                        }
                        self.goto_panel.open = false;
                    }
                    _ => {
                        self.goto_panel.error = Some(format!(
                            "Enter a page between 1 and {}",
                            self.reader.page_count()
                        ));
                    }
                }
            }
            KeyCode::Backspace => {
                self.goto_panel.input.pop();
            }
            KeyCode::Char(ch) if ch.is_ascii_digit() => self.goto_panel.input.push(ch),
            _ => {}
        }
        None
    }

    fn handle_highlight_key(&mut self, key: KeyEvent) -> Option<UiExit> {
        match key.code {
            KeyCode::Esc => self.highlight_panel.open = false,
            KeyCode::Tab => {
                self.highlight_panel.focus = self.highlight_panel.focus.next();
            }
            KeyCode::Right if self.highlight_panel.focus == HighlightFocus::Color => {
                self.highlight_panel.color = self.highlight_panel.color.next();
            }
            KeyCode::Enter => self.create_highlight(),
            KeyCode::Backspace => match self.highlight_panel.focus {
                HighlightFocus::Text => {
                    self.highlight_panel.text.pop();
                }
                HighlightFocus::Note => {
                    self.highlight_panel.note.pop();
                }
                HighlightFocus::Color => {}
            },
            KeyCode::Char(ch) => match self.highlight_panel.focus {
                HighlightFocus::Text => self.highlight_panel.text.push(ch),
                HighlightFocus::Note => self.highlight_panel.note.push(ch),
                HighlightFocus::Color => {}
            },
            _ => {}
        }
        None
    }

    fn create_highlight(&mut self) {
        let Some(id) = self.reader.document_id.clone() else {
            return;
        };
        let text = self.highlight_panel.text.clone();
        if text.trim().is_empty() {
            self.highlight_panel.error = Some("Highlight text is empty".to_string());
            return;
        }
        // Creation invariant: the selection must exist verbatim on this page.
        if !self.reader.current_page_text().contains(&text) {
            self.highlight_panel.error = Some("Text not found on this page".to_string());
            return;
        }
        self.ctx.add_highlight(Highlight::new(
            id,
            text,
            self.highlight_panel.color,
            self.highlight_panel.note.clone(),
            self.reader.page,
        ));
        self.highlight_panel = HighlightPanel::default();
    }

    fn handle_annotations_key(&mut self, key: KeyEvent) -> Option<UiExit> {
        let Some(id) = self.reader.document_id.clone() else {
            self.annotations_panel.open = false;
            return None;
        };
        let count = self.ctx.highlights_for_document(&id).len();
        match key.code {
            KeyCode::Esc | KeyCode::Char('n') => self.annotations_panel.open = false,
            KeyCode::Up | KeyCode::Char('k') => {
                self.annotations_panel.selected = self.annotations_panel.selected.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if count > 0 {
                    self.annotations_panel.selected =
                        (self.annotations_panel.selected + 1).min(count - 1);
                }
            }
            KeyCode::Enter => {
                let page = self
                    .ctx
                    .highlights_for_document(&id)
                    .get(self.annotations_panel.selected)
                    .map(|h| h.page);
                if let Some(page) = page {
                    self.turn_to(&id, page.min(self.reader.last_page()));
                    self.annotations_panel.open = false;
                }
            }
            KeyCode::Char('d') => {
                let highlight_id = self
                    .ctx
                    .highlights_for_document(&id)
                    .get(self.annotations_panel.selected)
                    .map(|h| h.id.clone());
                if let Some(highlight_id) = highlight_id {
                    self.ctx.remove_highlight(&highlight_id);
                    self.annotations_panel.selected =
                        self.annotations_panel.selected.min(count.saturating_sub(2));
                }
            }
            _ => {}
        }
        None
    }

    fn handle_import_key(&mut self, key: KeyEvent) -> Option<UiExit> {
        match key.code {
            KeyCode::Esc => self.import_panel.open = false,
            KeyCode::Enter => {
                let path = self.import_panel.input.trim().to_string();
                if path.is_empty() {
                    self.import_panel.error = Some("Enter a file path".to_string());
                } else {
                    self.import_panel.open = false;
                    return Some(UiExit::Import { path });
                }
            }
            KeyCode::Backspace => {
                self.import_panel.input.pop();
            }
            KeyCode::Char(ch) => self.import_panel.input.push(ch),
            _ => {}
        }
        None
    }

    fn handle_confirm_delete_key(&mut self, key: KeyEvent) -> Option<UiExit> {
        match key.code {
            KeyCode::Char('y') | KeyCode::Enter => {
                if let Some(id) = self.confirm_delete.take() {
                    if self.reader.document_id.as_ref() == Some(&id) {
                        self.reader.close();
                    }
                    self.ctx.delete_document(&id);
                    self.ctx.set_status("Document deleted");
                }
            }
            _ => self.confirm_delete = None,
        }
        None
    }

    fn handle_chat_key(&mut self, key: KeyEvent) -> Option<UiExit> {
        match key.code {
            KeyCode::Esc => self.chat_panel.open = false,
            KeyCode::Enter => self.send_chat_message(),
            KeyCode::Backspace => {
                self.chat_panel.input.pop();
            }
            KeyCode::Char(ch) => self.chat_panel.input.push(ch),
            _ => {}
        }
        None
    }

    /// Blocking ask: input stays frozen until the agent answers or errors
    /// out. A failed request becomes a synthetic assistant message; the
    /// history is otherwise untouched.
    fn send_chat_message(&mut self) {
        let question = self.chat_panel.input.trim().to_string();
        if question.is_empty() {
            return;
        }
        self.chat_panel.input.clear();
        self.ctx.push_chat(ChatMessage::user(question.clone()));

        match self.agent.ask(&question) {
            Ok(answer) => {
                self.ctx.push_chat(ChatMessage::assistant(
                    answer.answer,
                    answer.sources,
                    answer.followups,
                ));
            }
            Err(err) => {
                self.ctx.push_chat(ChatMessage::assistant(
                    format!("Sorry, I couldn't answer that: {err}"),
                    Vec::new(),
                    Vec::new(),
                ));
            }
        }
    }

    fn export_selected(&mut self) {
        let Some(doc) = self.ctx.selected_document() else {
            return;
        };
        let id = doc.id.clone();
        let file_name = format!("{}-annotations.txt", slugify(&doc.title));
        match self.ctx.export_annotations(&id) {
            Some(export) if !export.is_empty() => match std::fs::write(&file_name, export) {
                Ok(()) => self.ctx.set_status(format!("Annotations saved to {file_name}")),
                Err(err) => self.ctx.set_status(format!("Export failed: {err}")),
            },
            _ => self.ctx.set_status("No annotations to export"),
        }
    }

    // ------------------------------------------------------------------
    // Drawing
    // ------------------------------------------------------------------

    fn draw(&mut self, area: Rect, frame: &mut ratatui::Frame) {
        frame.render_widget(Clear, area);
        if self.reader.open {
            self.draw_reader(area, frame);
        } else {
            self.draw_library_screen(area, frame);
        }

        if self.goto_panel.open {
            self.draw_goto_panel(area, frame);
        }
        if self.highlight_panel.open {
            self.draw_highlight_panel(area, frame);
        }
        if self.annotations_panel.open {
            self.draw_annotations_panel(area, frame);
        }
        if self.import_panel.open {
            self.draw_import_panel(area, frame);
        }
        if self.confirm_delete.is_some() {
            self.draw_confirm_delete(area, frame);
        }
        if self.chat_panel.open {
            self.draw_chat_panel(area, frame);
        }
    }

    fn draw_library_screen(&self, area: Rect, frame: &mut ratatui::Frame) {
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2),
                Constraint::Min(0),
                Constraint::Length(2),
            ])
            .split(area);

        let header = match &self.ctx.status {
            Some(status) => format!("Marginalia — {status}"),
            None => "Marginalia".to_string(),
        };
        frame.render_widget(
            Paragraph::new(header)
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::BOTTOM)),
            layout[0],
        );

        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
            .split(layout[1]);
        self.draw_library_list(body[0], frame);
        self.draw_details(body[1], frame);

        frame.render_widget(
            Paragraph::new("Enter read  a add  d delete  e export  c chat  q quit")
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::TOP)),
            layout[2],
        );
    }

    fn draw_library_list(&self, area: Rect, frame: &mut ratatui::Frame) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!("Library ({})", self.ctx.documents.len()));

        if self.ctx.documents.is_empty() {
            let lines = vec![
                Line::raw("No documents yet."),
                Line::raw(""),
                Line::raw("Press a to add a .pdf, .docx or .txt file."),
            ];
            frame.render_widget(
                Paragraph::new(Text::from(lines))
                    .block(block)
                    .wrap(Wrap { trim: true }),
                area,
            );
            return;
        }

        let max_width = area.width.saturating_sub(14) as usize;
        let items: Vec<ListItem> = self
            .ctx
            .documents
            .iter()
            .map(|doc| {
                let title = truncate_to_width(&doc.title, max_width);
                let line = Line::from(vec![
                    Span::styled("● ", Style::default().fg(document_color(doc.color))),
                    Span::raw(title),
                    Span::styled(
                        format!("  {} {:.0}%", doc.source_type, doc.progress),
                        Style::default().fg(Color::DarkGray),
                    ),
                ]);
                ListItem::new(line)
            })
            .collect();

        let list = List::new(items)
            .block(block)
            .highlight_style(
                Style::default()
                    .add_modifier(Modifier::BOLD)
                    .add_modifier(Modifier::REVERSED),
            )
            .highlight_symbol("> ")
            .highlight_spacing(HighlightSpacing::Always);
        let mut state = ListState::default();
        state.select(Some(self.ctx.selected));
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn draw_details(&self, area: Rect, frame: &mut ratatui::Frame) {
        let block = Block::default().borders(Borders::ALL).title("Details");
        let Some(doc) = self.ctx.selected_document() else {
            frame.render_widget(Paragraph::new("").block(block), area);
            return;
        };

        let highlight_count = self.ctx.highlights_for_document(&doc.id).len();
        let mut lines = vec![
            Line::from(Span::styled(
                doc.title.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            )),
            Line::raw(match &doc.author {
                Some(author) => format!("by {author}"),
                None => "author unknown".to_string(),
            }),
            Line::raw(""),
            Line::raw(format!(
                "{}  ·  {}  ·  {}",
                doc.file_name,
                doc.source_type,
                human_size(doc.file_size)
            )),
            Line::raw(format!(
                "{} pages  ·  {:.0}% read  ·  {} bookmarks  ·  {} highlights",
                doc.page_count,
                doc.progress,
                doc.bookmarks.len(),
                highlight_count
            )),
            Line::raw(format!("added {}", doc.uploaded_at.format("%Y-%m-%d"))),
            Line::raw(""),
        ];

        if doc.chapters.is_empty() {
            lines.push(Line::styled(
                "No chapters detected.",
                Style::default().fg(Color::DarkGray),
            ));
        } else {
            lines.push(Line::styled(
                "Chapters",
                Style::default().add_modifier(Modifier::UNDERLINED),
            ));
            for chapter in doc.chapters.iter().take(12) {
                lines.push(Line::raw(format!(
                    "  p.{:<4} {}",
                    chapter.page + 1,
                    chapter.title
                )));
            }
            if doc.chapters.len() > 12 {
                lines.push(Line::styled(
                    format!("  … and {} more", doc.chapters.len() - 12),
                    Style::default().fg(Color::DarkGray),
                ));
            }
        }

        frame.render_widget(
            Paragraph::new(Text::from(lines))
                .block(block)
                .wrap(Wrap { trim: false }),
            area,
        );
    }

    fn draw_reader(&self, area: Rect, frame: &mut ratatui::Frame) {
        let Some(id) = self.reader.document_id.clone() else {
            return;
        };
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2),
                Constraint::Min(0),
                Constraint::Length(2),
            ])
            .split(area);

        let (title, bookmarked, chapter) = match self.ctx.document(&id) {
            Some(doc) => (
                doc.title.clone(),
                doc.bookmarks.contains(&self.reader.page),
                chapter_for_page(&doc.chapters, self.reader.page).map(|c| c.title.clone()),
            ),
            None => ("(missing)".to_string(), false, None),
        };
        let mut header = format!(
            "{title} — page {}/{}",
            self.reader.page + 1,
            self.reader.page_count()
        );
        if let Some(chapter) = chapter {
            header.push_str(&format!("  ·  {chapter}"));
        }
        if bookmarked {
            header.push_str("  ·  bookmarked");
        }
        frame.render_widget(
            Paragraph::new(header)
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::BOTTOM)),
            layout[0],
        );

        let page_text = self.reader.current_page_text();
        let highlights = self.ctx.highlights_for_page(&id, self.reader.page);
        let lines = highlighted_lines(&page_text, &highlights);
        frame.render_widget(
            Paragraph::new(Text::from(lines))
                .wrap(Wrap { trim: false })
                .scroll((self.reader.scroll, 0)),
            layout[1],
        );

        frame.render_widget(
            Paragraph::new("←/→ page  g goto  b bookmark  m highlight  n notes  c chat  Esc back")
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::TOP)),
            layout[2],
        );
    }

    fn draw_goto_panel(&self, area: Rect, frame: &mut ratatui::Frame) {
        let popup = centered_rect(40, 20, area);
        frame.render_widget(Clear, popup);
        let mut lines = vec![Line::raw(format!("Go to page: {}_", self.goto_panel.input))];
        if let Some(error) = &self.goto_panel.error {
            lines.push(Line::styled(
                error.clone(),
                Style::default().fg(Color::Red),
            ));
        }
        frame.render_widget(
            Paragraph::new(Text::from(lines))
                .block(Block::default().borders(Borders::ALL).title("Go to")),
            popup,
        );
    }

    fn draw_highlight_panel(&self, area: Rect, frame: &mut ratatui::Frame) {
        let popup = centered_rect(70, 45, area);
        frame.render_widget(Clear, popup);

        let focus_marker = |focus: HighlightFocus| {
            if self.highlight_panel.focus == focus {
                "» "
            } else {
                "  "
            }
        };
        let mut lines = vec![
            Line::raw(format!(
                "{}Text: {}",
                focus_marker(HighlightFocus::Text),
                self.highlight_panel.text
            )),
            Line::raw(format!(
                "{}Note: {}",
                focus_marker(HighlightFocus::Note),
                self.highlight_panel.note
            )),
            Line::from(vec![
                Span::raw(format!("{}Color: ", focus_marker(HighlightFocus::Color))),
                Span::styled(
                    format!(" {} ", self.highlight_panel.color),
                    Style::default()
                        .bg(highlight_color(self.highlight_panel.color))
                        .fg(Color::Black),
                ),
            ]),
            Line::raw(""),
            Line::styled(
                "Tab switch field  → cycle color  Enter save  Esc cancel",
                Style::default().fg(Color::DarkGray),
            ),
        ];
        if let Some(error) = &self.highlight_panel.error {
            lines.push(Line::styled(
                error.clone(),
                Style::default().fg(Color::Red),
            ));
        }
        frame.render_widget(
            Paragraph::new(Text::from(lines))
                .wrap(Wrap { trim: false })
                .block(Block::default().borders(Borders::ALL).title("New highlight")),
            popup,
        );
    }

    fn draw_annotations_panel(&self, area: Rect, frame: &mut ratatui::Frame) {
        let popup = centered_rect(80, 70, area);
        frame.render_widget(Clear, popup);
        let block = Block::default().borders(Borders::ALL).title("Annotations");

        let Some(id) = &self.reader.document_id else {
            return;
        };
        let highlights = self.ctx.highlights_for_document(id);
        if highlights.is_empty() {
            frame.render_widget(
                Paragraph::new("No highlights yet. Press m in the reader to add one.")
                    .block(block)
                    .wrap(Wrap { trim: true }),
                popup,
            );
            return;
        }

        let max_width = popup.width.saturating_sub(16) as usize;
        let items: Vec<ListItem> = highlights
            .iter()
            .map(|h| {
                let mut spans = vec![
                    Span::styled(
                        "■ ",
                        Style::default().fg(highlight_color(h.color)),
                    ),
                    Span::raw(format!("p.{:<4} ", h.page + 1)),
                    Span::raw(truncate_to_width(&h.text, max_width)),
                ];
                if !h.note.trim().is_empty() {
                    spans.push(Span::styled(" ✎", Style::default().fg(Color::DarkGray)));
                }
                ListItem::new(Line::from(spans))
            })
            .collect();

        let list = List::new(items)
            .block(block)
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
            .highlight_spacing(HighlightSpacing::Always);
        let mut state = ListState::default();
        state.select(Some(self.annotations_panel.selected));
        frame.render_stateful_widget(list, popup, &mut state);
    }

    fn draw_import_panel(&self, area: Rect, frame: &mut ratatui::Frame) {
        let popup = centered_rect(70, 25, area);
        frame.render_widget(Clear, popup);
        let mut lines = vec![
            Line::raw("Path to a .pdf, .docx or .txt file:"),
            Line::raw(format!("{}_", self.import_panel.input)),
        ];
        if let Some(error) = &self.import_panel.error {
            lines.push(Line::styled(
                error.clone(),
                Style::default().fg(Color::Red),
            ));
        }
        frame.render_widget(
            Paragraph::new(Text::from(lines))
                .block(Block::default().borders(Borders::ALL).title("Add document")),
            popup,
        );
    }

    fn draw_confirm_delete(&self, area: Rect, frame: &mut ratatui::Frame) {
        let popup = centered_rect(50, 20, area);
        frame.render_widget(Clear, popup);
        let title = self
            .confirm_delete
            .as_ref()
            .and_then(|id| self.ctx.document(id))
            .map(|doc| doc.title.clone())
            .unwrap_or_default();
        let lines = vec![
            Line::raw(format!("Delete \"{title}\" and all its annotations?")),
            Line::raw(""),
            Line::raw("y delete  ·  any other key cancels"),
        ];
        frame.render_widget(
            Paragraph::new(Text::from(lines))
                .wrap(Wrap { trim: true })
                .block(Block::default().borders(Borders::ALL).title("Confirm")),
            popup,
        );
    }

    fn draw_chat_panel(&self, area: Rect, frame: &mut ratatui::Frame) {
        let popup = centered_rect(84, 80, area);
        frame.render_widget(Clear, popup);
        let block = Block::default().borders(Borders::ALL).title("Ask the library");
        let inner = block.inner(popup);
        frame.render_widget(block, popup);

        let sections = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(2)])
            .split(inner);

        let mut lines: Vec<Line> = Vec::new();
        for message in &self.ctx.chat {
            lines.extend(chat_message_lines(message));
            lines.push(Line::raw(""));
        }
        if lines.is_empty() {
            lines.push(Line::styled(
                "Ask anything about your uploaded documents.",
                Style::default().fg(Color::DarkGray),
            ));
        }
        // Keep the tail visible.
        let visible = sections[0].height as usize;
        let skip = lines.len().saturating_sub(visible);
        let lines: Vec<Line> = lines.into_iter().skip(skip).collect();
        frame.render_widget(
            Paragraph::new(Text::from(lines)).wrap(Wrap { trim: false }),
            sections[0],
        );

        frame.render_widget(
            Paragraph::new(format!("> {}_", self.chat_panel.input))
                .block(Block::default().borders(Borders::TOP)),
            sections[1],
        );
    }
}

// ----------------------------------------------------------------------
// Panels
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct ReaderPanel {
    open: bool,
    document_id: Option<DocumentId>,
    pages: Vec<String>,
    page: u32,
    scroll: u16,
}

impl ReaderPanel {
    /// Derive pages at open time: PDFs re-split on their marker lines,
    /// everything else re-paginates from the stored plain text.
    fn open_document(&mut self, doc: &Document) {
        self.pages = match doc.source_type {
            SourceType::Pdf => split_pdf_pages(&doc.content),
            SourceType::Docx | SourceType::Txt => paginate(&doc.content, PAGE_CHARS),
        };
        self.document_id = Some(doc.id.clone());
        self.page = doc.current_page.min(self.last_page());
        self.scroll = 0;
        self.open = true;
    }

    fn close(&mut self) {
        self.open = false;
        self.document_id = None;
        self.pages.clear();
        self.page = 0;
        self.scroll = 0;
    }

    fn page_count(&self) -> u32 {
        self.pages.len().max(1) as u32
    }

    fn last_page(&self) -> u32 {
        self.page_count() - 1
    }

    fn current_page_text(&self) -> String {
        self.pages
            .get(self.page as usize)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
struct ChatPanel {
    open: bool,
    input: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HighlightFocus {
    Text,
    Note,
    Color,
}

impl HighlightFocus {
    fn next(self) -> Self {
        match self {
            HighlightFocus::Text => HighlightFocus::Note,
            HighlightFocus::Note => HighlightFocus::Color,
            HighlightFocus::Color => HighlightFocus::Text,
        }
    }
}

#[derive(Debug, Clone)]
struct HighlightPanel {
    open: bool,
    focus: HighlightFocus,
    text: String,
    note: String,
    color: HighlightColor,
    error: Option<String>,
}

impl Default for HighlightPanel {
    fn default() -> Self {
        Self {
            open: false,
            focus: HighlightFocus::Text,
            text: String::new(),
            note: String::new(),
            color: HighlightColor::Yellow,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct GotoPanel {
    open: bool,
    input: String,
    error: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct AnnotationsPanel {
    open: bool,
    selected: usize,
}

#[derive(Debug, Clone, Default)]
struct ImportPanel {
    open: bool,
    input: String,
    error: Option<String>,
}

// ----------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------

fn highlighted_lines<'a>(page_text: &str, highlights: &[&Highlight]) -> Vec<Line<'a>> {
    render_page(page_text, highlights)
        .into_iter()
        .map(|line| {
            let spans: Vec<Span> = line
                .fragments
                .into_iter()
                .map(|fragment| match fragment.highlight {
                    Some(index) => Span::styled(
                        fragment.text,
                        Style::default()
                            .bg(highlight_color(highlights[index].color))
                            .fg(Color::Black),
                    ),
                    None => Span::raw(fragment.text),
                })
                .collect();
            Line::from(spans)
        })
        .collect()
}

fn chat_message_lines(message: &ChatMessage) -> Vec<Line<'static>> {
    let (label, style) = match message.role {
        marginalia_core::Role::User => ("You", Style::default().add_modifier(Modifier::BOLD)),
        marginalia_core::Role::Assistant => (
            "Assistant",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
    };
    let mut lines = vec![Line::from(vec![
        Span::styled(format!("{label}: "), style),
        Span::raw(message.content.clone()),
    ])];
    if !message.sources.is_empty() {
        lines.push(Line::styled(
            format!("  sources: {}", message.sources.join("; ")),
            Style::default().fg(Color::DarkGray),
        ));
    }
    for followup in &message.followups {
        lines.push(Line::styled(
            format!("  try: {followup}"),
            Style::default().fg(Color::DarkGray),
        ));
    }
    lines
}

/// The chapter the page falls in: the last chapter starting at or before it.
fn chapter_for_page(chapters: &[Chapter], page: u32) -> Option<&Chapter> {
    chapters.iter().rev().find(|chapter| chapter.page <= page)
}

fn document_color(color: DocumentColor) -> Color {
    match color {
        DocumentColor::Red => Color::Red,
        DocumentColor::Orange => Color::LightRed,
        DocumentColor::Yellow => Color::Yellow,
        DocumentColor::Green => Color::Green,
        DocumentColor::Blue => Color::Blue,
        DocumentColor::Purple => Color::Magenta,
    }
}

fn highlight_color(color: HighlightColor) -> Color {
    match color {
        HighlightColor::Yellow => Color::Yellow,
        HighlightColor::Green => Color::Green,
        HighlightColor::Blue => Color::Cyan,
        HighlightColor::Pink => Color::Magenta,
    }
}

fn truncate_to_width(text: &str, max_width: usize) -> String {
    if text.width() <= max_width {
        return text.to_string();
    }
    let mut out = String::new();
    for ch in text.chars() {
        if out.width() + 2 > max_width {
            break;
        }
        out.push(ch);
    }
    out.push('…');
    out
}

fn human_size(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

fn slugify(title: &str) -> String {
    let slug: String = title
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() { "document".to_string() } else { slug }
}

fn setup_terminal() -> anyhow::Result<Terminal<CrosstermBackend<Stdout>>> {
    terminal::enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).context("create terminal")
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> anyhow::Result<()> {
    terminal::disable_raw_mode().context("disable raw mode")?;
    crossterm::execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("leave alt screen")?;
    Ok(())
}

fn panic_to_string(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic: (unknown payload)".to_string()
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
