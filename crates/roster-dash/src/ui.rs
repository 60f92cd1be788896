use crate::theme::{self, contact_color, presence_color};
use anyhow::Result;
use crossterm::{
    cursor::Show,
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph},
    Frame, Terminal,
};
use roster_core::layout::{DashboardFrame, HeaderBlock, RenderError, RosterLine};
use roster_core::scheduler::RenderSink;
use std::io;

const FALLBACK_ROWS: u16 = 25;
const PANEL_TITLE: &str = "Friends";

pub type DashTerminal = Terminal<CrosstermBackend<io::Stdout>>;

pub fn setup_terminal() -> Result<DashTerminal> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

/// Works without the terminal handle so it can run even if the render task died.
pub fn restore_terminal() -> Result<()> {
    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen, Show)?;
    Ok(())
}

pub struct TerminalSink<B: Backend> {
    terminal: Terminal<B>,
    min_rows: u16,
}

impl<B: Backend> TerminalSink<B> {
    pub fn new(terminal: Terminal<B>, reserved_rows: usize) -> Self {
        let reserved = u16::try_from(reserved_rows).unwrap_or(u16::MAX);
        Self {
            terminal,
            min_rows: reserved.saturating_add(2),
        }
    }

    #[cfg(test)]
    pub fn terminal(&self) -> &Terminal<B> {
        &self.terminal
    }
}

impl<B: Backend + Send> RenderSink for TerminalSink<B> {
    fn rows(&self) -> u16 {
        self.terminal
            .size()
            .map(|area| area.height)
            .unwrap_or(FALLBACK_ROWS)
    }

    fn render(&mut self, frame: &DashboardFrame) -> Result<(), RenderError> {
        let rows = self.rows();
        if rows < self.min_rows {
            return Err(RenderError::Undersized {
                rows,
                required: self.min_rows,
            });
        }
        self.terminal.draw(|f| draw_dashboard(f, frame))?;
        Ok(())
    }
}

fn ellipsize(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    if max <= 3 {
        return "...".chars().take(max).collect();
    }
    let prefix: String = input.chars().take(max - 3).collect();
    format!("{prefix}...")
}

fn header_lines(header: &HeaderBlock, width: usize) -> Vec<Line<'static>> {
    let counts = format!(
        "Friends: {} | Pending: {} | Blocked: {}",
        header.counts.friends, header.counts.pending, header.counts.blocked
    );
    let self_color = presence_color(header.self_state);
    let mut lines = vec![Line::from(Span::styled(
        ellipsize(&counts, width),
        theme::MUTED_STYLE,
    ))];
    if let Some(banner) = &header.banner {
        lines.push(Line::from(Span::styled(
            ellipsize(banner, width),
            theme::BANNER_STYLE,
        )));
    }
    lines.push(Line::from(Span::styled(
        ellipsize(&header.self_name, width),
        Style::default().fg(self_color).add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(Span::styled(
        ellipsize(&header.self_status, width),
        Style::default().fg(self_color),
    )));
    lines
}

fn entry_lines(entry: &RosterLine, width: usize) -> [Line<'static>; 2] {
    let color = contact_color(entry.state, entry.playing);
    [
        Line::from(Span::styled(
            ellipsize(&entry.name, width),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            ellipsize(&format!("  {}", entry.status), width),
            Style::default().fg(color),
        )),
    ]
}

pub fn draw_dashboard(f: &mut Frame, frame: &DashboardFrame) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme::BORDER))
        .title(Span::styled(PANEL_TITLE, theme::TITLE_STYLE));
    let area = f.size();
    let inner = block.inner(area);
    f.render_widget(block, area);

    let width = usize::from(inner.width);
    let header = header_lines(&frame.header, width);
    let header_height = u16::try_from(header.len()).unwrap_or(u16::MAX);
    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(header_height),
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(inner);

    f.render_widget(Paragraph::new(Text::from(header)), sections[0]);
    f.render_widget(
        Paragraph::new(Line::from(Span::styled(
            "─".repeat(width),
            Style::default().fg(theme::BORDER),
        ))),
        sections[1],
    );
    let entries: Vec<Line<'static>> = frame
        .entries
        .iter()
        .flat_map(|entry| entry_lines(entry, width))
        .collect();
    f.render_widget(Paragraph::new(Text::from(entries)), sections[2]);
    render_indicator(f, frame, sections[3]);
}

fn render_indicator(f: &mut Frame, frame: &DashboardFrame, area: Rect) {
    let Some(indicator) = frame.scroll_indicator.as_deref() else {
        return;
    };
    f.render_widget(
        Paragraph::new(Line::from(Span::styled(indicator.to_string(), theme::MUTED_STYLE)))
            .alignment(Alignment::Right),
        area,
    );
}
