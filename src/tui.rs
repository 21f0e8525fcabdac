//! Terminal User Interface (TUI) rendering and management.
//!
//! Three panes: the project list, the selected project's server output and
//! the terminal pane (shell output and AI answers). A two-line status bar
//! sits at the bottom.

use std::io::{self, Stdout};

use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen, SetTitle,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, BorderType, Borders, Clear, List, ListItem, ListState, Paragraph};
use ratatui::Terminal;

use crate::ansi::ansi_spans;
use crate::app::{App, Focus, StatusLevel};
use crate::interceptor::Mode;
use crate::manager::Manager;
use crate::output::{LogBuffer, StreamKind};
use crate::project::{Project, ProjectStatus};

pub type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

/// Enables raw mode and enters the alternate screen.
pub fn init_terminal() -> io::Result<TuiTerminal> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, SetTitle("devrack"))?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

pub fn restore_terminal(mut terminal: TuiTerminal) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

const HELP: &[&str] = &[
    "Projects:",
    "  Up/Down    Select project",
    "  s          Start dev server",
    "  x          Stop (also kills untracked servers)",
    "  r          Re-check running servers",
    "  t          Open a shell in the project",
    "  PgUp/PgDn  Scroll output, End to follow",
    "",
    "Terminal:",
    "  i / Tab    Focus the terminal pane",
    "  a, Ctrl-A  Toggle AI mode",
    "  Enter      Run line / ask question",
    "  Ctrl-L     Clear the terminal pane",
    "  Esc        Back to the project list",
    "",
    "  ?          Toggle this help",
    "  q          Quit",
];

pub fn draw(app: &mut App, manager: &Manager, terminal: &mut TuiTerminal) -> io::Result<()> {
    let projects = manager.projects();
    app.set_project_count(projects.len());
    let selected = projects.get(app.selected);

    terminal.draw(|frame| {
        let area = frame.size();
        let vertical = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(4)])
            .split(area);
        let main = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(28), Constraint::Percentage(72)])
            .split(vertical[0]);
        let right = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(main[1]);

        let border_style = Style::default().fg(Color::DarkGray);
        let active_style = Style::default().fg(Color::Green);

        let items: Vec<ListItem> = projects
            .iter()
            .enumerate()
            .map(|(index, project)| project_item(project, index == app.selected, manager))
            .collect();
        let list = List::new(items).block(
            Block::default()
                .title("Projects")
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(if app.focus == Focus::Projects {
                    active_style
                } else {
                    border_style
                }),
        );
        frame.render_stateful_widget(list, main[0], &mut list_state(app.selected, projects.len()));

        let output_block = Block::default()
            .title(output_title(selected))
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(border_style);
        let output_area = output_block.inner(right[0]);
        app.log_view_height = output_area.height as usize;
        let logs = selected.and_then(|project| manager.logs(&project.path));
        let output = match logs {
            Some(logs) if !logs.is_empty() => buffer_text(
                logs,
                output_area.height as usize,
                output_area.width as usize,
                app.scroll,
            ),
            _ => Text::from(Span::styled("No output yet", border_style)),
        };
        frame.render_widget(Paragraph::new(output).block(output_block), right[0]);

        let terminal_block = Block::default()
            .title(terminal_title(manager))
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(if app.focus == Focus::Terminal {
                active_style
            } else {
                border_style
            });
        let terminal_area = terminal_block.inner(right[1]);
        let console = buffer_text(
            manager.console(),
            terminal_area.height as usize,
            terminal_area.width as usize,
            0,
        );
        frame.render_widget(Paragraph::new(console).block(terminal_block), right[1]);

        let summary = selected
            .map(|project| project_summary(project, manager))
            .unwrap_or_else(|| "No projects. Add one with `devrack add <path>`".to_string());
        let help_line = match app.status_message() {
            Some((text, level)) => Span::styled(text.to_string(), status_level_style(level)),
            None => Span::styled(hint_line(app, manager), border_style),
        };
        let status = Paragraph::new(Text::from(vec![Line::from(summary), Line::from(help_line)]))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_type(BorderType::Rounded)
                    .border_style(border_style),
            );
        frame.render_widget(status, vertical[1]);

        if app.show_help {
            let popup_area = centered_rect(60, 70, area);
            let help = Paragraph::new(HELP.join("\n"))
                .block(
                    Block::default()
                        .title("Help")
                        .borders(Borders::ALL)
                        .border_type(BorderType::Rounded),
                )
                .style(Style::default().bg(Color::DarkGray).fg(Color::White));
            frame.render_widget(Clear, popup_area);
            frame.render_widget(help, popup_area);
        }
    })?;
    Ok(())
}

fn project_item(project: &Project, selected: bool, manager: &Manager) -> ListItem<'static> {
    let marker = if selected { "▶ " } else { "  " };
    let name_style = if selected {
        Style::default().add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    };
    let dot = if manager.is_supervised(&project.path) {
        "●"
    } else if project.is_running() {
        // Running, but not started by us.
        "◌"
    } else {
        "·"
    };
    let dim = Style::default().fg(Color::DarkGray);
    let mut details = vec![Span::raw("    "), Span::styled(project.kind.label(), dim)];
    if let Some(port) = project.port {
        details.push(Span::styled(
            format!(" :{}", port),
            Style::default().fg(Color::Cyan),
        ));
    }
    if let Some(branch) = &project.branch {
        details.push(Span::styled(format!(" ({})", branch), dim));
    }
    ListItem::new(Text::from(vec![
        Line::from(vec![
            Span::styled(marker, Style::default().fg(Color::Cyan)),
            Span::styled(format!("{} ", dot), status_style(project.status)),
            Span::styled(project.name.clone(), name_style),
        ]),
        Line::from(details),
    ]))
}

fn output_title(project: Option<&Project>) -> String {
    match project {
        Some(project) => format!("Output - {} ({})", project.name, project.status),
        None => "Output".to_string(),
    }
}

fn terminal_title(manager: &Manager) -> String {
    let place = manager
        .shell_project()
        .and_then(|path| path.file_name())
        .map(|name| format!("shell: {}", name.to_string_lossy()))
        .unwrap_or_else(|| "no shell".to_string());
    let interceptor = manager.interceptor();
    match manager.mode() {
        Mode::Shell => format!("Terminal - {}", place),
        Mode::AiQuery if interceptor.is_querying() => format!("Terminal - {} [AI, answering]", place),
        Mode::AiQuery => format!(
            "Terminal - {} [AI, {} answered]",
            place,
            interceptor.transcript().len()
        ),
    }
}

fn project_summary(project: &Project, manager: &Manager) -> String {
    let port = project
        .port
        .map(|port| port.to_string())
        .unwrap_or_else(|| "-".into());
    let owner = if manager.is_supervised(&project.path) {
        "managed"
    } else if project.is_running() {
        "external"
    } else {
        "-"
    };
    format!(
        "{} | {} | status: {} | port: {} | process: {} | {}",
        project.name,
        project.kind,
        project.status,
        port,
        owner,
        project.path.display()
    )
}

fn hint_line(app: &App, manager: &Manager) -> String {
    match (app.focus, manager.mode()) {
        (Focus::Projects, _) => {
            "s start | x stop | r recheck | t shell | a ai | i terminal | ? help | q quit".to_string()
        }
        (Focus::Terminal, Mode::Shell) => {
            format!("$ {}▌  (Enter run | Ctrl-A ai | Esc back)", app.input_line())
        }
        (Focus::Terminal, Mode::AiQuery) => {
            "Ask a question (Enter send | Ctrl-A shell | Esc back)".to_string()
        }
    }
}

/// The last `height` lines of a buffer, `scroll` lines up from the bottom.
fn buffer_text(buffer: &LogBuffer, height: usize, width: usize, scroll: usize) -> Text<'static> {
    if height == 0 {
        return Text::default();
    }
    let total = buffer.len();
    let end = total.saturating_sub(scroll.min(total.saturating_sub(height)));
    let start = end.saturating_sub(height);
    let lines: Vec<Line<'static>> = buffer
        .iter()
        .skip(start)
        .take(end - start)
        .map(|line| {
            let mut spans = ansi_spans(&line.text);
            if line.stream == StreamKind::Stderr {
                for span in spans.iter_mut().filter(|span| span.style.fg.is_none()) {
                    span.style = span.style.fg(Color::LightRed);
                }
            }
            Line::from(truncate_spans(spans, width.saturating_sub(1)))
        })
        .collect();
    Text::from(lines)
}

fn list_state(selected: usize, len: usize) -> ListState {
    let mut state = ListState::default();
    if len > 0 {
        state.select(Some(selected.min(len - 1)));
    }
    state
}

fn status_style(status: ProjectStatus) -> Style {
    match status {
        ProjectStatus::Running => Style::default().fg(Color::Green),
        ProjectStatus::Stopped => Style::default().fg(Color::DarkGray),
    }
}

fn status_level_style(level: StatusLevel) -> Style {
    match level {
        StatusLevel::Info => Style::default().fg(Color::Cyan),
        StatusLevel::Warning => Style::default().fg(Color::Yellow),
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

fn truncate_spans(spans: Vec<Span<'static>>, max: usize) -> Vec<Span<'static>> {
    if max == 0 {
        return Vec::new();
    }
    let total: usize = spans.iter().map(|span| span.content.chars().count()).sum();
    if total <= max {
        return spans;
    }

    let mut remaining = max.saturating_sub(1);
    let mut out = Vec::new();
    for span in spans {
        if remaining == 0 {
            break;
        }
        let count = span.content.chars().count();
        if count <= remaining {
            remaining -= count;
            out.push(span);
        } else {
            let cut: String = span.content.chars().take(remaining).collect();
            out.push(Span::styled(cut, span.style));
            remaining = 0;
        }
    }
    out.push(Span::raw("~"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(text: &Text<'_>) -> Vec<String> {
        text.lines
            .iter()
            .map(|line| line.spans.iter().map(|s| s.content.as_ref()).collect())
            .collect()
    }

    #[test]
    fn buffer_text_follows_the_bottom() {
        let mut buffer = LogBuffer::new(100);
        buffer.push_chunk("a\nb\nc\nd\n", StreamKind::Stdout);
        assert_eq!(plain(&buffer_text(&buffer, 2, 80, 0)), vec!["c", "d"]);
        assert_eq!(plain(&buffer_text(&buffer, 2, 80, 1)), vec!["b", "c"]);
        assert_eq!(plain(&buffer_text(&buffer, 2, 80, 99)), vec!["a", "b"]);
    }

    #[test]
    fn stderr_lines_are_tinted() {
        let mut buffer = LogBuffer::new(10);
        buffer.push_chunk("boom\n", StreamKind::Stderr);
        let text = buffer_text(&buffer, 5, 80, 0);
        assert_eq!(text.lines[0].spans[0].style.fg, Some(Color::LightRed));
    }

    #[test]
    fn truncate_spans_marks_the_cut() {
        let spans = vec![Span::raw("hello "), Span::raw("world")];
        let cut = truncate_spans(spans, 8);
        let text: String = cut.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(text, "hello w~");
    }

    #[test]
    fn list_state_clamps_selection() {
        assert_eq!(list_state(5, 2).selected(), Some(1));
        assert_eq!(list_state(0, 0).selected(), None);
    }
}
