//! TUI state and key handling.
//!
//! `App` only tracks what the screen needs: the selected project, which pane
//! has focus, the shell input line and transient status messages. Project
//! state itself lives in the `Manager`; keys are turned into `AppAction`s
//! for the main loop to carry out.

use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::interceptor::Mode;

/// Which pane receives keystrokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Projects,
    Terminal,
}

/// Actions resulting from user interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    None,
    Quit,
    /// Start the dev server of a project.
    Start(usize),
    /// Stop a project, supervised or not.
    Stop(usize),
    /// Run a ghost reconciliation now.
    Reconcile,
    /// Open the persistent shell in a project.
    Shell(usize),
    ToggleAi,
    ClearConsole,
    /// A full line typed in shell mode.
    Line(String),
    /// Raw bytes for the terminal pipeline.
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Warning,
}

#[derive(Debug, Clone)]
struct StatusMessage {
    text: String,
    at: Instant,
    ttl: Duration,
    level: StatusLevel,
}

#[derive(Debug)]
pub struct App {
    pub selected: usize,
    pub focus: Focus,
    pub should_quit: bool,
    pub show_help: bool,
    /// Lines scrolled up from the bottom of the output pane.
    pub scroll: usize,
    pub log_view_height: usize,
    project_count: usize,
    input: String,
    status_message: Option<StatusMessage>,
}

impl App {
    pub fn new() -> Self {
        Self {
            selected: 0,
            focus: Focus::Projects,
            should_quit: false,
            show_help: false,
            scroll: 0,
            log_view_height: 0,
            project_count: 0,
            input: String::new(),
            status_message: None,
        }
    }

    /// Keeps the selection inside the current project list.
    pub fn set_project_count(&mut self, count: usize) {
        self.project_count = count;
        if self.selected >= count {
            self.selected = count.saturating_sub(1);
        }
    }

    /// Shell-mode line being typed.
    pub fn input_line(&self) -> &str {
        &self.input
    }

    pub fn handle_key(&mut self, key: KeyEvent, mode: Mode) -> AppAction {
        if self.show_help {
            if matches!(key.code, KeyCode::Char('?') | KeyCode::Esc | KeyCode::Char('q')) {
                self.show_help = false;
            }
            return AppAction::None;
        }
        match self.focus {
            Focus::Projects => self.handle_projects_key(key),
            Focus::Terminal => self.handle_terminal_key(key, mode),
        }
    }

    fn handle_projects_key(&mut self, key: KeyEvent) -> AppAction {
        let has_projects = self.project_count > 0;
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                AppAction::Quit
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true;
                AppAction::Quit
            }
            KeyCode::Up | KeyCode::Char('k') => {
                if self.selected > 0 {
                    self.selected -= 1;
                    self.scroll = 0;
                }
                AppAction::None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected + 1 < self.project_count {
                    self.selected += 1;
                    self.scroll = 0;
                }
                AppAction::None
            }
            KeyCode::Char('s') if has_projects => AppAction::Start(self.selected),
            KeyCode::Char('x') if has_projects => AppAction::Stop(self.selected),
            KeyCode::Char('t') if has_projects => {
                self.focus = Focus::Terminal;
                AppAction::Shell(self.selected)
            }
            KeyCode::Char('r') => AppAction::Reconcile,
            KeyCode::Char('a') => {
                self.focus = Focus::Terminal;
                AppAction::ToggleAi
            }
            KeyCode::Char('i') | KeyCode::Tab | KeyCode::Enter => {
                self.focus = Focus::Terminal;
                AppAction::None
            }
            KeyCode::PageUp => {
                self.scroll = self.scroll.saturating_add(self.log_view_height.max(1));
                AppAction::None
            }
            KeyCode::PageDown => {
                self.scroll = self.scroll.saturating_sub(self.log_view_height.max(1));
                AppAction::None
            }
            KeyCode::End => {
                self.scroll = 0;
                AppAction::None
            }
            KeyCode::Char('?') => {
                self.show_help = true;
                AppAction::None
            }
            _ => AppAction::None,
        }
    }

    fn handle_terminal_key(&mut self, key: KeyEvent, mode: Mode) -> AppAction {
        if key.code == KeyCode::Esc {
            self.focus = Focus::Projects;
            return AppAction::None;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('a') => return AppAction::ToggleAi,
                KeyCode::Char('l') => return AppAction::ClearConsole,
                _ => {}
            }
        }
        // The interceptor edits AI questions itself.
        if mode == Mode::AiQuery {
            return match encode_key(key) {
                Some(bytes) => AppAction::Bytes(bytes),
                None => AppAction::None,
            };
        }
        match key.code {
            KeyCode::Enter => AppAction::Line(std::mem::take(&mut self.input)),
            KeyCode::Backspace => {
                self.input.pop();
                AppAction::None
            }
            KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
                match control_byte(c) {
                    Some(byte) => AppAction::Bytes(vec![byte]),
                    None => AppAction::None,
                }
            }
            KeyCode::Char(c) => {
                self.input.push(c);
                AppAction::None
            }
            _ => AppAction::None,
        }
    }

    pub fn set_status_message(&mut self, message: impl Into<String>) {
        self.set_status(message, StatusLevel::Info, Duration::from_secs(3));
    }

    pub fn set_status_warning(&mut self, message: impl Into<String>) {
        self.set_status(message, StatusLevel::Warning, Duration::from_secs(6));
    }

    fn set_status(&mut self, message: impl Into<String>, level: StatusLevel, ttl: Duration) {
        self.status_message = Some(StatusMessage {
            text: message.into(),
            at: Instant::now(),
            ttl,
            level,
        });
    }

    pub fn status_message(&self) -> Option<(&str, StatusLevel)> {
        self.status_message
            .as_ref()
            .filter(|message| message.at.elapsed() < message.ttl)
            .map(|message| (message.text.as_str(), message.level))
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

/// Bytes a key produces in a terminal.
pub fn encode_key(key: KeyEvent) -> Option<Vec<u8>> {
    match key.code {
        KeyCode::Enter => Some(vec![b'\n']),
        KeyCode::Backspace => Some(vec![0x7f]),
        KeyCode::Tab => Some(vec![b'\t']),
        KeyCode::Left => Some(b"\x1b[D".to_vec()),
        KeyCode::Right => Some(b"\x1b[C".to_vec()),
        KeyCode::Up => Some(b"\x1b[A".to_vec()),
        KeyCode::Down => Some(b"\x1b[B".to_vec()),
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
            control_byte(c).map(|byte| vec![byte])
        }
        KeyCode::Char(c) => {
            let mut buf = [0u8; 4];
            Some(c.encode_utf8(&mut buf).as_bytes().to_vec())
        }
        _ => None,
    }
}

fn control_byte(c: char) -> Option<u8> {
    if !c.is_ascii_alphabetic() {
        return None;
    }
    let upper = c.to_ascii_uppercase() as u8;
    Some(upper.saturating_sub(b'@'))
}
