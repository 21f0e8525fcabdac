//! Terminal input interception for AI queries.
//!
//! In `Shell` mode keystrokes go straight to the shell. In `AiQuery` mode
//! they are line-edited locally, submitted as a question, and the streamed
//! answer is typed out at a fixed cadence. When the fully drained answer
//! contains an execute tag, the interceptor returns to `Shell` mode and
//! hands the command back to the caller to run after a delay.

use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::ai::AiEvent;

pub const PROMPT: &str = "\x1b[36m❯\x1b[0m ";

const EXECUTE_OPEN: &str = "<<<EXECUTE:";
const EXECUTE_CLOSE: &str = ">>>";

const BOLD_ON: &str = "\x1b[1m";
const BOLD_OFF: &str = "\x1b[22m";
const ITALIC_ON: &str = "\x1b[3m";
const ITALIC_OFF: &str = "\x1b[23m";
const CODE_ON: &str = "\x1b[36m";
const CODE_OFF: &str = "\x1b[39m";
const TAG_STYLE: &str = "\x1b[1;30;43m";
const RESET: &str = "\x1b[0m";
const BULLET: &str = "\x1b[36m•\x1b[39m ";

static EXECUTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<<<EXECUTE:\s*(.*?)>>>").expect("execute tag regex"));

/// Returns the command of the first execute tag in `text`.
pub fn find_execute_tag(text: &str) -> Option<String> {
    let command = EXECUTE_RE.captures(text)?.get(1)?.as_str().trim();
    if command.is_empty() {
        None
    } else {
        Some(command.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Shell,
    AiQuery,
}

/// What the caller should do in response to interceptor activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Raw bytes for the active shell.
    Forward(Vec<u8>),
    /// Text to print in the terminal pane.
    Display(String),
    /// A question to send to the AI backend.
    Submit(String),
    /// A command to run once the execute delay has passed.
    Schedule { query: u64 },
}

/// A command taken from an AI answer, waiting for its delay to pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledCommand {
    pub query: u64,
    pub command: String,
    pub project: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub question: String,
    pub response: String,
}

#[derive(Debug)]
struct ActiveQuery {
    id: u64,
    question: String,
    project: PathBuf,
    pending: String,
    full: String,
    started: bool,
    complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Escape {
    #[default]
    None,
    Esc,
    Csi,
}

/// Streaming markup-to-ANSI renderer.
///
/// Input may be cut anywhere; a tail that could be the start of a marker
/// is held back until the next `feed` or `finish`.
#[derive(Debug, Default)]
pub struct MarkupRenderer {
    carry: String,
    at_line_start: bool,
    bold: bool,
    italic: bool,
    code: bool,
}

impl MarkupRenderer {
    pub fn new() -> Self {
        Self {
            at_line_start: true,
            ..Self::default()
        }
    }

    pub fn feed(&mut self, text: &str) -> String {
        let mut input = std::mem::take(&mut self.carry);
        input.push_str(text);
        self.render(&input, false)
    }

    /// Flushes held-back text and closes any open style.
    pub fn finish(&mut self) -> String {
        let input = std::mem::take(&mut self.carry);
        let mut out = self.render(&input, true);
        if self.bold || self.italic || self.code {
            out.push_str(RESET);
        }
        *self = Self::new();
        out
    }

    fn active_styles(&self) -> String {
        let mut styles = String::new();
        if self.bold {
            styles.push_str(BOLD_ON);
        }
        if self.italic {
            styles.push_str(ITALIC_ON);
        }
        if self.code {
            styles.push_str(CODE_ON);
        }
        styles
    }

    fn render(&mut self, input: &str, flush: bool) -> String {
        let mut out = String::new();
        let mut i = 0;
        while i < input.len() {
            let rest = &input[i..];

            if self.at_line_start && !self.code {
                let body = rest.trim_start_matches([' ', '\t']);
                let indent = rest.len() - body.len();
                if !flush && (body.is_empty() || body == "-" || body == "*") {
                    self.carry = rest.to_string();
                    return out;
                }
                if body.starts_with("- ") || body.starts_with("* ") {
                    out.push_str(&rest[..indent]);
                    out.push_str(BULLET);
                    i += indent + 2;
                    self.at_line_start = false;
                    continue;
                }
                self.at_line_start = false;
            }

            if rest.starts_with(EXECUTE_OPEN) {
                if let Some(end) = rest.find(EXECUTE_CLOSE) {
                    let tag_end = end + EXECUTE_CLOSE.len();
                    out.push_str(TAG_STYLE);
                    out.push_str(&rest[..tag_end]);
                    out.push_str(RESET);
                    out.push_str(&self.active_styles());
                    i += tag_end;
                    continue;
                }
                if !flush {
                    self.carry = rest.to_string();
                    return out;
                }
            } else if !flush && rest.len() < EXECUTE_OPEN.len() && EXECUTE_OPEN.starts_with(rest) {
                self.carry = rest.to_string();
                return out;
            }

            let Some(c) = rest.chars().next() else {
                break;
            };
            match c {
                '`' => {
                    self.code = !self.code;
                    out.push_str(if self.code { CODE_ON } else { CODE_OFF });
                }
                '*' if !self.code && rest.starts_with("**") => {
                    self.bold = !self.bold;
                    out.push_str(if self.bold { BOLD_ON } else { BOLD_OFF });
                    i += 2;
                    continue;
                }
                '*' if !self.code && self.italic => {
                    self.italic = false;
                    out.push_str(ITALIC_OFF);
                }
                '*' if !self.code => {
                    let after = &rest[1..];
                    let line_end = after.find('\n');
                    let line = &after[..line_end.unwrap_or(after.len())];
                    let hugs_text = line.chars().next().is_some_and(|c| !c.is_whitespace());
                    if hugs_text && line.contains('*') {
                        self.italic = true;
                        out.push_str(ITALIC_ON);
                    } else if line_end.is_none() && !flush && (line.is_empty() || hugs_text) {
                        // The closing marker may still arrive on this line.
                        self.carry = rest.to_string();
                        return out;
                    } else {
                        out.push('*');
                    }
                }
                '\n' => {
                    out.push_str("\r\n");
                    self.at_line_start = true;
                }
                '\r' => {}
                _ => out.push(c),
            }
            i += c.len_utf8();
        }
        out
    }
}

/// Two-mode interception state for one terminal session.
#[derive(Debug)]
pub struct AiInterceptor {
    mode: Mode,
    line: String,
    escape: Escape,
    next_query: u64,
    active: Option<ActiveQuery>,
    scheduled: Option<ScheduledCommand>,
    renderer: MarkupRenderer,
    transcript: Vec<TranscriptEntry>,
    backend_name: String,
}

impl AiInterceptor {
    pub fn new(backend_name: impl Into<String>) -> Self {
        Self {
            mode: Mode::Shell,
            line: String::new(),
            escape: Escape::None,
            next_query: 1,
            active: None,
            scheduled: None,
            renderer: MarkupRenderer::new(),
            transcript: Vec::new(),
            backend_name: backend_name.into(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[cfg(test)]
    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn is_querying(&self) -> bool {
        self.active.is_some()
    }

    /// Switches between `Shell` and `AiQuery`. Leaving `AiQuery` stops the
    /// display of any in-flight answer; the backend call itself continues.
    pub fn toggle(&mut self) -> Vec<Action> {
        match self.mode {
            Mode::Shell => {
                self.mode = Mode::AiQuery;
                self.line.clear();
                vec![Action::Display(format!(
                    "\r\n\x1b[1;36m{}: Type your question and press Enter\x1b[0m\r\n{}",
                    self.backend_name, PROMPT
                ))]
            }
            Mode::AiQuery => {
                self.leave_ai_mode();
                vec![Action::Display(
                    "\r\n\x1b[33mNormal Mode\x1b[0m\r\n".to_string(),
                )]
            }
        }
    }

    fn leave_ai_mode(&mut self) {
        self.mode = Mode::Shell;
        self.line.clear();
        self.escape = Escape::None;
        if let Some(active) = self.active.take() {
            debug!(query = active.id, "query display abandoned");
        }
        self.renderer = MarkupRenderer::new();
    }

    /// Classifies raw terminal input.
    pub fn handle_input(&mut self, bytes: &[u8]) -> Vec<Action> {
        if self.mode == Mode::Shell {
            if bytes.is_empty() {
                return Vec::new();
            }
            return vec![Action::Forward(bytes.to_vec())];
        }

        let mut actions = Vec::new();
        let mut echo = String::new();
        for c in String::from_utf8_lossy(bytes).chars() {
            match self.escape {
                Escape::Esc => {
                    self.escape = if c == '[' { Escape::Csi } else { Escape::None };
                    continue;
                }
                Escape::Csi => {
                    if ('\x40'..='\x7e').contains(&c) {
                        self.escape = Escape::None;
                    }
                    continue;
                }
                Escape::None => {}
            }
            match c {
                '\r' | '\n' => {
                    let question = std::mem::take(&mut self.line);
                    echo.push_str("\r\n");
                    if question.trim().is_empty() {
                        echo.push_str(PROMPT);
                    } else {
                        flush_echo(&mut actions, &mut echo);
                        actions.push(Action::Submit(question.trim().to_string()));
                    }
                }
                '\x7f' | '\x08' => {
                    if self.line.pop().is_some() {
                        echo.push_str("\x08 \x08");
                    }
                }
                '\x03' => {
                    self.line.clear();
                    echo.push_str("^C\r\n");
                    echo.push_str(PROMPT);
                }
                '\x1b' => self.escape = Escape::Esc,
                c if c.is_control() => {}
                c => {
                    self.line.push(c);
                    echo.push(c);
                }
            }
        }
        flush_echo(&mut actions, &mut echo);
        actions
    }

    /// Registers a new query and returns its id with the text to show
    /// while waiting. A previous in-flight answer stops being displayed.
    pub fn begin_query(&mut self, question: String, project: PathBuf) -> (u64, Action) {
        let id = self.next_query;
        self.next_query += 1;
        info!(query = id, project = %project.display(), "AI question submitted");
        self.renderer = MarkupRenderer::new();
        self.active = Some(ActiveQuery {
            id,
            question,
            project,
            pending: String::new(),
            full: String::new(),
            started: false,
            complete: false,
        });
        let waiting = format!("\x1b[90mQuerying {}...\x1b[0m", self.backend_name);
        (id, Action::Display(waiting))
    }

    /// Reports a missing backend. The session stays in `AiQuery`.
    pub fn backend_unavailable(&mut self, message: &str) -> Vec<Action> {
        vec![Action::Display(format!(
            "\x1b[31m{}\x1b[0m\r\n{}",
            message, PROMPT
        ))]
    }

    /// Folds one backend event into the active query. Events for stale or
    /// finished queries are ignored.
    pub fn on_ai_event(&mut self, query: u64, event: AiEvent) -> Vec<Action> {
        let Some(active) = self.active.as_mut().filter(|active| active.id == query) else {
            debug!(query, "ignoring AI event for inactive query");
            return Vec::new();
        };
        match event {
            AiEvent::Chunk(text) => {
                if active.complete {
                    return Vec::new();
                }
                active.pending.push_str(&text);
                active.full.push_str(&text);
                if !active.started {
                    active.started = true;
                    return vec![Action::Display("\r\x1b[K".to_string())];
                }
                Vec::new()
            }
            AiEvent::Complete => {
                active.complete = true;
                Vec::new()
            }
            AiEvent::Error(message) => {
                self.active = None;
                self.renderer = MarkupRenderer::new();
                vec![Action::Display(format!(
                    "\r\x1b[K\x1b[31mError: {}\x1b[0m\r\n{}",
                    message, PROMPT
                ))]
            }
        }
    }

    /// One drain step: shows `max(1, len/50)` pending characters. Once a
    /// complete answer is fully shown, scans it for an execute tag.
    pub fn drain_tick(&mut self) -> Vec<Action> {
        let Some(active) = self.active.as_mut() else {
            return Vec::new();
        };

        if !active.pending.is_empty() {
            let len = active.pending.chars().count();
            let take = (len / 50).max(1);
            let split = active
                .pending
                .char_indices()
                .nth(take)
                .map(|(index, _)| index)
                .unwrap_or(active.pending.len());
            let piece: String = active.pending.drain(..split).collect();
            let rendered = self.renderer.feed(&piece);
            return if rendered.is_empty() {
                Vec::new()
            } else {
                vec![Action::Display(rendered)]
            };
        }

        if !active.complete {
            return Vec::new();
        }

        let Some(finished) = self.active.take() else {
            return Vec::new();
        };
        let mut shown = self.renderer.finish();
        self.transcript.push(TranscriptEntry {
            question: finished.question,
            response: finished.full.clone(),
        });

        match find_execute_tag(&finished.full) {
            Some(command) => {
                info!(query = finished.id, command = %command, "execute tag found");
                shown.push_str(&format!(
                    "\r\n\r\n\x1b[1;32mAuto-Running: {}\x1b[0m\r\n",
                    command
                ));
                self.mode = Mode::Shell;
                self.line.clear();
                self.scheduled = Some(ScheduledCommand {
                    query: finished.id,
                    command,
                    project: finished.project,
                });
                vec![
                    Action::Display(shown),
                    Action::Schedule { query: finished.id },
                ]
            }
            None => {
                shown.push_str("\r\n\r\n");
                shown.push_str(PROMPT);
                vec![Action::Display(shown)]
            }
        }
    }

    /// Takes the command scheduled for `query`. Returns it at most once.
    pub fn take_scheduled(&mut self, query: u64) -> Option<ScheduledCommand> {
        if self.scheduled.as_ref().map(|scheduled| scheduled.query) == Some(query) {
            self.scheduled.take()
        } else {
            None
        }
    }
}

fn flush_echo(actions: &mut Vec<Action>, echo: &mut String) {
    if !echo.is_empty() {
        actions.push(Action::Display(std::mem::take(echo)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn displayed(actions: &[Action]) -> String {
        actions
            .iter()
            .filter_map(|action| match action {
                Action::Display(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn plain(text: &str) -> String {
        crate::output::sanitize_text(text, true)
    }

    fn drain_all(interceptor: &mut AiInterceptor) -> Vec<Action> {
        let mut actions = Vec::new();
        for _ in 0..10_000 {
            if !interceptor.is_querying() {
                break;
            }
            actions.extend(interceptor.drain_tick());
        }
        actions
    }

    #[test]
    fn find_execute_tag_trims_command() {
        assert_eq!(
            find_execute_tag("sure <<<EXECUTE:   npm run dev  >>> ok").as_deref(),
            Some("npm run dev")
        );
        assert_eq!(find_execute_tag("<<<EXECUTE: >>>"), None);
        assert_eq!(find_execute_tag("no tag here"), None);
    }

    #[test]
    fn shell_mode_forwards_bytes_verbatim() {
        let mut interceptor = AiInterceptor::new("gemini");
        assert_eq!(
            interceptor.handle_input(b"ls\n"),
            vec![Action::Forward(b"ls\n".to_vec())]
        );
        assert_eq!(interceptor.line(), "");
    }

    #[test]
    fn ai_mode_line_editing() {
        let mut interceptor = AiInterceptor::new("gemini");
        interceptor.toggle();
        assert_eq!(interceptor.mode(), Mode::AiQuery);

        let actions = interceptor.handle_input(b"helo\x7fp");
        assert_eq!(interceptor.line(), "help");
        assert_eq!(displayed(&actions), "helo\x08 \x08p");

        interceptor.handle_input(b"\x1b[A\x01");
        assert_eq!(interceptor.line(), "help");

        let actions = interceptor.handle_input(b"\x03");
        assert_eq!(interceptor.line(), "");
        assert!(displayed(&actions).starts_with("^C\r\n"));

        let actions = interceptor.handle_input(b"\r");
        assert!(!actions.iter().any(|a| matches!(a, Action::Submit(_))));
    }

    #[test]
    fn backspace_on_empty_line_shows_nothing() {
        let mut interceptor = AiInterceptor::new("gemini");
        interceptor.toggle();
        assert!(interceptor.handle_input(b"\x7f").is_empty());
    }

    #[test]
    fn renderer_handles_split_markers() {
        let mut renderer = MarkupRenderer::new();
        let mut out = String::new();
        for piece in ["use *", "*bold", "*", "* and `co", "de`\n- item\n"] {
            out.push_str(&renderer.feed(piece));
        }
        out.push_str(&renderer.finish());
        assert_eq!(
            out,
            format!(
                "use {BOLD_ON}bold{BOLD_OFF} and {CODE_ON}code{CODE_OFF}\r\n{BULLET}item\r\n"
            )
        );
    }

    #[test]
    fn lone_asterisk_stays_literal() {
        let mut renderer = MarkupRenderer::new();
        let mut out = renderer.feed("2 * 3 is 6, so *");
        out.push_str(&renderer.feed("x\nthen *really* done\n"));
        out.push_str(&renderer.finish());
        assert_eq!(
            out,
            format!("2 * 3 is 6, so *x\r\nthen {ITALIC_ON}really{ITALIC_OFF} done\r\n")
        );
    }

    #[test]
    fn split_italic_span_waits_for_its_close() {
        let mut renderer = MarkupRenderer::new();
        let mut out = renderer.feed("an *ita");
        assert_eq!(out, "an ");
        out.push_str(&renderer.feed("lic* word"));
        assert_eq!(out, format!("an {ITALIC_ON}italic{ITALIC_OFF} word"));
    }

    #[test]
    fn renderer_highlights_tag_across_chunks() {
        let mut renderer = MarkupRenderer::new();
        let mut out = renderer.feed("run <<<EXEC");
        assert_eq!(out, "run ");
        out.push_str(&renderer.feed("UTE: ls>>> now"));
        assert_eq!(
            out,
            format!("run {TAG_STYLE}<<<EXECUTE: ls>>>{RESET} now")
        );
    }

    #[test]
    fn full_query_executes_tag_once() {
        let mut interceptor = AiInterceptor::new("gemini");
        interceptor.toggle();
        let actions = interceptor.handle_input(b"start the dev server\r");
        assert_eq!(
            actions.last(),
            Some(&Action::Submit("start the dev server".to_string()))
        );

        let (query, _) = interceptor.begin_query(
            "start the dev server".to_string(),
            PathBuf::from("/work/app"),
        );
        interceptor.on_ai_event(query, AiEvent::Chunk("Starting it now. ".into()));
        interceptor.on_ai_event(query, AiEvent::Chunk("<<<EXECUTE: npm ".into()));
        interceptor.on_ai_event(query, AiEvent::Chunk("run dev>>>".into()));
        interceptor.on_ai_event(query, AiEvent::Complete);
        assert!(interceptor
            .on_ai_event(query, AiEvent::Chunk(" <<<EXECUTE: rm -rf />>>".into()))
            .is_empty());

        let actions = drain_all(&mut interceptor);
        let schedules: Vec<_> = actions
            .iter()
            .filter(|a| matches!(a, Action::Schedule { .. }))
            .collect();
        assert_eq!(schedules, vec![&Action::Schedule { query }]);
        assert_eq!(interceptor.mode(), Mode::Shell);

        let text = plain(&displayed(&actions));
        assert!(text.contains("Starting it now. <<<EXECUTE: npm run dev>>>"));
        assert!(text.contains("Auto-Running: npm run dev"));

        let scheduled = interceptor.take_scheduled(query).unwrap();
        assert_eq!(scheduled.command, "npm run dev");
        assert_eq!(scheduled.project, PathBuf::from("/work/app"));
        assert!(interceptor.take_scheduled(query).is_none());

        assert_eq!(interceptor.transcript().len(), 1);
        assert_eq!(interceptor.transcript()[0].question, "start the dev server");
    }

    #[test]
    fn drain_shows_a_fiftieth_per_tick() {
        let mut interceptor = AiInterceptor::new("gemini");
        interceptor.toggle();
        let (query, _) = interceptor.begin_query("q".into(), PathBuf::from("/p"));
        interceptor.on_ai_event(query, AiEvent::Chunk("a".repeat(200)));
        let actions = interceptor.drain_tick();
        assert_eq!(displayed(&actions), "aaaa");
    }

    #[test]
    fn answer_without_tag_returns_to_prompt() {
        let mut interceptor = AiInterceptor::new("gemini");
        interceptor.toggle();
        let (query, _) = interceptor.begin_query("q".into(), PathBuf::from("/p"));
        interceptor.on_ai_event(query, AiEvent::Chunk("just text".into()));
        interceptor.on_ai_event(query, AiEvent::Complete);
        let actions = drain_all(&mut interceptor);
        assert!(displayed(&actions).ends_with(PROMPT));
        assert_eq!(interceptor.mode(), Mode::AiQuery);
        assert!(!actions.iter().any(|a| matches!(a, Action::Schedule { .. })));
    }

    #[test]
    fn error_returns_to_ai_prompt() {
        let mut interceptor = AiInterceptor::new("gemini");
        interceptor.toggle();
        let (query, _) = interceptor.begin_query("q".into(), PathBuf::from("/p"));
        let actions = interceptor.on_ai_event(query, AiEvent::Error("boom".into()));
        assert!(plain(&displayed(&actions)).contains("Error: boom"));
        assert_eq!(interceptor.mode(), Mode::AiQuery);
        assert!(!interceptor.is_querying());
    }

    #[test]
    fn toggling_out_abandons_display() {
        let mut interceptor = AiInterceptor::new("gemini");
        interceptor.toggle();
        let (query, _) = interceptor.begin_query("q".into(), PathBuf::from("/p"));
        interceptor.on_ai_event(query, AiEvent::Chunk("partial".into()));
        let actions = interceptor.toggle();
        assert!(plain(&displayed(&actions)).contains("Normal Mode"));
        assert!(interceptor
            .on_ai_event(query, AiEvent::Chunk("more".into()))
            .is_empty());
        assert!(interceptor.drain_tick().is_empty());
    }

    #[test]
    fn stale_query_events_are_ignored() {
        let mut interceptor = AiInterceptor::new("gemini");
        interceptor.toggle();
        let (first, _) = interceptor.begin_query("one".into(), PathBuf::from("/p"));
        let (second, _) = interceptor.begin_query("two".into(), PathBuf::from("/p"));
        assert_ne!(first, second);
        assert!(interceptor
            .on_ai_event(first, AiEvent::Chunk("old".into()))
            .is_empty());
        assert_eq!(
            interceptor.on_ai_event(second, AiEvent::Chunk("new".into())),
            vec![Action::Display("\r\x1b[K".to_string())]
        );
    }
}
