//! Output handling for child processes.
//!
//! Holds the per-project line buffer used by the UI, plus the pure text
//! heuristics applied to every chunk a child writes: port sniffing and
//! removal of diagnostic caret/underline lines.

use std::collections::VecDeque;

use once_cell::sync::Lazy;
use regex::Regex;
use strip_ansi_escapes::strip;

static PORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:localhost:|:|port\s+)(\d{4,5})").expect("port regex"));

static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d*\s*\|[\s\^|]*$").expect("marker regex"));

/// Indicates the source stream of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// A single line of output kept for display.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub text: String,
    pub stream: StreamKind,
}

/// A fixed-capacity ring buffer of output lines.
///
/// Chunks rarely end on a line boundary, so a trailing partial line is kept
/// open and extended by the next chunk.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    max_lines: usize,
    lines: VecDeque<LogLine>,
    open: bool,
}

impl LogBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            lines: VecDeque::with_capacity(max_lines.min(1024)),
            open: false,
        }
    }

    /// Appends a raw chunk, splitting it into lines.
    ///
    /// Returns `true` if old lines were dropped to make room.
    pub fn push_chunk(&mut self, chunk: &str, stream: StreamKind) -> bool {
        let mut dropped = false;
        for piece in chunk.split_inclusive('\n') {
            let complete = piece.ends_with('\n');
            let text = piece.trim_end_matches(['\n', '\r']);
            match self.lines.back_mut() {
                Some(last) if self.open => last.text.push_str(text),
                _ => {
                    self.lines.push_back(LogLine {
                        text: text.to_string(),
                        stream,
                    });
                }
            }
            self.open = !complete;
            while self.lines.len() > self.max_lines {
                self.lines.pop_front();
                dropped = true;
            }
        }
        dropped
    }

    /// Appends terminal-style text: `\r\n` ends a line, a lone `\r` or
    /// `ESC[K` clears the open line, and backspace removes one character.
    pub fn push_tty(&mut self, chunk: &str) {
        let chunk = chunk.replace("\r\n", "\n").replace("\x1b[K", "");
        let mut chars = chunk.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\n' => {
                    if !self.open {
                        self.push_line(String::new());
                    }
                    self.open = false;
                }
                '\r' => {
                    if self.open {
                        if let Some(last) = self.lines.back_mut() {
                            last.text.clear();
                        }
                    }
                }
                '\x08' => {
                    if chars.peek() == Some(&' ') {
                        chars.next();
                        if chars.peek() == Some(&'\x08') {
                            chars.next();
                        }
                    }
                    if self.open {
                        if let Some(last) = self.lines.back_mut() {
                            last.text.pop();
                        }
                    }
                }
                c => {
                    if !self.open {
                        self.push_line(String::new());
                        self.open = true;
                    }
                    if let Some(last) = self.lines.back_mut() {
                        last.text.push(c);
                    }
                }
            }
        }
    }

    fn push_line(&mut self, text: String) {
        self.lines.push_back(LogLine {
            text,
            stream: StreamKind::Stdout,
        });
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    /// The last `count` lines joined with newlines.
    pub fn tail(&self, count: usize) -> String {
        let skip = self.lines.len().saturating_sub(count);
        self.lines
            .iter()
            .skip(skip)
            .map(|line| sanitize_text(&line.text, true))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.open = false;
    }
}

/// Decodes byte chunks into text, carrying an incomplete UTF-8 sequence
/// over to the next chunk instead of replacing it.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    carry: Vec<u8>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let valid = match std::str::from_utf8(&self.carry) {
            Ok(_) => self.carry.len(),
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            Err(_) => self.carry.len(),
        };
        let rest = self.carry.split_off(valid);
        let text = String::from_utf8_lossy(&self.carry).to_string();
        self.carry = rest;
        text
    }
}

/// Sanitizes text for display, optionally stripping ANSI escape codes.
pub fn sanitize_text(text: &str, strip_ansi: bool) -> String {
    if !strip_ansi {
        return text.to_string();
    }
    let stripped = strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).to_string()
}

/// Looks for a listening port announced in a chunk of output.
///
/// Matches a 4-5 digit number preceded by `localhost:`, a bare `:`, or
/// `port ` (case-insensitive). This is a heuristic: any matching number in
/// the text is reported.
pub fn sniff_port(chunk: &str) -> Option<u16> {
    let plain = sanitize_text(chunk, true);
    PORT_RE
        .captures_iter(&plain)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u16>().ok())
        .find(|port| *port != 0)
}

/// True for compiler-style underline lines such as `  12 |    ^^^^`.
pub fn is_marker_line(line: &str) -> bool {
    let plain = sanitize_text(line, true);
    let plain = plain.trim_end_matches(['\n', '\r']);
    if plain.trim().is_empty() {
        return false;
    }
    if MARKER_RE.is_match(plain) {
        return true;
    }
    let visible = plain.chars().filter(|c| !c.is_whitespace()).count();
    let filler = plain.chars().filter(|c| matches!(c, '^' | '|')).count();
    filler * 2 > visible
}

/// Drops marker lines from a chunk. Returns `None` when nothing is left.
pub fn sanitize_chunk(chunk: &str) -> Option<String> {
    let kept: String = chunk
        .split_inclusive('\n')
        .filter(|line| !is_marker_line(line))
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept)
    }
}
