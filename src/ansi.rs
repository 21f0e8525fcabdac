//! SGR escape sequences to ratatui spans.
//!
//! Dev servers and the AI typing effect both emit colored text; the TUI
//! renders it through `ansi_spans` so no raw control bytes reach the screen.

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Span;

// SGR code -> modifier it sets.
const SET_MODIFIERS: [(i32, Modifier); 9] = [
    (1, Modifier::BOLD),
    (2, Modifier::DIM),
    (3, Modifier::ITALIC),
    (4, Modifier::UNDERLINED),
    (5, Modifier::SLOW_BLINK),
    (6, Modifier::RAPID_BLINK),
    (7, Modifier::REVERSED),
    (8, Modifier::HIDDEN),
    (9, Modifier::CROSSED_OUT),
];

// SGR code -> modifiers it clears. 22 clears both bold and dim.
const CLEAR_MODIFIERS: [(i32, Modifier); 7] = [
    (22, Modifier::BOLD.union(Modifier::DIM)),
    (23, Modifier::ITALIC),
    (24, Modifier::UNDERLINED),
    (25, Modifier::SLOW_BLINK.union(Modifier::RAPID_BLINK)),
    (27, Modifier::REVERSED),
    (28, Modifier::HIDDEN),
    (29, Modifier::CROSSED_OUT),
];

const NORMAL_COLORS: [Color; 8] = [
    Color::Black,
    Color::Red,
    Color::Green,
    Color::Yellow,
    Color::Blue,
    Color::Magenta,
    Color::Cyan,
    Color::Gray,
];

const BRIGHT_COLORS: [Color; 8] = [
    Color::DarkGray,
    Color::LightRed,
    Color::LightGreen,
    Color::LightYellow,
    Color::LightBlue,
    Color::LightMagenta,
    Color::LightCyan,
    Color::White,
];

#[derive(Debug, Clone, Copy, Default)]
struct Pen {
    fg: Option<Color>,
    bg: Option<Color>,
    modifiers: Modifier,
}

impl Pen {
    fn style(&self) -> Style {
        let mut style = Style::default();
        if let Some(color) = self.fg {
            style = style.fg(color);
        }
        if let Some(color) = self.bg {
            style = style.bg(color);
        }
        if !self.modifiers.is_empty() {
            style = style.add_modifier(self.modifiers);
        }
        style
    }

    fn apply(&mut self, params: &str) {
        let codes = parse_params(params);
        let mut rest = codes.as_slice();
        while let Some((&code, tail)) = rest.split_first() {
            rest = tail;
            if code == 0 {
                *self = Pen::default();
            } else if let Some((_, modifier)) = SET_MODIFIERS.iter().find(|(c, _)| *c == code) {
                self.modifiers = self.modifiers.union(*modifier);
            } else if let Some((_, modifier)) = CLEAR_MODIFIERS.iter().find(|(c, _)| *c == code) {
                self.modifiers = self.modifiers.difference(*modifier);
            } else if code == 38 || code == 48 {
                if let Some((used, color)) = parse_extended_color(rest) {
                    rest = &rest[used..];
                    if code == 38 {
                        self.fg = Some(color);
                    } else {
                        self.bg = Some(color);
                    }
                }
            } else if code == 39 {
                self.fg = None;
            } else if code == 49 {
                self.bg = None;
            } else if let Some(color) = palette_color(code, 30) {
                self.fg = Some(color);
            } else if let Some(color) = palette_color(code, 40) {
                self.bg = Some(color);
            }
        }
    }
}

/// Splits ANSI-colored text into styled spans, dropping every other escape.
///
/// A carriage return restarts the line, so only the last segment is kept.
pub fn ansi_spans(text: &str) -> Vec<Span<'static>> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut buffer = String::new();
    let mut pen = Pen::default();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\x1b' => match chars.peek() {
                Some('[') => {
                    chars.next();
                    let mut params = String::new();
                    let mut final_byte = None;
                    for c in chars.by_ref() {
                        if ('@'..='~').contains(&c) {
                            final_byte = Some(c);
                            break;
                        }
                        params.push(c);
                    }
                    if final_byte == Some('m') {
                        flush(&mut spans, &mut buffer, &pen);
                        pen.apply(&params);
                    }
                }
                Some(']') => {
                    chars.next();
                    while let Some(next) = chars.next() {
                        if next == '\x07' {
                            break;
                        }
                        if next == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            },
            '\r' => {
                buffer.clear();
                spans.clear();
            }
            _ => buffer.push(ch),
        }
    }
    flush(&mut spans, &mut buffer, &pen);
    spans
}

fn flush(spans: &mut Vec<Span<'static>>, buffer: &mut String, pen: &Pen) {
    if !buffer.is_empty() {
        spans.push(Span::styled(std::mem::take(buffer), pen.style()));
    }
}

fn parse_params(params: &str) -> Vec<i32> {
    if params.is_empty() {
        return vec![0];
    }
    let values: Vec<i32> = params
        .split(';')
        .filter_map(|part| {
            if part.is_empty() {
                Some(0)
            } else {
                part.parse().ok()
            }
        })
        .collect();
    if values.is_empty() {
        vec![0]
    } else {
        values
    }
}

// `5;n` (256-color index) or `2;r;g;b`. Returns how many values were used.
fn parse_extended_color(values: &[i32]) -> Option<(usize, Color)> {
    let byte = |index: usize| values.get(index).and_then(|v| u8::try_from(*v).ok());
    match values.first()? {
        5 => Some((2, Color::Indexed(byte(1)?))),
        2 => Some((4, Color::Rgb(byte(1)?, byte(2)?, byte(3)?))),
        _ => None,
    }
}

// 30-37 / 40-47 and their bright 90-97 / 100-107 counterparts.
fn palette_color(code: i32, base: i32) -> Option<Color> {
    let normal = code - base;
    let bright = code - base - 60;
    if (0..8).contains(&normal) {
        Some(NORMAL_COLORS[normal as usize])
    } else if (0..8).contains(&bright) {
        Some(BRIGHT_COLORS[bright as usize])
    } else {
        None
    }
}
