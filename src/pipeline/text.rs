//! Plain-text pages: character sanitisation and line layout.
//!
//! Text pages are drawn with the standard Helvetica font in WinAnsi
//! encoding, which only covers a narrow character set. Every character is
//! therefore passed through a [`CharsetPolicy`] before layout; anything the
//! policy does not allow is replaced, never dropped.
//!
//! ## Layout
//!
//! ```text
//!  ┌──────────────── page_width ────────────────┐
//!  │                                            │
//!  │        first_baseline (from top)           │
//!  │ margin ┌──────── max line width ───────┐   │
//!  │  left  │ line 1                        │   │
//!  │        │ line 2 (leading below line 1) │   │
//!  │        └───────────────────────────────┘   │
//!  │              bottom_margin                 │
//!  └────────────────────────────────────────────┘
//! ```

use crate::pipeline::page::TextPage;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Which characters may be drawn, and what replaces the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharsetPolicy {
    /// Inclusive code-point ranges passed through unchanged.
    pub allowed: Vec<(u32, u32)>,
    /// Explicit substitutions, applied before the range check.
    pub replacements: Vec<(char, char)>,
    /// Substitute for every other character.
    pub fallback: char,
}

impl Default for CharsetPolicy {
    fn default() -> Self {
        Self {
            allowed: vec![(32, 126), (160, 255)],
            replacements: vec![('\u{2022}', '-')],
            fallback: '?',
        }
    }
}

impl CharsetPolicy {
    pub fn map_char(&self, c: char) -> char {
        if let Some(&(_, to)) = self.replacements.iter().find(|(from, _)| *from == c) {
            return to;
        }
        let code = c as u32;
        if self
            .allowed
            .iter()
            .any(|&(lo, hi)| code >= lo && code <= hi)
        {
            c
        } else {
            self.fallback
        }
    }

    /// Sanitise one line of text (line breaks must already be removed).
    pub fn sanitize(&self, line: &str) -> String {
        line.chars().map(|c| self.map_char(c)).collect()
    }
}

/// Geometry of a text page, in PDF points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLayout {
    pub page_width: f32,
    pub page_height: f32,
    pub margin_left: f32,
    pub margin_right: f32,
    /// Distance from the top edge to the first baseline.
    pub first_baseline: f32,
    pub bottom_margin: f32,
    pub font_size: f32,
    pub leading: f32,
}

impl Default for TextLayout {
    /// A4 portrait, 10 pt Helvetica on 12 pt leading.
    fn default() -> Self {
        Self {
            page_width: 595.28,
            page_height: 841.89,
            margin_left: 50.0,
            margin_right: 50.0,
            first_baseline: 200.0,
            bottom_margin: 50.0,
            font_size: 10.0,
            leading: 12.0,
        }
    }
}

impl TextLayout {
    pub fn max_line_width(&self) -> f32 {
        (self.page_width - self.margin_left - self.margin_right).max(self.font_size)
    }

    /// Number of lines that fit between the first baseline and the bottom margin.
    pub fn max_lines(&self) -> usize {
        let usable = self.page_height - self.first_baseline - self.bottom_margin;
        if usable < 0.0 || self.leading <= 0.0 {
            return 1;
        }
        (usable / self.leading).floor() as usize + 1
    }
}

// ── Helvetica metrics ────────────────────────────────────────────────────

/// Advance widths (1/1000 em) for code points 32..=126.
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 0..?
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // @..O
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // P.._
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // `..o
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // p..~
];

fn char_width(c: char) -> u16 {
    let code = c as u32;
    if (32..=126).contains(&code) {
        HELVETICA_ASCII[(code - 32) as usize]
    } else if code == 160 {
        278
    } else {
        556
    }
}

/// Rendered width of `text` in points at `font_size`.
pub fn text_width(text: &str, font_size: f32) -> f32 {
    let units: u32 = text.chars().map(|c| char_width(c) as u32).sum();
    units as f32 * font_size / 1000.0
}

/// Greedy word wrap. Words wider than the line are broken by character.
pub fn wrap_line(line: &str, max_width: f32, font_size: f32) -> Vec<String> {
    if text_width(line, font_size) <= max_width {
        return vec![line.to_string()];
    }

    let mut out = Vec::new();
    let mut current = String::new();
    for word in line.split(' ') {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };
        if text_width(&candidate, font_size) <= max_width {
            current = candidate;
            continue;
        }
        if !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
        // The word alone may still be too wide.
        for c in word.chars() {
            current.push(c);
            if text_width(&current, font_size) > max_width && current.chars().count() > 1 {
                current.pop();
                out.push(std::mem::take(&mut current));
                current.push(c);
            }
        }
    }
    if !current.is_empty() || out.is_empty() {
        out.push(current);
    }
    out
}

/// Sanitise, wrap and fit `text` onto a single page.
///
/// Line breaks in the source are kept. Tabs become a single space. Lines
/// that would fall below the bottom margin are dropped with a warning.
pub fn layout_text(text: &str, policy: &CharsetPolicy, layout: &TextLayout) -> TextPage {
    let max_width = layout.max_line_width();
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut lines = Vec::new();
    for raw in normalized.split('\n') {
        let clean = policy.sanitize(&raw.replace('\t', " "));
        lines.extend(wrap_line(&clean, max_width, layout.font_size));
    }

    let max_lines = layout.max_lines();
    if lines.len() > max_lines {
        warn!(
            "Text truncated to {} of {} lines to fit one page",
            max_lines,
            lines.len()
        );
        lines.truncate(max_lines);
    }

    TextPage {
        lines,
        layout: layout.clone(),
    }
}

/// Encode already-sanitised text as WinAnsi bytes for a PDF string.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| {
            let code = c as u32;
            if (32..=126).contains(&code) || (160..=255).contains(&code) {
                code as u8
            } else {
                b'?'
            }
        })
        .collect()
}
