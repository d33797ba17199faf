//! Typed model of a single G-code line.
//!
//! Lines are classified one at a time by [`classify_line`]. The classifier
//! is tolerant: anything it does not understand becomes
//! [`GcodeLine::Unknown`] instead of an error, so dialect assumptions stay in
//! this module and the analyzer only ever sees well-formed variants.

use serde::{Deserialize, Serialize};

/// Positioning mode for axes (`G90`/`G91`) or for the extruder (`M82`/`M83`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Positioning {
    /// Coordinates are absolute.
    #[default]
    Absolute,
    /// Coordinates are offsets from the current position.
    Relative,
}

/// Which heater a temperature command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Heater {
    /// Hotend (`M104`/`M109`).
    Nozzle,
    /// Heated bed (`M140`/`M190`).
    Bed,
}

/// A linear move (`G0`/`G1`). Every word is optional.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MoveCommand {
    /// `G0` rather than `G1`.
    pub rapid: bool,
    /// X word.
    pub x: Option<f64>,
    /// Y word.
    pub y: Option<f64>,
    /// Z word.
    pub z: Option<f64>,
    /// E word.
    pub e: Option<f64>,
    /// F word (mm/min).
    pub f: Option<f64>,
}

impl MoveCommand {
    /// Does the move name at least one positional axis?
    pub fn has_position(&self) -> bool {
        self.x.is_some() || self.y.is_some() || self.z.is_some()
    }
}

/// Flow-rate override (`M221 S<percent>`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowRateCommand {
    /// Override percentage (100 = nominal).
    pub percent: f64,
}

/// A classified G-code line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GcodeLine {
    /// Linear move.
    Move(MoveCommand),
    /// Flow-rate override.
    FlowRate(FlowRateCommand),
    /// Heater target.
    Temperature {
        /// Addressed heater.
        heater: Heater,
        /// Target temperature (°C).
        target: f64,
        /// Whether the command blocks until the target is reached.
        wait: bool,
    },
    /// `G90`/`G91`.
    Positioning(Positioning),
    /// `M82`/`M83`.
    ExtruderMode(Positioning),
    /// Comment-only line; text after the `;`, trimmed.
    Comment(String),
    /// Empty or whitespace-only line.
    Blank,
    /// Well-formed `G`/`M`/`T` command the model does not interpret.
    Other(String),
    /// Macro, malformed command or anything else; carries the upper-cased
    /// command word.
    Unknown(String),
}

/// A line of source text with its byte span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLine<'a> {
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset just past the line terminator (if any).
    pub end: usize,
    /// Line content without the terminator.
    pub text: &'a str,
}

/// Iterate over the lines of `source` with their byte spans.
///
/// Handles `\n` and `\r\n` terminators; a final unterminated line is still
/// yielded with `end == source.len()`.
pub fn source_lines(source: &str) -> impl Iterator<Item = SourceLine<'_>> {
    let mut start = 0;
    source.split_inclusive('\n').map(move |chunk| {
        let line = SourceLine {
            start,
            end: start + chunk.len(),
            text: chunk.trim_end_matches(['\n', '\r']),
        };
        start = line.end;
        line
    })
}

struct Word<'a> {
    letter: char,
    value: &'a str,
}

/// Split `G1X10 Y-2.5E.3` style code into letter/value words.
///
/// Returns `None` if the code is not a plain sequence of words (macros such
/// as `PRINT_END`, string arguments, ...).
fn split_words(code: &str) -> Option<Vec<Word<'_>>> {
    let mut words = Vec::new();
    let bytes = code.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let value_start = i + 1;
        let mut j = value_start;
        while j < bytes.len() && matches!(bytes[j], b'0'..=b'9' | b'.' | b'+' | b'-') {
            j += 1;
        }
        if j == value_start {
            return None;
        }
        words.push(Word {
            letter: c.to_ascii_uppercase(),
            value: &code[value_start..j],
        });
        i = j;
    }
    Some(words)
}

fn command_word(code: &str) -> String {
    code.split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}

/// Classify one line of G-code.
pub fn classify_line(raw: &str) -> GcodeLine {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return GcodeLine::Blank;
    }

    let (code, comment) = match trimmed.find(';') {
        Some(idx) => (trimmed[..idx].trim(), Some(&trimmed[idx + 1..])),
        None => (trimmed, None),
    };
    if code.is_empty() {
        return GcodeLine::Comment(comment.unwrap_or_default().trim().to_string());
    }

    let Some(mut words) = split_words(code) else {
        return GcodeLine::Unknown(command_word(code));
    };
    if words.first().is_some_and(|w| w.letter == 'N') {
        words.remove(0);
    }
    let Some((head, params)) = words.split_first() else {
        return GcodeLine::Unknown(command_word(code));
    };

    let unknown = || GcodeLine::Unknown(format!("{}{}", head.letter, head.value));
    let Ok(number) = head.value.parse::<f64>() else {
        return unknown();
    };
    if number.fract() != 0.0 || number < 0.0 {
        return unknown();
    }

    let mut values = Vec::with_capacity(params.len());
    for word in params {
        match word.value.parse::<f64>() {
            Ok(v) if v.is_finite() => values.push((word.letter, v)),
            _ => return unknown(),
        }
    }
    let param = |letter: char| {
        values
            .iter()
            .rev()
            .find(|(l, _)| *l == letter)
            .map(|(_, v)| *v)
    };

    match (head.letter, number as u32) {
        ('G', code @ (0 | 1)) => GcodeLine::Move(MoveCommand {
            rapid: code == 0,
            x: param('X'),
            y: param('Y'),
            z: param('Z'),
            e: param('E'),
            f: param('F'),
        }),
        ('G', 90) => GcodeLine::Positioning(Positioning::Absolute),
        ('G', 91) => GcodeLine::Positioning(Positioning::Relative),
        ('M', 82) => GcodeLine::ExtruderMode(Positioning::Absolute),
        ('M', 83) => GcodeLine::ExtruderMode(Positioning::Relative),
        ('M', 221) => match param('S') {
            Some(percent) => GcodeLine::FlowRate(FlowRateCommand { percent }),
            None => unknown(),
        },
        ('M', code @ (104 | 109 | 140 | 190)) => match param('S') {
            Some(target) => GcodeLine::Temperature {
                heater: if code == 104 || code == 109 {
                    Heater::Nozzle
                } else {
                    Heater::Bed
                },
                target,
                wait: code == 109 || code == 190,
            },
            None => unknown(),
        },
        ('G' | 'M' | 'T', _) => GcodeLine::Other(format!("{}{}", head.letter, head.value)),
        _ => unknown(),
    }
}
