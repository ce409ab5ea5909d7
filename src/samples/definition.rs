// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Parser and file name matcher for preset `definition.txt` files.
//!
//! Each line is either a preset-wide directive (`%%volume=<dB>`, `%%transpose=<semitones>`)
//! or a rule: a file name pattern with `%midinote`, `%velocity`, `%seq` and `%notename`
//! placeholders and `*` wildcards, optionally followed by `, key=value` defaults.
//! Patterns are anchored at the start of the file name only.

use pest::iterators::Pair;
use pest::Parser;
use tracing::warn;

use self::grammar::{DefinitionParser, Rule as Token};

mod grammar {
    use pest_derive::Parser;

    #[derive(Parser)]
    #[grammar = "src/samples/definition.pest"]
    pub struct DefinitionParser;
}

/// The gain every preset starts from before `%%volume` directives are applied.
pub const DEFAULT_VOLUME_DB: f64 = -12.0;

const NOTE_NAMES: [&str; 12] = [
    "c", "c#", "d", "d#", "e", "f", "f#", "g", "g#", "a", "a#", "b",
];

/// Errors for a single definition line. The line is skipped.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DefinitionError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("unknown directive %%{0}")]
    UnknownDirective(String),
}

/// A parsed definition file.
#[derive(Debug, Default)]
pub struct Definition {
    /// Each `%%volume` directive in order, in decibels.
    volume_db: Vec<f64>,
    /// The last `%%transpose` directive.
    transpose: Option<i32>,
    /// Sample rules in file order.
    rules: Vec<Rule>,
}

impl Definition {
    /// Parses a definition file. Lines that fail to parse are logged and skipped.
    pub fn parse(content: &str) -> Definition {
        let mut definition = Definition::default();

        for (i, line) in content.lines().enumerate() {
            match parse_line(line) {
                Ok(Some(Line::Volume(db))) => definition.volume_db.push(db),
                Ok(Some(Line::Transpose(semitones))) => definition.transpose = Some(semitones),
                Ok(Some(Line::Rule(rule))) => definition.rules.push(rule),
                Ok(None) => {}
                Err(e) => warn!(
                    line = i + 1,
                    err = e.to_string(),
                    "Error in definition file, skipping line."
                ),
            }
        }

        definition
    }

    /// The linear preset gain: -12 dB, adjusted by every `%%volume` directive.
    pub fn volume_gain(&self) -> f32 {
        let db = DEFAULT_VOLUME_DB + self.volume_db.iter().sum::<f64>();
        db_to_gain(db)
    }

    pub fn transpose(&self) -> i32 {
        self.transpose.unwrap_or(0)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

/// Converts decibels to a linear gain.
pub fn db_to_gain(db: f64) -> f32 {
    10f64.powf(db / 20.0) as f32
}

/// A single parsed line.
#[derive(Debug)]
pub enum Line {
    Volume(f64),
    Transpose(i32),
    Rule(Rule),
}

/// Parses one definition line. Blank lines yield None.
pub fn parse_line(line: &str) -> Result<Option<Line>, DefinitionError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let mut pairs = DefinitionParser::parse(Token::line, line)
        .map_err(|e| DefinitionError::Syntax(e.variant.message().to_string()))?;
    let Some(line_pair) = pairs.next() else {
        return Ok(None);
    };

    for pair in line_pair.into_inner() {
        match pair.as_rule() {
            Token::directive => return parse_directive(pair).map(Some),
            Token::rule => return parse_rule(pair).map(|rule| Some(Line::Rule(rule))),
            _ => {}
        }
    }

    Ok(None)
}

fn parse_directive(pair: Pair<Token>) -> Result<Line, DefinitionError> {
    let mut name = "";
    let mut value = "";
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Token::directive_name => name = inner.as_str(),
            Token::directive_value => value = inner.as_str().trim(),
            _ => {}
        }
    }

    let invalid = || DefinitionError::InvalidValue {
        key: name.to_string(),
        value: value.to_string(),
    };
    match name {
        "volume" => value.parse::<f64>().map(Line::Volume).map_err(|_| invalid()),
        "transpose" => value.parse::<i32>().map(Line::Transpose).map_err(|_| invalid()),
        _ => Err(DefinitionError::UnknownDirective(name.to_string())),
    }
}

fn parse_rule(pair: Pair<Token>) -> Result<Rule, DefinitionError> {
    let mut segments = Vec::new();
    let mut defaults = Defaults::default();

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Token::pattern => {
                for segment in inner.into_inner() {
                    segments.push(match segment.as_rule() {
                        Token::literal => Segment::Literal(segment.as_str().to_string()),
                        Token::wildcard => Segment::Wildcard,
                        _ => Segment::Field(field_from_name(segment.as_str())),
                    });
                }
            }
            Token::default => {
                let mut key = "";
                let mut value = "";
                for part in inner.into_inner() {
                    match part.as_rule() {
                        Token::default_key => key = part.as_str(),
                        Token::default_value => value = part.as_str(),
                        _ => {}
                    }
                }
                defaults.set(key, value)?;
            }
            _ => {}
        }
    }

    // Whitespace before a defaults comma is not part of the file name.
    if let Some(Segment::Literal(last)) = segments.last_mut() {
        let trimmed = last.trim_end().to_string();
        *last = trimmed;
    }

    Ok(Rule::new(segments, defaults))
}

fn field_from_name(placeholder: &str) -> Field {
    match placeholder.trim_start_matches('%') {
        "midinote" => Field::MidiNote,
        "velocity" => Field::Velocity,
        "seq" => Field::Sequence,
        _ => Field::NoteName,
    }
}

/// Converts a note name such as `c#4` to a MIDI note number.
pub fn note_from_name(name: &str) -> Option<u32> {
    let (split, _) = name.char_indices().last()?;
    let (pitch, octave) = name.split_at(split);
    let octave = octave.parse::<u32>().ok()?;
    let index = NOTE_NAMES
        .iter()
        .position(|n| *n == pitch.to_lowercase())?;
    Some(index as u32 + (octave + 2) * 12)
}

/// A placeholder field in a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    MidiNote,
    Velocity,
    Sequence,
    NoteName,
}

/// A piece of a file name pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Wildcard,
    Field(Field),
}

/// Values used when a pattern does not capture a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defaults {
    pub midinote: u32,
    pub velocity: u32,
    pub sequence: u32,
    pub notename: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Defaults {
            midinote: 0,
            velocity: 127,
            sequence: 1,
            notename: String::new(),
        }
    }
}

impl Defaults {
    fn set(&mut self, key: &str, value: &str) -> Result<(), DefinitionError> {
        let number = || {
            value.parse::<u32>().map_err(|_| DefinitionError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            })
        };
        match key {
            "midinote" => self.midinote = number()?,
            "velocity" => self.velocity = number()?,
            "seq" => self.sequence = number()?,
            "notename" => self.notename = value.to_string(),
            _ => warn!(key, value, "Ignoring unknown default in definition file."),
        }
        Ok(())
    }
}

/// Where a matched file lands in the bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleKey {
    pub note: u8,
    pub velocity: u8,
    pub sequence: u32,
}

/// Fields captured from a file name.
#[derive(Debug, Clone, Default)]
struct Captures<'a> {
    midinote: Option<u32>,
    velocity: Option<u32>,
    sequence: Option<u32>,
    notename: Option<&'a str>,
}

/// A file name pattern and its defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    segments: Vec<Segment>,
    defaults: Defaults,
}

impl Rule {
    pub fn new(segments: Vec<Segment>, defaults: Defaults) -> Rule {
        Rule { segments, defaults }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    /// Matches a file name against this rule. Returns None when the name does not match,
    /// or an error when it matches but resolves outside the note/velocity grid.
    pub fn resolve(&self, file_name: &str) -> Option<Result<SampleKey, DefinitionError>> {
        let captures = match_segments(&self.segments, file_name, Captures::default())?;

        let notename = captures
            .notename
            .unwrap_or(self.defaults.notename.as_str());
        let midinote = if notename.is_empty() {
            Some(captures.midinote.unwrap_or(self.defaults.midinote))
        } else {
            note_from_name(notename)
        };
        let velocity = captures.velocity.unwrap_or(self.defaults.velocity);
        let sequence = captures.sequence.unwrap_or(self.defaults.sequence);

        let note = match midinote.and_then(|n| u8::try_from(n).ok()).filter(|n| *n < 128) {
            Some(note) => note,
            None => {
                return Some(Err(DefinitionError::InvalidValue {
                    key: "midinote".into(),
                    value: midinote.map_or(notename.to_string(), |n| n.to_string()),
                }))
            }
        };
        let velocity = match u8::try_from(velocity).ok().filter(|v| *v < 128) {
            Some(velocity) => velocity,
            None => {
                return Some(Err(DefinitionError::InvalidValue {
                    key: "velocity".into(),
                    value: velocity.to_string(),
                }))
            }
        };

        Some(Ok(SampleKey {
            note,
            velocity,
            sequence,
        }))
    }
}

/// Backtracking matcher. Digit fields are greedy, wildcards are lazy, and the match only
/// has to cover a prefix of the input.
fn match_segments<'a>(
    segments: &[Segment],
    input: &'a str,
    captures: Captures<'a>,
) -> Option<Captures<'a>> {
    let Some((segment, rest)) = segments.split_first() else {
        return Some(captures);
    };

    match segment {
        Segment::Literal(literal) => input
            .strip_prefix(literal.as_str())
            .and_then(|remaining| match_segments(rest, remaining, captures)),
        Segment::Wildcard => input
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(input.len()))
            .find_map(|i| match_segments(rest, &input[i..], captures.clone())),
        Segment::Field(Field::NoteName) => {
            let bytes = input.as_bytes();
            let mut len = 0;
            if !bytes.first().is_some_and(|b| matches!(b, b'A'..=b'G' | b'a'..=b'g')) {
                return None;
            }
            len += 1;
            if bytes.get(len) == Some(&b'#') {
                len += 1;
            }
            if !bytes.get(len).is_some_and(u8::is_ascii_digit) {
                return None;
            }
            len += 1;

            let mut captures = captures;
            captures.notename = Some(&input[..len]);
            match_segments(rest, &input[len..], captures)
        }
        Segment::Field(field) => {
            let digits = input.bytes().take_while(u8::is_ascii_digit).count();
            (1..=digits).rev().find_map(|len| {
                let value = input[..len].parse::<u32>().ok()?;
                let mut captures = captures.clone();
                match field {
                    Field::MidiNote => captures.midinote = Some(value),
                    Field::Velocity => captures.velocity = Some(value),
                    _ => captures.sequence = Some(value),
                }
                match_segments(rest, &input[len..], captures)
            })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn rule_line(line: &str) -> Rule {
        match parse_line(line) {
            Ok(Some(Line::Rule(rule))) => rule,
            other => panic!("expected a rule, got {:?}", other),
        }
    }

    fn key(note: u8, velocity: u8, sequence: u32) -> Option<Result<SampleKey, DefinitionError>> {
        Some(Ok(SampleKey {
            note,
            velocity,
            sequence,
        }))
    }

    #[test]
    fn test_directives() {
        assert!(matches!(parse_line("%%volume=-6"), Ok(Some(Line::Volume(v))) if v == -6.0));
        assert!(matches!(parse_line("%%volume = 3.5 "), Ok(Some(Line::Volume(v))) if v == 3.5));
        assert!(matches!(parse_line("%%transpose=-12"), Ok(Some(Line::Transpose(-12)))));
        assert_eq!(
            Some(DefinitionError::UnknownDirective("tempo".into())),
            parse_line("%%tempo=120").err()
        );
        assert!(matches!(
            parse_line("%%transpose=up"),
            Err(DefinitionError::InvalidValue { .. })
        ));
        assert!(matches!(parse_line("   "), Ok(None)));
    }

    #[test]
    fn test_pattern_segments() {
        let rule = rule_line("piano_%midinote_v%velocity*.wav, seq=3");
        assert_eq!(
            &[
                Segment::Literal("piano_".into()),
                Segment::Field(Field::MidiNote),
                Segment::Literal("_v".into()),
                Segment::Field(Field::Velocity),
                Segment::Wildcard,
                Segment::Literal(".wav".into()),
            ],
            rule.segments()
        );
        assert_eq!(3, rule.defaults().sequence);
        assert_eq!(127, rule.defaults().velocity);
    }

    #[test]
    fn test_resolve_placeholders() {
        let rule = rule_line("%midinote_%velocity_%seq.wav");
        assert_eq!(key(60, 100, 2), rule.resolve("60_100_2.wav"));
        assert_eq!(None, rule.resolve("sixty_100_2.wav"));
        assert_eq!(None, rule.resolve("60_100.wav"));
    }

    #[test]
    fn test_resolve_defaults() {
        let rule = rule_line("kick*.wav, %midinote=36, velocity = 90");
        assert_eq!(key(36, 90, 1), rule.resolve("kick_hard.wav"));
        assert_eq!(key(36, 90, 1), rule.resolve("kick.wav"));

        let rule = rule_line("%midinote.wav");
        assert_eq!(key(48, 127, 1), rule.resolve("48.wav"));
    }

    #[test]
    fn test_resolve_note_names() {
        let rule = rule_line("%notename.wav");
        assert_eq!(key(72, 127, 1), rule.resolve("c4.wav"));
        assert_eq!(key(73, 127, 1), rule.resolve("C#4.wav"));
        assert_eq!(key(33, 127, 1), rule.resolve("a0.wav"));
        assert_eq!(None, rule.resolve("h4.wav"));

        // Default note names apply when the pattern has no placeholder.
        let rule = rule_line("bell.wav, notename=d3");
        assert_eq!(key(62, 127, 1), rule.resolve("bell.wav"));
    }

    #[test]
    fn test_resolve_out_of_range() {
        let rule = rule_line("%midinote.wav");
        assert!(matches!(rule.resolve("200.wav"), Some(Err(_))));

        let rule = rule_line("%notename.wav");
        assert!(matches!(rule.resolve("b9.wav"), Some(Err(_))));
    }

    #[test]
    fn test_wildcard_backtracking() {
        let rule = rule_line("*_%midinote.wav");
        assert_eq!(key(61, 127, 1), rule.resolve("soft_piano_61.wav"));

        // Digits backtrack to let the literal match.
        let rule = rule_line("%midinote1.wav");
        assert_eq!(key(6, 127, 1), rule.resolve("61.wav"));
    }

    #[test]
    fn test_prefix_match() {
        let rule = rule_line("%midinote");
        assert_eq!(key(60, 127, 1), rule.resolve("60.wav"));
    }

    #[test]
    fn test_note_from_name() {
        assert_eq!(Some(24), note_from_name("c0"));
        assert_eq!(Some(60), note_from_name("c3"));
        assert_eq!(Some(70), note_from_name("A#3"));
        assert_eq!(None, note_from_name("x3"));
        assert_eq!(None, note_from_name(""));
    }

    #[test]
    fn test_parse_definition() {
        let definition = Definition::parse(
            "%%volume=6\n%%volume=-6\n%%transpose=2\n\n%midinote.wav\n%midinote_x.wav, seq=oops\n",
        );
        assert_eq!(1, definition.rules().len());
        assert_eq!(2, definition.transpose());
        assert!((definition.volume_gain() - db_to_gain(-12.0)).abs() < 1e-6);

        let empty = Definition::parse("");
        assert_eq!(0, empty.transpose());
        assert!((empty.volume_gain() - 0.251_188_64).abs() < 1e-6);
    }
}
