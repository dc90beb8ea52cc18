//! Editor-protocol diagnostics for the charts validator.
//!
//! Every user-facing problem found during validation is represented by a
//! [`Diagnostic`]: a 0-based source range, a message, and a severity. The
//! shape mirrors the editor protocol so the records can be handed to
//! completion/hover tooling unchanged; `severity` serializes as the usual
//! 1..4 numeric code and `source` is always `"Axibase Charts"`.
//!
//! Diagnostics are accumulated, never thrown. Helpers at the bottom convert
//! a record into a `miette` report for rich terminal output in the CLI.

use std::sync::Arc;

use miette::{LabeledSpan, MietteDiagnostic, NamedSource, Severity};
use serde::{Serialize, Serializer};

/// Reported origin of every diagnostic this crate produces.
pub const DIAGNOSTIC_SOURCE: &str = "Axibase Charts";

// ============================================================================
// POSITIONS AND RANGES
// ============================================================================

/// A 0-based line/character position, counted in UTF-16 code units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Position {
    pub line: usize,
    pub character: usize,
}

impl Position {
    pub fn new(line: usize, character: usize) -> Self {
        Self { line, character }
    }
}

/// A half-open source range between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Range covering `[start_character, end_character)` on a single line.
    pub fn on_line(line: usize, start_character: usize, end_character: usize) -> Self {
        Self {
            start: Position::new(line, start_character),
            end: Position::new(line, end_character),
        }
    }

    /// Range of `length` characters starting at `start_character`.
    pub fn of_length(line: usize, start_character: usize, length: usize) -> Self {
        Self::on_line(line, start_character, start_character + length)
    }
}

// ============================================================================
// DIAGNOSTIC RECORDS
// ============================================================================

/// Severity levels, ordered and numbered as in the editor protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl Serialize for DiagnosticSeverity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// A single validation finding anchored to a source range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub range: Range,
    pub message: String,
    pub severity: DiagnosticSeverity,
    pub source: &'static str,
}

impl Diagnostic {
    pub fn new(range: Range, message: impl Into<String>, severity: DiagnosticSeverity) -> Self {
        Self {
            range,
            message: message.into(),
            severity,
            source: DIAGNOSTIC_SOURCE,
        }
    }

    pub fn error(range: Range, message: impl Into<String>) -> Self {
        Self::new(range, message, DiagnosticSeverity::Error)
    }

    pub fn warning(range: Range, message: impl Into<String>) -> Self {
        Self::new(range, message, DiagnosticSeverity::Warning)
    }

    pub fn information(range: Range, message: impl Into<String>) -> Self {
        Self::new(range, message, DiagnosticSeverity::Information)
    }

    pub fn hint(range: Range, message: impl Into<String>) -> Self {
        Self::new(range, message, DiagnosticSeverity::Hint)
    }
}

/// Removes diagnostics that share an identical source range with an earlier
/// one, keeping the first. Rule-engine passes may produce the same finding
/// from several rules; only one survives.
pub fn dedupe_by_range(diagnostics: Vec<Diagnostic>) -> Vec<Diagnostic> {
    let mut seen: Vec<Range> = Vec::with_capacity(diagnostics.len());
    let mut result = Vec::with_capacity(diagnostics.len());
    for diagnostic in diagnostics {
        if seen.contains(&diagnostic.range) {
            continue;
        }
        seen.push(diagnostic.range);
        result.push(diagnostic);
    }
    result
}

/// Sorts diagnostics by start position, then end position.
pub fn sort_by_position(diagnostics: &mut [Diagnostic]) {
    diagnostics.sort_by_key(|d| (d.range.start, d.range.end));
}

// ============================================================================
// MIETTE INTEROP
// ============================================================================

/// Converts a line/character position into a byte offset in `text`.
///
/// The character component counts UTF-16 code units, so surrogate pairs
/// advance it by two while contributing a single `char`.
pub fn position_to_offset(text: &str, position: Position) -> usize {
    let mut offset = 0;
    for (line_number, line) in text.split('\n').enumerate() {
        if line_number == position.line {
            let mut utf16_seen = 0;
            for ch in line.chars() {
                if utf16_seen >= position.character {
                    break;
                }
                utf16_seen += ch.len_utf16();
                offset += ch.len_utf8();
            }
            return offset;
        }
        offset += line.len() + 1;
    }
    offset
}

/// Wraps a diagnostic into a `miette` report against the original document,
/// for fancy terminal rendering.
pub fn to_report(diagnostic: &Diagnostic, file_name: &str, text: &str) -> miette::Report {
    let start = position_to_offset(text, diagnostic.range.start);
    let end = position_to_offset(text, diagnostic.range.end).max(start + 1);
    let severity = match diagnostic.severity {
        DiagnosticSeverity::Error => Severity::Error,
        DiagnosticSeverity::Warning => Severity::Warning,
        DiagnosticSeverity::Information | DiagnosticSeverity::Hint => Severity::Advice,
    };
    let report = MietteDiagnostic::new(diagnostic.message.clone())
        .with_severity(severity)
        .with_label(LabeledSpan::at(start..end, diagnostic.message.clone()));
    let source = Arc::new(NamedSource::new(file_name, text.to_string()));
    miette::Report::new(report).with_source_code(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_keeps_first_per_range() {
        let range = Range::on_line(0, 0, 4);
        let other = Range::on_line(1, 0, 4);
        let kept = Diagnostic::error(range, "first");
        let dropped = Diagnostic::warning(range, "second");
        let unrelated = Diagnostic::error(other, "third");
        let result = dedupe_by_range(vec![kept.clone(), dropped, unrelated.clone()]);
        assert_eq!(result, vec![kept, unrelated]);
    }

    #[test]
    fn severity_serializes_as_protocol_number() {
        let diagnostic = Diagnostic::warning(Range::on_line(2, 1, 3), "check");
        let json = serde_json::to_value(&diagnostic).unwrap();
        assert_eq!(json["severity"], 2);
        assert_eq!(json["source"], "Axibase Charts");
        assert_eq!(json["range"]["start"]["line"], 2);
    }

    #[test]
    fn position_offset_counts_lines_and_characters() {
        let text = "abc\ndef\nghi";
        assert_eq!(position_to_offset(text, Position::new(0, 0)), 0);
        assert_eq!(position_to_offset(text, Position::new(1, 1)), 5);
        assert_eq!(position_to_offset(text, Position::new(2, 3)), 11);
    }

    #[test]
    fn report_renders_message_and_label() {
        let diagnostic = Diagnostic::error(Range::on_line(0, 4, 9), "value is unknown");
        let report = to_report(&diagnostic, "test.config", "abc value");
        let rendered = format!("{report:?}");
        assert!(rendered.contains("value is unknown"));
    }
}
