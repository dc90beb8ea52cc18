//! Recognition of block keywords (`for`, `if`, `csv`, `var`, ...).
//!
//! A [`TextRange`] records one keyword occurrence: its text, source range,
//! and whether the block form may legally stay unclosed. The keyword stack
//! in `keyword_handler` is built from these.

use lazy_static::lazy_static;
use regex::Regex;

use crate::diagnostics::Range;

lazy_static! {
    /// Leading keyword token of a line. Closing forms come first so the
    /// alternation never matches their opener prefix.
    static ref KEYWORD: Regex = Regex::new(
        r"^([ \t]*)(endvar|endcsv|endfor|elseif|endif|endscript|endlist|endsql|script|else|import|if|list|sql|for|csv|var)\b"
    )
    .unwrap();
    static ref CLOSE_ABLE: Regex =
        Regex::new(r"^[ \t]*(for|if|list|sql|var|script|csv|else|elseif)\b").unwrap();
    static ref CLOSING: Regex =
        Regex::new(r"^[ \t]*(endvar|endcsv|endfor|endif|endscript|endlist|endsql|elseif|else)\b")
            .unwrap();
    /// Single-line forms that never require a matching `end*`:
    /// `csv <name> from <url>`, `sql = ...`, `script = ...`.
    static ref UNCLOSED_PERMITTED: Regex =
        Regex::new(r"^[ \t]*(csv\s+\w+\s+from\b|sql\s*=|script\s*=)").unwrap();
}

/// One recognized keyword occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRange {
    pub text: String,
    pub range: Range,
    /// Whether the absence of a matching `end*` is valid for this form.
    pub can_be_unclosed: bool,
}

impl TextRange {
    /// Recognizes the leading keyword of `line`, if any.
    pub fn parse(line: &str, line_number: usize) -> Option<TextRange> {
        let caps = KEYWORD.captures(line)?;
        let indent = caps.get(1).unwrap().as_str().len();
        let text = caps.get(2).unwrap().as_str();
        Some(TextRange {
            text: text.to_string(),
            range: Range::of_length(line_number, indent, text.len()),
            can_be_unclosed: UNCLOSED_PERMITTED.is_match(line),
        })
    }

    /// Whether the line opens a block that participates in closure
    /// tracking.
    pub fn is_close_able(line: &str) -> bool {
        CLOSE_ABLE.is_match(line)
    }

    /// Whether the line closes a block (`end*` forms, plus `else`/`elseif`
    /// which close one `if` branch before reopening).
    pub fn is_closing(line: &str) -> bool {
        CLOSING.is_match(line)
    }

    /// The opener keyword matching an `end*` form, when `text` is one.
    pub fn opener_of(text: &str) -> Option<&str> {
        text.strip_prefix("end")
            .filter(|opener| !opener.is_empty())
    }
}
