//! The keyword stack: block closure tracking and `if`/`else` pairing.
//!
//! The validator pushes every block opener that requires closing and feeds
//! closing lines through [`KeywordHandler::handle_closing`]. Whatever is
//! left on the stack at end of document and is not an unclosed-permitted
//! form becomes a "no matching end" diagnostic.

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::Config;
use crate::diagnostics::{Diagnostic, Range};
use crate::text_range::TextRange;

lazy_static! {
    static ref TRAILING_COMMA_OR_EQUALS: Regex = Regex::new(r"[=,]\s*$").unwrap();
}

#[derive(Debug, Default)]
pub struct KeywordHandler {
    stack: Vec<TextRange>,
}

impl KeywordHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn top(&self) -> Option<&TextRange> {
        self.stack.last()
    }

    pub fn push(&mut self, keyword: TextRange) {
        self.stack.push(keyword);
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Whether a keyword with this text is open anywhere on the stack.
    pub fn contains(&self, text: &str) -> bool {
        self.stack.iter().any(|keyword| keyword.text == text)
    }

    /// Decides whether a block opener requires a matching `end*`.
    ///
    /// Single-line `csv ... from`, `sql = ...` and `script = ...` forms
    /// never do. `var` requires closing only when its line is left open
    /// mid-bracket or with a trailing comma. `list` requires closing when
    /// the line implies continuation, resolved by lookahead past blank
    /// lines when ambiguous. Every other closeable keyword always does.
    pub fn should_be_closed(keyword: &TextRange, line: &str, config: &Config) -> bool {
        if keyword.can_be_unclosed {
            return false;
        }
        match keyword.text.as_str() {
            "var" => has_open_brackets(line) || line.trim_end().ends_with(','),
            "list" => {
                if TRAILING_COMMA_OR_EQUALS.is_match(line) {
                    return true;
                }
                // Lookahead: a continuation line starting with ',' or an
                // explicit endlist means the block form was intended.
                let mut next = keyword.range.start.line + 1;
                while let Some(ahead) = config.get_line(next) {
                    let trimmed = ahead.trim();
                    if trimmed.is_empty() {
                        next += 1;
                        continue;
                    }
                    return trimmed.starts_with(',') || trimmed == "endlist";
                }
                false
            }
            _ => true,
        }
    }

    /// Handles an `end*`, `else` or `elseif` line.
    ///
    /// `else`/`elseif` require an open `if` as the most recent unclosed
    /// keyword and leave the stack unchanged; `end*` pops its opener. A
    /// mismatched closer reports the overlap and unwinds past the opener
    /// so later closers can still match.
    pub fn handle_closing(&mut self, keyword: &TextRange) -> Option<Diagnostic> {
        match keyword.text.as_str() {
            "else" | "elseif" => self.handle_else(&keyword.text, keyword.range),
            end => {
                let opener = TextRange::opener_of(end)?.to_string();
                self.handle_end(end, &opener, keyword.range)
            }
        }
    }

    fn handle_else(&mut self, text: &str, range: Range) -> Option<Diagnostic> {
        match self.top() {
            Some(top) if top.text == "if" => None,
            Some(top) if self.contains("if") => Some(Diagnostic::error(
                range,
                format!("{} has started before {} has finished", text, top.text),
            )),
            _ => Some(Diagnostic::error(
                range,
                format!("{text} has no matching if"),
            )),
        }
    }

    fn handle_end(&mut self, end: &str, opener: &str, range: Range) -> Option<Diagnostic> {
        if self.top().map(|top| top.text == opener).unwrap_or(false) {
            self.stack.pop();
            return None;
        }
        if let Some(position) = self.stack.iter().rposition(|k| k.text == opener) {
            let top = self.stack.last().expect("stack is non-empty here");
            let diagnostic = Diagnostic::error(
                range,
                format!("{} has started before {} has finished", end, top.text),
            );
            self.stack.truncate(position);
            return Some(diagnostic);
        }
        Some(Diagnostic::error(
            range,
            format!("{end} has no matching {opener}"),
        ))
    }

    /// End-of-document pass: every still-open keyword that was required to
    /// close produces one diagnostic.
    pub fn finalize(&mut self) -> Vec<Diagnostic> {
        self.stack
            .drain(..)
            .filter(|keyword| !keyword.can_be_unclosed)
            .map(|keyword| {
                Diagnostic::error(
                    keyword.range,
                    format!("{} has no matching end{}", keyword.text, keyword.text),
                )
            })
            .collect()
    }
}

/// Whether the line leaves a bracket or brace unbalanced.
fn has_open_brackets(line: &str) -> bool {
    let mut depth: i32 = 0;
    let mut in_string: Option<char> = None;
    for c in line.chars() {
        match in_string {
            Some(quote) => {
                if c == quote {
                    in_string = None;
                }
            }
            None => match c {
                '\'' | '"' => in_string = Some(c),
                '[' | '{' | '(' => depth += 1,
                ']' | '}' | ')' => depth -= 1,
                _ => {}
            },
        }
    }
    depth > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyword(text: &str, line: usize) -> TextRange {
        TextRange {
            text: text.to_string(),
            range: Range::of_length(line, 0, text.len()),
            can_be_unclosed: false,
        }
    }

    #[test]
    fn var_closure_depends_on_brackets() {
        let config = Config::new("");
        let var = keyword("var", 0);
        assert!(KeywordHandler::should_be_closed(&var, "var v = [", &config));
        assert!(KeywordHandler::should_be_closed(&var, "var v = {\"a\": 1,", &config));
        assert!(!KeywordHandler::should_be_closed(&var, "var v = [1, 2]", &config));
        assert!(!KeywordHandler::should_be_closed(&var, "var v = \"[\"", &config));
    }

    #[test]
    fn list_closure_uses_lookahead() {
        let list = keyword("list", 0);
        let continued = Config::new("list servers = a,\n, b\nendlist");
        assert!(KeywordHandler::should_be_closed(&list, "list servers = a,", &continued));

        let inline = Config::new("list servers = a, b");
        assert!(!KeywordHandler::should_be_closed(&list, "list servers = a, b", &inline));

        // blank lines between declaration and continuation
        let blank_then_comma = Config::new("list servers = a\n\n, b\nendlist");
        assert!(KeywordHandler::should_be_closed(&list, "list servers = a", &blank_then_comma));

        let blank_then_done = Config::new("list servers = a\n\nentity = b");
        assert!(!KeywordHandler::should_be_closed(&list, "list servers = a", &blank_then_done));
    }

    #[test]
    fn matched_end_pops() {
        let mut handler = KeywordHandler::new();
        handler.push(keyword("for", 0));
        assert!(handler.handle_closing(&keyword("endfor", 2)).is_none());
        assert!(handler.is_empty());
    }

    #[test]
    fn orphan_end_reports() {
        let mut handler = KeywordHandler::new();
        let diagnostic = handler.handle_closing(&keyword("endfor", 0)).unwrap();
        assert_eq!(diagnostic.message, "endfor has no matching for");
    }

    #[test]
    fn else_requires_if_on_top() {
        let mut handler = KeywordHandler::new();
        assert_eq!(
            handler.handle_closing(&keyword("else", 0)).unwrap().message,
            "else has no matching if"
        );

        handler.push(keyword("if", 0));
        assert!(handler.handle_closing(&keyword("else", 1)).is_none());

        handler.push(keyword("for", 2));
        let diagnostic = handler.handle_closing(&keyword("elseif", 3)).unwrap();
        assert_eq!(diagnostic.message, "elseif has started before for has finished");
    }

    #[test]
    fn mismatched_end_unwinds_past_opener() {
        let mut handler = KeywordHandler::new();
        handler.push(keyword("if", 0));
        handler.push(keyword("for", 1));
        let diagnostic = handler.handle_closing(&keyword("endif", 2)).unwrap();
        assert_eq!(diagnostic.message, "endif has started before for has finished");
        assert!(handler.is_empty());
    }

    #[test]
    fn finalize_reports_unclosed_blocks_once() {
        let mut handler = KeywordHandler::new();
        handler.push(keyword("for", 0));
        let mut inline_sql = keyword("sql", 1);
        inline_sql.can_be_unclosed = true;
        handler.push(inline_sql);
        let diagnostics = handler.finalize();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message, "for has no matching endfor");
    }
}
