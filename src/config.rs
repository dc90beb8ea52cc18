//! Line source for a charts configuration document.
//!
//! [`Config`] owns the comment-stripped, lower-cased lines of a document and
//! exposes a restartable forward cursor plus random-access lookup. Comment
//! stripping is strictly length-preserving: every comment character except
//! line feeds becomes a space, so ranges computed against the stripped text
//! stay valid against the original layout. Lower-casing is ASCII-only for
//! the same reason.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// `# ...` to end of line, when `#` is the first non-blank character.
    static ref ONE_LINE_COMMENT: Regex = Regex::new(r"(?m)^[ \t]*#.*").unwrap();
    /// `/* ... */`, possibly spanning lines.
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
}

/// Replaces comments with whitespace of identical shape.
///
/// The result has the same character count as the input and line feeds keep
/// their positions, so the line/column of every surviving character is
/// unchanged.
pub fn delete_comments(text: &str) -> String {
    let blanked = |captured: &str| -> String {
        captured
            .chars()
            .map(|c| if c == '\n' { '\n' } else { ' ' })
            .collect()
    };
    let stripped = ONE_LINE_COMMENT.replace_all(text, |caps: &regex::Captures| blanked(&caps[0]));
    BLOCK_COMMENT
        .replace_all(&stripped, |caps: &regex::Captures| blanked(&caps[0]))
        .into_owned()
}

/// The document as validated lines, with a forward-only cursor.
#[derive(Debug, Clone)]
pub struct Config {
    lines: Vec<String>,
    next_index: usize,
    current_line_number: usize,
}

impl Config {
    pub fn new(text: &str) -> Self {
        let lines = delete_comments(text)
            .split('\n')
            .map(|line| line.chars().map(|c| c.to_ascii_lowercase()).collect())
            .collect();
        Self {
            lines,
            next_index: 0,
            current_line_number: 0,
        }
    }

    /// Number of lines in the document.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Random-access lookup that does not disturb the forward cursor.
    pub fn get_line(&self, line_number: usize) -> Option<&str> {
        self.lines.get(line_number).map(String::as_str)
    }

    /// The line most recently yielded by the cursor.
    pub fn current_line(&self) -> &str {
        self.lines
            .get(self.current_line_number)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// 0-based number of the line most recently yielded.
    pub fn current_line_number(&self) -> usize {
        self.current_line_number
    }

    /// Advances the cursor and yields the next line.
    pub fn next_line(&mut self) -> Option<String> {
        if self.next_index >= self.lines.len() {
            return None;
        }
        self.current_line_number = self.next_index;
        self.next_index += 1;
        Some(self.lines[self.current_line_number].clone())
    }

    /// Rewinds the cursor to the start of the document.
    pub fn restart(&mut self) {
        self.next_index = 0;
        self.current_line_number = 0;
    }
}

impl Iterator for Config {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.next_line()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_stripping_preserves_length_and_newlines() {
        let text = "alpha = 1\n  # a comment\nbeta = 2 /* block\nstill block */ gamma";
        let stripped = delete_comments(text);
        assert_eq!(stripped.chars().count(), text.chars().count());
        let newline_positions = |s: &str| -> Vec<usize> {
            s.char_indices().filter(|(_, c)| *c == '\n').map(|(i, _)| i).collect()
        };
        assert_eq!(newline_positions(&stripped), newline_positions(text));
        assert!(!stripped.contains("comment"));
        assert!(!stripped.contains("block"));
        assert!(stripped.contains("gamma"));
    }

    #[test]
    fn hash_inside_line_is_not_a_comment() {
        let text = "entity = srv#01";
        assert_eq!(delete_comments(text), text);
    }

    #[test]
    fn lines_are_lower_cased() {
        let mut config = Config::new("[Widget]\n  Type = Chart");
        assert_eq!(config.next_line().as_deref(), Some("[widget]"));
        assert_eq!(config.next_line().as_deref(), Some("  type = chart"));
        assert_eq!(config.next_line(), None);
    }

    #[test]
    fn cursor_tracks_current_line() {
        let mut config = Config::new("a\nb\nc");
        config.next_line();
        config.next_line();
        assert_eq!(config.current_line_number(), 1);
        assert_eq!(config.current_line(), "b");
        // random access must not move the cursor
        assert_eq!(config.get_line(2), Some("c"));
        assert_eq!(config.current_line_number(), 1);
    }

    #[test]
    fn restart_rewinds_the_cursor() {
        let mut config = Config::new("a\nb");
        config.next_line();
        config.restart();
        assert_eq!(config.next_line().as_deref(), Some("a"));
    }
}
