//! Expression syntax checker for `if` conditions and `for` collections.
//!
//! A minimal recursive-descent recognizer over comparison, arithmetic and
//! logical expressions with calls, member access, indexing and array
//! literals. It never evaluates anything; it only accepts or rejects, and a
//! rejection carries the byte offset of the offending token so callers can
//! anchor a diagnostic at the exact column.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExprError {
    /// Byte offset of the problem within the checked text.
    pub offset: usize,
    pub message: String,
}

impl ExprError {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// Accepts or rejects an expression; `Ok(())` means syntactically valid.
pub fn check_expression(text: &str) -> Result<(), ExprError> {
    let mut parser = Parser::new(text);
    if let Some(error) = parser.error.take() {
        return Err(error);
    }
    if parser.peek().is_none() {
        return Err(ExprError::new(0, "expression is empty"));
    }
    parser.expression()?;
    match parser.peek() {
        None => Ok(()),
        Some(token) => Err(ExprError::new(
            token.offset,
            format!("unexpected '{}'", token.text(text)),
        )),
    }
}

// ============================================================================
// TOKENS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Number,
    String,
    Identifier,
    Operator,
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    Comma,
    Dot,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: TokenKind,
    offset: usize,
    len: usize,
}

impl Token {
    fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.offset..self.offset + self.len]
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, ExprError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        let kind = match c {
            '0'..='9' => {
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_digit() || bytes[i] == b'.')
                {
                    i += 1;
                }
                TokenKind::Number
            }
            '\'' | '"' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(ExprError::new(start, "unterminated string"));
                }
                i += 1;
                TokenKind::String
            }
            'a'..='z' | 'A'..='Z' | '_' | '@' | '$' => {
                i += 1;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric()
                        || bytes[i] == b'_'
                        || bytes[i] == b'-')
                {
                    i += 1;
                }
                TokenKind::Identifier
            }
            '(' => {
                i += 1;
                TokenKind::OpenParen
            }
            ')' => {
                i += 1;
                TokenKind::CloseParen
            }
            '[' => {
                i += 1;
                TokenKind::OpenBracket
            }
            ']' => {
                i += 1;
                TokenKind::CloseBracket
            }
            ',' => {
                i += 1;
                TokenKind::Comma
            }
            '.' => {
                i += 1;
                TokenKind::Dot
            }
            '&' | '|' | '=' | '!' | '<' | '>' | '+' | '-' | '*' | '/' | '%' => {
                i += 1;
                while i < bytes.len() && matches!(bytes[i], b'&' | b'|' | b'=') {
                    i += 1;
                }
                TokenKind::Operator
            }
            _ => return Err(ExprError::new(start, format!("invalid character '{c}'"))),
        };
        tokens.push(Token {
            kind,
            offset: start,
            len: i - start,
        });
    }
    Ok(tokens)
}

// ============================================================================
// GRAMMAR
// ============================================================================

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    index: usize,
    error: Option<ExprError>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        match tokenize(source) {
            Ok(tokens) => Self {
                source,
                tokens,
                index: 0,
                error: None,
            },
            Err(error) => Self {
                source,
                tokens: Vec::new(),
                index: 0,
                error: Some(error),
            },
        }
    }

    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.index).copied()
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.peek()?;
        self.index += 1;
        Some(token)
    }

    fn end_offset(&self) -> usize {
        self.source.len()
    }

    fn operator_is(&self, token: Token, accepted: &[&str]) -> bool {
        token.kind == TokenKind::Operator && accepted.contains(&token.text(self.source))
    }

    fn expression(&mut self) -> Result<(), ExprError> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        self.binary(0)
    }

    /// Precedence-climbing over the binary operator tiers.
    fn binary(&mut self, tier: usize) -> Result<(), ExprError> {
        const TIERS: &[&[&str]] = &[
            &["||"],
            &["&&"],
            &["==", "!=", "="],
            &["<", "<=", ">", ">="],
            &["+", "-"],
            &["*", "/", "%"],
        ];
        if tier >= TIERS.len() {
            return self.unary();
        }
        self.binary(tier + 1)?;
        while let Some(token) = self.peek() {
            if !self.operator_is(token, TIERS[tier]) {
                break;
            }
            self.advance();
            self.binary(tier + 1)?;
        }
        Ok(())
    }

    fn unary(&mut self) -> Result<(), ExprError> {
        while let Some(token) = self.peek() {
            if self.operator_is(token, &["!", "-", "+"]) {
                self.advance();
            } else {
                break;
            }
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<(), ExprError> {
        self.primary()?;
        while let Some(token) = self.peek() {
            match token.kind {
                TokenKind::OpenParen => {
                    self.advance();
                    self.arguments(TokenKind::CloseParen, "')'")?;
                }
                TokenKind::OpenBracket => {
                    self.advance();
                    self.expression()?;
                    self.expect(TokenKind::CloseBracket, "']'")?;
                }
                TokenKind::Dot => {
                    self.advance();
                    let member = self.advance().ok_or_else(|| {
                        ExprError::new(self.end_offset(), "expected member name after '.'")
                    })?;
                    if member.kind != TokenKind::Identifier {
                        return Err(ExprError::new(
                            member.offset,
                            format!("expected member name, found '{}'", member.text(self.source)),
                        ));
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn primary(&mut self) -> Result<(), ExprError> {
        let token = self
            .advance()
            .ok_or_else(|| ExprError::new(self.end_offset(), "unexpected end of expression"))?;
        match token.kind {
            TokenKind::Number | TokenKind::String | TokenKind::Identifier => Ok(()),
            TokenKind::OpenParen => {
                self.expression()?;
                self.expect(TokenKind::CloseParen, "')'")
            }
            TokenKind::OpenBracket => self.arguments(TokenKind::CloseBracket, "']'"),
            _ => Err(ExprError::new(
                token.offset,
                format!("unexpected '{}'", token.text(self.source)),
            )),
        }
    }

    /// Comma-separated expressions up to `close`; empty lists are allowed.
    fn arguments(&mut self, close: TokenKind, close_text: &str) -> Result<(), ExprError> {
        if let Some(token) = self.peek() {
            if token.kind == close {
                self.advance();
                return Ok(());
            }
        }
        loop {
            self.expression()?;
            match self.advance() {
                Some(token) if token.kind == close => return Ok(()),
                Some(token) if token.kind == TokenKind::Comma => continue,
                Some(token) => {
                    return Err(ExprError::new(
                        token.offset,
                        format!(
                            "expected {} or ',', found '{}'",
                            close_text,
                            token.text(self.source)
                        ),
                    ))
                }
                None => {
                    return Err(ExprError::new(
                        self.end_offset(),
                        format!("expected {close_text}"),
                    ))
                }
            }
        }
    }

    fn expect(&mut self, kind: TokenKind, text: &str) -> Result<(), ExprError> {
        match self.advance() {
            Some(token) if token.kind == kind => Ok(()),
            Some(token) => Err(ExprError::new(
                token.offset,
                format!("expected {}, found '{}'", text, token.text(self.source)),
            )),
            None => Err(ExprError::new(
                self.end_offset(),
                format!("expected {text}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_comparisons_and_arithmetic() {
        assert!(check_expression("a > 1").is_ok());
        assert!(check_expression("a == 'column' && b != 2").is_ok());
        assert!(check_expression("(x + 1) * 2 >= y % 3").is_ok());
        assert!(check_expression("!flag || value('a') < 10").is_ok());
    }

    #[test]
    fn accepts_collections() {
        assert!(check_expression("servers").is_ok());
        assert!(check_expression("object.keys(servers)").is_ok());
        assert!(check_expression("servers[0].name").is_ok());
        assert!(check_expression("['a', 'b', 'c']").is_ok());
        assert!(check_expression("[]").is_ok());
    }

    #[test]
    fn rejects_with_offset() {
        let err = check_expression("a > ").unwrap_err();
        assert_eq!(err.offset, 4);

        let err = check_expression("a ) b").unwrap_err();
        assert_eq!(err.offset, 2);

        let err = check_expression("").unwrap_err();
        assert_eq!(err.offset, 0);

        assert!(check_expression("'unterminated").is_err());
        assert!(check_expression("[1, 2").is_err());
    }
}
