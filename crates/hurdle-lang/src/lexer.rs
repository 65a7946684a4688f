//! Indentation-aware tokenizer.
//!
//! Blank and comment-only lines are skipped entirely. Leading whitespace of
//! every logical line is compared against an indentation stack to produce
//! `Indent`/`Dedent` tokens. Newlines inside brackets and after a backslash
//! continuation are not significant.

use crate::error::SyntaxError;
use crate::token::{Keyword, Op, Token, TokenKind};

const TAB_WIDTH: usize = 8;

/// Tokenizes a whole source file.
pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    indents: Vec<usize>,
    /// Open bracket stack: (char, line, col).
    brackets: Vec<(char, u32, u32)>,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            indents: vec![0],
            brackets: Vec::new(),
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn push(&mut self, kind: TokenKind, line: u32, col: u32) {
        self.tokens.push(Token { kind, line, col });
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, self.line, self.col)
    }

    fn run(mut self) -> Result<Vec<Token>, SyntaxError> {
        loop {
            if self.at_line_start && self.brackets.is_empty() {
                if !self.handle_indentation()? {
                    break;
                }
            }

            let Some(ch) = self.peek() else { break };
            let (line, col) = (self.line, self.col);
            match ch {
                ' ' | '\t' | '\x0c' | '\r' => {
                    self.bump();
                }
                '#' => self.skip_comment(),
                '\n' => {
                    self.bump();
                    if self.brackets.is_empty() {
                        self.push_newline(line, col);
                        self.at_line_start = true;
                    }
                }
                '\\' => {
                    self.bump();
                    if self.peek() == Some('\r') {
                        self.bump();
                    }
                    if self.peek() != Some('\n') {
                        return Err(
                            self.error("unexpected character after line continuation character")
                        );
                    }
                    self.bump();
                }
                c if c.is_ascii_digit() => self.lex_number(line, col)?,
                '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => {
                    self.lex_number(line, col)?
                }
                '"' | '\'' => {
                    let kind = self.lex_string(false, false, line)?;
                    self.push(kind, line, col);
                }
                c if is_ident_start(c) => self.lex_name(line, col)?,
                _ => self.lex_op(line, col)?,
            }
        }

        if let Some(&(open, line, col)) = self.brackets.last() {
            return Err(SyntaxError::new(format!("'{open}' was never closed"), line, col));
        }
        let (line, col) = (self.line, self.col);
        self.push_newline(line, col);
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, line, col);
        }
        self.push(TokenKind::Eof, line, col);
        Ok(self.tokens)
    }

    /// Measures the indentation of the next non-blank line and emits
    /// `Indent`/`Dedent` tokens. Returns `false` at end of input.
    fn handle_indentation(&mut self) -> Result<bool, SyntaxError> {
        loop {
            let mut width = 0usize;
            while let Some(ch) = self.peek() {
                match ch {
                    ' ' => width += 1,
                    '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                    '\x0c' => width = 0,
                    _ => break,
                }
                self.bump();
            }
            match self.peek() {
                None => return Ok(false),
                Some('#') => {
                    self.skip_comment();
                    continue;
                }
                Some('\r') => {
                    self.bump();
                    continue;
                }
                Some('\n') => {
                    self.bump();
                    continue;
                }
                Some(_) => {}
            }

            self.at_line_start = false;
            let current = self.indents.last().copied().unwrap_or(0);
            let (line, col) = (self.line, self.col);
            if width > current {
                self.indents.push(width);
                self.push(TokenKind::Indent, line, col);
            } else if width < current {
                while self.indents.last().is_some_and(|&top| width < top) {
                    self.indents.pop();
                    self.push(TokenKind::Dedent, line, col);
                }
                if self.indents.last().copied().unwrap_or(0) != width {
                    return Err(SyntaxError::new(
                        "unindent does not match any outer indentation level",
                        line,
                        col,
                    ));
                }
            }
            return Ok(true);
        }
    }

    fn push_newline(&mut self, line: u32, col: u32) {
        match self.tokens.last().map(|t| &t.kind) {
            None | Some(TokenKind::Newline) | Some(TokenKind::Dedent) => {}
            _ => self.push(TokenKind::Newline, line, col),
        }
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn lex_name(&mut self, line: u32, col: u32) -> Result<(), SyntaxError> {
        let mut ident = String::new();
        while let Some(ch) = self.peek() {
            if is_ident_continue(ch) {
                ident.push(ch);
                self.bump();
            } else {
                break;
            }
        }

        if matches!(self.peek(), Some('"') | Some('\'')) && ident.len() <= 2 {
            let lower = ident.to_ascii_lowercase();
            if lower.chars().all(|c| matches!(c, 'r' | 'f' | 'b' | 'u')) {
                if lower.contains('b') {
                    return Err(SyntaxError::unsupported("bytes literals are not supported", line, col));
                }
                let raw = lower.contains('r');
                let fstring = lower.contains('f');
                let kind = self.lex_string(raw, fstring, line)?;
                self.push(kind, line, col);
                return Ok(());
            }
        }

        let kind = match Keyword::from_ident(&ident) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Name(ident),
        };
        self.push(kind, line, col);
        Ok(())
    }

    fn lex_string(&mut self, raw: bool, fstring: bool, start_line: u32) -> Result<TokenKind, SyntaxError> {
        let quote = self.bump().unwrap_or('"');
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut text = String::new();
        loop {
            let Some(ch) = self.peek() else {
                let message = if triple {
                    format!("unterminated triple-quoted string literal (detected at line {})", self.line)
                } else {
                    format!("unterminated string literal (detected at line {start_line})")
                };
                return Err(SyntaxError::new(message, start_line, 1));
            };

            if ch == quote {
                if !triple {
                    self.bump();
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.bump();
                    self.bump();
                    self.bump();
                    break;
                }
                text.push(ch);
                self.bump();
                continue;
            }

            if ch == '\n' && !triple {
                return Err(SyntaxError::new(
                    format!("unterminated string literal (detected at line {start_line})"),
                    start_line,
                    1,
                ));
            }

            if ch == '\\' {
                self.bump();
                let Some(next) = self.peek() else { continue };
                if raw {
                    text.push('\\');
                    text.push(next);
                    self.bump();
                    continue;
                }
                self.bump();
                match next {
                    '\n' => {}
                    'n' => text.push('\n'),
                    't' => text.push('\t'),
                    'r' => text.push('\r'),
                    '0' => text.push('\0'),
                    'a' => text.push('\x07'),
                    'b' => text.push('\x08'),
                    'f' => text.push('\x0c'),
                    'v' => text.push('\x0b'),
                    '\\' => text.push('\\'),
                    '\'' => text.push('\''),
                    '"' => text.push('"'),
                    'x' => text.push(self.lex_hex_escape(2)?),
                    'u' => text.push(self.lex_hex_escape(4)?),
                    'U' => text.push(self.lex_hex_escape(8)?),
                    other => {
                        text.push('\\');
                        text.push(other);
                    }
                }
                continue;
            }

            text.push(ch);
            self.bump();
        }

        Ok(if fstring {
            TokenKind::FString(text)
        } else {
            TokenKind::Str(text)
        })
    }

    fn lex_hex_escape(&mut self, digits: usize) -> Result<char, SyntaxError> {
        let mut value = 0u32;
        for _ in 0..digits {
            let digit = self
                .peek()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("truncated \\x escape"))?;
            value = value * 16 + digit;
            self.bump();
        }
        char::from_u32(value).ok_or_else(|| self.error("invalid unicode escape"))
    }

    fn lex_number(&mut self, line: u32, col: u32) -> Result<(), SyntaxError> {
        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x') | Some('X') => Some(16),
                Some('o') | Some('O') => Some(8),
                Some('b') | Some('B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.bump();
                self.bump();
                let mut digits = String::new();
                while let Some(ch) = self.peek() {
                    if ch == '_' {
                        self.bump();
                    } else if ch.is_digit(radix) {
                        digits.push(ch);
                        self.bump();
                    } else {
                        break;
                    }
                }
                if digits.is_empty() {
                    return Err(SyntaxError::new("invalid integer literal", line, col));
                }
                let value = u64::from_str_radix(&digits, radix)
                    .map_err(|_| too_large(line, col))?;
                self.push(TokenKind::Int(value), line, col);
                return Ok(());
            }
        }

        let mut text = String::new();
        let mut is_float = false;
        self.take_digits(&mut text);
        if self.peek() == Some('.') && !self.peek_at(1).is_some_and(is_ident_start) {
            is_float = true;
            text.push('.');
            self.bump();
            self.take_digits(&mut text);
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = self.peek_at(1);
            let exp_digit = match sign {
                Some('+') | Some('-') => self.peek_at(2),
                other => other,
            };
            if exp_digit.is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                text.push('e');
                self.bump();
                if matches!(sign, Some('+') | Some('-')) {
                    text.push(sign.unwrap_or('+'));
                    self.bump();
                }
                self.take_digits(&mut text);
            }
        }
        if matches!(self.peek(), Some('j') | Some('J')) {
            return Err(SyntaxError::unsupported("complex literals are not supported", line, col));
        }
        if self.peek().is_some_and(is_ident_start) {
            return Err(SyntaxError::new("invalid decimal literal", line, col));
        }

        let kind = if is_float {
            let value = text
                .parse::<f64>()
                .map_err(|_| SyntaxError::new("invalid decimal literal", line, col))?;
            TokenKind::Float(value)
        } else {
            let value = text.parse::<u64>().map_err(|_| too_large(line, col))?;
            TokenKind::Int(value)
        };
        self.push(kind, line, col);
        Ok(())
    }

    fn take_digits(&mut self, out: &mut String) {
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                out.push(ch);
                self.bump();
            } else if ch == '_' && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn lex_op(&mut self, line: u32, col: u32) -> Result<(), SyntaxError> {
        let found = Op::TABLE.iter().find(|(text, _)| {
            text.chars()
                .enumerate()
                .all(|(i, c)| self.peek_at(i) == Some(c))
        });
        let Some(&(text, op)) = found else {
            let ch = self.peek().unwrap_or('?');
            return Err(SyntaxError::new(
                format!("invalid character '{ch}' (U+{:04X})", ch as u32),
                line,
                col,
            ));
        };
        for _ in 0..text.chars().count() {
            self.bump();
        }

        match op {
            Op::LParen => self.brackets.push(('(', line, col)),
            Op::LBracket => self.brackets.push(('[', line, col)),
            Op::LBrace => self.brackets.push(('{', line, col)),
            Op::RParen | Op::RBracket | Op::RBrace => {
                let close = match op {
                    Op::RParen => ')',
                    Op::RBracket => ']',
                    _ => '}',
                };
                match self.brackets.pop() {
                    None => {
                        return Err(SyntaxError::new(format!("unmatched '{close}'"), line, col));
                    }
                    Some((open, ..)) if matching_close(open) != close => {
                        return Err(SyntaxError::new(
                            format!(
                                "closing parenthesis '{close}' does not match opening parenthesis '{open}'"
                            ),
                            line,
                            col,
                        ));
                    }
                    Some(_) => {}
                }
            }
            _ => {}
        }
        self.push(TokenKind::Op(op), line, col);
        Ok(())
    }
}

fn matching_close(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Integers are 64-bit; wider literals are outside the subset.
fn too_large(line: u32, col: u32) -> SyntaxError {
    SyntaxError::unsupported("integer literals beyond 64 bits are not supported", line, col)
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn simple_assignment() {
        assert_eq!(
            kinds("x = 1\n"),
            vec![
                TokenKind::Name("x".into()),
                TokenKind::Op(Op::Assign),
                TokenKind::Int(1),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn indent_and_dedent_are_balanced() {
        let toks = kinds("if x:\n    y = 1\n    if y:\n        z = 2\nw = 3");
        let indents = toks.iter().filter(|k| **k == TokenKind::Indent).count();
        let dedents = toks.iter().filter(|k| **k == TokenKind::Dedent).count();
        assert_eq!(indents, 2);
        assert_eq!(dedents, 2);
        assert_eq!(toks.last(), Some(&TokenKind::Eof));
    }

    #[test]
    fn blank_and_comment_lines_do_not_affect_indentation() {
        let toks = kinds("def f():\n\n    # comment\n    return 1\n");
        assert_eq!(toks.iter().filter(|k| **k == TokenKind::Indent).count(), 1);
    }

    #[test]
    fn newlines_inside_brackets_are_ignored() {
        let toks = kinds("x = [\n  1,\n  2,\n]\n");
        assert_eq!(toks.iter().filter(|k| **k == TokenKind::Newline).count(), 1);
    }

    #[test]
    fn string_escapes_and_prefixes() {
        assert_eq!(kinds("'a\\nb'")[0], TokenKind::Str("a\nb".into()));
        assert_eq!(kinds("r'a\\nb'")[0], TokenKind::Str("a\\nb".into()));
        assert_eq!(kinds("f'{x}'")[0], TokenKind::FString("{x}".into()));
        assert_eq!(kinds("\"\"\"a\nb\"\"\"")[0], TokenKind::Str("a\nb".into()));
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("1_000")[0], TokenKind::Int(1000));
        assert_eq!(kinds("0xff")[0], TokenKind::Int(255));
        assert_eq!(kinds("2.5")[0], TokenKind::Float(2.5));
        assert_eq!(kinds("1e3")[0], TokenKind::Float(1000.0));
        assert_eq!(kinds(".5")[0], TokenKind::Float(0.5));
    }

    #[test]
    fn maximal_munch_operators() {
        assert_eq!(
            kinds("a //= b ** c")[1..4],
            [
                TokenKind::Op(Op::DoubleSlashEq),
                TokenKind::Name("b".into()),
                TokenKind::Op(Op::DoubleStar),
            ]
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = tokenize("x = 'abc\n").unwrap_err();
        assert!(err.message.contains("unterminated string literal"));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn bad_dedent_is_an_error() {
        let err = tokenize("if x:\n    y = 1\n  z = 2\n").unwrap_err();
        assert!(err.message.contains("unindent"));
        assert_eq!(err.line, 3);
    }

    #[test]
    fn unclosed_bracket_reports_opening_position() {
        let err = tokenize("x = (1,\n2\n").unwrap_err();
        assert_eq!(err.message, "'(' was never closed");
        assert_eq!(err.line, 1);
    }
}
