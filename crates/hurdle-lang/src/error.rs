//! Syntax error type shared by the lexer and parser.

use thiserror::Error;

/// A lexing or parsing failure.
///
/// The display form mirrors the reference runtime's `str(SyntaxError)`, e.g.
/// `invalid syntax (<string>, line 3)`, so traces look familiar to users of
/// the language.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (<string>, line {line})")]
pub struct SyntaxError {
    /// Short description of what went wrong.
    pub message: String,
    /// 1-based line of the offending token.
    pub line: u32,
    /// 1-based column of the offending token.
    pub col: u32,
    /// The source is well formed but uses a construct this interpreter
    /// does not implement.
    pub unsupported: bool,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, line: u32, col: u32) -> Self {
        SyntaxError {
            message: message.into(),
            line,
            col,
            unsupported: false,
        }
    }

    /// A construct outside the supported subset, e.g. `yield`.
    pub fn unsupported(message: impl Into<String>, line: u32, col: u32) -> Self {
        SyntaxError {
            unsupported: true,
            ..SyntaxError::new(message, line, col)
        }
    }
}
