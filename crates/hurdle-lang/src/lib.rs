//! Front end for the traced scripting language.
//!
//! Turns source text into a [`Program`]: [`lexer`] produces an
//! indentation-aware token stream, [`parser`] builds the statement tree
//! defined in [`ast`]. Every failure is reported as a [`SyntaxError`] carrying
//! the 1-based line where it was detected.

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::{Expr, Program, Stmt, StmtKind};
pub use error::SyntaxError;
pub use parser::parse_program;
