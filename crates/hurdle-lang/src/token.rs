//! Token kinds produced by the [`lexer`](crate::lexer).

use std::fmt;

/// Reserved words of the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    False,
    None,
    True,
    And,
    As,
    Assert,
    Async,
    Await,
    Break,
    Class,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    Lambda,
    Nonlocal,
    Not,
    Or,
    Pass,
    Raise,
    Return,
    Try,
    While,
    With,
    Yield,
}

impl Keyword {
    pub fn from_ident(ident: &str) -> Option<Keyword> {
        let kw = match ident {
            "False" => Keyword::False,
            "None" => Keyword::None,
            "True" => Keyword::True,
            "and" => Keyword::And,
            "as" => Keyword::As,
            "assert" => Keyword::Assert,
            "async" => Keyword::Async,
            "await" => Keyword::Await,
            "break" => Keyword::Break,
            "class" => Keyword::Class,
            "continue" => Keyword::Continue,
            "def" => Keyword::Def,
            "del" => Keyword::Del,
            "elif" => Keyword::Elif,
            "else" => Keyword::Else,
            "except" => Keyword::Except,
            "finally" => Keyword::Finally,
            "for" => Keyword::For,
            "from" => Keyword::From,
            "global" => Keyword::Global,
            "if" => Keyword::If,
            "import" => Keyword::Import,
            "in" => Keyword::In,
            "is" => Keyword::Is,
            "lambda" => Keyword::Lambda,
            "nonlocal" => Keyword::Nonlocal,
            "not" => Keyword::Not,
            "or" => Keyword::Or,
            "pass" => Keyword::Pass,
            "raise" => Keyword::Raise,
            "return" => Keyword::Return,
            "try" => Keyword::Try,
            "while" => Keyword::While,
            "with" => Keyword::With,
            "yield" => Keyword::Yield,
            _ => return None,
        };
        Some(kw)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::False => "False",
            Keyword::None => "None",
            Keyword::True => "True",
            Keyword::And => "and",
            Keyword::As => "as",
            Keyword::Assert => "assert",
            Keyword::Async => "async",
            Keyword::Await => "await",
            Keyword::Break => "break",
            Keyword::Class => "class",
            Keyword::Continue => "continue",
            Keyword::Def => "def",
            Keyword::Del => "del",
            Keyword::Elif => "elif",
            Keyword::Else => "else",
            Keyword::Except => "except",
            Keyword::Finally => "finally",
            Keyword::For => "for",
            Keyword::From => "from",
            Keyword::Global => "global",
            Keyword::If => "if",
            Keyword::Import => "import",
            Keyword::In => "in",
            Keyword::Is => "is",
            Keyword::Lambda => "lambda",
            Keyword::Nonlocal => "nonlocal",
            Keyword::Not => "not",
            Keyword::Or => "or",
            Keyword::Pass => "pass",
            Keyword::Raise => "raise",
            Keyword::Return => "return",
            Keyword::Try => "try",
            Keyword::While => "while",
            Keyword::With => "with",
            Keyword::Yield => "yield",
        }
    }
}

/// Operators and delimiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    At,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    NotEq,
    Assign,
    PlusEq,
    MinusEq,
    StarEq,
    DoubleStarEq,
    SlashEq,
    DoubleSlashEq,
    PercentEq,
    AmpEq,
    PipeEq,
    CaretEq,
    ShlEq,
    ShrEq,
    Walrus,
    Arrow,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semi,
    Dot,
}

impl Op {
    /// Operators ordered longest first so the lexer can do maximal munch.
    pub const TABLE: &'static [(&'static str, Op)] = &[
        ("**=", Op::DoubleStarEq),
        ("//=", Op::DoubleSlashEq),
        ("<<=", Op::ShlEq),
        (">>=", Op::ShrEq),
        ("**", Op::DoubleStar),
        ("//", Op::DoubleSlash),
        ("<<", Op::Shl),
        (">>", Op::Shr),
        ("<=", Op::Le),
        (">=", Op::Ge),
        ("==", Op::EqEq),
        ("!=", Op::NotEq),
        ("+=", Op::PlusEq),
        ("-=", Op::MinusEq),
        ("*=", Op::StarEq),
        ("/=", Op::SlashEq),
        ("%=", Op::PercentEq),
        ("&=", Op::AmpEq),
        ("|=", Op::PipeEq),
        ("^=", Op::CaretEq),
        (":=", Op::Walrus),
        ("->", Op::Arrow),
        ("+", Op::Plus),
        ("-", Op::Minus),
        ("*", Op::Star),
        ("/", Op::Slash),
        ("%", Op::Percent),
        ("@", Op::At),
        ("&", Op::Amp),
        ("|", Op::Pipe),
        ("^", Op::Caret),
        ("~", Op::Tilde),
        ("<", Op::Lt),
        (">", Op::Gt),
        ("=", Op::Assign),
        ("(", Op::LParen),
        (")", Op::RParen),
        ("[", Op::LBracket),
        ("]", Op::RBracket),
        ("{", Op::LBrace),
        ("}", Op::RBrace),
        (",", Op::Comma),
        (":", Op::Colon),
        (";", Op::Semi),
        (".", Op::Dot),
    ];

    pub fn as_str(self) -> &'static str {
        Op::TABLE
            .iter()
            .find(|(_, op)| *op == self)
            .map(|(text, _)| *text)
            .unwrap_or("?")
    }
}

/// The kind (and payload) of a lexed token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(String),
    /// Unsigned magnitude; a leading `-` is a separate token.
    Int(u64),
    Float(f64),
    Str(String),
    /// Body of an f-string with escapes already processed; the parser splits
    /// it into literal and replacement fields.
    FString(String),
    Keyword(Keyword),
    Op(Op),
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Name(name) => write!(f, "name '{name}'"),
            TokenKind::Int(v) => write!(f, "number {v}"),
            TokenKind::Float(v) => write!(f, "number {v}"),
            TokenKind::Str(_) | TokenKind::FString(_) => write!(f, "string literal"),
            TokenKind::Keyword(kw) => write!(f, "'{}'", kw.as_str()),
            TokenKind::Op(op) => write!(f, "'{}'", op.as_str()),
            TokenKind::Newline => write!(f, "end of line"),
            TokenKind::Indent => write!(f, "indent"),
            TokenKind::Dedent => write!(f, "dedent"),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

/// A token with its 1-based source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub col: u32,
}
