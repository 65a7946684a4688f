//! Recursive-descent parser from tokens to [`Program`].
//!
//! The grammar follows the reference language's precedence levels from
//! lambda/conditional expressions down to primaries with trailers. A few
//! checks the reference compiler performs before running anything are done
//! here too (`return` outside a function, `break` outside a loop, invalid
//! assignment targets), so such programs fail as a whole with a
//! [`SyntaxError`] instead of partially executing.

use std::sync::Arc;

use crate::ast::*;
use crate::error::SyntaxError;
use crate::lexer::tokenize;
use crate::token::{Keyword, Op, Token, TokenKind};

/// Nesting limit for brackets, unary operators and blocks.
const MAX_NESTING: usize = 100;

/// Parses a complete source file.
pub fn parse_program(source: &str) -> Result<Program, SyntaxError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    let mut body = Vec::new();
    while !parser.at(&TokenKind::Eof) {
        if parser.at(&TokenKind::Newline) {
            parser.advance();
            continue;
        }
        body.extend(parser.statement()?);
    }
    Ok(Program { body })
}

/// Parses a standalone expression, as found inside f-string fields.
fn parse_expression_at(source: &str, line: u32) -> Result<Expr, SyntaxError> {
    let relocate = |mut err: SyntaxError| {
        err.line = line + err.line.saturating_sub(1);
        err
    };
    let tokens = tokenize(source).map_err(relocate)?;
    let mut parser = Parser::new(tokens);
    if parser.at(&TokenKind::Newline) || parser.at(&TokenKind::Eof) {
        return Err(SyntaxError::new(
            "f-string: empty expression not allowed",
            line,
            1,
        ));
    }
    let expr = parser.testlist().map_err(relocate)?;
    if parser.at(&TokenKind::Newline) {
        parser.advance();
    }
    if !parser.at(&TokenKind::Eof) {
        return Err(relocate(parser.unexpected()));
    }
    Ok(expr)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Context {
    Loop,
    Function,
    Class,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    /// Enclosing constructs, innermost last; drives the
    /// `break`/`continue`/`return` placement checks.
    contexts: Vec<Context>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            depth: 0,
            contexts: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Token helpers
    // -----------------------------------------------------------------------

    fn current(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek(&self) -> &TokenKind {
        &self.current().kind
    }

    fn peek_nth(&self, n: usize) -> &TokenKind {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + n).min(last)].kind
    }

    fn line(&self) -> u32 {
        self.current().line
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn at_op(&self, op: Op) -> bool {
        matches!(self.peek(), TokenKind::Op(o) if *o == op)
    }

    fn at_kw(&self, kw: Keyword) -> bool {
        matches!(self.peek(), TokenKind::Keyword(k) if *k == kw)
    }

    fn eat_op(&mut self, op: Op) -> bool {
        if self.at_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        if self.at_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: Op) -> Result<(), SyntaxError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", op.as_str())))
        }
    }

    fn expect_kw(&mut self, kw: Keyword) -> Result<(), SyntaxError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", kw.as_str())))
        }
    }

    fn expect_name(&mut self) -> Result<String, SyntaxError> {
        match self.peek().clone() {
            TokenKind::Name(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        let token = self.current();
        SyntaxError::new(message, token.line, token.col)
    }

    fn unsupported(&self, message: impl Into<String>) -> SyntaxError {
        let token = self.current();
        SyntaxError::unsupported(message, token.line, token.col)
    }

    fn unexpected(&self) -> SyntaxError {
        match self.peek() {
            TokenKind::Indent => self.error("unexpected indent"),
            TokenKind::Eof => self.error("unexpected EOF while parsing"),
            _ => self.error("invalid syntax"),
        }
    }

    fn enter(&mut self) -> Result<(), SyntaxError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("too many nested parentheses"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn in_function(&self) -> bool {
        self.contexts
            .iter()
            .rev()
            .find(|c| matches!(c, Context::Function | Context::Class))
            .is_some_and(|c| *c == Context::Function)
    }

    fn in_loop(&self) -> bool {
        self.contexts.last() == Some(&Context::Loop)
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn statement(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let stmt = match self.peek() {
            TokenKind::Keyword(Keyword::If) => self.if_stmt()?,
            TokenKind::Keyword(Keyword::While) => self.while_stmt()?,
            TokenKind::Keyword(Keyword::For) => self.for_stmt()?,
            TokenKind::Keyword(Keyword::Def) => self.def_stmt()?,
            TokenKind::Keyword(Keyword::Class) => self.class_stmt()?,
            TokenKind::Keyword(Keyword::Try) => self.try_stmt()?,
            TokenKind::Keyword(Keyword::With) => {
                return Err(self.unsupported("'with' statements are not supported"))
            }
            TokenKind::Keyword(Keyword::Async) => {
                return Err(self.unsupported("'async' is not supported"))
            }
            TokenKind::Op(Op::At) => return Err(self.unsupported("decorators are not supported")),
            TokenKind::Indent => return Err(self.error("unexpected indent")),
            _ => return self.simple_stmt_line(),
        };
        Ok(vec![stmt])
    }

    fn simple_stmt_line(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let mut stmts = vec![self.simple_stmt()?];
        while self.eat_op(Op::Semi) {
            if self.at(&TokenKind::Newline) || self.at(&TokenKind::Eof) {
                break;
            }
            stmts.push(self.simple_stmt()?);
        }
        match self.peek() {
            TokenKind::Newline => {
                self.advance();
            }
            TokenKind::Eof | TokenKind::Dedent => {}
            _ => return Err(self.unexpected()),
        }
        Ok(stmts)
    }

    fn simple_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        let kind = match self.peek().clone() {
            TokenKind::Keyword(Keyword::Pass) => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Keyword(Keyword::Break) => {
                if !self.in_loop() {
                    return Err(self.error("'break' outside loop"));
                }
                self.advance();
                StmtKind::Break
            }
            TokenKind::Keyword(Keyword::Continue) => {
                if !self.in_loop() {
                    return Err(self.error("'continue' not properly in loop"));
                }
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Keyword(Keyword::Return) => {
                if !self.in_function() {
                    return Err(self.error("'return' outside function"));
                }
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.testlist()?))
                }
            }
            TokenKind::Keyword(Keyword::Raise) => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Raise(None)
                } else {
                    let exc = self.test()?;
                    // `raise X from Y`: the cause is evaluated and dropped.
                    if self.eat_kw(Keyword::From) {
                        self.test()?;
                    }
                    StmtKind::Raise(Some(exc))
                }
            }
            TokenKind::Keyword(Keyword::Global) => {
                self.advance();
                StmtKind::Global(self.name_list()?)
            }
            TokenKind::Keyword(Keyword::Nonlocal) => {
                self.advance();
                if !self.in_function() {
                    return Err(self.error("nonlocal declaration not allowed at module level"));
                }
                StmtKind::Nonlocal(self.name_list()?)
            }
            TokenKind::Keyword(Keyword::Import) => {
                self.advance();
                let mut names = vec![self.import_alias()?];
                while self.eat_op(Op::Comma) {
                    names.push(self.import_alias()?);
                }
                StmtKind::Import(names)
            }
            TokenKind::Keyword(Keyword::From) => {
                self.advance();
                let module = self.dotted_name()?;
                self.expect_kw(Keyword::Import)?;
                let parenthesized = self.eat_op(Op::LParen);
                let mut names = Vec::new();
                if self.eat_op(Op::Star) {
                    return Err(self.unsupported("wildcard imports are not supported"));
                }
                loop {
                    let name = self.expect_name()?;
                    let asname = if self.eat_kw(Keyword::As) {
                        Some(self.expect_name()?)
                    } else {
                        None
                    };
                    names.push(Alias { name, asname });
                    if !self.eat_op(Op::Comma) {
                        break;
                    }
                    if parenthesized && self.at_op(Op::RParen) {
                        break;
                    }
                }
                if parenthesized {
                    self.expect_op(Op::RParen)?;
                }
                StmtKind::ImportFrom { module, names }
            }
            TokenKind::Keyword(Keyword::Assert) => {
                self.advance();
                let test = self.test()?;
                let msg = if self.eat_op(Op::Comma) {
                    Some(self.test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            TokenKind::Keyword(Keyword::Del) => {
                self.advance();
                let mut targets = vec![self.bitor()?];
                while self.eat_op(Op::Comma) {
                    if self.at_statement_end() {
                        break;
                    }
                    targets.push(self.bitor()?);
                }
                for target in &targets {
                    self.check_target(target, "delete")?;
                }
                StmtKind::Delete(targets)
            }
            TokenKind::Keyword(Keyword::Yield) => {
                return Err(self.unsupported("generators ('yield') are not supported"))
            }
            _ => self.expr_stmt()?,
        };
        Ok(Stmt { line, kind })
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Newline | TokenKind::Eof | TokenKind::Dedent | TokenKind::Op(Op::Semi)
        )
    }

    fn name_list(&mut self) -> Result<Vec<String>, SyntaxError> {
        let mut names = vec![self.expect_name()?];
        while self.eat_op(Op::Comma) {
            names.push(self.expect_name()?);
        }
        Ok(names)
    }

    fn dotted_name(&mut self) -> Result<String, SyntaxError> {
        let mut name = self.expect_name()?;
        while self.eat_op(Op::Dot) {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn import_alias(&mut self) -> Result<Alias, SyntaxError> {
        let name = self.dotted_name()?;
        let asname = if self.eat_kw(Keyword::As) {
            Some(self.expect_name()?)
        } else {
            None
        };
        Ok(Alias { name, asname })
    }

    fn expr_stmt(&mut self) -> Result<StmtKind, SyntaxError> {
        let first = self.testlist()?;

        if let Some(op) = self.aug_assign_op() {
            self.advance();
            match &first {
                Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. } => {}
                other => {
                    return Err(self.error(format!(
                        "'{}' is an illegal expression for augmented assignment",
                        other.describe()
                    )))
                }
            }
            let value = self.testlist()?;
            return Ok(StmtKind::AugAssign {
                target: first,
                op,
                value,
            });
        }

        // Annotated assignment: the annotation is parsed and ignored.
        if self.at_op(Op::Colon) {
            if !matches!(first, Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. }) {
                return Err(self.error("illegal target for annotation"));
            }
            self.advance();
            self.test()?;
            if self.eat_op(Op::Assign) {
                let value = self.testlist()?;
                return Ok(StmtKind::Assign {
                    targets: vec![first],
                    value,
                });
            }
            return Ok(StmtKind::Pass);
        }

        if !self.at_op(Op::Assign) {
            return Ok(StmtKind::Expr(first));
        }

        let mut exprs = vec![first];
        while self.eat_op(Op::Assign) {
            exprs.push(self.testlist()?);
        }
        let value = exprs.pop().ok_or_else(|| self.unexpected())?;
        for target in &exprs {
            self.check_target(target, "assign to")?;
        }
        Ok(StmtKind::Assign {
            targets: exprs,
            value,
        })
    }

    fn aug_assign_op(&self) -> Option<BinOp> {
        let TokenKind::Op(op) = self.peek() else {
            return None;
        };
        let bin = match op {
            Op::PlusEq => BinOp::Add,
            Op::MinusEq => BinOp::Sub,
            Op::StarEq => BinOp::Mul,
            Op::SlashEq => BinOp::Div,
            Op::DoubleSlashEq => BinOp::FloorDiv,
            Op::PercentEq => BinOp::Mod,
            Op::DoubleStarEq => BinOp::Pow,
            Op::AmpEq => BinOp::BitAnd,
            Op::PipeEq => BinOp::BitOr,
            Op::CaretEq => BinOp::BitXor,
            Op::ShlEq => BinOp::LShift,
            Op::ShrEq => BinOp::RShift,
            _ => return None,
        };
        Some(bin)
    }

    fn check_target(&self, target: &Expr, verb: &str) -> Result<(), SyntaxError> {
        match target {
            Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. } => Ok(()),
            Expr::Tuple(items) | Expr::List(items) => {
                let mut starred = 0;
                for item in items {
                    match item {
                        Expr::Starred(inner) if verb == "assign to" => {
                            starred += 1;
                            self.check_target(inner, verb)?;
                        }
                        _ => self.check_target(item, verb)?,
                    }
                }
                if starred > 1 {
                    return Err(self.error("multiple starred expressions in assignment"));
                }
                Ok(())
            }
            other => Err(self.error(format!("cannot {verb} {}", other.describe()))),
        }
    }

    /// Parses `:` followed by an indented block or a same-line statement list.
    fn block(&mut self, header: &str, header_line: u32) -> Result<Vec<Stmt>, SyntaxError> {
        self.expect_op(Op::Colon)?;
        if !self.at(&TokenKind::Newline) {
            return self.simple_stmt_line();
        }
        self.advance();
        if !self.at(&TokenKind::Indent) {
            return Err(self.error(format!(
                "expected an indented block after '{header}' statement on line {header_line}"
            )));
        }
        self.advance();
        self.enter()?;
        let mut body = Vec::new();
        while !self.at(&TokenKind::Dedent) && !self.at(&TokenKind::Eof) {
            if self.at(&TokenKind::Newline) {
                self.advance();
                continue;
            }
            body.extend(self.statement()?);
        }
        if self.at(&TokenKind::Dedent) {
            self.advance();
        }
        self.leave();
        Ok(body)
    }

    fn with_context<T>(
        &mut self,
        context: Context,
        f: impl FnOnce(&mut Self) -> Result<T, SyntaxError>,
    ) -> Result<T, SyntaxError> {
        self.contexts.push(context);
        let result = f(self);
        self.contexts.pop();
        result
    }

    fn if_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        let header = if self.eat_kw(Keyword::Elif) {
            "elif"
        } else {
            self.expect_kw(Keyword::If)?;
            "if"
        };
        let test = self.named_test()?;
        let body = self.block(header, line)?;
        let orelse = if self.at_kw(Keyword::Elif) {
            vec![self.if_stmt()?]
        } else if self.at_kw(Keyword::Else) {
            let else_line = self.line();
            self.advance();
            self.block("else", else_line)?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            line,
            kind: StmtKind::If { test, body, orelse },
        })
    }

    fn loop_else(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        if self.at_kw(Keyword::Else) {
            let line = self.line();
            self.advance();
            self.block("else", line)
        } else {
            Ok(Vec::new())
        }
    }

    fn while_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        self.expect_kw(Keyword::While)?;
        let test = self.named_test()?;
        let body = self.with_context(Context::Loop, |p| p.block("while", line))?;
        let orelse = self.loop_else()?;
        Ok(Stmt {
            line,
            kind: StmtKind::While { test, body, orelse },
        })
    }

    fn for_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        self.expect_kw(Keyword::For)?;
        let target = self.target_list()?;
        self.check_target(&target, "assign to")?;
        self.expect_kw(Keyword::In)?;
        let iter = self.testlist()?;
        let body = self.with_context(Context::Loop, |p| p.block("for", line))?;
        let orelse = self.loop_else()?;
        Ok(Stmt {
            line,
            kind: StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
        })
    }

    fn def_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        self.expect_kw(Keyword::Def)?;
        let name = self.expect_name()?;
        self.expect_op(Op::LParen)?;
        let (params, vararg) = self.parameters(Op::RParen)?;
        self.expect_op(Op::RParen)?;
        if self.eat_op(Op::Arrow) {
            self.test()?;
        }
        let body = self.with_context(Context::Function, |p| p.block("function definition", line))?;
        Ok(Stmt {
            line,
            kind: StmtKind::FunctionDef(Arc::new(FunctionDef {
                name,
                line,
                params,
                vararg,
                body,
            })),
        })
    }

    /// Parses a parameter list up to (not including) `close`.
    fn parameters(&mut self, close: Op) -> Result<(Vec<Param>, Option<String>), SyntaxError> {
        let mut params: Vec<Param> = Vec::new();
        let mut vararg = None;
        while !self.at_op(close) {
            if self.eat_op(Op::DoubleStar) {
                return Err(self.unsupported("'**kwargs' parameters are not supported"));
            }
            if self.eat_op(Op::Star) {
                if vararg.is_some() {
                    return Err(self.error("* argument may appear only once"));
                }
                vararg = Some(self.expect_name()?);
            } else {
                if vararg.is_some() {
                    return Err(self.unsupported("keyword-only parameters are not supported"));
                }
                let name = self.expect_name()?;
                if params.iter().any(|p| p.name == name) {
                    return Err(self.error(format!(
                        "duplicate argument '{name}' in function definition"
                    )));
                }
                // Annotations are parsed and ignored.
                if close == Op::RParen && self.eat_op(Op::Colon) {
                    self.test()?;
                }
                let default = if self.eat_op(Op::Assign) {
                    Some(self.test()?)
                } else {
                    if params.iter().any(|p| p.default.is_some()) {
                        return Err(
                            self.error("non-default argument follows default argument")
                        );
                    }
                    None
                };
                params.push(Param { name, default });
            }
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        Ok((params, vararg))
    }

    fn class_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        self.expect_kw(Keyword::Class)?;
        let name = self.expect_name()?;
        let mut bases = Vec::new();
        if self.eat_op(Op::LParen) {
            while !self.at_op(Op::RParen) {
                bases.push(self.test()?);
                if !self.eat_op(Op::Comma) {
                    break;
                }
            }
            self.expect_op(Op::RParen)?;
        }
        let body = self.with_context(Context::Class, |p| p.block("class definition", line))?;
        Ok(Stmt {
            line,
            kind: StmtKind::ClassDef(Arc::new(ClassDef {
                name,
                line,
                bases,
                body,
            })),
        })
    }

    fn try_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        self.expect_kw(Keyword::Try)?;
        let body = self.block("try", line)?;

        let mut handlers = Vec::new();
        while self.at_kw(Keyword::Except) {
            let handler_line = self.line();
            self.advance();
            let (kind, name) = if self.at_op(Op::Colon) {
                (None, None)
            } else {
                let kind = self.test()?;
                let name = if self.eat_kw(Keyword::As) {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                (Some(kind), name)
            };
            let body = self.block("except", handler_line)?;
            handlers.push(ExceptHandler {
                line: handler_line,
                kind,
                name,
                body,
            });
        }

        let orelse = if !handlers.is_empty() && self.at_kw(Keyword::Else) {
            let else_line = self.line();
            self.advance();
            self.block("else", else_line)?
        } else {
            Vec::new()
        };

        let finalbody = if self.at_kw(Keyword::Finally) {
            let finally_line = self.line();
            self.advance();
            self.block("finally", finally_line)?
        } else {
            Vec::new()
        };

        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }

        Ok(Stmt {
            line,
            kind: StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
        })
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    /// `test (',' test)* [',']`, producing a tuple when a comma is present.
    fn testlist(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.star_or(Self::named_test)?;
        if !self.at_op(Op::Comma) {
            return self.unstarred(first);
        }
        let mut items = vec![first];
        while self.eat_op(Op::Comma) {
            if self.at_expression_end() {
                break;
            }
            items.push(self.star_or(Self::named_test)?);
        }
        Ok(Expr::Tuple(items))
    }

    /// Assignment target list used by `for` and comprehensions; stops before
    /// `in`.
    fn target_list(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.star_or(Self::bitor)?;
        if !self.at_op(Op::Comma) {
            return self.unstarred(first);
        }
        let mut items = vec![first];
        while self.eat_op(Op::Comma) {
            if self.at_kw(Keyword::In) {
                break;
            }
            items.push(self.star_or(Self::bitor)?);
        }
        Ok(Expr::Tuple(items))
    }

    /// A `*`-prefixed item of a list, tuple or target list, else `item`.
    fn star_or(
        &mut self,
        item: fn(&mut Self) -> Result<Expr, SyntaxError>,
    ) -> Result<Expr, SyntaxError> {
        if self.eat_op(Op::Star) {
            return Ok(Expr::Starred(Box::new(self.bitor()?)));
        }
        item(self)
    }

    /// Rejects a starred expression standing on its own.
    fn unstarred(&self, expr: Expr) -> Result<Expr, SyntaxError> {
        if matches!(expr, Expr::Starred(_)) {
            return Err(self.error("can't use starred expression here"));
        }
        Ok(expr)
    }

    fn at_expression_end(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Newline
                | TokenKind::Eof
                | TokenKind::Dedent
                | TokenKind::Op(Op::Assign)
                | TokenKind::Op(Op::RParen)
                | TokenKind::Op(Op::RBracket)
                | TokenKind::Op(Op::RBrace)
                | TokenKind::Op(Op::Colon)
                | TokenKind::Op(Op::Semi)
        ) || self.aug_assign_op().is_some()
    }

    fn named_test(&mut self) -> Result<Expr, SyntaxError> {
        if let (TokenKind::Name(name), TokenKind::Op(Op::Walrus)) =
            (self.peek().clone(), self.peek_nth(1).clone())
        {
            self.advance();
            self.advance();
            let value = self.test()?;
            return Ok(Expr::Named {
                name,
                value: Box::new(value),
            });
        }
        self.test()
    }

    fn test(&mut self) -> Result<Expr, SyntaxError> {
        self.enter()?;
        let result = self.test_inner();
        self.leave();
        result
    }

    fn test_inner(&mut self) -> Result<Expr, SyntaxError> {
        if self.at_kw(Keyword::Lambda) {
            return self.lambda();
        }
        let body = self.or_test()?;
        if !self.at_kw(Keyword::If) {
            return Ok(body);
        }
        self.advance();
        let test = self.or_test()?;
        self.expect_kw(Keyword::Else)?;
        let orelse = self.test()?;
        Ok(Expr::IfExp {
            test: Box::new(test),
            body: Box::new(body),
            orelse: Box::new(orelse),
        })
    }

    fn lambda(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        self.expect_kw(Keyword::Lambda)?;
        let (params, vararg) = self.parameters(Op::Colon)?;
        self.expect_op(Op::Colon)?;
        let body = self.with_context(Context::Function, |p| p.test())?;
        Ok(Expr::Lambda(Arc::new(FunctionDef {
            name: "<lambda>".to_string(),
            line,
            params,
            vararg,
            body: vec![Stmt {
                line,
                kind: StmtKind::Return(Some(body)),
            }],
        })))
    }

    fn or_test(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.and_test()?;
        if !self.at_kw(Keyword::Or) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw(Keyword::Or) {
            values.push(self.and_test()?);
        }
        Ok(Expr::BoolOp {
            op: BoolOp::Or,
            values,
        })
    }

    fn and_test(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.not_test()?;
        if !self.at_kw(Keyword::And) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw(Keyword::And) {
            values.push(self.not_test()?);
        }
        Ok(Expr::BoolOp {
            op: BoolOp::And,
            values,
        })
    }

    fn not_test(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_kw(Keyword::Not) {
            self.enter()?;
            let operand = self.not_test();
            self.leave();
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(operand?),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        let left = self.bitor()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        while let Some(op) = self.comparison_op() {
            ops.push(op);
            comparators.push(self.bitor()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::Compare {
            left: Box::new(left),
            ops,
            comparators,
        })
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let op = match self.peek() {
            TokenKind::Op(Op::EqEq) => CmpOp::Eq,
            TokenKind::Op(Op::NotEq) => CmpOp::NotEq,
            TokenKind::Op(Op::Lt) => CmpOp::Lt,
            TokenKind::Op(Op::Le) => CmpOp::LtE,
            TokenKind::Op(Op::Gt) => CmpOp::Gt,
            TokenKind::Op(Op::Ge) => CmpOp::GtE,
            TokenKind::Keyword(Keyword::In) => CmpOp::In,
            TokenKind::Keyword(Keyword::Not)
                if matches!(self.peek_nth(1), TokenKind::Keyword(Keyword::In)) =>
            {
                self.advance();
                CmpOp::NotIn
            }
            TokenKind::Keyword(Keyword::Is) => {
                if matches!(self.peek_nth(1), TokenKind::Keyword(Keyword::Not)) {
                    self.advance();
                    CmpOp::IsNot
                } else {
                    CmpOp::Is
                }
            }
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, SyntaxError>,
        table: &[(Op, BinOp)],
    ) -> Result<Expr, SyntaxError> {
        let mut left = next(self)?;
        loop {
            let found = table.iter().find(|(op, _)| self.at_op(*op));
            let Some(&(_, bin)) = found else { break };
            self.advance();
            let right = next(self)?;
            left = Expr::BinOp {
                left: Box::new(left),
                op: bin,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn bitor(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(Self::bitxor, &[(Op::Pipe, BinOp::BitOr)])
    }

    fn bitxor(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(Self::bitand, &[(Op::Caret, BinOp::BitXor)])
    }

    fn bitand(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(Self::shift, &[(Op::Amp, BinOp::BitAnd)])
    }

    fn shift(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            Self::arith,
            &[(Op::Shl, BinOp::LShift), (Op::Shr, BinOp::RShift)],
        )
    }

    fn arith(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(Self::term, &[(Op::Plus, BinOp::Add), (Op::Minus, BinOp::Sub)])
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            Self::factor,
            &[
                (Op::Star, BinOp::Mul),
                (Op::Slash, BinOp::Div),
                (Op::DoubleSlash, BinOp::FloorDiv),
                (Op::Percent, BinOp::Mod),
                (Op::At, BinOp::MatMul),
            ],
        )
    }

    fn factor(&mut self) -> Result<Expr, SyntaxError> {
        let op = match self.peek() {
            TokenKind::Op(Op::Minus) => UnaryOp::Neg,
            TokenKind::Op(Op::Plus) => UnaryOp::Pos,
            TokenKind::Op(Op::Tilde) => UnaryOp::Invert,
            _ => return self.power(),
        };
        self.advance();
        if op == UnaryOp::Neg && self.at_min_int_literal() {
            self.advance();
            return Ok(Expr::Constant(Constant::Int(i64::MIN)));
        }
        self.enter()?;
        let operand = self.factor();
        self.leave();
        let operand = operand?;
        // Fold negative numeric literals so `-1` is a constant.
        if op == UnaryOp::Neg {
            match operand {
                Expr::Constant(Constant::Int(v)) if v != i64::MIN => {
                    return Ok(Expr::Constant(Constant::Int(-v)))
                }
                Expr::Constant(Constant::Float(v)) => {
                    return Ok(Expr::Constant(Constant::Float(-v)))
                }
                _ => {}
            }
        }
        Ok(Expr::UnaryOp {
            op,
            operand: Box::new(operand),
        })
    }

    /// Whether the next token is the literal `9223372036854775808` used as
    /// a plain operand, so a preceding `-` makes it `i64::MIN`.
    fn at_min_int_literal(&self) -> bool {
        matches!(self.peek(), TokenKind::Int(v) if *v == i64::MIN.unsigned_abs())
            && !matches!(
                self.peek_nth(1),
                TokenKind::Op(Op::DoubleStar | Op::Dot | Op::LParen | Op::LBracket)
            )
    }

    fn power(&mut self) -> Result<Expr, SyntaxError> {
        if self.at_kw(Keyword::Await) {
            return Err(self.unsupported("'await' is not supported"));
        }
        let base = self.primary()?;
        if !self.eat_op(Op::DoubleStar) {
            return Ok(base);
        }
        self.enter()?;
        let exponent = self.factor();
        self.leave();
        Ok(Expr::BinOp {
            left: Box::new(base),
            op: BinOp::Pow,
            right: Box::new(exponent?),
        })
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op(Op::LParen) {
                let args = self.call_args()?;
                self.expect_op(Op::RParen)?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                };
            } else if self.eat_op(Op::LBracket) {
                let index = self.subscript_list()?;
                self.expect_op(Op::RBracket)?;
                expr = Expr::Subscript {
                    value: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat_op(Op::Dot) {
                let attr = self.expect_name()?;
                expr = Expr::Attribute {
                    value: Box::new(expr),
                    attr,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn call_args(&mut self) -> Result<Vec<Arg>, SyntaxError> {
        let mut args = Vec::new();
        while !self.at_op(Op::RParen) {
            if self.eat_op(Op::DoubleStar) {
                return Err(self.unsupported("'**' argument unpacking is not supported"));
            }
            if self.eat_op(Op::Star) {
                args.push(Arg::Starred(self.test()?));
            } else if let (TokenKind::Name(name), TokenKind::Op(Op::Assign)) =
                (self.peek().clone(), self.peek_nth(1).clone())
            {
                self.advance();
                self.advance();
                args.push(Arg::Keyword(name, self.test()?));
            } else {
                let value = self.named_test()?;
                if self.at_kw(Keyword::For) {
                    let generators = self.comprehension_clauses()?;
                    args.push(Arg::Positional(Expr::Comprehension {
                        kind: ComprehensionKind::Generator,
                        element: Box::new(value),
                        value: None,
                        generators,
                    }));
                } else {
                    if matches!(args.last(), Some(Arg::Keyword(..))) {
                        return Err(
                            self.error("positional argument follows keyword argument")
                        );
                    }
                    args.push(Arg::Positional(value));
                }
            }
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        Ok(args)
    }

    fn subscript_list(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.subscript_item()?;
        if !self.at_op(Op::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(Op::Comma) {
            if self.at_op(Op::RBracket) {
                break;
            }
            items.push(self.subscript_item()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn subscript_item(&mut self) -> Result<Expr, SyntaxError> {
        let lower = if self.at_op(Op::Colon) {
            None
        } else {
            let expr = self.test()?;
            if !self.at_op(Op::Colon) {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };
        self.expect_op(Op::Colon)?;
        let upper = if self.at_op(Op::Colon) || self.at_op(Op::RBracket) || self.at_op(Op::Comma) {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat_op(Op::Colon) {
            if self.at_op(Op::RBracket) || self.at_op(Op::Comma) {
                None
            } else {
                Some(Box::new(self.test()?))
            }
        } else {
            None
        };
        Ok(Expr::Slice { lower, upper, step })
    }

    fn comprehension_clauses(&mut self) -> Result<Vec<Comprehension>, SyntaxError> {
        let mut generators = Vec::new();
        while self.eat_kw(Keyword::For) {
            let target = self.target_list()?;
            self.check_target(&target, "assign to")?;
            self.expect_kw(Keyword::In)?;
            let iter = self.or_test()?;
            let mut ifs = Vec::new();
            while self.eat_kw(Keyword::If) {
                ifs.push(self.or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(generators)
    }

    fn atom(&mut self) -> Result<Expr, SyntaxError> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Name(name) => {
                self.advance();
                Ok(Expr::Name(name))
            }
            TokenKind::Int(v) => {
                let Ok(v) = i64::try_from(v) else {
                    return Err(self.unsupported("integer literals beyond 64 bits are not supported"));
                };
                self.advance();
                Ok(Expr::Constant(Constant::Int(v)))
            }
            TokenKind::Float(v) => {
                self.advance();
                Ok(Expr::Constant(Constant::Float(v)))
            }
            TokenKind::Str(_) | TokenKind::FString(_) => self.strings(),
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::Constant(Constant::Bool(true)))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::Constant(Constant::Bool(false)))
            }
            TokenKind::Keyword(Keyword::None) => {
                self.advance();
                Ok(Expr::Constant(Constant::None))
            }
            TokenKind::Keyword(Keyword::Yield) => {
                Err(self.unsupported("generators ('yield') are not supported"))
            }
            TokenKind::Op(Op::LParen) => {
                self.advance();
                self.enter()?;
                let result = self.paren_tail();
                self.leave();
                result
            }
            TokenKind::Op(Op::LBracket) => {
                self.advance();
                self.enter()?;
                let result = self.list_tail();
                self.leave();
                result
            }
            TokenKind::Op(Op::LBrace) => {
                self.advance();
                self.enter()?;
                let result = self.brace_tail();
                self.leave();
                result
            }
            _ => Err(self.unexpected()),
        }
    }

    fn paren_tail(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_op(Op::RParen) {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.star_or(Self::named_test)?;
        if self.at_kw(Keyword::For) {
            let first = self.unstarred(first)?;
            let generators = self.comprehension_clauses()?;
            self.expect_op(Op::RParen)?;
            return Ok(Expr::Comprehension {
                kind: ComprehensionKind::Generator,
                element: Box::new(first),
                value: None,
                generators,
            });
        }
        if self.at_op(Op::RParen) {
            let first = self.unstarred(first)?;
            self.advance();
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(Op::Comma) {
            if self.at_op(Op::RParen) {
                break;
            }
            items.push(self.star_or(Self::named_test)?);
        }
        self.expect_op(Op::RParen)?;
        Ok(Expr::Tuple(items))
    }

    fn list_tail(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_op(Op::RBracket) {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.star_or(Self::named_test)?;
        if self.at_kw(Keyword::For) {
            if matches!(first, Expr::Starred(_)) {
                return Err(self.error("iterable unpacking cannot be used in comprehension"));
            }
            let generators = self.comprehension_clauses()?;
            self.expect_op(Op::RBracket)?;
            return Ok(Expr::Comprehension {
                kind: ComprehensionKind::List,
                element: Box::new(first),
                value: None,
                generators,
            });
        }
        let mut items = vec![first];
        while self.eat_op(Op::Comma) {
            if self.at_op(Op::RBracket) {
                break;
            }
            items.push(self.star_or(Self::named_test)?);
        }
        self.expect_op(Op::RBracket)?;
        Ok(Expr::List(items))
    }

    fn brace_tail(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_op(Op::RBrace) {
            return Ok(Expr::Dict(Vec::new()));
        }
        if self.at_op(Op::DoubleStar) {
            return Err(self.unsupported("'**' dict unpacking is not supported"));
        }
        let first = self.test()?;

        if self.eat_op(Op::Colon) {
            let value = self.test()?;
            if self.at_kw(Keyword::For) {
                let generators = self.comprehension_clauses()?;
                self.expect_op(Op::RBrace)?;
                return Ok(Expr::Comprehension {
                    kind: ComprehensionKind::Dict,
                    element: Box::new(first),
                    value: Some(Box::new(value)),
                    generators,
                });
            }
            let mut items = vec![(first, value)];
            while self.eat_op(Op::Comma) {
                if self.at_op(Op::RBrace) {
                    break;
                }
                let key = self.test()?;
                self.expect_op(Op::Colon)?;
                let value = self.test()?;
                items.push((key, value));
            }
            self.expect_op(Op::RBrace)?;
            return Ok(Expr::Dict(items));
        }

        if self.at_kw(Keyword::For) {
            let generators = self.comprehension_clauses()?;
            self.expect_op(Op::RBrace)?;
            return Ok(Expr::Comprehension {
                kind: ComprehensionKind::Set,
                element: Box::new(first),
                value: None,
                generators,
            });
        }
        let mut items = vec![first];
        while self.eat_op(Op::Comma) {
            if self.at_op(Op::RBrace) {
                break;
            }
            items.push(self.test()?);
        }
        self.expect_op(Op::RBrace)?;
        Ok(Expr::Set(items))
    }

    /// Adjacent string literals concatenate; any f-string among them makes
    /// the whole literal an f-string.
    fn strings(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut has_fstring = false;
        loop {
            match self.peek().clone() {
                TokenKind::Str(text) => {
                    self.advance();
                    push_literal(&mut parts, &text);
                }
                TokenKind::FString(text) => {
                    self.advance();
                    has_fstring = true;
                    for part in split_fstring(&text, line)? {
                        match part {
                            FStringPart::Literal(lit) => push_literal(&mut parts, &lit),
                            field => parts.push(field),
                        }
                    }
                }
                _ => break,
            }
        }
        if has_fstring {
            return Ok(Expr::FString(parts));
        }
        let text = match parts.pop() {
            Some(FStringPart::Literal(text)) => text,
            _ => String::new(),
        };
        Ok(Expr::Constant(Constant::Str(text)))
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: &str) {
    if let Some(FStringPart::Literal(last)) = parts.last_mut() {
        last.push_str(text);
    } else {
        parts.push(FStringPart::Literal(text.to_string()));
    }
}

/// Splits an f-string body into literal text and `{expr!conv:spec}` fields.
fn split_fstring(text: &str, line: u32) -> Result<Vec<FStringPart>, SyntaxError> {
    let chars: Vec<char> = text.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if ch == '{' && chars.get(i + 1) == Some(&'{') {
            literal.push('{');
            i += 2;
            continue;
        }
        if ch == '}' {
            if chars.get(i + 1) == Some(&'}') {
                literal.push('}');
                i += 2;
                continue;
            }
            return Err(SyntaxError::new(
                "f-string: single '}' is not allowed",
                line,
                1,
            ));
        }
        if ch != '{' {
            literal.push(ch);
            i += 1;
            continue;
        }

        // Scan the replacement field, honoring nested brackets and quotes.
        let start = i + 1;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut expr_end = None;
        let mut conversion = None;
        let mut spec_start = None;
        let mut j = start;
        while j < chars.len() {
            let c = chars[j];
            if let Some(q) = quote {
                if c == q {
                    quote = None;
                }
                j += 1;
                continue;
            }
            match c {
                '\'' | '"' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                '}' if depth > 0 => depth -= 1,
                '}' => break,
                '!' if depth == 0 && chars.get(j + 1) != Some(&'=') && expr_end.is_none() => {
                    expr_end = Some(j);
                    conversion = chars.get(j + 1).copied();
                    j += 2;
                    continue;
                }
                ':' if depth == 0 => {
                    if expr_end.is_none() {
                        expr_end = Some(j);
                    }
                    spec_start = Some(j + 1);
                    // The rest up to the closing brace is the format spec.
                    let mut k = j + 1;
                    let mut spec_depth = 0usize;
                    while k < chars.len() {
                        match chars[k] {
                            '{' => spec_depth += 1,
                            '}' if spec_depth > 0 => spec_depth -= 1,
                            '}' => break,
                            _ => {}
                        }
                        k += 1;
                    }
                    j = k;
                    break;
                }
                _ => {}
            }
            j += 1;
        }
        if j >= chars.len() {
            return Err(SyntaxError::new("f-string: expecting '}'", line, 1));
        }

        let expr_end = expr_end.unwrap_or(j);
        let mut source: String = chars[start..expr_end].iter().collect();
        let spec: Option<String> = spec_start.map(|s| chars[s..j].iter().collect());

        // `{name=}` echoes the expression text before its value.
        let trimmed = source.trim_end();
        if trimmed.ends_with('=')
            && !trimmed.ends_with("==")
            && !trimmed.ends_with("!=")
            && !trimmed.ends_with("<=")
            && !trimmed.ends_with(">=")
        {
            literal.push_str(&source);
            source = trimmed.trim_end_matches('=').to_string();
            if conversion.is_none() && spec.is_none() {
                conversion = Some('r');
            }
        }

        if let Some(conv) = conversion {
            if !matches!(conv, 'r' | 's' | 'a') {
                return Err(SyntaxError::new(
                    "f-string: invalid conversion character: expected 's', 'r', or 'a'",
                    line,
                    1,
                ));
            }
        }

        if !literal.is_empty() {
            parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
        }
        let expr = parse_expression_at(source.trim(), line)?;
        parts.push(FStringPart::Field {
            expr,
            conversion,
            spec,
        });
        i = j + 1;
    }

    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Program {
        parse_program(src).unwrap()
    }

    fn parse_err(src: &str) -> SyntaxError {
        parse_program(src).unwrap_err()
    }

    #[test]
    fn statements_record_their_lines() {
        let program = parse("x = 1\n\ny = x + 1\n");
        let lines: Vec<u32> = program.body.iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![1, 3]);
    }

    #[test]
    fn tuple_unpacking_assignment() {
        let program = parse("a, b = b, a");
        match &program.body[0].kind {
            StmtKind::Assign { targets, value } => {
                assert!(matches!(&targets[0], Expr::Tuple(items) if items.len() == 2));
                assert!(matches!(value, Expr::Tuple(items) if items.len() == 2));
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn elif_chain_nests_in_orelse() {
        let program = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        match &program.body[0].kind {
            StmtKind::If { orelse, .. } => {
                assert_eq!(orelse.len(), 1);
                assert_eq!(orelse[0].line, 3);
                assert!(matches!(&orelse[0].kind, StmtKind::If { orelse, .. } if orelse.len() == 1));
            }
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn function_definition_with_defaults() {
        let program = parse("def f(a, b=2, *rest):\n    return a\n");
        match &program.body[0].kind {
            StmtKind::FunctionDef(def) => {
                assert_eq!(def.name, "f");
                assert_eq!(def.params.len(), 2);
                assert!(def.params[1].default.is_some());
                assert_eq!(def.vararg.as_deref(), Some("rest"));
                assert_eq!(def.body[0].line, 2);
            }
            other => panic!("expected def, got {other:?}"),
        }
    }

    #[test]
    fn precedence_of_arithmetic() {
        let program = parse("x = 1 + 2 * 3 ** 2");
        let StmtKind::Assign { value, .. } = &program.body[0].kind else {
            panic!("expected assignment");
        };
        let Expr::BinOp { op, right, .. } = value else {
            panic!("expected binop");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(**right, Expr::BinOp { op: BinOp::Mul, .. }));
    }

    #[test]
    fn chained_comparison_and_membership() {
        let program = parse("ok = 0 <= i < n and x not in seen");
        let StmtKind::Assign { value, .. } = &program.body[0].kind else {
            panic!("expected assignment");
        };
        let Expr::BoolOp { values, .. } = value else {
            panic!("expected boolop");
        };
        assert!(matches!(&values[0], Expr::Compare { ops, .. } if ops.len() == 2));
        assert!(matches!(&values[1], Expr::Compare { ops, .. } if ops == &vec![CmpOp::NotIn]));
    }

    #[test]
    fn comprehensions_and_generator_arguments() {
        parse("evens = [i * 2 for i in range(10) if i % 2 == 0]");
        parse("s = ''.join(c.lower() for c in text if c.isalnum())");
        parse("d = {k: v for k, v in pairs}");
        parse("u = {x for x in xs}");
    }

    #[test]
    fn slices() {
        let program = parse("y = s[::-1]");
        let StmtKind::Assign { value, .. } = &program.body[0].kind else {
            panic!("expected assignment");
        };
        let Expr::Subscript { index, .. } = value else {
            panic!("expected subscript");
        };
        assert!(matches!(
            **index,
            Expr::Slice { lower: None, upper: None, step: Some(_) }
        ));
    }

    #[test]
    fn fstring_fields() {
        let program = parse("msg = f\"Index of {target}: {result!r:>5}\"");
        let StmtKind::Assign { value, .. } = &program.body[0].kind else {
            panic!("expected assignment");
        };
        let Expr::FString(parts) = value else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 4);
        assert!(matches!(&parts[3], FStringPart::Field { conversion: Some('r'), spec: Some(s), .. } if s == ">5"));
    }

    #[test]
    fn lambda_body_is_a_return() {
        let program = parse("key = lambda p: p[1]");
        let StmtKind::Assign { value: Expr::Lambda(def), .. } = &program.body[0].kind else {
            panic!("expected lambda");
        };
        assert_eq!(def.name, "<lambda>");
        assert!(matches!(def.body[0].kind, StmtKind::Return(Some(_))));
    }

    #[test]
    fn try_except_finally() {
        let program = parse(
            "try:\n    x = 1\nexcept (ValueError, KeyError) as e:\n    x = 2\nelse:\n    x = 3\nfinally:\n    y = 4\n",
        );
        match &program.body[0].kind {
            StmtKind::Try {
                handlers,
                orelse,
                finalbody,
                ..
            } => {
                assert_eq!(handlers.len(), 1);
                assert_eq!(handlers[0].name.as_deref(), Some("e"));
                assert_eq!(handlers[0].line, 3);
                assert_eq!(orelse.len(), 1);
                assert_eq!(finalbody.len(), 1);
            }
            other => panic!("expected try, got {other:?}"),
        }
    }

    #[test]
    fn placement_errors() {
        assert_eq!(parse_err("return 1").message, "'return' outside function");
        assert_eq!(parse_err("break").message, "'break' outside loop");
        assert_eq!(
            parse_err("while x:\n    def f():\n        break\n").message,
            "'break' outside loop"
        );
        parse("for i in x:\n    if i:\n        continue\n");
    }

    #[test]
    fn invalid_targets() {
        assert_eq!(parse_err("f() = 1").message, "cannot assign to function call");
        assert_eq!(parse_err("1 = x").message, "cannot assign to literal");
    }

    #[test]
    fn starred_targets_and_items() {
        let program = parse("first, *rest = xs\nys = [*xs, 1]\n");
        match &program.body[0].kind {
            StmtKind::Assign { targets, .. } => match &targets[0] {
                Expr::Tuple(items) => {
                    assert!(matches!(&items[0], Expr::Name(n) if n == "first"));
                    assert!(matches!(&items[1], Expr::Starred(inner) if matches!(**inner, Expr::Name(_))));
                }
                other => panic!("expected a tuple target, got {other:?}"),
            },
            other => panic!("expected assignment, got {other:?}"),
        }
        parse("for k, *vs in rows:\n    pass\n");
        assert_eq!(
            parse_err("a, *b, *c = xs").message,
            "multiple starred expressions in assignment"
        );
        assert_eq!(parse_err("x = *xs").message, "can't use starred expression here");
        assert!(!parse_err("*a = xs").unsupported);
    }

    #[test]
    fn unsupported_constructs_are_flagged() {
        for src in [
            "def g():\n    yield 1\n",
            "def g():\n    x = yield\n",
            "def f(**kwargs):\n    pass\n",
            "with open(p) as f:\n    pass\n",
            "x = 99999999999999999999\n",
            "x = 0xffffffffffffffffff\n",
        ] {
            let err = parse_err(src);
            assert!(err.unsupported, "{src:?}: {err}");
            assert!(err.message.ends_with("not supported"), "{src:?}: {err}");
        }
        assert!(!parse_err("x = = 1\n").unsupported);
    }

    #[test]
    fn smallest_int_literal_folds_under_negation() {
        let program = parse("x = -9223372036854775808\n");
        match &program.body[0].kind {
            StmtKind::Assign { value, .. } => {
                assert!(matches!(value, Expr::Constant(Constant::Int(i64::MIN))));
            }
            other => panic!("expected assignment, got {other:?}"),
        }
        assert!(parse_err("x = 9223372036854775808\n").unsupported);
        assert!(parse_err("x = -9223372036854775808 ** 2\n").unsupported);
        assert_eq!(
            parse("x = -9223372036854775807\n").body.len(),
            1
        );
    }

    #[test]
    fn missing_block_reports_header_line() {
        let err = parse_err("if x:\ny = 1\n");
        assert_eq!(
            err.message,
            "expected an indented block after 'if' statement on line 1"
        );
        assert_eq!(err.line, 2);
    }

    #[test]
    fn invalid_syntax_line() {
        let err = parse_err("x = 1\ny = = 2\n");
        assert_eq!(err.message, "invalid syntax");
        assert_eq!(err.line, 2);
        assert_eq!(err.to_string(), "invalid syntax (<string>, line 2)");
    }

    #[test]
    fn deep_nesting_is_rejected_not_overflowed() {
        let src = format!("x = {}1{}", "(".repeat(500), ")".repeat(500));
        assert_eq!(parse_err(&src).message, "too many nested parentheses");
    }

    #[test]
    fn empty_source_is_an_empty_program() {
        assert!(parse("").body.is_empty());
        assert!(parse("# only a comment\n\n").body.is_empty());
    }
}
