//! Recursive-descent parser for the snippet language.
//!
//! Three entry points match the three snippet shapes the compiler tries:
//! [`parse_function`], [`parse_program`] and [`parse_expression`]. Each
//! must consume the whole input.

use std::sync::Arc;

use thiserror::Error;

use super::ast::*;
use super::lexer::{Lexer, TemplateChunk, Token, TokenKind};
use super::value::number_to_string;

/// Nesting limit for statements and expressions; keeps hostile input
/// from exhausting the native stack.
const MAX_NESTING: usize = 200;

const RESERVED: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "default", "delete", "do", "else",
    "export", "extends", "false", "finally", "for", "function", "if", "import", "in",
    "instanceof", "let", "new", "null", "return", "super", "switch", "this", "throw", "true",
    "try", "typeof", "undefined", "var", "void", "while", "with", "yield",
];

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    /// Byte offset into the snippet.
    pub offset: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }

    /// 1-based line and column of the error inside `source`.
    pub fn position(&self, source: &str) -> (usize, usize) {
        let upto = &source[..self.offset.min(source.len())];
        let line = upto.matches('\n').count() + 1;
        let col = upto.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
        (line, col)
    }
}

type PResult<T> = Result<T, ParseError>;

/// Parses a statement list, as found in a function body.
pub fn parse_program(source: &str) -> PResult<Vec<Stmt>> {
    let mut parser = Parser::new(source, 0)?;
    let mut stmts = Vec::new();
    while !parser.at_eof() {
        stmts.push(parser.statement()?);
    }
    Ok(stmts)
}

/// Parses a single expression, optionally followed by `;`.
pub fn parse_expression(source: &str) -> PResult<Expr> {
    let mut parser = Parser::new(source, 0)?;
    let expr = parser.expression()?;
    parser.eat_punct(";");
    parser.expect_eof()?;
    Ok(expr)
}

/// Parses input that is exactly one function expression (classic,
/// `async`, or arrow).
pub fn parse_function(source: &str) -> PResult<Arc<FunctionDef>> {
    match parse_expression(source)? {
        Expr::Function(def) => Ok(def),
        _ => Err(ParseError::new("not a function expression", 0)),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(source: &str, base: usize) -> PResult<Self> {
        Ok(Self {
            tokens: Lexer::new(source, base).tokenize()?,
            pos: 0,
            depth: 0,
        })
    }

    // ── Token helpers ────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, ahead: usize) -> &TokenKind {
        let idx = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek().kind, TokenKind::Punct(q) if q == p)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> PResult<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{p}'")))
        }
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(name) if name == kw)
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.is_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> PResult<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{kw}'")))
        }
    }

    /// A binding name: any identifier that is not a reserved word.
    fn binding_name(&mut self) -> PResult<String> {
        match &self.peek().kind {
            TokenKind::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn expect_eof(&self) -> PResult<()> {
        if self.at_eof() {
            Ok(())
        } else {
            Err(self.unexpected("end of input"))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        let found = match &token.kind {
            TokenKind::Number(n) => format!("number {}", number_to_string(*n)),
            TokenKind::Str(s) => format!("string \"{s}\""),
            TokenKind::Template(_) => "template literal".to_string(),
            TokenKind::Ident(name) => format!("'{name}'"),
            TokenKind::Punct(p) => format!("'{p}'"),
            TokenKind::Eof => "end of input".to_string(),
        };
        ParseError::new(format!("expected {expected}, found {found}"), token.offset)
    }

    fn enter(&mut self) -> PResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ParseError::new("snippet is nested too deeply", self.peek().offset));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Automatic semicolon insertion, simplified: a `;` may be omitted
    /// before `}`, at the end of input, or at a line break.
    fn semicolon(&mut self) -> PResult<()> {
        if self.eat_punct(";") || self.is_punct("}") || self.at_eof() || self.peek().newline_before
        {
            Ok(())
        } else {
            Err(self.unexpected("';'"))
        }
    }

    // ── Statements ───────────────────────────────────────

    fn statement(&mut self) -> PResult<Stmt> {
        self.enter()?;
        let stmt = self.statement_inner();
        self.leave();
        stmt
    }

    fn statement_inner(&mut self) -> PResult<Stmt> {
        if self.is_punct("{") {
            return Ok(Stmt::Block(self.block()?));
        }
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }

        let keyword = match &self.peek().kind {
            TokenKind::Ident(name) => name.clone(),
            _ => String::new(),
        };
        match keyword.as_str() {
            "let" | "const" | "var" => {
                let decl = self.declaration()?;
                self.semicolon()?;
                Ok(decl)
            }
            "function" => Ok(Stmt::Function(self.function_declaration(false)?)),
            "async" if matches!(self.peek_at(1), TokenKind::Ident(n) if n == "function") => {
                self.advance();
                Ok(Stmt::Function(self.function_declaration(true)?))
            }
            "return" => {
                self.advance();
                let value = if self.is_punct(";")
                    || self.is_punct("}")
                    || self.at_eof()
                    || self.peek().newline_before
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.semicolon()?;
                Ok(Stmt::Return(value))
            }
            "if" => self.if_statement(),
            "while" => {
                self.advance();
                let test = self.parenthesized()?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { test, body })
            }
            "do" => {
                self.advance();
                let body = Box::new(self.statement()?);
                self.expect_keyword("while")?;
                let test = self.parenthesized()?;
                self.eat_punct(";");
                Ok(Stmt::DoWhile { body, test })
            }
            "for" => self.for_statement(),
            "break" => {
                self.advance();
                self.semicolon()?;
                Ok(Stmt::Break)
            }
            "continue" => {
                self.advance();
                self.semicolon()?;
                Ok(Stmt::Continue)
            }
            "throw" => {
                self.advance();
                if self.peek().newline_before {
                    return Err(ParseError::new(
                        "line break is not allowed after 'throw'",
                        self.peek().offset,
                    ));
                }
                let value = self.expression()?;
                self.semicolon()?;
                Ok(Stmt::Throw(value))
            }
            "try" => self.try_statement(),
            _ => {
                let expr = self.expression()?;
                self.semicolon()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_punct("{")?;
        let mut stmts = Vec::new();
        while !self.is_punct("}") {
            if self.at_eof() {
                return Err(self.unexpected("'}'"));
            }
            stmts.push(self.statement()?);
        }
        self.advance();
        Ok(stmts)
    }

    fn parenthesized(&mut self) -> PResult<Expr> {
        self.expect_punct("(")?;
        let expr = self.expression()?;
        self.expect_punct(")")?;
        Ok(expr)
    }

    fn decl_kind(&mut self) -> PResult<DeclKind> {
        let kind = match &self.peek().kind {
            TokenKind::Ident(k) if k == "let" => DeclKind::Let,
            TokenKind::Ident(k) if k == "const" => DeclKind::Const,
            TokenKind::Ident(k) if k == "var" => DeclKind::Var,
            _ => return Err(self.unexpected("a declaration")),
        };
        self.advance();
        Ok(kind)
    }

    /// `let a = 1, b` without the trailing semicolon.
    fn declaration(&mut self) -> PResult<Stmt> {
        let kind = self.decl_kind()?;
        let mut bindings = Vec::new();
        loop {
            let offset = self.peek().offset;
            let name = self.binding_name()?;
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            if kind == DeclKind::Const && init.is_none() {
                return Err(ParseError::new(
                    format!("missing initializer in const declaration of '{name}'"),
                    offset,
                ));
            }
            bindings.push((name, init));
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(Stmt::Decl { kind, bindings })
    }

    fn if_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        let test = self.parenthesized()?;
        let consequent = Box::new(self.statement()?);
        let alternate = if self.eat_keyword("else") {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            consequent,
            alternate,
        })
    }

    fn for_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        self.expect_punct("(")?;

        let declares = matches!(self.peek_at(0), TokenKind::Ident(k) if k == "let" || k == "const" || k == "var");
        let iterates = match (self.peek_at(1), self.peek_at(2)) {
            (TokenKind::Ident(_), TokenKind::Ident(word)) => word == "of" || word == "in",
            _ => false,
        };
        if declares && iterates {
            let kind = self.decl_kind()?;
            let name = self.binding_name()?;
            let is_of = self.eat_keyword("of");
            if !is_of {
                self.expect_keyword("in")?;
            }
            let subject = self.expression()?;
            self.expect_punct(")")?;
            let body = Box::new(self.statement()?);
            return Ok(if is_of {
                Stmt::ForOf {
                    kind,
                    name,
                    iterable: subject,
                    body,
                }
            } else {
                Stmt::ForIn {
                    kind,
                    name,
                    object: subject,
                    body,
                }
            });
        }

        let init = if self.is_punct(";") {
            None
        } else if declares {
            Some(Box::new(self.declaration()?))
        } else {
            Some(Box::new(Stmt::Expr(self.expression()?)))
        };
        self.expect_punct(";")?;
        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn try_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        let block = self.block()?;
        let mut param = None;
        let mut handler = None;
        if self.eat_keyword("catch") {
            if self.eat_punct("(") {
                param = Some(self.binding_name()?);
                self.expect_punct(")")?;
            }
            handler = Some(self.block()?);
        }
        let finalizer = if self.eat_keyword("finally") {
            Some(self.block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.unexpected("'catch' or 'finally'"));
        }
        Ok(Stmt::Try {
            block,
            param,
            handler,
            finalizer,
        })
    }

    fn function_declaration(&mut self, is_async: bool) -> PResult<Arc<FunctionDef>> {
        self.expect_keyword("function")?;
        let name = self.binding_name()?;
        self.function_rest(Some(name), is_async)
    }

    /// Parameter list and braced body, shared by every function form.
    fn function_rest(&mut self, name: Option<String>, is_async: bool) -> PResult<Arc<FunctionDef>> {
        let params = self.params()?;
        let body = FunctionBody::Block(self.block()?);
        Ok(Arc::new(FunctionDef {
            name,
            params,
            body,
            is_async,
        }))
    }

    fn params(&mut self) -> PResult<Vec<Param>> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.is_punct(")") {
            let rest = self.eat_punct("...");
            let name = self.binding_name()?;
            let default = if !rest && self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            params.push(Param {
                name,
                default,
                rest,
            });
            if rest || !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(params)
    }

    // ── Expressions ──────────────────────────────────────

    fn expression(&mut self) -> PResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> PResult<Expr> {
        self.enter()?;
        let expr = self.assignment_inner();
        self.leave();
        expr
    }

    fn assignment_inner(&mut self) -> PResult<Expr> {
        if let Some(arrow) = self.arrow_function()? {
            return Ok(arrow);
        }

        let offset = self.peek().offset;
        let target = self.conditional()?;
        let op = match self.peek().kind {
            TokenKind::Punct("=") => AssignOp::Assign,
            TokenKind::Punct("+=") => AssignOp::Add,
            TokenKind::Punct("-=") => AssignOp::Sub,
            TokenKind::Punct("*=") => AssignOp::Mul,
            TokenKind::Punct("/=") => AssignOp::Div,
            TokenKind::Punct("%=") => AssignOp::Rem,
            TokenKind::Punct("**=") => AssignOp::Pow,
            _ => return Ok(target),
        };
        check_target(&target, offset)?;
        self.advance();
        let value = self.assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    /// Parses an arrow function if one starts here; leaves the position
    /// untouched otherwise.
    fn arrow_function(&mut self) -> PResult<Option<Expr>> {
        let mut ahead = 0;
        let is_async = matches!(self.peek_at(0), TokenKind::Ident(k) if k == "async")
            && matches!(self.peek_at(1), TokenKind::Ident(_) | TokenKind::Punct("("));
        if is_async {
            ahead = 1;
        }

        let single = matches!(self.peek_at(ahead), TokenKind::Ident(n) if !RESERVED.contains(&n.as_str()))
            && matches!(self.peek_at(ahead + 1), TokenKind::Punct("=>"));
        let parenthesized = matches!(self.peek_at(ahead), TokenKind::Punct("("))
            && self
                .matching_paren(self.pos + ahead)
                .is_some_and(|close| {
                    matches!(self.tokens.get(close + 1).map(|t| &t.kind), Some(TokenKind::Punct("=>")))
                });
        if !single && !parenthesized {
            return Ok(None);
        }

        if is_async {
            self.advance();
        }
        let params = if single {
            vec![Param {
                name: self.binding_name()?,
                default: None,
                rest: false,
            }]
        } else {
            self.params()?
        };
        self.expect_punct("=>")?;
        let body = if self.is_punct("{") {
            FunctionBody::Block(self.block()?)
        } else {
            FunctionBody::Expr(Box::new(self.assignment()?))
        };
        Ok(Some(Expr::Function(Arc::new(FunctionDef {
            name: None,
            params,
            body,
            is_async,
        }))))
    }

    /// Index of the `)` matching the `(` at `open`.
    fn matching_paren(&self, open: usize) -> Option<usize> {
        let mut depth = 0usize;
        for (i, token) in self.tokens.iter().enumerate().skip(open) {
            match token.kind {
                TokenKind::Punct("(") | TokenKind::Punct("[") | TokenKind::Punct("{") => depth += 1,
                TokenKind::Punct(")") | TokenKind::Punct("]") | TokenKind::Punct("}") => {
                    depth = depth.checked_sub(1)?;
                    if depth == 0 {
                        return matches!(token.kind, TokenKind::Punct(")")).then_some(i);
                    }
                }
                TokenKind::Eof => return None,
                _ => {}
            }
        }
        None
    }

    fn conditional(&mut self) -> PResult<Expr> {
        let test = self.binary(1)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.assignment()?;
        self.expect_punct(":")?;
        let alternate = self.assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    /// Precedence climbing over the binary and logical operators.
    fn binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut left = self.unary()?;
        while let Some((prec, op)) = self.binary_operator() {
            if prec < min_prec {
                break;
            }
            self.advance();
            let right_assoc = matches!(op, Operator::Binary(BinaryOp::Pow));
            let right = self.binary(if right_assoc { prec } else { prec + 1 })?;
            left = match op {
                Operator::Binary(op) => Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                Operator::Logical(op) => Expr::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
        }
        Ok(left)
    }

    fn binary_operator(&self) -> Option<(u8, Operator)> {
        use Operator::{Binary, Logical};
        let entry = match &self.peek().kind {
            TokenKind::Punct(p) => match *p {
                "??" => (1, Logical(LogicalOp::Nullish)),
                "||" => (1, Logical(LogicalOp::Or)),
                "&&" => (2, Logical(LogicalOp::And)),
                "==" => (3, Binary(BinaryOp::Eq)),
                "!=" => (3, Binary(BinaryOp::NotEq)),
                "===" => (3, Binary(BinaryOp::StrictEq)),
                "!==" => (3, Binary(BinaryOp::StrictNotEq)),
                "<" => (4, Binary(BinaryOp::Lt)),
                "<=" => (4, Binary(BinaryOp::LtEq)),
                ">" => (4, Binary(BinaryOp::Gt)),
                ">=" => (4, Binary(BinaryOp::GtEq)),
                "+" => (5, Binary(BinaryOp::Add)),
                "-" => (5, Binary(BinaryOp::Sub)),
                "*" => (6, Binary(BinaryOp::Mul)),
                "/" => (6, Binary(BinaryOp::Div)),
                "%" => (6, Binary(BinaryOp::Rem)),
                "**" => (7, Binary(BinaryOp::Pow)),
                _ => return None,
            },
            TokenKind::Ident(kw) if kw == "in" => (4, Binary(BinaryOp::In)),
            _ => return None,
        };
        Some(entry)
    }

    fn unary(&mut self) -> PResult<Expr> {
        self.enter()?;
        let expr = self.unary_inner();
        self.leave();
        expr
    }

    fn unary_inner(&mut self) -> PResult<Expr> {
        let op = match &self.peek().kind {
            TokenKind::Punct("!") => Some(UnaryOp::Not),
            TokenKind::Punct("-") => Some(UnaryOp::Neg),
            TokenKind::Punct("+") => Some(UnaryOp::Plus),
            TokenKind::Ident(k) if k == "typeof" => Some(UnaryOp::TypeOf),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let expr = self.unary()?;
            return Ok(Expr::Unary {
                op,
                expr: Box::new(expr),
            });
        }

        if self.eat_keyword("await") {
            return Ok(Expr::Await(Box::new(self.unary()?)));
        }

        let update = match self.peek().kind {
            TokenKind::Punct("++") => Some(UpdateOp::Increment),
            TokenKind::Punct("--") => Some(UpdateOp::Decrement),
            _ => None,
        };
        if let Some(op) = update {
            self.advance();
            let offset = self.peek().offset;
            let target = self.unary()?;
            check_target(&target, offset)?;
            return Ok(Expr::Update {
                op,
                prefix: true,
                target: Box::new(target),
            });
        }

        self.postfix()
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let offset = self.peek().offset;
        let expr = self.call_member()?;
        if self.peek().newline_before {
            return Ok(expr);
        }
        let op = match self.peek().kind {
            TokenKind::Punct("++") => UpdateOp::Increment,
            TokenKind::Punct("--") => UpdateOp::Decrement,
            _ => return Ok(expr),
        };
        check_target(&expr, offset)?;
        self.advance();
        Ok(Expr::Update {
            op,
            prefix: false,
            target: Box::new(expr),
        })
    }

    fn call_member(&mut self) -> PResult<Expr> {
        let mut expr = if self.is_keyword("new") {
            self.new_expression()?
        } else {
            self.primary()?
        };

        loop {
            if self.eat_punct(".") {
                let name = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    key: Key::Named(name),
                    optional: false,
                };
            } else if self.eat_punct("?.") {
                if self.is_punct("(") {
                    let args = self.arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: true,
                    };
                } else if self.eat_punct("[") {
                    let key = self.expression()?;
                    self.expect_punct("]")?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        key: Key::Computed(Box::new(key)),
                        optional: true,
                    };
                } else {
                    let name = self.property_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        key: Key::Named(name),
                        optional: true,
                    };
                }
            } else if self.eat_punct("[") {
                let key = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    key: Key::Computed(Box::new(key)),
                    optional: false,
                };
            } else if self.is_punct("(") {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    optional: false,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// `new Callee.path(args)`; the argument list is optional.
    fn new_expression(&mut self) -> PResult<Expr> {
        self.advance();
        let mut callee = self.primary()?;
        while self.eat_punct(".") {
            let name = self.property_name()?;
            callee = Expr::Member {
                object: Box::new(callee),
                key: Key::Named(name),
                optional: false,
            };
        }
        let args = if self.is_punct("(") {
            self.arguments()?
        } else {
            Vec::new()
        };
        Ok(Expr::New {
            callee: Box::new(callee),
            args,
        })
    }

    /// After `.`, keywords are valid property names.
    fn property_name(&mut self) -> PResult<String> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("a property name")),
        }
    }

    fn arguments(&mut self) -> PResult<Vec<Element>> {
        self.expect_punct("(")?;
        let args = self.elements(")")?;
        Ok(args)
    }

    /// Comma-separated items with optional spread, up to and including
    /// `close`. A trailing comma is allowed.
    fn elements(&mut self, close: &str) -> PResult<Vec<Element>> {
        let mut items = Vec::new();
        while !self.is_punct(close) {
            if self.eat_punct("...") {
                items.push(Element::Spread(self.assignment()?));
            } else {
                items.push(Element::Item(self.assignment()?));
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(close)?;
        Ok(items)
    }

    fn primary(&mut self) -> PResult<Expr> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::Template(chunks) => {
                self.advance();
                template(chunks)
            }
            TokenKind::Punct("(") => {
                self.advance();
                let expr = self.expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            TokenKind::Punct("[") => {
                self.advance();
                Ok(Expr::Array(self.elements("]")?))
            }
            TokenKind::Punct("{") => self.object_literal(),
            TokenKind::Ident(name) => match name.as_str() {
                "true" => {
                    self.advance();
                    Ok(Expr::Bool(true))
                }
                "false" => {
                    self.advance();
                    Ok(Expr::Bool(false))
                }
                "null" => {
                    self.advance();
                    Ok(Expr::Null)
                }
                "undefined" => {
                    self.advance();
                    Ok(Expr::Undefined)
                }
                "function" => {
                    self.advance();
                    self.function_expression(false)
                }
                "async" if matches!(self.peek_at(1), TokenKind::Ident(n) if n == "function") => {
                    self.advance();
                    self.advance();
                    self.function_expression(true)
                }
                reserved if RESERVED.contains(&reserved) => {
                    Err(self.unexpected("an expression"))
                }
                _ => {
                    self.advance();
                    Ok(Expr::Ident(name))
                }
            },
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// `function` keyword already consumed; the name is optional.
    fn function_expression(&mut self, is_async: bool) -> PResult<Expr> {
        let name = if matches!(self.peek().kind, TokenKind::Ident(_)) {
            Some(self.binding_name()?)
        } else {
            None
        };
        Ok(Expr::Function(self.function_rest(name, is_async)?))
    }

    fn object_literal(&mut self) -> PResult<Expr> {
        self.expect_punct("{")?;
        let mut props = Vec::new();
        while !self.is_punct("}") {
            if self.eat_punct("...") {
                props.push(Property::Spread(self.assignment()?));
            } else if self.eat_punct("[") {
                let key = self.assignment()?;
                self.expect_punct("]")?;
                self.expect_punct(":")?;
                props.push(Property::Computed(key, self.assignment()?));
            } else {
                let token = self.advance();
                let (key, shorthand_ok) = match token.kind {
                    TokenKind::Ident(name) => {
                        let ok = !RESERVED.contains(&name.as_str());
                        (name, ok)
                    }
                    TokenKind::Str(s) => (s, false),
                    TokenKind::Number(n) => (number_to_string(n), false),
                    _ => {
                        return Err(ParseError::new(
                            "expected a property name in object literal",
                            token.offset,
                        ))
                    }
                };
                if self.eat_punct(":") {
                    props.push(Property::Named(key, self.assignment()?));
                } else if self.is_punct("(") {
                    let method = self.function_rest(Some(key.clone()), false)?;
                    props.push(Property::Named(key, Expr::Function(method)));
                } else if shorthand_ok {
                    props.push(Property::Named(key.clone(), Expr::Ident(key)));
                } else {
                    return Err(self.unexpected("':'"));
                }
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("}")?;
        Ok(Expr::Object(props))
    }
}

enum Operator {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn check_target(target: &Expr, offset: usize) -> PResult<()> {
    match target {
        Expr::Ident(_) | Expr::Member { optional: false, .. } => Ok(()),
        _ => Err(ParseError::new("invalid assignment target", offset)),
    }
}

fn template(chunks: Vec<TemplateChunk>) -> PResult<Expr> {
    let mut parts = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match chunk {
            TemplateChunk::Text(text) => parts.push(TemplatePart::Text(text)),
            TemplateChunk::Interpolation { source, offset } => {
                let mut parser = Parser::new(&source, offset)?;
                let expr = parser.expression()?;
                parser.expect_eof()?;
                parts.push(TemplatePart::Expr(expr));
            }
        }
    }
    Ok(Expr::Template(parts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Add,
                left: Box::new(Expr::Number(1.0)),
                right: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    left: Box::new(Expr::Number(2.0)),
                    right: Box::new(Expr::Number(3.0)),
                }),
            }
        );
    }

    #[test]
    fn test_power_is_right_associative() {
        let expr = parse_expression("2 ** 3 ** 2").unwrap();
        assert!(matches!(
            expr,
            Expr::Binary { op: BinaryOp::Pow, ref right, .. }
                if matches!(**right, Expr::Binary { op: BinaryOp::Pow, .. })
        ));
    }

    #[test]
    fn test_arrow_forms() {
        for source in ["(args) => args.x * 2", "args => args.x", "async (a, b) => { return a }"] {
            assert!(parse_function(source).is_ok(), "{source}");
        }
    }

    #[test]
    fn test_function_forms() {
        assert!(parse_function("function (args) { return args.x; }").is_ok());
        assert!(parse_function("async function run(args) { return 1 }").is_ok());
        let def = parse_function("function named(a = 1, ...rest) {}").unwrap();
        assert_eq!(def.name.as_deref(), Some("named"));
        assert!(def.params[1].rest);
    }

    #[test]
    fn test_called_function_is_not_a_literal() {
        assert!(parse_function("(function () { return 1 })()").is_err());
        assert!(parse_function("args.x + 1").is_err());
    }

    #[test]
    fn test_parenthesized_expression_is_not_arrow() {
        let expr = parse_expression("(args.x + 1) * 2").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_object_literal_forms() {
        let expr = parse_expression("{ ok: true, 'a b': 1, 2: 'two', x, ...rest, [k]: v, m(a) { return a } }").unwrap();
        let Expr::Object(props) = expr else {
            panic!("expected object");
        };
        assert_eq!(props.len(), 7);
        assert_eq!(props[2], Property::Named("2".into(), Expr::Str("two".into())));
        assert_eq!(props[3], Property::Named("x".into(), Expr::Ident("x".into())));
    }

    #[test]
    fn test_program_with_asi() {
        let stmts = parse_program("let a = 1\nlet b = a + 1\nreturn b").unwrap();
        assert_eq!(stmts.len(), 3);
        assert!(contains_return(&stmts));
    }

    #[test]
    fn test_return_inside_nested_function_does_not_count() {
        let stmts = parse_program("const f = () => { return 1 }; f()").unwrap();
        assert!(!contains_return(&stmts));
        let stmts = parse_program("if (args.x) { return 1 } else { return 2 }").unwrap();
        assert!(contains_return(&stmts));
    }

    #[test]
    fn test_braces_open_a_block_at_statement_start() {
        // `{ ok: true }` is not a valid statement list...
        assert!(parse_program("{ ok: true, n: 1 }").is_err());
        // ...but it is an object expression
        assert!(matches!(
            parse_expression("{ ok: true, n: 1 }").unwrap(),
            Expr::Object(_)
        ));
    }

    #[test]
    fn test_loops_parse() {
        let source = "
            let total = 0;
            for (let i = 0; i < 3; i++) { total += i }
            for (const v of args.list) total += v;
            for (const k in args) continue;
            while (false) {}
            do { total-- } while (total > 100)
            return total;
        ";
        let stmts = parse_program(source).unwrap();
        assert_eq!(stmts.len(), 7);
    }

    #[test]
    fn test_try_requires_handler() {
        assert!(parse_program("try { x() } catch (e) { return e }").is_ok());
        assert!(parse_program("try { x() } finally { }").is_ok());
        assert!(parse_program("try { x() }").is_err());
    }

    #[test]
    fn test_template_interpolation() {
        let expr = parse_expression("`n=${args.n + 1}`").unwrap();
        let Expr::Template(parts) = expr else {
            panic!("expected template");
        };
        assert_eq!(parts[0], TemplatePart::Text("n=".into()));
        assert!(matches!(parts[1], TemplatePart::Expr(Expr::Binary { .. })));
    }

    #[test]
    fn test_invalid_assignment_target() {
        assert!(parse_expression("1 = 2").is_err());
        assert!(parse_expression("a?.b = 2").is_err());
        assert!(parse_expression("a.b = 2").is_ok());
    }

    #[test]
    fn test_const_requires_initializer() {
        let err = parse_program("const x;").unwrap_err();
        assert!(err.message.contains("const"));
    }

    #[test]
    fn test_error_position() {
        let source = "let a = 1;\nlet = 2;";
        let err = parse_program(source).unwrap_err();
        assert_eq!(err.position(source), (2, 5));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let source = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        let err = parse_expression(&source).unwrap_err();
        assert!(err.message.contains("nested too deeply"));
    }

    #[test]
    fn test_trailing_garbage_is_rejected() {
        assert!(parse_expression("args.x args.y").is_err());
    }
}
