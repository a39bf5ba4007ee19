//! Recursive-descent parser producing [`Stmt`] lists.

use super::ast::{BinOp, BoolOp, CmpOp, Expr, Stmt, StmtKind, UnaryOp};
use super::lexer::{tokenize, Tok, Token};
use crate::errors::{Result, SandboxError};

/// Combined expression and block nesting limit.
const MAX_DEPTH: usize = 64;

const RESERVED: &[&str] = &[
    "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif",
    "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is", "lambda",
    "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

const UNSUPPORTED_STATEMENTS: &[&str] = &[
    "def", "class", "return", "try", "except", "finally", "with", "global", "nonlocal", "yield",
    "raise", "async", "await",
];

pub fn parse(source: &str) -> Result<Vec<Stmt>> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    parser.program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn peek_next(&self) -> &Tok {
        self.tokens
            .get(self.pos + 1)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<()> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn error(&self, message: impl Into<String>) -> SandboxError {
        SandboxError::syntax(message, self.line())
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("too many nested expressions or blocks"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn identifier(&mut self) -> Result<String> {
        match self.advance() {
            Tok::Name(n) if !RESERVED.contains(&n.as_str()) => Ok(n),
            _ => Err(self.error("expected a name")),
        }
    }

    // ------------------------------------------------------------------
    // statements
    // ------------------------------------------------------------------

    fn program(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            while self.eat(&Tok::Newline) {}
            if self.at(&Tok::Eof) {
                break;
            }
            if self.at(&Tok::Indent) {
                return Err(self.error("unexpected indent"));
            }
            stmts.extend(self.statement()?);
        }
        Ok(stmts)
    }

    fn statement(&mut self) -> Result<Vec<Stmt>> {
        if self.at_keyword("if") {
            return Ok(vec![self.if_statement()?]);
        }
        if self.at_keyword("for") {
            return Ok(vec![self.for_statement()?]);
        }
        if self.at_keyword("while") {
            let line = self.line();
            self.advance();
            let test = self.expr()?;
            let body = self.block()?;
            return Ok(vec![Stmt {
                kind: StmtKind::While { test, body },
                line,
            }]);
        }
        self.simple_line()
    }

    /// One physical line of `;`-separated simple statements.
    fn simple_line(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = vec![self.simple_statement()?];
        while self.eat(&Tok::Semicolon) {
            if self.at(&Tok::Newline) || self.at(&Tok::Eof) {
                break;
            }
            stmts.push(self.simple_statement()?);
        }
        if !self.eat(&Tok::Newline) && !self.at(&Tok::Eof) && !self.at(&Tok::Dedent) {
            return Err(self.error("invalid syntax"));
        }
        Ok(stmts)
    }

    fn simple_statement(&mut self) -> Result<Stmt> {
        let line = self.line();
        let keyword = match self.peek() {
            Tok::Name(n) => Some(n.clone()),
            _ => None,
        };
        let kind = match keyword.as_deref() {
            Some("pass") => {
                self.advance();
                StmtKind::Pass
            }
            Some("break") => {
                self.advance();
                StmtKind::Break
            }
            Some("continue") => {
                self.advance();
                StmtKind::Continue
            }
            Some("del") => {
                self.advance();
                StmtKind::Delete(self.postfix()?)
            }
            Some("assert") => {
                self.advance();
                let test = self.expr()?;
                let msg = if self.eat(&Tok::Comma) {
                    Some(self.expr()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            Some("import") => {
                self.advance();
                let module = self.dotted_name()?;
                self.skip_import_tail();
                StmtKind::Import { module }
            }
            Some("from") => {
                self.advance();
                let module = self.dotted_name()?;
                self.skip_import_tail();
                StmtKind::Import { module }
            }
            Some(kw) if UNSUPPORTED_STATEMENTS.contains(&kw) => {
                return Err(self.error(format!("'{}' statements are not supported", kw)));
            }
            _ => self.expression_statement()?,
        };
        Ok(Stmt { kind, line })
    }

    fn dotted_name(&mut self) -> Result<String> {
        let mut name = match self.advance() {
            Tok::Name(n) => n,
            _ => return Err(self.error("expected a module name")),
        };
        while self.eat(&Tok::Dot) {
            match self.advance() {
                Tok::Name(n) => {
                    name.push('.');
                    name.push_str(&n);
                }
                _ => return Err(self.error("expected a module name")),
            }
        }
        Ok(name)
    }

    fn skip_import_tail(&mut self) {
        while !matches!(self.peek(), Tok::Newline | Tok::Semicolon | Tok::Eof) {
            self.advance();
        }
    }

    fn expression_statement(&mut self) -> Result<StmtKind> {
        let first = self.expr_list()?;
        let aug = match self.peek() {
            Tok::PlusAssign => Some(BinOp::Add),
            Tok::MinusAssign => Some(BinOp::Sub),
            Tok::StarAssign => Some(BinOp::Mul),
            Tok::SlashAssign => Some(BinOp::Div),
            _ => None,
        };
        if let Some(op) = aug {
            self.advance();
            self.check_target(&first, false)?;
            let value = self.expr_list()?;
            return Ok(StmtKind::AugAssign {
                target: first,
                op,
                value,
            });
        }
        if self.eat(&Tok::Assign) {
            self.check_target(&first, true)?;
            let value = self.expr_list()?;
            if self.at(&Tok::Assign) {
                return Err(self.error("chained assignment is not supported"));
            }
            return Ok(StmtKind::Assign {
                target: first,
                value,
            });
        }
        Ok(StmtKind::Expr(first))
    }

    fn check_target(&self, target: &Expr, allow_tuple: bool) -> Result<()> {
        match target {
            Expr::Name(_) | Expr::Subscript { .. } | Expr::Attribute { .. } => Ok(()),
            Expr::Tuple(items) if allow_tuple => {
                if items.iter().all(|e| matches!(e, Expr::Name(_))) {
                    Ok(())
                } else {
                    Err(self.error("cannot unpack into this expression"))
                }
            }
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    fn if_statement(&mut self) -> Result<Stmt> {
        let line = self.line();
        // consumes `if` or `elif`
        self.advance();
        let test = self.expr()?;
        let body = self.block()?;
        let orelse = if self.at_keyword("elif") {
            vec![self.if_statement()?]
        } else if self.eat_keyword("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::If { test, body, orelse },
            line,
        })
    }

    fn for_statement(&mut self) -> Result<Stmt> {
        let line = self.line();
        self.advance();
        let mut targets = vec![self.identifier()?];
        while self.eat(&Tok::Comma) {
            targets.push(self.identifier()?);
        }
        if !self.eat_keyword("in") {
            return Err(self.error("expected 'in'"));
        }
        let iter = self.expr_list()?;
        let body = self.block()?;
        Ok(Stmt {
            kind: StmtKind::For {
                targets,
                iter,
                body,
            },
            line,
        })
    }

    fn block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&Tok::Colon, "':'")?;
        self.enter()?;
        let stmts = if self.eat(&Tok::Newline) {
            if !self.eat(&Tok::Indent) {
                return Err(self.error("expected an indented block"));
            }
            let mut stmts = Vec::new();
            loop {
                while self.eat(&Tok::Newline) {}
                if self.eat(&Tok::Dedent) || self.at(&Tok::Eof) {
                    break;
                }
                stmts.extend(self.statement()?);
            }
            stmts
        } else {
            self.simple_line()?
        };
        self.leave();
        Ok(stmts)
    }

    // ------------------------------------------------------------------
    // expressions
    // ------------------------------------------------------------------

    /// `a, b` without brackets becomes a tuple.
    fn expr_list(&mut self) -> Result<Expr> {
        let first = self.expr()?;
        if !self.at(&Tok::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Tok::Comma) {
            if self.ends_expr_list() {
                break;
            }
            items.push(self.expr()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn ends_expr_list(&self) -> bool {
        matches!(
            self.peek(),
            Tok::Newline
                | Tok::Eof
                | Tok::Assign
                | Tok::RParen
                | Tok::RBracket
                | Tok::Colon
                | Tok::Semicolon
        )
    }

    fn expr(&mut self) -> Result<Expr> {
        self.enter()?;
        if self.at_keyword("lambda") {
            return Err(self.error("lambda expressions are not supported"));
        }
        let body = self.or_test()?;
        let result = if self.eat_keyword("if") {
            let test = self.or_test()?;
            if !self.eat_keyword("else") {
                return Err(self.error("expected 'else' in conditional expression"));
            }
            let orelse = self.expr()?;
            Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            }
        } else {
            body
        };
        self.leave();
        Ok(result)
    }

    fn or_test(&mut self) -> Result<Expr> {
        let mut left = self.and_test()?;
        while self.eat_keyword("or") {
            let right = self.and_test()?;
            left = Expr::BoolOp {
                op: BoolOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr> {
        let mut left = self.not_test()?;
        while self.eat_keyword("and") {
            let right = self.not_test()?;
            left = Expr::BoolOp {
                op: BoolOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr> {
        if self.eat_keyword("not") {
            self.enter()?;
            let operand = self.not_test()?;
            self.leave();
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.bit_or()?;
        let mut ops = Vec::new();
        loop {
            let (op, width) = match (self.peek(), self.peek_next()) {
                (Tok::Eq, _) => (CmpOp::Eq, 1),
                (Tok::Ne, _) => (CmpOp::Ne, 1),
                (Tok::Lt, _) => (CmpOp::Lt, 1),
                (Tok::Le, _) => (CmpOp::Le, 1),
                (Tok::Gt, _) => (CmpOp::Gt, 1),
                (Tok::Ge, _) => (CmpOp::Ge, 1),
                (Tok::Name(a), Tok::Name(b)) if a == "not" && b == "in" => (CmpOp::NotIn, 2),
                (Tok::Name(a), Tok::Name(b)) if a == "is" && b == "not" => (CmpOp::IsNot, 2),
                (Tok::Name(a), _) if a == "in" => (CmpOp::In, 1),
                (Tok::Name(a), _) if a == "is" => (CmpOp::Is, 1),
                _ => break,
            };
            self.pos += width;
            ops.push((op, self.bit_or()?));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                ops,
            })
        }
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr>,
        table: &[(Tok, BinOp)],
    ) -> Result<Expr> {
        let mut left = next(self)?;
        'outer: loop {
            for (tok, op) in table {
                if self.at(tok) {
                    self.advance();
                    let right = next(self)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn bit_or(&mut self) -> Result<Expr> {
        self.binary_level(Self::bit_xor, &[(Tok::Pipe, BinOp::BitOr)])
    }

    fn bit_xor(&mut self) -> Result<Expr> {
        self.binary_level(Self::bit_and, &[(Tok::Caret, BinOp::BitXor)])
    }

    fn bit_and(&mut self) -> Result<Expr> {
        self.binary_level(Self::arith, &[(Tok::Amp, BinOp::BitAnd)])
    }

    fn arith(&mut self) -> Result<Expr> {
        self.binary_level(
            Self::term,
            &[(Tok::Plus, BinOp::Add), (Tok::Minus, BinOp::Sub)],
        )
    }

    fn term(&mut self) -> Result<Expr> {
        self.binary_level(
            Self::factor,
            &[
                (Tok::Star, BinOp::Mul),
                (Tok::Slash, BinOp::Div),
                (Tok::DoubleSlash, BinOp::FloorDiv),
                (Tok::Percent, BinOp::Mod),
            ],
        )
    }

    fn factor(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Tok::Minus => Some(UnaryOp::Neg),
            Tok::Plus => Some(UnaryOp::Pos),
            Tok::Tilde => Some(UnaryOp::Invert),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            self.enter()?;
            let operand = self.factor()?;
            self.leave();
            // fold negative literals so `-1` stays a constant
            return Ok(match (op, operand) {
                (UnaryOp::Neg, Expr::Int(v)) => Expr::Int(v.wrapping_neg()),
                (UnaryOp::Neg, Expr::Float(v)) => Expr::Float(-v),
                (op, operand) => Expr::Unary {
                    op,
                    operand: Box::new(operand),
                },
            });
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr> {
        let base = self.postfix()?;
        if self.eat(&Tok::DoubleStar) {
            self.enter()?;
            let exponent = self.factor()?;
            self.leave();
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.atom()?;
        loop {
            match self.peek() {
                Tok::LParen => {
                    self.advance();
                    let (args, kwargs) = self.call_args()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                    };
                }
                Tok::LBracket => {
                    self.advance();
                    let index = self.subscript()?;
                    self.expect(&Tok::RBracket, "']'")?;
                    expr = Expr::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                Tok::Dot => {
                    self.advance();
                    let attr = match self.advance() {
                        Tok::Name(n) => n,
                        _ => return Err(self.error("expected an attribute name")),
                    };
                    expr = Expr::Attribute {
                        value: Box::new(expr),
                        attr,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn subscript(&mut self) -> Result<Expr> {
        if self.at(&Tok::Colon) {
            return Err(self.error("slices are not supported"));
        }
        let index = self.expr_list()?;
        if self.at(&Tok::Colon) {
            return Err(self.error("slices are not supported"));
        }
        Ok(index)
    }

    fn call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        loop {
            if self.eat(&Tok::RParen) {
                break;
            }
            if self.at(&Tok::Star) || self.at(&Tok::DoubleStar) {
                return Err(self.error("argument unpacking is not supported"));
            }
            let is_keyword = matches!(self.peek(), Tok::Name(_)) && *self.peek_next() == Tok::Assign;
            if is_keyword {
                let name = self.identifier()?;
                self.advance();
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.error(format!("keyword argument repeated: {}", name)));
                }
                kwargs.push((name, self.expr()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                args.push(self.expr()?);
            }
            if !self.eat(&Tok::Comma) {
                self.expect(&Tok::RParen, "')'")?;
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn atom(&mut self) -> Result<Expr> {
        let line = self.line();
        match self.advance() {
            Tok::Int(v) => Ok(Expr::Int(v)),
            Tok::Float(v) => Ok(Expr::Float(v)),
            Tok::Str(s) => {
                let mut s = s;
                while let Tok::Str(next) = self.peek() {
                    s.push_str(next);
                    self.advance();
                }
                Ok(Expr::Str(s))
            }
            Tok::Name(n) => {
                if n == "True" {
                    Ok(Expr::Bool(true))
                } else if n == "False" {
                    Ok(Expr::Bool(false))
                } else if n == "None" {
                    Ok(Expr::None)
                } else if n == "lambda" {
                    Err(SandboxError::syntax(
                        "lambda expressions are not supported",
                        line,
                    ))
                } else if RESERVED.contains(&n.as_str()) {
                    Err(SandboxError::syntax("invalid syntax", line))
                } else {
                    Ok(Expr::Name(n))
                }
            }
            Tok::LParen => {
                if self.eat(&Tok::RParen) {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                self.enter()?;
                let inner = self.expr_list()?;
                self.leave();
                self.expect(&Tok::RParen, "')'")?;
                Ok(inner)
            }
            Tok::LBracket => {
                let mut items = Vec::new();
                while !self.eat(&Tok::RBracket) {
                    items.push(self.expr()?);
                    if self.at_keyword("for") {
                        return Err(self.error("comprehensions are not supported"));
                    }
                    if !self.eat(&Tok::Comma) {
                        self.expect(&Tok::RBracket, "']'")?;
                        break;
                    }
                }
                Ok(Expr::List(items))
            }
            Tok::LBrace => {
                let mut items = Vec::new();
                while !self.eat(&Tok::RBrace) {
                    let key = self.expr()?;
                    if self.at(&Tok::Comma) || self.at(&Tok::RBrace) {
                        return Err(self.error("set literals are not supported"));
                    }
                    self.expect(&Tok::Colon, "':'")?;
                    let value = self.expr()?;
                    items.push((key, value));
                    if !self.eat(&Tok::Comma) {
                        self.expect(&Tok::RBrace, "'}'")?;
                        break;
                    }
                }
                Ok(Expr::Dict(items))
            }
            _ => Err(SandboxError::syntax("invalid syntax", line)),
        }
    }
}
