use super::ast::*;
use super::error::ParseError;
use super::lexer::{self, SpannedToken, Token};

type PResult<T> = Result<T, ParseError>;

/// Parse a module: simple statements separated by newlines or `;`.
pub fn parse_module(tokens: Vec<SpannedToken>) -> Result<Module, Vec<ParseError>> {
    let mut parser = Parser::new(tokens);
    parser.parse_module()
}

/// Parse a single expression (tuples without parentheses allowed).
pub fn parse_expression(tokens: Vec<SpannedToken>) -> Result<Expr, Vec<ParseError>> {
    let mut parser = Parser::new(tokens);
    parser.parse_expression().map_err(|e| vec![e])
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    errors: Vec<ParseError>,
}

impl Parser {
    fn new(tokens: Vec<SpannedToken>) -> Self {
        Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
        }
    }

    fn parse_module(&mut self) -> Result<Module, Vec<ParseError>> {
        let mut body = Vec::new();
        loop {
            while self.eat(&Token::Newline) {}
            if self.at_eof() {
                break;
            }
            match self.parse_simple_line() {
                Ok(stmts) => body.extend(stmts),
                Err(e) => {
                    self.errors.push(e);
                    self.recover_to_newline();
                }
            }
        }

        if self.errors.is_empty() {
            Ok(Module { body })
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }

    fn parse_expression(&mut self) -> PResult<Expr> {
        if matches!(self.peek(), Token::Newline | Token::Eof) {
            return Err(ParseError::parser("empty expression", self.span()));
        }
        let expr = self.parse_testlist_star()?;
        if matches!(expr.kind, ExprKind::Starred { .. }) {
            return Err(ParseError::parser(
                "can't use starred expression here",
                expr.span,
            ));
        }
        self.eat(&Token::Newline);
        if !self.at_eof() {
            return Err(self.unexpected());
        }
        Ok(expr)
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).map_or(&Token::Eof, |t| &t.token)
    }

    fn peek_at(&self, n: usize) -> &Token {
        self.tokens.get(self.pos + n).map_or(&Token::Eof, |t| &t.token)
    }

    fn span(&self) -> Span {
        self.tokens.get(self.pos).map_or(Span::new(0, 0), |t| t.span)
    }

    fn prev_span(&self) -> Span {
        self.tokens
            .get(self.pos.saturating_sub(1))
            .map_or(Span::new(0, 0), |t| t.span)
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn at_stmt_end(&self) -> bool {
        matches!(self.peek(), Token::Newline | Token::Semicolon | Token::Eof)
    }

    fn advance(&mut self) -> Span {
        let span = self.span();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        span
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> PResult<Span> {
        if self.peek() == expected {
            Ok(self.advance())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_name(&mut self) -> PResult<(String, Span)> {
        if let Token::Name(name) = self.peek().clone() {
            let sp = self.advance();
            Ok((name, sp))
        } else {
            Err(self.unexpected())
        }
    }

    fn unexpected(&self) -> ParseError {
        ParseError::parser(
            format!("invalid syntax: unexpected {}", describe(self.peek())),
            self.span(),
        )
    }

    fn recover_to_newline(&mut self) {
        while !matches!(self.peek(), Token::Newline | Token::Eof) {
            self.advance();
        }
        self.eat(&Token::Newline);
    }

    fn can_start_expr(&self) -> bool {
        matches!(
            self.peek(),
            Token::Name(_)
                | Token::Int(_)
                | Token::Float(_)
                | Token::Imag(_)
                | Token::Str(_)
                | Token::Bytes(_)
                | Token::FStr { .. }
                | Token::None
                | Token::True
                | Token::False
                | Token::Not
                | Token::Lambda
                | Token::Await
                | Token::LParen
                | Token::LBracket
                | Token::LBrace
                | Token::Minus
                | Token::Plus
                | Token::Tilde
                | Token::Ellipsis
                | Token::Star
        )
    }

    // ── Statements ────────────────────────────────────────────────

    fn parse_simple_line(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = vec![self.parse_small_stmt()?];
        while self.eat(&Token::Semicolon) {
            if matches!(self.peek(), Token::Newline | Token::Eof) {
                break;
            }
            stmts.push(self.parse_small_stmt()?);
        }
        if !matches!(self.peek(), Token::Newline | Token::Eof) {
            return Err(self.unexpected());
        }
        self.eat(&Token::Newline);
        Ok(stmts)
    }

    fn parse_small_stmt(&mut self) -> PResult<Stmt> {
        let start = self.span();
        let kind = match self.peek() {
            Token::Pass => {
                self.advance();
                StmtKind::Pass
            }
            Token::Break => {
                self.advance();
                StmtKind::Break
            }
            Token::Continue => {
                self.advance();
                StmtKind::Continue
            }
            Token::Del => {
                self.advance();
                let mut targets = self.parse_expr_list()?;
                for t in &mut targets {
                    set_ctx(t, Ctx::Del)?;
                }
                StmtKind::Delete(targets)
            }
            Token::Global | Token::Nonlocal => {
                let global = matches!(self.peek(), Token::Global);
                self.advance();
                let mut names = vec![self.expect_name()?.0];
                while self.eat(&Token::Comma) {
                    names.push(self.expect_name()?.0);
                }
                if global {
                    StmtKind::Global(names)
                } else {
                    StmtKind::Nonlocal(names)
                }
            }
            Token::Assert => {
                self.advance();
                let test = self.parse_test()?;
                let msg = if self.eat(&Token::Comma) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            Token::Raise => {
                self.advance();
                if self.at_stmt_end() {
                    StmtKind::Raise {
                        exc: None,
                        cause: None,
                    }
                } else {
                    let exc = self.parse_test()?;
                    let cause = if self.eat(&Token::From) {
                        Some(self.parse_test()?)
                    } else {
                        None
                    };
                    StmtKind::Raise {
                        exc: Some(exc),
                        cause,
                    }
                }
            }
            Token::Return => {
                self.advance();
                if self.at_stmt_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_testlist_star()?))
                }
            }
            Token::Import => {
                self.advance();
                let mut names = vec![self.parse_dotted_alias()?];
                while self.eat(&Token::Comma) {
                    names.push(self.parse_dotted_alias()?);
                }
                StmtKind::Import(names)
            }
            Token::From => self.parse_import_from()?,
            Token::If
            | Token::While
            | Token::For
            | Token::Try
            | Token::With
            | Token::Def
            | Token::Class
            | Token::Async
            | Token::Elif
            | Token::Else
            | Token::Except
            | Token::Finally
            | Token::At => {
                return Err(ParseError::parser(
                    "compound statements are not supported",
                    start,
                ));
            }
            Token::Yield => {
                return Err(ParseError::parser("'yield' is not supported", start));
            }
            _ => self.parse_expr_stmt()?,
        };
        Ok(Stmt {
            kind,
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_expr_stmt(&mut self) -> PResult<StmtKind> {
        let mut first = self.parse_testlist_star()?;
        match self.peek().clone() {
            Token::Colon => {
                if !is_single_target(&first) {
                    return Err(ParseError::parser(
                        "illegal target for annotation",
                        first.span,
                    ));
                }
                self.advance();
                set_ctx(&mut first, Ctx::Store)?;
                let annotation = self.parse_test()?;
                let value = if self.eat(&Token::Eq) {
                    Some(self.parse_testlist_star()?)
                } else {
                    None
                };
                Ok(StmtKind::AnnAssign {
                    target: first,
                    annotation,
                    value,
                })
            }
            Token::AugAssign(op) => {
                if !is_single_target(&first) {
                    return Err(ParseError::parser(
                        "illegal expression for augmented assignment",
                        first.span,
                    ));
                }
                self.advance();
                set_ctx(&mut first, Ctx::Store)?;
                let value = self.parse_testlist_star()?;
                Ok(StmtKind::AugAssign {
                    target: first,
                    op: aug_op(op),
                    value,
                })
            }
            Token::Eq => {
                let mut targets = vec![first];
                let value = loop {
                    self.advance();
                    let next = self.parse_testlist_star()?;
                    if matches!(self.peek(), Token::Eq) {
                        targets.push(next);
                    } else {
                        break next;
                    }
                };
                for t in &mut targets {
                    set_ctx(t, Ctx::Store)?;
                }
                Ok(StmtKind::Assign { targets, value })
            }
            _ => Ok(StmtKind::Expr(first)),
        }
    }

    fn parse_dotted_name(&mut self) -> PResult<(String, Span)> {
        let (mut name, start) = self.expect_name()?;
        while matches!(self.peek(), Token::Dot) {
            self.advance();
            let (part, _) = self.expect_name()?;
            name.push('.');
            name.push_str(&part);
        }
        Ok((name, start.merge(self.prev_span())))
    }

    fn parse_dotted_alias(&mut self) -> PResult<Alias> {
        let (name, span) = self.parse_dotted_name()?;
        let asname = if self.eat(&Token::As) {
            Some(self.expect_name()?.0)
        } else {
            None
        };
        Ok(Alias {
            name,
            asname,
            span: span.merge(self.prev_span()),
        })
    }

    fn parse_import_from(&mut self) -> PResult<StmtKind> {
        self.advance();
        let mut level = 0;
        loop {
            match self.peek() {
                Token::Dot => level += 1,
                Token::Ellipsis => level += 3,
                _ => break,
            }
            self.advance();
        }
        let module = if matches!(self.peek(), Token::Name(_)) {
            Some(self.parse_dotted_name()?.0)
        } else if level == 0 {
            return Err(self.unexpected());
        } else {
            None
        };
        self.expect(&Token::Import)?;

        let mut names = Vec::new();
        if matches!(self.peek(), Token::Star) {
            let span = self.advance();
            names.push(Alias {
                name: "*".to_string(),
                asname: None,
                span,
            });
        } else {
            let parens = self.eat(&Token::LParen);
            loop {
                let (name, span) = self.expect_name()?;
                let asname = if self.eat(&Token::As) {
                    Some(self.expect_name()?.0)
                } else {
                    None
                };
                names.push(Alias {
                    name,
                    asname,
                    span: span.merge(self.prev_span()),
                });
                if !self.eat(&Token::Comma) {
                    break;
                }
                if parens && matches!(self.peek(), Token::RParen) {
                    break;
                }
            }
            if parens {
                self.expect(&Token::RParen)?;
            }
        }
        Ok(StmtKind::ImportFrom {
            module,
            names,
            level,
        })
    }

    // ── Expression lists ──────────────────────────────────────────

    /// `test_or_star (',' test_or_star)* [',']`, a tuple when commas appear.
    fn parse_testlist_star(&mut self) -> PResult<Expr> {
        let first = self.parse_test_or_star()?;
        if !matches!(self.peek(), Token::Comma) {
            return Ok(first);
        }
        let start = first.span;
        let mut elts = vec![first];
        while self.eat(&Token::Comma) {
            if !self.can_start_expr() {
                break;
            }
            elts.push(self.parse_test_or_star()?);
        }
        Ok(Expr {
            kind: ExprKind::Tuple {
                elts,
                ctx: Ctx::Load,
            },
            span: start.merge(self.prev_span()),
        })
    }

    /// Comma-separated `expr`-level items, used for `del` and `for` targets.
    fn parse_expr_list(&mut self) -> PResult<Vec<Expr>> {
        let mut items = vec![self.parse_star_or_bitor()?];
        while self.eat(&Token::Comma) {
            if !self.can_start_expr() {
                break;
            }
            items.push(self.parse_star_or_bitor()?);
        }
        Ok(items)
    }

    fn parse_target(&mut self) -> PResult<Expr> {
        let start = self.span();
        let first = self.parse_star_or_bitor()?;
        if !matches!(self.peek(), Token::Comma) {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat(&Token::Comma) {
            if !self.can_start_expr() {
                break;
            }
            elts.push(self.parse_star_or_bitor()?);
        }
        Ok(Expr {
            kind: ExprKind::Tuple {
                elts,
                ctx: Ctx::Load,
            },
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_star_or_bitor(&mut self) -> PResult<Expr> {
        if matches!(self.peek(), Token::Star) {
            let start = self.advance();
            let value = self.parse_bitor()?;
            let span = start.merge(value.span);
            return Ok(Expr {
                kind: ExprKind::Starred {
                    value: Box::new(value),
                    ctx: Ctx::Load,
                },
                span,
            });
        }
        self.parse_bitor()
    }

    fn parse_test_or_star(&mut self) -> PResult<Expr> {
        if matches!(self.peek(), Token::Star) {
            return self.parse_star_or_bitor();
        }
        self.parse_test()
    }

    // ── Expressions (precedence climbing) ────────────────────────

    fn parse_test(&mut self) -> PResult<Expr> {
        if matches!(self.peek(), Token::Lambda) {
            return self.parse_lambda();
        }
        let body = self.parse_or_test()?;
        if matches!(self.peek(), Token::ColonEq) {
            return Err(ParseError::parser(
                "assignment expressions are not supported",
                self.span(),
            ));
        }
        if !matches!(self.peek(), Token::If) {
            return Ok(body);
        }
        self.advance();
        let test = self.parse_or_test()?;
        self.expect(&Token::Else)?;
        let orelse = self.parse_test()?;
        let span = body.span.merge(orelse.span);
        Ok(Expr {
            kind: ExprKind::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
            span,
        })
    }

    fn parse_lambda(&mut self) -> PResult<Expr> {
        let start = self.advance();
        let mut params = Vec::new();
        while !matches!(self.peek(), Token::Colon) {
            match self.peek() {
                Token::Star => {
                    self.advance();
                    if let Token::Name(name) = self.peek().clone() {
                        self.advance();
                        params.push(Param {
                            name,
                            default: None,
                            kind: ParamKind::VarArgs,
                        });
                    }
                }
                Token::StarStar => {
                    self.advance();
                    let (name, _) = self.expect_name()?;
                    params.push(Param {
                        name,
                        default: None,
                        kind: ParamKind::KwArgs,
                    });
                }
                Token::Slash => {
                    self.advance();
                }
                _ => {
                    let (name, _) = self.expect_name()?;
                    let default = if self.eat(&Token::Eq) {
                        Some(self.parse_test()?)
                    } else {
                        None
                    };
                    params.push(Param {
                        name,
                        default,
                        kind: ParamKind::Normal,
                    });
                }
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::Colon)?;
        let body = self.parse_test()?;
        let span = start.merge(body.span);
        Ok(Expr {
            kind: ExprKind::Lambda {
                params,
                body: Box::new(body),
            },
            span,
        })
    }

    fn parse_or_test(&mut self) -> PResult<Expr> {
        self.parse_bool_op(Token::Or, BoolOp::Or, Self::parse_and_test)
    }

    fn parse_and_test(&mut self) -> PResult<Expr> {
        self.parse_bool_op(Token::And, BoolOp::And, Self::parse_not_test)
    }

    fn parse_bool_op(
        &mut self,
        token: Token,
        op: BoolOp,
        next: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let first = next(self)?;
        if self.peek() != &token {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat(&token) {
            values.push(next(self)?);
        }
        let span = values
            .iter()
            .map(|v| v.span)
            .reduce(Span::merge)
            .unwrap_or_default();
        Ok(Expr {
            kind: ExprKind::BoolOp { op, values },
            span,
        })
    }

    fn parse_not_test(&mut self) -> PResult<Expr> {
        if matches!(self.peek(), Token::Not) {
            let start = self.advance();
            let operand = self.parse_not_test()?;
            let span = start.merge(operand.span);
            return Ok(Expr {
                kind: ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let left = self.parse_bitor()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        loop {
            let op = match self.peek() {
                Token::Lt => CmpOp::Lt,
                Token::Gt => CmpOp::Gt,
                Token::EqEq => CmpOp::Eq,
                Token::Ge => CmpOp::GtE,
                Token::Le => CmpOp::LtE,
                Token::Ne => CmpOp::NotEq,
                Token::In => CmpOp::In,
                Token::Not if matches!(self.peek_at(1), Token::In) => {
                    self.advance();
                    CmpOp::NotIn
                }
                Token::Is if matches!(self.peek_at(1), Token::Not) => {
                    self.advance();
                    CmpOp::IsNot
                }
                Token::Is => CmpOp::Is,
                _ => break,
            };
            self.advance();
            ops.push(op);
            comparators.push(self.parse_bitor()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        let span = comparators
            .iter()
            .map(|c| c.span)
            .fold(left.span, Span::merge);
        Ok(Expr {
            kind: ExprKind::Compare {
                left: Box::new(left),
                ops,
                comparators,
            },
            span,
        })
    }

    fn parse_binary(
        &mut self,
        ops: &[(Token, BinOp)],
        next: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let mut left = next(self)?;
        loop {
            let Some(op) = ops
                .iter()
                .find(|(t, _)| t == self.peek())
                .map(|(_, op)| *op)
            else {
                break;
            };
            self.advance();
            let right = next(self)?;
            let span = left.span.merge(right.span);
            left = Expr {
                kind: ExprKind::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                span,
            };
        }
        Ok(left)
    }

    fn parse_bitor(&mut self) -> PResult<Expr> {
        self.parse_binary(&[(Token::Pipe, BinOp::BitOr)], Self::parse_bitxor)
    }

    fn parse_bitxor(&mut self) -> PResult<Expr> {
        self.parse_binary(&[(Token::Caret, BinOp::BitXor)], Self::parse_bitand)
    }

    fn parse_bitand(&mut self) -> PResult<Expr> {
        self.parse_binary(&[(Token::Amp, BinOp::BitAnd)], Self::parse_shift)
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        self.parse_binary(
            &[(Token::LtLt, BinOp::LShift), (Token::GtGt, BinOp::RShift)],
            Self::parse_arith,
        )
    }

    fn parse_arith(&mut self) -> PResult<Expr> {
        self.parse_binary(
            &[(Token::Plus, BinOp::Add), (Token::Minus, BinOp::Sub)],
            Self::parse_term,
        )
    }

    fn parse_term(&mut self) -> PResult<Expr> {
        self.parse_binary(
            &[
                (Token::Star, BinOp::Mult),
                (Token::Slash, BinOp::Div),
                (Token::SlashSlash, BinOp::FloorDiv),
                (Token::Percent, BinOp::Mod),
                (Token::At, BinOp::MatMult),
            ],
            Self::parse_factor,
        )
    }

    fn parse_factor(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::USub,
            Token::Plus => UnaryOp::UAdd,
            Token::Tilde => UnaryOp::Invert,
            _ => return self.parse_power(),
        };
        let start = self.advance();
        let operand = self.parse_factor()?;
        let span = start.merge(operand.span);
        Ok(Expr {
            kind: ExprKind::UnaryOp {
                op,
                operand: Box::new(operand),
            },
            span,
        })
    }

    /// `**` binds tighter than unary minus on its left and is right-associative.
    fn parse_power(&mut self) -> PResult<Expr> {
        if matches!(self.peek(), Token::Await) {
            return Err(ParseError::parser("'await' is not supported", self.span()));
        }
        let left = self.parse_primary()?;
        if !matches!(self.peek(), Token::StarStar) {
            return Ok(left);
        }
        self.advance();
        let right = self.parse_factor()?;
        let span = left.span.merge(right.span);
        Ok(Expr {
            kind: ExprKind::BinOp {
                left: Box::new(left),
                op: BinOp::Pow,
                right: Box::new(right),
            },
            span,
        })
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek() {
                Token::LParen => {
                    self.advance();
                    let (args, keywords) = self.parse_call_args()?;
                    let end = self.expect(&Token::RParen)?;
                    let span = expr.span.merge(end);
                    expr = Expr {
                        kind: ExprKind::Call {
                            func: Box::new(expr),
                            args,
                            keywords,
                        },
                        span,
                    };
                }
                Token::LBracket => {
                    self.advance();
                    let slice = self.parse_subscript()?;
                    let end = self.expect(&Token::RBracket)?;
                    let span = expr.span.merge(end);
                    expr = Expr {
                        kind: ExprKind::Subscript {
                            value: Box::new(expr),
                            slice: Box::new(slice),
                            ctx: Ctx::Load,
                        },
                        span,
                    };
                }
                Token::Dot => {
                    self.advance();
                    let (attr, attr_span) = self.expect_name()?;
                    let span = expr.span.merge(attr_span);
                    expr = Expr {
                        kind: ExprKind::Attribute {
                            value: Box::new(expr),
                            attr,
                            ctx: Ctx::Load,
                        },
                        span,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> PResult<(Vec<Expr>, Vec<Keyword>)> {
        let mut args = Vec::new();
        let mut keywords: Vec<Keyword> = Vec::new();
        while !matches!(self.peek(), Token::RParen) {
            let start = self.span();
            match self.peek().clone() {
                Token::Star => {
                    let arg = self.parse_star_or_bitor()?;
                    args.push(arg);
                }
                Token::StarStar => {
                    self.advance();
                    let value = self.parse_test()?;
                    let span = start.merge(value.span);
                    keywords.push(Keyword {
                        arg: None,
                        value,
                        span,
                    });
                }
                Token::Name(name) if matches!(self.peek_at(1), Token::Eq) => {
                    self.advance();
                    self.advance();
                    let value = self.parse_test()?;
                    let span = start.merge(value.span);
                    keywords.push(Keyword {
                        arg: Some(name),
                        value,
                        span,
                    });
                }
                _ => {
                    let mut arg = self.parse_test()?;
                    if matches!(self.peek(), Token::For | Token::Async) {
                        let generators = self.parse_comp_for()?;
                        let span = arg.span.merge(self.prev_span());
                        arg = Expr {
                            kind: ExprKind::GeneratorExp {
                                elt: Box::new(arg),
                                generators,
                            },
                            span,
                        };
                    }
                    if !keywords.is_empty() {
                        let message = if keywords.iter().any(|k| k.arg.is_none()) {
                            "positional argument follows keyword argument unpacking"
                        } else {
                            "positional argument follows keyword argument"
                        };
                        return Err(ParseError::parser(message, arg.span));
                    }
                    args.push(arg);
                }
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok((args, keywords))
    }

    fn parse_subscript(&mut self) -> PResult<Expr> {
        let first = self.parse_slice_item()?;
        if !matches!(self.peek(), Token::Comma) {
            return Ok(first);
        }
        let start = first.span;
        let mut elts = vec![first];
        while self.eat(&Token::Comma) {
            if matches!(self.peek(), Token::RBracket) {
                break;
            }
            elts.push(self.parse_slice_item()?);
        }
        Ok(Expr {
            kind: ExprKind::Tuple {
                elts,
                ctx: Ctx::Load,
            },
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_slice_item(&mut self) -> PResult<Expr> {
        let start = self.span();
        let lower = if matches!(self.peek(), Token::Colon) {
            None
        } else {
            let e = self.parse_test_or_star()?;
            if !matches!(self.peek(), Token::Colon) {
                return Ok(e);
            }
            Some(Box::new(e))
        };
        self.expect(&Token::Colon)?;
        let slice_part = |p: &mut Self| -> PResult<Option<Box<Expr>>> {
            if matches!(p.peek(), Token::Colon | Token::Comma | Token::RBracket) {
                Ok(None)
            } else {
                Ok(Some(Box::new(p.parse_test()?)))
            }
        };
        let upper = slice_part(self)?;
        let step = if self.eat(&Token::Colon) {
            slice_part(self)?
        } else {
            None
        };
        Ok(Expr {
            kind: ExprKind::Slice { lower, upper, step },
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_comp_for(&mut self) -> PResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while matches!(self.peek(), Token::For | Token::Async) {
            if matches!(self.peek(), Token::Async) {
                return Err(ParseError::parser(
                    "asynchronous comprehensions are not supported",
                    self.span(),
                ));
            }
            self.advance();
            let mut target = self.parse_target()?;
            set_ctx(&mut target, Ctx::Store)?;
            self.expect(&Token::In)?;
            let iter = self.parse_or_test()?;
            let mut ifs = Vec::new();
            while self.eat(&Token::If) {
                ifs.push(self.parse_or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(generators)
    }

    // ── Atoms ─────────────────────────────────────────────────────

    fn parse_atom(&mut self) -> PResult<Expr> {
        let span = self.span();
        let constant = |c: Constant| Expr {
            kind: ExprKind::Constant(c),
            span,
        };
        match self.peek().clone() {
            Token::Name(id) => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::Name { id, ctx: Ctx::Load },
                    span,
                })
            }
            Token::Int(v) => {
                self.advance();
                Ok(constant(Constant::Int(v)))
            }
            Token::Float(v) => {
                self.advance();
                Ok(constant(Constant::Float(v)))
            }
            Token::Imag(v) => {
                self.advance();
                Ok(constant(Constant::Imag(v)))
            }
            Token::None => {
                self.advance();
                Ok(constant(Constant::None))
            }
            Token::True => {
                self.advance();
                Ok(constant(Constant::Bool(true)))
            }
            Token::False => {
                self.advance();
                Ok(constant(Constant::Bool(false)))
            }
            Token::Ellipsis => {
                self.advance();
                Ok(constant(Constant::Ellipsis))
            }
            Token::Str(_) | Token::Bytes(_) | Token::FStr { .. } => self.parse_strings(),
            Token::LParen => self.parse_paren(),
            Token::LBracket => self.parse_list(),
            Token::LBrace => self.parse_brace(),
            Token::Yield => Err(ParseError::parser("'yield' is not supported", span)),
            _ => Err(self.unexpected()),
        }
    }

    /// Adjacent string literals concatenate; any f-string turns the run into
    /// a `JoinedStr`.
    fn parse_strings(&mut self) -> PResult<Expr> {
        let start = self.span();
        let mut pieces: Vec<Expr> = Vec::new();
        let mut text = String::new();
        let mut bytes: Option<Vec<u8>> = None;
        let mut saw_str = false;
        let mut saw_fstr = false;

        loop {
            let span = self.span();
            match self.peek().clone() {
                Token::Str(s) => {
                    saw_str = true;
                    text.push_str(&s);
                }
                Token::Bytes(b) => bytes.get_or_insert_with(Vec::new).extend(b),
                Token::FStr { body, offset, raw } => {
                    saw_fstr = true;
                    if !text.is_empty() {
                        pieces.push(str_constant(std::mem::take(&mut text), span));
                    }
                    pieces.extend(parse_fstring_body(&body, offset, raw, span)?);
                }
                _ => break,
            }
            self.advance();
        }
        let span = start.merge(self.prev_span());

        if bytes.is_some() && (saw_str || saw_fstr) {
            return Err(ParseError::parser(
                "cannot mix bytes and nonbytes literals",
                span,
            ));
        }
        if let Some(b) = bytes {
            return Ok(Expr {
                kind: ExprKind::Constant(Constant::Bytes(b)),
                span,
            });
        }
        if !saw_fstr {
            return Ok(str_constant(text, span));
        }
        if !text.is_empty() {
            pieces.push(str_constant(text, span));
        }
        Ok(Expr {
            kind: ExprKind::JoinedStr(merge_constants(pieces)),
            span,
        })
    }

    fn parse_paren(&mut self) -> PResult<Expr> {
        let start = self.advance();
        if matches!(self.peek(), Token::RParen) {
            let end = self.advance();
            return Ok(Expr {
                kind: ExprKind::Tuple {
                    elts: Vec::new(),
                    ctx: Ctx::Load,
                },
                span: start.merge(end),
            });
        }
        if matches!(self.peek(), Token::Yield) {
            return Err(ParseError::parser("'yield' is not supported", self.span()));
        }
        let first = self.parse_test_or_star()?;
        if matches!(self.peek(), Token::For | Token::Async) {
            let generators = self.parse_comp_for()?;
            let end = self.expect(&Token::RParen)?;
            return Ok(Expr {
                kind: ExprKind::GeneratorExp {
                    elt: Box::new(first),
                    generators,
                },
                span: start.merge(end),
            });
        }
        if matches!(self.peek(), Token::Comma) {
            let mut elts = vec![first];
            while self.eat(&Token::Comma) {
                if matches!(self.peek(), Token::RParen) {
                    break;
                }
                elts.push(self.parse_test_or_star()?);
            }
            let end = self.expect(&Token::RParen)?;
            return Ok(Expr {
                kind: ExprKind::Tuple {
                    elts,
                    ctx: Ctx::Load,
                },
                span: start.merge(end),
            });
        }
        self.expect(&Token::RParen)?;
        if matches!(first.kind, ExprKind::Starred { .. }) {
            return Err(ParseError::parser(
                "cannot use starred expression here",
                first.span,
            ));
        }
        Ok(first)
    }

    fn parse_list(&mut self) -> PResult<Expr> {
        let start = self.advance();
        let mut elts = Vec::new();
        if !matches!(self.peek(), Token::RBracket) {
            let first = self.parse_test_or_star()?;
            if matches!(self.peek(), Token::For | Token::Async) {
                let generators = self.parse_comp_for()?;
                let end = self.expect(&Token::RBracket)?;
                return Ok(Expr {
                    kind: ExprKind::ListComp {
                        elt: Box::new(first),
                        generators,
                    },
                    span: start.merge(end),
                });
            }
            elts.push(first);
            while self.eat(&Token::Comma) {
                if matches!(self.peek(), Token::RBracket) {
                    break;
                }
                elts.push(self.parse_test_or_star()?);
            }
        }
        let end = self.expect(&Token::RBracket)?;
        Ok(Expr {
            kind: ExprKind::List {
                elts,
                ctx: Ctx::Load,
            },
            span: start.merge(end),
        })
    }

    fn parse_brace(&mut self) -> PResult<Expr> {
        let start = self.advance();
        if matches!(self.peek(), Token::RBrace) {
            let end = self.advance();
            return Ok(Expr {
                kind: ExprKind::Dict {
                    keys: Vec::new(),
                    values: Vec::new(),
                },
                span: start.merge(end),
            });
        }

        let mut keys = Vec::new();
        let mut values = Vec::new();
        if matches!(self.peek(), Token::StarStar) {
            self.advance();
            keys.push(None);
            values.push(self.parse_bitor()?);
        } else {
            let first = self.parse_test_or_star()?;
            if !self.eat(&Token::Colon) {
                return self.finish_set(start, first);
            }
            let value = self.parse_test()?;
            if matches!(self.peek(), Token::For | Token::Async) {
                let generators = self.parse_comp_for()?;
                let end = self.expect(&Token::RBrace)?;
                return Ok(Expr {
                    kind: ExprKind::DictComp {
                        key: Box::new(first),
                        value: Box::new(value),
                        generators,
                    },
                    span: start.merge(end),
                });
            }
            keys.push(Some(first));
            values.push(value);
        }

        while self.eat(&Token::Comma) {
            if matches!(self.peek(), Token::RBrace) {
                break;
            }
            if self.eat(&Token::StarStar) {
                keys.push(None);
                values.push(self.parse_bitor()?);
            } else {
                keys.push(Some(self.parse_test()?));
                self.expect(&Token::Colon)?;
                values.push(self.parse_test()?);
            }
        }
        let end = self.expect(&Token::RBrace)?;
        Ok(Expr {
            kind: ExprKind::Dict { keys, values },
            span: start.merge(end),
        })
    }

    fn finish_set(&mut self, start: Span, first: Expr) -> PResult<Expr> {
        if matches!(self.peek(), Token::For | Token::Async) {
            let generators = self.parse_comp_for()?;
            let end = self.expect(&Token::RBrace)?;
            return Ok(Expr {
                kind: ExprKind::SetComp {
                    elt: Box::new(first),
                    generators,
                },
                span: start.merge(end),
            });
        }
        let mut elts = vec![first];
        while self.eat(&Token::Comma) {
            if matches!(self.peek(), Token::RBrace) {
                break;
            }
            elts.push(self.parse_test_or_star()?);
        }
        let end = self.expect(&Token::RBrace)?;
        Ok(Expr {
            kind: ExprKind::Set(elts),
            span: start.merge(end),
        })
    }
}

// ── Free helpers ──────────────────────────────────────────────────

fn describe(token: &Token) -> String {
    match token {
        Token::Newline => "end of line".to_string(),
        Token::Eof => "end of input".to_string(),
        Token::Name(n) => format!("name '{n}'"),
        Token::Int(v) => format!("number {v}"),
        Token::Str(_) | Token::Bytes(_) | Token::FStr { .. } => "string".to_string(),
        other => format!("{other:?}"),
    }
}

fn aug_op(text: &str) -> BinOp {
    match text {
        "-" => BinOp::Sub,
        "*" => BinOp::Mult,
        "@" => BinOp::MatMult,
        "/" => BinOp::Div,
        "//" => BinOp::FloorDiv,
        "%" => BinOp::Mod,
        "**" => BinOp::Pow,
        "<<" => BinOp::LShift,
        ">>" => BinOp::RShift,
        "|" => BinOp::BitOr,
        "^" => BinOp::BitXor,
        "&" => BinOp::BitAnd,
        _ => BinOp::Add,
    }
}

fn is_single_target(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Name { .. } | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
    )
}

/// Mark an expression as an assignment or deletion target.
fn set_ctx(expr: &mut Expr, ctx: Ctx) -> PResult<()> {
    let span = expr.span;
    match &mut expr.kind {
        ExprKind::Name { ctx: c, .. }
        | ExprKind::Attribute { ctx: c, .. }
        | ExprKind::Subscript { ctx: c, .. } => {
            *c = ctx;
            Ok(())
        }
        ExprKind::Starred { value, ctx: c } => {
            *c = ctx;
            set_ctx(value, ctx)
        }
        ExprKind::List { elts, ctx: c } | ExprKind::Tuple { elts, ctx: c } => {
            *c = ctx;
            elts.iter_mut().try_for_each(|e| set_ctx(e, ctx))
        }
        other => {
            let what = match other {
                ExprKind::Constant(_) => "literal",
                ExprKind::Call { .. } => "function call",
                ExprKind::Lambda { .. } => "lambda",
                _ => "expression",
            };
            let verb = if ctx == Ctx::Del { "delete" } else { "assign to" };
            Err(ParseError::parser(format!("cannot {verb} {what}"), span))
        }
    }
}

fn str_constant(text: String, span: Span) -> Expr {
    Expr {
        kind: ExprKind::Constant(Constant::Str(text)),
        span,
    }
}

fn merge_constants(pieces: Vec<Expr>) -> Vec<Expr> {
    let mut out: Vec<Expr> = Vec::with_capacity(pieces.len());
    for piece in pieces {
        if let ExprKind::Constant(Constant::Str(s)) = &piece.kind {
            if let Some(Expr {
                kind: ExprKind::Constant(Constant::Str(prev)),
                span,
            }) = out.last_mut()
            {
                prev.push_str(s);
                *span = span.merge(piece.span);
                continue;
            }
        }
        out.push(piece);
    }
    out
}

/// Split an f-string body into literal text and `{expression}` parts.
fn parse_fstring_body(body: &str, offset: usize, raw: bool, span: Span) -> PResult<Vec<Expr>> {
    let chars: Vec<(usize, char)> = body.char_indices().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    let flush = |literal: &mut String, parts: &mut Vec<Expr>| -> PResult<()> {
        if literal.is_empty() {
            return Ok(());
        }
        let text = if raw {
            std::mem::take(literal)
        } else {
            let t = lexer::unescape(literal, false).map_err(|m| ParseError::parser(m, span))?;
            literal.clear();
            t
        };
        parts.push(str_constant(text, span));
        Ok(())
    };

    while i < chars.len() {
        let (at, c) = chars[i];
        let next = chars.get(i + 1).map(|&(_, c)| c);
        match c {
            '{' if next == Some('{') => {
                literal.push('{');
                i += 2;
            }
            '}' if next == Some('}') => {
                literal.push('}');
                i += 2;
            }
            '}' => {
                return Err(ParseError::parser(
                    "f-string: single '}' is not allowed",
                    Span::new(offset + at, offset + at + 1),
                ));
            }
            '{' => {
                flush(&mut literal, &mut parts)?;
                let (end, split) = find_replacement_end(&chars, i + 1).ok_or_else(|| {
                    ParseError::parser("f-string: expecting '}'", Span::new(offset + at, offset + at + 1))
                })?;
                let expr_start = chars.get(i + 1).map_or(body.len(), |&(b, _)| b);
                let expr_end = chars.get(split.unwrap_or(end)).map_or(body.len(), |&(b, _)| b);
                let text = &body[expr_start..expr_end];
                let trimmed = text.trim_start();
                let lead = text.len() - trimmed.len();
                let trimmed = trimmed.trim_end().trim_end_matches('=').trim_end();
                if trimmed.is_empty() {
                    return Err(ParseError::parser(
                        "f-string: empty expression not allowed",
                        Span::new(offset + at, offset + expr_end),
                    ));
                }
                let base = offset + expr_start + lead;
                let mut tokens = lexer::lex(trimmed).map_err(first_error)?;
                for t in &mut tokens {
                    t.span = Span::new(t.span.start + base, t.span.end + base);
                }
                let value = parse_expression(tokens).map_err(first_error)?;
                let close = chars.get(end).map_or(body.len(), |&(b, _)| b);
                parts.push(Expr {
                    kind: ExprKind::FormattedValue(Box::new(value)),
                    span: Span::new(offset + at, offset + close + 1),
                });
                i = end + 1;
            }
            _ => {
                literal.push(c);
                i += 1;
            }
        }
    }
    flush(&mut literal, &mut parts)?;
    Ok(parts)
}

/// Index of the closing `}` of a replacement field and of the first
/// top-level `!` conversion or `:` format spec, if any.
fn find_replacement_end(chars: &[(usize, char)], from: usize) -> Option<(usize, Option<usize>)> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut split = None;
    let mut j = from;
    while j < chars.len() {
        let c = chars[j].1;
        let next = chars.get(j + 1).map(|&(_, c)| c);
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            j += 1;
            continue;
        }
        match c {
            '\'' | '"' if split.is_none() => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            '}' if depth == 0 => return Some((j, split)),
            '}' => depth -= 1,
            '!' if depth == 0 && split.is_none() && next != Some('=') => split = Some(j),
            ':' if depth == 0 && split.is_none() => split = Some(j),
            _ => {}
        }
        j += 1;
    }
    None
}

fn first_error(mut errors: Vec<ParseError>) -> ParseError {
    if errors.is_empty() {
        ParseError::parser("invalid syntax", Span::default())
    } else {
        errors.swap_remove(0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn module(src: &str) -> Module {
        parse_module(lexer::lex(src).unwrap()).unwrap()
    }

    fn expr(src: &str) -> Expr {
        parse_expression(lexer::lex(src).unwrap()).unwrap()
    }

    fn module_err(src: &str) -> String {
        let tokens = lexer::lex(src).unwrap();
        parse_module(tokens).unwrap_err().remove(0).message
    }

    #[test]
    fn assignment_targets_are_stores() {
        let m = module("Clock.bpm = 120");
        let StmtKind::Assign { targets, value } = &m.body[0].kind else {
            panic!("expected assign");
        };
        assert!(matches!(
            targets[0].kind,
            ExprKind::Attribute { ref attr, ctx: Ctx::Store, .. } if attr == "bpm"
        ));
        assert_eq!(value.kind, ExprKind::Constant(Constant::Int(120)));
    }

    #[test]
    fn player_statement_is_rshift_call() {
        let m = module("p1 >> pluck([0, 2, 4], dur=1/2, amp=0.8)");
        let StmtKind::Expr(e) = &m.body[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::BinOp { left, op, right } = &e.kind else {
            panic!("expected binop");
        };
        assert_eq!(*op, BinOp::RShift);
        assert!(matches!(left.kind, ExprKind::Name { ref id, .. } if id == "p1"));
        let ExprKind::Call { args, keywords, .. } = &right.kind else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 1);
        assert_eq!(keywords.len(), 2);
        assert_eq!(keywords[0].arg.as_deref(), Some("dur"));
    }

    #[test]
    fn precedence() {
        let e = expr("1 + 2 * 3 ** -1");
        let ExprKind::BinOp { op, right, .. } = &e.kind else {
            panic!("expected binop");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(right.kind, ExprKind::BinOp { op: BinOp::Mult, .. }));

        let e = expr("-2 ** 2");
        assert!(matches!(e.kind, ExprKind::UnaryOp { op: UnaryOp::USub, .. }));
    }

    #[test]
    fn tuples_slices_and_displays() {
        assert!(matches!(expr("1, 2").kind, ExprKind::Tuple { ref elts, .. } if elts.len() == 2));
        assert!(matches!(expr("(0, 2)").kind, ExprKind::Tuple { .. }));
        assert!(matches!(expr("(0)").kind, ExprKind::Constant(Constant::Int(0))));
        assert!(matches!(expr("{1, 2}").kind, ExprKind::Set(_)));
        assert!(matches!(expr("{'a': 1, **b}").kind, ExprKind::Dict { ref keys, .. } if keys[1].is_none()));
        let e = expr("x[1:2, ::3]");
        let ExprKind::Subscript { slice, .. } = &e.kind else {
            panic!("expected subscript");
        };
        assert!(matches!(slice.kind, ExprKind::Tuple { ref elts, .. }
            if matches!(elts[1].kind, ExprKind::Slice { lower: None, upper: None, step: Some(_) })));
    }

    #[test]
    fn comprehensions_and_lambda() {
        assert!(matches!(expr("[x for x in range(4) if x]").kind, ExprKind::ListComp { .. }));
        assert!(matches!(expr("{k: v for k, v in d}").kind, ExprKind::DictComp { .. }));
        assert!(matches!(expr("sum(x for x in y)").kind, ExprKind::Call { .. }));
        assert!(matches!(expr("lambda x, y=1: x + y").kind, ExprKind::Lambda { ref params, .. } if params.len() == 2));
        assert!(matches!(expr("a if b else c").kind, ExprKind::IfExp { .. }));
    }

    #[test]
    fn comparisons_chain() {
        let e = expr("a < b is not c not in d");
        let ExprKind::Compare { ops, .. } = &e.kind else {
            panic!("expected compare");
        };
        assert_eq!(ops, &vec![CmpOp::Lt, CmpOp::IsNot, CmpOp::NotIn]);
    }

    #[test]
    fn strings_concatenate_and_fstrings_split() {
        assert_eq!(
            expr("'a' 'b'").kind,
            ExprKind::Constant(Constant::Str("ab".into()))
        );
        let e = expr("f'x{y!r:>4}z'");
        let ExprKind::JoinedStr(parts) = &e.kind else {
            panic!("expected joined str");
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(parts[1].kind, ExprKind::FormattedValue(_)));
    }

    #[test]
    fn imports_parse() {
        let m = module("import os.path as p, sys\nfrom . import x\nfrom a.b import (c as d, e,)");
        assert!(matches!(m.body[0].kind, StmtKind::Import(ref names) if names.len() == 2));
        assert!(matches!(m.body[1].kind, StmtKind::ImportFrom { level: 1, module: None, .. }));
        assert!(matches!(m.body[2].kind, StmtKind::ImportFrom { ref names, .. } if names.len() == 2));
    }

    #[test]
    fn simple_statements() {
        let m = module("pass; x += 1; del a[0]; y: int = 2\nassert x, 'msg'\nraise E from e");
        assert_eq!(m.body.len(), 6);
        assert!(matches!(m.body[1].kind, StmtKind::AugAssign { op: BinOp::Add, .. }));
        assert!(matches!(m.body[2].kind, StmtKind::Delete(_)));
        assert!(matches!(m.body[3].kind, StmtKind::AnnAssign { .. }));
    }

    #[test]
    fn chained_assignment() {
        let m = module("a = b = 1");
        assert!(matches!(m.body[0].kind, StmtKind::Assign { ref targets, .. } if targets.len() == 2));
    }

    #[test]
    fn errors() {
        assert_eq!(module_err("if x: y"), "compound statements are not supported");
        assert_eq!(module_err("def f(): pass"), "compound statements are not supported");
        assert_eq!(module_err("1 = x"), "cannot assign to literal");
        assert_eq!(module_err("f() = 1"), "cannot assign to function call");
        assert_eq!(
            module_err("f(a=1, b)"),
            "positional argument follows keyword argument"
        );
        assert!(module_err("x-(-[--])o-").starts_with("invalid syntax"));
        assert!(module_err("a b").starts_with("invalid syntax"));
    }

    #[test]
    fn expression_mode_rejects_statements() {
        let tokens = lexer::lex("x = 1").unwrap();
        assert!(parse_expression(tokens).is_err());
        let tokens = lexer::lex("a\nb").unwrap();
        assert!(parse_expression(tokens).is_err());
    }

    #[test]
    fn module_collects_errors_per_line() {
        let tokens = lexer::lex("a b\nc d\nok = 1").unwrap();
        assert_eq!(parse_module(tokens).unwrap_err().len(), 2);
    }
}
