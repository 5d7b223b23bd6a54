//! Recursive-descent parser for the tea language (§4.4).
//!
//! Struct shape (`Parser { tokens, current, .. }`, `match`/`consume`-style
//! helpers) is the conventional token-cursor recursive-descent shape; the
//! grammar itself matches the source language's reference parser exactly:
//! the same `unexpected()` panic-and-never-return behavior, the same
//! `parseType` const/signed/unsigned walk, the same `parseParams` loop.
//! Parse errors are fatal (§7) — there is no error-recovery path here.

use crate::ast::*;
use crate::precedence::Precedence;
use tea_common::{panic as tea_panic, Span};
use tea_lexer::{Keyword, Token, TokenKind, TokenUtils};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    file_id: u32,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, file_id: u32) -> Self {
        Self { tokens, pos: 0, file_id }
    }

    pub fn parse_program(&mut self) -> Program {
        let mut items = Vec::new();
        while !self.is_eof() {
            items.push(self.parse_item());
        }
        Program { items }
    }

    // --- token-stream primitives ---------------------------------------

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].value
    }

    fn peek_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn prev_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].span
    }

    fn is_eof(&self) -> bool {
        self.tokens[self.pos].is_eof()
    }

    fn bump(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if !self.is_eof() {
            self.pos += 1;
        }
        tok
    }

    fn unexpected(&self) -> ! {
        let span = self.peek_span();
        tea_panic::panic(format!(
            "unexpected token '{}'. line {}, column {}",
            self.peek(), span.start.line, span.start.column
        ));
    }

    fn is_keyword(&self, kw: Keyword) -> bool {
        self.tokens[self.pos].is_keyword(kw)
    }

    fn expect_keyword(&mut self, kw: Keyword) -> Span {
        if !self.is_keyword(kw) {
            self.unexpected();
        }
        self.bump().span
    }

    fn is_soft_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), TokenKind::Identifier(s) if s == word)
    }

    fn expect_soft_keyword(&mut self, word: &str) -> Span {
        if !self.is_soft_keyword(word) {
            self.unexpected();
        }
        self.bump().span
    }

    fn check_punct(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn peek_next_is_assign(&self) -> bool {
        matches!(self.tokens.get(self.pos + 1).map(|t| &t.value), Some(TokenKind::Assign))
    }

    fn expect_punct(&mut self, kind: TokenKind) -> Span {
        if !self.check_punct(&kind) {
            self.unexpected();
        }
        self.bump().span
    }

    fn expect_identifier(&mut self) -> (String, Span) {
        let span = self.peek_span();
        match self.peek().clone() {
            TokenKind::Identifier(name) => {
                self.bump();
                (name, span)
            }
            _ => self.unexpected(),
        }
    }

    fn expect_identifier_text(&mut self) -> String {
        self.expect_identifier().0
    }

    fn peek_is_identifier_text(&self, word: &str) -> bool {
        matches!(self.peek(), TokenKind::Identifier(s) if s == word)
    }

    fn try_parse_calling_conv(&mut self) -> Option<CallingConv> {
        if self.is_keyword(Keyword::CDecl) {
            self.bump();
            Some(CallingConv::CDecl)
        } else if self.is_keyword(Keyword::FastCall) {
            self.bump();
            Some(CallingConv::FastCall)
        } else if self.is_keyword(Keyword::StdCall) {
            self.bump();
            Some(CallingConv::StdCall)
        } else if self.is_keyword(Keyword::Auto) {
            self.bump();
            Some(CallingConv::Auto)
        } else {
            None
        }
    }

    // --- top-level items --------------------------------------------------

    fn parse_item(&mut self) -> Item {
        if self.is_keyword(Keyword::Using) {
            return self.parse_using_import();
        }
        if self.is_keyword(Keyword::Import) {
            return self.parse_func_import();
        }
        if self.is_keyword(Keyword::Public) || self.is_keyword(Keyword::Private) {
            let start = self.peek_span();
            let visibility = if self.is_keyword(Keyword::Public) {
                self.bump();
                Visibility::Public
            } else {
                self.bump();
                Visibility::Private
            };
            if self.is_keyword(Keyword::Var) {
                return self.parse_top_var_decl(visibility, start);
            }
            let cc = self.try_parse_calling_conv();
            return self.parse_function(visibility, cc, start);
        }
        self.unexpected()
    }

    fn parse_using_import(&mut self) -> Item {
        let start = self.expect_keyword(Keyword::Using);
        let path = match self.peek().clone() {
            TokenKind::StringLit(s) => { self.bump(); s }
            _ => self.unexpected(),
        };
        self.expect_punct(TokenKind::Semicolon);
        Item::UsingImport { path, span: Span::new(start.start, self.prev_span().end, self.file_id) }
    }

    fn parse_func_import(&mut self) -> Item {
        let start = self.expect_keyword(Keyword::Import);
        let cc = self.try_parse_calling_conv();
        self.expect_keyword(Keyword::Func);
        let name = self.expect_identifier_text();
        let params = self.parse_params();
        self.expect_punct(TokenKind::Arrow);
        let return_type = self.parse_type();
        self.expect_punct(TokenKind::Semicolon);
        Item::FuncImport {
            cc,
            name,
            params,
            return_type,
            span: Span::new(start.start, self.prev_span().end, self.file_id),
        }
    }

    fn parse_function(&mut self, visibility: Visibility, cc: Option<CallingConv>, start: Span) -> Item {
        self.expect_keyword(Keyword::Func);
        let name = self.expect_identifier_text();
        let params = self.parse_params();
        self.expect_punct(TokenKind::Arrow);
        let return_type = self.parse_type();
        let body = self.parse_block();
        Item::Function {
            visibility,
            cc,
            name,
            params,
            return_type,
            body,
            span: Span::new(start.start, self.prev_span().end, self.file_id),
        }
    }

    fn parse_top_var_decl(&mut self, visibility: Visibility, start: Span) -> Item {
        self.expect_keyword(Keyword::Var);
        let name = self.expect_identifier_text();
        let ty = if self.check_punct(&TokenKind::Colon) {
            self.bump();
            Some(self.parse_type())
        } else {
            None
        };
        let init = if self.check_punct(&TokenKind::Assign) {
            self.bump();
            Some(self.parse_expression())
        } else {
            None
        };
        self.expect_punct(TokenKind::Semicolon);
        Item::VarDecl { visibility, name, ty, init, span: Span::new(start.start, self.prev_span().end, self.file_id) }
    }

    fn parse_params(&mut self) -> Params {
        self.expect_punct(TokenKind::LParen);
        let mut list = Vec::new();
        let mut is_vararg = false;
        if !self.check_punct(&TokenKind::RParen) {
            loop {
                if self.check_punct(&TokenKind::Ellipsis) {
                    self.bump();
                    is_vararg = true;
                    break;
                }
                let span_start = self.peek_span();
                let ty = self.parse_type();
                let (name, _) = self.expect_identifier();
                list.push(Param { ty, name, span: Span::new(span_start.start, self.prev_span().end, self.file_id) });
                if self.check_punct(&TokenKind::Comma) {
                    self.bump();
                    continue;
                }
                break;
            }
        }
        self.expect_punct(TokenKind::RParen);
        Params { list, is_vararg }
    }

    /// `[const] [signed|unsigned] name (*[const])* ([N])*`, ported from
    /// `Parser::parseType` in the reference compiler.
    fn parse_type(&mut self) -> TypeExpr {
        let start = self.peek_span();
        let first = self.expect_identifier_text();

        let mut is_const = false;
        let mut signedness = None;
        let name;

        if first == "const" {
            is_const = true;
            let next = self.expect_identifier_text();
            if next == "signed" || next == "unsigned" {
                signedness = Some(if next == "signed" { Signedness::Signed } else { Signedness::Unsigned });
                name = self.expect_identifier_text();
            } else {
                name = next;
            }
        } else if first == "signed" || first == "unsigned" {
            signedness = Some(if first == "signed" { Signedness::Signed } else { Signedness::Unsigned });
            let next = self.expect_identifier_text();
            if next == "const" {
                is_const = true;
                name = self.expect_identifier_text();
            } else {
                name = next;
            }
        } else {
            name = first;
        }

        let mut pointer_const = Vec::new();
        while self.check_punct(&TokenKind::Star) {
            self.bump();
            let trailing_const = if self.peek_is_identifier_text("const") {
                self.bump();
                true
            } else {
                false
            };
            pointer_const.push(trailing_const);
        }

        let mut array_dims = Vec::new();
        while self.check_punct(&TokenKind::LBrack) {
            self.bump();
            let dim = match self.peek().clone() {
                TokenKind::Int(n) if n >= 0 => { self.bump(); n as u32 }
                _ => self.unexpected(),
            };
            array_dims.push(dim);
            self.expect_punct(TokenKind::RBrack);
        }

        TypeExpr { is_const, signedness, name, pointer_const, array_dims, span: Span::new(start.start, self.prev_span().end, self.file_id) }
    }

    // --- statements --------------------------------------------------------

    fn parse_block(&mut self) -> Block {
        let block = self.parse_block_body_until(|p| p.is_keyword(Keyword::End));
        self.expect_keyword(Keyword::End);
        block
    }

    fn parse_block_body_until(&mut self, stop: impl Fn(&Self) -> bool) -> Block {
        let mut stmts = Vec::new();
        loop {
            if stop(self) {
                return Block { stmts };
            }
            if self.is_eof() {
                let span = self.peek_span();
                tea_panic::panic(format!(
                    "unexpected EOF (did you forget to close a function?). line {}, column {}",
                    span.start.line, span.start.column
                ));
            }
            stmts.push(self.parse_stmt());
        }
    }

    fn parse_stmt(&mut self) -> Stmt {
        if self.is_keyword(Keyword::Return) {
            let start = self.expect_keyword(Keyword::Return);
            let value = if self.check_punct(&TokenKind::Semicolon) { None } else { Some(self.parse_expression()) };
            self.expect_punct(TokenKind::Semicolon);
            return Stmt::Return { value, span: Span::new(start.start, self.prev_span().end, self.file_id) };
        }
        if self.is_keyword(Keyword::Var) {
            let stmt = self.parse_var_decl_clause();
            self.expect_punct(TokenKind::Semicolon);
            return stmt;
        }
        if self.is_keyword(Keyword::If) {
            return self.parse_if();
        }
        if self.is_keyword(Keyword::While) {
            return self.parse_while();
        }
        if self.is_soft_keyword("for") {
            return self.parse_for();
        }
        if self.is_soft_keyword("break") {
            let span = self.bump().span;
            self.expect_punct(TokenKind::Semicolon);
            return Stmt::Break { span };
        }
        if self.is_soft_keyword("continue") {
            let span = self.bump().span;
            self.expect_punct(TokenKind::Semicolon);
            return Stmt::Continue { span };
        }
        self.parse_expr_or_assign_stmt()
    }

    /// `var name [: type] [= expr]` with no trailing `;` consumed — shared
    /// by the local-variable statement and the `for` loop's init clause.
    fn parse_var_decl_clause(&mut self) -> Stmt {
        let start = self.expect_keyword(Keyword::Var);
        let name = self.expect_identifier_text();
        let ty = if self.check_punct(&TokenKind::Colon) {
            self.bump();
            Some(self.parse_type())
        } else {
            None
        };
        let init = if self.check_punct(&TokenKind::Assign) {
            self.bump();
            Some(self.parse_expression())
        } else {
            None
        };
        Stmt::VarDecl { name, ty, init, span: Span::new(start.start, self.prev_span().end, self.file_id) }
    }

    fn parse_if(&mut self) -> Stmt {
        let start = self.expect_keyword(Keyword::If);
        self.expect_punct(TokenKind::LParen);
        let cond = self.parse_expression();
        self.expect_punct(TokenKind::RParen);
        self.expect_keyword(Keyword::Do);
        let arm_stop = |p: &Self| p.is_keyword(Keyword::End) || p.is_keyword(Keyword::Else) || p.is_keyword(Keyword::ElseIf);
        let then_block = self.parse_block_body_until(arm_stop);

        let mut elseifs = Vec::new();
        while self.is_keyword(Keyword::ElseIf) {
            self.bump();
            self.expect_punct(TokenKind::LParen);
            let c = self.parse_expression();
            self.expect_punct(TokenKind::RParen);
            self.expect_keyword(Keyword::Do);
            let b = self.parse_block_body_until(arm_stop);
            elseifs.push((c, b));
        }

        let else_block = if self.is_keyword(Keyword::Else) {
            self.bump();
            Some(self.parse_block_body_until(|p| p.is_keyword(Keyword::End)))
        } else {
            None
        };

        self.expect_keyword(Keyword::End);
        Stmt::If { cond, then_block, elseifs, else_block, span: Span::new(start.start, self.prev_span().end, self.file_id) }
    }

    fn parse_while(&mut self) -> Stmt {
        let start = self.expect_keyword(Keyword::While);
        self.expect_punct(TokenKind::LParen);
        let cond = self.parse_expression();
        self.expect_punct(TokenKind::RParen);
        self.expect_keyword(Keyword::Do);
        let body = self.parse_block();
        Stmt::While { cond, body, span: Span::new(start.start, self.prev_span().end, self.file_id) }
    }

    fn parse_for(&mut self) -> Stmt {
        let start = self.expect_soft_keyword("for");
        self.expect_punct(TokenKind::LParen);
        let init = self.parse_var_decl_clause();
        self.expect_punct(TokenKind::Semicolon);
        let cond = self.parse_expression();
        self.expect_punct(TokenKind::Semicolon);
        let step = self.parse_expression();
        self.expect_punct(TokenKind::RParen);
        self.expect_keyword(Keyword::Do);
        let body = self.parse_block();
        Stmt::For {
            init: Box::new(init),
            cond,
            step,
            body,
            span: Span::new(start.start, self.prev_span().end, self.file_id),
        }
    }

    fn parse_expr_or_assign_stmt(&mut self) -> Stmt {
        let start = self.peek_span();
        let expr = self.parse_expression();

        let compound_op = match self.peek() {
            TokenKind::Plus if self.peek_next_is_assign() => Some(AssignOp::Add),
            TokenKind::Minus if self.peek_next_is_assign() => Some(AssignOp::Sub),
            TokenKind::Star if self.peek_next_is_assign() => Some(AssignOp::Mul),
            TokenKind::Slash if self.peek_next_is_assign() => Some(AssignOp::Div),
            _ => None,
        };

        if compound_op.is_some() || self.check_punct(&TokenKind::Assign) {
            if compound_op.is_some() {
                self.bump(); // the +/-/*// token
            }
            self.bump(); // '='
            let value = self.parse_expression();
            self.expect_punct(TokenKind::Semicolon);
            return Stmt::Assign {
                target: expr,
                op: compound_op,
                value,
                span: Span::new(start.start, self.prev_span().end, self.file_id),
            };
        }

        self.expect_punct(TokenKind::Semicolon);
        Stmt::Expr { expr, span: Span::new(start.start, self.prev_span().end, self.file_id) }
    }

    // --- expressions ---------------------------------------------------

    pub fn parse_expression(&mut self) -> Expr {
        self.parse_precedence(Precedence::Or)
    }

    fn parse_precedence(&mut self, min_prec: Precedence) -> Expr {
        let mut lhs = self.parse_unary();
        while let Some((op, prec)) = self.peek_binop() {
            if prec < min_prec {
                break;
            }
            self.bump();
            let rhs = self.parse_precedence(prec.next());
            let span = Span::new(lhs.span().start, rhs.span().end, self.file_id);
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        lhs
    }

    fn peek_binop(&self) -> Option<(BinOp, Precedence)> {
        Some(match self.peek() {
            TokenKind::PipePipe => (BinOp::Or, Precedence::Or),
            TokenKind::AmpAmp => (BinOp::And, Precedence::And),
            TokenKind::Pipe => (BinOp::BitOr, Precedence::BitOr),
            TokenKind::Caret => (BinOp::BitXor, Precedence::BitXor),
            TokenKind::Amp => (BinOp::BitAnd, Precedence::BitAnd),
            TokenKind::EqEq => (BinOp::Eq, Precedence::Equality),
            TokenKind::BangEq => (BinOp::Ne, Precedence::Equality),
            TokenKind::Lt => (BinOp::Lt, Precedence::Relational),
            TokenKind::Gt => (BinOp::Gt, Precedence::Relational),
            TokenKind::LtEq => (BinOp::Le, Precedence::Relational),
            TokenKind::GtEq => (BinOp::Ge, Precedence::Relational),
            TokenKind::LtLt => (BinOp::Shl, Precedence::Shift),
            TokenKind::GtGt => (BinOp::Shr, Precedence::Shift),
            TokenKind::Plus => (BinOp::Add, Precedence::Additive),
            TokenKind::Minus => (BinOp::Sub, Precedence::Additive),
            TokenKind::Star => (BinOp::Mul, Precedence::Multiplicative),
            TokenKind::Slash => (BinOp::Div, Precedence::Multiplicative),
            _ => return None,
        })
    }

    fn parse_unary(&mut self) -> Expr {
        let start = self.peek_span();
        match self.peek() {
            TokenKind::Bang => {
                self.bump();
                let expr = self.parse_unary();
                Expr::Unary { op: UnaryOp::Not, expr: Box::new(expr), span: Span::new(start.start, self.prev_span().end, self.file_id) }
            }
            TokenKind::Amp => {
                self.bump();
                let expr = self.parse_unary();
                Expr::Unary { op: UnaryOp::AddrOf, expr: Box::new(expr), span: Span::new(start.start, self.prev_span().end, self.file_id) }
            }
            TokenKind::Star => {
                self.bump();
                let expr = self.parse_unary();
                Expr::Unary { op: UnaryOp::Deref, expr: Box::new(expr), span: Span::new(start.start, self.prev_span().end, self.file_id) }
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Expr {
        let mut expr = self.parse_primary();
        loop {
            match self.peek() {
                TokenKind::LParen => {
                    self.bump();
                    let mut args = Vec::new();
                    if !self.check_punct(&TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expression());
                            if self.check_punct(&TokenKind::Comma) {
                                self.bump();
                                continue;
                            }
                            break;
                        }
                    }
                    self.expect_punct(TokenKind::RParen);
                    let span = Span::new(expr.span().start, self.prev_span().end, self.file_id);
                    expr = Expr::Call { callee: Box::new(expr), args, span };
                }
                TokenKind::LBrack => {
                    self.bump();
                    let index = self.parse_expression();
                    self.expect_punct(TokenKind::RBrack);
                    let span = Span::new(expr.span().start, self.prev_span().end, self.file_id);
                    expr = Expr::Index { base: Box::new(expr), index: Box::new(index), span };
                }
                _ => break,
            }
        }
        expr
    }

    fn parse_primary(&mut self) -> Expr {
        let span = self.peek_span();
        match self.peek().clone() {
            TokenKind::Int(n) => { self.bump(); Expr::Int(n, span) }
            TokenKind::Float(s) => { self.bump(); Expr::Float(s, span) }
            TokenKind::Double(s) => { self.bump(); Expr::Double(s, span) }
            TokenKind::StringLit(s) => { self.bump(); Expr::Str(s, span) }
            TokenKind::CharLit(c) => { self.bump(); Expr::Char(c, span) }
            TokenKind::LParen => {
                self.bump();
                let inner = self.parse_expression();
                self.expect_punct(TokenKind::RParen);
                inner
            }
            TokenKind::LBrack => {
                self.bump();
                let mut elements = Vec::new();
                if !self.check_punct(&TokenKind::RBrack) {
                    loop {
                        elements.push(self.parse_expression());
                        if self.check_punct(&TokenKind::Comma) {
                            self.bump();
                            continue;
                        }
                        break;
                    }
                }
                self.expect_punct(TokenKind::RBrack);
                Expr::Array { elements, span: Span::new(span.start, self.prev_span().end, self.file_id) }
            }
            TokenKind::Identifier(name) => {
                let mut segments = vec![name];
                self.bump();
                while self.check_punct(&TokenKind::ColonColon) {
                    self.bump();
                    segments.push(self.expect_identifier_text());
                }
                Expr::Path(segments, Span::new(span.start, self.prev_span().end, self.file_id))
            }
            _ => self.unexpected(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tea_lexer::Lexer;

    fn parse(src: &str) -> Program {
        let tokens = Lexer::new(src, 0).tokenize();
        Parser::new(tokens, 0).parse_program()
    }

    #[test]
    fn parses_function_with_if_while_for() {
        let program = parse(
            r#"
            public func main() -> int
                var total: int = 0;
                for (var i: int = 0; i < 10; i = i + 1) do
                    if (i == 5) do
                        continue;
                    elseif (i == 9) do
                        break;
                    else
                        total = total + i;
                    end
                end
                while (total > 1000) do
                    total = total - 1;
                end
                return total;
            end
            "#,
        );
        assert_eq!(program.items.len(), 1);
        match &program.items[0] {
            Item::Function { name, body, .. } => {
                assert_eq!(name, "main");
                assert_eq!(body.stmts.len(), 4);
                assert!(matches!(body.stmts[1], Stmt::For { .. }));
            }
            other => panic!("expected a function item, got {other:?}"),
        }
    }

    #[test]
    fn compound_assignment_from_adjacent_tokens() {
        let program = parse("public func f() -> int var x: int = 0; x += 1; return x; end");
        match &program.items[0] {
            Item::Function { body, .. } => {
                assert!(matches!(
                    body.stmts[1],
                    Stmt::Assign { op: Some(AssignOp::Add), .. }
                ));
            }
            other => panic!("expected a function item, got {other:?}"),
        }
    }

    #[test]
    fn expression_precedence_is_left_associative_and_ordered() {
        let program = parse("public func f() -> int return 1 + 2 * 3 == 7 && true; end");
        match &program.items[0] {
            Item::Function { body, .. } => match &body.stmts[0] {
                Stmt::Return { value: Some(Expr::Binary { op: BinOp::And, .. }), .. } => {}
                other => panic!("expected top-level && binary expr, got {other:?}"),
            },
            other => panic!("expected a function item, got {other:?}"),
        }
    }

    #[test]
    fn parses_pointer_and_array_type_syntax() {
        let program = parse("import func alloc(unsigned int n) -> const int * const;");
        match &program.items[0] {
            Item::FuncImport { return_type, .. } => {
                assert_eq!(return_type.name, "int");
                assert_eq!(return_type.pointer_const, vec![true]);
                assert!(return_type.is_const);
            }
            other => panic!("expected a func import item, got {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "unexpected token")]
    fn unexpected_token_panics() {
        parse("public garbage");
    }
}
