//! Precedence-climbing expression parser plus recursive-descent statement
//! dispatch (spec §4.2, §4.3 "Statement lowering"). Builds the tree in
//! `ast.rs`; code generation happens in a separate pass (`codegen/`).
//!
//! Per spec §4.2 "Errors during tree construction are reported through the
//! diagnostic callback... parsing attempts to resynchronize at the next
//! semicolon", every statement-level parse wraps its body and, on error,
//! skips forward to the next `;` or matching `}` rather than aborting the
//! whole parse — unless the diagnostic budget has been exceeded, in which
//! case the caller (`compile`) unwinds entirely.

use crate::ast::*;
use crate::diagnostics::DiagnosticSink;
use crate::operators::BinOp;
use crate::token::{Keyword, Token, TokenKind};
use quill_core::ErrorKind;
use std::rc::Rc;

pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    diagnostics: &'a mut DiagnosticSink,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token], diagnostics: &'a mut DiagnosticSink) -> Self {
        Parser { tokens, pos: 0, diagnostics }
    }

    pub fn parse_program(&mut self) -> Program {
        let mut statements = Vec::new();
        while !self.at_eof() {
            if self.diagnostics.should_abort() {
                break;
            }
            statements.push(self.parse_statement());
        }
        Program { statements }
    }

    // --- token plumbing ---

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn line(&self) -> u32 {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    /// Lookahead past the current token without consuming anything — used
    /// to tell a `label:` from an ordinary identifier-led expression
    /// statement (spec §4.3 "`goto`/labels").
    fn peek_at(&self, offset: usize) -> &TokenKind {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].kind
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.tokens[self.pos.min(self.tokens.len() - 1)].kind.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) {
        if !self.eat(kind) {
            let line = self.line();
            self.diagnostics.emit(ErrorKind::Parse, line, format!("expected {what}, found {:?}", self.peek()));
        }
    }

    fn expect_keyword(&mut self, kw: Keyword, what: &str) {
        if matches!(self.peek(), TokenKind::Keyword(k) if *k == kw) {
            self.advance();
        } else {
            let line = self.line();
            self.diagnostics.emit(ErrorKind::Parse, line, format!("expected {what}"));
        }
    }

    fn ident(&mut self) -> Rc<str> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                name
            }
            other => {
                let line = self.line();
                self.diagnostics.emit(ErrorKind::Parse, line, format!("expected identifier, found {other:?}"));
                Rc::from("<error>")
            }
        }
    }

    fn variable_name(&mut self) -> Rc<str> {
        match self.peek().clone() {
            TokenKind::Variable(name) => {
                self.advance();
                name
            }
            other => {
                let line = self.line();
                self.diagnostics.emit(ErrorKind::Parse, line, format!("expected variable, found {other:?}"));
                Rc::from("<error>")
            }
        }
    }

    /// Resynchronize after a statement-level parse error: skip to the next
    /// top-level `;` or `}` (spec §4.2 "resynchronize at the next
    /// semicolon").
    fn resync(&mut self) {
        let mut depth: i32 = 0;
        loop {
            match self.peek() {
                TokenKind::Eof => return,
                TokenKind::LBrace => {
                    depth += 1;
                    self.advance();
                }
                TokenKind::RBrace => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    self.advance();
                }
                TokenKind::Semicolon if depth == 0 => {
                    self.advance();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    // --- statements ---

    fn parse_block(&mut self) -> Vec<Stmt> {
        self.expect(&TokenKind::LBrace, "'{'");
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.at_eof() {
            if self.diagnostics.should_abort() {
                break;
            }
            stmts.push(self.parse_statement());
        }
        self.expect(&TokenKind::RBrace, "'}'");
        stmts
    }

    fn parse_statement(&mut self) -> Stmt {
        let before_errors = self.diagnostics.error_count();
        let stmt = self.parse_statement_inner();
        if self.diagnostics.error_count() > before_errors {
            self.resync();
        }
        stmt
    }

    fn parse_statement_inner(&mut self) -> Stmt {
        let line = self.line();
        match self.peek().clone() {
            TokenKind::InlineHtml(text) => {
                self.advance();
                Stmt::InlineHtml(text)
            }
            TokenKind::LBrace => Stmt::Block(self.parse_block()),
            TokenKind::Semicolon => {
                self.advance();
                Stmt::Block(Vec::new())
            }
            TokenKind::Keyword(Keyword::Echo) => {
                self.advance();
                let mut values = vec![self.parse_expr()];
                while self.eat(&TokenKind::Comma) {
                    values.push(self.parse_expr());
                }
                self.expect(&TokenKind::Semicolon, "';'");
                Stmt::Echo(values)
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::Do) => self.parse_do_while(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::Foreach) => self.parse_foreach(),
            TokenKind::Keyword(Keyword::Switch) => self.parse_switch(),
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                let level = self.parse_optional_level();
                self.expect(&TokenKind::Semicolon, "';'");
                Stmt::Break { level, line }
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                let level = self.parse_optional_level();
                self.expect(&TokenKind::Semicolon, "';'");
                Stmt::Continue { level, line }
            }
            TokenKind::Keyword(Keyword::Goto) => {
                self.advance();
                let label = self.ident();
                self.expect(&TokenKind::Semicolon, "';'");
                Stmt::Goto { label, line }
            }
            TokenKind::Ident(name) if matches!(self.peek_at(1), TokenKind::Colon) => {
                self.advance();
                self.advance();
                Stmt::Label { name, line }
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                let value = if self.check(&TokenKind::Semicolon) { None } else { Some(self.parse_expr()) };
                self.expect(&TokenKind::Semicolon, "';'");
                Stmt::Return { value, line }
            }
            TokenKind::Keyword(Keyword::Exit) | TokenKind::Keyword(Keyword::Die) => {
                self.advance();
                let value = if self.eat(&TokenKind::LParen) {
                    let v = if self.check(&TokenKind::RParen) { None } else { Some(self.parse_expr()) };
                    self.expect(&TokenKind::RParen, "')'");
                    v
                } else {
                    None
                };
                self.expect(&TokenKind::Semicolon, "';'");
                Stmt::Return { value, line }
            }
            TokenKind::Keyword(Keyword::Throw) => {
                self.advance();
                let value = self.parse_expr();
                self.expect(&TokenKind::Semicolon, "';'");
                Stmt::Throw(value, line)
            }
            TokenKind::Keyword(Keyword::Try) => self.parse_try(),
            TokenKind::Keyword(Keyword::Global) => {
                self.advance();
                let mut names = vec![self.variable_name()];
                while self.eat(&TokenKind::Comma) {
                    names.push(self.variable_name());
                }
                self.expect(&TokenKind::Semicolon, "';'");
                Stmt::Global(names, line)
            }
            TokenKind::Keyword(Keyword::Static) => {
                self.advance();
                let mut decls = Vec::new();
                loop {
                    let name = self.variable_name();
                    let default = if self.eat(&TokenKind::Assign) { Some(self.parse_expr()) } else { None };
                    decls.push((name, default));
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::Semicolon, "';'");
                Stmt::StaticVar(decls, line)
            }
            TokenKind::Keyword(Keyword::Const) => {
                self.advance();
                let name = self.ident();
                self.expect(&TokenKind::Assign, "'='");
                let value = self.parse_expr();
                self.expect(&TokenKind::Semicolon, "';'");
                Stmt::Const(name, value, line)
            }
            TokenKind::Keyword(Keyword::Function) => Stmt::FunctionDecl(self.parse_function_decl()),
            TokenKind::Keyword(Keyword::Class) | TokenKind::Keyword(Keyword::Interface) => {
                Stmt::ClassDecl(self.parse_class_decl())
            }
            TokenKind::Keyword(Keyword::Abstract) | TokenKind::Keyword(Keyword::Final) => {
                Stmt::ClassDecl(self.parse_class_decl())
            }
            TokenKind::Keyword(Keyword::Namespace) => {
                self.advance();
                while !self.check(&TokenKind::Semicolon) && !self.check(&TokenKind::LBrace) && !self.at_eof() {
                    self.advance();
                }
                if self.check(&TokenKind::LBrace) {
                    self.parse_block();
                } else {
                    self.expect(&TokenKind::Semicolon, "';'");
                }
                self.diagnostics.emit(ErrorKind::Notice, line, "namespaces have no effect on symbol resolution");
                Stmt::Block(Vec::new())
            }
            TokenKind::Keyword(Keyword::Use) => {
                self.advance();
                while !self.check(&TokenKind::Semicolon) && !self.at_eof() {
                    self.advance();
                }
                self.expect(&TokenKind::Semicolon, "';'");
                self.diagnostics.emit(ErrorKind::Notice, line, "'use' imports have no effect on symbol resolution");
                Stmt::Block(Vec::new())
            }
            TokenKind::Keyword(Keyword::Declare) => {
                self.advance();
                self.expect(&TokenKind::LParen, "'('");
                while !self.check(&TokenKind::RParen) && !self.at_eof() {
                    self.advance();
                }
                self.expect(&TokenKind::RParen, "')'");
                if self.check(&TokenKind::LBrace) {
                    self.parse_block();
                } else {
                    self.expect(&TokenKind::Semicolon, "';'");
                }
                self.diagnostics.emit(ErrorKind::Notice, line, "'declare' is a no-op in this release");
                Stmt::Block(Vec::new())
            }
            _ => {
                let expr = self.parse_expr();
                self.expect(&TokenKind::Semicolon, "';'");
                Stmt::Expr(expr)
            }
        }
    }

    fn parse_optional_level(&mut self) -> u32 {
        if let TokenKind::Int(n) = self.peek() {
            let n = *n;
            self.advance();
            n.max(1) as u32
        } else {
            1
        }
    }

    fn parse_if(&mut self) -> Stmt {
        let line = self.line();
        self.advance();
        let mut arms = Vec::new();
        loop {
            self.expect(&TokenKind::LParen, "'('");
            let cond = self.parse_expr();
            self.expect(&TokenKind::RParen, "')'");
            let body = self.parse_block();
            arms.push((cond, body));
            if matches!(self.peek(), TokenKind::Keyword(Keyword::Elseif)) {
                self.advance();
                continue;
            }
            break;
        }
        let otherwise = if matches!(self.peek(), TokenKind::Keyword(Keyword::Else)) {
            self.advance();
            Some(self.parse_block())
        } else {
            None
        };
        Stmt::If { arms, otherwise, line }
    }

    fn parse_while(&mut self) -> Stmt {
        let line = self.line();
        self.advance();
        self.expect(&TokenKind::LParen, "'('");
        let cond = self.parse_expr();
        self.expect(&TokenKind::RParen, "')'");
        let body = self.parse_block();
        Stmt::While { cond, body, line }
    }

    fn parse_do_while(&mut self) -> Stmt {
        let line = self.line();
        self.advance();
        let body = self.parse_block();
        self.expect_keyword(Keyword::While, "'while'");
        self.expect(&TokenKind::LParen, "'('");
        let cond = self.parse_expr();
        self.expect(&TokenKind::RParen, "')'");
        self.expect(&TokenKind::Semicolon, "';'");
        Stmt::DoWhile { body, cond, line }
    }

    fn parse_for(&mut self) -> Stmt {
        let line = self.line();
        self.advance();
        self.expect(&TokenKind::LParen, "'('");
        let init = self.parse_expr_list_until(&TokenKind::Semicolon);
        self.expect(&TokenKind::Semicolon, "';'");
        let cond = if self.check(&TokenKind::Semicolon) { None } else { Some(self.parse_expr()) };
        self.expect(&TokenKind::Semicolon, "';'");
        let step = self.parse_expr_list_until(&TokenKind::RParen);
        self.expect(&TokenKind::RParen, "')'");
        let body = self.parse_block();
        Stmt::For { init, cond, step, body, line }
    }

    fn parse_expr_list_until(&mut self, stop: &TokenKind) -> Vec<Expr> {
        let mut exprs = Vec::new();
        if self.check(stop) {
            return exprs;
        }
        exprs.push(self.parse_expr());
        while self.eat(&TokenKind::Comma) {
            exprs.push(self.parse_expr());
        }
        exprs
    }

    fn parse_foreach(&mut self) -> Stmt {
        let line = self.line();
        self.advance();
        self.expect(&TokenKind::LParen, "'('");
        let array = self.parse_expr();
        self.expect_keyword(Keyword::As, "'as'");
        let mut by_ref = self.eat(&TokenKind::Amp);
        let first = self.variable_name();
        let (key_var, value_var) = if self.eat(&TokenKind::DoubleArrow) {
            by_ref = self.eat(&TokenKind::Amp);
            (Some(first), self.variable_name())
        } else {
            (None, first)
        };
        self.expect(&TokenKind::RParen, "')'");
        let body = self.parse_block();
        Stmt::Foreach { array, key_var, value_var, by_ref, body, line }
    }

    fn parse_switch(&mut self) -> Stmt {
        let line = self.line();
        self.advance();
        self.expect(&TokenKind::LParen, "'('");
        let subject = self.parse_expr();
        self.expect(&TokenKind::RParen, "')'");
        self.expect(&TokenKind::LBrace, "'{'");
        let mut cases = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.at_eof() {
            let test = if matches!(self.peek(), TokenKind::Keyword(Keyword::Default)) {
                self.advance();
                None
            } else {
                self.expect_keyword(Keyword::Case, "'case'");
                Some(self.parse_expr())
            };
            if !self.eat(&TokenKind::Colon) {
                self.expect(&TokenKind::Semicolon, "':'");
            }
            let mut body = Vec::new();
            while !matches!(self.peek(), TokenKind::Keyword(Keyword::Case) | TokenKind::Keyword(Keyword::Default))
                && !self.check(&TokenKind::RBrace)
                && !self.at_eof()
            {
                body.push(self.parse_statement());
            }
            cases.push(SwitchArm { test, body });
        }
        self.expect(&TokenKind::RBrace, "'}'");
        Stmt::Switch { subject, cases, line }
    }

    fn parse_try(&mut self) -> Stmt {
        let line = self.line();
        self.advance();
        let body = self.parse_block();
        let mut catches = Vec::new();
        while matches!(self.peek(), TokenKind::Keyword(Keyword::Catch)) {
            self.advance();
            self.expect(&TokenKind::LParen, "'('");
            let exception_class = self.ident();
            let var_name = self.variable_name();
            self.expect(&TokenKind::RParen, "')'");
            let catch_body = self.parse_block();
            catches.push(CatchArm { exception_class, var_name, body: catch_body });
        }
        if matches!(self.peek(), TokenKind::Keyword(Keyword::Finally)) {
            self.advance();
            self.diagnostics.emit(ErrorKind::Notice, line, "'finally' blocks are not modeled; the block still runs as a normal statement sequence after the try");
            let mut finally_body = self.parse_block();
            let mut full = body.clone();
            full.append(&mut finally_body);
            return Stmt::Try { body: full, catches, line };
        }
        Stmt::Try { body, catches, line }
    }

    fn parse_params(&mut self) -> Vec<Param> {
        self.expect(&TokenKind::LParen, "'('");
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) && !self.at_eof() {
            let declared_type = self.maybe_type_hint();
            let by_ref = self.eat(&TokenKind::Amp);
            // `...$name` variadic marker; the lexer has no dedicated token
            // for it, so it arrives as three consecutive `Dot`s.
            let variadic = if self.check(&TokenKind::Dot) {
                self.advance();
                self.eat(&TokenKind::Dot);
                self.eat(&TokenKind::Dot);
                true
            } else {
                false
            };
            let name = self.variable_name();
            let default = if self.eat(&TokenKind::Assign) { Some(self.parse_expr()) } else { None };
            params.push(Param { name, declared_type, by_ref, variadic, default });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "')'");
        params
    }

    fn maybe_type_hint(&mut self) -> Option<Rc<str>> {
        self.eat(&TokenKind::Question);
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                // Only consume if this really looks like `Type $var`, i.e.
                // the identifier is followed (possibly through `?`) by a
                // variable or `&`/`...` before the variable.
                let save = self.pos;
                self.advance();
                if matches!(self.peek(), TokenKind::Variable(_) | TokenKind::Amp | TokenKind::Dot) {
                    Some(name)
                } else {
                    self.pos = save;
                    None
                }
            }
            TokenKind::Keyword(Keyword::Array) => {
                self.advance();
                Some(Rc::from("array"))
            }
            _ => None,
        }
    }

    fn parse_function_decl(&mut self) -> FunctionDecl {
        let line = self.line();
        self.advance();
        self.eat(&TokenKind::Amp);
        let name = self.ident();
        let params = self.parse_params();
        let return_type = if self.eat(&TokenKind::Colon) { Some(self.ident()) } else { None };
        let body = self.parse_block();
        FunctionDecl { name, params, return_type, body, line }
    }

    fn parse_class_decl(&mut self) -> ClassDecl {
        let line = self.line();
        let mut is_abstract = false;
        let mut is_final = false;
        loop {
            match self.peek() {
                TokenKind::Keyword(Keyword::Abstract) => {
                    is_abstract = true;
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Final) => {
                    is_final = true;
                    self.advance();
                }
                _ => break,
            }
        }
        let is_interface = matches!(self.peek(), TokenKind::Keyword(Keyword::Interface));
        self.advance();
        let name = self.ident();
        let base = if matches!(self.peek(), TokenKind::Keyword(Keyword::Extends)) {
            self.advance();
            Some(self.ident())
        } else {
            None
        };
        let mut interfaces = Vec::new();
        if matches!(self.peek(), TokenKind::Keyword(Keyword::Implements)) {
            self.advance();
            interfaces.push(self.ident());
            while self.eat(&TokenKind::Comma) {
                interfaces.push(self.ident());
            }
        }
        self.expect(&TokenKind::LBrace, "'{'");
        let mut attrs = Vec::new();
        let mut methods = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.at_eof() {
            self.parse_class_member(&mut attrs, &mut methods);
        }
        self.expect(&TokenKind::RBrace, "'}'");
        ClassDecl { name, base, interfaces, is_abstract, is_final, is_interface, attrs, methods, line }
    }

    fn parse_class_member(&mut self, attrs: &mut Vec<AttrDecl>, methods: &mut Vec<MethodDecl>) {
        let line = self.line();
        let mut visibility = Visibility::Public;
        let mut is_static = false;
        let mut is_final = false;
        let mut is_abstract = false;
        let mut is_const = false;
        loop {
            match self.peek() {
                TokenKind::Keyword(Keyword::Public) => {
                    visibility = Visibility::Public;
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Protected) => {
                    visibility = Visibility::Protected;
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Private) => {
                    visibility = Visibility::Private;
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Static) => {
                    is_static = true;
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Final) => {
                    is_final = true;
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Abstract) => {
                    is_abstract = true;
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Const) => {
                    is_const = true;
                    self.advance();
                }
                _ => break,
            }
        }
        if matches!(self.peek(), TokenKind::Keyword(Keyword::Function)) {
            self.advance();
            self.eat(&TokenKind::Amp);
            let name = self.ident();
            let params = self.parse_params();
            let return_type = if self.eat(&TokenKind::Colon) { Some(self.ident()) } else { None };
            let body = if is_abstract || self.check(&TokenKind::Semicolon) {
                self.eat(&TokenKind::Semicolon);
                Vec::new()
            } else {
                self.parse_block()
            };
            methods.push(MethodDecl {
                def: FunctionDecl { name, params, return_type, body, line },
                visibility,
                is_static,
                is_final,
                is_abstract,
            });
            return;
        }
        if is_const {
            loop {
                let name = self.ident();
                self.expect(&TokenKind::Assign, "'='");
                let default = Some(self.parse_expr());
                attrs.push(AttrDecl { name, visibility, is_static: true, is_const: true, default, line });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::Semicolon, "';'");
            return;
        }
        self.maybe_type_hint();
        loop {
            let name = self.variable_name();
            let default = if self.eat(&TokenKind::Assign) { Some(self.parse_expr()) } else { None };
            attrs.push(AttrDecl { name, visibility, is_static, is_const: false, default, line });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::Semicolon, "';'");
    }

    // --- expressions ---

    pub fn parse_expr(&mut self) -> Expr {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Expr {
        let line = self.line();
        let lhs = self.parse_ternary();
        if self.eat(&TokenKind::Assign) {
            let by_ref = self.eat(&TokenKind::Amp);
            let value = self.parse_assignment();
            let value = if by_ref { Expr::Reference(Box::new(value), line) } else { value };
            return Expr::Assign { target: Box::new(lhs), value: Box::new(value), line };
        }
        if let Some(op) = self.peek_compound_assign() {
            self.advance();
            let value = self.parse_assignment();
            return Expr::CompoundAssign { op, target: Box::new(lhs), value: Box::new(value), line };
        }
        lhs
    }

    fn peek_compound_assign(&self) -> Option<BinOp> {
        Some(match self.peek() {
            TokenKind::PlusEq => BinOp::Add,
            TokenKind::MinusEq => BinOp::Sub,
            TokenKind::StarEq => BinOp::Mul,
            TokenKind::SlashEq => BinOp::Div,
            TokenKind::PercentEq => BinOp::Mod,
            TokenKind::DotEq => BinOp::Cat,
            TokenKind::AmpEq => BinOp::BitAnd,
            TokenKind::PipeEq => BinOp::BitOr,
            TokenKind::CaretEq => BinOp::BitXor,
            TokenKind::ShlEq => BinOp::Shl,
            TokenKind::ShrEq => BinOp::Shr,
            _ => return None,
        })
    }

    fn parse_ternary(&mut self) -> Expr {
        let line = self.line();
        let cond = self.parse_coalesce();
        if self.eat(&TokenKind::Question) {
            if self.eat(&TokenKind::Colon) {
                let otherwise = self.parse_assignment();
                return Expr::Ternary { cond: Box::new(cond), then: None, otherwise: Box::new(otherwise), line };
            }
            let then = self.parse_assignment();
            self.expect(&TokenKind::Colon, "':'");
            let otherwise = self.parse_assignment();
            return Expr::Ternary { cond: Box::new(cond), then: Some(Box::new(then)), otherwise: Box::new(otherwise), line };
        }
        cond
    }

    /// `??` — null-coalescing; lowered as a ternary over an `isset`-free
    /// "is this null" check, which for Quill's loose-typed values is just
    /// `lhs === null ? rhs : lhs`, compiled via a temp so `lhs` is only
    /// evaluated once.
    fn parse_coalesce(&mut self) -> Expr {
        let line = self.line();
        let left = self.parse_logical_or();
        if self.eat(&TokenKind::QuestionQuestion) {
            let right = self.parse_coalesce();
            return Expr::Binary { op: BinOp::Identical, lhs: Box::new(left.clone()), rhs: Box::new(Expr::Null), line }
                .pipe(|is_null| Expr::Ternary {
                    cond: Box::new(is_null),
                    then: Some(Box::new(right)),
                    otherwise: Box::new(left),
                    line,
                });
        }
        left
    }

    fn parse_logical_or(&mut self) -> Expr {
        let mut left = self.parse_logical_and();
        while self.check(&TokenKind::OrOr) {
            let line = self.line();
            self.advance();
            let right = self.parse_logical_and();
            left = Expr::Logical { op: LogicalOp::Or, lhs: Box::new(left), rhs: Box::new(right), line };
        }
        left
    }

    fn parse_logical_and(&mut self) -> Expr {
        let mut left = self.parse_binary(10);
        while self.check(&TokenKind::AndAnd) {
            let line = self.line();
            self.advance();
            let right = self.parse_binary(10);
            left = Expr::Logical { op: LogicalOp::And, lhs: Box::new(left), rhs: Box::new(right), line };
        }
        left
    }

    fn peek_binop(&self) -> Option<BinOp> {
        Some(match self.peek() {
            TokenKind::Plus => BinOp::Add,
            TokenKind::Minus => BinOp::Sub,
            TokenKind::Star => BinOp::Mul,
            TokenKind::Slash => BinOp::Div,
            TokenKind::Percent => BinOp::Mod,
            TokenKind::Dot => BinOp::Cat,
            TokenKind::Shl => BinOp::Shl,
            TokenKind::Shr => BinOp::Shr,
            TokenKind::Amp => BinOp::BitAnd,
            TokenKind::Pipe => BinOp::BitOr,
            TokenKind::Caret => BinOp::BitXor,
            TokenKind::Lt => BinOp::Lt,
            TokenKind::Le => BinOp::Le,
            TokenKind::Gt => BinOp::Gt,
            TokenKind::Ge => BinOp::Ge,
            TokenKind::Eq => BinOp::Eq,
            TokenKind::NotEq => BinOp::Neq,
            TokenKind::Identical => BinOp::Identical,
            TokenKind::NotIdentical => BinOp::NotIdentical,
            _ => return None,
        })
    }

    /// Standard precedence climbing: `max_prec` is the loosest (numerically
    /// highest) precedence this call will consume (spec §4.2 operator table
    /// "precedence (1 = highest)").
    fn parse_binary(&mut self, max_prec: u8) -> Expr {
        let mut left = self.parse_unary();
        loop {
            let Some(op) = self.peek_binop() else { break };
            if op.precedence() > max_prec {
                break;
            }
            let line = self.line();
            self.advance();
            let right = self.parse_binary(op.precedence() - 1);
            left = Expr::Binary { op, lhs: Box::new(left), rhs: Box::new(right), line };
        }
        left
    }

    fn parse_unary(&mut self) -> Expr {
        let line = self.line();
        match self.peek().clone() {
            TokenKind::Minus => {
                self.advance();
                Expr::Unary { op: UnaryOp::Neg, expr: Box::new(self.parse_unary()), line }
            }
            TokenKind::Plus => {
                self.advance();
                Expr::Unary { op: UnaryOp::Plus, expr: Box::new(self.parse_unary()), line }
            }
            TokenKind::Bang => {
                self.advance();
                Expr::Unary { op: UnaryOp::Not, expr: Box::new(self.parse_unary()), line }
            }
            TokenKind::Tilde => {
                self.advance();
                Expr::Unary { op: UnaryOp::BitNot, expr: Box::new(self.parse_unary()), line }
            }
            TokenKind::At => {
                self.advance();
                Expr::Suppress(Box::new(self.parse_unary()), line)
            }
            TokenKind::Incr => {
                self.advance();
                let target = self.parse_unary();
                Expr::IncDec { target: Box::new(target), op: IncDecOp::Incr, prefix: true, line }
            }
            TokenKind::Decr => {
                self.advance();
                let target = self.parse_unary();
                Expr::IncDec { target: Box::new(target), op: IncDecOp::Decr, prefix: true, line }
            }
            TokenKind::Keyword(Keyword::New) => self.parse_new(),
            TokenKind::Keyword(Keyword::Clone) => {
                self.advance();
                Expr::Clone(Box::new(self.parse_unary()), line)
            }
            _ => self.parse_instanceof(),
        }
    }

    fn parse_instanceof(&mut self) -> Expr {
        let line = self.line();
        let expr = self.parse_postfix();
        if matches!(self.peek(), TokenKind::Keyword(Keyword::InstanceOf)) {
            self.advance();
            let class_name = self.class_name_ref();
            return Expr::InstanceOf { expr: Box::new(expr), class_name, line };
        }
        expr
    }

    fn class_name_ref(&mut self) -> Rc<str> {
        match self.peek() {
            TokenKind::Keyword(Keyword::Self_) => {
                self.advance();
                Rc::from("self")
            }
            TokenKind::Keyword(Keyword::Parent) => {
                self.advance();
                Rc::from("parent")
            }
            _ => self.ident(),
        }
    }

    fn parse_new(&mut self) -> Expr {
        let line = self.line();
        self.advance();
        let class_name = self.class_name_ref();
        let args = if self.check(&TokenKind::LParen) { self.parse_args() } else { Vec::new() };
        Expr::New { class_name, args, line }
    }

    fn parse_args(&mut self) -> Vec<Arg> {
        self.expect(&TokenKind::LParen, "'('");
        let mut args = Vec::new();
        while !self.check(&TokenKind::RParen) && !self.at_eof() {
            let by_ref = self.eat(&TokenKind::Amp);
            args.push(Arg { value: self.parse_expr(), by_ref });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "')'");
        args
    }

    fn parse_postfix(&mut self) -> Expr {
        let mut expr = self.parse_primary();
        loop {
            let line = self.line();
            match self.peek() {
                TokenKind::LBracket => {
                    self.advance();
                    let index = if self.check(&TokenKind::RBracket) { None } else { Some(Box::new(self.parse_expr())) };
                    self.expect(&TokenKind::RBracket, "']'");
                    expr = Expr::Index { base: Box::new(expr), index, line };
                }
                TokenKind::Arrow => {
                    self.advance();
                    let name = self.ident();
                    if self.check(&TokenKind::LParen) {
                        let args = self.parse_args();
                        expr = Expr::MethodCall { receiver: Box::new(expr), method: name, args, line };
                    } else {
                        expr = Expr::Member { base: Box::new(expr), name, line };
                    }
                }
                TokenKind::LParen => {
                    let args = self.parse_args();
                    expr = Expr::Call { callee: Box::new(expr), args, line };
                }
                TokenKind::Incr => {
                    self.advance();
                    expr = Expr::IncDec { target: Box::new(expr), op: IncDecOp::Incr, prefix: false, line };
                }
                TokenKind::Decr => {
                    self.advance();
                    expr = Expr::IncDec { target: Box::new(expr), op: IncDecOp::Decr, prefix: false, line };
                }
                _ => break,
            }
        }
        expr
    }

    fn parse_primary(&mut self) -> Expr {
        let line = self.line();
        match self.peek().clone() {
            TokenKind::Int(n) => {
                self.advance();
                Expr::Int(n)
            }
            TokenKind::Real(f) => {
                self.advance();
                Expr::Real(f)
            }
            TokenKind::RawStr(s) => {
                self.advance();
                Expr::Str(s)
            }
            TokenKind::Str(s) => {
                self.advance();
                let parts = split_interpolation(&s);
                if parts.len() == 1 {
                    if let InterpPart::Literal(lit) = &parts[0] {
                        return Expr::Str(lit.clone());
                    }
                }
                Expr::Interpolated(parts)
            }
            TokenKind::Backtick => {
                self.advance();
                Expr::DisabledFeature
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Expr::Bool(true)
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Expr::Bool(false)
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Expr::Null
            }
            TokenKind::Keyword(Keyword::This) => {
                self.advance();
                Expr::Variable(Rc::from("this"))
            }
            TokenKind::Variable(name) => {
                self.advance();
                Expr::Variable(name)
            }
            TokenKind::Amp => {
                self.advance();
                Expr::Reference(Box::new(self.parse_unary()), line)
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr();
                self.expect(&TokenKind::RParen, "')'");
                inner
            }
            TokenKind::LBracket => self.parse_array_literal(),
            TokenKind::Keyword(Keyword::Array) => {
                self.advance();
                self.parse_array_literal_body()
            }
            TokenKind::Keyword(Keyword::List) => {
                self.advance();
                self.parse_array_literal_body()
            }
            TokenKind::Keyword(Keyword::Function) => self.parse_closure(),
            TokenKind::Keyword(Keyword::New) => self.parse_new(),
            TokenKind::Keyword(Keyword::Clone) => {
                self.advance();
                Expr::Clone(Box::new(self.parse_unary()), line)
            }
            TokenKind::Keyword(Keyword::Self_) | TokenKind::Keyword(Keyword::Parent) | TokenKind::Ident(_) => {
                self.parse_name_led_primary()
            }
            other => {
                self.diagnostics.emit(ErrorKind::Parse, line, format!("unexpected token {other:?}"));
                self.advance();
                Expr::Null
            }
        }
    }

    /// Handles plain identifiers (bare function-name calls) and the
    /// `Class::member` static-access family, which needs a class name on
    /// the left rather than a general expression (spec §4.2 "static-access
    /// `::`").
    fn parse_name_led_primary(&mut self) -> Expr {
        let line = self.line();
        let name = self.class_name_ref();
        if self.eat(&TokenKind::DoubleColon) {
            return match self.peek().clone() {
                TokenKind::Variable(prop) => {
                    self.advance();
                    Expr::StaticProp { class_name: name, name: prop, line }
                }
                TokenKind::Ident(member) => {
                    self.advance();
                    if self.check(&TokenKind::LParen) {
                        let args = self.parse_args();
                        Expr::StaticCall { class_name: name, method: member, args, line }
                    } else {
                        Expr::ClassConst { class_name: name, name: member, line }
                    }
                }
                other => {
                    self.diagnostics.emit(ErrorKind::Parse, line, format!("expected member after '::', found {other:?}"));
                    Expr::Null
                }
            };
        }
        Expr::Name(name)
    }

    fn parse_array_literal(&mut self) -> Expr {
        self.advance();
        let mut entries = Vec::new();
        while !self.check(&TokenKind::RBracket) && !self.at_eof() {
            entries.push(self.parse_array_entry());
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBracket, "']'");
        Expr::ArrayLit(entries)
    }

    fn parse_array_literal_body(&mut self) -> Expr {
        self.expect(&TokenKind::LParen, "'('");
        let mut entries = Vec::new();
        while !self.check(&TokenKind::RParen) && !self.at_eof() {
            entries.push(self.parse_array_entry());
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "')'");
        Expr::ArrayLit(entries)
    }

    fn parse_array_entry(&mut self) -> ArrayEntry {
        let by_ref = self.eat(&TokenKind::Amp);
        let first = self.parse_expr();
        if self.eat(&TokenKind::DoubleArrow) {
            let by_ref = self.eat(&TokenKind::Amp);
            let value = self.parse_expr();
            ArrayEntry { key: Some(first), value, by_ref }
        } else {
            ArrayEntry { key: None, value: first, by_ref }
        }
    }

    fn parse_closure(&mut self) -> Expr {
        let line = self.line();
        self.advance();
        self.eat(&TokenKind::Amp);
        let params = self.parse_params();
        let mut uses = Vec::new();
        if matches!(self.peek(), TokenKind::Keyword(Keyword::Use)) {
            self.advance();
            self.expect(&TokenKind::LParen, "'('");
            while !self.check(&TokenKind::RParen) && !self.at_eof() {
                let by_ref = self.eat(&TokenKind::Amp);
                let name = self.variable_name();
                uses.push((name, by_ref));
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen, "')'");
        }
        if self.eat(&TokenKind::Colon) {
            self.ident();
        }
        let body = self.parse_block();
        Expr::Closure { params, uses, body, line }
    }
}

/// Split a double-quoted string body on `$identifier` occurrences (spec
/// §4.1/§4.3: interpolation is the compiler's job). `${expr}`/`{$expr}`
/// complex interpolation is not supported; a literal `$` not followed by an
/// identifier is kept as-is.
fn split_interpolation(raw: &str) -> Vec<InterpPart> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = raw.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c == '$' {
            let rest = &raw[chars.peek().map(|(i, _)| *i).unwrap_or(raw.len())..];
            let ident_len = rest.chars().take_while(|c| c.is_alphanumeric() || *c == '_').count();
            if ident_len > 0 {
                if !literal.is_empty() {
                    parts.push(InterpPart::Literal(Rc::from(literal.as_str())));
                    literal = String::new();
                }
                let name: String = rest.chars().take(ident_len).collect();
                for _ in 0..ident_len {
                    chars.next();
                }
                parts.push(InterpPart::Variable(Rc::from(name.as_str())));
                continue;
            }
        }
        literal.push(c);
    }
    if !literal.is_empty() || parts.is_empty() {
        parts.push(InterpPart::Literal(Rc::from(literal.as_str())));
    }
    parts
}

trait Pipe: Sized {
    fn pipe<R>(self, f: impl FnOnce(Self) -> R) -> R {
        f(self)
    }
}
impl<T> Pipe for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(src: &str) -> (Program, DiagnosticSink) {
        let mut diags = DiagnosticSink::new(15);
        let tokens = Lexer::new(src).tokenize(&mut diags);
        let program = Parser::new(&tokens, &mut diags).parse_program();
        (program, diags)
    }

    #[test]
    fn parses_arithmetic_with_correct_precedence() {
        let (program, diags) = parse("$x = 2 + 3 * 4;");
        assert!(!diags.has_errors());
        assert_eq!(program.statements.len(), 1);
        let Stmt::Expr(Expr::Assign { value, .. }) = &program.statements[0] else { panic!() };
        let Expr::Binary { op: BinOp::Add, rhs, .. } = value.as_ref() else { panic!("expected +") };
        assert!(matches!(rhs.as_ref(), Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn parses_if_elseif_else_chain() {
        let (program, diags) = parse("if ($x) { } elseif ($y) { } else { }");
        assert!(!diags.has_errors());
        let Stmt::If { arms, otherwise, .. } = &program.statements[0] else { panic!() };
        assert_eq!(arms.len(), 2);
        assert!(otherwise.is_some());
    }

    #[test]
    fn parses_foreach_with_key_and_by_ref_value() {
        let (program, diags) = parse("foreach ($items as $k => &$v) { }");
        assert!(!diags.has_errors());
        let Stmt::Foreach { key_var, value_var, by_ref, .. } = &program.statements[0] else { panic!() };
        assert_eq!(key_var.as_deref(), Some("k"));
        assert_eq!(value_var.as_ref(), "v");
        assert!(by_ref);
    }

    #[test]
    fn parse_error_resyncs_and_keeps_parsing_the_next_statement() {
        let (program, diags) = parse("$x = ;\n$y = 1;");
        assert!(diags.has_errors());
        assert_eq!(program.statements.len(), 2);
    }

    #[test]
    fn double_quoted_interpolation_splits_on_variable_names() {
        let (program, _diags) = parse("$s = \"hello $name!\";");
        let Stmt::Expr(Expr::Assign { value, .. }) = &program.statements[0] else { panic!() };
        let Expr::Interpolated(parts) = value.as_ref() else { panic!("expected interpolation") };
        assert!(matches!(&parts[0], InterpPart::Literal(s) if &**s == "hello "));
        assert!(matches!(&parts[1], InterpPart::Variable(s) if &**s == "name"));
    }
}
