//! Recursive-descent statement parser with Pratt-style expression climbing,
//! lowering a token stream straight into a `doc::Doc`.
//!
//! Grounded on `script_doc.h`'s documented grammar and `script_reader.h`'s
//! error-recovery discipline: a parse error never aborts the pass. It's
//! recorded in the `DiagBag` and a `Value(null)` sentinel expression stands
//! in for the broken production, so one pass surfaces every mistake in a
//! script instead of just the first.

use std::collections::HashMap;

use crate::compiler::binder::Binder;
use crate::compiler::doc::{Doc, ExprId, VarId, MAX_VARS};
use crate::compiler::intrinsic::Intrinsic;
use crate::compiler::lex::{Lexer, Token, TokenKind};
use crate::diag::{DiagBag, DiagKind};
use crate::pos::Range;
use crate::sym::{RefKind, SymBag};
use crate::value::Value;

/// Expressions nested deeper than this raise `RecursionLimitExceeded`,
/// guarding the recursive-descent parser's native call stack.
const MAX_EXPR_DEPTH: u32 = 25;

fn mem_key_hash(name: &str) -> u32 {
    // FNV-1a; matches the interning scheme Compiler::compile uses for
    // literal string values, so a memory key and a string literal with the
    // same text hash identically.
    let mut h: u32 = 0x811c9dc5;
    for b in name.bytes() {
        h ^= b as u32;
        h = h.wrapping_mul(0x01000193);
    }
    h
}

pub struct ParseResult {
    pub doc: Doc,
    pub root: ExprId,
    pub diagnostics: DiagBag,
    pub symbols: SymBag,
}

pub fn parse(source: &str, binder: &Binder) -> ParseResult {
    let mut diagnostics = DiagBag::new();
    let tokens = {
        let mut opt = Some(&mut diagnostics);
        Lexer::new(source).tokenize(&mut opt)
    };
    let mut parser = Parser {
        tokens,
        pos: 0,
        doc: Doc::new(),
        diags: diagnostics,
        syms: SymBag::new(),
        binder,
        scopes: vec![HashMap::new()],
        scope_marks: Vec::new(),
        next_var: 0,
        loop_depth: 0,
        depth: 0,
    };
    let root = parser.parse_program();
    ParseResult { doc: parser.doc, root, diagnostics: parser.diags, symbols: parser.syms }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    doc: Doc,
    diags: DiagBag,
    syms: SymBag,
    binder: &'a Binder,
    scopes: Vec<HashMap<String, VarId>>,
    /// `next_var` as of each `push_scope`, restored on the matching
    /// `pop_scope` so the 16-variable cap measures concurrently live
    /// variables rather than the lifetime total across the whole program.
    scope_marks: Vec<VarId>,
    next_var: VarId,
    loop_depth: u32,
    depth: u32,
}

impl<'a> Parser<'a> {
    fn cur(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn cur_range(&self) -> Range {
        self.cur().range
    }

    fn at_eof(&self) -> bool {
        self.cur().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.cur().kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, diag: DiagKind) {
        if !self.eat(kind) {
            self.diags.push(diag, self.cur_range());
        }
    }

    fn sentinel(&mut self, range: Range) -> ExprId {
        self.doc.add_value(range, Value::null())
    }

    fn declare_var(&mut self, name: &str, range: Range) -> VarId {
        if self.next_var >= MAX_VARS {
            self.diags.push(DiagKind::TooManyVariablesInScope, range);
            return self.next_var.saturating_sub(1);
        }
        let id = self.next_var;
        self.next_var += 1;
        self.scopes.last_mut().unwrap().insert(name.to_string(), id);
        self.syms.push_var(range, name);
        id
    }

    fn resolve_var(&self, name: &str) -> Option<VarId> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name).copied())
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
        self.scope_marks.push(self.next_var);
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
        if let Some(mark) = self.scope_marks.pop() {
            self.next_var = mark;
        }
    }

    // ---- statements -----------------------------------------------------

    fn parse_program(&mut self) -> ExprId {
        let start = self.cur_range();
        let mut stmts = Vec::new();
        while !self.at_eof() {
            stmts.push(self.parse_stmt());
        }
        let end = if stmts.is_empty() { start } else { self.doc.range(*stmts.last().unwrap()) };
        self.doc.add_block(Range::combine(start, end), stmts)
    }

    fn parse_block(&mut self) -> ExprId {
        let start = self.cur_range();
        self.expect(&TokenKind::LBrace, DiagKind::UnexpectedToken);
        self.push_scope();
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.at_eof() {
            stmts.push(self.parse_stmt());
        }
        self.pop_scope();
        let end = self.cur_range();
        self.expect(&TokenKind::RBrace, DiagKind::UnclosedParen);
        self.doc.add_block(Range::combine(start, end), stmts)
    }

    fn parse_stmt(&mut self) -> ExprId {
        match &self.cur().kind {
            TokenKind::Var => self.parse_var_decl(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::LBrace => self.parse_block(),
            TokenKind::Continue => self.parse_loop_signal(Intrinsic::Continue, DiagKind::ContinueOutsideLoop),
            TokenKind::Break => self.parse_loop_signal(Intrinsic::Break, DiagKind::BreakOutsideLoop),
            TokenKind::Return => self.parse_return(),
            _ => {
                let expr = self.parse_expr();
                self.expect(&TokenKind::Semi, DiagKind::UnexpectedToken);
                expr
            }
        }
    }

    fn parse_var_decl(&mut self) -> ExprId {
        let start = self.cur_range();
        self.syms.push_keyword(start, "var");
        self.advance(); // 'var'
        let name = match self.advance().kind {
            TokenKind::Ident(n) => n,
            _ => {
                self.diags.push(DiagKind::MissingPrimaryExpression, start);
                String::new()
            }
        };
        self.expect(&TokenKind::Eq, DiagKind::UnexpectedToken);
        let value = self.parse_expr();
        self.expect(&TokenKind::Semi, DiagKind::UnexpectedToken);
        let var = self.declare_var(&name, start);
        let end = self.doc.range(value);
        self.doc.add_var_store(Range::combine(start, end), var, value)
    }

    fn parse_if(&mut self) -> ExprId {
        let start = self.cur_range();
        self.syms.push_keyword(start, "if");
        self.advance(); // 'if'
        self.expect(&TokenKind::LParen, DiagKind::UnexpectedToken);
        let cond = self.parse_expr();
        self.expect(&TokenKind::RParen, DiagKind::UnclosedParen);
        let then_branch = self.parse_block();
        let mut args = vec![cond, then_branch];
        let mut end = self.doc.range(then_branch);
        if self.eat(&TokenKind::Else) {
            let else_branch = if self.check(&TokenKind::If) { self.parse_if() } else { self.parse_block() };
            end = self.doc.range(else_branch);
            args.push(else_branch);
        }
        self.doc.add_intrinsic(Range::combine(start, end), Intrinsic::If, args)
    }

    fn parse_while(&mut self) -> ExprId {
        let start = self.cur_range();
        self.syms.push_keyword(start, "while");
        self.advance(); // 'while'
        self.expect(&TokenKind::LParen, DiagKind::UnexpectedToken);
        let cond = self.parse_expr();
        self.expect(&TokenKind::RParen, DiagKind::UnclosedParen);
        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;
        let end = self.doc.range(body);
        self.doc.add_intrinsic(Range::combine(start, end), Intrinsic::While, vec![cond, body])
    }

    fn parse_for(&mut self) -> ExprId {
        let start = self.cur_range();
        self.syms.push_keyword(start, "for");
        self.advance(); // 'for'
        self.expect(&TokenKind::LParen, DiagKind::UnexpectedToken);
        self.push_scope();
        let init = self.parse_stmt();
        let cond = self.parse_expr();
        self.expect(&TokenKind::Semi, DiagKind::UnexpectedToken);
        let step = self.parse_expr();
        self.expect(&TokenKind::RParen, DiagKind::UnclosedParen);
        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;
        self.pop_scope();
        let end = self.doc.range(body);
        self.doc.add_intrinsic(Range::combine(start, end), Intrinsic::For, vec![init, cond, step, body])
    }

    fn parse_loop_signal(&mut self, intrinsic: Intrinsic, out_of_loop: DiagKind) -> ExprId {
        let start = self.cur_range();
        self.syms.push_keyword(start, intrinsic.keyword());
        self.advance();
        if self.loop_depth == 0 {
            self.diags.push(out_of_loop, start);
        }
        self.expect(&TokenKind::Semi, DiagKind::UnexpectedToken);
        self.doc.add_intrinsic(start, intrinsic, vec![])
    }

    fn parse_return(&mut self) -> ExprId {
        let start = self.cur_range();
        self.syms.push_keyword(start, "return");
        self.advance();
        let args = if self.check(&TokenKind::Semi) { vec![] } else { vec![self.parse_expr()] };
        self.expect(&TokenKind::Semi, DiagKind::UnexpectedToken);
        self.doc.add_intrinsic(start, Intrinsic::Return, args)
    }

    // ---- expressions (precedence climbing) -------------------------------

    fn parse_expr(&mut self) -> ExprId {
        self.depth += 1;
        if self.depth > MAX_EXPR_DEPTH {
            self.diags.push(DiagKind::RecursionLimitExceeded, self.cur_range());
            self.depth -= 1;
            return self.sentinel(self.cur_range());
        }
        let result = self.parse_assignment();
        self.depth -= 1;
        result
    }

    fn parse_assignment(&mut self) -> ExprId {
        let start = self.cur_range();
        match self.cur().kind.clone() {
            TokenKind::Ident(name) if self.peek_assign_op().is_some() => {
                self.advance();
                let op = self.consume_assign_op();
                let rhs = self.parse_assignment();
                match self.resolve_var(&name) {
                    Some(var) => {
                        self.syms.push_ref(var as u32, start, RefKind::Write);
                        let value = match op {
                            Some(intr) => {
                                self.syms.push_ref(var as u32, start, RefKind::Read);
                                let lhs = self.doc.add_var_load(start, var);
                                self.doc.add_intrinsic(Range::combine(start, self.doc.range(rhs)), intr, vec![lhs, rhs])
                            }
                            None => rhs,
                        };
                        let end = self.doc.range(value);
                        self.doc.add_var_store(Range::combine(start, end), var, value)
                    }
                    None => {
                        self.diags.push(DiagKind::InvalidAssignmentTarget, start);
                        rhs
                    }
                }
            }
            TokenKind::MemoryKey(name) if self.peek_assign_op().is_some() => {
                self.advance();
                let op = self.consume_assign_op();
                let rhs = self.parse_assignment();
                let key = mem_key_hash(&name);
                let value = match op {
                    Some(intr) => {
                        let lhs = self.doc.add_mem_load(start, key);
                        self.doc.add_intrinsic(Range::combine(start, self.doc.range(rhs)), intr, vec![lhs, rhs])
                    }
                    None => rhs,
                };
                let end = self.doc.range(value);
                self.doc.add_mem_store(Range::combine(start, end), key, value)
            }
            _ => self.parse_null_coalesce(),
        }
    }

    /// `Some(None)` for plain `=`, `Some(Some(op))` for a compound form that
    /// desugars to `lhs = lhs op rhs` (evaluating `lhs` once, as a fresh
    /// load, never re-running any side effect the original reference had).
    fn peek_assign_op(&self) -> Option<Option<Intrinsic>> {
        match self.tokens.get(self.pos + 1).map(|t| &t.kind) {
            Some(TokenKind::Eq) => Some(None),
            Some(TokenKind::PlusEq) => Some(Some(Intrinsic::Add)),
            Some(TokenKind::MinusEq) => Some(Some(Intrinsic::Sub)),
            Some(TokenKind::StarEq) => Some(Some(Intrinsic::Mul)),
            Some(TokenKind::SlashEq) => Some(Some(Intrinsic::Div)),
            Some(TokenKind::PercentEq) => Some(Some(Intrinsic::Mod)),
            Some(TokenKind::QuestionQuestionEq) => Some(Some(Intrinsic::NullCoalesce)),
            _ => None,
        }
    }

    /// Consumes the assignment-operator token sitting at the current
    /// position (the identifier/memory-key has already been advanced past)
    /// and returns which compound op it was, if any.
    fn consume_assign_op(&mut self) -> Option<Intrinsic> {
        let op = match self.cur().kind {
            TokenKind::PlusEq => Some(Intrinsic::Add),
            TokenKind::MinusEq => Some(Intrinsic::Sub),
            TokenKind::StarEq => Some(Intrinsic::Mul),
            TokenKind::SlashEq => Some(Intrinsic::Div),
            TokenKind::PercentEq => Some(Intrinsic::Mod),
            TokenKind::QuestionQuestionEq => Some(Intrinsic::NullCoalesce),
            _ => None,
        };
        self.advance();
        op
    }

    fn parse_null_coalesce(&mut self) -> ExprId {
        let mut left = self.parse_logical_or();
        while self.eat(&TokenKind::QuestionQuestion) {
            let right = self.parse_logical_or();
            let range = Range::combine(self.doc.range(left), self.doc.range(right));
            left = self.doc.add_intrinsic(range, Intrinsic::NullCoalesce, vec![left, right]);
        }
        left
    }

    fn parse_logical_or(&mut self) -> ExprId {
        let mut left = self.parse_logical_and();
        while self.eat(&TokenKind::PipePipe) {
            let right = self.parse_logical_and();
            let range = Range::combine(self.doc.range(left), self.doc.range(right));
            left = self.doc.add_intrinsic(range, Intrinsic::LogicalOr, vec![left, right]);
        }
        left
    }

    fn parse_logical_and(&mut self) -> ExprId {
        let mut left = self.parse_equality();
        while self.eat(&TokenKind::AmpAmp) {
            let right = self.parse_equality();
            let range = Range::combine(self.doc.range(left), self.doc.range(right));
            left = self.doc.add_intrinsic(range, Intrinsic::LogicalAnd, vec![left, right]);
        }
        left
    }

    fn parse_equality(&mut self) -> ExprId {
        let mut left = self.parse_comparison();
        loop {
            let op = match self.cur().kind {
                TokenKind::EqEq => Intrinsic::Equal,
                TokenKind::BangEq => Intrinsic::NotEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison();
            let range = Range::combine(self.doc.range(left), self.doc.range(right));
            left = self.doc.add_intrinsic(range, op, vec![left, right]);
        }
        left
    }

    fn parse_comparison(&mut self) -> ExprId {
        let mut left = self.parse_additive();
        loop {
            let op = match self.cur().kind {
                TokenKind::Lt => Intrinsic::Less,
                TokenKind::LtEq => Intrinsic::LessOrEqual,
                TokenKind::Gt => Intrinsic::Greater,
                TokenKind::GtEq => Intrinsic::GreaterOrEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive();
            let range = Range::combine(self.doc.range(left), self.doc.range(right));
            left = self.doc.add_intrinsic(range, op, vec![left, right]);
        }
        left
    }

    fn parse_additive(&mut self) -> ExprId {
        let mut left = self.parse_multiplicative();
        loop {
            let op = match self.cur().kind {
                TokenKind::Plus => Intrinsic::Add,
                TokenKind::Minus => Intrinsic::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative();
            let range = Range::combine(self.doc.range(left), self.doc.range(right));
            left = self.doc.add_intrinsic(range, op, vec![left, right]);
        }
        left
    }

    fn parse_multiplicative(&mut self) -> ExprId {
        let mut left = self.parse_unary();
        loop {
            let op = match self.cur().kind {
                TokenKind::Star => Intrinsic::Mul,
                TokenKind::Slash => Intrinsic::Div,
                TokenKind::Percent => Intrinsic::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary();
            let range = Range::combine(self.doc.range(left), self.doc.range(right));
            left = self.doc.add_intrinsic(range, op, vec![left, right]);
        }
        left
    }

    fn parse_unary(&mut self) -> ExprId {
        let start = self.cur_range();
        match self.cur().kind {
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_unary();
                let range = Range::combine(start, self.doc.range(operand));
                self.doc.add_intrinsic(range, Intrinsic::Negate, vec![operand])
            }
            TokenKind::Bang => {
                self.advance();
                let operand = self.parse_unary();
                let range = Range::combine(start, self.doc.range(operand));
                self.doc.add_intrinsic(range, Intrinsic::Invert, vec![operand])
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> ExprId {
        let start = self.cur_range();
        match self.cur().kind.clone() {
            TokenKind::Number(n) => {
                self.advance();
                self.doc.add_value(start, Value::num(n))
            }
            TokenKind::String(s) => {
                self.advance();
                self.doc.add_value(start, Value::str_hash(mem_key_hash(&s)))
            }
            TokenKind::True => {
                self.advance();
                self.syms.push_builtin_const(start, "true");
                self.doc.add_value(start, Value::boolean(true))
            }
            TokenKind::False => {
                self.advance();
                self.syms.push_builtin_const(start, "false");
                self.doc.add_value(start, Value::boolean(false))
            }
            TokenKind::Null => {
                self.advance();
                self.syms.push_builtin_const(start, "null");
                self.doc.add_value(start, Value::null())
            }
            TokenKind::MemoryKey(name) => {
                self.advance();
                let key = mem_key_hash(&name);
                self.syms.push_mem_key(start, &name);
                self.doc.add_mem_load(start, key)
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr();
                self.expect(&TokenKind::RParen, DiagKind::UnclosedParen);
                inner
            }
            TokenKind::Ident(name) => {
                self.advance();
                if self.check(&TokenKind::LParen) {
                    self.parse_call(&name, start)
                } else if let Some(var) = self.resolve_var(&name) {
                    self.syms.push_ref(var as u32, start, RefKind::Read);
                    self.doc.add_var_load(start, var)
                } else {
                    self.diags.push(DiagKind::UnresolvedIdentifier, start);
                    self.sentinel(start)
                }
            }
            _ => {
                self.diags.push(DiagKind::MissingPrimaryExpression, start);
                self.advance();
                self.sentinel(start)
            }
        }
    }

    fn parse_call(&mut self, name: &str, start: Range) -> ExprId {
        self.advance(); // '('
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.parse_expr());
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        let end = self.cur_range();
        self.expect(&TokenKind::RParen, DiagKind::UnclosedParen);
        let range = Range::combine(start, end);

        if let Some(intrinsic) = Intrinsic::from_keyword(name) {
            if !intrinsic.is_control_flow() {
                let (min, max) = intrinsic.arity();
                let max = max.unwrap_or(args.len() as u8);
                if (args.len() as u8) < min || (args.len() as u8) > max {
                    self.diags.push(DiagKind::ArityMismatch, range);
                }
                return self.doc.add_intrinsic(range, intrinsic, args);
            }
        }
        match self.binder.lookup(name) {
            Some(slot) => {
                self.syms.push_extern_func(start, name);
                self.doc.add_extern(range, slot, args)
            }
            None => {
                self.diags.push(DiagKind::UnresolvedIdentifier, start);
                self.sentinel(range)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::doc::ExprData;

    #[test]
    fn parses_var_decl_and_arithmetic() {
        let binder = Binder::new();
        let result = parse("var x = 1 + 2 * 3;", &binder);
        assert!(!result.diagnostics.has_errors());
        match result.doc.data(result.root) {
            ExprData::Block(stmts) => assert_eq!(stmts.len(), 1),
            _ => panic!("expected block"),
        }
    }

    #[test]
    fn parses_if_else_and_memory_access() {
        let binder = Binder::new();
        let result = parse("if ($alive) { $score = 1; } else { $score = 0; }", &binder);
        assert!(!result.diagnostics.has_errors());
    }

    #[test]
    fn break_outside_loop_is_diagnosed() {
        let binder = Binder::new();
        let result = parse("break;", &binder);
        assert!(result.diagnostics.has_errors());
    }

    #[test]
    fn unresolved_identifier_is_diagnosed_but_parsing_continues() {
        let binder = Binder::new();
        let result = parse("var x = unknown_fn(1, 2);", &binder);
        assert!(result.diagnostics.has_errors());
        // still produced a root block despite the error
        assert!(result.doc.len() > 0);
    }

    #[test]
    fn while_loop_and_assignment_parse() {
        let binder = Binder::new();
        let result = parse("var i = 0; while (i < 10) { i = i + 1; }", &binder);
        assert!(!result.diagnostics.has_errors());
    }

    #[test]
    fn variable_cap_is_measured_per_concurrent_scope_not_program_lifetime() {
        // 17 variables total, but never more than one alive at a time: each
        // lives in its own disjoint block, so none of them should trip the
        // 16-variable-per-scope cap.
        let binder = Binder::new();
        let mut src = String::new();
        for i in 0..17 {
            src.push_str(&format!("{{ var v{i} = {i}; }}\n"));
        }
        let result = parse(&src, &binder);
        assert!(!result.diagnostics.has_errors(), "{:?}", result.diagnostics.diagnostics());
    }

    #[test]
    fn sixteen_concurrently_live_variables_in_one_scope_is_the_real_cap() {
        let binder = Binder::new();
        let mut src = String::new();
        for i in 0..17 {
            src.push_str(&format!("var v{i} = {i};\n"));
        }
        let result = parse(&src, &binder);
        assert!(result.diagnostics.has_errors());
    }
}
