//! Recursive-descent parser producing the `ast` tree from a token stream.
//!
//! Mirrors the `ParseExprN` precedence ladder of the reference parser
//! (assignment, then ternary, then `||`, `&&`, `^`, `|`, `&`, equality,
//! relational, shift, additive, multiplicative, unary, postfix, primary)
//! but drives it with single-token lookahead over a pre-lexed `Vec` rather
//! than the reference's save/restore-one-token scanner.

use crate::ast::*;
use crate::error::CompileError;
use crate::token::{Span, Token};

pub struct Parser<'a> {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    source: &'a str,
    errors: Vec<CompileError>,
}

type PResult<T> = Result<T, ()>;

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<(Token, Span)>, source: &'a str) -> Self {
        // Statements are terminated by `;`, not by newlines, so blank
        // end-of-line markers never reach the grammar below.
        let tokens = tokens.into_iter().filter(|(t, _)| *t != Token::Eol).collect();
        Self { tokens, pos: 0, source, errors: Vec::new() }
    }

    pub fn parse_program(mut self) -> Result<Program, Vec<CompileError>> {
        let mut decls = Vec::new();
        while !self.at_eof() {
            match self.parse_decl() {
                Ok(d) => decls.push(d),
                Err(()) => self.resynchronize_decl(),
            }
        }
        if self.errors.is_empty() {
            Ok(Program { decls })
        } else {
            Err(self.errors)
        }
    }

    // ---- token stream plumbing ----

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    fn peek_span(&self) -> Span {
        self.tokens[self.pos].1
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn advance(&mut self) -> (Token, Span) {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, tok: &Token) -> bool {
        self.peek() == tok
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.check(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Token) -> PResult<Span> {
        if self.check(tok) {
            Ok(self.advance().1)
        } else {
            let found = self.peek().describe();
            let span = self.peek_span();
            self.errors.push(CompileError::Syntax { found, expected: format!("`{tok:?}`"), span });
            Err(())
        }
    }

    fn expect_punct(&mut self, byte: u8) -> PResult<Span> {
        self.expect(&Token::Punct(byte))
    }

    fn expect_identifier(&mut self) -> PResult<(String, Span)> {
        match self.peek().clone() {
            Token::Identifier(name) => {
                let span = self.advance().1;
                Ok((name, span))
            }
            _ => {
                let found = self.peek().describe();
                let span = self.peek_span();
                self.errors.push(CompileError::Syntax { found, expected: "identifier".to_string(), span });
                Err(())
            }
        }
    }

    /// After a bad declaration, skip to the next token that plausibly
    /// starts a new top-level declaration so one error doesn't cascade
    /// into spurious follow-on errors for the rest of the file. Always
    /// advances at least once so a failure that left the cursor sitting
    /// on a recovery keyword can't spin forever.
    fn resynchronize_decl(&mut self) {
        if matches!(self.peek(), Token::Punct(b';')) {
            self.advance();
            return;
        }
        self.advance();
        loop {
            match self.peek() {
                Token::Eof => return,
                Token::Def | Token::Var | Token::Object | Token::Byte | Token::Property => return,
                Token::Punct(b';') => {
                    self.advance();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn resynchronize_stmt(&mut self) {
        if matches!(self.peek(), Token::Eof | Token::Punct(b'}')) {
            return;
        }
        if matches!(self.peek(), Token::Punct(b';')) {
            self.advance();
            return;
        }
        self.advance();
        loop {
            match self.peek() {
                Token::Eof | Token::Punct(b'}') => return,
                Token::Punct(b';') => {
                    self.advance();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    // ---- declarations ----

    fn parse_decl(&mut self) -> PResult<Decl> {
        match self.peek().clone() {
            Token::Def => self.parse_def(),
            Token::Var => self.parse_global(),
            Token::Byte => self.parse_byte_global(),
            Token::Property => self.parse_property_reserve(),
            Token::Object => {
                self.advance();
                // `object NAME { ... }` (classless) or `object CLASS NAME
                // { ... }` (the keyword is just an optional marker; a
                // second identifier before `{` means the first was a
                // class, not the object's own name).
                let (first, _) = self.expect_identifier()?;
                if matches!(self.peek(), Token::Identifier(_)) {
                    let (name, _) = self.expect_identifier()?;
                    self.parse_object(Some(first), name)
                } else {
                    self.parse_object(None, first)
                }
            }
            Token::Identifier(_) => {
                // `CLASS NAME { ... }` with no `object` keyword at all.
                let (class_name, _) = self.expect_identifier()?;
                let (name, _) = self.expect_identifier()?;
                self.parse_object(Some(class_name), name)
            }
            _ => {
                let found = self.peek().describe();
                let span = self.peek_span();
                self.errors.push(CompileError::Syntax { found, expected: "a declaration".to_string(), span });
                Err(())
            }
        }
    }

    fn parse_def(&mut self) -> PResult<Decl> {
        let start = self.expect(&Token::Def)?;
        let (name, _) = self.expect_identifier()?;
        if self.eat(&Token::Punct(b'=')) {
            let value = self.parse_expr()?;
            let end = self.expect_punct(b';')?;
            Ok(Decl::Const { name, value, span: start.to(end) })
        } else {
            self.expect_punct(b'(')?;
            let params = self.parse_ident_list_until(b')')?;
            let fd = self.parse_function_body(name, params, false, start)?;
            Ok(Decl::Function(fd))
        }
    }

    fn parse_global(&mut self) -> PResult<Decl> {
        let start = self.expect(&Token::Var)?;
        let mut bindings = Vec::new();
        loop {
            let (name, _) = self.expect_identifier()?;
            let init = if self.eat(&Token::Punct(b'=')) { Some(self.parse_expr()?) } else { None };
            bindings.push((name, init));
            if !self.eat(&Token::Punct(b',')) {
                break;
            }
        }
        let end = self.expect_punct(b';')?;
        Ok(Decl::Global { bindings, span: start.to(end) })
    }

    fn parse_byte_global(&mut self) -> PResult<Decl> {
        let start = self.expect(&Token::Byte)?;
        let (name, _) = self.expect_identifier()?;
        let size = if self.eat(&Token::Punct(b'[')) {
            let e = self.parse_expr()?;
            self.expect_punct(b']')?;
            Some(e)
        } else {
            None
        };
        let init = if self.eat(&Token::Punct(b'=')) {
            match self.peek().clone() {
                Token::String(bytes) => {
                    self.advance();
                    ByteInit::FromString(bytes)
                }
                _ => {
                    let found = self.peek().describe();
                    let span = self.peek_span();
                    self.errors.push(CompileError::Syntax {
                        found,
                        expected: "string literal".to_string(),
                        span,
                    });
                    return Err(());
                }
            }
        } else {
            ByteInit::None
        };
        let end = self.expect_punct(b';')?;
        Ok(Decl::ByteGlobal { name, size, init, span: start.to(end) })
    }

    fn parse_property_reserve(&mut self) -> PResult<Decl> {
        let start = self.expect(&Token::Property)?;
        let mut names = Vec::new();
        let (first, _) = self.expect_identifier()?;
        names.push(first);
        while self.eat(&Token::Punct(b',')) {
            let (n, _) = self.expect_identifier()?;
            names.push(n);
        }
        let end = self.expect_punct(b';')?;
        Ok(Decl::PropertyReserve { names, span: start.to(end) })
    }

    fn parse_object(&mut self, class_name: Option<String>, name: String) -> PResult<Decl> {
        let start = self.peek_span();
        self.expect_punct(b'{')?;
        let mut members = Vec::new();
        while !self.check(&Token::Punct(b'}')) {
            members.push(self.parse_object_member()?);
        }
        let end = self.expect_punct(b'}')?;
        // A top-level object declaration may be followed by a bare `;`,
        // tolerated as an empty statement between declarations.
        self.eat(&Token::Punct(b';'));
        Ok(Decl::Object(ObjectDef { class_name, name, members, span: start.to(end) }))
    }

    /// `[ shared ] NAME : VALUE-OR-METHOD ;` where `VALUE-OR-METHOD` is
    /// either `method ( ARGS ) { BODY }` (anonymous — `NAME` to the left of
    /// the colon is the property tag, not a separate function name) or a
    /// constant expression.
    fn parse_object_member(&mut self) -> PResult<ObjectMember> {
        let start = self.peek_span();
        let shared = self.eat(&Token::Shared);
        let (tag_name, _) = self.expect_identifier()?;
        self.expect_punct(b':')?;
        if self.eat(&Token::Method) {
            self.expect_punct(b'(')?;
            let params = self.parse_ident_list_until(b')')?;
            let fd = self.parse_function_body(tag_name.clone(), params, true, start)?;
            let end = self.expect_punct(b';')?;
            Ok(ObjectMember { shared, tag_name, value: MemberValue::Method(fd), span: start.to(end) })
        } else {
            let value = self.parse_expr()?;
            let end = self.expect_punct(b';')?;
            Ok(ObjectMember { shared, tag_name, value: MemberValue::Const(value), span: start.to(end) })
        }
    }

    /// Comma-separated identifiers up to (and consuming) the closing
    /// punctuation byte; an immediately-closed list is empty.
    fn parse_ident_list_until(&mut self, close: u8) -> PResult<Vec<String>> {
        let mut names = Vec::new();
        if self.eat(&Token::Punct(close)) {
            return Ok(names);
        }
        loop {
            let (n, _) = self.expect_identifier()?;
            names.push(n);
            if !self.eat(&Token::Punct(b',')) {
                break;
            }
        }
        self.expect_punct(close)?;
        Ok(names)
    }

    fn parse_function_body(
        &mut self,
        name: String,
        params: Vec<String>,
        is_method: bool,
        start: Span,
    ) -> PResult<FunctionDef> {
        self.expect_punct(b'{')?;
        let mut locals = Vec::new();
        while self.eat(&Token::Var) {
            loop {
                let (n, _) = self.expect_identifier()?;
                let init = if self.eat(&Token::Punct(b'=')) { Some(self.parse_expr()?) } else { None };
                locals.push(LocalDecl { name: n, init });
                if !self.eat(&Token::Punct(b',')) {
                    break;
                }
            }
            self.expect_punct(b';')?;
        }
        let mut body = Vec::new();
        while !self.check(&Token::Punct(b'}')) {
            match self.parse_stmt() {
                Ok(s) => body.push(s),
                Err(()) => self.resynchronize_stmt(),
            }
        }
        let end = self.expect_punct(b'}')?;
        Ok(FunctionDef { name, params, locals, body, span: start.to(end), is_method })
    }

    // ---- statements ----

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        match self.peek().clone() {
            Token::If => self.parse_if(),
            Token::While => self.parse_while(),
            Token::Do => self.parse_do_while(),
            Token::For => self.parse_for(),
            Token::Break => {
                let span = self.advance().1;
                let end = self.expect_punct(b';')?;
                Ok(Stmt::Break(span.to(end)))
            }
            Token::Continue => {
                let span = self.advance().1;
                let end = self.expect_punct(b';')?;
                Ok(Stmt::Continue(span.to(end)))
            }
            Token::Return => {
                let start = self.advance().1;
                if self.eat(&Token::Punct(b';')) {
                    Ok(Stmt::Return(None, start))
                } else {
                    let e = self.parse_expr()?;
                    let end = self.expect_punct(b';')?;
                    Ok(Stmt::Return(Some(e), start.to(end)))
                }
            }
            Token::Print => self.parse_print(false),
            Token::Println => self.parse_print(true),
            Token::Try => self.parse_try(),
            Token::Throw => {
                let start = self.advance().1;
                let e = self.parse_expr()?;
                let end = self.expect_punct(b';')?;
                Ok(Stmt::Throw(e, start.to(end)))
            }
            Token::Asm => self.parse_asm(),
            Token::Punct(b'{') => self.parse_block(),
            Token::Punct(b';') => {
                self.advance();
                Ok(Stmt::Empty)
            }
            _ => {
                let e = self.parse_expr()?;
                self.expect_punct(b';')?;
                Ok(Stmt::Expr(e))
            }
        }
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        self.advance();
        self.expect_punct(b'(')?;
        let cond = self.parse_expr()?;
        self.expect_punct(b')')?;
        let then_branch = Box::new(self.parse_stmt()?);
        let else_branch =
            if self.eat(&Token::Else) { Some(Box::new(self.parse_stmt()?)) } else { None };
        Ok(Stmt::If { cond, then_branch, else_branch })
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        self.advance();
        self.expect_punct(b'(')?;
        let cond = self.parse_expr()?;
        self.expect_punct(b')')?;
        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::While { cond, body })
    }

    fn parse_do_while(&mut self) -> PResult<Stmt> {
        self.advance();
        let body = Box::new(self.parse_stmt()?);
        self.expect(&Token::While)?;
        self.expect_punct(b'(')?;
        let cond = self.parse_expr()?;
        self.expect_punct(b')')?;
        self.expect_punct(b';')?;
        Ok(Stmt::DoWhile { body, cond })
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        self.advance();
        self.expect_punct(b'(')?;
        let init = if self.check(&Token::Punct(b';')) {
            None
        } else if self.eat(&Token::Var) {
            let mut decls = Vec::new();
            loop {
                let (n, _) = self.expect_identifier()?;
                let init = if self.eat(&Token::Punct(b'=')) { Some(self.parse_expr()?) } else { None };
                decls.push(LocalDecl { name: n, init });
                if !self.eat(&Token::Punct(b',')) {
                    break;
                }
            }
            Some(ForInit::VarDecl(decls))
        } else {
            Some(ForInit::Expr(self.parse_expr()?))
        };
        self.expect_punct(b';')?;
        let cond = if self.check(&Token::Punct(b';')) { None } else { Some(self.parse_expr()?) };
        self.expect_punct(b';')?;
        let step = if self.check(&Token::Punct(b')')) { None } else { Some(self.parse_expr()?) };
        self.expect_punct(b')')?;
        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::For { init, cond, step, body })
    }

    fn parse_block(&mut self) -> PResult<Stmt> {
        self.advance();
        let mut stmts = Vec::new();
        while !self.check(&Token::Punct(b'}')) {
            match self.parse_stmt() {
                Ok(s) => stmts.push(s),
                Err(()) => self.resynchronize_stmt(),
            }
        }
        self.expect_punct(b'}')?;
        Ok(Stmt::Block(stmts))
    }

    /// `print`/`println` take a run of comma-or-`$`-separated items until
    /// `;`. A bare `,` emits a tab and, for `print`, marks the statement as
    /// not needing its default trailing newline; a bare `$` does the same
    /// without emitting anything. `println` always appends the newline.
    fn parse_print(&mut self, is_println: bool) -> PResult<Stmt> {
        let start = self.advance().1;
        let mut items = Vec::new();
        let mut needs_newline = true;
        loop {
            if self.check(&Token::Punct(b';')) {
                break;
            }
            if self.eat(&Token::Punct(b',')) {
                needs_newline = false;
                items.push(PrintItem::Tab);
                continue;
            }
            if self.eat(&Token::Punct(b'$')) {
                needs_newline = false;
                continue;
            }
            needs_newline = true;
            let e = self.parse_expr()?;
            items.push(PrintItem::Value(e));
        }
        let end = self.expect_punct(b';')?;
        let newline = is_println || needs_newline;
        Ok(Stmt::Print { items, newline, span: start.to(end) })
    }

    fn parse_try(&mut self) -> PResult<Stmt> {
        let start = self.advance().1;
        let body = Box::new(self.parse_stmt()?);
        let catch = if self.eat(&Token::Catch) {
            self.expect_punct(b'(')?;
            let (name, _) = self.expect_identifier()?;
            self.expect_punct(b')')?;
            Some((name, Box::new(self.parse_stmt()?)))
        } else {
            None
        };
        let finally = if self.eat(&Token::Finally) { Some(Box::new(self.parse_stmt()?)) } else { None };
        if catch.is_none() && finally.is_none() {
            let span = self.peek_span();
            self.errors.push(CompileError::Syntax {
                found: self.peek().describe(),
                expected: "`catch` or `finally`".to_string(),
                span,
            });
            return Err(());
        }
        Ok(Stmt::Try { body, catch, finally, span: start })
    }

    /// `asm { line; line; ... }`. Lines are raw text sliced out of the
    /// source between `{` and `}` and split on `;` — the inline assembler
    /// parses each line's own mnemonic grammar independently, so this
    /// layer only needs to find line boundaries.
    fn parse_asm(&mut self) -> PResult<Stmt> {
        let start = self.advance().1;
        let open = self.expect_punct(b'{')?;
        let depth_start = self.pos;
        let mut depth = 1i32;
        while depth > 0 {
            match self.peek() {
                Token::Punct(b'{') => depth += 1,
                Token::Punct(b'}') => depth -= 1,
                Token::Eof => {
                    self.errors.push(CompileError::AsmError {
                        reason: "unterminated asm block".to_string(),
                        span: open,
                    });
                    return Err(());
                }
                _ => {}
            }
            if depth > 0 {
                self.advance();
            }
        }
        let close = self.peek_span();
        self.advance();
        let body_start = self.tokens[depth_start].1.start;
        let body_end = close.start;
        let text = &self.source[body_start..body_end];
        let mut lines = Vec::new();
        let mut offset = body_start;
        for raw_line in text.split(';') {
            let trimmed = raw_line.trim();
            if !trimmed.is_empty() {
                let line_start = offset + raw_line.find(trimmed).unwrap_or(0);
                let span = Span::new(line_start, line_start + trimmed.len(), open.line, open.column);
                lines.push((trimmed.to_string(), span));
            }
            offset += raw_line.len() + 1;
        }
        Ok(Stmt::Asm { lines, span: start.to(close) })
    }

    // ---- expressions ----

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        let target = self.parse_ternary()?;
        let op = match self.peek() {
            Token::Punct(b'=') => Some(AssignOp::Assign),
            Token::PlusEq => Some(AssignOp::Add),
            Token::MinusEq => Some(AssignOp::Sub),
            Token::StarEq => Some(AssignOp::Mul),
            Token::SlashEq => Some(AssignOp::Div),
            Token::PercentEq => Some(AssignOp::Rem),
            Token::AndEq => Some(AssignOp::BitAnd),
            Token::OrEq => Some(AssignOp::BitOr),
            Token::CaretEq => Some(AssignOp::BitXor),
            Token::ShlEq => Some(AssignOp::Shl),
            Token::ShrEq => Some(AssignOp::Shr),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let value = self.parse_assignment()?;
                let span = target.span().to(value.span());
                Ok(Expr::Assign { op, target: Box::new(target), value: Box::new(value), span })
            }
            None => Ok(target),
        }
    }

    fn parse_ternary(&mut self) -> PResult<Expr> {
        let cond = self.parse_logical_or()?;
        if self.eat(&Token::Punct(b'?')) {
            let then_expr = self.parse_assignment()?;
            self.expect_punct(b':')?;
            let else_expr = self.parse_assignment()?;
            let span = cond.span().to(else_expr.span());
            Ok(Expr::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
                span,
            })
        } else {
            Ok(cond)
        }
    }

    fn parse_logical_or(&mut self) -> PResult<Expr> {
        let first = self.parse_logical_and()?;
        if self.check(&Token::OrOr) {
            let start = first.span();
            let mut terms = vec![first];
            while self.eat(&Token::OrOr) {
                terms.push(self.parse_logical_and()?);
            }
            let end = terms.last().unwrap().span();
            Ok(Expr::LogicalOr(terms, start.to(end)))
        } else {
            Ok(first)
        }
    }

    fn parse_logical_and(&mut self) -> PResult<Expr> {
        let first = self.parse_bitxor()?;
        if self.check(&Token::AndAnd) {
            let start = first.span();
            let mut terms = vec![first];
            while self.eat(&Token::AndAnd) {
                terms.push(self.parse_bitxor()?);
            }
            let end = terms.last().unwrap().span();
            Ok(Expr::LogicalAnd(terms, start.to(end)))
        } else {
            Ok(first)
        }
    }

    fn parse_bitxor(&mut self) -> PResult<Expr> {
        let mut node = self.parse_bitor()?;
        while self.check(&Token::Punct(b'^')) {
            self.advance();
            let rhs = self.parse_bitor()?;
            node = fold_or_binop(BinOp::BitXor, node, rhs);
        }
        Ok(node)
    }

    fn parse_bitor(&mut self) -> PResult<Expr> {
        let mut node = self.parse_bitand()?;
        while self.check(&Token::Punct(b'|')) {
            self.advance();
            let rhs = self.parse_bitand()?;
            node = fold_or_binop(BinOp::BitOr, node, rhs);
        }
        Ok(node)
    }

    fn parse_bitand(&mut self) -> PResult<Expr> {
        let mut node = self.parse_equality()?;
        while self.check(&Token::Punct(b'&')) {
            self.advance();
            let rhs = self.parse_equality()?;
            node = fold_or_binop(BinOp::BitAnd, node, rhs);
        }
        Ok(node)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut node = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinOp::Eq,
                Token::Ne => BinOp::Ne,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_relational()?;
            node = make_binop(op, node, rhs);
        }
        Ok(node)
    }

    fn parse_relational(&mut self) -> PResult<Expr> {
        let mut node = self.parse_shift()?;
        loop {
            let op = match self.peek() {
                Token::Punct(b'<') => BinOp::Lt,
                Token::Le => BinOp::Le,
                Token::Ge => BinOp::Ge,
                Token::Punct(b'>') => BinOp::Gt,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_shift()?;
            node = make_binop(op, node, rhs);
        }
        Ok(node)
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        let mut node = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Shl => BinOp::Shl,
                Token::Shr => BinOp::Shr,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive()?;
            node = fold_or_binop(op, node, rhs);
        }
        Ok(node)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut node = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Punct(b'+') => BinOp::Add,
                Token::Punct(b'-') => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            node = fold_or_binop(op, node, rhs);
        }
        Ok(node)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut node = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Punct(b'*') => BinOp::Mul,
                Token::Punct(b'/') => BinOp::Div,
                Token::Punct(b'%') => BinOp::Rem,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            let literals = match (&node, &rhs) {
                (Expr::Number(a, sa), Expr::Number(b, sb)) => Some((*a, *sa, *b, *sb)),
                _ => None,
            };
            node = match literals {
                Some((a, sa, b, sb)) => {
                    let span = sa.to(sb);
                    match op {
                        BinOp::Mul => Expr::Number(a.wrapping_mul(b), span),
                        BinOp::Div if b != 0 => Expr::Number(a.wrapping_div(b), span),
                        BinOp::Rem if b != 0 => Expr::Number(a.wrapping_rem(b), span),
                        BinOp::Div | BinOp::Rem => {
                            self.errors.push(CompileError::ConstantDivideByZero { span });
                            Expr::Number(0, span)
                        }
                        _ => make_binop(op, node, rhs),
                    }
                }
                None => make_binop(op, node, rhs),
            };
        }
        Ok(node)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        match self.peek().clone() {
            Token::Punct(b'+') => {
                self.advance();
                self.parse_primary_chain()
            }
            Token::Punct(b'-') => {
                let start = self.advance().1;
                let inner = self.parse_primary_chain()?;
                Ok(match inner {
                    Expr::Number(n, s) => Expr::Number(n.wrapping_neg(), start.to(s)),
                    other => {
                        let span = start.to(other.span());
                        Expr::Unary { op: UnOp::Neg, expr: Box::new(other), span }
                    }
                })
            }
            Token::Punct(b'!') => {
                let start = self.advance().1;
                let inner = self.parse_primary_chain()?;
                Ok(match inner {
                    Expr::Number(n, s) => Expr::Number(i32::from(n == 0), start.to(s)),
                    other => {
                        let span = start.to(other.span());
                        Expr::Unary { op: UnOp::Not, expr: Box::new(other), span }
                    }
                })
            }
            Token::Punct(b'~') => {
                let start = self.advance().1;
                let inner = self.parse_primary_chain()?;
                Ok(match inner {
                    Expr::Number(n, s) => Expr::Number(!n, start.to(s)),
                    other => {
                        let span = start.to(other.span());
                        Expr::Unary { op: UnOp::BitNot, expr: Box::new(other), span }
                    }
                })
            }
            Token::PlusPlus => {
                let start = self.advance().1;
                let target = self.parse_primary_chain()?;
                let span = start.to(target.span());
                Ok(Expr::PreIncDec { inc: true, target: Box::new(target), span })
            }
            Token::MinusMinus => {
                let start = self.advance().1;
                let target = self.parse_primary_chain()?;
                let span = start.to(target.span());
                Ok(Expr::PreIncDec { inc: false, target: Box::new(target), span })
            }
            _ => self.parse_primary_chain(),
        }
    }

    /// Primary plus postfix chain: indexing, calls, property access, and
    /// post-increment/decrement, all left-associative.
    fn parse_primary_chain(&mut self) -> PResult<Expr> {
        let mut node = self.parse_simple_primary()?;
        loop {
            match self.peek().clone() {
                Token::Punct(b'[') => {
                    self.advance();
                    let index = self.parse_expr()?;
                    let end = self.expect_punct(b']')?;
                    let span = node.span().to(end);
                    node = Expr::Index { base: Box::new(node), index: Box::new(index), span };
                }
                Token::Punct(b'(') => {
                    self.advance();
                    let (args, end) = self.parse_arg_list_until(b')')?;
                    let span = node.span().to(end);
                    node = Expr::Call { callee: Box::new(node), args, span };
                }
                Token::Punct(b'.') => {
                    self.advance();
                    let tag_end = self.peek_span();
                    let tag = self.parse_property_tag()?;
                    let span = node.span().to(tag_end);
                    node = Expr::PropertyRef { object: Box::new(node), tag, span };
                }
                Token::PlusPlus => {
                    let span = node.span().to(self.peek_span());
                    self.advance();
                    node = Expr::PostIncDec { inc: true, target: Box::new(node), span };
                }
                Token::MinusMinus => {
                    let span = node.span().to(self.peek_span());
                    self.advance();
                    node = Expr::PostIncDec { inc: false, target: Box::new(node), span };
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn parse_property_tag(&mut self) -> PResult<Selector> {
        match self.peek().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(Selector::Name(name))
            }
            _ => {
                let e = self.parse_simple_primary()?;
                Ok(Selector::Expr(Box::new(e)))
            }
        }
    }

    /// Arguments to a call: already past the opening `(`; consumes and
    /// returns the span of the closing punctuation.
    fn parse_arg_list_until(&mut self, close: u8) -> PResult<(Vec<Expr>, Span)> {
        let mut args = Vec::new();
        if let Some(span) = self.eat_span(&Token::Punct(close)) {
            return Ok((args, span));
        }
        loop {
            args.push(self.parse_expr()?);
            if !self.eat(&Token::Punct(b',')) {
                break;
            }
        }
        let end = self.expect_punct(close)?;
        Ok((args, end))
    }

    fn eat_span(&mut self, tok: &Token) -> Option<Span> {
        if self.check(tok) { Some(self.advance().1) } else { None }
    }

    fn parse_simple_primary(&mut self) -> PResult<Expr> {
        match self.peek().clone() {
            Token::Punct(b'(') => {
                self.advance();
                let e = self.parse_expr()?;
                self.expect_punct(b')')?;
                Ok(e)
            }
            Token::Punct(b'[') => self.parse_send(),
            Token::Number(n) => {
                let span = self.advance().1;
                Ok(Expr::Number(n, span))
            }
            Token::String(bytes) => {
                let span = self.advance().1;
                Ok(Expr::Str(bytes, span))
            }
            Token::Identifier(name) => {
                let span = self.advance().1;
                Ok(Expr::Ident(name, span))
            }
            _ => {
                let found = self.peek().describe();
                let span = self.peek_span();
                self.errors.push(CompileError::Syntax {
                    found,
                    expected: "a primary expression".to_string(),
                    span,
                });
                Err(())
            }
        }
    }

    /// `[ object selector args... ]`, already past the opening `[`.
    /// `[super selector args...]` dispatches starting at the superclass of
    /// the enclosing method's object.
    fn parse_send(&mut self) -> PResult<Expr> {
        let start = self.expect_punct(b'[')?;
        let object = if self.eat(&Token::Super) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        let selector = Box::new(self.parse_expr()?);
        let mut args = Vec::new();
        if !self.check(&Token::Punct(b']')) {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat(&Token::Punct(b',')) {
                    break;
                }
            }
        }
        let end = self.expect_punct(b']')?;
        Ok(Expr::Send { object, selector, args, span: start.to(end) })
    }
}

fn make_binop(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    let span = lhs.span().to(rhs.span());
    Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), span }
}

/// Constant-fold integer-literal operands at parse time, matching the
/// reference parser's `IsIntegerLit` checks; otherwise emit a runtime node.
fn fold_or_binop(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    let literals = match (&lhs, &rhs) {
        (Expr::Number(a, sa), Expr::Number(b, sb)) => Some((*a, *sa, *b, *sb)),
        _ => None,
    };
    if let Some((a, sa, b, sb)) = literals {
        let span = sa.to(sb);
        let folded = match op {
            BinOp::BitAnd => Some(a & b),
            BinOp::BitOr => Some(a | b),
            BinOp::BitXor => Some(a ^ b),
            BinOp::Shl => Some(a.wrapping_shl(b as u32)),
            BinOp::Shr => Some(a.wrapping_shr(b as u32)),
            BinOp::Add => Some(a.wrapping_add(b)),
            BinOp::Sub => Some(a.wrapping_sub(b)),
            _ => None,
        };
        if let Some(v) = folded {
            return Expr::Number(v, span);
        }
    }
    make_binop(op, lhs, rhs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(src: &str) -> Program {
        let tokens = Lexer::new(src).tokenize().expect("lex");
        Parser::new(tokens, src).parse_program().expect("parse")
    }

    #[test]
    fn parses_constant_and_function() {
        let prog = parse("def N = 3 + 4; def main() { return N; }");
        assert_eq!(prog.decls.len(), 2);
        match &prog.decls[0] {
            Decl::Const { name, value: Expr::Number(7, _), .. } => assert_eq!(name, "N"),
            other => panic!("unexpected decl: {other:?}"),
        }
    }

    #[test]
    fn parses_object_with_shared_property_and_method() {
        let prog = parse(
            r#"
            object room1 {
                shared desc: "a room";
                look: method() { print self.desc; };
            }
            "#,
        );
        match &prog.decls[0] {
            Decl::Object(obj) => {
                assert_eq!(obj.name, "room1");
                assert!(obj.class_name.is_none());
                assert_eq!(obj.members.len(), 2);
                assert!(obj.members[0].shared);
            }
            other => panic!("unexpected decl: {other:?}"),
        }
    }

    #[test]
    fn parses_subclass_object() {
        let prog = parse("object base { x: 1; } base derived { y: 2; }");
        match &prog.decls[1] {
            Decl::Object(obj) => assert_eq!(obj.class_name.as_deref(), Some("base")),
            other => panic!("unexpected decl: {other:?}"),
        }
    }

    #[test]
    fn parses_send_and_super() {
        let prog = parse("def main() { [self look]; [super look 1, 2]; }");
        match &prog.decls[0] {
            Decl::Function(fd) => {
                assert_eq!(fd.body.len(), 2);
                if let Stmt::Expr(Expr::Send { object, .. }) = &fd.body[0] {
                    assert!(object.is_some());
                } else {
                    panic!("expected send");
                }
                if let Stmt::Expr(Expr::Send { object, args, .. }) = &fd.body[1] {
                    assert!(object.is_none());
                    assert_eq!(args.len(), 2);
                } else {
                    panic!("expected super send");
                }
            }
            other => panic!("unexpected decl: {other:?}"),
        }
    }

    #[test]
    fn print_comma_suppresses_default_newline() {
        let prog = parse(r#"def main() { print "caught", e; }"#);
        match &prog.decls[0] {
            Decl::Function(fd) => match &fd.body[0] {
                Stmt::Print { items, newline, .. } => {
                    assert_eq!(items.len(), 3);
                    assert!(newline);
                }
                other => panic!("unexpected stmt: {other:?}"),
            },
            other => panic!("unexpected decl: {other:?}"),
        }
    }

    #[test]
    fn print_dollar_suppresses_trailing_newline() {
        let prog = parse(r#"def main() { print "no newline" $; }"#);
        match &prog.decls[0] {
            Decl::Function(fd) => match &fd.body[0] {
                Stmt::Print { newline, .. } => assert!(!newline),
                other => panic!("unexpected stmt: {other:?}"),
            },
            other => panic!("unexpected decl: {other:?}"),
        }
    }

    #[test]
    fn println_always_forces_newline() {
        let prog = parse(r#"def main() { println "x" $; }"#);
        match &prog.decls[0] {
            Decl::Function(fd) => match &fd.body[0] {
                Stmt::Print { newline, .. } => assert!(newline),
                other => panic!("unexpected stmt: {other:?}"),
            },
            other => panic!("unexpected decl: {other:?}"),
        }
    }

    #[test]
    fn for_loop_with_inline_var_decl() {
        let prog = parse("def main() { for (var i = 0; i < 10; i = i + 1) print i; }");
        match &prog.decls[0] {
            Decl::Function(fd) => match &fd.body[0] {
                Stmt::For { init: Some(ForInit::VarDecl(decls)), .. } => {
                    assert_eq!(decls.len(), 1);
                    assert_eq!(decls[0].name, "i");
                }
                other => panic!("unexpected stmt: {other:?}"),
            },
            other => panic!("unexpected decl: {other:?}"),
        }
    }

    #[test]
    fn try_catch_finally() {
        let prog = parse(
            "def main() { try { throw 1; } catch (e) { print e; } finally { print 0; } }",
        );
        match &prog.decls[0] {
            Decl::Function(fd) => match &fd.body[0] {
                Stmt::Try { catch: Some((name, _)), finally: Some(_), .. } => assert_eq!(name, "e"),
                other => panic!("unexpected stmt: {other:?}"),
            },
            other => panic!("unexpected decl: {other:?}"),
        }
    }

    #[test]
    fn asm_block_captures_raw_lines() {
        let prog = parse("def main() { asm { lit 1; add; } }");
        match &prog.decls[0] {
            Decl::Function(fd) => match &fd.body[0] {
                Stmt::Asm { lines, .. } => {
                    assert_eq!(lines.len(), 2);
                    assert_eq!(lines[0].0, "lit 1");
                    assert_eq!(lines[1].0, "add");
                }
                other => panic!("unexpected stmt: {other:?}"),
            },
            other => panic!("unexpected decl: {other:?}"),
        }
    }

    #[test]
    fn ternary_and_assignment_are_right_associative() {
        let prog = parse("def main() { var a, b; a = b = 1 ? 2 : 3; }");
        match &prog.decls[0] {
            Decl::Function(fd) => match &fd.body[0] {
                Stmt::Expr(Expr::Assign { target, value, .. }) => {
                    assert!(matches!(**target, Expr::Ident(ref n, _) if n == "a"));
                    assert!(matches!(**value, Expr::Assign { .. }));
                }
                other => panic!("unexpected stmt: {other:?}"),
            },
            other => panic!("unexpected decl: {other:?}"),
        }
    }

    #[test]
    fn constant_folds_additive_and_multiplicative_literals() {
        let prog = parse("def N = 2 * 3 + 4; ");
        match &prog.decls[0] {
            Decl::Const { value: Expr::Number(10, _), .. } => {}
            other => panic!("unexpected decl: {other:?}"),
        }
    }

    #[test]
    fn byte_global_with_string_initializer() {
        let prog = parse(r#"byte greeting[16] = "hi";"#);
        match &prog.decls[0] {
            Decl::ByteGlobal { name, size: Some(_), init: ByteInit::FromString(bytes), .. } => {
                assert_eq!(name, "greeting");
                assert_eq!(bytes, b"hi");
            }
            other => panic!("unexpected decl: {other:?}"),
        }
    }

    #[test]
    fn property_reserve_declaration() {
        let prog = parse("property north, south, east, west;");
        match &prog.decls[0] {
            Decl::PropertyReserve { names, .. } => assert_eq!(names.len(), 4),
            other => panic!("unexpected decl: {other:?}"),
        }
    }

    #[test]
    fn syntax_error_is_reported_not_panicked() {
        let tokens = Lexer::new("def main( { }").tokenize().unwrap();
        let errors = Parser::new(tokens, "def main( { }").parse_program().unwrap_err();
        assert!(!errors.is_empty());
    }
}
