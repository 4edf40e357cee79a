// Parser: token stream -> AST.
// Recursive descent for statements, Pratt precedence climbing for
// expressions. Errors are recorded against the offending token and the
// parser resynchronizes at statement boundaries, so one pass can report
// many problems. Always returns a Program.

use smol_str::SmolStr;

use super::ast::*;
use super::lexer::{Lexer, Token, TokenKind, TokenValue};
use crate::lua_vm::{LuaError, SourceLocation};

/// Left/right binding powers for binary operators, Lua precedence ladder.
/// Concat and pow bind tighter on the left than the right (right-assoc).
fn binop_priority(op: BinOp) -> (u8, u8) {
    match op {
        BinOp::Or => (1, 1),
        BinOp::And => (2, 2),
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Ne | BinOp::Eq => (3, 3),
        BinOp::BOr => (4, 4),
        BinOp::BXor => (5, 5),
        BinOp::BAnd => (6, 6),
        BinOp::Shl | BinOp::Shr => (7, 7),
        BinOp::Concat => (9, 8),
        BinOp::Add | BinOp::Sub => (10, 10),
        BinOp::Mul | BinOp::Div | BinOp::IDiv | BinOp::Mod => (11, 11),
        BinOp::Pow => (14, 13),
    }
}

const UNARY_PRIORITY: u8 = 12;

fn token_to_binop(kind: TokenKind) -> Option<BinOp> {
    let op = match kind {
        TokenKind::TkPlus => BinOp::Add,
        TokenKind::TkMinus => BinOp::Sub,
        TokenKind::TkMul => BinOp::Mul,
        TokenKind::TkDiv => BinOp::Div,
        TokenKind::TkIDiv => BinOp::IDiv,
        TokenKind::TkMod => BinOp::Mod,
        TokenKind::TkPow => BinOp::Pow,
        TokenKind::TkConcat => BinOp::Concat,
        TokenKind::TkEq => BinOp::Eq,
        TokenKind::TkNe => BinOp::Ne,
        TokenKind::TkLt => BinOp::Lt,
        TokenKind::TkLe => BinOp::Le,
        TokenKind::TkGt => BinOp::Gt,
        TokenKind::TkGe => BinOp::Ge,
        TokenKind::TkAnd => BinOp::And,
        TokenKind::TkOr => BinOp::Or,
        TokenKind::TkBitAnd => BinOp::BAnd,
        TokenKind::TkBitOr => BinOp::BOr,
        TokenKind::TkBitXor => BinOp::BXor,
        TokenKind::TkShl => BinOp::Shl,
        TokenKind::TkShr => BinOp::Shr,
        _ => return None,
    };
    Some(op)
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    errors: Vec<LuaError>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str, chunk_name: &str) -> Self {
        let mut lexer = Lexer::new(source, chunk_name);
        let current = lexer.next_token();
        Parser {
            lexer,
            current,
            errors: Vec::new(),
        }
    }

    /// Parse the whole chunk. Never fails: syntax errors are collected on
    /// the returned Program.
    pub fn parse(mut self) -> Program {
        let block = self.parse_block();
        if self.current.kind != TokenKind::TkEof {
            self.error_here(format!("'<eof>' expected near {}", self.current.describe()));
        }
        let mut errors = self.lexer.take_errors();
        errors.append(&mut self.errors);
        Program { block, errors }
    }

    // ---- token plumbing ----

    #[inline]
    fn advance(&mut self) -> Token {
        std::mem::replace(&mut self.current, self.lexer.next_token())
    }

    #[inline]
    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn accept(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> bool {
        if self.accept(kind) {
            true
        } else {
            self.error_here(format!(
                "{} expected near {}",
                kind.describe(),
                self.current.describe()
            ));
            false
        }
    }

    fn span_here(&self) -> Span {
        Span::new(self.current.line, self.current.column)
    }

    fn location_here(&self) -> SourceLocation {
        SourceLocation::new(
            self.lexer.chunk_name().clone(),
            self.current.line,
            self.current.column,
        )
    }

    fn error_here(&mut self, message: String) {
        let location = self.location_here();
        self.errors.push(LuaError::syntax(message, location));
    }

    /// Skip ahead to a likely statement boundary after an error.
    fn resync(&mut self) {
        loop {
            match self.current.kind {
                TokenKind::TkSemicolon => {
                    self.advance();
                    return;
                }
                TokenKind::TkEnd
                | TokenKind::TkElse
                | TokenKind::TkElseIf
                | TokenKind::TkUntil
                | TokenKind::TkEof
                | TokenKind::TkLocal
                | TokenKind::TkIf
                | TokenKind::TkWhile
                | TokenKind::TkFor
                | TokenKind::TkFunction
                | TokenKind::TkReturn
                | TokenKind::TkRepeat => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn expect_name(&mut self) -> Option<SmolStr> {
        if self.check(TokenKind::TkName) {
            let tok = self.advance();
            match tok.value {
                TokenValue::Name(n) => Some(n),
                _ => None,
            }
        } else {
            self.error_here(format!(
                "<name> expected near {}",
                self.current.describe()
            ));
            None
        }
    }

    // ---- statements ----

    fn block_follow(&self, with_until: bool) -> bool {
        match self.current.kind {
            TokenKind::TkElse | TokenKind::TkElseIf | TokenKind::TkEnd | TokenKind::TkEof => true,
            TokenKind::TkUntil => with_until,
            _ => false,
        }
    }

    fn parse_block(&mut self) -> Block {
        let mut stats = Vec::new();
        while !self.block_follow(true) {
            if self.check(TokenKind::TkReturn) {
                stats.push(self.parse_return());
                break; // return must be the last statement
            }
            match self.parse_statement() {
                Some(stat) => stats.push(stat),
                None => {}
            }
        }
        Block { stats }
    }

    fn parse_statement(&mut self) -> Option<Stat> {
        let span = self.span_here();
        match self.current.kind {
            TokenKind::TkSemicolon => {
                self.advance();
                None
            }
            TokenKind::TkIf => Some(self.parse_if(span)),
            TokenKind::TkWhile => Some(self.parse_while(span)),
            TokenKind::TkDo => {
                self.advance();
                let body = self.parse_block();
                self.expect(TokenKind::TkEnd);
                Some(Stat::Do(body, span))
            }
            TokenKind::TkFor => Some(self.parse_for(span)),
            TokenKind::TkRepeat => Some(self.parse_repeat(span)),
            TokenKind::TkFunction => Some(self.parse_function_decl(span)),
            TokenKind::TkLocal => {
                self.advance();
                if self.accept(TokenKind::TkFunction) {
                    Some(self.parse_local_function(span))
                } else {
                    Some(self.parse_local(span))
                }
            }
            TokenKind::TkDbColon => {
                self.advance();
                let name = self.expect_name()?;
                self.expect(TokenKind::TkDbColon);
                Some(Stat::Label(name, span))
            }
            TokenKind::TkBreak => {
                self.advance();
                Some(Stat::Break(span))
            }
            TokenKind::TkGoto => {
                self.advance();
                let name = self.expect_name()?;
                Some(Stat::Goto(name, span))
            }
            _ => self.parse_expr_statement(span),
        }
    }

    fn parse_if(&mut self, span: Span) -> Stat {
        self.advance(); // if
        let mut arms = Vec::new();
        let cond = self.parse_expression();
        self.expect(TokenKind::TkThen);
        arms.push((cond, self.parse_block()));
        while self.check(TokenKind::TkElseIf) {
            self.advance();
            let cond = self.parse_expression();
            self.expect(TokenKind::TkThen);
            arms.push((cond, self.parse_block()));
        }
        let else_block = if self.accept(TokenKind::TkElse) {
            Some(self.parse_block())
        } else {
            None
        };
        self.expect(TokenKind::TkEnd);
        Stat::If {
            arms,
            else_block,
            span,
        }
    }

    fn parse_while(&mut self, span: Span) -> Stat {
        self.advance(); // while
        let condition = self.parse_expression();
        self.expect(TokenKind::TkDo);
        let body = self.parse_block();
        self.expect(TokenKind::TkEnd);
        Stat::While {
            condition,
            body,
            span,
        }
    }

    fn parse_repeat(&mut self, span: Span) -> Stat {
        self.advance(); // repeat
        let body = self.parse_block();
        self.expect(TokenKind::TkUntil);
        // The until condition sees the repeat body's locals; the code
        // generator keeps that scope open across it
        let condition = self.parse_expression();
        Stat::Repeat {
            body,
            condition,
            span,
        }
    }

    fn parse_for(&mut self, span: Span) -> Stat {
        self.advance(); // for
        let Some(first) = self.expect_name() else {
            self.resync();
            return Stat::Do(Block::default(), span);
        };
        if self.accept(TokenKind::TkAssign) {
            // Numeric for
            let start = self.parse_expression();
            self.expect(TokenKind::TkComma);
            let limit = self.parse_expression();
            let step = if self.accept(TokenKind::TkComma) {
                Some(self.parse_expression())
            } else {
                None
            };
            self.expect(TokenKind::TkDo);
            let body = self.parse_block();
            self.expect(TokenKind::TkEnd);
            Stat::NumericFor {
                var: first,
                start,
                limit,
                step,
                body,
                span,
            }
        } else {
            // Generic for
            let mut names = vec![first];
            while self.accept(TokenKind::TkComma) {
                match self.expect_name() {
                    Some(n) => names.push(n),
                    None => break,
                }
            }
            self.expect(TokenKind::TkIn);
            let exprs = self.parse_expr_list();
            self.expect(TokenKind::TkDo);
            let body = self.parse_block();
            self.expect(TokenKind::TkEnd);
            Stat::GenericFor {
                names,
                exprs,
                body,
                span,
            }
        }
    }

    /// funcname: Name {'.' Name} [':' Name]
    fn parse_function_decl(&mut self, span: Span) -> Stat {
        self.advance(); // function
        let Some(first) = self.expect_name() else {
            self.resync();
            return Stat::Do(Block::default(), span);
        };
        let mut display = String::from(first.as_str());
        let mut target = Expr::Name(first, span);
        let mut is_method = false;
        loop {
            if self.accept(TokenKind::TkDot) {
                let key_span = self.span_here();
                let Some(name) = self.expect_name() else { break };
                display.push('.');
                display.push_str(name.as_str());
                target = Expr::Index {
                    object: Box::new(target),
                    key: Box::new(Expr::Str(name.to_string(), key_span)),
                    span: key_span,
                };
            } else if self.accept(TokenKind::TkColon) {
                let key_span = self.span_here();
                let Some(name) = self.expect_name() else { break };
                display.push(':');
                display.push_str(name.as_str());
                target = Expr::Index {
                    object: Box::new(target),
                    key: Box::new(Expr::Str(name.to_string(), key_span)),
                    span: key_span,
                };
                is_method = true;
                break;
            } else {
                break;
            }
        }
        let mut body = self.parse_function_body(span);
        if is_method {
            body.params.insert(0, SmolStr::new_static("self"));
        }
        body.name = Some(SmolStr::new(&display));
        Stat::FunctionDecl {
            target,
            is_method,
            body: Box::new(body),
            span,
        }
    }

    fn parse_local_function(&mut self, span: Span) -> Stat {
        let Some(name) = self.expect_name() else {
            self.resync();
            return Stat::Do(Block::default(), span);
        };
        let mut body = self.parse_function_body(span);
        body.name = Some(name.clone());
        Stat::LocalFunction {
            name,
            body: Box::new(body),
            span,
        }
    }

    fn parse_local(&mut self, span: Span) -> Stat {
        let mut names = Vec::new();
        loop {
            let name_span = self.span_here();
            let Some(name) = self.expect_name() else {
                self.resync();
                return Stat::Local {
                    names,
                    values: Vec::new(),
                    span,
                };
            };
            let attrib = self.parse_attrib();
            names.push(LocalName {
                name,
                attrib,
                span: name_span,
            });
            if !self.accept(TokenKind::TkComma) {
                break;
            }
        }
        let values = if self.accept(TokenKind::TkAssign) {
            self.parse_expr_list()
        } else {
            Vec::new()
        };
        Stat::Local {
            names,
            values,
            span,
        }
    }

    /// `<const>` / `<close>` after a local name.
    fn parse_attrib(&mut self) -> LocalAttrib {
        if !self.accept(TokenKind::TkLt) {
            return LocalAttrib::None;
        }
        let attrib = match self.expect_name() {
            Some(name) => match name.as_str() {
                "const" => LocalAttrib::Const,
                "close" => LocalAttrib::Close,
                other => {
                    self.error_here(format!("unknown attribute '{}'", other));
                    LocalAttrib::None
                }
            },
            None => LocalAttrib::None,
        };
        self.expect(TokenKind::TkGt);
        attrib
    }

    fn parse_return(&mut self) -> Stat {
        let span = self.span_here();
        self.advance(); // return
        let values = if self.block_follow(true) || self.check(TokenKind::TkSemicolon) {
            Vec::new()
        } else {
            self.parse_expr_list()
        };
        self.accept(TokenKind::TkSemicolon);
        Stat::Return { values, span }
    }

    /// Assignment or call. Anything else at statement position is an error.
    fn parse_expr_statement(&mut self, span: Span) -> Option<Stat> {
        let first = self.parse_suffixed_expr();
        if self.check(TokenKind::TkAssign) || self.check(TokenKind::TkComma) {
            let mut targets = vec![first];
            while self.accept(TokenKind::TkComma) {
                targets.push(self.parse_suffixed_expr());
            }
            for target in &targets {
                if !matches!(target, Expr::Name(..) | Expr::Index { .. }) {
                    self.error_here("syntax error: cannot assign to this expression".to_string());
                }
            }
            self.expect(TokenKind::TkAssign);
            let values = self.parse_expr_list();
            return Some(Stat::Assign {
                targets,
                values,
                span,
            });
        }
        match first {
            Expr::Call { .. } | Expr::MethodCall { .. } => Some(Stat::ExprStat(first)),
            _ => {
                self.error_here("syntax error near unexpected expression statement".to_string());
                self.resync();
                None
            }
        }
    }

    // ---- expressions ----

    fn parse_expr_list(&mut self) -> Vec<Expr> {
        let mut exprs = vec![self.parse_expression()];
        while self.accept(TokenKind::TkComma) {
            exprs.push(self.parse_expression());
        }
        exprs
    }

    pub(crate) fn parse_expression(&mut self) -> Expr {
        self.parse_binary_expr(0)
    }

    /// Pratt precedence climbing over the binary operator ladder.
    fn parse_binary_expr(&mut self, limit: u8) -> Expr {
        let span = self.span_here();
        let mut lhs = match self.current.kind {
            TokenKind::TkNot => {
                self.advance();
                let operand = self.parse_binary_expr(UNARY_PRIORITY);
                Expr::Unary {
                    op: UnOp::Not,
                    operand: Box::new(operand),
                    span,
                }
            }
            TokenKind::TkMinus => {
                self.advance();
                let operand = self.parse_binary_expr(UNARY_PRIORITY);
                Expr::Unary {
                    op: UnOp::Neg,
                    operand: Box::new(operand),
                    span,
                }
            }
            TokenKind::TkLen => {
                self.advance();
                let operand = self.parse_binary_expr(UNARY_PRIORITY);
                Expr::Unary {
                    op: UnOp::Len,
                    operand: Box::new(operand),
                    span,
                }
            }
            TokenKind::TkBitXor => {
                self.advance();
                let operand = self.parse_binary_expr(UNARY_PRIORITY);
                Expr::Unary {
                    op: UnOp::BNot,
                    operand: Box::new(operand),
                    span,
                }
            }
            _ => self.parse_simple_expr(),
        };
        while let Some(op) = token_to_binop(self.current.kind) {
            let (left_pri, right_pri) = binop_priority(op);
            if left_pri <= limit {
                break;
            }
            let op_span = self.span_here();
            self.advance();
            let rhs = self.parse_binary_expr(right_pri);
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span: op_span,
            };
        }
        lhs
    }

    fn parse_simple_expr(&mut self) -> Expr {
        let span = self.span_here();
        match self.current.kind {
            TokenKind::TkNil => {
                self.advance();
                Expr::Nil(span)
            }
            TokenKind::TkTrue => {
                self.advance();
                Expr::True(span)
            }
            TokenKind::TkFalse => {
                self.advance();
                Expr::False(span)
            }
            TokenKind::TkInt => {
                let tok = self.advance();
                match tok.value {
                    TokenValue::Int(i) => Expr::Int(i, span),
                    _ => Expr::Nil(span),
                }
            }
            TokenKind::TkFloat => {
                let tok = self.advance();
                match tok.value {
                    TokenValue::Float(f) => Expr::Float(f, span),
                    _ => Expr::Nil(span),
                }
            }
            TokenKind::TkString => {
                let tok = self.advance();
                match tok.value {
                    TokenValue::Str(s) => Expr::Str(s, span),
                    _ => Expr::Nil(span),
                }
            }
            TokenKind::TkDots => {
                self.advance();
                Expr::Vararg(span)
            }
            TokenKind::TkFunction => {
                self.advance();
                let body = self.parse_function_body(span);
                Expr::Function(Box::new(body))
            }
            TokenKind::TkLeftBrace => self.parse_table_constructor(span),
            _ => self.parse_suffixed_expr(),
        }
    }

    /// primaryexp: Name | '(' expr ')'
    fn parse_primary_expr(&mut self) -> Expr {
        let span = self.span_here();
        match self.current.kind {
            TokenKind::TkName => {
                let tok = self.advance();
                match tok.value {
                    TokenValue::Name(n) => Expr::Name(n, span),
                    _ => Expr::Nil(span),
                }
            }
            TokenKind::TkLeftParen => {
                self.advance();
                let inner = self.parse_expression();
                self.expect(TokenKind::TkRightParen);
                Expr::Paren(Box::new(inner), span)
            }
            _ => {
                self.error_here(format!(
                    "unexpected symbol near {}",
                    self.current.describe()
                ));
                self.advance();
                Expr::Nil(span)
            }
        }
    }

    /// suffixedexp: primaryexp { '.' Name | '[' expr ']' | ':' Name callargs
    ///              | callargs }
    fn parse_suffixed_expr(&mut self) -> Expr {
        let mut expr = self.parse_primary_expr();
        loop {
            let span = self.span_here();
            match self.current.kind {
                TokenKind::TkDot => {
                    self.advance();
                    let Some(name) = self.expect_name() else { break };
                    expr = Expr::Index {
                        object: Box::new(expr),
                        key: Box::new(Expr::Str(name.to_string(), span)),
                        span,
                    };
                }
                TokenKind::TkLeftBracket => {
                    self.advance();
                    let key = self.parse_expression();
                    self.expect(TokenKind::TkRightBracket);
                    expr = Expr::Index {
                        object: Box::new(expr),
                        key: Box::new(key),
                        span,
                    };
                }
                TokenKind::TkColon => {
                    self.advance();
                    let Some(method) = self.expect_name() else { break };
                    let args = self.parse_call_args(span);
                    expr = Expr::MethodCall {
                        object: Box::new(expr),
                        method,
                        args,
                        span,
                    };
                }
                TokenKind::TkLeftParen | TokenKind::TkString | TokenKind::TkLeftBrace => {
                    let args = self.parse_call_args(span);
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        span,
                    };
                }
                _ => break,
            }
        }
        expr
    }

    /// callargs: '(' [explist] ')' | String | tableconstructor
    fn parse_call_args(&mut self, span: Span) -> Vec<Expr> {
        match self.current.kind {
            TokenKind::TkString => {
                let tok = self.advance();
                match tok.value {
                    TokenValue::Str(s) => vec![Expr::Str(s, span)],
                    _ => vec![],
                }
            }
            TokenKind::TkLeftBrace => {
                vec![self.parse_table_constructor(span)]
            }
            TokenKind::TkLeftParen => {
                self.advance();
                let args = if self.check(TokenKind::TkRightParen) {
                    Vec::new()
                } else {
                    self.parse_expr_list()
                };
                self.expect(TokenKind::TkRightParen);
                args
            }
            _ => {
                self.error_here(format!(
                    "function arguments expected near {}",
                    self.current.describe()
                ));
                Vec::new()
            }
        }
    }

    fn parse_table_constructor(&mut self, span: Span) -> Expr {
        self.expect(TokenKind::TkLeftBrace);
        let mut entries = Vec::new();
        while !self.check(TokenKind::TkRightBrace) && !self.check(TokenKind::TkEof) {
            let current_kind = self.current.kind;
            match current_kind {
                TokenKind::TkLeftBracket => {
                    self.advance();
                    let key = self.parse_expression();
                    self.expect(TokenKind::TkRightBracket);
                    self.expect(TokenKind::TkAssign);
                    let value = self.parse_expression();
                    entries.push(TableEntry::Keyed(key, value));
                }
                TokenKind::TkName if self.peek_is_assign() => {
                    let tok = self.advance();
                    let name = match tok.value {
                        TokenValue::Name(n) => n,
                        _ => SmolStr::new_static("?"),
                    };
                    self.advance(); // '='
                    let value = self.parse_expression();
                    entries.push(TableEntry::Named(name, value));
                }
                _ => {
                    entries.push(TableEntry::Item(self.parse_expression()));
                }
            }
            if !self.accept(TokenKind::TkComma) && !self.accept(TokenKind::TkSemicolon) {
                break;
            }
        }
        self.expect(TokenKind::TkRightBrace);
        Expr::Table { entries, span }
    }

    /// Is the token after the current name an '='? (distinguishes `name = v`
    /// entries from positional `name` values in a table constructor)
    fn peek_is_assign(&mut self) -> bool {
        self.lexer.peek().kind == TokenKind::TkAssign
    }

    fn parse_function_body(&mut self, span: Span) -> FunctionBody {
        self.expect(TokenKind::TkLeftParen);
        let mut params = Vec::new();
        let mut is_vararg = false;
        if !self.check(TokenKind::TkRightParen) {
            loop {
                if self.accept(TokenKind::TkDots) {
                    is_vararg = true;
                    break;
                }
                match self.expect_name() {
                    Some(n) => params.push(n),
                    None => break,
                }
                if !self.accept(TokenKind::TkComma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::TkRightParen);
        let block = self.parse_block();
        self.expect(TokenKind::TkEnd);
        FunctionBody {
            params,
            is_vararg,
            block,
            span,
            name: None,
        }
    }
}
