// ABOUTME: Recursive-descent parser: tokens -> AST, single pass, not re-entrant

use std::rc::Rc;

use crate::ast::expr::{Expr, ExprKind, LiteralValue, NodeId};
use crate::ast::stmt::{ClassDecl, FunctionBody, LoopFlowKind, Stmt, StmtKind};
use crate::ast::NodeIdGen;
use crate::error::{Diagnostics, ParseError};
use crate::token::{Literal, Token, TokenKind};

const MAX_ARGS: usize = 255;

struct Parser<'a> {
    tokens: Vec<Token>,
    current: usize,
    diag: &'a mut Diagnostics,
    ids: NodeIdGen,
}

pub fn parse(tokens: Vec<Token>, diag: &mut Diagnostics) -> Vec<Stmt> {
    let mut parser = Parser { tokens, current: 0, diag, ids: NodeIdGen::new() };
    let mut statements = Vec::new();
    while !parser.is_at_end() {
        match parser.definition() {
            Ok(stmt) => statements.push(stmt),
            // `error()` already reported this at the point it was raised
            // (and set `had_error`); only resynchronize here, or every
            // fatal parse error would be printed to stderr twice.
            Err(_) => parser.synchronize(),
        }
    }
    statements
}

type PResult<T> = Result<T, ParseError>;

impl<'a> Parser<'a> {
    // ---- cursor primitives ----

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn peek_next(&self) -> Option<&Token> {
        self.tokens.get(self.current + 1)
    }

    fn previous(&self) -> Token {
        self.tokens[self.current - 1].clone()
    }

    fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn check(&self, kind: TokenKind) -> bool {
        !self.is_at_end() && self.peek().kind == kind
    }

    fn check_next(&self, kind: TokenKind) -> bool {
        self.peek_next().is_some_and(|t| t.kind == kind)
    }

    fn match_one(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_any(&mut self, kinds: &[TokenKind]) -> Option<Token> {
        if kinds.iter().any(|k| self.check(*k)) {
            Some(self.advance())
        } else {
            None
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> PResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(&self.peek().clone(), message))
        }
    }

    fn error(&mut self, token: &Token, message: &str) -> ParseError {
        let err = ParseError::at(token, message);
        self.diag.error_parse(&err);
        err
    }

    fn next_id(&mut self) -> NodeId {
        self.ids.next()
    }

    /// Discards tokens up to and including the next `;`, or up to (but not
    /// including) the next definition-starting keyword.
    fn synchronize(&mut self) {
        self.advance();
        while !self.is_at_end() {
            if self.previous().kind == TokenKind::Semicolon {
                return;
            }
            use TokenKind::*;
            if matches!(self.peek().kind, Class | Fun | Var | For | If | While | Print | Return) {
                return;
            }
            self.advance();
        }
    }

    // ---- definitions and statements ----

    fn definition(&mut self) -> PResult<Stmt> {
        if self.match_one(TokenKind::Var) {
            self.var_decl()
        } else if self.check(TokenKind::Fun) && self.check_next(TokenKind::Identifier) {
            self.advance();
            self.fun_decl("function")
        } else if self.match_one(TokenKind::Class) {
            self.class_decl()
        } else {
            self.statement()
        }
    }

    fn var_decl(&mut self) -> PResult<Stmt> {
        let name = self.consume(TokenKind::Identifier, "expect variable name")?;
        let initializer = if self.match_one(TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenKind::Semicolon, "expect ';' after variable declaration")?;
        Ok(Stmt::new(StmtKind::VarDecl { name, initializer }))
    }

    fn fun_decl(&mut self, kind: &str) -> PResult<Stmt> {
        let name = self.consume(TokenKind::Identifier, &format!("expect {kind} name"))?;
        let function = self.fun_body(kind)?;
        Ok(Stmt::new(StmtKind::FunDecl { name, function: Rc::new(function) }))
    }

    fn fun_body(&mut self, kind: &str) -> PResult<FunctionBody> {
        self.consume(TokenKind::LeftParen, &format!("expect '(' after {kind} name"))?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                if params.len() >= MAX_ARGS {
                    self.error(&self.peek().clone(), "can't have more than 255 parameters");
                }
                params.push(self.consume(TokenKind::Identifier, "expect parameter name")?);
                if !self.match_one(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "expect ')' after parameters")?;
        self.consume(TokenKind::LeftBrace, &format!("expect '{{' before {kind} body"))?;
        let body = self.block()?;
        Ok(FunctionBody { params, body })
    }

    fn class_decl(&mut self) -> PResult<Stmt> {
        let name = self.consume(TokenKind::Identifier, "expect class name")?;
        let superclass = if self.match_one(TokenKind::Less) {
            let super_name = self.consume(TokenKind::Identifier, "expect superclass name")?;
            if super_name.lexeme == name.lexeme {
                self.error(&super_name, "a class can't inherit from itself");
            }
            Some(Expr::new(self.next_id(), ExprKind::Variable { name: super_name }))
        } else {
            None
        };

        self.consume(TokenKind::LeftBrace, "expect '{' before class body")?;

        let mut constructor = None;
        let mut methods = Vec::new();
        let mut static_methods = Vec::new();

        while !self.check(TokenKind::RightBrace) && !self.is_at_end() {
            let is_static = self.match_one(TokenKind::Class);
            self.consume(TokenKind::Fun, "expect 'fun' in class body")?;
            let method_name = self.consume(TokenKind::Identifier, "expect method name")?;
            let body = Rc::new(self.fun_body("method")?);
            if is_static {
                if method_name.lexeme == name.lexeme {
                    self.error(&method_name, "a static method can't share the class name");
                }
                static_methods.push((method_name, body));
            } else if method_name.lexeme == name.lexeme && constructor.is_none() {
                constructor = Some(body);
            } else {
                methods.push((method_name, body));
            }
        }

        self.consume(TokenKind::RightBrace, "expect '}' after class body")?;
        Ok(Stmt::new(StmtKind::ClassDecl {
            class: ClassDecl { name, superclass, constructor, methods, static_methods },
        }))
    }

    fn statement(&mut self) -> PResult<Stmt> {
        if self.match_one(TokenKind::Print) {
            self.print_stmt()
        } else if self.match_one(TokenKind::LeftBrace) {
            Ok(Stmt::new(StmtKind::Block { statements: self.block()? }))
        } else if self.match_one(TokenKind::If) {
            self.if_stmt()
        } else if self.match_one(TokenKind::While) {
            self.while_stmt()
        } else if self.match_one(TokenKind::For) {
            self.for_stmt()
        } else if self.check(TokenKind::Break) || self.check(TokenKind::Continue) {
            self.loop_flow_stmt()
        } else if self.match_one(TokenKind::Return) {
            self.return_stmt()
        } else {
            self.expr_stmt()
        }
    }

    fn print_stmt(&mut self) -> PResult<Stmt> {
        let expr = self.expression()?;
        self.consume(TokenKind::Semicolon, "expect ';' after value")?;
        Ok(Stmt::new(StmtKind::Print { expr }))
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        let mut statements = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.is_at_end() {
            statements.push(self.definition()?);
        }
        self.consume(TokenKind::RightBrace, "expect '}' after block")?;
        Ok(statements)
    }

    fn if_stmt(&mut self) -> PResult<Stmt> {
        self.consume(TokenKind::LeftParen, "expect '(' after 'if'")?;
        let condition = self.expression()?;
        self.consume(TokenKind::RightParen, "expect ')' after if condition")?;
        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.match_one(TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::new(StmtKind::If { condition, then_branch, else_branch }))
    }

    fn while_stmt(&mut self) -> PResult<Stmt> {
        self.consume(TokenKind::LeftParen, "expect '(' after 'while'")?;
        let condition = self.expression()?;
        self.consume(TokenKind::RightParen, "expect ')' after condition")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::new(StmtKind::Loop { condition, post: None, body }))
    }

    fn for_stmt(&mut self) -> PResult<Stmt> {
        self.consume(TokenKind::LeftParen, "expect '(' after 'for'")?;

        let initializer = if self.match_one(TokenKind::Semicolon) {
            None
        } else if self.match_one(TokenKind::Var) {
            Some(self.var_decl()?)
        } else {
            Some(self.expr_stmt()?)
        };

        let condition = if !self.check(TokenKind::Semicolon) {
            self.expression()?
        } else {
            Expr::new(self.next_id(), ExprKind::Literal { value: LiteralValue::Bool(true) })
        };
        self.consume(TokenKind::Semicolon, "expect ';' after loop condition")?;

        let post = if !self.check(TokenKind::RightParen) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenKind::RightParen, "expect ')' after for clauses")?;

        let body = self.statement()?;
        let loop_body = Stmt::new(StmtKind::Block { statements: vec![body] });
        let loop_stmt = Stmt::new(StmtKind::Loop { condition, post, body: Box::new(loop_body) });

        let mut statements = Vec::new();
        if let Some(init) = initializer {
            statements.push(init);
        }
        statements.push(loop_stmt);
        Ok(Stmt::new(StmtKind::Block { statements }))
    }

    fn loop_flow_stmt(&mut self) -> PResult<Stmt> {
        let keyword = self.advance();
        let kind = if keyword.kind == TokenKind::Break {
            LoopFlowKind::Break
        } else {
            LoopFlowKind::Continue
        };
        self.consume(TokenKind::Semicolon, "expect ';' after 'break'/'continue'")?;
        Ok(Stmt::new(StmtKind::LoopFlow { keyword, kind }))
    }

    fn return_stmt(&mut self) -> PResult<Stmt> {
        let keyword = self.previous();
        let value = if !self.check(TokenKind::Semicolon) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenKind::Semicolon, "expect ';' after return value")?;
        Ok(Stmt::new(StmtKind::Return { keyword, value }))
    }

    fn expr_stmt(&mut self) -> PResult<Stmt> {
        let expr = self.expression()?;
        self.consume(TokenKind::Semicolon, "expect ';' after expression")?;
        Ok(Stmt::new(StmtKind::Expr { expr }))
    }

    // ---- expressions, lowest to highest precedence ----

    fn expression(&mut self) -> PResult<Expr> {
        self.comma()
    }

    fn comma(&mut self) -> PResult<Expr> {
        let mut expr = self.assignment()?;
        while self.match_one(TokenKind::Comma) {
            let right = self.assignment()?;
            expr = Expr::new(self.next_id(), ExprKind::Comma { left: Box::new(expr), right: Box::new(right) });
        }
        Ok(expr)
    }

    fn assignment(&mut self) -> PResult<Expr> {
        let expr = self.conditional()?;
        if self.match_one(TokenKind::Equal) {
            let equals = self.previous();
            let value = Box::new(self.assignment()?);
            return match expr.kind {
                ExprKind::Variable { name } => Ok(Expr::new(self.next_id(), ExprKind::Assign { name, value })),
                ExprKind::Get { object, name } => {
                    Ok(Expr::new(self.next_id(), ExprKind::Set { object, name, value }))
                }
                _ => {
                    self.error(&equals, "invalid assignment target");
                    Ok(*value)
                }
            };
        }
        Ok(expr)
    }

    fn conditional(&mut self) -> PResult<Expr> {
        let mut expr = self.logical_or()?;
        while self.match_one(TokenKind::QuestionMark) {
            let then_branch = Box::new(self.expression()?);
            self.consume(TokenKind::Colon, "expect ':' in conditional expression")?;
            let else_branch = Box::new(self.conditional()?);
            expr = Expr::new(
                self.next_id(),
                ExprKind::Ternary { condition: Box::new(expr), then_branch, else_branch },
            );
        }
        Ok(expr)
    }

    fn logical_or(&mut self) -> PResult<Expr> {
        let mut expr = self.logical_and()?;
        while let Some(operator) = self.match_any(&[TokenKind::Or]) {
            let right = self.logical_and()?;
            expr = Expr::new(
                self.next_id(),
                ExprKind::Logical { left: Box::new(expr), operator, right: Box::new(right) },
            );
        }
        Ok(expr)
    }

    fn logical_and(&mut self) -> PResult<Expr> {
        let mut expr = self.equality()?;
        while let Some(operator) = self.match_any(&[TokenKind::And]) {
            let right = self.equality()?;
            expr = Expr::new(
                self.next_id(),
                ExprKind::Logical { left: Box::new(expr), operator, right: Box::new(right) },
            );
        }
        Ok(expr)
    }

    /// Implements both the normal binary chain and the "operator with no
    /// left operand" error production shared by every symbolic binary
    /// level: consume the right-hand side anyway and report, rather than
    /// aborting the whole statement.
    fn binary_level(
        &mut self,
        kinds: &[TokenKind],
        mut next: impl FnMut(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        if let Some(op) = self.match_any(kinds) {
            self.error(&op, "expected expression before the operator");
            return next(self);
        }
        let mut expr = next(self)?;
        while let Some(operator) = self.match_any(kinds) {
            let right = next(self)?;
            expr = Expr::new(
                self.next_id(),
                ExprKind::Binary { left: Box::new(expr), operator, right: Box::new(right) },
            );
        }
        Ok(expr)
    }

    fn equality(&mut self) -> PResult<Expr> {
        self.binary_level(&[TokenKind::BangEqual, TokenKind::EqualEqual], Self::comparison)
    }

    fn comparison(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[TokenKind::Greater, TokenKind::GreaterEqual, TokenKind::Less, TokenKind::LessEqual],
            Self::term,
        )
    }

    fn term(&mut self) -> PResult<Expr> {
        self.binary_level(&[TokenKind::Plus, TokenKind::Minus], Self::factor)
    }

    fn factor(&mut self) -> PResult<Expr> {
        self.binary_level(&[TokenKind::Star, TokenKind::Slash, TokenKind::Percent], Self::unary)
    }

    fn unary(&mut self) -> PResult<Expr> {
        if let Some(operator) = self.match_any(&[TokenKind::Bang, TokenKind::Minus]) {
            let right = Box::new(self.unary()?);
            Ok(Expr::new(self.next_id(), ExprKind::Unary { operator, right }))
        } else {
            self.call()
        }
    }

    fn call(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.match_one(TokenKind::LeftParen) {
                expr = self.finish_call(expr)?;
            } else if self.match_one(TokenKind::Dot) {
                let name = self.consume(TokenKind::Identifier, "expect property name after '.'")?;
                expr = Expr::new(self.next_id(), ExprKind::Get { object: Box::new(expr), name });
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> PResult<Expr> {
        let mut args = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                if args.len() >= MAX_ARGS {
                    self.error(&self.peek().clone(), "can't have more than 255 arguments");
                }
                args.push(self.assignment()?);
                if !self.match_one(TokenKind::Comma) {
                    break;
                }
            }
        }
        let paren = self.consume(TokenKind::RightParen, "expect ')' after arguments")?;
        Ok(Expr::new(self.next_id(), ExprKind::Call { callee: Box::new(callee), paren, args }))
    }

    fn primary(&mut self) -> PResult<Expr> {
        if self.match_one(TokenKind::False) {
            return Ok(Expr::new(self.next_id(), ExprKind::Literal { value: LiteralValue::Bool(false) }));
        }
        if self.match_one(TokenKind::True) {
            return Ok(Expr::new(self.next_id(), ExprKind::Literal { value: LiteralValue::Bool(true) }));
        }
        if self.match_one(TokenKind::Nil) {
            return Ok(Expr::new(self.next_id(), ExprKind::Literal { value: LiteralValue::Nil }));
        }
        if self.match_one(TokenKind::Number) {
            let n = match self.previous().literal {
                Literal::Num(n) => n,
                _ => unreachable!("NUMBER token without a numeric literal"),
            };
            return Ok(Expr::new(self.next_id(), ExprKind::Literal { value: LiteralValue::Number(n) }));
        }
        if self.match_one(TokenKind::String) {
            let s = match self.previous().literal {
                Literal::Str(s) => s,
                _ => unreachable!("STRING token without a string literal"),
            };
            return Ok(Expr::new(self.next_id(), ExprKind::Literal { value: LiteralValue::Str(s) }));
        }
        if self.match_one(TokenKind::This) {
            let keyword = self.previous();
            return Ok(Expr::new(self.next_id(), ExprKind::This { keyword }));
        }
        if self.match_one(TokenKind::Super) {
            let keyword = self.previous();
            self.consume(TokenKind::Dot, "expect '.' after 'super'")?;
            let method = self.consume(TokenKind::Identifier, "expect superclass method name")?;
            return Ok(Expr::new(self.next_id(), ExprKind::Super { keyword, method }));
        }
        if self.match_one(TokenKind::Identifier) {
            let name = self.previous();
            return Ok(Expr::new(self.next_id(), ExprKind::Variable { name }));
        }
        if self.match_one(TokenKind::LeftParen) {
            let expr = self.expression()?;
            self.consume(TokenKind::RightParen, "expect ')' after expression")?;
            return Ok(Expr::new(self.next_id(), ExprKind::Grouping { expr: Box::new(expr) }));
        }
        if self.match_one(TokenKind::Fun) {
            let function = self.fun_body("function")?;
            return Ok(Expr::new(self.next_id(), ExprKind::FunctionExpr { function: Rc::new(function) }));
        }
        Err(self.error(&self.peek().clone(), "expect expression"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Scanner;

    fn parse_src(src: &str) -> (Vec<Stmt>, Diagnostics) {
        let mut diag = Diagnostics::new();
        let tokens = Scanner::new(src).scan_tokens(&mut diag);
        let stmts = parse(tokens, &mut diag);
        (stmts, diag)
    }

    #[test]
    fn parses_arithmetic_with_correct_precedence() {
        let (stmts, diag) = parse_src("print 1 + 2 * 3;");
        assert!(!diag.had_error);
        assert_eq!(stmts.len(), 1);
        match &stmts[0].kind {
            StmtKind::Print { expr } => match &expr.kind {
                ExprKind::Binary { operator, .. } => assert_eq!(operator.kind, TokenKind::Plus),
                other => panic!("expected top-level '+', got {:?}", other),
            },
            other => panic!("expected print statement, got {:?}", other),
        }
    }

    #[test]
    fn for_loop_desugars_to_block_with_out_of_band_post() {
        let (stmts, diag) = parse_src("for (var i = 0; i < 3; i = i + 1) print i;");
        assert!(!diag.had_error);
        match &stmts[0].kind {
            StmtKind::Block { statements } => {
                assert_eq!(statements.len(), 2);
                match &statements[1].kind {
                    StmtKind::Loop { post, .. } => assert!(post.is_some()),
                    other => panic!("expected loop as second statement, got {:?}", other),
                }
            }
            other => panic!("expected desugared block, got {:?}", other),
        }
    }

    #[test]
    fn assignment_to_non_lvalue_reports_but_does_not_abort_statement() {
        let (stmts, diag) = parse_src("1 = 2;");
        assert!(diag.had_error);
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn class_with_constructor_and_static_method() {
        let (stmts, diag) = parse_src("class P { fun P(x) { this.x = x; } class fun make() { return P(1); } }");
        assert!(!diag.had_error);
        match &stmts[0].kind {
            StmtKind::ClassDecl { class } => {
                assert!(class.constructor.is_some());
                assert_eq!(class.static_methods.len(), 1);
            }
            other => panic!("expected class decl, got {:?}", other),
        }
    }

    #[test]
    fn missing_semicolon_is_a_parse_error_and_synchronizes() {
        let (stmts, diag) = parse_src("var a = 1 print a;");
        assert!(diag.had_error);
        // recovery should still parse the second statement once it
        // resynchronizes at the next statement-starting keyword or `;`.
        assert!(stmts.len() <= 1);
    }

    #[test]
    fn binary_operator_with_no_left_operand_is_reported() {
        let (_stmts, diag) = parse_src("print * 2;");
        assert!(diag.had_error);
    }
}
