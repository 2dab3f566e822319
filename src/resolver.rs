// ABOUTME: Static resolver — walks the AST once to bind every variable reference to a scope distance

use std::collections::HashMap;

use crate::ast::expr::{Expr, ExprKind, NodeId};
use crate::ast::stmt::{ClassDecl, FunctionBody, Stmt, StmtKind};
use crate::error::Diagnostics;
use crate::token::{Token, TokenKind};

/// Tracks what a declared name has had done to it within its own block, so
/// `end_scope` can warn about dead declarations and `Variable` lookups can
/// catch a read of a not-yet-initialized local.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarState {
    Decl,
    Set,
    Read,
}

/// Bitset of the nested constructs currently open, checked by `this`,
/// `super`, `return` and `break`/`continue` to reject uses outside their
/// legal context. Values line up with the original's enum so the bit
/// positions are not just an arbitrary choice made here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScopeType(u8);

impl ScopeType {
    const NONE: ScopeType = ScopeType(0);
    const LOOP: ScopeType = ScopeType(1);
    const FUNC: ScopeType = ScopeType(2);
    const CLASS: ScopeType = ScopeType(4);
    const METHOD: ScopeType = ScopeType(8);
    const CTOR: ScopeType = ScopeType(16);
    const STATIC_METHOD: ScopeType = ScopeType(32);
    const SUBCLASS: ScopeType = ScopeType(64);

    fn union(self, other: ScopeType) -> ScopeType {
        ScopeType(self.0 | other.0)
    }

    fn contains(self, other: ScopeType) -> bool {
        self.0 & other.0 != 0
    }
}

/// One block's name table. Keyed by lexeme, same as the original's
/// `Token`-keyed map (our `Token`'s `Hash`/`Eq` are lexeme-only already).
type Scope = HashMap<String, (VarState, Token)>;

struct Resolver<'a> {
    scopes: Vec<Scope>,
    locals: HashMap<NodeId, usize>,
    current_scope_type: ScopeType,
    diag: &'a mut Diagnostics,
}

/// Resolves every variable reference in `statements` to a hop count from its
/// use site up to the enclosing scope that declares it. References absent
/// from the returned map are assumed global, left for the evaluator to
/// resolve (or fail to) against the outermost environment.
pub fn resolve(statements: &[Stmt], diag: &mut Diagnostics) -> HashMap<NodeId, usize> {
    let mut resolver = Resolver {
        scopes: Vec::new(),
        locals: HashMap::new(),
        current_scope_type: ScopeType::NONE,
        diag,
    };
    for stmt in statements {
        resolver.resolve_stmt(stmt);
    }
    resolver.locals
}

impl<'a> Resolver<'a> {
    fn begin_scope(&mut self) {
        self.scopes.push(Scope::new());
    }

    /// Pops the innermost scope, warning (non-fatally) about any name that
    /// was declared or assigned but never read.
    fn end_scope(&mut self) {
        let scope = self.scopes.pop().expect("end_scope without matching begin_scope");
        for (_, (state, token)) in scope {
            match state {
                VarState::Decl => {
                    self.diag.warn(token.line, &format!("at '{}': declared but not used", token.lexeme))
                }
                VarState::Set => {
                    self.diag.warn(token.line, &format!("at '{}': set but never used", token.lexeme))
                }
                VarState::Read => {}
            }
        }
    }

    fn declare(&mut self, token: &Token) {
        if self.scopes.is_empty() {
            return;
        }
        let conflict = self.scopes.last().unwrap().get(&token.lexeme).map(|(_, t)| t.clone());
        if let Some(prev) = conflict {
            self.diag.error_at(token, "static: redeclaration in non-global scope");
            self.diag.error_at(&prev, "static: previously declared here");
        }
        self.scopes.last_mut().unwrap().insert(token.lexeme.clone(), (VarState::Decl, token.clone()));
    }

    fn initialize(&mut self, token: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(token.lexeme.clone(), (VarState::Set, token.clone()));
        }
    }

    fn set_var_state(&mut self, token: &Token, state: VarState) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(entry) = scope.get_mut(&token.lexeme) {
                entry.0 = state;
                return;
            }
        }
    }

    /// Searches scopes innermost-out for `token`. A hit that was `Set` is
    /// flipped to `Read` right here (a use of an initialized name counts as
    /// reading it) before the distance is recorded; the caller applies
    /// whatever further state transition its own node kind implies.
    fn resolve_local(&mut self, id: NodeId, token: &Token) -> Option<VarState> {
        let len = self.scopes.len();
        for distance in 0..len {
            let idx = len - 1 - distance;
            if let Some(entry) = self.scopes[idx].get_mut(&token.lexeme) {
                if entry.0 == VarState::Set {
                    entry.0 = VarState::Read;
                }
                let state = entry.0;
                self.locals.insert(id, distance);
                return Some(state);
            }
        }
        None
    }

    fn resolve_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expr { expr } => self.resolve_expr(expr),
            StmtKind::Print { expr } => self.resolve_expr(expr),
            StmtKind::VarDecl { name, initializer } => {
                self.declare(name);
                if let Some(init) = initializer {
                    self.resolve_expr(init);
                    self.initialize(name);
                }
            }
            StmtKind::Block { statements } => {
                self.begin_scope();
                for s in statements {
                    self.resolve_stmt(s);
                }
                self.end_scope();
            }
            StmtKind::If { condition, then_branch, else_branch } => {
                self.resolve_expr(condition);
                self.resolve_stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    self.resolve_stmt(else_branch);
                }
            }
            // Deliberately resolves the body (which may declare the loop
            // variable a `for`-post expression refers to) before the post
            // expression, and the post expression before the condition.
            StmtKind::Loop { condition, post, body } => {
                let saved = self.current_scope_type;
                self.current_scope_type = self.current_scope_type.union(ScopeType::LOOP);
                self.resolve_stmt(body);
                if let Some(post) = post {
                    self.resolve_expr(post);
                }
                self.resolve_expr(condition);
                self.current_scope_type = saved;
            }
            StmtKind::LoopFlow { keyword, .. } => {
                if !self.current_scope_type.contains(ScopeType::LOOP) {
                    self.diag.error_at(keyword, "outside loop scope");
                }
            }
            StmtKind::Return { keyword, value } => {
                if !self.current_scope_type.contains(ScopeType::FUNC) {
                    self.diag.error_at(keyword, "outside function scope");
                }
                if self.current_scope_type.contains(ScopeType::CTOR) && value.is_some() {
                    self.diag.error_at(keyword, "returning a value inside constructor");
                }
                if let Some(value) = value {
                    self.resolve_expr(value);
                }
            }
            StmtKind::FunDecl { name, function } => {
                self.declare(name);
                self.initialize(name);
                self.resolve_functional(function);
            }
            StmtKind::ClassDecl { class } => self.resolve_class(class),
        }
    }

    fn resolve_functional(&mut self, function: &FunctionBody) {
        let saved = self.current_scope_type;
        self.current_scope_type = self.current_scope_type.union(ScopeType::FUNC);
        self.begin_scope();
        for param in &function.params {
            self.declare(param);
            self.initialize(param);
        }
        for stmt in &function.body {
            self.resolve_stmt(stmt);
        }
        self.end_scope();
        self.current_scope_type = saved;
    }

    fn resolve_class(&mut self, class: &ClassDecl) {
        let saved = self.current_scope_type;

        self.declare(&class.name);
        self.initialize(&class.name);

        let has_superclass = if let Some(superclass) = &class.superclass {
            match &superclass.kind {
                ExprKind::Variable { name } if name.lexeme == class.name.lexeme => {
                    self.diag.error_at(name, "a class can't inherit from itself");
                    false
                }
                _ => {
                    self.resolve_expr(superclass);
                    true
                }
            }
        } else {
            false
        };

        self.current_scope_type =
            self.current_scope_type.union(ScopeType::FUNC.union(ScopeType::METHOD).union(ScopeType::CLASS));
        if has_superclass {
            self.current_scope_type = self.current_scope_type.union(ScopeType::SUBCLASS);
            self.begin_scope();
            self.scopes
                .last_mut()
                .unwrap()
                .insert("super".to_string(), (VarState::Read, Token::synthetic(TokenKind::Super, "super")));
        }

        self.begin_scope();
        self.scopes
            .last_mut()
            .unwrap()
            .insert("this".to_string(), (VarState::Read, Token::synthetic(TokenKind::This, "this")));

        if let Some(ctor) = &class.constructor {
            let saved_ctor = self.current_scope_type;
            self.current_scope_type = self.current_scope_type.union(ScopeType::CTOR);
            self.resolve_functional(ctor);
            self.current_scope_type = saved_ctor;
        }
        for (_, method) in &class.methods {
            self.resolve_functional(method);
        }
        self.end_scope();

        // Parsing already rejects a static method sharing the class name,
        // so there's nothing left to check here before resolving them.
        self.current_scope_type = self.current_scope_type.union(ScopeType::STATIC_METHOD);
        for (_, method) in &class.static_methods {
            self.resolve_functional(method);
        }

        if has_superclass {
            self.end_scope();
        }
        self.current_scope_type = saved;
    }

    fn resolve_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } | ExprKind::Comma { left, right } => {
                self.resolve_expr(left);
                self.resolve_expr(right);
            }
            ExprKind::Grouping { expr } => self.resolve_expr(expr),
            ExprKind::Literal { .. } => {}
            ExprKind::Unary { right, .. } => self.resolve_expr(right),
            ExprKind::Ternary { condition, then_branch, else_branch } => {
                self.resolve_expr(condition);
                self.resolve_expr(then_branch);
                self.resolve_expr(else_branch);
            }
            ExprKind::Variable { name } => {
                if let Some(state) = self.resolve_local(expr.id, name) {
                    if state == VarState::Decl {
                        self.diag.error_at(name, "static: uninitialized variable");
                    }
                }
            }
            ExprKind::Assign { name, value } => {
                self.resolve_expr(value);
                if let Some(state) = self.resolve_local(expr.id, name) {
                    if state != VarState::Read {
                        self.set_var_state(name, VarState::Set);
                    }
                }
            }
            ExprKind::Call { callee, args, .. } => {
                self.resolve_expr(callee);
                for arg in args {
                    self.resolve_expr(arg);
                }
            }
            ExprKind::Get { object, .. } => self.resolve_expr(object),
            ExprKind::Set { object, value, .. } => {
                self.resolve_expr(object);
                self.resolve_expr(value);
            }
            ExprKind::This { keyword } => {
                if !self.current_scope_type.contains(ScopeType::METHOD) {
                    self.diag.error_at(keyword, "outside method scope");
                }
                if self.current_scope_type.contains(ScopeType::STATIC_METHOD) {
                    self.diag.error_at(keyword, "in static method");
                }
                self.resolve_local(expr.id, keyword);
            }
            ExprKind::Super { keyword, .. } => {
                if !self.current_scope_type.contains(ScopeType::METHOD) {
                    self.diag.error_at(keyword, "outside method scope");
                } else if !self.current_scope_type.contains(ScopeType::SUBCLASS) {
                    self.diag.error_at(keyword, "class does not have an ancestor");
                }
                self.resolve_local(expr.id, keyword);
            }
            ExprKind::FunctionExpr { function } => self.resolve_functional(function),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::scanner::Scanner;

    fn resolve_src(src: &str) -> (HashMap<NodeId, usize>, Diagnostics) {
        let mut diag = Diagnostics::new();
        let tokens = Scanner::new(src).scan_tokens(&mut diag);
        let stmts = parse(tokens, &mut diag);
        let locals = resolve(&stmts, &mut diag);
        (locals, diag)
    }

    #[test]
    fn reading_an_uninitialized_local_is_a_static_error() {
        let (_, diag) = resolve_src("{ var a = a; }");
        assert!(diag.had_error);
    }

    #[test]
    fn redeclaring_a_name_in_the_same_block_is_a_static_error() {
        let (_, diag) = resolve_src("{ var a = 1; var a = 2; }");
        assert!(diag.had_error);
    }

    #[test]
    fn redeclaring_a_global_name_is_fine() {
        let (_, diag) = resolve_src("var a = 1; var a = 2;");
        assert!(!diag.had_error);
    }

    #[test]
    fn break_outside_a_loop_is_a_static_error() {
        let (_, diag) = resolve_src("break;");
        assert!(diag.had_error);
    }

    #[test]
    fn continue_inside_a_loop_is_fine() {
        let (_, diag) = resolve_src("while (true) { continue; }");
        assert!(!diag.had_error);
    }

    #[test]
    fn return_outside_a_function_is_a_static_error() {
        let (_, diag) = resolve_src("return 1;");
        assert!(diag.had_error);
    }

    #[test]
    fn returning_a_value_inside_a_constructor_is_a_static_error() {
        let (_, diag) = resolve_src("class P { fun P(x) { this.x = x; return x; } }");
        assert!(diag.had_error);
    }

    #[test]
    fn bare_return_inside_a_constructor_is_fine() {
        let (_, diag) = resolve_src("class P { fun P(x) { this.x = x; return; } }");
        assert!(!diag.had_error);
    }

    #[test]
    fn this_outside_a_method_is_a_static_error() {
        let (_, diag) = resolve_src("print this;");
        assert!(diag.had_error);
    }

    #[test]
    fn this_inside_a_static_method_is_a_static_error() {
        let (_, diag) = resolve_src("class P { class fun make() { return this; } }");
        assert!(diag.had_error);
    }

    #[test]
    fn super_without_a_superclass_is_a_static_error() {
        let (_, diag) = resolve_src("class P { fun greet() { return super.greet(); } }");
        assert!(diag.had_error);
    }

    #[test]
    fn super_with_a_superclass_resolves_cleanly() {
        let (_, diag) =
            resolve_src("class A { fun greet() { return 1; } } class B < A { fun greet() { return super.greet(); } }");
        assert!(!diag.had_error);
    }

    #[test]
    fn a_class_inheriting_from_itself_is_a_static_error() {
        let (_, diag) = resolve_src("class P < P { }");
        assert!(diag.had_error);
    }

    #[test]
    fn closures_and_recursive_functions_resolve_without_error() {
        let (_, diag) = resolve_src(
            "fun makeCounter() { var i = 0; fun count() { i = i + 1; return i; } return count; } \
             fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }",
        );
        assert!(!diag.had_error);
    }

    #[test]
    fn a_variable_shadowed_in_an_inner_block_resolves_to_the_nearer_declaration() {
        let (locals, diag) = resolve_src("{ var a = 1; { var a = 2; print a; } }");
        assert!(!diag.had_error);
        // exactly one Variable read recorded, at distance 0 (the inner `a`)
        assert_eq!(locals.values().filter(|&&d| d == 0).count(), 1);
    }

    #[test]
    fn unused_local_declaration_is_a_warning_not_a_hard_error() {
        let (_, diag) = resolve_src("{ var unused = 1; }");
        assert!(!diag.had_error);
    }
}
