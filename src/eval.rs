// ABOUTME: Tree-walking evaluator — executes a resolved AST against the heap

use std::collections::HashMap;

use crate::ast::expr::{Expr, ExprKind, LiteralValue, NodeId};
use crate::ast::stmt::{ClassDecl, LoopFlowKind, Stmt, StmtKind};
use crate::callable;
use crate::env;
use crate::error::{Diagnostics, RuntimeError};
use crate::config::DEFAULT_HEAP_LIMIT;
use crate::heap::{Class, ClassId, Env, EnvId, FuncId, Heap, Instance, InstanceId, PinScope, UserFunc};
use crate::token::{Token, TokenKind};
use crate::value::{Ltype, NativeFn};

/// Predicate used for both `==`/`!=` and the division/modulus-by-zero
/// checks: exact equality isn't meaningful for doubles produced by
/// arithmetic, so two numbers are equal if they're close in absolute terms
/// or close relative to their magnitude.
fn floatcmp(a: f64, b: f64) -> bool {
    const ABS_EPS: f64 = 1e-15;
    const REL_EPS: f64 = 1e-14;
    let diff = (a - b).abs();
    if diff < ABS_EPS {
        return true;
    }
    diff <= a.abs().max(b.abs()) * REL_EPS
}

/// `==` across the full value universe. Mismatched variants are always
/// unequal; reference types (functions, instances, classes) compare by heap
/// identity.
fn values_equal(left: &Ltype, right: &Ltype) -> bool {
    match (left, right) {
        (Ltype::String(a), Ltype::String(b)) => a == b,
        (Ltype::Bool(a), Ltype::Bool(b)) => a == b,
        (Ltype::Number(a), Ltype::Number(b)) => floatcmp(*a, *b),
        (Ltype::Nil, Ltype::Nil) => true,
        _ => left.ref_identity_eq(right).unwrap_or(false),
    }
}

fn literal_to_ltype(value: &LiteralValue) -> Ltype {
    match value {
        LiteralValue::Number(n) => Ltype::Number(*n),
        LiteralValue::Str(s) => Ltype::String(s.clone()),
        LiteralValue::Bool(b) => Ltype::Bool(*b),
        LiteralValue::Nil => Ltype::Nil,
    }
}

fn check_number_operand(op: &Token, value: &Ltype) -> Result<f64, RuntimeError> {
    match value {
        Ltype::Number(n) => Ok(*n),
        _ => Err(RuntimeError::new(op.clone(), format!("operand must be a number, got: {}", value.type_name()))),
    }
}

fn check_number_operands(op: &Token, left: &Ltype, right: &Ltype) -> Result<(f64, f64), RuntimeError> {
    match (left, right) {
        (Ltype::Number(a), Ltype::Number(b)) => Ok((*a, *b)),
        _ => Err(RuntimeError::new(
            op.clone(),
            format!("operands must be numbers, got: {}, {}", left.type_name(), right.type_name()),
        )),
    }
}

/// The outcome of running one statement: either control fell through
/// normally, or a `break`/`continue`/`return` is unwinding toward the
/// construct that handles it. Stands in for the original's exception-based
/// unwinding, since Rust has no exceptions to mirror.
enum Step {
    Normal,
    Break,
    Continue,
    Return(Ltype),
}

pub struct Interpreter {
    pub heap: Heap,
    globals: EnvId,
    env: EnvId,
    locals: HashMap<NodeId, usize>,
}

impl Interpreter {
    pub fn new() -> Self {
        Interpreter::with_heap_limit(DEFAULT_HEAP_LIMIT)
    }

    pub fn with_heap_limit(limit: usize) -> Self {
        let heap = Heap::with_limit(limit);
        let globals = heap.alloc_root_env();
        env::define(&heap, globals, "clock", Some(Ltype::NativeFunc(NativeFn::Clock)));
        Interpreter { heap, globals, env: globals, locals: HashMap::new() }
    }

    /// Runs one top-level program (or REPL line) against this interpreter's
    /// heap and global environment, which both persist across calls. Stops
    /// at the first runtime error, matching the original's single
    /// try/catch around the whole statement list.
    pub fn interpret(&mut self, statements: &[Stmt], locals: HashMap<NodeId, usize>, diag: &mut Diagnostics) {
        self.locals = locals;
        for stmt in statements {
            match self.execute_stmt(stmt) {
                Ok(_) => {}
                Err(err) => {
                    diag.runtime_error(&err);
                    return;
                }
            }
        }
    }

    // ---- statements ----

    fn execute_stmt(&mut self, stmt: &Stmt) -> Result<Step, RuntimeError> {
        match &stmt.kind {
            StmtKind::Expr { expr } => {
                self.eval_expr(expr)?;
                Ok(Step::Normal)
            }
            StmtKind::Print { expr } => {
                let value = self.eval_expr(expr)?;
                println!("{}", value);
                Ok(Step::Normal)
            }
            StmtKind::VarDecl { name, initializer } => {
                // Always declared uninitialized first, so `var x = x;`
                // fails on the read rather than seeing a stale outer `x`.
                env::define(&self.heap, self.env, &name.lexeme, None);
                if let Some(init) = initializer {
                    let value = self.eval_expr(init)?;
                    env::define(&self.heap, self.env, &name.lexeme, Some(value));
                }
                Ok(Step::Normal)
            }
            StmtKind::Block { statements } => {
                let token = Token::synthetic(TokenKind::LeftBrace, "{");
                let mut pins = PinScope::new(&self.heap);
                let new_env = pins.add_env(self.heap.alloc_env(Env::new(Some(self.env)), self.env, &token)?);
                self.execute_block(statements, new_env)
            }
            StmtKind::If { condition, then_branch, else_branch } => {
                if self.eval_expr(condition)?.is_truthful() {
                    self.execute_stmt(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.execute_stmt(else_branch)
                } else {
                    Ok(Step::Normal)
                }
            }
            // The post-expression runs after every body pass that falls
            // through normally or hits `continue`, but not after `break`.
            StmtKind::Loop { condition, post, body } => {
                while self.eval_expr(condition)?.is_truthful() {
                    match self.execute_stmt(body)? {
                        Step::Break => break,
                        Step::Return(value) => return Ok(Step::Return(value)),
                        Step::Normal | Step::Continue => {
                            if let Some(post) = post {
                                self.eval_expr(post)?;
                            }
                        }
                    }
                }
                Ok(Step::Normal)
            }
            StmtKind::LoopFlow { kind, .. } => Ok(match kind {
                LoopFlowKind::Break => Step::Break,
                LoopFlowKind::Continue => Step::Continue,
            }),
            StmtKind::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr)?,
                    None => Ltype::Nil,
                };
                Ok(Step::Return(value))
            }
            StmtKind::FunDecl { name, function } => {
                let mut pins = PinScope::new(&self.heap);
                let func_id = self.heap.alloc_func(
                    UserFunc { name: Some(name.lexeme.clone()), function: function.clone(), closure: self.env, is_ctor: false },
                    self.env,
                    name,
                )?;
                pins.add_value(Ltype::UserFunc(func_id));
                env::define(&self.heap, self.env, &name.lexeme, Some(Ltype::UserFunc(func_id)));
                Ok(Step::Normal)
            }
            StmtKind::ClassDecl { class } => self.execute_class_decl(class),
        }
    }

    /// Runs `statements` with `self.env` pointed at `new_env`, restoring the
    /// caller's environment no matter how execution ends — normal
    /// completion, an early `break`/`continue`/`return`, or an error.
    fn execute_block(&mut self, statements: &[Stmt], new_env: EnvId) -> Result<Step, RuntimeError> {
        let saved = self.env;
        self.env = new_env;
        let mut outcome = Ok(Step::Normal);
        for stmt in statements {
            match self.execute_stmt(stmt) {
                Ok(Step::Normal) => continue,
                other => {
                    outcome = other;
                    break;
                }
            }
        }
        self.env = saved;
        outcome
    }

    fn execute_class_decl(&mut self, class: &ClassDecl) -> Result<Step, RuntimeError> {
        let mut pins = PinScope::new(&self.heap);
        let original_env = self.env;
        let mut superclass_id = None;
        let mut super_env = None;

        if let Some(superclass_expr) = &class.superclass {
            let super_value = pins.add_value(self.eval_expr(superclass_expr)?);
            let id = match super_value {
                Ltype::Class(id) => id,
                other => {
                    return Err(RuntimeError::new(
                        class.name.clone(),
                        format!("expected class, got {}", other.type_name()),
                    ))
                }
            };
            superclass_id = Some(id);
            let env_id = pins.add_env(self.heap.alloc_env(Env::new(Some(self.env)), self.env, &class.name)?);
            env::define(&self.heap, env_id, "super", Some(Ltype::Class(id)));
            super_env = Some(env_id);
            self.env = env_id;
        }

        let mut methods = HashMap::new();
        for (method_name, body) in &class.methods {
            let func_id = self.heap.alloc_func(
                UserFunc { name: Some(method_name.lexeme.clone()), function: body.clone(), closure: self.env, is_ctor: false },
                self.env,
                method_name,
            )?;
            pins.add_value(Ltype::UserFunc(func_id));
            methods.insert(method_name.lexeme.clone(), func_id);
        }
        let mut static_methods = HashMap::new();
        for (method_name, body) in &class.static_methods {
            let func_id = self.heap.alloc_func(
                UserFunc { name: Some(method_name.lexeme.clone()), function: body.clone(), closure: self.env, is_ctor: false },
                self.env,
                method_name,
            )?;
            pins.add_value(Ltype::UserFunc(func_id));
            static_methods.insert(method_name.lexeme.clone(), func_id);
        }
        if let Some(ctor_body) = &class.constructor {
            let func_id = self.heap.alloc_func(
                UserFunc {
                    name: Some(class.name.lexeme.clone()),
                    function: ctor_body.clone(),
                    closure: self.env,
                    is_ctor: true,
                },
                self.env,
                &class.name,
            )?;
            pins.add_value(Ltype::UserFunc(func_id));
            methods.insert(class.name.lexeme.clone(), func_id);
        }

        let class_id = self.heap.alloc_class(
            Class { name: class.name.lexeme.clone(), superclass: superclass_id, super_env, methods, static_methods },
            self.env,
            &class.name,
        )?;
        pins.add_value(Ltype::Class(class_id));

        self.env = original_env;
        env::define(&self.heap, self.env, &class.name.lexeme, Some(Ltype::Class(class_id)));
        Ok(Step::Normal)
    }

    // ---- expressions ----

    fn eval_expr(&mut self, expr: &Expr) -> Result<Ltype, RuntimeError> {
        match &expr.kind {
            ExprKind::Literal { value } => Ok(literal_to_ltype(value)),
            ExprKind::Grouping { expr } => self.eval_expr(expr),
            ExprKind::Comma { left, right } => {
                self.eval_expr(left)?;
                self.eval_expr(right)
            }
            ExprKind::Logical { left, operator, right } => {
                let left_value = self.eval_expr(left)?;
                match operator.kind {
                    TokenKind::Or if left_value.is_truthful() => Ok(left_value),
                    TokenKind::Or => self.eval_expr(right),
                    TokenKind::And if !left_value.is_truthful() => Ok(left_value),
                    TokenKind::And => self.eval_expr(right),
                    _ => unreachable!("parser only produces 'and'/'or' for Logical"),
                }
            }
            ExprKind::Unary { operator, right } => {
                let right_value = self.eval_expr(right)?;
                match operator.kind {
                    TokenKind::Minus => Ok(Ltype::Number(-check_number_operand(operator, &right_value)?)),
                    TokenKind::Bang => Ok(Ltype::Bool(!right_value.is_truthful())),
                    _ => unreachable!("parser only produces '-'/'!' for Unary"),
                }
            }
            ExprKind::Binary { left, operator, right } => {
                let mut pins = PinScope::new(&self.heap);
                let left_value = pins.add_value(self.eval_expr(left)?);
                let right_value = pins.add_value(self.eval_expr(right)?);
                self.eval_binary(operator, &left_value, &right_value)
            }
            ExprKind::Ternary { condition, then_branch, else_branch } => {
                if self.eval_expr(condition)?.is_truthful() {
                    self.eval_expr(then_branch)
                } else {
                    self.eval_expr(else_branch)
                }
            }
            ExprKind::Variable { name } => self.lookup_variable(expr.id, name),
            ExprKind::Assign { name, value } => {
                let value = self.eval_expr(value)?;
                match self.locals.get(&expr.id) {
                    Some(&distance) => env::assign_at(&self.heap, self.env, distance, &name.lexeme, value.clone()),
                    None => env::assign(&self.heap, self.globals, name, value.clone())?,
                }
                Ok(value)
            }
            ExprKind::Call { callee, paren, args } => {
                let mut pins = PinScope::new(&self.heap);
                let callee_value = pins.add_value(self.eval_expr(callee)?);
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(pins.add_value(self.eval_expr(arg)?));
                }
                self.call_value(&callee_value, evaluated, paren)
            }
            ExprKind::Get { object, name } => {
                let mut pins = PinScope::new(&self.heap);
                let object_value = pins.add_value(self.eval_expr(object)?);
                match object_value {
                    Ltype::Instance(id) => self.get_instance_property(id, name),
                    Ltype::Class(id) => callable::get_static_method(&self.heap, id, &name.lexeme)
                        .map(Ltype::UserFunc)
                        .ok_or_else(|| RuntimeError::new(name.clone(), "undefined property")),
                    other => Err(RuntimeError::new(
                        name.clone(),
                        format!("property access on a non-class object, got: {}", other.type_name()),
                    )),
                }
            }
            ExprKind::Set { object, name, value } => {
                let mut pins = PinScope::new(&self.heap);
                let object_value = pins.add_value(self.eval_expr(object)?);
                let instance_id = match object_value {
                    Ltype::Instance(id) => id,
                    _ => return Err(RuntimeError::new(name.clone(), "only class instances have fields")),
                };
                let rvalue = pins.add_value(self.eval_expr(value)?);
                self.heap.instance_mut(instance_id).fields.insert(name.lexeme.clone(), rvalue.clone());
                Ok(rvalue)
            }
            ExprKind::This { keyword } => self.lookup_variable(expr.id, keyword),
            ExprKind::Super { keyword, method } => self.eval_super(expr.id, keyword, method),
            ExprKind::FunctionExpr { function } => {
                let mut pins = PinScope::new(&self.heap);
                let func_id = self.heap.alloc_func(
                    UserFunc { name: None, function: function.clone(), closure: self.env, is_ctor: false },
                    self.env,
                    &Token::synthetic(TokenKind::Fun, "fun"),
                )?;
                Ok(pins.add_value(Ltype::UserFunc(func_id)))
            }
        }
    }

    fn eval_binary(&self, operator: &Token, left: &Ltype, right: &Ltype) -> Result<Ltype, RuntimeError> {
        use TokenKind::*;
        Ok(match operator.kind {
            Minus => {
                let (a, b) = check_number_operands(operator, left, right)?;
                Ltype::Number(a - b)
            }
            Star => {
                let (a, b) = check_number_operands(operator, left, right)?;
                Ltype::Number(a * b)
            }
            Slash => {
                let (a, b) = check_number_operands(operator, left, right)?;
                if floatcmp(b, 0.0) {
                    return Err(RuntimeError::new(operator.clone(), "division by zero"));
                }
                Ltype::Number(a / b)
            }
            Percent => {
                let (a, b) = check_number_operands(operator, left, right)?;
                if floatcmp(b, 0.0) {
                    return Err(RuntimeError::new(operator.clone(), "division by zero"));
                }
                Ltype::Number(a % b)
            }
            Plus => match (left, right) {
                (Ltype::Number(a), Ltype::Number(b)) => Ltype::Number(a + b),
                (Ltype::String(a), Ltype::String(b)) => Ltype::String(format!("{a}{b}")),
                _ => {
                    return Err(RuntimeError::new(
                        operator.clone(),
                        format!("operands must be numbers or strings, got: {}, {}", left.type_name(), right.type_name()),
                    ))
                }
            },
            EqualEqual => Ltype::Bool(values_equal(left, right)),
            BangEqual => Ltype::Bool(!values_equal(left, right)),
            Less => {
                let (a, b) = check_number_operands(operator, left, right)?;
                Ltype::Bool(a < b)
            }
            LessEqual => {
                let (a, b) = check_number_operands(operator, left, right)?;
                Ltype::Bool(a <= b)
            }
            Greater => {
                let (a, b) = check_number_operands(operator, left, right)?;
                Ltype::Bool(a > b)
            }
            GreaterEqual => {
                let (a, b) = check_number_operands(operator, left, right)?;
                Ltype::Bool(a >= b)
            }
            _ => unreachable!("parser only produces arithmetic/comparison/equality tokens for Binary"),
        })
    }

    fn eval_super(&mut self, id: NodeId, keyword: &Token, method: &Token) -> Result<Ltype, RuntimeError> {
        let distance = *self
            .locals
            .get(&id)
            .expect("resolver always binds a 'super' use to its distance");
        let super_class_id = match env::get_at(&self.heap, self.env, distance, "super") {
            Ltype::Class(id) => id,
            _ => unreachable!("'super' is always bound to a class"),
        };
        if let Some(method_id) = callable::get_method(&self.heap, super_class_id, &method.lexeme) {
            let this_id = match env::get_at(&self.heap, self.env, distance - 1, "this") {
                Ltype::Instance(id) => id,
                _ => unreachable!("'this' is always bound one scope below 'super'"),
            };
            let bound = callable::bind(&self.heap, method_id, this_id, self.env, keyword)?;
            return Ok(Ltype::UserFunc(bound));
        }
        if let Some(method_id) = callable::get_static_method(&self.heap, super_class_id, &method.lexeme) {
            return Ok(Ltype::UserFunc(method_id));
        }
        Err(RuntimeError::new(method.clone(), "undefined property"))
    }

    fn lookup_variable(&self, id: NodeId, token: &Token) -> Result<Ltype, RuntimeError> {
        match self.locals.get(&id) {
            Some(&distance) => Ok(env::get_at(&self.heap, self.env, distance, &token.lexeme)),
            None => env::get(&self.heap, self.globals, token),
        }
    }

    fn get_instance_property(&mut self, instance: InstanceId, name: &Token) -> Result<Ltype, RuntimeError> {
        if let Some(value) = self.heap.instance(instance).fields.get(&name.lexeme).cloned() {
            return Ok(value);
        }
        let class_id = self.heap.instance(instance).class;
        if let Some(method_id) = callable::get_method(&self.heap, class_id, &name.lexeme) {
            let bound = callable::bind(&self.heap, method_id, instance, self.env, name)?;
            return Ok(Ltype::UserFunc(bound));
        }
        Err(RuntimeError::new(name.clone(), "undefined property"))
    }

    fn call_value(&mut self, callee: &Ltype, args: Vec<Ltype>, paren: &Token) -> Result<Ltype, RuntimeError> {
        let arity = match callee {
            Ltype::NativeFunc(native) => native.arity(),
            Ltype::UserFunc(id) => self.heap.func(*id).function.params.len(),
            Ltype::Class(id) => {
                let name = self.heap.class(*id).name.clone();
                match callable::get_method(&self.heap, *id, &name) {
                    Some(ctor) => self.heap.func(ctor).function.params.len(),
                    None => 0,
                }
            }
            _ => {
                return Err(RuntimeError::new(
                    paren.clone(),
                    format!("call to {}: can only call functions and constructors", callee.type_name()),
                ))
            }
        };
        if arity != args.len() {
            return Err(RuntimeError::new(paren.clone(), format!("expected {} arguments, got {}", arity, args.len())));
        }
        match callee {
            Ltype::NativeFunc(native) => Ok(callable::call_native(*native)),
            Ltype::UserFunc(id) => self.call_user_func(*id, args, paren),
            Ltype::Class(id) => self.call_class(*id, args, paren),
            _ => unreachable!("arity check above already rejected non-callables"),
        }
    }

    fn call_user_func(&mut self, func_id: FuncId, args: Vec<Ltype>, paren: &Token) -> Result<Ltype, RuntimeError> {
        let (function, closure, is_ctor) = {
            let func = self.heap.func(func_id);
            (func.function.clone(), func.closure, func.is_ctor)
        };
        let mut pins = PinScope::new(&self.heap);
        let new_env = pins.add_env(self.heap.alloc_env(Env::new(Some(closure)), self.env, paren)?);
        for (param, arg) in function.params.iter().zip(args.into_iter()) {
            env::define(&self.heap, new_env, &param.lexeme, Some(arg));
        }
        let step = self.execute_block(&function.body, new_env)?;
        let mut result = match step {
            Step::Return(value) => value,
            // A stray break/continue escaping a nested function body is a
            // static-analysis gap (scope-type bits accumulate rather than
            // reset at a function boundary), not a case real programs hit;
            // treat it as an implicit return of nil rather than propagate
            // it somewhere meaningless.
            Step::Normal | Step::Break | Step::Continue => Ltype::Nil,
        };
        if is_ctor {
            result = env::get(&self.heap, closure, &Token::synthetic(TokenKind::This, "this"))?;
        }
        Ok(result)
    }

    fn call_class(&mut self, class_id: ClassId, args: Vec<Ltype>, paren: &Token) -> Result<Ltype, RuntimeError> {
        let mut pins = PinScope::new(&self.heap);
        let instance_id = self.heap.alloc_instance(Instance { class: class_id, fields: HashMap::new() }, self.env, paren)?;
        pins.add_value(Ltype::Instance(instance_id));

        let class_name = self.heap.class(class_id).name.clone();
        if let Some(ctor_id) = callable::get_method(&self.heap, class_id, &class_name) {
            let bound = callable::bind(&self.heap, ctor_id, instance_id, self.env, paren)?;
            pins.add_value(Ltype::UserFunc(bound));
            // the bound ctor's own `is_ctor` short-circuit already returns
            // `this`, so the call's result is discarded here
            self.call_user_func(bound, args, paren)?;
        }
        Ok(Ltype::Instance(instance_id))
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new()
    }
}
