// ABOUTME: The callable protocol — method lookup and method binding over heap-allocated functions and classes

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::RuntimeError;
use crate::heap::{ClassId, EnvId, Env, FuncId, Heap, InstanceId, UserFunc};
use crate::token::Token;
use crate::value::{Ltype, NativeFn};

/// `clock()` — the language's sole native function. Returns wall-clock
/// seconds as a float, matching the original's `<ctime>` based `Clock`.
pub fn native_clock() -> Ltype {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ltype::Number(secs)
}

pub fn call_native(native: NativeFn) -> Ltype {
    match native {
        NativeFn::Clock => native_clock(),
    }
}

/// Recursive instance-method lookup: this class's table, then the
/// superclass chain. `None` if nowhere in the chain.
pub fn get_method(heap: &Heap, class: ClassId, name: &str) -> Option<FuncId> {
    let (found, superclass) = {
        let c = heap.class(class);
        (c.methods.get(name).copied(), c.superclass)
    };
    found.or_else(|| superclass.and_then(|parent| get_method(heap, parent, name)))
}

/// Symmetric lookup over the static-method table.
pub fn get_static_method(heap: &Heap, class: ClassId, name: &str) -> Option<FuncId> {
    let (found, superclass) = {
        let c = heap.class(class);
        (c.static_methods.get(name).copied(), c.superclass)
    };
    found.or_else(|| superclass.and_then(|parent| get_static_method(heap, parent, name)))
}

/// Returns a fresh `UserFunc` whose closure is a new frame — enclosing the
/// original closure — binding `this` to `instance`. The constructor flag is
/// preserved so a bound `init` still short-circuits to returning `this`.
pub fn bind(
    heap: &Heap,
    func: FuncId,
    instance: InstanceId,
    envp: EnvId,
    token: &Token,
) -> Result<FuncId, RuntimeError> {
    let (name, function, closure, is_ctor) = {
        let f = heap.func(func);
        (f.name.clone(), f.function.clone(), f.closure, f.is_ctor)
    };
    let this_env = heap.alloc_env(Env::new(Some(closure)), envp, token)?;
    crate::env::define(heap, this_env, "this", Some(Ltype::Instance(instance)));
    heap.alloc_func(
        UserFunc { name, function, closure: this_env, is_ctor },
        envp,
        token,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::stmt::FunctionBody;
    use crate::heap::{Class, Instance};
    use crate::token::{Literal, TokenKind};
    use std::rc::Rc;

    fn tok() -> Token {
        Token::new(TokenKind::Identifier, "t", Literal::None, 1)
    }

    #[test]
    fn method_lookup_falls_back_to_superclass() {
        let heap = Heap::new();
        let root = heap.alloc_root_env();
        let base_method = heap
            .alloc_func(
                UserFunc {
                    name: Some("greet".into()),
                    function: Rc::new(FunctionBody { params: vec![], body: vec![] }),
                    closure: root,
                    is_ctor: false,
                },
                root,
                &tok(),
            )
            .unwrap();
        let mut base_methods = std::collections::HashMap::new();
        base_methods.insert("greet".to_string(), base_method);
        let base = heap
            .alloc_class(
                Class {
                    name: "A".into(),
                    superclass: None,
                    super_env: None,
                    methods: base_methods,
                    static_methods: Default::default(),
                },
                root,
                &tok(),
            )
            .unwrap();
        let sub = heap
            .alloc_class(
                Class {
                    name: "B".into(),
                    superclass: Some(base),
                    super_env: None,
                    methods: Default::default(),
                    static_methods: Default::default(),
                },
                root,
                &tok(),
            )
            .unwrap();
        assert_eq!(get_method(&heap, sub, "greet"), Some(base_method));
        assert_eq!(get_method(&heap, sub, "missing"), None);
    }

    #[test]
    fn bind_preserves_constructor_flag_and_adds_this() {
        let heap = Heap::new();
        let root = heap.alloc_root_env();
        let func = heap
            .alloc_func(
                UserFunc {
                    name: Some("init".into()),
                    function: Rc::new(FunctionBody { params: vec![], body: vec![] }),
                    closure: root,
                    is_ctor: true,
                },
                root,
                &tok(),
            )
            .unwrap();
        let class = heap
            .alloc_class(
                Class {
                    name: "P".into(),
                    superclass: None,
                    super_env: None,
                    methods: Default::default(),
                    static_methods: Default::default(),
                },
                root,
                &tok(),
            )
            .unwrap();
        let instance = heap
            .alloc_instance(Instance { class, fields: Default::default() }, root, &tok())
            .unwrap();
        let bound = bind(&heap, func, instance, root, &tok()).unwrap();
        assert!(heap.func(bound).is_ctor);
        let this_env = heap.func(bound).closure;
        match crate::env::get(&heap, this_env, &Token::new(TokenKind::This, "this", Literal::None, 1)) {
            Ok(Ltype::Instance(id)) => assert_eq!(id, instance),
            other => panic!("expected bound this, got {:?}", other),
        }
    }
}
