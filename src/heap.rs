// ABOUTME: The reclaimer — an arena-backed heap with an explicit root stack and a mark-and-sweep collector

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::mem::size_of;
use std::rc::Rc;

use crate::ast::stmt::FunctionBody;
use crate::error::RuntimeError;
use crate::token::Token;
use crate::value::Ltype;

/// Heap-object universe, as spec.md §3: `Environment | UserFunc | Class | Instance`.
/// Each is allocated into its own arena so a typed id can never be confused
/// with an id from another arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvId(u32);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(u32);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(u32);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(u32);

#[derive(Debug)]
pub struct Env {
    pub bindings: HashMap<String, Option<Ltype>>,
    pub enclosing: Option<EnvId>,
}

impl Env {
    pub fn new(enclosing: Option<EnvId>) -> Self {
        Env { bindings: HashMap::new(), enclosing }
    }
}

#[derive(Debug)]
pub struct UserFunc {
    pub name: Option<String>,
    pub function: Rc<FunctionBody>,
    pub closure: EnvId,
    pub is_ctor: bool,
}

#[derive(Debug)]
pub struct Class {
    pub name: String,
    pub superclass: Option<ClassId>,
    /// The frame introduced solely to bind `super`, present only when this
    /// class has a superclass.
    pub super_env: Option<EnvId>,
    pub methods: HashMap<String, FuncId>,
    pub static_methods: HashMap<String, FuncId>,
}

#[derive(Debug)]
pub struct Instance {
    pub class: ClassId,
    pub fields: HashMap<String, Ltype>,
}

struct Slot<T> {
    reachable: Cell<bool>,
    value: T,
}

struct Arena<T> {
    slots: Vec<Option<Slot<T>>>,
    free: Vec<u32>,
    item_size: usize,
}

impl<T> Arena<T> {
    fn new(item_size: usize) -> Self {
        Arena { slots: Vec::new(), free: Vec::new(), item_size }
    }

    fn insert(&mut self, value: T) -> u32 {
        let slot = Some(Slot { reachable: Cell::new(false), value });
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = slot;
            idx
        } else {
            self.slots.push(slot);
            (self.slots.len() - 1) as u32
        }
    }

    fn get(&self, idx: u32) -> &T {
        &self.slots[idx as usize].as_ref().expect("dangling heap id").value
    }

    fn get_mut(&mut self, idx: u32) -> &mut T {
        &mut self.slots[idx as usize].as_mut().expect("dangling heap id").value
    }

    fn mark(&self, idx: u32) -> bool {
        let slot = self.slots[idx as usize].as_ref().expect("dangling heap id");
        let was_marked = slot.reachable.replace(true);
        !was_marked
    }

    /// Frees every unmarked slot, returns bytes freed, and clears every
    /// surviving slot's mark for the next cycle.
    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            let live = match slot {
                Some(s) if s.reachable.get() => {
                    s.reachable.set(false);
                    true
                }
                Some(_) => false,
                None => continue,
            };
            if !live {
                *slot = None;
                self.free.push(idx as u32);
                freed += self.item_size;
            }
        }
        freed
    }

    fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

/// Anything that can be pinned on the root stack mid-expression: either a
/// runtime value or an environment frame that doesn't yet have a value form.
#[derive(Debug, Clone)]
pub enum Root {
    Value(Ltype),
    Env(EnvId),
}

/// The allocator and collector. Interior-mutable so recursive evaluation can
/// allocate through a shared reference while a `PinScope` above it on the
/// Rust call stack holds roots alive.
pub struct Heap {
    envs: RefCell<Arena<Env>>,
    funcs: RefCell<Arena<UserFunc>>,
    classes: RefCell<Arena<Class>>,
    instances: RefCell<Arena<Instance>>,
    stack: RefCell<Vec<Root>>,
    heap_size: Cell<usize>,
    limit: usize,
}

impl Heap {
    pub fn new() -> Self {
        Heap::with_limit(crate::config::DEFAULT_HEAP_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Heap {
            envs: RefCell::new(Arena::new(size_of::<Env>())),
            funcs: RefCell::new(Arena::new(size_of::<UserFunc>())),
            classes: RefCell::new(Arena::new(size_of::<Class>())),
            instances: RefCell::new(Arena::new(size_of::<Instance>())),
            stack: RefCell::new(Vec::new()),
            heap_size: Cell::new(0),
            limit,
        }
    }

    pub fn heap_size(&self) -> usize {
        self.heap_size.get()
    }

    pub fn live_object_count(&self) -> usize {
        self.envs.borrow().live_count()
            + self.funcs.borrow().live_count()
            + self.classes.borrow().live_count()
            + self.instances.borrow().live_count()
    }

    fn reserve(&self, size: usize, envp: EnvId, token: &Token) -> Result<(), RuntimeError> {
        if self.heap_size.get() + size < self.limit {
            self.heap_size.set(self.heap_size.get() + size);
            return Ok(());
        }
        self.collect(envp);
        if self.heap_size.get() + size >= self.limit {
            return Err(RuntimeError::new(token.clone(), "out of memory"));
        }
        self.heap_size.set(self.heap_size.get() + size);
        Ok(())
    }

    pub fn alloc_env(&self, env: Env, envp: EnvId, token: &Token) -> Result<EnvId, RuntimeError> {
        self.reserve(size_of::<Env>(), envp, token)?;
        Ok(EnvId(self.envs.borrow_mut().insert(env)))
    }

    /// Used only to create the very first (global) environment, before any
    /// `envp` root exists to collect against.
    pub fn alloc_root_env(&self) -> EnvId {
        self.heap_size.set(self.heap_size.get() + size_of::<Env>());
        EnvId(self.envs.borrow_mut().insert(Env::new(None)))
    }

    pub fn alloc_func(&self, func: UserFunc, envp: EnvId, token: &Token) -> Result<FuncId, RuntimeError> {
        self.reserve(size_of::<UserFunc>(), envp, token)?;
        Ok(FuncId(self.funcs.borrow_mut().insert(func)))
    }

    pub fn alloc_class(&self, class: Class, envp: EnvId, token: &Token) -> Result<ClassId, RuntimeError> {
        self.reserve(size_of::<Class>(), envp, token)?;
        Ok(ClassId(self.classes.borrow_mut().insert(class)))
    }

    pub fn alloc_instance(&self, instance: Instance, envp: EnvId, token: &Token) -> Result<InstanceId, RuntimeError> {
        self.reserve(size_of::<Instance>(), envp, token)?;
        Ok(InstanceId(self.instances.borrow_mut().insert(instance)))
    }

    pub fn env(&self, id: EnvId) -> std::cell::Ref<'_, Env> {
        std::cell::Ref::map(self.envs.borrow(), |a| a.get(id.0))
    }

    pub fn env_mut(&self, id: EnvId) -> std::cell::RefMut<'_, Env> {
        std::cell::RefMut::map(self.envs.borrow_mut(), |a| a.get_mut(id.0))
    }

    pub fn func(&self, id: FuncId) -> std::cell::Ref<'_, UserFunc> {
        std::cell::Ref::map(self.funcs.borrow(), |a| a.get(id.0))
    }

    pub fn class(&self, id: ClassId) -> std::cell::Ref<'_, Class> {
        std::cell::Ref::map(self.classes.borrow(), |a| a.get(id.0))
    }

    pub fn class_mut(&self, id: ClassId) -> std::cell::RefMut<'_, Class> {
        std::cell::RefMut::map(self.classes.borrow_mut(), |a| a.get_mut(id.0))
    }

    pub fn instance(&self, id: InstanceId) -> std::cell::Ref<'_, Instance> {
        std::cell::Ref::map(self.instances.borrow(), |a| a.get(id.0))
    }

    pub fn instance_mut(&self, id: InstanceId) -> std::cell::RefMut<'_, Instance> {
        std::cell::RefMut::map(self.instances.borrow_mut(), |a| a.get_mut(id.0))
    }

    /// Pushes a new root and returns how many entries `PinScope` must pop.
    pub fn pin(&self, root: Root) {
        self.stack.borrow_mut().push(root);
    }

    pub fn pop_pins(&self, count: usize) {
        let mut stack = self.stack.borrow_mut();
        let new_len = stack.len().saturating_sub(count);
        stack.truncate(new_len);
    }

    pub fn collect(&self, envp: EnvId) {
        for root in self.stack.borrow().iter() {
            match root {
                Root::Value(value) => self.mark_value(value),
                Root::Env(id) => self.mark_env(*id),
            }
        }
        self.mark_env(envp);

        let freed = self.envs.borrow_mut().sweep()
            + self.funcs.borrow_mut().sweep()
            + self.classes.borrow_mut().sweep()
            + self.instances.borrow_mut().sweep();
        self.heap_size.set(self.heap_size.get().saturating_sub(freed));
    }

    fn mark_env(&self, id: EnvId) {
        if !self.envs.borrow().mark(id.0) {
            return;
        }
        let enclosing = self.env(id).enclosing;
        let values: Vec<Ltype> = self.env(id).bindings.values().flatten().cloned().collect();
        for value in &values {
            self.mark_value(value);
        }
        if let Some(parent) = enclosing {
            self.mark_env(parent);
        }
    }

    fn mark_func(&self, id: FuncId) {
        if !self.funcs.borrow().mark(id.0) {
            return;
        }
        let closure = self.func(id).closure;
        self.mark_env(closure);
    }

    fn mark_class(&self, id: ClassId) {
        if !self.classes.borrow().mark(id.0) {
            return;
        }
        let (methods, static_methods, superclass, super_env) = {
            let class = self.class(id);
            (
                class.methods.values().copied().collect::<Vec<_>>(),
                class.static_methods.values().copied().collect::<Vec<_>>(),
                class.superclass,
                class.super_env,
            )
        };
        for m in methods {
            self.mark_func(m);
        }
        for m in static_methods {
            self.mark_func(m);
        }
        if let Some(super_id) = superclass {
            self.mark_class(super_id);
        }
        if let Some(env_id) = super_env {
            self.mark_env(env_id);
        }
    }

    fn mark_instance(&self, id: InstanceId) {
        if !self.instances.borrow().mark(id.0) {
            return;
        }
        let (fields, class) = {
            let instance = self.instance(id);
            (instance.fields.values().cloned().collect::<Vec<_>>(), instance.class)
        };
        for field in &fields {
            self.mark_value(field);
        }
        self.mark_class(class);
    }

    fn mark_value(&self, value: &Ltype) {
        match value {
            Ltype::UserFunc(id) => self.mark_func(*id),
            Ltype::Class(id) => self.mark_class(*id),
            Ltype::Instance(id) => self.mark_instance(*id),
            Ltype::String(_) | Ltype::Number(_) | Ltype::Bool(_) | Ltype::Nil | Ltype::NativeFunc(_) => {}
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

/// RAII root-stack guard, the Rust analogue of the original's `ReclaimerCtx`.
/// Every value handed to `add` is pinned for the guard's lifetime; on drop
/// exactly that many entries are popped, regardless of how the enclosing
/// expression evaluation unwound.
pub struct PinScope<'a> {
    heap: &'a Heap,
    count: usize,
}

impl<'a> PinScope<'a> {
    pub fn new(heap: &'a Heap) -> Self {
        PinScope { heap, count: 0 }
    }

    pub fn add_value(&mut self, value: Ltype) -> Ltype {
        self.heap.pin(Root::Value(value.clone()));
        self.count += 1;
        value
    }

    pub fn add_env(&mut self, env: EnvId) -> EnvId {
        self.heap.pin(Root::Env(env));
        self.count += 1;
        env
    }
}

impl Drop for PinScope<'_> {
    fn drop(&mut self) {
        self.heap.pop_pins(self.count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{Literal, TokenKind};

    fn tok() -> Token {
        Token::new(TokenKind::Identifier, "x", Literal::None, 1)
    }

    #[test]
    fn unreachable_env_is_swept() {
        let heap = Heap::with_limit(1 << 20);
        let root = heap.alloc_root_env();
        let orphan = heap.alloc_env(Env::new(None), root, &tok()).unwrap();
        let _ = orphan;
        assert_eq!(heap.live_object_count(), 2);
        heap.collect(root);
        assert_eq!(heap.live_object_count(), 1);
    }

    #[test]
    fn pinned_value_survives_collection() {
        let heap = Heap::with_limit(1 << 20);
        let root = heap.alloc_root_env();
        let func = heap.alloc_func(
            UserFunc {
                name: None,
                function: Rc::new(FunctionBody { params: vec![], body: vec![] }),
                closure: root,
                is_ctor: false,
            },
            root,
            &tok(),
        )
        .unwrap();
        let mut scope = PinScope::new(&heap);
        scope.add_value(Ltype::UserFunc(func));
        heap.collect(root);
        assert_eq!(heap.live_object_count(), 2);
        drop(scope);
        heap.collect(root);
        assert_eq!(heap.live_object_count(), 1);
    }

    #[test]
    fn allocation_past_limit_triggers_collection_and_then_errors() {
        let heap = Heap::with_limit(size_of::<Env>() * 2);
        let root = heap.alloc_root_env();
        let result = heap.alloc_env(Env::new(Some(root)), root, &tok());
        assert!(result.is_err());
    }
}
