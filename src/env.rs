// ABOUTME: Free functions implementing the Environment chain's def/get/assign protocol over the heap

use crate::error::RuntimeError;
use crate::heap::{EnvId, Heap};
use crate::token::Token;
use crate::value::Ltype;

/// Walks `distance` enclosing links up from `start`. Called only with
/// distances the resolver produced, so a missing enclosing frame is an
/// interpreter bug, not a user error.
pub fn ancestor(heap: &Heap, start: EnvId, distance: usize) -> EnvId {
    let mut current = start;
    for _ in 0..distance {
        let next = heap.env(current).enclosing.expect("resolver distance exceeds environment chain");
        current = next;
    }
    current
}

/// Defines `name` in `env` directly, shadowing any existing binding in that
/// same frame. `value = None` encodes "declared but not initialized".
pub fn define(heap: &Heap, env: EnvId, name: &str, value: Option<Ltype>) {
    heap.env_mut(env).bindings.insert(name.to_string(), value);
}

/// Looks up `name` starting at `env` and walking outward. Distinguishes
/// "declared but uninitialized" from "never declared" so the caller can
/// report the right runtime error.
pub fn get(heap: &Heap, env: EnvId, token: &Token) -> Result<Ltype, RuntimeError> {
    let mut current = env;
    loop {
        let found = heap.env(current).bindings.get(&token.lexeme).cloned();
        match found {
            Some(Some(value)) => return Ok(value),
            Some(None) => {
                return Err(RuntimeError::new(
                    token.clone(),
                    format!("uninitialized variable '{}'", token.lexeme),
                ))
            }
            None => {
                let enclosing = heap.env(current).enclosing;
                match enclosing {
                    Some(parent) => current = parent,
                    None => {
                        return Err(RuntimeError::new(
                            token.clone(),
                            format!("undefined variable '{}'", token.lexeme),
                        ))
                    }
                }
            }
        }
    }
}

pub fn get_at(heap: &Heap, env: EnvId, distance: usize, name: &str) -> Ltype {
    let frame = ancestor(heap, env, distance);
    heap.env(frame)
        .bindings
        .get(name)
        .cloned()
        .flatten()
        .unwrap_or_else(|| panic!("resolver recorded a binding for '{name}' that isn't there"))
}

pub fn assign(heap: &Heap, env: EnvId, token: &Token, value: Ltype) -> Result<(), RuntimeError> {
    let mut current = env;
    loop {
        let has_binding = heap.env(current).bindings.contains_key(&token.lexeme);
        if has_binding {
            heap.env_mut(current).bindings.insert(token.lexeme.clone(), Some(value));
            return Ok(());
        }
        let enclosing = heap.env(current).enclosing;
        match enclosing {
            Some(parent) => current = parent,
            None => {
                return Err(RuntimeError::new(
                    token.clone(),
                    format!("undefined variable '{}'", token.lexeme),
                ))
            }
        }
    }
}

pub fn assign_at(heap: &Heap, env: EnvId, distance: usize, name: &str, value: Ltype) {
    let frame = ancestor(heap, env, distance);
    heap.env_mut(frame).bindings.insert(name.to_string(), Some(value));
}
