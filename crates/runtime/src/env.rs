//! Lexical environment.
//!
//! A `Frame` maps names to values and chains to a parent frame. Lookups walk
//! the chain; `assign` walks the chain to find the binding's *originating*
//! frame and replaces the value there, so a closure that captured a mutable
//! binding by frame (not by value) observes later assignments to it. There
//! is no extra indirection cell per binding: a closure sees later writes
//! because it holds the same `Rc<Frame>` the writer mutates.

use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug)]
pub struct Frame {
    bindings: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Frame>>,
}

impl Frame {
    pub fn root() -> Rc<Frame> {
        Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    pub fn child(parent: &Rc<Frame>) -> Rc<Frame> {
        Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    /// Bind (or rebind) `name` in *this* frame, shadowing any outer binding.
    pub fn bind(&self, name: impl Into<String>, value: Value) {
        self.bindings.borrow_mut().insert(name.into(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.bindings.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// Replace `name`'s value in the frame where it is actually bound.
    /// Returns `false` if no frame in the chain has `name` bound.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        if self.bindings.borrow().contains_key(name) {
            self.bindings.borrow_mut().insert(name.to_string(), value);
            return true;
        }
        match &self.parent {
            Some(p) => p.assign(name, value),
            None => false,
        }
    }

    pub fn is_bound_locally(&self, name: &str) -> bool {
        self.bindings.borrow().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_up_the_chain() {
        let root = Frame::root();
        root.bind("x", Value::Integer(1));
        let child = Frame::child(&root);
        assert_eq!(child.lookup("x"), Some(Value::Integer(1)));
    }

    #[test]
    fn assign_mutates_the_originating_frame_not_a_shadow() {
        let root = Frame::root();
        root.bind("x", Value::Integer(1));
        let child = Frame::child(&root);
        assert!(child.assign("x", Value::Integer(2)));
        assert_eq!(root.lookup("x"), Some(Value::Integer(2)));
        assert!(!child.is_bound_locally("x"));
    }

    #[test]
    fn assign_to_unbound_name_fails() {
        let root = Frame::root();
        assert!(!root.assign("missing", Value::Null));
    }

    #[test]
    fn child_binding_shadows_parent() {
        let root = Frame::root();
        root.bind("x", Value::Integer(1));
        let child = Frame::child(&root);
        child.bind("x", Value::Integer(99));
        assert_eq!(child.lookup("x"), Some(Value::Integer(99)));
        assert_eq!(root.lookup("x"), Some(Value::Integer(1)));
    }
}
