//! Builtin and platform registries, and the thread-local registry context a
//! worker must install before decoding a function value.
//!
//! A builtin factory has shape `(type-params) -> body`; a body takes
//! `(args)` and either returns a value or signals failure through the
//! thread-local builtin-error slot (`vellum_core::error_slot`). A platform
//! factory has the same shape but its body returns the interpreter's full
//! `EvalResult` so platform calls can surface rich errors or control flow.
//!
//! Both registries are immutable once built, so sharing a `Rc<BuiltinRegistry>`
//! with a worker thread — by handing it an owned clone of the `Rc`, not by
//! sending the original across threads — is safe as long as each thread gets
//! its own `Rc` handle (`Rc` itself is `!Send`, which is why context
//! installation happens once per worker, not once globally; see `parallel.rs`).

use crate::interp::EvalResult;
use crate::types::TypeDescriptor;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub type BuiltinBody = Rc<dyn Fn(&[Value]) -> Option<Value>>;
pub type BuiltinFactory = Rc<dyn Fn(&[TypeDescriptor]) -> BuiltinBody>;
pub type PlatformBody = Rc<dyn Fn(&[Value]) -> EvalResult>;
pub type PlatformFactory = Rc<dyn Fn(&[TypeDescriptor]) -> PlatformBody>;

/// Whether a platform registration is meant to be awaited. The interpreter
/// does not currently distinguish scheduling for these; the flag exists for
/// the compiler's benefit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asyncness {
    Sync,
    Async,
}

struct PlatformEntry {
    factory: PlatformFactory,
    asyncness: Asyncness,
}

#[derive(Default)]
pub struct BuiltinRegistry {
    entries: HashMap<String, BuiltinFactory>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, factory: BuiltinFactory) {
        self.entries.insert(name.into(), factory);
    }

    /// Shortcut: register a non-generic body directly, equivalent to a
    /// factory that ignores its type-parameter arguments.
    pub fn register_fn(
        &mut self,
        name: impl Into<String>,
        body: impl Fn(&[Value]) -> Option<Value> + 'static,
    ) {
        let body: BuiltinBody = Rc::new(body);
        self.register(name, Rc::new(move |_type_params: &[TypeDescriptor]| Rc::clone(&body)));
    }

    pub fn resolve(&self, name: &str, type_params: &[TypeDescriptor]) -> Option<BuiltinBody> {
        self.entries.get(name).map(|factory| factory(type_params))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[derive(Default)]
pub struct PlatformRegistry {
    entries: HashMap<String, PlatformEntry>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, factory: PlatformFactory, asyncness: Asyncness) {
        self.entries.insert(name.into(), PlatformEntry { factory, asyncness });
    }

    pub fn register_fn(
        &mut self,
        name: impl Into<String>,
        asyncness: Asyncness,
        body: impl Fn(&[Value]) -> EvalResult + 'static,
    ) {
        let body: PlatformBody = Rc::new(body);
        self.register(
            name,
            Rc::new(move |_type_params: &[TypeDescriptor]| Rc::clone(&body)),
            asyncness,
        );
    }

    pub fn resolve(&self, name: &str, type_params: &[TypeDescriptor]) -> Option<PlatformBody> {
        self.entries.get(name).map(|entry| (entry.factory)(type_params))
    }

    pub fn asyncness_of(&self, name: &str) -> Option<Asyncness> {
        self.entries.get(name).map(|entry| entry.asyncness)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

thread_local! {
    static CURRENT_BUILTINS: RefCell<Option<Rc<BuiltinRegistry>>> = const { RefCell::new(None) };
    static CURRENT_PLATFORM: RefCell<Option<Rc<PlatformRegistry>>> = const { RefCell::new(None) };
}

/// Install the active registries for the current thread. Must be called on
/// every worker thread before any codec might materialize a function value.
pub fn install_registries(builtins: Rc<BuiltinRegistry>, platform: Rc<PlatformRegistry>) {
    CURRENT_BUILTINS.with(|slot| *slot.borrow_mut() = Some(builtins));
    CURRENT_PLATFORM.with(|slot| *slot.borrow_mut() = Some(platform));
}

pub fn current_builtins() -> Option<Rc<BuiltinRegistry>> {
    CURRENT_BUILTINS.with(|slot| slot.borrow().clone())
}

pub fn current_platform() -> Option<Rc<PlatformRegistry>> {
    CURRENT_PLATFORM.with(|slot| slot.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_fn_is_resolvable_by_name() {
        let mut reg = BuiltinRegistry::new();
        reg.register_fn("double", |args| {
            args[0].as_integer().map(|n| Value::Integer(n * 2))
        });
        let body = reg.resolve("double", &[]).unwrap();
        assert_eq!(body(&[Value::Integer(21)]), Some(Value::Integer(42)));
    }

    #[test]
    fn unknown_name_resolves_to_none() {
        let reg = BuiltinRegistry::new();
        assert!(reg.resolve("nope", &[]).is_none());
    }

    #[test]
    fn thread_local_context_round_trips() {
        install_registries(Rc::new(BuiltinRegistry::new()), Rc::new(PlatformRegistry::new()));
        assert!(current_builtins().is_some());
        assert!(current_platform().is_some());
    }
}
