//! Type descriptors — the shape of every runtime value.
//!
//! A descriptor is one of exactly 19 kinds. Struct field order and Variant
//! case order are significant and stable: codecs read/write in descriptor
//! order, and a case's position in that order is its wire index.
//!
//! Primitive descriptors (`Never`, `Null`, `Boolean`, `Integer`, `Float`,
//! `String`, `DateTime`, `Blob`) are zero-sized and compared by variant tag
//! alone — there is nothing to share, so "singleton" falls out of `Clone`
//! being free rather than requiring a real interning table.
//!
//! Compound descriptors (`Array`, `Set`, `Dict`, `Struct`, `Variant`, `Ref`,
//! `Function`, `AsyncFunction`) hold their children behind `Rc` so cloning a
//! descriptor is O(1) and `Rc::ptr_eq` gives an identity fast path for
//! equality checks. `Vector`/`Matrix` hold only a `ScalarKind` tag, since
//! they admit exactly `{Float, Integer, Boolean}`.
//!
//! `Recursive` is the one kind that can form a cycle. The cycle is made of
//! a strong `Rc<RecursiveNode>` held by whoever owns the recursive type from
//! the outside, and `Weak<RecursiveNode>` references for every occurrence of
//! the wrapper *inside* its own inner tree. The inner self-references never
//! contribute to the strong count, so the node's storage is reclaimed the
//! moment the last outside `Rc` drops, with no manual back-reference
//! counting required.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

/// The element kind admitted by `Vector`/`Matrix`: float, integer, or
/// boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Float,
    Integer,
    Boolean,
}

impl ScalarKind {
    /// Packed byte width of one element of this kind.
    pub fn element_size(self) -> usize {
        match self {
            ScalarKind::Float => 8,
            ScalarKind::Integer => 8,
            ScalarKind::Boolean => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Float => "Float",
            ScalarKind::Integer => "Integer",
            ScalarKind::Boolean => "Boolean",
        }
    }
}

/// Wrapper node for a `Recursive` descriptor; see module docs for the
/// strong/weak ownership split that makes cycles collectible.
#[derive(Debug)]
pub struct RecursiveNode {
    pub inner: RefCell<Option<TypeDescriptor>>,
}

/// A named field or case: `(name, type)`.
pub type NamedField = (String, TypeDescriptor);

#[derive(Debug, Clone)]
pub enum TypeDescriptor {
    Never,
    Null,
    Boolean,
    Integer,
    Float,
    String,
    DateTime,
    Blob,
    Array(Rc<TypeDescriptor>),
    Set(Rc<TypeDescriptor>),
    Dict(Rc<TypeDescriptor>, Rc<TypeDescriptor>),
    Struct(Rc<Vec<NamedField>>),
    Variant(Rc<Vec<NamedField>>),
    Ref(Rc<TypeDescriptor>),
    Vector(ScalarKind),
    Matrix(ScalarKind),
    Function(Rc<Vec<TypeDescriptor>>, Rc<TypeDescriptor>),
    AsyncFunction(Rc<Vec<TypeDescriptor>>, Rc<TypeDescriptor>),
    /// The outside-owned occurrence of a recursive type.
    Recursive(Rc<RecursiveNode>),
    /// An occurrence of the wrapper *inside* its own inner tree. Does not
    /// keep the node alive; see module docs.
    RecursiveSelf(Weak<RecursiveNode>),
}

impl TypeDescriptor {
    pub fn array(element: TypeDescriptor) -> Self {
        TypeDescriptor::Array(Rc::new(element))
    }

    pub fn set(element: TypeDescriptor) -> Self {
        TypeDescriptor::Set(Rc::new(element))
    }

    pub fn dict(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        TypeDescriptor::Dict(Rc::new(key), Rc::new(value))
    }

    pub fn struct_of(fields: Vec<NamedField>) -> Self {
        debug_assert!(has_unique_names(&fields), "Struct field names must be unique");
        TypeDescriptor::Struct(Rc::new(fields))
    }

    pub fn variant_of(cases: Vec<NamedField>) -> Self {
        debug_assert!(has_unique_names(&cases), "Variant case names must be unique");
        TypeDescriptor::Variant(Rc::new(cases))
    }

    pub fn reference(inner: TypeDescriptor) -> Self {
        TypeDescriptor::Ref(Rc::new(inner))
    }

    pub fn function(inputs: Vec<TypeDescriptor>, output: TypeDescriptor) -> Self {
        TypeDescriptor::Function(Rc::new(inputs), Rc::new(output))
    }

    pub fn async_function(inputs: Vec<TypeDescriptor>, output: TypeDescriptor) -> Self {
        TypeDescriptor::AsyncFunction(Rc::new(inputs), Rc::new(output))
    }

    /// Two-step recursive construction: allocate the wrapper, let `build`
    /// construct the inner tree using the wrapper's `Weak` handle wherever
    /// it needs to refer back to itself, then close the cycle.
    pub fn recursive(build: impl FnOnce(&Rc<RecursiveNode>) -> TypeDescriptor) -> Self {
        let node = Rc::new(RecursiveNode {
            inner: RefCell::new(None),
        });
        let inner = build(&node);
        *node.inner.borrow_mut() = Some(inner);
        TypeDescriptor::Recursive(node)
    }

    /// The variant index of `name` within this `Variant` descriptor's case
    /// order, if this is a `Variant` descriptor.
    pub fn variant_case_index(&self, name: &str) -> Option<usize> {
        match self {
            TypeDescriptor::Variant(cases) => cases.iter().position(|(n, _)| n == name),
            _ => None,
        }
    }

    pub fn struct_field_index(&self, name: &str) -> Option<usize> {
        match self {
            TypeDescriptor::Struct(fields) => fields.iter().position(|(n, _)| n == name),
            _ => None,
        }
    }

    /// Unwraps a `Recursive`/`RecursiveSelf` descriptor to its current inner
    /// descriptor. Panics if a `RecursiveSelf` has outlived its node, which
    /// cannot happen while any strong `Recursive` reference on the same
    /// cycle is alive on the call stack doing the unwrapping.
    pub fn unwrap_recursive(&self) -> TypeDescriptor {
        match self {
            TypeDescriptor::Recursive(node) => node
                .inner
                .borrow()
                .clone()
                .expect("recursive descriptor used before its cycle was closed"),
            TypeDescriptor::RecursiveSelf(weak) => {
                let node = weak.upgrade().expect("dangling recursive self-reference");
                node.inner
                    .borrow()
                    .clone()
                    .expect("recursive descriptor used before its cycle was closed")
            }
            other => other.clone(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            TypeDescriptor::Never => "Never",
            TypeDescriptor::Null => "Null",
            TypeDescriptor::Boolean => "Boolean",
            TypeDescriptor::Integer => "Integer",
            TypeDescriptor::Float => "Float",
            TypeDescriptor::String => "String",
            TypeDescriptor::DateTime => "DateTime",
            TypeDescriptor::Blob => "Blob",
            TypeDescriptor::Array(_) => "Array",
            TypeDescriptor::Set(_) => "Set",
            TypeDescriptor::Dict(_, _) => "Dict",
            TypeDescriptor::Struct(_) => "Struct",
            TypeDescriptor::Variant(_) => "Variant",
            TypeDescriptor::Ref(_) => "Ref",
            TypeDescriptor::Vector(_) => "Vector",
            TypeDescriptor::Matrix(_) => "Matrix",
            TypeDescriptor::Function(_, _) => "Function",
            TypeDescriptor::AsyncFunction(_, _) => "AsyncFunction",
            TypeDescriptor::Recursive(_) | TypeDescriptor::RecursiveSelf(_) => "Recursive",
        }
    }

    /// Structural equality, cycle-safe: a pair of recursive nodes already
    /// being compared on the current path is treated as equal without
    /// recursing again (co-inductive equality).
    pub fn structural_eq(&self, other: &TypeDescriptor) -> bool {
        let mut seen = HashSet::new();
        eq_inner(self, other, &mut seen)
    }
}

fn node_ptr(node: &Rc<RecursiveNode>) -> usize {
    Rc::as_ptr(node) as usize
}

fn resolve_recursive(d: &TypeDescriptor) -> Option<Rc<RecursiveNode>> {
    match d {
        TypeDescriptor::Recursive(n) => Some(Rc::clone(n)),
        TypeDescriptor::RecursiveSelf(w) => w.upgrade(),
        _ => None,
    }
}

fn eq_inner(a: &TypeDescriptor, b: &TypeDescriptor, seen: &mut HashSet<(usize, usize)>) -> bool {
    if let (Some(na), Some(nb)) = (resolve_recursive(a), resolve_recursive(b)) {
        let key = (node_ptr(&na), node_ptr(&nb));
        if seen.contains(&key) {
            return true;
        }
        seen.insert(key);
        let ia = na.inner.borrow().clone();
        let ib = nb.inner.borrow().clone();
        return match (ia, ib) {
            (Some(ia), Some(ib)) => eq_inner(&ia, &ib, seen),
            (None, None) => true,
            _ => false,
        };
    }

    match (a, b) {
        (TypeDescriptor::Never, TypeDescriptor::Never) => true,
        (TypeDescriptor::Null, TypeDescriptor::Null) => true,
        (TypeDescriptor::Boolean, TypeDescriptor::Boolean) => true,
        (TypeDescriptor::Integer, TypeDescriptor::Integer) => true,
        (TypeDescriptor::Float, TypeDescriptor::Float) => true,
        (TypeDescriptor::String, TypeDescriptor::String) => true,
        (TypeDescriptor::DateTime, TypeDescriptor::DateTime) => true,
        (TypeDescriptor::Blob, TypeDescriptor::Blob) => true,
        (TypeDescriptor::Array(ea), TypeDescriptor::Array(eb)) => eq_inner(ea, eb, seen),
        (TypeDescriptor::Set(ea), TypeDescriptor::Set(eb)) => eq_inner(ea, eb, seen),
        (TypeDescriptor::Dict(ka, va), TypeDescriptor::Dict(kb, vb)) => {
            eq_inner(ka, kb, seen) && eq_inner(va, vb, seen)
        }
        (TypeDescriptor::Struct(fa), TypeDescriptor::Struct(fb))
        | (TypeDescriptor::Variant(fa), TypeDescriptor::Variant(fb)) => {
            fa.len() == fb.len()
                && fa
                    .iter()
                    .zip(fb.iter())
                    .all(|((na, ta), (nb, tb))| na == nb && eq_inner(ta, tb, seen))
        }
        (TypeDescriptor::Ref(ea), TypeDescriptor::Ref(eb)) => eq_inner(ea, eb, seen),
        (TypeDescriptor::Vector(ka), TypeDescriptor::Vector(kb)) => ka == kb,
        (TypeDescriptor::Matrix(ka), TypeDescriptor::Matrix(kb)) => ka == kb,
        (TypeDescriptor::Function(ia, oa), TypeDescriptor::Function(ib, ob))
        | (TypeDescriptor::AsyncFunction(ia, oa), TypeDescriptor::AsyncFunction(ib, ob)) => {
            ia.len() == ib.len()
                && ia.iter().zip(ib.iter()).all(|(x, y)| eq_inner(x, y, seen))
                && eq_inner(oa, ob, seen)
        }
        _ => false,
    }
}

fn has_unique_names(fields: &[NamedField]) -> bool {
    let mut names = HashSet::new();
    fields.iter().all(|(n, _)| names.insert(n.as_str()))
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.structural_eq(other)
    }
}

/// Printer for the textual type-descriptor syntax used in detailed codec
/// error messages and in the textual value syntax. Recursive descriptors
/// print as `rec<id>(...)`
/// with internal occurrences as `@<id>`, analogous to a De Bruijn-style mu
/// binder; re-parsing rebuilds the cycle the same two-step way.
impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<usize> = Vec::new();
        write_type(self, f, &mut ids)
    }
}

fn write_type(d: &TypeDescriptor, f: &mut fmt::Formatter<'_>, seen: &mut Vec<usize>) -> fmt::Result {
    match d {
        TypeDescriptor::Never => write!(f, "Never"),
        TypeDescriptor::Null => write!(f, "Null"),
        TypeDescriptor::Boolean => write!(f, "Boolean"),
        TypeDescriptor::Integer => write!(f, "Integer"),
        TypeDescriptor::Float => write!(f, "Float"),
        TypeDescriptor::String => write!(f, "String"),
        TypeDescriptor::DateTime => write!(f, "DateTime"),
        TypeDescriptor::Blob => write!(f, "Blob"),
        TypeDescriptor::Array(e) => {
            write!(f, "Array<")?;
            write_type(e, f, seen)?;
            write!(f, ">")
        }
        TypeDescriptor::Set(e) => {
            write!(f, "Set<")?;
            write_type(e, f, seen)?;
            write!(f, ">")
        }
        TypeDescriptor::Dict(k, v) => {
            write!(f, "Dict<")?;
            write_type(k, f, seen)?;
            write!(f, ", ")?;
            write_type(v, f, seen)?;
            write!(f, ">")
        }
        TypeDescriptor::Struct(fields) => {
            write!(f, "Struct{{")?;
            for (i, (name, ty)) in fields.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{name}: ")?;
                write_type(ty, f, seen)?;
            }
            write!(f, "}}")
        }
        TypeDescriptor::Variant(cases) => {
            write!(f, "Variant{{")?;
            for (i, (name, ty)) in cases.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                match ty {
                    TypeDescriptor::Null => write!(f, "{name}")?,
                    other => {
                        write!(f, "{name}: ")?;
                        write_type(other, f, seen)?;
                    }
                }
            }
            write!(f, "}}")
        }
        TypeDescriptor::Ref(e) => {
            write!(f, "Ref<")?;
            write_type(e, f, seen)?;
            write!(f, ">")
        }
        TypeDescriptor::Vector(k) => write!(f, "Vector<{}>", k.name()),
        TypeDescriptor::Matrix(k) => write!(f, "Matrix<{}>", k.name()),
        TypeDescriptor::Function(inputs, output) => {
            write!(f, "Function(")?;
            for (i, ty) in inputs.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_type(ty, f, seen)?;
            }
            write!(f, ") -> ")?;
            write_type(output, f, seen)
        }
        TypeDescriptor::AsyncFunction(inputs, output) => {
            write!(f, "AsyncFunction(")?;
            for (i, ty) in inputs.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_type(ty, f, seen)?;
            }
            write!(f, ") -> ")?;
            write_type(output, f, seen)
        }
        TypeDescriptor::Recursive(node) => {
            let id = seen.len();
            seen.push(node_ptr(node));
            write!(f, "rec{id}(")?;
            let inner = node.inner.borrow().clone();
            match inner {
                Some(inner) => write_type(&inner, f, seen)?,
                None => write!(f, "<unclosed>")?,
            }
            seen.pop();
            write!(f, ")")
        }
        TypeDescriptor::RecursiveSelf(weak) => {
            let ptr = weak.as_ptr() as usize;
            match seen.iter().rposition(|&p| p == ptr) {
                Some(idx) => write!(f, "@{idx}"),
                None => write!(f, "@?"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_structurally_equal() {
        assert_eq!(TypeDescriptor::Integer, TypeDescriptor::Integer);
        assert_ne!(TypeDescriptor::Integer, TypeDescriptor::Float);
    }

    #[test]
    fn compound_descriptors_compare_structurally_not_by_identity() {
        let a = TypeDescriptor::array(TypeDescriptor::Integer);
        let b = TypeDescriptor::array(TypeDescriptor::Integer);
        assert_eq!(a, b);
        if let (TypeDescriptor::Array(ra), TypeDescriptor::Array(rb)) = (&a, &b) {
            assert!(!Rc::ptr_eq(ra, rb));
        }
    }

    #[test]
    fn struct_field_order_matters_for_equality_of_names() {
        let a = TypeDescriptor::struct_of(vec![
            ("a".into(), TypeDescriptor::Integer),
            ("b".into(), TypeDescriptor::String),
        ]);
        let b = TypeDescriptor::struct_of(vec![
            ("b".into(), TypeDescriptor::String),
            ("a".into(), TypeDescriptor::Integer),
        ]);
        // Same names/types but different order: not structurally equal,
        // because field order is part of the descriptor.
        assert_ne!(a, b);
    }

    #[test]
    fn recursive_list_type_is_self_referential_and_equal_to_itself() {
        // Recursive<Variant{Nil, Cons: Struct{head: Integer, tail: Recursive}}>
        let list_ty = TypeDescriptor::recursive(|node| {
            TypeDescriptor::variant_of(vec![
                ("Nil".into(), TypeDescriptor::Null),
                (
                    "Cons".into(),
                    TypeDescriptor::struct_of(vec![
                        ("head".into(), TypeDescriptor::Integer),
                        (
                            "tail".into(),
                            TypeDescriptor::RecursiveSelf(Rc::downgrade(node)),
                        ),
                    ]),
                ),
            ])
        });

        let list_ty_2 = TypeDescriptor::recursive(|node| {
            TypeDescriptor::variant_of(vec![
                ("Nil".into(), TypeDescriptor::Null),
                (
                    "Cons".into(),
                    TypeDescriptor::struct_of(vec![
                        ("head".into(), TypeDescriptor::Integer),
                        (
                            "tail".into(),
                            TypeDescriptor::RecursiveSelf(Rc::downgrade(node)),
                        ),
                    ]),
                ),
            ])
        });

        assert_eq!(list_ty, list_ty_2);
    }

    #[test]
    fn recursive_node_is_dropped_once_last_outside_rc_drops() {
        let list_ty = TypeDescriptor::recursive(|node| {
            TypeDescriptor::array(TypeDescriptor::RecursiveSelf(Rc::downgrade(node)))
        });
        let weak = match &list_ty {
            TypeDescriptor::Recursive(rc) => Rc::downgrade(rc),
            _ => unreachable!(),
        };
        assert!(weak.upgrade().is_some());
        drop(list_ty);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn display_renders_recursive_with_self_reference_marker() {
        let list_ty = TypeDescriptor::recursive(|node| {
            TypeDescriptor::variant_of(vec![
                ("Nil".into(), TypeDescriptor::Null),
                (
                    "Cons".into(),
                    TypeDescriptor::struct_of(vec![
                        ("head".into(), TypeDescriptor::Integer),
                        (
                            "tail".into(),
                            TypeDescriptor::RecursiveSelf(Rc::downgrade(node)),
                        ),
                    ]),
                ),
            ])
        });
        let printed = list_ty.to_string();
        assert!(printed.starts_with("rec0("));
        assert!(printed.contains("@0"));
    }
}
