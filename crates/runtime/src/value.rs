//! The value universe.
//!
//! `Value` is a tagged union of every runtime value kind. Compound
//! containers are `Rc<RefCell<_>>` rather than an atomically reference
//! counted pointer: nothing in this runtime ever hands a live `Value` across
//! a thread boundary — the parallel map worker always goes through bytes —
//! so plain, non-atomic counting is both correct and cheaper here.
//!
//! `Ref` is the only value kind permitted to participate in observable
//! sharing: two `Value::Array`s that alias the same `Rc` are
//! indistinguishable from two structurally-equal-but-separate arrays by any
//! operation in this module, which is exactly the point — container
//! identity only becomes observable through `Ref`'s interior mutability, or
//! through a codec's backreference protocol operating on the `Rc` pointer
//! directly.

use crate::closures::CompiledClosure;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

/// A packed scalar buffer, used by both `Vector` (1-D) and `Matrix` (2-D,
/// row-major) values. The element kind is fixed for the buffer's lifetime.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarBuffer {
    Float(Vec<f64>),
    Integer(Vec<i64>),
    Boolean(Vec<bool>),
}

impl ScalarBuffer {
    pub fn len(&self) -> usize {
        match self {
            ScalarBuffer::Float(v) => v.len(),
            ScalarBuffer::Integer(v) => v.len(),
            ScalarBuffer::Boolean(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A 2-D packed buffer: `rows * cols == data.len()`.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixBuffer {
    pub rows: usize,
    pub cols: usize,
    pub data: ScalarBuffer,
}

/// A `Variant` value: the case that was constructed, plus its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantValue {
    pub case: Rc<str>,
    pub payload: Value,
}

#[derive(Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(Rc<str>),
    /// 64-bit signed epoch-millis, UTC.
    DateTime(i64),
    Blob(Rc<Vec<u8>>),
    Array(Rc<RefCell<Vec<Value>>>),
    /// Insertion-ordered, duplicate-eliminated by structural value equality.
    Set(Rc<RefCell<Vec<Value>>>),
    /// Insertion-ordered key/value pairs, duplicate keys eliminated by
    /// structural value equality (last write wins, matching the IR's
    /// insertion-by-replace semantics).
    Dict(Rc<RefCell<Vec<(Value, Value)>>>),
    /// Field values in descriptor order. Structs are immutable once built;
    /// the language's one mutable cell kind is `Ref`.
    Struct(Rc<Vec<Value>>),
    Variant(Rc<VariantValue>),
    Ref(Rc<RefCell<Value>>),
    Vector(Rc<RefCell<ScalarBuffer>>),
    Matrix(Rc<RefCell<MatrixBuffer>>),
    Function(Rc<CompiledClosure>),
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::String(s.into())
    }

    pub fn blob(bytes: Vec<u8>) -> Self {
        Value::Blob(Rc::new(bytes))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn reference(inner: Value) -> Self {
        Value::Ref(Rc::new(RefCell::new(inner)))
    }

    pub fn variant(case: impl Into<Rc<str>>, payload: Value) -> Self {
        Value::Variant(Rc::new(VariantValue {
            case: case.into(),
            payload,
        }))
    }

    pub fn struct_of(fields: Vec<Value>) -> Self {
        Value::Struct(Rc::new(fields))
    }

    /// Build a `Set`, eliminating duplicates by structural equality,
    /// keeping the first occurrence's position.
    pub fn set(items: Vec<Value>) -> Self {
        let mut out: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            if !out.iter().any(|existing| values_equal(existing, &item)) {
                out.push(item);
            }
        }
        Value::Set(Rc::new(RefCell::new(out)))
    }

    /// Build a `Dict`, last write for a given key wins, insertion order of
    /// first occurrence is preserved.
    pub fn dict(pairs: Vec<(Value, Value)>) -> Self {
        let mut out: Vec<(Value, Value)> = Vec::with_capacity(pairs.len());
        for (k, v) in pairs {
            if let Some(slot) = out.iter_mut().find(|(ek, _)| values_equal(ek, &k)) {
                slot.1 = v;
            } else {
                out.push((k, v));
            }
        }
        Value::Dict(Rc::new(RefCell::new(out)))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::DateTime(_) => "DateTime",
            Value::Blob(_) => "Blob",
            Value::Array(_) => "Array",
            Value::Set(_) => "Set",
            Value::Dict(_) => "Dict",
            Value::Struct(_) => "Struct",
            Value::Variant(_) => "Variant",
            Value::Ref(_) => "Ref",
            Value::Vector(_) => "Vector",
            Value::Matrix(_) => "Matrix",
            Value::Function(_) => "Function",
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::DateTime(t) => write!(f, "DateTime({t})"),
            Value::Blob(b) => write!(f, "0x{}", hex_lower(b)),
            Value::Array(items) => f.debug_list().entries(items.borrow().iter()).finish(),
            Value::Set(items) => write!(f, "Set{:?}", items.borrow()),
            Value::Dict(pairs) => write!(f, "Dict{:?}", pairs.borrow()),
            Value::Struct(fields) => write!(f, "Struct{:?}", fields),
            Value::Variant(v) => write!(f, ".{} {:?}", v.case, v.payload),
            Value::Ref(cell) => write!(f, "&{:?}", cell.borrow()),
            Value::Vector(buf) => write!(f, "vec{:?}", buf.borrow()),
            Value::Matrix(buf) => write!(f, "mat{:?}", buf.borrow()),
            Value::Function(_) => write!(f, "<function>"),
        }
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Structural equality across every value kind.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        (Value::Integer(x), Value::Integer(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits() || x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::DateTime(x), Value::DateTime(y)) => x == y,
        (Value::Blob(x), Value::Blob(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            Rc::ptr_eq(x, y) || {
                let (xb, yb) = (x.borrow(), y.borrow());
                xb.len() == yb.len() && xb.iter().zip(yb.iter()).all(|(a, b)| values_equal(a, b))
            }
        }
        (Value::Set(x), Value::Set(y)) => {
            Rc::ptr_eq(x, y) || {
                let (xb, yb) = (x.borrow(), y.borrow());
                xb.len() == yb.len()
                    && xb
                        .iter()
                        .all(|item| yb.iter().any(|other| values_equal(item, other)))
            }
        }
        (Value::Dict(x), Value::Dict(y)) => {
            Rc::ptr_eq(x, y) || {
                let (xb, yb) = (x.borrow(), y.borrow());
                xb.len() == yb.len()
                    && xb.iter().all(|(k, v)| {
                        yb.iter()
                            .any(|(ok, ov)| values_equal(k, ok) && values_equal(v, ov))
                    })
            }
        }
        (Value::Struct(x), Value::Struct(y)) => {
            Rc::ptr_eq(x, y)
                || (x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| values_equal(a, b)))
        }
        (Value::Variant(x), Value::Variant(y)) => {
            Rc::ptr_eq(x, y) || (x.case == y.case && values_equal(&x.payload, &y.payload))
        }
        (Value::Ref(x), Value::Ref(y)) => Rc::ptr_eq(x, y) || values_equal(&x.borrow(), &y.borrow()),
        (Value::Vector(x), Value::Vector(y)) => Rc::ptr_eq(x, y) || *x.borrow() == *y.borrow(),
        (Value::Matrix(x), Value::Matrix(y)) => Rc::ptr_eq(x, y) || *x.borrow() == *y.borrow(),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        values_equal(self, other)
    }
}

/// Ordering for primitive kinds only: integers, floats with NaN
/// sorted high, strings lexicographic on bytes, datetimes by millis, blobs
/// lexicographic, booleans false < true. Returns `None` for non-primitive
/// kinds or mismatched kinds.
pub fn compare_primitives(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Boolean(x), Value::Boolean(y)) => Some(x.cmp(y)),
        (Value::Integer(x), Value::Integer(y)) => Some(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => Some(compare_floats(*x, *y)),
        (Value::String(x), Value::String(y)) => Some(x.as_bytes().cmp(y.as_bytes())),
        (Value::DateTime(x), Value::DateTime(y)) => Some(x.cmp(y)),
        (Value::Blob(x), Value::Blob(y)) => Some(x.as_slice().cmp(y.as_slice())),
        _ => None,
    }
}

/// Total order on floats with NaN sorted high.
pub fn compare_floats(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrays_compare_structurally_even_when_not_shared() {
        let a = Value::array(vec![Value::Integer(1), Value::Integer(2)]);
        let b = Value::array(vec![Value::Integer(1), Value::Integer(2)]);
        assert_eq!(a, b);
    }

    #[test]
    fn shared_ref_mutation_is_visible_through_every_alias() {
        let r = Value::reference(Value::Integer(0));
        let alias = r.clone();
        if let Value::Ref(cell) = &r {
            *cell.borrow_mut() = Value::Integer(1);
        }
        if let Value::Ref(cell) = &alias {
            assert_eq!(*cell.borrow(), Value::Integer(1));
        } else {
            panic!("expected Ref");
        }
    }

    #[test]
    fn set_dedups_by_structural_equality_keeping_first_position() {
        let s = Value::set(vec![Value::Integer(1), Value::Integer(2), Value::Integer(1)]);
        if let Value::Set(items) = s {
            let items = items.borrow();
            assert_eq!(items.len(), 2);
            assert_eq!(items[0], Value::Integer(1));
            assert_eq!(items[1], Value::Integer(2));
        } else {
            panic!("expected Set");
        }
    }

    #[test]
    fn dict_last_write_wins_first_position_kept() {
        let d = Value::dict(vec![
            (Value::string("a"), Value::Integer(1)),
            (Value::string("b"), Value::Integer(2)),
            (Value::string("a"), Value::Integer(3)),
        ]);
        if let Value::Dict(pairs) = d {
            let pairs = pairs.borrow();
            assert_eq!(pairs.len(), 2);
            assert_eq!(pairs[0], (Value::string("a"), Value::Integer(3)));
        } else {
            panic!("expected Dict");
        }
    }

    #[test]
    fn nan_sorts_high() {
        assert_eq!(compare_floats(f64::NAN, 1.0), Ordering::Greater);
        assert_eq!(compare_floats(1.0, f64::NAN), Ordering::Less);
        assert_eq!(compare_floats(f64::NAN, f64::NAN), Ordering::Equal);
    }

    #[test]
    fn booleans_order_false_before_true() {
        assert_eq!(
            compare_primitives(&Value::Boolean(false), &Value::Boolean(true)),
            Some(Ordering::Less)
        );
    }
}
