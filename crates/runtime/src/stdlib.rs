//! Default builtin registrations.
//!
//! Individual builtins' arithmetic identities are a collaborator concern —
//! an embedder is free to register its own `add`/`sub`/whatever under these
//! names with different semantics, or none at all. This module supplies a
//! working default set so the registry isn't empty out of the box, and so
//! `Interpreter::call` has something to dispatch `Builtin` nodes to in
//! tests and examples. Divide-by-zero follows the documented contract:
//! integer division by zero returns `0`, float division by zero follows
//! IEEE 754 (`NaN`/`+-inf`) rather than trapping.
//!
//! Every body follows the registry's calling convention: return `Some`
//! value on success, or `None` after setting the thread-local builtin-error
//! slot on failure (`vellum_core::error_slot`).

use crate::registry::BuiltinRegistry;
use crate::value::{Value, compare_primitives, values_equal};
use vellum_core::error_slot;

/// Register the default arithmetic, comparison, logical, and collection
/// builtins into `registry`.
pub fn install(registry: &mut BuiltinRegistry) {
    install_arithmetic(registry);
    install_comparisons(registry);
    install_logic(registry);
    install_strings(registry);
    install_collections(registry);
}

fn fail(message: impl Into<String>) -> Option<Value> {
    error_slot::set_builtin_error(message);
    None
}

fn expect_integer(v: &Value, who: &str) -> Result<i64, String> {
    v.as_integer().ok_or_else(|| format!("{who}: expected integer, found {}", v.kind_name()))
}

fn expect_float(v: &Value, who: &str) -> Result<f64, String> {
    match v {
        Value::Float(f) => Ok(*f),
        Value::Integer(n) => Ok(*n as f64),
        other => Err(format!("{who}: expected float, found {}", other.kind_name())),
    }
}

fn is_float_pair(a: &Value, b: &Value) -> bool {
    matches!(a, Value::Float(_)) || matches!(b, Value::Float(_))
}

fn install_arithmetic(registry: &mut BuiltinRegistry) {
    registry.register_fn("add", |args| numeric_binop(args, "add", |a, b| a.checked_add(b).unwrap_or(0), |a, b| a + b));
    registry.register_fn("sub", |args| numeric_binop(args, "sub", |a, b| a.checked_sub(b).unwrap_or(0), |a, b| a - b));
    registry.register_fn("mul", |args| numeric_binop(args, "mul", |a, b| a.checked_mul(b).unwrap_or(0), |a, b| a * b));
    registry.register_fn("div", |args| match args {
        [a, b] if is_float_pair(a, b) => {
            let (x, y) = match (expect_float(a, "div"), expect_float(b, "div")) {
                (Ok(x), Ok(y)) => (x, y),
                (Err(e), _) | (_, Err(e)) => return fail(e),
            };
            Some(Value::Float(x / y))
        }
        [a, b] => {
            let (x, y) = match (expect_integer(a, "div"), expect_integer(b, "div")) {
                (Ok(x), Ok(y)) => (x, y),
                (Err(e), _) | (_, Err(e)) => return fail(e),
            };
            Some(Value::Integer(if y == 0 { 0 } else { x.wrapping_div(y) }))
        }
        _ => fail("div: expected exactly two arguments"),
    });
    registry.register_fn("mod", |args| match args {
        [a, b] => {
            let (x, y) = match (expect_integer(a, "mod"), expect_integer(b, "mod")) {
                (Ok(x), Ok(y)) => (x, y),
                (Err(e), _) | (_, Err(e)) => return fail(e),
            };
            Some(Value::Integer(if y == 0 { 0 } else { x.wrapping_rem(y) }))
        }
        _ => fail("mod: expected exactly two arguments"),
    });
    registry.register_fn("neg", |args| match args {
        [Value::Integer(n)] => Some(Value::Integer(n.wrapping_neg())),
        [Value::Float(f)] => Some(Value::Float(-f)),
        [other] => fail(format!("neg: expected numeric, found {}", other.kind_name())),
        _ => fail("neg: expected exactly one argument"),
    });
}

fn numeric_binop(
    args: &[Value],
    who: &str,
    int_op: impl Fn(i64, i64) -> i64,
    float_op: impl Fn(f64, f64) -> f64,
) -> Option<Value> {
    match args {
        [a, b] if is_float_pair(a, b) => {
            let (x, y) = match (expect_float(a, who), expect_float(b, who)) {
                (Ok(x), Ok(y)) => (x, y),
                (Err(e), _) | (_, Err(e)) => return fail(e),
            };
            Some(Value::Float(float_op(x, y)))
        }
        [a, b] => {
            let (x, y) = match (expect_integer(a, who), expect_integer(b, who)) {
                (Ok(x), Ok(y)) => (x, y),
                (Err(e), _) | (_, Err(e)) => return fail(e),
            };
            Some(Value::Integer(int_op(x, y)))
        }
        _ => fail(format!("{who}: expected exactly two arguments")),
    }
}

fn install_comparisons(registry: &mut BuiltinRegistry) {
    registry.register_fn("eq", |args| match args {
        [a, b] => Some(Value::Boolean(values_equal(a, b))),
        _ => fail("eq: expected exactly two arguments"),
    });
    registry.register_fn("ne", |args| match args {
        [a, b] => Some(Value::Boolean(!values_equal(a, b))),
        _ => fail("ne: expected exactly two arguments"),
    });
    register_ordering(registry, "lt", |o| o.is_lt());
    register_ordering(registry, "lte", |o| o.is_le());
    register_ordering(registry, "gt", |o| o.is_gt());
    register_ordering(registry, "gte", |o| o.is_ge());
}

fn register_ordering(registry: &mut BuiltinRegistry, name: &'static str, accept: fn(std::cmp::Ordering) -> bool) {
    registry.register_fn(name, move |args| match args {
        [a, b] => match compare_primitives(a, b) {
            Some(ordering) => Some(Value::Boolean(accept(ordering))),
            None => fail(format!("{name}: values are not comparable ({} vs {})", a.kind_name(), b.kind_name())),
        },
        _ => fail(format!("{name}: expected exactly two arguments")),
    });
}

fn install_logic(registry: &mut BuiltinRegistry) {
    registry.register_fn("and", |args| match args {
        [a, b] => match (a.as_boolean(), b.as_boolean()) {
            (Some(x), Some(y)) => Some(Value::Boolean(x && y)),
            _ => fail("and: expected two booleans"),
        },
        _ => fail("and: expected exactly two arguments"),
    });
    registry.register_fn("or", |args| match args {
        [a, b] => match (a.as_boolean(), b.as_boolean()) {
            (Some(x), Some(y)) => Some(Value::Boolean(x || y)),
            _ => fail("or: expected two booleans"),
        },
        _ => fail("or: expected exactly two arguments"),
    });
    registry.register_fn("not", |args| match args {
        [a] => match a.as_boolean() {
            Some(x) => Some(Value::Boolean(!x)),
            None => fail(format!("not: expected boolean, found {}", a.kind_name())),
        },
        _ => fail("not: expected exactly one argument"),
    });
}

fn install_strings(registry: &mut BuiltinRegistry) {
    registry.register_fn("string_concat", |args| match args {
        [a, b] => match (a.as_string(), b.as_string()) {
            (Some(x), Some(y)) => Some(Value::string(format!("{x}{y}"))),
            _ => fail("string_concat: expected two strings"),
        },
        _ => fail("string_concat: expected exactly two arguments"),
    });
    registry.register_fn("string_length", |args| match args {
        [a] => match a.as_string() {
            Some(s) => Some(Value::Integer(s.chars().count() as i64)),
            None => fail(format!("string_length: expected string, found {}", a.kind_name())),
        },
        _ => fail("string_length: expected exactly one argument"),
    });
}

fn install_collections(registry: &mut BuiltinRegistry) {
    registry.register_fn("array_length", |args| match args {
        [Value::Array(cells)] => Some(Value::Integer(cells.borrow().len() as i64)),
        [other] => fail(format!("array_length: expected array, found {}", other.kind_name())),
        _ => fail("array_length: expected exactly one argument"),
    });
    registry.register_fn("array_push", |args| match args {
        [Value::Array(cells), item] => {
            cells.borrow_mut().push(item.clone());
            Some(Value::Null)
        }
        [other, _] => fail(format!("array_push: expected array, found {}", other.kind_name())),
        _ => fail("array_push: expected exactly two arguments"),
    });
    registry.register_fn("array_get", |args| match args {
        [Value::Array(cells), index] => {
            let i = match expect_integer(index, "array_get") {
                Ok(i) => i,
                Err(e) => return fail(e),
            };
            let cells = cells.borrow();
            usize::try_from(i).ok().and_then(|i| cells.get(i).cloned()).or_else(|| {
                fail(format!("array_get: index {i} out of bounds for length {}", cells.len()))
            })
        }
        [other, _] => fail(format!("array_get: expected array, found {}", other.kind_name())),
        _ => fail("array_get: expected exactly two arguments"),
    });
    registry.register_fn("dict_get", |args| match args {
        [Value::Dict(pairs), key] => pairs
            .borrow()
            .iter()
            .find(|(k, _)| values_equal(k, key))
            .map(|(_, v)| v.clone())
            .or(Some(Value::Null)),
        [other, _] => fail(format!("dict_get: expected dict, found {}", other.kind_name())),
        _ => fail("dict_get: expected exactly two arguments"),
    });
    registry.register_fn("dict_set", |args| match args {
        [Value::Dict(pairs), key, value] => {
            let mut pairs = pairs.borrow_mut();
            match pairs.iter_mut().find(|(k, _)| values_equal(k, key)) {
                Some((_, v)) => *v = value.clone(),
                None => pairs.push((key.clone(), value.clone())),
            }
            Some(Value::Null)
        }
        [other, _, _] => fail(format!("dict_set: expected dict, found {}", other.kind_name())),
        _ => fail("dict_set: expected exactly three arguments"),
    });
    registry.register_fn("set_contains", |args| match args {
        [Value::Set(items), item] => Some(Value::Boolean(items.borrow().iter().any(|v| values_equal(v, item)))),
        [other, _] => fail(format!("set_contains: expected set, found {}", other.kind_name())),
        _ => fail("set_contains: expected exactly two arguments"),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeDescriptor;

    fn registry() -> BuiltinRegistry {
        let mut r = BuiltinRegistry::new();
        install(&mut r);
        r
    }

    #[test]
    fn integer_add_and_overflow_saturate_to_zero() {
        let r = registry();
        let add = r.resolve("add", &[]).unwrap();
        assert_eq!(add(&[Value::Integer(2), Value::Integer(3)]), Some(Value::Integer(5)));
        assert_eq!(add(&[Value::Integer(i64::MAX), Value::Integer(1)]), Some(Value::Integer(0)));
    }

    #[test]
    fn integer_division_by_zero_returns_zero_by_contract() {
        let r = registry();
        let div = r.resolve("div", &[]).unwrap();
        assert_eq!(div(&[Value::Integer(10), Value::Integer(0)]), Some(Value::Integer(0)));
    }

    #[test]
    fn float_division_by_zero_follows_ieee754() {
        let r = registry();
        let div = r.resolve("div", &[]).unwrap();
        let result = div(&[Value::Float(1.0), Value::Float(0.0)]).unwrap();
        assert_eq!(result, Value::Float(f64::INFINITY));
    }

    #[test]
    fn comparisons_reject_mismatched_kinds_through_error_slot() {
        let r = registry();
        let lt = r.resolve("lt", &[]).unwrap();
        error_slot::clear_builtin_error();
        let result = lt(&[Value::Integer(1), Value::string("a")]);
        assert_eq!(result, None);
        assert!(error_slot::has_builtin_error());
    }

    #[test]
    fn dict_set_then_get_round_trips() {
        let r = registry();
        let set = r.resolve("dict_set", &[]).unwrap();
        let get = r.resolve("dict_get", &[]).unwrap();
        let dict = Value::dict(vec![]);
        set(&[dict.clone(), Value::string("k"), Value::Integer(7)]);
        assert_eq!(get(&[dict, Value::string("k")]), Some(Value::Integer(7)));
    }

    #[test]
    fn array_get_out_of_bounds_sets_error_slot() {
        let r = registry();
        let get = r.resolve("array_get", &[]).unwrap();
        let array = Value::array(vec![Value::Integer(1)]);
        error_slot::clear_builtin_error();
        assert_eq!(get(&[array, Value::Integer(5)]), None);
        assert!(error_slot::has_builtin_error());
    }

    #[test]
    fn registry_names_are_reachable_even_with_type_params() {
        let r = registry();
        assert!(r.resolve("add", &[TypeDescriptor::Integer]).is_some());
    }
}
