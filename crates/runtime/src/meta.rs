//! The meta-type bridge: type descriptors and IR nodes are themselves
//! values, which is what lets a function value carry its own source tree
//! and serialize through the ordinary value codecs.
//!
//! Both directions thread an explicit id/stack mechanism through a
//! `Recursive` type descriptor rather than relying on `Rc` pointer
//! identity, because the value side of the bridge has already left `Rc`
//! behind — a decoded `MetaType` value carries no memory of where it came
//! from. The first encounter of a `Recursive` node assigns it the next
//! integer id and encodes its inner type; every later encounter of the
//! same node (as a `TypeDescriptor::RecursiveSelf`) encodes only that id.
//! Decoding reverses this with a stack of `(id, Rc<RecursiveNode>)` pairs
//! live while a `Recursive` case's inner value is being decoded.

use crate::error::CodecError;
use crate::ir::{CaptureSpec, IrKind, IrNode, MatchCase};
use crate::types::{NamedField, RecursiveNode, ScalarKind, TypeDescriptor};
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use vellum_core::Location;

/// Converts a type descriptor into its canonical `MetaType` value.
pub fn type_to_value(ty: &TypeDescriptor) -> Value {
    let mut ids: HashMap<usize, i64> = HashMap::new();
    let mut next_id = 0i64;
    encode_type(ty, &mut ids, &mut next_id)
}

fn node_ptr(node: &Rc<RecursiveNode>) -> usize {
    Rc::as_ptr(node) as usize
}

fn encode_type(ty: &TypeDescriptor, ids: &mut HashMap<usize, i64>, next_id: &mut i64) -> Value {
    let case = |name: &str, payload: Value| Value::variant(name, payload);
    match ty {
        TypeDescriptor::Never => case("Never", Value::Null),
        TypeDescriptor::Null => case("Null", Value::Null),
        TypeDescriptor::Boolean => case("Boolean", Value::Null),
        TypeDescriptor::Integer => case("Integer", Value::Null),
        TypeDescriptor::Float => case("Float", Value::Null),
        TypeDescriptor::String => case("String", Value::Null),
        TypeDescriptor::DateTime => case("DateTime", Value::Null),
        TypeDescriptor::Blob => case("Blob", Value::Null),
        TypeDescriptor::Array(e) => case("Array", encode_type(e, ids, next_id)),
        TypeDescriptor::Set(e) => case("Set", encode_type(e, ids, next_id)),
        TypeDescriptor::Dict(k, v) => case(
            "Dict",
            Value::struct_of(vec![encode_type(k, ids, next_id), encode_type(v, ids, next_id)]),
        ),
        TypeDescriptor::Struct(fields) => case("Struct", encode_named_fields(fields, ids, next_id)),
        TypeDescriptor::Variant(cases) => case("Variant", encode_named_fields(cases, ids, next_id)),
        TypeDescriptor::Ref(e) => case("Ref", encode_type(e, ids, next_id)),
        TypeDescriptor::Vector(k) => case("Vector", Value::string(k.name())),
        TypeDescriptor::Matrix(k) => case("Matrix", Value::string(k.name())),
        TypeDescriptor::Function(inputs, output) => case(
            "Function",
            encode_signature(inputs, output, ids, next_id),
        ),
        TypeDescriptor::AsyncFunction(inputs, output) => case(
            "AsyncFunction",
            encode_signature(inputs, output, ids, next_id),
        ),
        TypeDescriptor::Recursive(node) => {
            let ptr = node_ptr(node);
            if let Some(&id) = ids.get(&ptr) {
                return case("RecursiveRef", Value::Integer(id));
            }
            let id = *next_id;
            *next_id += 1;
            ids.insert(ptr, id);
            let inner = node
                .inner
                .borrow()
                .clone()
                .expect("recursive descriptor used before its cycle was closed");
            let inner_value = encode_type(&inner, ids, next_id);
            case(
                "Recursive",
                Value::struct_of(vec![Value::Integer(id), inner_value]),
            )
        }
        TypeDescriptor::RecursiveSelf(weak) => {
            let node = weak.upgrade().expect("dangling recursive self-reference");
            let id = *ids
                .get(&node_ptr(&node))
                .expect("RecursiveSelf encoded before its owning Recursive node");
            case("RecursiveRef", Value::Integer(id))
        }
    }
}

fn encode_named_fields(fields: &[NamedField], ids: &mut HashMap<usize, i64>, next_id: &mut i64) -> Value {
    Value::array(
        fields
            .iter()
            .map(|(name, ty)| Value::struct_of(vec![Value::string(name.clone()), encode_type(ty, ids, next_id)]))
            .collect(),
    )
}

fn encode_signature(
    inputs: &[TypeDescriptor],
    output: &TypeDescriptor,
    ids: &mut HashMap<usize, i64>,
    next_id: &mut i64,
) -> Value {
    Value::struct_of(vec![
        Value::array(inputs.iter().map(|t| encode_type(t, ids, next_id)).collect()),
        encode_type(output, ids, next_id),
    ])
}

/// Converts a `MetaType` value back into a type descriptor.
pub fn value_to_type(v: &Value) -> Result<TypeDescriptor, CodecError> {
    let stack: RefCell<Vec<(i64, Rc<RecursiveNode>)>> = RefCell::new(Vec::new());
    decode_type(v, &stack)
}

fn decode_type(v: &Value, stack: &RefCell<Vec<(i64, Rc<RecursiveNode>)>>) -> Result<TypeDescriptor, CodecError> {
    let variant = match v {
        Value::Variant(v) => v,
        other => {
            return Err(CodecError::TypeMismatch {
                expected: "MetaType variant".into(),
                found: other.kind_name().into(),
            });
        }
    };
    match &*variant.case {
        "Never" => Ok(TypeDescriptor::Never),
        "Null" => Ok(TypeDescriptor::Null),
        "Boolean" => Ok(TypeDescriptor::Boolean),
        "Integer" => Ok(TypeDescriptor::Integer),
        "Float" => Ok(TypeDescriptor::Float),
        "String" => Ok(TypeDescriptor::String),
        "DateTime" => Ok(TypeDescriptor::DateTime),
        "Blob" => Ok(TypeDescriptor::Blob),
        "Array" => Ok(TypeDescriptor::array(decode_type(&variant.payload, stack)?)),
        "Set" => Ok(TypeDescriptor::set(decode_type(&variant.payload, stack)?)),
        "Dict" => {
            let (k, v) = struct2(&variant.payload)?;
            Ok(TypeDescriptor::dict(decode_type(k, stack)?, decode_type(v, stack)?))
        }
        "Struct" => Ok(TypeDescriptor::struct_of(decode_named_fields(&variant.payload, stack)?)),
        "Variant" => Ok(TypeDescriptor::variant_of(decode_named_fields(&variant.payload, stack)?)),
        "Ref" => Ok(TypeDescriptor::reference(decode_type(&variant.payload, stack)?)),
        "Vector" => Ok(TypeDescriptor::Vector(decode_scalar_kind(&variant.payload)?)),
        "Matrix" => Ok(TypeDescriptor::Matrix(decode_scalar_kind(&variant.payload)?)),
        "Function" => {
            let (inputs, output) = decode_signature(&variant.payload, stack)?;
            Ok(TypeDescriptor::function(inputs, output))
        }
        "AsyncFunction" => {
            let (inputs, output) = decode_signature(&variant.payload, stack)?;
            Ok(TypeDescriptor::async_function(inputs, output))
        }
        "Recursive" => {
            let (id_val, inner_val) = struct2(&variant.payload)?;
            let id = id_val
                .as_integer()
                .ok_or_else(|| type_mismatch("Integer", id_val))?;
            let inner_val = inner_val.clone();
            let mut decode_err: Option<CodecError> = None;
            let built = TypeDescriptor::recursive(|node| {
                stack.borrow_mut().push((id, Rc::clone(node)));
                let result = decode_type(&inner_val, stack);
                stack.borrow_mut().pop();
                match result {
                    Ok(ty) => ty,
                    Err(e) => {
                        decode_err = Some(e);
                        TypeDescriptor::Never
                    }
                }
            });
            match decode_err {
                Some(e) => Err(e),
                None => Ok(built),
            }
        }
        "RecursiveRef" => {
            let id = variant
                .payload
                .as_integer()
                .ok_or_else(|| type_mismatch("Integer", &variant.payload))?;
            let found = stack
                .borrow()
                .iter()
                .rev()
                .find(|(i, _)| *i == id)
                .map(|(_, node)| Rc::downgrade(node));
            match found {
                Some(weak) => Ok(TypeDescriptor::RecursiveSelf(weak)),
                None => Err(CodecError::UnresolvableBackref {
                    distance_or_path: format!("recursive type id {id}"),
                }),
            }
        }
        other => Err(CodecError::UnknownVariantCase { case: other.into() }),
    }
}

fn decode_named_fields(
    v: &Value,
    stack: &RefCell<Vec<(i64, Rc<RecursiveNode>)>>,
) -> Result<Vec<NamedField>, CodecError> {
    let items = match v {
        Value::Array(items) => items.borrow().clone(),
        other => return Err(type_mismatch("Array", other)),
    };
    items
        .iter()
        .map(|entry| {
            let (name, ty) = struct2(entry)?;
            let name = name.as_string().ok_or_else(|| type_mismatch("String", name))?.to_string();
            Ok((name, decode_type(ty, stack)?))
        })
        .collect()
}

fn decode_signature(
    v: &Value,
    stack: &RefCell<Vec<(i64, Rc<RecursiveNode>)>>,
) -> Result<(Vec<TypeDescriptor>, TypeDescriptor), CodecError> {
    let (inputs_val, output_val) = struct2(v)?;
    let inputs = match inputs_val {
        Value::Array(items) => items
            .borrow()
            .iter()
            .map(|t| decode_type(t, stack))
            .collect::<Result<Vec<_>, _>>()?,
        other => return Err(type_mismatch("Array", other)),
    };
    Ok((inputs, decode_type(output_val, stack)?))
}

fn decode_scalar_kind(v: &Value) -> Result<ScalarKind, CodecError> {
    match v.as_string() {
        Some("Float") => Ok(ScalarKind::Float),
        Some("Integer") => Ok(ScalarKind::Integer),
        Some("Boolean") => Ok(ScalarKind::Boolean),
        _ => Err(type_mismatch("scalar kind string", v)),
    }
}

fn struct2(v: &Value) -> Result<(&Value, &Value), CodecError> {
    match v {
        Value::Struct(fields) if fields.len() == 2 => Ok((&fields[0], &fields[1])),
        other => Err(type_mismatch("2-field Struct", other)),
    }
}

fn type_mismatch(expected: &str, found: &Value) -> CodecError {
    CodecError::TypeMismatch {
        expected: expected.into(),
        found: found.kind_name().into(),
    }
}

/// Converts an IR node into its canonical value form, the representation a
/// `Function` value's `original` field is turned into for serialization.
/// Children are converted depth-first; there is no sharing to preserve here
/// the way there is for recursive type descriptors, since a parsed program's
/// IR tree is never itself cyclic.
pub fn ir_node_to_value(node: &IrNode) -> Value {
    Value::struct_of(vec![
        kind_to_value(&node.kind),
        opt_type_to_value(&node.result_type),
        Value::array(node.locations.iter().map(location_to_value).collect()),
    ])
}

/// Reconstructs an IR node from its canonical value form.
pub fn value_to_ir_node(v: &Value) -> Result<Rc<IrNode>, CodecError> {
    let fields = expect_struct(v, 3)?;
    let kind = value_to_ir_kind(&fields[0])?;
    let result_type = opt_type_from_value(&fields[1])?;
    let locations = match &fields[2] {
        Value::Array(items) => items
            .borrow()
            .iter()
            .map(value_to_location)
            .collect::<Result<Vec<_>, _>>()?,
        other => return Err(type_mismatch("Array", other)),
    };
    Ok(Rc::new(IrNode {
        kind,
        result_type,
        locations,
    }))
}

fn node_to_value(n: &IrNode) -> Value {
    ir_node_to_value(n)
}

fn nodes_to_value(ns: &[Rc<IrNode>]) -> Value {
    Value::array(ns.iter().map(|n| ir_node_to_value(n)).collect())
}

fn string_to_value(s: &str) -> Value {
    Value::string(s.to_string())
}

fn opt_string_to_value(s: &Option<String>) -> Value {
    match s {
        Some(s) => Value::variant("Some", string_to_value(s)),
        None => Value::variant("None", Value::Null),
    }
}

fn opt_node_to_value(n: &Option<Rc<IrNode>>) -> Value {
    match n {
        Some(n) => Value::variant("Some", ir_node_to_value(n)),
        None => Value::variant("None", Value::Null),
    }
}

fn opt_type_to_value(t: &Option<TypeDescriptor>) -> Value {
    match t {
        Some(t) => Value::variant("Some", type_to_value(t)),
        None => Value::variant("None", Value::Null),
    }
}

fn types_to_value(ts: &[TypeDescriptor]) -> Value {
    Value::array(ts.iter().map(type_to_value).collect())
}

fn location_to_value(loc: &Location) -> Value {
    Value::struct_of(vec![
        Value::string(loc.file.clone()),
        Value::Integer(loc.line as i64),
        Value::Integer(loc.column as i64),
    ])
}

fn value_to_location(v: &Value) -> Result<Location, CodecError> {
    let f = expect_struct(v, 3)?;
    let file = f[0].as_string().ok_or_else(|| type_mismatch("String", &f[0]))?;
    let line = f[1].as_integer().ok_or_else(|| type_mismatch("Integer", &f[1]))?;
    let column = f[2].as_integer().ok_or_else(|| type_mismatch("Integer", &f[2]))?;
    Ok(Location::new(file.to_string(), line as u32, column as u32))
}

fn kind_to_value(kind: &IrKind) -> Value {
    let case = |name: &str, payload: Value| Value::variant(name, payload);
    match kind {
        IrKind::Value(v) => case("Value", v.clone()),
        IrKind::Variable { name, mutable, captured } => case(
            "Variable",
            Value::struct_of(vec![string_to_value(name), Value::Boolean(*mutable), Value::Boolean(*captured)]),
        ),
        IrKind::Let { name, mutable, value } => case(
            "Let",
            Value::struct_of(vec![string_to_value(name), Value::Boolean(*mutable), node_to_value(value)]),
        ),
        IrKind::Assign { name, value } => {
            case("Assign", Value::struct_of(vec![string_to_value(name), node_to_value(value)]))
        }
        IrKind::Block(items) => case("Block", nodes_to_value(items)),
        IrKind::IfElse { cond, then_branch, else_branch } => case(
            "IfElse",
            Value::struct_of(vec![node_to_value(cond), node_to_value(then_branch), node_to_value(else_branch)]),
        ),
        IrKind::Match { expr, cases } => case(
            "Match",
            Value::struct_of(vec![
                node_to_value(expr),
                Value::array(cases.iter().map(match_case_to_value).collect()),
            ]),
        ),
        IrKind::While { cond, body, label } => case(
            "While",
            Value::struct_of(vec![node_to_value(cond), node_to_value(body), opt_string_to_value(label)]),
        ),
        IrKind::ForArray { binder, index_binder, collection, body, label } => case(
            "ForArray",
            Value::struct_of(vec![
                string_to_value(binder),
                opt_string_to_value(index_binder),
                node_to_value(collection),
                node_to_value(body),
                opt_string_to_value(label),
            ]),
        ),
        IrKind::ForSet { binder, collection, body, label } => case(
            "ForSet",
            Value::struct_of(vec![
                string_to_value(binder),
                node_to_value(collection),
                node_to_value(body),
                opt_string_to_value(label),
            ]),
        ),
        IrKind::ForDict { key_binder, value_binder, collection, body, label } => case(
            "ForDict",
            Value::struct_of(vec![
                string_to_value(key_binder),
                string_to_value(value_binder),
                node_to_value(collection),
                node_to_value(body),
                opt_string_to_value(label),
            ]),
        ),
        IrKind::Function { captures, params, body } => case(
            "Function",
            Value::struct_of(vec![captures_to_value(captures), params_to_value(params), node_to_value(body)]),
        ),
        IrKind::AsyncFunction { captures, params, body } => case(
            "AsyncFunction",
            Value::struct_of(vec![captures_to_value(captures), params_to_value(params), node_to_value(body)]),
        ),
        IrKind::Call { func, args } => {
            case("Call", Value::struct_of(vec![node_to_value(func), nodes_to_value(args)]))
        }
        IrKind::CallAsync { func, args } => {
            case("CallAsync", Value::struct_of(vec![node_to_value(func), nodes_to_value(args)]))
        }
        IrKind::Platform { name, type_params, args, is_async, optional } => case(
            "Platform",
            Value::struct_of(vec![
                string_to_value(name),
                types_to_value(type_params),
                nodes_to_value(args),
                Value::Boolean(*is_async),
                Value::Boolean(*optional),
            ]),
        ),
        IrKind::Builtin { name, type_params, args } => case(
            "Builtin",
            Value::struct_of(vec![string_to_value(name), types_to_value(type_params), nodes_to_value(args)]),
        ),
        IrKind::Return(n) => case("Return", node_to_value(n)),
        IrKind::Break(label) => case("Break", opt_string_to_value(label)),
        IrKind::Continue(label) => case("Continue", opt_string_to_value(label)),
        IrKind::Error(n) => case("Error", node_to_value(n)),
        IrKind::TryCatch { try_block, message_var, location_var, catch_block, finally_block } => case(
            "TryCatch",
            Value::struct_of(vec![
                node_to_value(try_block),
                string_to_value(message_var),
                string_to_value(location_var),
                node_to_value(catch_block),
                opt_node_to_value(finally_block),
            ]),
        ),
        IrKind::NewArray { element_type, items } => {
            case("NewArray", Value::struct_of(vec![type_to_value(element_type), nodes_to_value(items)]))
        }
        IrKind::NewSet { element_type, items } => {
            case("NewSet", Value::struct_of(vec![type_to_value(element_type), nodes_to_value(items)]))
        }
        IrKind::NewDict { key_type, value_type, pairs } => case(
            "NewDict",
            Value::struct_of(vec![type_to_value(key_type), type_to_value(value_type), pairs_to_value(pairs)]),
        ),
        IrKind::NewRef { inner_type, value } => {
            case("NewRef", Value::struct_of(vec![type_to_value(inner_type), node_to_value(value)]))
        }
        IrKind::NewVector { element_kind, items } => case(
            "NewVector",
            Value::struct_of(vec![Value::string(element_kind.name()), nodes_to_value(items)]),
        ),
        IrKind::Struct { type_descriptor, fields } => case(
            "Struct",
            Value::struct_of(vec![type_to_value(type_descriptor), named_nodes_to_value(fields)]),
        ),
        IrKind::GetField { expr, name } => {
            case("GetField", Value::struct_of(vec![node_to_value(expr), string_to_value(name)]))
        }
        IrKind::Variant { type_descriptor, case: case_name, value } => case(
            "Variant",
            Value::struct_of(vec![type_to_value(type_descriptor), string_to_value(case_name), node_to_value(value)]),
        ),
        IrKind::WrapRecursive(n) => case("WrapRecursive", node_to_value(n)),
        IrKind::UnwrapRecursive(n) => case("UnwrapRecursive", node_to_value(n)),
    }
}

fn match_case_to_value(c: &MatchCase) -> Value {
    Value::struct_of(vec![string_to_value(&c.case), opt_string_to_value(&c.bind), node_to_value(&c.body)])
}

fn captures_to_value(captures: &[CaptureSpec]) -> Value {
    Value::array(
        captures
            .iter()
            .map(|c| Value::struct_of(vec![string_to_value(&c.name), Value::Boolean(c.mutable)]))
            .collect(),
    )
}

fn params_to_value(params: &[String]) -> Value {
    Value::array(params.iter().map(|p| string_to_value(p)).collect())
}

fn pairs_to_value(pairs: &[(Rc<IrNode>, Rc<IrNode>)]) -> Value {
    Value::array(
        pairs
            .iter()
            .map(|(k, v)| Value::struct_of(vec![node_to_value(k), node_to_value(v)]))
            .collect(),
    )
}

fn named_nodes_to_value(fields: &[(String, Rc<IrNode>)]) -> Value {
    Value::array(
        fields
            .iter()
            .map(|(n, v)| Value::struct_of(vec![string_to_value(n), node_to_value(v)]))
            .collect(),
    )
}

fn expect_struct(v: &Value, len: usize) -> Result<&[Value], CodecError> {
    match v {
        Value::Struct(fields) if fields.len() == len => Ok(fields),
        other => Err(CodecError::TypeMismatch {
            expected: format!("{len}-field Struct"),
            found: other.kind_name().into(),
        }),
    }
}

fn as_variant(v: &Value) -> Result<(&str, &Value), CodecError> {
    match v {
        Value::Variant(vv) => Ok((vv.case.as_ref(), &vv.payload)),
        other => Err(type_mismatch("Variant", other)),
    }
}

fn node_from_value(v: &Value) -> Result<Rc<IrNode>, CodecError> {
    value_to_ir_node(v)
}

fn nodes_from_value(v: &Value) -> Result<Vec<Rc<IrNode>>, CodecError> {
    match v {
        Value::Array(items) => items.borrow().iter().map(value_to_ir_node).collect(),
        other => Err(type_mismatch("Array", other)),
    }
}

fn string_from_value(v: &Value) -> Result<String, CodecError> {
    v.as_string().map(|s| s.to_string()).ok_or_else(|| type_mismatch("String", v))
}

fn bool_from_value(v: &Value) -> Result<bool, CodecError> {
    v.as_boolean().ok_or_else(|| type_mismatch("Boolean", v))
}

fn opt_string_from_value(v: &Value) -> Result<Option<String>, CodecError> {
    let (case, payload) = as_variant(v)?;
    match case {
        "Some" => Ok(Some(string_from_value(payload)?)),
        "None" => Ok(None),
        other => Err(CodecError::UnknownVariantCase { case: other.into() }),
    }
}

fn opt_node_from_value(v: &Value) -> Result<Option<Rc<IrNode>>, CodecError> {
    let (case, payload) = as_variant(v)?;
    match case {
        "Some" => Ok(Some(node_from_value(payload)?)),
        "None" => Ok(None),
        other => Err(CodecError::UnknownVariantCase { case: other.into() }),
    }
}

fn opt_type_from_value(v: &Value) -> Result<Option<TypeDescriptor>, CodecError> {
    let (case, payload) = as_variant(v)?;
    match case {
        "Some" => Ok(Some(value_to_type(payload)?)),
        "None" => Ok(None),
        other => Err(CodecError::UnknownVariantCase { case: other.into() }),
    }
}

fn types_from_value(v: &Value) -> Result<Vec<TypeDescriptor>, CodecError> {
    match v {
        Value::Array(items) => items.borrow().iter().map(value_to_type).collect(),
        other => Err(type_mismatch("Array", other)),
    }
}

fn match_case_from_value(v: &Value) -> Result<MatchCase, CodecError> {
    let f = expect_struct(v, 3)?;
    Ok(MatchCase {
        case: string_from_value(&f[0])?,
        bind: opt_string_from_value(&f[1])?,
        body: node_from_value(&f[2])?,
    })
}

fn captures_from_value(v: &Value) -> Result<Vec<CaptureSpec>, CodecError> {
    match v {
        Value::Array(items) => items
            .borrow()
            .iter()
            .map(|item| {
                let f = expect_struct(item, 2)?;
                Ok(CaptureSpec {
                    name: string_from_value(&f[0])?,
                    mutable: bool_from_value(&f[1])?,
                })
            })
            .collect(),
        other => Err(type_mismatch("Array", other)),
    }
}

fn params_from_value(v: &Value) -> Result<Vec<String>, CodecError> {
    match v {
        Value::Array(items) => items.borrow().iter().map(string_from_value).collect(),
        other => Err(type_mismatch("Array", other)),
    }
}

fn pairs_from_value(v: &Value) -> Result<Vec<(Rc<IrNode>, Rc<IrNode>)>, CodecError> {
    match v {
        Value::Array(items) => items
            .borrow()
            .iter()
            .map(|item| {
                let f = expect_struct(item, 2)?;
                Ok((node_from_value(&f[0])?, node_from_value(&f[1])?))
            })
            .collect(),
        other => Err(type_mismatch("Array", other)),
    }
}

fn named_nodes_from_value(v: &Value) -> Result<Vec<(String, Rc<IrNode>)>, CodecError> {
    match v {
        Value::Array(items) => items
            .borrow()
            .iter()
            .map(|item| {
                let f = expect_struct(item, 2)?;
                Ok((string_from_value(&f[0])?, node_from_value(&f[1])?))
            })
            .collect(),
        other => Err(type_mismatch("Array", other)),
    }
}

fn scalar_kind_from_value(v: &Value) -> Result<ScalarKind, CodecError> {
    decode_scalar_kind(v)
}

fn value_to_ir_kind(v: &Value) -> Result<IrKind, CodecError> {
    let (case, payload) = as_variant(v)?;
    match case {
        "Value" => Ok(IrKind::Value(payload.clone())),
        "Variable" => {
            let f = expect_struct(payload, 3)?;
            Ok(IrKind::Variable {
                name: string_from_value(&f[0])?,
                mutable: bool_from_value(&f[1])?,
                captured: bool_from_value(&f[2])?,
            })
        }
        "Let" => {
            let f = expect_struct(payload, 3)?;
            Ok(IrKind::Let {
                name: string_from_value(&f[0])?,
                mutable: bool_from_value(&f[1])?,
                value: node_from_value(&f[2])?,
            })
        }
        "Assign" => {
            let f = expect_struct(payload, 2)?;
            Ok(IrKind::Assign {
                name: string_from_value(&f[0])?,
                value: node_from_value(&f[1])?,
            })
        }
        "Block" => Ok(IrKind::Block(nodes_from_value(payload)?)),
        "IfElse" => {
            let f = expect_struct(payload, 3)?;
            Ok(IrKind::IfElse {
                cond: node_from_value(&f[0])?,
                then_branch: node_from_value(&f[1])?,
                else_branch: node_from_value(&f[2])?,
            })
        }
        "Match" => {
            let f = expect_struct(payload, 2)?;
            let cases = match &f[1] {
                Value::Array(items) => items.borrow().iter().map(match_case_from_value).collect::<Result<Vec<_>, _>>()?,
                other => return Err(type_mismatch("Array", other)),
            };
            Ok(IrKind::Match {
                expr: node_from_value(&f[0])?,
                cases,
            })
        }
        "While" => {
            let f = expect_struct(payload, 3)?;
            Ok(IrKind::While {
                cond: node_from_value(&f[0])?,
                body: node_from_value(&f[1])?,
                label: opt_string_from_value(&f[2])?,
            })
        }
        "ForArray" => {
            let f = expect_struct(payload, 5)?;
            Ok(IrKind::ForArray {
                binder: string_from_value(&f[0])?,
                index_binder: opt_string_from_value(&f[1])?,
                collection: node_from_value(&f[2])?,
                body: node_from_value(&f[3])?,
                label: opt_string_from_value(&f[4])?,
            })
        }
        "ForSet" => {
            let f = expect_struct(payload, 4)?;
            Ok(IrKind::ForSet {
                binder: string_from_value(&f[0])?,
                collection: node_from_value(&f[1])?,
                body: node_from_value(&f[2])?,
                label: opt_string_from_value(&f[3])?,
            })
        }
        "ForDict" => {
            let f = expect_struct(payload, 5)?;
            Ok(IrKind::ForDict {
                key_binder: string_from_value(&f[0])?,
                value_binder: string_from_value(&f[1])?,
                collection: node_from_value(&f[2])?,
                body: node_from_value(&f[3])?,
                label: opt_string_from_value(&f[4])?,
            })
        }
        "Function" => {
            let f = expect_struct(payload, 3)?;
            Ok(IrKind::Function {
                captures: captures_from_value(&f[0])?,
                params: params_from_value(&f[1])?,
                body: node_from_value(&f[2])?,
            })
        }
        "AsyncFunction" => {
            let f = expect_struct(payload, 3)?;
            Ok(IrKind::AsyncFunction {
                captures: captures_from_value(&f[0])?,
                params: params_from_value(&f[1])?,
                body: node_from_value(&f[2])?,
            })
        }
        "Call" => {
            let f = expect_struct(payload, 2)?;
            Ok(IrKind::Call {
                func: node_from_value(&f[0])?,
                args: nodes_from_value(&f[1])?,
            })
        }
        "CallAsync" => {
            let f = expect_struct(payload, 2)?;
            Ok(IrKind::CallAsync {
                func: node_from_value(&f[0])?,
                args: nodes_from_value(&f[1])?,
            })
        }
        "Platform" => {
            let f = expect_struct(payload, 5)?;
            Ok(IrKind::Platform {
                name: string_from_value(&f[0])?,
                type_params: types_from_value(&f[1])?,
                args: nodes_from_value(&f[2])?,
                is_async: bool_from_value(&f[3])?,
                optional: bool_from_value(&f[4])?,
            })
        }
        "Builtin" => {
            let f = expect_struct(payload, 3)?;
            Ok(IrKind::Builtin {
                name: string_from_value(&f[0])?,
                type_params: types_from_value(&f[1])?,
                args: nodes_from_value(&f[2])?,
            })
        }
        "Return" => Ok(IrKind::Return(node_from_value(payload)?)),
        "Break" => Ok(IrKind::Break(opt_string_from_value(payload)?)),
        "Continue" => Ok(IrKind::Continue(opt_string_from_value(payload)?)),
        "Error" => Ok(IrKind::Error(node_from_value(payload)?)),
        "TryCatch" => {
            let f = expect_struct(payload, 5)?;
            Ok(IrKind::TryCatch {
                try_block: node_from_value(&f[0])?,
                message_var: string_from_value(&f[1])?,
                location_var: string_from_value(&f[2])?,
                catch_block: node_from_value(&f[3])?,
                finally_block: opt_node_from_value(&f[4])?,
            })
        }
        "NewArray" => {
            let f = expect_struct(payload, 2)?;
            Ok(IrKind::NewArray {
                element_type: value_to_type(&f[0])?,
                items: nodes_from_value(&f[1])?,
            })
        }
        "NewSet" => {
            let f = expect_struct(payload, 2)?;
            Ok(IrKind::NewSet {
                element_type: value_to_type(&f[0])?,
                items: nodes_from_value(&f[1])?,
            })
        }
        "NewDict" => {
            let f = expect_struct(payload, 3)?;
            Ok(IrKind::NewDict {
                key_type: value_to_type(&f[0])?,
                value_type: value_to_type(&f[1])?,
                pairs: pairs_from_value(&f[2])?,
            })
        }
        "NewRef" => {
            let f = expect_struct(payload, 2)?;
            Ok(IrKind::NewRef {
                inner_type: value_to_type(&f[0])?,
                value: node_from_value(&f[1])?,
            })
        }
        "NewVector" => {
            let f = expect_struct(payload, 2)?;
            Ok(IrKind::NewVector {
                element_kind: scalar_kind_from_value(&f[0])?,
                items: nodes_from_value(&f[1])?,
            })
        }
        "Struct" => {
            let f = expect_struct(payload, 2)?;
            Ok(IrKind::Struct {
                type_descriptor: value_to_type(&f[0])?,
                fields: named_nodes_from_value(&f[1])?,
            })
        }
        "GetField" => {
            let f = expect_struct(payload, 2)?;
            Ok(IrKind::GetField {
                expr: node_from_value(&f[0])?,
                name: string_from_value(&f[1])?,
            })
        }
        "Variant" => {
            let f = expect_struct(payload, 3)?;
            Ok(IrKind::Variant {
                type_descriptor: value_to_type(&f[0])?,
                case: string_from_value(&f[1])?,
                value: node_from_value(&f[2])?,
            })
        }
        "WrapRecursive" => Ok(IrKind::WrapRecursive(node_from_value(payload)?)),
        "UnwrapRecursive" => Ok(IrKind::UnwrapRecursive(node_from_value(payload)?)),
        other => Err(CodecError::UnknownVariantCase { case: other.into() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_round_trips() {
        for ty in [
            TypeDescriptor::Never,
            TypeDescriptor::Null,
            TypeDescriptor::Boolean,
            TypeDescriptor::Integer,
            TypeDescriptor::Float,
            TypeDescriptor::String,
            TypeDescriptor::DateTime,
            TypeDescriptor::Blob,
        ] {
            let v = type_to_value(&ty);
            let back = value_to_type(&v).unwrap();
            assert_eq!(ty, back);
        }
    }

    #[test]
    fn compound_descriptor_round_trips() {
        let ty = TypeDescriptor::dict(
            TypeDescriptor::String,
            TypeDescriptor::array(TypeDescriptor::Integer),
        );
        let v = type_to_value(&ty);
        assert_eq!(value_to_type(&v).unwrap(), ty);
    }

    #[test]
    fn struct_descriptor_round_trips_with_field_order() {
        let ty = TypeDescriptor::struct_of(vec![
            ("a".into(), TypeDescriptor::Integer),
            ("b".into(), TypeDescriptor::String),
        ]);
        let v = type_to_value(&ty);
        assert_eq!(value_to_type(&v).unwrap(), ty);
    }

    #[test]
    fn recursive_descriptor_round_trips_through_value() {
        let list_ty = TypeDescriptor::recursive(|node| {
            TypeDescriptor::variant_of(vec![
                ("Nil".into(), TypeDescriptor::Null),
                (
                    "Cons".into(),
                    TypeDescriptor::struct_of(vec![
                        ("head".into(), TypeDescriptor::Integer),
                        ("tail".into(), TypeDescriptor::RecursiveSelf(Rc::downgrade(node))),
                    ]),
                ),
            ])
        });
        let v = type_to_value(&list_ty);
        let back = value_to_type(&v).unwrap();
        assert_eq!(back, list_ty);
    }

    #[test]
    fn ir_leaf_node_round_trips() {
        let node = IrNode::new(IrKind::Value(Value::Integer(41)));
        let v = ir_node_to_value(&node);
        let back = value_to_ir_node(&v).unwrap();
        match &back.kind {
            IrKind::Value(Value::Integer(n)) => assert_eq!(*n, 41),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn ir_function_node_round_trips_with_captures_and_body() {
        let body = IrNode::new(IrKind::Variable {
            name: "x".into(),
            mutable: false,
            captured: false,
        });
        let func = IrNode::new(IrKind::Function {
            captures: vec![CaptureSpec {
                name: "y".into(),
                mutable: true,
            }],
            params: vec!["x".into()],
            body,
        });
        let v = ir_node_to_value(&func);
        let back = value_to_ir_node(&v).unwrap();
        match &back.kind {
            IrKind::Function { captures, params, body } => {
                assert_eq!(params, &["x".to_string()]);
                assert_eq!(captures.len(), 1);
                assert_eq!(captures[0].name, "y");
                assert!(captures[0].mutable);
                assert!(matches!(&body.kind, IrKind::Variable { name, .. } if name == "x"));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }
}
