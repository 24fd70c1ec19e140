//! Closure construction, invocation, and the "functions are themselves
//! serializable" property: a closure's original IR tree round-trips
//! through the meta-type bridge and through the Compact codec's
//! self-describing encoding of `Value::Function`.

use std::rc::Rc;
use vellum_runtime::closures::CompiledClosure;
use vellum_runtime::codec::compact;
use vellum_runtime::env::Frame;
use vellum_runtime::ir::{CaptureSpec, IrKind, IrNode};
use vellum_runtime::meta;
use vellum_runtime::registry::{BuiltinRegistry, PlatformRegistry};
use vellum_runtime::value::Value;
use vellum_runtime::{EvalResult, Interpreter};

fn adder_closure() -> Rc<CompiledClosure> {
    let root = Frame::root();
    root.bind("offset", Value::Integer(10));
    let body = IrNode::new(IrKind::Builtin {
        name: "add".into(),
        type_params: vec![],
        args: vec![
            IrNode::new(IrKind::Variable { name: "x".into(), mutable: false, captured: false }),
            IrNode::new(IrKind::Variable { name: "offset".into(), mutable: false, captured: true }),
        ],
    });
    let original = IrNode::new(IrKind::Function {
        captures: vec![CaptureSpec { name: "offset".into(), mutable: false }],
        params: vec!["x".into()],
        body: body.clone(),
    });
    let mut builtins = BuiltinRegistry::new();
    builtins.register_fn("add", |args| match (args[0].as_integer(), args[1].as_integer()) {
        (Some(a), Some(b)) => Some(Value::Integer(a + b)),
        _ => None,
    });
    CompiledClosure::new(
        vec!["x".into()],
        vec![CaptureSpec { name: "offset".into(), mutable: false }],
        body,
        root,
        original,
        false,
        Rc::new(builtins),
        Rc::new(PlatformRegistry::new()),
    )
}

#[test]
fn call_binds_params_and_resolves_captures_through_the_capture_frame() {
    let closure = adder_closure();
    let interp = Interpreter::new();
    let result = interp.call(&closure, &[Value::Integer(5)]).unwrap();
    assert_eq!(result, Value::Integer(15));
}

#[test]
fn a_closures_original_ir_round_trips_through_the_meta_type_bridge() {
    let closure = adder_closure();
    let as_value = meta::ir_node_to_value(&closure.original);
    let back = meta::value_to_ir_node(&as_value).unwrap();
    assert_eq!(back.kind.name(), closure.original.kind.name());
    match (&back.kind, &closure.original.kind) {
        (IrKind::Function { params: p1, .. }, IrKind::Function { params: p2, .. }) => {
            assert_eq!(p1, p2);
        }
        _ => panic!("expected Function nodes on both sides"),
    }
}

#[test]
fn a_function_value_round_trips_through_self_describing_compact_encoding() {
    let closure = adder_closure();
    let value = Value::Function(Rc::clone(&closure));
    let bytes = compact::encode_self_describing(&value).unwrap();
    let (decoded, _) = compact::decode_self_describing(&bytes).unwrap();
    let decoded_closure = match decoded {
        Value::Function(c) => c,
        _ => panic!("expected a Function value back"),
    };
    assert_eq!(decoded_closure.params, closure.params);

    let interp = Interpreter::new();
    vellum_runtime::registry::install_registries(
        Rc::clone(&decoded_closure.builtins),
        Rc::clone(&decoded_closure.platform),
    );
    let result = interp.call(&decoded_closure, &[Value::Integer(5)]).unwrap();
    assert_eq!(result, Value::Integer(15));
}

#[test]
fn an_unconsumed_break_escaping_to_top_level_surfaces_as_a_builtin_error() {
    let root = Frame::root();
    let body = IrNode::new(IrKind::Break(None));
    let original = IrNode::new(IrKind::Function { captures: vec![], params: vec![], body: body.clone() });
    let closure = CompiledClosure::new(
        vec![],
        vec![],
        body,
        root,
        original,
        false,
        Rc::new(BuiltinRegistry::new()),
        Rc::new(PlatformRegistry::new()),
    );
    let interp = Interpreter::new();
    let err = interp.call(&closure, &[]).unwrap_err();
    assert!(err.to_string().contains("break"));
}

#[test]
fn eval_of_a_plain_return_node_unwraps_to_ok_for_a_direct_eval_call() {
    let root = Frame::root();
    let interp = Interpreter::new();
    let node = IrNode::new(IrKind::Return(IrNode::new(IrKind::Value(Value::Integer(1)))));
    match interp.eval(&node, &root) {
        EvalResult::Return(v) => assert_eq!(v, Value::Integer(1)),
        other => panic!("expected Return, got {other:?}"),
    }
}
