//! Parallel map: equivalence with the sequential path, order preservation
//! across chunk boundaries, and first-worker-error-wins semantics.

use std::rc::Rc;
use vellum_runtime::closures::CompiledClosure;
use vellum_runtime::config::RuntimeConfig;
use vellum_runtime::env::Frame;
use vellum_runtime::ir::{CaptureSpec, IrKind, IrNode};
use vellum_runtime::parallel::parallel_map;
use vellum_runtime::registry::{BuiltinRegistry, PlatformRegistry};
use vellum_runtime::types::TypeDescriptor;
use vellum_runtime::value::Value;

fn squaring_closure() -> Rc<CompiledClosure> {
    let root = Frame::root();
    let body = IrNode::new(IrKind::Builtin {
        name: "square".into(),
        type_params: vec![],
        args: vec![IrNode::new(IrKind::Variable { name: "x".into(), mutable: false, captured: false })],
    });
    let original = IrNode::new(IrKind::Function { captures: vec![], params: vec!["x".into()], body: body.clone() });
    let mut builtins = BuiltinRegistry::new();
    builtins.register_fn("square", |args| args[0].as_integer().map(|n| Value::Integer(n * n)));
    CompiledClosure::new(
        vec!["x".into()],
        vec![],
        body,
        root,
        original,
        false,
        Rc::new(builtins),
        Rc::new(PlatformRegistry::new()),
    )
}

fn failing_closure() -> Rc<CompiledClosure> {
    let root = Frame::root();
    let body = IrNode::new(IrKind::Builtin {
        name: "fail_on_three".into(),
        type_params: vec![],
        args: vec![IrNode::new(IrKind::Variable { name: "x".into(), mutable: false, captured: false })],
    });
    let original = IrNode::new(IrKind::Function {
        captures: vec![CaptureSpec { name: "unused".into(), mutable: false }],
        params: vec!["x".into()],
        body: body.clone(),
    });
    let mut builtins = BuiltinRegistry::new();
    builtins.register_fn("fail_on_three", |args| match args[0].as_integer() {
        Some(3) => {
            vellum_core::set_builtin_error("refuses to process 3");
            None
        }
        Some(n) => Some(Value::Integer(n)),
        None => None,
    });
    CompiledClosure::new(
        vec!["x".into()],
        vec![],
        body,
        root,
        original,
        false,
        Rc::new(builtins),
        Rc::new(PlatformRegistry::new()),
    )
}

#[test]
fn s6_parallel_and_sequential_results_match_for_a_large_input() {
    let closure = squaring_closure();
    let items: Vec<Value> = (0..50).map(Value::Integer).collect();
    let sequential = RuntimeConfig { parallel_map_threshold: 1000, ..RuntimeConfig::default() };
    let parallel = RuntimeConfig { parallel_map_threshold: 0, parallel_map_workers: Some(6), ..RuntimeConfig::default() };

    let expected = parallel_map(&closure, &items, &TypeDescriptor::Integer, &sequential).unwrap();
    let actual = parallel_map(&closure, &items, &TypeDescriptor::Integer, &parallel).unwrap();
    assert_eq!(actual, expected);
    assert_eq!(actual[7], Value::Integer(49));
}

#[test]
fn below_threshold_input_takes_the_sequential_path_and_still_produces_correct_output() {
    let closure = squaring_closure();
    let items: Vec<Value> = (0..3).map(Value::Integer).collect();
    let config = RuntimeConfig::default();
    let result = parallel_map(&closure, &items, &TypeDescriptor::Integer, &config).unwrap();
    assert_eq!(result, vec![Value::Integer(0), Value::Integer(1), Value::Integer(4)]);
}

#[test]
fn a_worker_failure_surfaces_through_the_result_even_with_other_workers_succeeding() {
    let closure = failing_closure();
    let items: Vec<Value> = (0..10).map(Value::Integer).collect();
    let config = RuntimeConfig { parallel_map_threshold: 0, parallel_map_workers: Some(4), ..RuntimeConfig::default() };
    let err = parallel_map(&closure, &items, &TypeDescriptor::Integer, &config).unwrap_err();
    assert!(err.to_string().contains("refuses to process 3"));
}
