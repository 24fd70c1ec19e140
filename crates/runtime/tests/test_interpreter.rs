//! Control-flow and error-location-stack behavior that spans several
//! `IrKind` handlers at once, exercised without going through a compiled
//! closure.

use std::rc::Rc;
use vellum_runtime::env::Frame;
use vellum_runtime::ir::{IrKind, IrNode, MatchCase};
use vellum_runtime::{EvalResult, Interpreter};
use vellum_runtime::value::Value;

fn int(n: i64) -> Rc<IrNode> {
    IrNode::new(IrKind::Value(Value::Integer(n)))
}

fn bool_node(b: bool) -> Rc<IrNode> {
    IrNode::new(IrKind::Value(Value::Boolean(b)))
}

/// An embedder wires up its own subscriber; this is what that looks like in
/// a test binary that wants `tracing` output for local debugging.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn a_labeled_break_stops_only_the_loop_it_names() {
    init_tracing();
    let interp = Interpreter::new();
    let root = Frame::root();
    root.bind("i", Value::Integer(0));
    // while true { i = i + 1; if i >= 3 { break 'outer; } }
    let cond = bool_node(true);
    let body = IrNode::new(IrKind::Block(vec![
        IrNode::new(IrKind::Assign {
            name: "i".into(),
            value: IrNode::new(IrKind::Builtin {
                name: "inc".into(),
                type_params: vec![],
                args: vec![IrNode::new(IrKind::Variable { name: "i".into(), mutable: true, captured: false })],
            }),
        }),
        IrNode::new(IrKind::IfElse {
            cond: IrNode::new(IrKind::Builtin {
                name: "at_three".into(),
                type_params: vec![],
                args: vec![IrNode::new(IrKind::Variable { name: "i".into(), mutable: true, captured: false })],
            }),
            then_branch: IrNode::new(IrKind::Break(Some("outer".into()))),
            else_branch: IrNode::new(IrKind::Value(Value::Null)),
        }),
    ]));
    let while_node = IrNode::new(IrKind::While { cond, body, label: Some("outer".into()) });

    let mut builtins = vellum_runtime::registry::BuiltinRegistry::new();
    builtins.register_fn("inc", |args| args[0].as_integer().map(|n| Value::Integer(n + 1)));
    builtins.register_fn("at_three", |args| args[0].as_integer().map(|n| Value::Boolean(n >= 3)));
    vellum_runtime::registry::install_registries(
        Rc::new(builtins),
        Rc::new(vellum_runtime::registry::PlatformRegistry::new()),
    );

    let result = interp.eval(&while_node, &root);
    assert!(result.is_ok());
    assert_eq!(root.lookup("i"), Some(Value::Integer(3)));
}

#[test]
fn match_binds_the_payload_for_the_selected_case_only() {
    let interp = Interpreter::new();
    let root = Frame::root();
    let expr = IrNode::new(IrKind::Value(Value::variant("Some", Value::Integer(9))));
    let cases = vec![
        MatchCase { case: "None".into(), bind: None, body: int(0) },
        MatchCase {
            case: "Some".into(),
            bind: Some("payload".into()),
            body: IrNode::new(IrKind::Variable { name: "payload".into(), mutable: false, captured: false }),
        },
    ];
    let node = IrNode::new(IrKind::Match { expr, cases });
    match interp.eval(&node, &root) {
        EvalResult::Ok(v) => assert_eq!(v, Value::Integer(9)),
        other => panic!("expected Ok(9), got {other:?}"),
    }
}

#[test]
fn try_catch_binds_message_and_locations_and_runs_finally_regardless() {
    let interp = Interpreter::new();
    let root = Frame::root();
    root.bind("ran_finally", Value::Boolean(false));

    let try_block = IrNode::new(IrKind::Error(IrNode::new(IrKind::Value(Value::string("boom")))));
    let catch_block = IrNode::new(IrKind::Variable { name: "caught_message".into(), mutable: false, captured: false });
    let finally_block = IrNode::new(IrKind::Assign { name: "ran_finally".into(), value: bool_node(true) });

    let node = IrNode::new(IrKind::TryCatch {
        try_block,
        message_var: "caught_message".into(),
        location_var: "caught_locations".into(),
        catch_block,
        finally_block: Some(finally_block),
    });

    match interp.eval(&node, &root) {
        EvalResult::Ok(v) => assert_eq!(v, Value::string("boom")),
        other => panic!("expected Ok(\"boom\"), got {other:?}"),
    }
    assert_eq!(root.lookup("ran_finally"), Some(Value::Boolean(true)));
}

#[test]
fn an_undefined_variable_error_accumulates_a_location_stack_as_it_unwinds() {
    let interp = Interpreter::new();
    let root = Frame::root();
    let inner = IrNode::new(IrKind::Variable { name: "missing".into(), mutable: false, captured: false });
    let outer = IrNode::new(IrKind::Block(vec![inner]));
    match interp.eval(&outer, &root) {
        EvalResult::Error(message, _stack, _kind) => assert!(message.contains("missing")),
        other => panic!("expected Error, got {other:?}"),
    }
}
