//! The interpreter: evaluates IR nodes against a frame, producing one of
//! the five eval-result shapes.
//!
//! Evaluation always happens with a current frame and a current pair of
//! registries in scope. The registries are thread-local (`crate::registry`)
//! rather than threaded through every call, which is what lets a closure
//! decoded on a worker thread resolve its own builtin/platform names
//! without every call site plumbing them by hand; `Interpreter::call`
//! installs a closure's own registries before running its body so this
//! works even on a thread where nothing else ever called
//! `install_registries`.

use crate::closures::CompiledClosure;
use crate::env::Frame;
use crate::error::{LocationList, VellumError};
use crate::ir::{IrKind, IrNode, MatchCase};
use crate::registry;
use crate::types::{ScalarKind, TypeDescriptor};
use crate::value::{ScalarBuffer, Value};
use std::rc::Rc;
use vellum_core::{Location, LocationStack, error_slot};

/// Which `VellumError` variant an unconsumed `Error` result becomes at the
/// top of `Interpreter::call`. Carried alongside the human-readable message
/// so a `try`/`catch` block can still bind a plain string, while the
/// boundary that cannot recover further gets to raise the specific error
/// kind rather than a single catch-all.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    UndefinedVariable { name: String },
    TypeMismatch { expected: String, found: String },
    UnknownBuiltin { name: String },
    UnknownPlatformFunction { name: String },
    IndexOutOfBounds { index: i64, len: usize },
    NoMatchingCase { case: String },
    Builtin,
}

/// The interpreter's five-shape evaluation outcome.
#[derive(Debug, Clone)]
pub enum EvalResult {
    Ok(Value),
    Return(Value),
    Break(Option<String>),
    Continue(Option<String>),
    Error(String, LocationStack, ErrorKind),
}

impl EvalResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, EvalResult::Ok(_))
    }

    fn push_location(self, loc: Option<&Location>) -> Self {
        match (self, loc) {
            (EvalResult::Error(msg, mut stack, kind), Some(loc)) => {
                stack.push_enclosing(loc.clone());
                EvalResult::Error(msg, stack, kind)
            }
            (other, _) => other,
        }
    }
}

/// Evaluates a parameterless closure body against its own captures only;
/// used by the public `Interpreter::call` entry point and by `Call`/
/// `CallAsync` node evaluation.
pub struct Interpreter;

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Interpreter
    }

    /// Top-level entry point: apply a closure to arguments, converting an
    /// unconsumed `Error`/`Return` into a `Result`. `Break`/`Continue`
    /// escaping to this boundary are a producing-compiler bug, reported as
    /// a `BuiltinError`-shaped message rather than panicking, since a
    /// library should never crash its embedder over a malformed IR tree.
    pub fn call(&self, closure: &Rc<CompiledClosure>, args: &[Value]) -> Result<Value, VellumError> {
        let _span = crate::diag::call_span(args.len()).entered();
        if args.len() != closure.params.len() {
            return Err(VellumError::TypeMismatch {
                expected: format!("{} argument(s)", closure.params.len()),
                found: format!("{} argument(s)", args.len()),
                locations: LocationList::default(),
            });
        }
        registry::install_registries(Rc::clone(&closure.builtins), Rc::clone(&closure.platform));
        let frame = closure.call_frame(args);
        match self.eval(&closure.body, &frame) {
            EvalResult::Ok(v) | EvalResult::Return(v) => Ok(v),
            EvalResult::Error(message, stack, kind) => {
                let locations = LocationList(stack.locations().to_vec());
                Err(match kind {
                    ErrorKind::UndefinedVariable { name } => VellumError::UndefinedVariable { name, locations },
                    ErrorKind::TypeMismatch { expected, found } => VellumError::TypeMismatch { expected, found, locations },
                    ErrorKind::UnknownBuiltin { name } => VellumError::UnknownBuiltin { name, locations },
                    ErrorKind::UnknownPlatformFunction { name } => {
                        VellumError::UnknownPlatformFunction { name, locations }
                    }
                    ErrorKind::IndexOutOfBounds { index, len } => VellumError::IndexOutOfBounds { index, len, locations },
                    ErrorKind::NoMatchingCase { case } => VellumError::NoMatchingCase { case, locations },
                    ErrorKind::Builtin => VellumError::BuiltinError { message, locations },
                })
            }
            EvalResult::Break(label) => Err(VellumError::BuiltinError {
                message: format!("unconsumed break({label:?}) escaped top-level call"),
                locations: LocationList::default(),
            }),
            EvalResult::Continue(label) => Err(VellumError::BuiltinError {
                message: format!("unconsumed continue({label:?}) escaped top-level call"),
                locations: LocationList::default(),
            }),
        }
    }

    pub fn eval(&self, node: &IrNode, frame: &Rc<Frame>) -> EvalResult {
        let _span = crate::diag::eval_span(node.kind.name()).entered();
        let loc = node.locations.first();
        self.eval_kind(&node.kind, frame).push_location(loc)
    }

    fn eval_kind(&self, kind: &IrKind, frame: &Rc<Frame>) -> EvalResult {
        match kind {
            IrKind::Value(v) => EvalResult::Ok(v.clone()),

            IrKind::Variable { name, .. } => match frame.lookup(name) {
                Some(v) => EvalResult::Ok(v),
                None => err(
                    format!("undefined variable `{name}`"),
                    ErrorKind::UndefinedVariable { name: name.clone() },
                ),
            },

            IrKind::Let { name, value, .. } => match self.eval(value, frame) {
                EvalResult::Ok(v) => {
                    frame.bind(name.clone(), v);
                    EvalResult::Ok(Value::Null)
                }
                other => other,
            },

            IrKind::Assign { name, value } => match self.eval(value, frame) {
                EvalResult::Ok(v) => {
                    if frame.assign(name, v) {
                        EvalResult::Ok(Value::Null)
                    } else {
                        err(
                            format!("assignment to unbound name `{name}`"),
                            ErrorKind::UndefinedVariable { name: name.clone() },
                        )
                    }
                }
                other => other,
            },

            IrKind::Block(stmts) => {
                let mut last = Value::Null;
                for stmt in stmts {
                    match self.eval(stmt, frame) {
                        EvalResult::Ok(v) => last = v,
                        other => return other,
                    }
                }
                EvalResult::Ok(last)
            }

            IrKind::IfElse {
                cond,
                then_branch,
                else_branch,
            } => match self.eval(cond, frame) {
                EvalResult::Ok(Value::Boolean(true)) => self.eval(then_branch, frame),
                EvalResult::Ok(Value::Boolean(false)) => self.eval(else_branch, frame),
                EvalResult::Ok(other) => err(
                    format!("if condition must be Boolean, found {}", other.kind_name()),
                    ErrorKind::TypeMismatch {
                        expected: "Boolean".into(),
                        found: other.kind_name().to_string(),
                    },
                ),
                other => other,
            },

            IrKind::Match { expr, cases } => match self.eval(expr, frame) {
                EvalResult::Ok(Value::Variant(v)) => self.eval_match_cases(&v.case, &v.payload, cases, frame),
                EvalResult::Ok(other) => err(
                    format!("match expects a Variant value, found {}", other.kind_name()),
                    ErrorKind::TypeMismatch {
                        expected: "Variant".into(),
                        found: other.kind_name().to_string(),
                    },
                ),
                other => other,
            },

            IrKind::While { cond, body, label } => self.eval_while(cond, body, label.as_deref(), frame),

            IrKind::ForArray {
                binder,
                index_binder,
                collection,
                body,
                label,
            } => self.eval_for_array(binder, index_binder.as_deref(), collection, body, label.as_deref(), frame),

            IrKind::ForSet {
                binder,
                collection,
                body,
                label,
            } => self.eval_for_set(binder, collection, body, label.as_deref(), frame),

            IrKind::ForDict {
                key_binder,
                value_binder,
                collection,
                body,
                label,
            } => self.eval_for_dict(key_binder, value_binder, collection, body, label.as_deref(), frame),

            IrKind::Function {
                captures,
                params,
                body,
            }
            | IrKind::AsyncFunction {
                captures,
                params,
                body,
            } => {
                let is_async = matches!(kind, IrKind::AsyncFunction { .. });
                let builtins = registry::current_builtins().unwrap_or_default();
                let platform = registry::current_platform().unwrap_or_default();
                let original = IrNode::new(kind.clone());
                let closure = CompiledClosure::new(
                    params.clone(),
                    captures.clone(),
                    Rc::clone(body),
                    Rc::clone(frame),
                    original,
                    is_async,
                    builtins,
                    platform,
                );
                EvalResult::Ok(Value::Function(closure))
            }

            IrKind::Call { func, args } | IrKind::CallAsync { func, args } => self.eval_call(func, args, frame),

            IrKind::Platform {
                name,
                type_params,
                args,
                optional,
                ..
            } => self.eval_platform(name, type_params, args, *optional, frame),

            IrKind::Builtin {
                name,
                type_params,
                args,
            } => self.eval_builtin(name, type_params, args, frame),

            IrKind::Return(value) => match self.eval(value, frame) {
                EvalResult::Ok(v) => EvalResult::Return(v),
                other => other,
            },

            IrKind::Break(label) => EvalResult::Break(label.clone()),
            IrKind::Continue(label) => EvalResult::Continue(label.clone()),

            IrKind::Error(message) => match self.eval(message, frame) {
                EvalResult::Ok(v) => err(value_to_error_message(&v), ErrorKind::Builtin),
                other => other,
            },

            IrKind::TryCatch {
                try_block,
                message_var,
                location_var,
                catch_block,
                finally_block,
            } => self.eval_try_catch(try_block, message_var, location_var, catch_block, finally_block.as_deref(), frame),

            IrKind::NewArray { items, .. } => match self.eval_items(items, frame) {
                Ok(values) => EvalResult::Ok(Value::array(values)),
                Err(result) => result,
            },
            IrKind::NewSet { items, .. } => match self.eval_items(items, frame) {
                Ok(values) => EvalResult::Ok(Value::set(values)),
                Err(result) => result,
            },
            IrKind::NewDict { pairs, .. } => match self.eval_kv_pairs(pairs, frame) {
                Ok(pairs) => EvalResult::Ok(Value::dict(pairs)),
                Err(result) => result,
            },
            IrKind::NewRef { value, .. } => match self.eval(value, frame) {
                EvalResult::Ok(v) => EvalResult::Ok(Value::reference(v)),
                other => other,
            },
            IrKind::NewVector { element_kind, items } => self.eval_new_vector(*element_kind, items, frame),

            IrKind::Struct {
                type_descriptor,
                fields,
            } => self.eval_struct(type_descriptor, fields, frame),

            IrKind::GetField { expr, name } => {
                let field_index = expr
                    .result_type
                    .as_ref()
                    .and_then(|ty| ty.struct_field_index(name));
                match self.eval(expr, frame) {
                    EvalResult::Ok(Value::Struct(values)) => match field_index {
                        Some(idx) => match values.get(idx) {
                            Some(v) => EvalResult::Ok(v.clone()),
                            None => err(
                                format!("struct field `{name}` index out of bounds"),
                                ErrorKind::IndexOutOfBounds {
                                    index: idx as i64,
                                    len: values.len(),
                                },
                            ),
                        },
                        None => err(
                            format!("unknown struct field `{name}`"),
                            ErrorKind::TypeMismatch {
                                expected: "declared struct field".into(),
                                found: name.clone(),
                            },
                        ),
                    },
                    EvalResult::Ok(other) => err(
                        format!("GetField on non-Struct value: {}", other.kind_name()),
                        ErrorKind::TypeMismatch {
                            expected: "Struct".into(),
                            found: other.kind_name().to_string(),
                        },
                    ),
                    other => other,
                }
            }

            IrKind::Variant {
                type_descriptor,
                case,
                value,
            } => match self.eval(value, frame) {
                EvalResult::Ok(v) => {
                    if type_descriptor.variant_case_index(case).is_none() {
                        err(
                            format!("unknown variant case `{case}`"),
                            ErrorKind::TypeMismatch {
                                expected: "declared variant case".into(),
                                found: case.clone(),
                            },
                        )
                    } else {
                        EvalResult::Ok(Value::variant(case.clone(), v))
                    }
                }
                other => other,
            },

            IrKind::WrapRecursive(inner) | IrKind::UnwrapRecursive(inner) => self.eval(inner, frame),
        }
    }

    fn eval_match_cases(
        &self,
        case: &str,
        payload: &Value,
        cases: &[MatchCase],
        frame: &Rc<Frame>,
    ) -> EvalResult {
        for arm in cases {
            if arm.case == case {
                let child = Frame::child(frame);
                if let Some(bind) = &arm.bind {
                    child.bind(bind.clone(), payload.clone());
                }
                return self.eval(&arm.body, &child);
            }
        }
        err(
            format!("no matching case `{case}`"),
            ErrorKind::NoMatchingCase { case: case.to_string() },
        )
    }

    fn eval_while(&self, cond: &IrNode, body: &IrNode, label: Option<&str>, frame: &Rc<Frame>) -> EvalResult {
        loop {
            match self.eval(cond, frame) {
                EvalResult::Ok(Value::Boolean(true)) => {}
                EvalResult::Ok(Value::Boolean(false)) => return EvalResult::Ok(Value::Null),
                EvalResult::Ok(other) => {
                    return err(
                        format!("while condition must be Boolean, found {}", other.kind_name()),
                        ErrorKind::TypeMismatch {
                            expected: "Boolean".into(),
                            found: other.kind_name().to_string(),
                        },
                    );
                }
                other => return other,
            }
            match self.eval(body, frame) {
                EvalResult::Ok(_) => {}
                EvalResult::Break(l) if label_matches(&l, label) => return EvalResult::Ok(Value::Null),
                EvalResult::Continue(l) if label_matches(&l, label) => {}
                other => return other,
            }
        }
    }

    fn eval_for_array(
        &self,
        binder: &str,
        index_binder: Option<&str>,
        collection: &IrNode,
        body: &IrNode,
        label: Option<&str>,
        frame: &Rc<Frame>,
    ) -> EvalResult {
        let items = match self.eval(collection, frame) {
            EvalResult::Ok(Value::Array(items)) => items,
            EvalResult::Ok(other) => {
                return err(
                    format!("for-array expects an Array, found {}", other.kind_name()),
                    ErrorKind::TypeMismatch {
                        expected: "Array".into(),
                        found: other.kind_name().to_string(),
                    },
                );
            }
            other => return other,
        };
        let snapshot: Vec<Value> = items.borrow().clone();
        for (idx, item) in snapshot.into_iter().enumerate() {
            let child = Frame::child(frame);
            child.bind(binder.to_string(), item);
            if let Some(ib) = index_binder {
                child.bind(ib.to_string(), Value::Integer(idx as i64));
            }
            match self.eval(body, &child) {
                EvalResult::Ok(_) => {}
                EvalResult::Break(l) if label_matches(&l, label) => return EvalResult::Ok(Value::Null),
                EvalResult::Continue(l) if label_matches(&l, label) => continue,
                other => return other,
            }
        }
        EvalResult::Ok(Value::Null)
    }

    fn eval_for_set(
        &self,
        binder: &str,
        collection: &IrNode,
        body: &IrNode,
        label: Option<&str>,
        frame: &Rc<Frame>,
    ) -> EvalResult {
        let items = match self.eval(collection, frame) {
            EvalResult::Ok(Value::Set(items)) => items,
            EvalResult::Ok(other) => {
                return err(
                    format!("for-set expects a Set, found {}", other.kind_name()),
                    ErrorKind::TypeMismatch {
                        expected: "Set".into(),
                        found: other.kind_name().to_string(),
                    },
                );
            }
            other => return other,
        };
        let snapshot: Vec<Value> = items.borrow().clone();
        for item in snapshot {
            let child = Frame::child(frame);
            child.bind(binder.to_string(), item);
            match self.eval(body, &child) {
                EvalResult::Ok(_) => {}
                EvalResult::Break(l) if label_matches(&l, label) => return EvalResult::Ok(Value::Null),
                EvalResult::Continue(l) if label_matches(&l, label) => continue,
                other => return other,
            }
        }
        EvalResult::Ok(Value::Null)
    }

    fn eval_for_dict(
        &self,
        key_binder: &str,
        value_binder: &str,
        collection: &IrNode,
        body: &IrNode,
        label: Option<&str>,
        frame: &Rc<Frame>,
    ) -> EvalResult {
        let pairs = match self.eval(collection, frame) {
            EvalResult::Ok(Value::Dict(pairs)) => pairs,
            EvalResult::Ok(other) => {
                return err(
                    format!("for-dict expects a Dict, found {}", other.kind_name()),
                    ErrorKind::TypeMismatch {
                        expected: "Dict".into(),
                        found: other.kind_name().to_string(),
                    },
                );
            }
            other => return other,
        };
        let snapshot: Vec<(Value, Value)> = pairs.borrow().clone();
        for (k, v) in snapshot {
            let child = Frame::child(frame);
            child.bind(key_binder.to_string(), k);
            child.bind(value_binder.to_string(), v);
            match self.eval(body, &child) {
                EvalResult::Ok(_) => {}
                EvalResult::Break(l) if label_matches(&l, label) => return EvalResult::Ok(Value::Null),
                EvalResult::Continue(l) if label_matches(&l, label) => continue,
                other => return other,
            }
        }
        EvalResult::Ok(Value::Null)
    }

    fn eval_call(&self, func: &IrNode, args: &[Rc<IrNode>], frame: &Rc<Frame>) -> EvalResult {
        let closure = match self.eval(func, frame) {
            EvalResult::Ok(Value::Function(c)) => c,
            EvalResult::Ok(other) => {
                return err(
                    format!("call target is not a Function, found {}", other.kind_name()),
                    ErrorKind::TypeMismatch {
                        expected: "Function".into(),
                        found: other.kind_name().to_string(),
                    },
                );
            }
            other => return other,
        };
        let values = match self.eval_items(args, frame) {
            Ok(v) => v,
            Err(result) => return result,
        };
        if values.len() != closure.params.len() {
            return err(
                format!(
                    "arity mismatch: expected {} argument(s), found {}",
                    closure.params.len(),
                    values.len()
                ),
                ErrorKind::TypeMismatch {
                    expected: format!("{} argument(s)", closure.params.len()),
                    found: format!("{} argument(s)", values.len()),
                },
            );
        }
        registry::install_registries(Rc::clone(&closure.builtins), Rc::clone(&closure.platform));
        let call_frame = closure.call_frame(&values);
        match self.eval(&closure.body, &call_frame) {
            EvalResult::Return(v) => EvalResult::Ok(v),
            other => other,
        }
    }

    fn eval_platform(
        &self,
        name: &str,
        type_params: &[TypeDescriptor],
        args: &[Rc<IrNode>],
        optional: bool,
        frame: &Rc<Frame>,
    ) -> EvalResult {
        let values = match self.eval_items(args, frame) {
            Ok(v) => v,
            Err(result) => return result,
        };
        let registry = registry::current_platform().unwrap_or_default();
        match registry.resolve(name, type_params) {
            Some(body) => body(&values),
            None if optional => EvalResult::Ok(Value::Null),
            None => {
                crate::diag::registry_miss("platform", name);
                err(
                    format!("unknown platform function `{name}`"),
                    ErrorKind::UnknownPlatformFunction { name: name.to_string() },
                )
            }
        }
    }

    fn eval_builtin(
        &self,
        name: &str,
        type_params: &[TypeDescriptor],
        args: &[Rc<IrNode>],
        frame: &Rc<Frame>,
    ) -> EvalResult {
        let values = match self.eval_items(args, frame) {
            Ok(v) => v,
            Err(result) => return result,
        };
        let registry = registry::current_builtins().unwrap_or_default();
        let body = match registry.resolve(name, type_params) {
            Some(body) => body,
            None => {
                crate::diag::registry_miss("builtin", name);
                return err(
                    format!("unknown builtin `{name}`"),
                    ErrorKind::UnknownBuiltin { name: name.to_string() },
                );
            }
        };
        error_slot::clear_builtin_error();
        match body(&values) {
            Some(v) => EvalResult::Ok(v),
            None => match error_slot::take_builtin_error() {
                Some(message) => err(message, ErrorKind::Builtin),
                None => err(
                    format!("builtin `{name}` returned no value and set no error"),
                    ErrorKind::Builtin,
                ),
            },
        }
    }

    fn eval_try_catch(
        &self,
        try_block: &IrNode,
        message_var: &str,
        location_var: &str,
        catch_block: &IrNode,
        finally_block: Option<&IrNode>,
        frame: &Rc<Frame>,
    ) -> EvalResult {
        let try_result = self.eval(try_block, frame);
        let after_catch = match try_result {
            EvalResult::Error(message, stack, _kind) => {
                let child = Frame::child(frame);
                child.bind(message_var.to_string(), Value::string(message));
                let locations = Value::array(
                    stack
                        .locations()
                        .iter()
                        .map(|l| Value::string(l.to_string()))
                        .collect(),
                );
                child.bind(location_var.to_string(), locations);
                self.eval(catch_block, &child)
            }
            other => other,
        };
        match finally_block {
            None => after_catch,
            Some(finally) => match self.eval(finally, frame) {
                EvalResult::Ok(_) => after_catch,
                other => other,
            },
        }
    }

    /// Evaluate a list of nodes left-to-right, short-circuiting on the
    /// first non-`Ok` result by returning it as `Err`.
    fn eval_items(&self, items: &[Rc<IrNode>], frame: &Rc<Frame>) -> Result<Vec<Value>, EvalResult> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match self.eval(item, frame) {
                EvalResult::Ok(v) => out.push(v),
                other => return Err(other),
            }
        }
        Ok(out)
    }

    fn eval_kv_pairs(
        &self,
        pairs: &[(Rc<IrNode>, Rc<IrNode>)],
        frame: &Rc<Frame>,
    ) -> Result<Vec<(Value, Value)>, EvalResult> {
        let mut out = Vec::with_capacity(pairs.len());
        for (k, v) in pairs {
            let key = match self.eval(k, frame) {
                EvalResult::Ok(v) => v,
                other => return Err(other),
            };
            let val = match self.eval(v, frame) {
                EvalResult::Ok(v) => v,
                other => return Err(other),
            };
            out.push((key, val));
        }
        Ok(out)
    }

    fn eval_new_vector(&self, kind: ScalarKind, items: &[Rc<IrNode>], frame: &Rc<Frame>) -> EvalResult {
        let mut floats = Vec::new();
        let mut ints = Vec::new();
        let mut bools = Vec::new();
        for item in items {
            let v = match self.eval(item, frame) {
                EvalResult::Ok(v) => v,
                other => return other,
            };
            match (kind, &v) {
                (ScalarKind::Float, Value::Float(x)) => floats.push(*x),
                (ScalarKind::Integer, Value::Integer(x)) => ints.push(*x),
                (ScalarKind::Boolean, Value::Boolean(x)) => bools.push(*x),
                _ => {
                    return err(
                        format!(
                            "NewVector element kind mismatch: expected {}, found {}",
                            kind.name(),
                            v.kind_name()
                        ),
                        ErrorKind::TypeMismatch {
                            expected: kind.name().to_string(),
                            found: v.kind_name().to_string(),
                        },
                    );
                }
            }
        }
        let buf = match kind {
            ScalarKind::Float => ScalarBuffer::Float(floats),
            ScalarKind::Integer => ScalarBuffer::Integer(ints),
            ScalarKind::Boolean => ScalarBuffer::Boolean(bools),
        };
        EvalResult::Ok(Value::Vector(Rc::new(std::cell::RefCell::new(buf))))
    }

    fn eval_struct(
        &self,
        type_descriptor: &TypeDescriptor,
        fields: &[(String, Rc<IrNode>)],
        frame: &Rc<Frame>,
    ) -> EvalResult {
        // A well-formed literal provides exactly the descriptor's fields,
        // so `ordered` is sized to the literal rather than the descriptor;
        // an index beyond that bound means the descriptor disagrees with
        // the literal about field count, which is reported rather than
        // indexed into blindly.
        let mut ordered: Vec<Option<Value>> = vec![None; fields.len()];
        for (name, expr) in fields {
            let idx = match type_descriptor.struct_field_index(name) {
                Some(idx) => idx,
                None => {
                    return err(
                        format!("unknown struct field `{name}`"),
                        ErrorKind::TypeMismatch {
                            expected: "declared struct field".into(),
                            found: name.clone(),
                        },
                    );
                }
            };
            match ordered.get_mut(idx) {
                Some(slot) => match self.eval(expr, frame) {
                    EvalResult::Ok(v) => *slot = Some(v),
                    other => return other,
                },
                None => {
                    return err(
                        format!("struct field `{name}` index out of range for this literal"),
                        ErrorKind::IndexOutOfBounds { index: idx as i64, len: ordered.len() },
                    );
                }
            }
        }
        let values: Option<Vec<Value>> = ordered.into_iter().collect();
        match values {
            Some(values) => EvalResult::Ok(Value::struct_of(values)),
            None => err(
                "struct literal missing one or more declared fields".to_string(),
                ErrorKind::Builtin,
            ),
        }
    }
}

fn err(message: impl Into<String>, kind: ErrorKind) -> EvalResult {
    EvalResult::Error(message.into(), LocationStack::new(), kind)
}

fn label_matches(produced: &Option<String>, expected: Option<&str>) -> bool {
    match (produced, expected) {
        (None, _) => true,
        (Some(p), Some(e)) => p == e,
        (Some(_), None) => true,
    }
}

fn value_to_error_message(v: &Value) -> String {
    v.as_string().map(str::to_string).unwrap_or_else(|| format!("{v:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrKind;

    fn lit(v: Value) -> Rc<IrNode> {
        IrNode::new(IrKind::Value(v))
    }

    #[test]
    fn block_yields_last_statement_value() {
        let interp = Interpreter::new();
        let frame = Frame::root();
        let node = IrNode::new(IrKind::Block(vec![lit(Value::Integer(1)), lit(Value::Integer(2))]));
        match interp.eval(&node, &frame) {
            EvalResult::Ok(Value::Integer(n)) => assert_eq!(n, 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let interp = Interpreter::new();
        let frame = Frame::root();
        let node = IrNode::new(IrKind::Variable {
            name: "nope".into(),
            mutable: false,
            captured: false,
        });
        match interp.eval(&node, &frame) {
            EvalResult::Error(msg, _, kind) => {
                assert!(msg.contains("nope"));
                assert_eq!(kind, ErrorKind::UndefinedVariable { name: "nope".into() });
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn let_then_variable_round_trips() {
        let interp = Interpreter::new();
        let frame = Frame::root();
        let let_node = IrNode::new(IrKind::Let {
            name: "x".into(),
            mutable: false,
            value: lit(Value::Integer(41)),
        });
        assert!(interp.eval(&let_node, &frame).is_ok());
        let read = IrNode::new(IrKind::Variable {
            name: "x".into(),
            mutable: false,
            captured: false,
        });
        match interp.eval(&read, &frame) {
            EvalResult::Ok(Value::Integer(n)) => assert_eq!(n, 41),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn labelled_break_unwinds_only_the_matching_loop() {
        let interp = Interpreter::new();
        let frame = Frame::root();
        frame.bind("i", Value::Integer(0));
        let cond = IrNode::new(IrKind::Value(Value::Boolean(true)));
        let body = IrNode::new(IrKind::Break(Some("outer".into())));
        let node = IrNode::new(IrKind::While {
            cond,
            body,
            label: Some("outer".into()),
        });
        match interp.eval(&node, &frame) {
            EvalResult::Ok(Value::Null) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn try_catch_recovers_from_error_and_binds_message() {
        let interp = Interpreter::new();
        let frame = Frame::root();
        let try_block = IrNode::new(IrKind::Error(lit(Value::string("boom"))));
        let catch_block = IrNode::new(IrKind::Variable {
            name: "msg".into(),
            mutable: false,
            captured: false,
        });
        let node = IrNode::new(IrKind::TryCatch {
            try_block,
            message_var: "msg".into(),
            location_var: "loc".into(),
            catch_block,
            finally_block: None,
        });
        match interp.eval(&node, &frame) {
            EvalResult::Ok(Value::String(s)) => assert_eq!(&*s, "boom"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn error_node_accumulates_locations_innermost_first() {
        let interp = Interpreter::new();
        let frame = Frame::root();
        let inner = IrNode::with_location(
            IrKind::Error(lit(Value::string("deep"))),
            Location::new("f.vl", 10, 1),
        );
        let outer = IrNode::with_location(IrKind::Block(vec![inner]), Location::new("f.vl", 9, 1));
        match interp.eval(&outer, &frame) {
            EvalResult::Error(_, stack, _kind) => {
                let lines: Vec<u32> = stack.locations().iter().map(|l| l.line).collect();
                assert_eq!(lines, vec![10, 9]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
