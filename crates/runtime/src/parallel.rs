//! Parallel map: apply a closure to every element of an array across
//! several OS threads, falling back to a plain sequential loop below the
//! configured size threshold.
//!
//! The closure and every input element cross the thread boundary as
//! Compact-encoded bytes, not as live `Value`s — `Rc` is `!Send`, so a
//! worker decodes its own copy of the closure (reinstalling its captured
//! registries as the thread-local current ones, the same re-install
//! `Interpreter::call` already does for an ordinary call) and its own slice
//! of inputs, then encodes its slice of results back for the caller to
//! stitch together in original order.
//!
//! The first worker to fail wins: every other in-flight worker is still
//! joined (so no thread is abandoned), but only the first failure's error
//! is returned.

use crate::closures::CompiledClosure;
use crate::codec::compact;
use crate::config::RuntimeConfig;
use crate::error::{ParallelMapError, VellumError};
use crate::interp::Interpreter;
use crate::registry;
use crate::types::TypeDescriptor;
use crate::value::Value;
use std::rc::Rc;

/// Apply `closure` to every element of `items` (declared type `item_ty`),
/// returning results in input order. Runs sequentially at or below
/// `config.parallel_map_threshold`; above it, fans out across
/// `config.resolved_worker_count()` OS threads.
pub fn parallel_map(
    closure: &Rc<CompiledClosure>,
    items: &[Value],
    item_ty: &TypeDescriptor,
    config: &RuntimeConfig,
) -> Result<Vec<Value>, VellumError> {
    if items.len() <= config.parallel_map_threshold {
        return sequential_map(closure, items);
    }

    let worker_count = config.resolved_worker_count().max(1).min(items.len().max(1));
    let closure_bytes = encode_function_value(closure).map_err(ParallelMapError::Encode)?;
    let chunks = split_into_chunks(items.len(), worker_count);

    let mut encoded_chunks = Vec::with_capacity(chunks.len());
    for (start, end) in &chunks {
        let chunk_bytes: Vec<Vec<u8>> = items[*start..*end]
            .iter()
            .map(compact::encode_self_describing)
            .collect::<Result<_, _>>()
            .map_err(ParallelMapError::Encode)?;
        encoded_chunks.push(chunk_bytes);
    }

    let mut handles = Vec::with_capacity(chunks.len());
    for ((start, end), chunk_bytes) in chunks.into_iter().zip(encoded_chunks) {
        let closure_bytes = closure_bytes.clone();
        let handle = std::thread::Builder::new()
            .spawn(move || run_worker(closure_bytes, chunk_bytes))
            .map_err(|_| ParallelMapError::SpawnFailed)?;
        handles.push((start, end, handle));
    }

    let mut results: Vec<Option<Value>> = vec![None; items.len()];
    let mut first_error: Option<ParallelMapError> = None;
    for (start, _end, handle) in handles {
        let outcome = handle.join().unwrap_or_else(|_| Err(ParallelMapError::Worker("worker thread panicked".into())));
        match outcome {
            Ok(values_bytes) => {
                for (i, bytes) in values_bytes.into_iter().enumerate() {
                    let (value, _) = compact::decode_self_describing(&bytes).map_err(ParallelMapError::Decode)?;
                    results[start + i] = Some(value);
                }
            }
            Err(e) => {
                crate::diag::worker_failure(&e.to_string());
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e.into());
    }
    Ok(results.into_iter().map(|v| v.expect("every index was filled by some worker")).collect())
}

fn sequential_map(closure: &Rc<CompiledClosure>, items: &[Value]) -> Result<Vec<Value>, VellumError> {
    let interp = Interpreter::new();
    items.iter().map(|item| interp.call(closure, std::slice::from_ref(item))).collect()
}

/// Divide `len` items as evenly as possible across `workers` contiguous
/// chunks; earlier chunks absorb the remainder so no chunk is empty unless
/// `workers > len`.
fn split_into_chunks(len: usize, workers: usize) -> Vec<(usize, usize)> {
    let base = len / workers;
    let remainder = len % workers;
    let mut chunks = Vec::with_capacity(workers);
    let mut pos = 0;
    for i in 0..workers {
        let size = base + if i < remainder { 1 } else { 0 };
        if size == 0 {
            continue;
        }
        chunks.push((pos, pos + size));
        pos += size;
    }
    chunks
}

fn encode_function_value(closure: &Rc<CompiledClosure>) -> Result<Vec<u8>, crate::error::CodecError> {
    compact::encode_self_describing(&Value::Function(Rc::clone(closure)))
}

fn run_worker(closure_bytes: Vec<u8>, item_bytes: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, ParallelMapError> {
    let (closure_value, _) = compact::decode_self_describing(&closure_bytes).map_err(|e| {
        crate::diag::codec_failure("compact", &e.to_string());
        ParallelMapError::Decode(e)
    })?;
    let closure = match closure_value {
        Value::Function(c) => c,
        _ => return Err(ParallelMapError::Decode(crate::error::CodecError::TypeMismatch {
            expected: "Function".into(),
            found: closure_value.kind_name().into(),
        })),
    };
    registry::install_registries(Rc::clone(&closure.builtins), Rc::clone(&closure.platform));

    let mut items = Vec::with_capacity(item_bytes.len());
    for bytes in &item_bytes {
        let (value, _) = compact::decode_self_describing(bytes).map_err(ParallelMapError::Decode)?;
        items.push(value);
    }

    let interp = Interpreter::new();
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match interp.call(&closure, std::slice::from_ref(&item)) {
            Ok(v) => out.push(compact::encode_self_describing(&v).map_err(ParallelMapError::Encode)?),
            Err(e) => return Err(ParallelMapError::Worker(e.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Frame;
    use crate::ir::{CaptureSpec, IrKind, IrNode};
    use crate::registry::{BuiltinRegistry, PlatformRegistry};

    fn double_closure() -> Rc<CompiledClosure> {
        let root = Frame::root();
        let body = IrNode::new(IrKind::Builtin {
            name: "double".into(),
            type_params: vec![],
            args: vec![IrNode::new(IrKind::Variable {
                name: "x".into(),
                mutable: false,
                captured: false,
            })],
        });
        let mut builtins = BuiltinRegistry::new();
        builtins.register_fn("double", |args| args[0].as_integer().map(|n| Value::Integer(n * 2)));
        let original = IrNode::new(IrKind::Function {
            captures: vec![CaptureSpec {
                name: "unused".into(),
                mutable: false,
            }],
            params: vec!["x".into()],
            body: body.clone(),
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
    fn sequential_path_matches_direct_calls() {
        let closure = double_closure();
        let items: Vec<Value> = (0..4).map(Value::Integer).collect();
        let config = RuntimeConfig {
            parallel_map_threshold: 100,
            ..RuntimeConfig::default()
        };
        let result = parallel_map(&closure, &items, &TypeDescriptor::Integer, &config).unwrap();
        assert_eq!(result, vec![Value::Integer(0), Value::Integer(2), Value::Integer(4), Value::Integer(6)]);
    }

    #[test]
    fn s6_parallel_path_preserves_order_and_matches_sequential() {
        let closure = double_closure();
        let items: Vec<Value> = (0..20).map(Value::Integer).collect();
        let sequential_config = RuntimeConfig {
            parallel_map_threshold: 1000,
            ..RuntimeConfig::default()
        };
        let parallel_config = RuntimeConfig {
            parallel_map_threshold: 0,
            parallel_map_workers: Some(4),
            ..RuntimeConfig::default()
        };
        let expected = parallel_map(&closure, &items, &TypeDescriptor::Integer, &sequential_config).unwrap();
        let actual = parallel_map(&closure, &items, &TypeDescriptor::Integer, &parallel_config).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn chunk_split_never_produces_empty_chunks_when_workers_exceed_len() {
        let chunks = split_into_chunks(2, 5);
        assert!(chunks.iter().all(|(s, e)| e > s));
        let total: usize = chunks.iter().map(|(s, e)| e - s).sum();
        assert_eq!(total, 2);
    }
}
