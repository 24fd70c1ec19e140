//! Compiled closures — the runtime representation of `Value::Function`.
//!
//! A `CompiledClosure` pairs a `Function`/`AsyncFunction` IR node's body
//! with the frame it closed over. `original` retains the whole source
//! `IrNode` (not just its body) so the meta-type bridge can turn a function
//! value back into the IR-node-as-value it was built from, and so a codec
//! can serialize a closure's code without the interpreter's help.
//!
//! Closures never cross a thread boundary as live values: the parallel map
//! worker always goes through an encoded byte buffer, so holding `Rc`
//! fields here is safe despite `Rc` itself being `!Send`.

use crate::env::Frame;
use crate::ir::{CaptureSpec, IrNode};
use crate::registry::{BuiltinRegistry, PlatformRegistry};
use std::rc::Rc;

pub struct CompiledClosure {
    pub params: Vec<String>,
    pub captures: Vec<CaptureSpec>,
    pub body: Rc<IrNode>,
    /// The frame active at the point the closure literal was evaluated.
    /// Lookups for captured names walk up from here, not from the caller's
    /// frame, which is what makes the closure lexical rather than dynamic.
    pub capture_frame: Rc<Frame>,
    /// The full `Function`/`AsyncFunction` node this closure was built
    /// from, retained so the meta-type bridge can reconstruct an
    /// IR-node-as-value for it without re-deriving one from `body`.
    pub original: Rc<IrNode>,
    pub is_async: bool,
    /// Registries active when this closure was built. A call re-installs
    /// these as the thread-local current registries before evaluating the
    /// body, so a closure decoded on a worker thread resolves its builtin
    /// and platform names correctly even though nothing else on that
    /// thread ever called `install_registries`.
    pub builtins: Rc<BuiltinRegistry>,
    pub platform: Rc<PlatformRegistry>,
}

impl CompiledClosure {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: Vec<String>,
        captures: Vec<CaptureSpec>,
        body: Rc<IrNode>,
        capture_frame: Rc<Frame>,
        original: Rc<IrNode>,
        is_async: bool,
        builtins: Rc<BuiltinRegistry>,
        platform: Rc<PlatformRegistry>,
    ) -> Rc<Self> {
        Rc::new(Self {
            params,
            captures,
            body,
            capture_frame,
            original,
            is_async,
            builtins,
            platform,
        })
    }

    /// Build the call frame a closure invocation evaluates its body in: a
    /// fresh child of the capture frame, with parameters bound positionally.
    ///
    /// Panics if `args.len() != self.params.len()`; the interpreter's `Call`
    /// handler is responsible for arity checking before this is reached.
    pub fn call_frame(&self, args: &[crate::value::Value]) -> Rc<Frame> {
        assert_eq!(
            args.len(),
            self.params.len(),
            "closure arity mismatch: caller must validate before binding"
        );
        let frame = Frame::child(&self.capture_frame);
        for (name, value) in self.params.iter().zip(args.iter()) {
            frame.bind(name.clone(), value.clone());
        }
        frame
    }
}

impl std::fmt::Debug for CompiledClosure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledClosure")
            .field("params", &self.params)
            .field("is_async", &self.is_async)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrKind;
    use crate::value::Value;

    fn dummy_body() -> Rc<IrNode> {
        IrNode::new(IrKind::Value(Value::Null))
    }

    #[test]
    fn call_frame_binds_params_over_capture_frame() {
        let root = Frame::root();
        root.bind("outer", Value::Integer(7));
        let original = IrNode::new(IrKind::Function {
            captures: vec![],
            params: vec!["x".into()],
            body: dummy_body(),
        });
        let closure = CompiledClosure::new(
            vec!["x".into()],
            vec![],
            dummy_body(),
            root,
            original,
            false,
            Rc::new(BuiltinRegistry::new()),
            Rc::new(PlatformRegistry::new()),
        );
        let frame = closure.call_frame(&[Value::Integer(3)]);
        assert_eq!(frame.lookup("x"), Some(Value::Integer(3)));
        assert_eq!(frame.lookup("outer"), Some(Value::Integer(7)));
    }

    #[test]
    #[should_panic(expected = "arity mismatch")]
    fn call_frame_panics_on_arity_mismatch() {
        let root = Frame::root();
        let original = IrNode::new(IrKind::Function {
            captures: vec![],
            params: vec!["x".into()],
            body: dummy_body(),
        });
        let closure = CompiledClosure::new(
            vec!["x".into()],
            vec![],
            dummy_body(),
            root,
            original,
            false,
            Rc::new(BuiltinRegistry::new()),
            Rc::new(PlatformRegistry::new()),
        );
        closure.call_frame(&[]);
    }
}
