//! Vellum Runtime: type descriptors, the value universe, IR nodes, the
//! interpreter, the meta-type bridge, the wire codecs, and the parallel map
//! worker for the Vellum expression-language host.
//!
//! A host embeds this crate by constructing a `BuiltinRegistry` and a
//! `PlatformRegistry` (`registry`), compiling or decoding IR into a
//! `CompiledClosure` (`closures`, `meta`), and driving evaluation through
//! `interp::Interpreter`. Values cross process or thread boundaries only as
//! bytes, via one of the four codecs under `codec`; `parallel::parallel_map`
//! is the one place this crate itself moves a closure and its inputs across
//! an OS thread boundary.

pub mod closures;
pub mod codec;
pub mod config;
pub mod diag;
pub mod env;
pub mod error;
pub mod interp;
pub mod ir;
pub mod meta;
pub mod parallel;
pub mod registry;
pub mod stdlib;
pub mod types;
pub mod value;

pub use closures::CompiledClosure;
pub use config::RuntimeConfig;
pub use env::Frame;
pub use error::{CodecError, ParallelMapError, VellumError};
pub use interp::{ErrorKind, EvalResult, Interpreter};
pub use ir::{IrKind, IrNode};
pub use registry::{Asyncness, BuiltinRegistry, PlatformRegistry};
pub use types::TypeDescriptor;
pub use value::Value;
