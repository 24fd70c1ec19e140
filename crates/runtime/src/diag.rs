//! Structured diagnostics via `tracing`. The library never installs a
//! subscriber itself — an embedder that wants output wires up
//! `tracing-subscriber` (or any other `Subscriber`) on its own, the usual
//! convention for a library crate sharing a process with its host.
//!
//! Per-node evaluation spans are feature-gated behind `trace-eval`: a
//! tree-walking interpreter pays a real cost entering a span at every node,
//! so tracing every `eval` call is opt-in rather than always-on.

use tracing::Span;

/// Open a span for one top-level closure call.
pub fn call_span(param_count: usize) -> Span {
    tracing::debug_span!("vellum_call", param_count)
}

/// Open a per-node evaluation span when `trace-eval` is enabled; a disabled
/// span costs nothing to enter or exit.
#[cfg(feature = "trace-eval")]
pub fn eval_span(kind: &str) -> Span {
    tracing::debug_span!("vellum_eval", kind)
}

#[cfg(not(feature = "trace-eval"))]
pub fn eval_span(_kind: &str) -> Span {
    Span::none()
}

pub fn registry_miss(kind: &str, name: &str) {
    tracing::debug!(kind, name, "registry lookup missed");
}

pub fn codec_failure(codec: &str, reason: &str) {
    tracing::warn!(codec, reason, "codec operation failed");
}

pub fn worker_failure(reason: &str) {
    tracing::warn!(reason, "parallel map worker failed");
}
