//! The public error type and its codec/parallel-map sub-errors.
//!
//! Internally the interpreter carries failures through `EvalResult::Error`
//! so a `try`/`catch` block can intercept them before they ever become a
//! `VellumError`. `VellumError` is only constructed at a boundary that
//! cannot recover further: an unconsumed `Error` reaching the top of
//! `Interpreter::call`, or a codec/parallel-map failure.

use std::fmt;
use thiserror::Error;
use vellum_core::Location;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum VellumError {
    #[error("undefined variable `{name}` at {locations}")]
    UndefinedVariable { name: String, locations: LocationList },

    #[error("type mismatch: expected {expected}, found {found} at {locations}")]
    TypeMismatch {
        expected: String,
        found: String,
        locations: LocationList,
    },

    #[error("unknown builtin `{name}` at {locations}")]
    UnknownBuiltin { name: String, locations: LocationList },

    #[error("unknown platform function `{name}` at {locations}")]
    UnknownPlatformFunction { name: String, locations: LocationList },

    #[error("index {index} out of bounds for length {len} at {locations}")]
    IndexOutOfBounds {
        index: i64,
        len: usize,
        locations: LocationList,
    },

    #[error("no matching case `{case}` at {locations}")]
    NoMatchingCase { case: String, locations: LocationList },

    #[error("builtin error: {message} at {locations}")]
    BuiltinError { message: String, locations: LocationList },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    ParallelMap(#[from] ParallelMapError),
}

/// Thin wrapper so `VellumError`'s `Display` can render a location stack
/// without giving every variant its own formatting logic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationList(pub Vec<Location>);

impl From<Vec<Location>> for LocationList {
    fn from(v: Vec<Location>) -> Self {
        LocationList(v)
    }
}

impl fmt::Display for LocationList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<no location>");
        }
        let rendered: Vec<String> = self.0.iter().map(|l| l.to_string()).collect();
        write!(f, "[{}]", rendered.join(", "))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("bad magic bytes")]
    BadMagic,

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("varint exceeds maximum length")]
    VarintTooLong,

    #[error("invalid utf-8 in string payload")]
    InvalidUtf8,

    #[error("unresolvable backreference: {distance_or_path}")]
    UnresolvableBackref { distance_or_path: String },

    #[error("unknown variant case `{case}`")]
    UnknownVariantCase { case: String },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// The detailed-error shape used by the JSON and Textual codecs, which
    /// can pin an error to a path/line/column in the source document rather
    /// than only a byte offset. `path` is omitted from the rendered message
    /// when the failure has no meaningful document path (e.g. a top-level
    /// scalar).
    #[error("{}", render_detailed(reason, path, *line, *col, type_name))]
    Detailed {
        reason: String,
        path: Option<String>,
        line: u32,
        col: u32,
        type_name: String,
    },
}

fn render_detailed(reason: &str, path: &Option<String>, line: u32, col: u32, type_name: &str) -> String {
    match path {
        Some(path) => format!(
            "Error occurred because {reason} at {path} (line {line}, col {col}) while parsing value of type \"{type_name}\""
        ),
        None => format!(
            "Error occurred because {reason} (line {line}, col {col}) while parsing value of type \"{type_name}\""
        ),
    }
}

impl From<vellum_core::VarintError> for CodecError {
    fn from(e: vellum_core::VarintError) -> Self {
        match e {
            vellum_core::VarintError::TooLong => CodecError::VarintTooLong,
            vellum_core::VarintError::UnexpectedEof => CodecError::UnexpectedEof,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParallelMapError {
    #[error("failed to spawn worker thread")]
    SpawnFailed,

    #[error("failed to encode closure or item for a worker: {0}")]
    Encode(CodecError),

    #[error("failed to decode closure or result from a worker: {0}")]
    Decode(CodecError),

    /// The first worker failure's message, once one worker fails every
    /// other in-flight worker is still joined but its result discarded.
    #[error("worker failed: {0}")]
    Worker(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_list_renders_empty_stack() {
        assert_eq!(LocationList::default().to_string(), "<no location>");
    }

    #[test]
    fn varint_error_maps_to_codec_error() {
        let e: CodecError = vellum_core::VarintError::TooLong.into();
        assert_eq!(e, CodecError::VarintTooLong);
    }

    #[test]
    fn vellum_error_wraps_codec_error_transparently() {
        let err: VellumError = CodecError::BadMagic.into();
        assert_eq!(err.to_string(), "bad magic bytes");
    }
}
