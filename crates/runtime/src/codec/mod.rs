//! Every codec shares one traversal shape: walk a `Value` alongside the
//! `TypeDescriptor` that describes it, kind by kind, threading a
//! backreference table so repeated `Rc` pointers encode as a pointer back to
//! their first occurrence rather than being duplicated. The four codecs
//! differ only in how a "write scalar"/"write backreference" primitive is
//! spelled in their target representation:
//!
//! - [`compact`] — headerless binary, varint-prefixed backreference distances.
//! - [`framed`] — binary with a magic-prefixed frame, modern and legacy variants.
//! - [`textual`] — human-readable syntax, path-stack backreferences.
//! - [`json`] — standard JSON text, `$ref`/JSON-Pointer backreferences.
//!
//! [`datetime`] is a shared leaf used by the text-based codecs for
//! `DateTime` formatting/parsing; the binary codecs store epoch-millis
//! directly and never need calendar math.

pub mod compact;
pub mod datetime;
pub mod framed;
pub mod json;
pub mod textual;
