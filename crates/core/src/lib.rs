//! Vellum Core: language-agnostic wire primitives and thread-local runtime glue
//!
//! This crate provides the pieces that are useful to more than one host
//! around the Vellum value universe: the LEB128/zigzag wire primitives every
//! codec builds on, the source-location stack errors accumulate as they
//! bubble through the interpreter, and the thread-local builtin-error slot
//! that lets a builtin body signal failure without unwinding across an FFI
//! or thread boundary.
//!
//! # Modules
//!
//! - `varint`: unsigned LEB128 and zigzag varint encode/decode
//! - `location`: source location and the location-stack error carrier
//! - `error_slot`: thread-local "did the last builtin call fail" flag

pub mod error_slot;
pub mod location;
pub mod varint;

pub use error_slot::{clear_builtin_error, has_builtin_error, set_builtin_error, take_builtin_error};
pub use location::{Location, LocationStack};
pub use varint::{VarintError, read_uvarint, read_zigzag, write_uvarint, write_zigzag};
