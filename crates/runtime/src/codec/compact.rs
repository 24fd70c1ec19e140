//! The compact binary codec: headerless, type-driven.
//!
//! Encoding and decoding both walk the shared shape of a type descriptor and
//! a value together; nothing on the wire names its own kind except a
//! `Variant`'s case index and a container's backreference tag, because the
//! descriptor already tells the decoder what is coming next.
//!
//! A `Function` value is the one kind whose declared type alone cannot drive
//! traversal all the way down: its captures are typed only as "whatever
//! value the compiler closed over", not as individual declared types, since
//! `CaptureSpec` carries a name and a mutability flag but not a type. A
//! function's IR-as-value and its captures are therefore written with
//! `self_describing`, a tag-prefixed encoding that carries its own kind byte
//! per value rather than reading one from a descriptor.
//!
//! Backreference distances are measured from the position just before the
//! distance varint itself back to the position just before the first
//! occurrence's own distance varint — not from the position just after, as a
//! literal reading of "distance from the current write cursor" might
//! suggest. Measuring from "after" the varint makes the distance depend on
//! its own encoded length, which has no closed-form fixed point without an
//! iterative resolution pass; measuring from "before" avoids the problem
//! entirely while preserving everything the backreference protocol needs:
//! `d == 0` still unambiguously means "first occurrence" for any container
//! that isn't at stream offset zero... and a container actually at offset
//! zero can never be the *referencing* occurrence, since a reference can
//! only occur after something to refer back to has already been written.

use crate::closures::CompiledClosure;
use crate::env::Frame;
use crate::error::CodecError;
use crate::ir::IrNode;
use crate::meta;
use crate::registry;
use crate::types::{NamedField, ScalarKind, TypeDescriptor};
use crate::value::{MatrixBuffer, ScalarBuffer, Value};
use std::collections::HashMap;
use std::rc::Rc;
use vellum_core::varint::{read_uvarint, read_zigzag, write_uvarint, write_zigzag};

/// Encode `value` under `ty` with a fresh backreference table.
pub fn encode(value: &Value, ty: &TypeDescriptor) -> Result<Vec<u8>, CodecError> {
    let mut enc = Encoder::new();
    enc.encode(value, ty)?;
    Ok(enc.out)
}

/// Decode a value of type `ty` from the front of `bytes`, returning the
/// value and the number of bytes consumed.
pub fn decode(bytes: &[u8], ty: &TypeDescriptor) -> Result<(Value, usize), CodecError> {
    let mut dec = Decoder::new(bytes);
    let value = dec.decode(ty)?;
    Ok((value, dec.pos))
}

struct Encoder {
    out: Vec<u8>,
    seen: HashMap<usize, usize>,
}

impl Encoder {
    fn new() -> Self {
        Self {
            out: Vec::new(),
            seen: HashMap::new(),
        }
    }

    /// Writes the backreference tag for a shareable container. Returns
    /// `true` if this is the first occurrence (caller must write content).
    fn backref_tag(&mut self, ptr: usize) -> bool {
        let start = self.out.len();
        match self.seen.get(&ptr) {
            Some(&first_start) => {
                let distance = (start - first_start) as u64;
                write_uvarint(distance, &mut self.out);
                false
            }
            None => {
                write_uvarint(0, &mut self.out);
                self.seen.insert(ptr, start);
                true
            }
        }
    }

    fn encode(&mut self, value: &Value, ty: &TypeDescriptor) -> Result<(), CodecError> {
        if let TypeDescriptor::Recursive(_) | TypeDescriptor::RecursiveSelf(_) = ty {
            return self.encode(value, &ty.unwrap_recursive());
        }
        match (ty, value) {
            (TypeDescriptor::Never, _) => Ok(()),
            (TypeDescriptor::Null, Value::Null) => Ok(()),
            (TypeDescriptor::Boolean, Value::Boolean(b)) => {
                self.out.push(if *b { 1 } else { 0 });
                Ok(())
            }
            (TypeDescriptor::Integer, Value::Integer(n)) => {
                write_zigzag(*n, &mut self.out);
                Ok(())
            }
            (TypeDescriptor::DateTime, Value::DateTime(t)) => {
                write_zigzag(*t, &mut self.out);
                Ok(())
            }
            (TypeDescriptor::Float, Value::Float(x)) => {
                self.out.extend_from_slice(&x.to_le_bytes());
                Ok(())
            }
            (TypeDescriptor::String, Value::String(s)) => {
                write_uvarint(s.len() as u64, &mut self.out);
                self.out.extend_from_slice(s.as_bytes());
                Ok(())
            }
            (TypeDescriptor::Blob, Value::Blob(b)) => {
                write_uvarint(b.len() as u64, &mut self.out);
                self.out.extend_from_slice(b);
                Ok(())
            }
            (TypeDescriptor::Array(elem), Value::Array(items)) => {
                let ptr = Rc::as_ptr(items) as usize;
                if self.backref_tag(ptr) {
                    let items = items.borrow();
                    write_uvarint(items.len() as u64, &mut self.out);
                    for item in items.iter() {
                        self.encode(item, elem)?;
                    }
                }
                Ok(())
            }
            (TypeDescriptor::Set(elem), Value::Set(items)) => {
                let ptr = Rc::as_ptr(items) as usize;
                if self.backref_tag(ptr) {
                    let items = items.borrow();
                    write_uvarint(items.len() as u64, &mut self.out);
                    for item in items.iter() {
                        self.encode(item, elem)?;
                    }
                }
                Ok(())
            }
            (TypeDescriptor::Dict(key_ty, val_ty), Value::Dict(pairs)) => {
                let ptr = Rc::as_ptr(pairs) as usize;
                if self.backref_tag(ptr) {
                    let pairs = pairs.borrow();
                    write_uvarint(pairs.len() as u64, &mut self.out);
                    for (k, v) in pairs.iter() {
                        self.encode(k, key_ty)?;
                        self.encode(v, val_ty)?;
                    }
                }
                Ok(())
            }
            (TypeDescriptor::Struct(field_tys), Value::Struct(fields)) => {
                if field_tys.len() != fields.len() {
                    return Err(type_mismatch("matching struct arity", value));
                }
                for ((_, field_ty), field_val) in field_tys.iter().zip(fields.iter()) {
                    self.encode(field_val, field_ty)?;
                }
                Ok(())
            }
            (TypeDescriptor::Variant(cases), Value::Variant(vv)) => {
                let index = case_index(cases, &vv.case)?;
                write_uvarint(index as u64, &mut self.out);
                self.encode(&vv.payload, &cases[index].1)
            }
            (TypeDescriptor::Ref(inner_ty), Value::Ref(cell)) => {
                let ptr = Rc::as_ptr(cell) as usize;
                if self.backref_tag(ptr) {
                    self.encode(&cell.borrow(), inner_ty)?;
                }
                Ok(())
            }
            (TypeDescriptor::Vector(kind), Value::Vector(buf)) => {
                let buf = buf.borrow();
                write_uvarint(buf.len() as u64, &mut self.out);
                write_scalar_buffer(*kind, &buf, &mut self.out)
            }
            (TypeDescriptor::Matrix(kind), Value::Matrix(buf)) => {
                let buf = buf.borrow();
                write_uvarint(buf.rows as u64, &mut self.out);
                write_uvarint(buf.cols as u64, &mut self.out);
                write_scalar_buffer(*kind, &buf.data, &mut self.out)
            }
            (TypeDescriptor::Function(_, _) | TypeDescriptor::AsyncFunction(_, _), Value::Function(closure)) => {
                self.encode_function(closure)
            }
            _ => Err(type_mismatch(ty.kind_name(), value)),
        }
    }

    fn encode_function(&mut self, closure: &Rc<CompiledClosure>) -> Result<(), CodecError> {
        let ir_value = meta::ir_node_to_value(&closure.original);
        let ir_bytes = encode_self_describing(&ir_value)?;
        write_uvarint(ir_bytes.len() as u64, &mut self.out);
        self.out.extend_from_slice(&ir_bytes);

        let captured: Vec<(String, Value)> = closure
            .captures
            .iter()
            .map(|c| {
                let value = closure
                    .capture_frame
                    .lookup(&c.name)
                    .unwrap_or(Value::Null);
                (c.name.clone(), value)
            })
            .collect();
        write_uvarint(captured.len() as u64, &mut self.out);
        for (name, value) in &captured {
            write_uvarint(name.len() as u64, &mut self.out);
            self.out.extend_from_slice(name.as_bytes());
            let value_bytes = encode_self_describing(value)?;
            write_uvarint(value_bytes.len() as u64, &mut self.out);
            self.out.extend_from_slice(&value_bytes);
        }
        Ok(())
    }
}

/// Tag-prefixed encoding of an arbitrary value, with no driving descriptor.
/// Used for a closure's retained IR tree and its captures (see the module
/// docs), and reused by the Framed codec's modern header to embed a
/// descriptor-as-value ahead of the descriptor-driven value that follows it.
pub(crate) fn encode_self_describing(value: &Value) -> Result<Vec<u8>, CodecError> {
    let mut sd = SelfDescribing::new();
    sd.encode(value)?;
    Ok(sd.out)
}

pub(crate) fn decode_self_describing(bytes: &[u8]) -> Result<(Value, usize), CodecError> {
    let mut sd = SelfDescribingDecoder::new(bytes);
    let value = sd.decode()?;
    Ok((value, sd.pos))
}

struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    seen: HashMap<usize, Value>,
    /// Start offset of the backreference tag currently being decoded, set
    /// by `backref_tag` on a fresh occurrence and consumed by `remember`
    /// once the caller has finished decoding that occurrence's content.
    pending_start: Option<usize>,
}

impl<'a> Decoder<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            seen: HashMap::new(),
            pending_start: None,
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.bytes.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn uvarint(&mut self) -> Result<u64, CodecError> {
        let (v, used) = read_uvarint(&self.bytes[self.pos..])?;
        self.pos += used;
        Ok(v)
    }

    fn zigzag(&mut self) -> Result<i64, CodecError> {
        let (v, used) = read_zigzag(&self.bytes[self.pos..])?;
        self.pos += used;
        Ok(v)
    }

    /// Reads a backreference tag, returning either a previously-seen value
    /// or `None` to signal the caller must decode fresh content and then
    /// call `remember`.
    fn backref_tag(&mut self) -> Result<Option<Value>, CodecError> {
        let start = self.pos;
        let distance = self.uvarint()?;
        if distance == 0 {
            self.pending_start = Some(start);
            Ok(None)
        } else {
            let target = start
                .checked_sub(distance as usize)
                .ok_or_else(|| CodecError::UnresolvableBackref {
                    distance_or_path: distance.to_string(),
                })?;
            self.seen
                .get(&target)
                .cloned()
                .map(Some)
                .ok_or_else(|| CodecError::UnresolvableBackref {
                    distance_or_path: distance.to_string(),
                })
        }
    }

    fn remember(&mut self, value: Value) {
        if let Some(start) = self.pending_start.take() {
            self.seen.insert(start, value);
        }
    }

    fn decode(&mut self, ty: &TypeDescriptor) -> Result<Value, CodecError> {
        if let TypeDescriptor::Recursive(_) | TypeDescriptor::RecursiveSelf(_) = ty {
            return self.decode(&ty.unwrap_recursive());
        }
        match ty {
            TypeDescriptor::Never => Err(CodecError::TypeMismatch {
                expected: "any decodable type".into(),
                found: "Never".into(),
            }),
            TypeDescriptor::Null => Ok(Value::Null),
            TypeDescriptor::Boolean => {
                let b = self.take(1)?[0];
                Ok(Value::Boolean(b != 0))
            }
            TypeDescriptor::Integer => Ok(Value::Integer(self.zigzag()?)),
            TypeDescriptor::DateTime => Ok(Value::DateTime(self.zigzag()?)),
            TypeDescriptor::Float => {
                let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
                Ok(Value::Float(f64::from_le_bytes(bytes)))
            }
            TypeDescriptor::String => {
                let len = self.uvarint()? as usize;
                let bytes = self.take(len)?;
                let s = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Value::string(s))
            }
            TypeDescriptor::Blob => {
                let len = self.uvarint()? as usize;
                Ok(Value::blob(self.take(len)?.to_vec()))
            }
            TypeDescriptor::Array(elem) => self.decode_backref_seq(|d| d.decode(elem), Value::array),
            TypeDescriptor::Set(elem) => self.decode_backref_seq(|d| d.decode(elem), Value::set),
            TypeDescriptor::Dict(key_ty, val_ty) => {
                if let Some(v) = self.backref_tag()? {
                    return Ok(v);
                }
                let count = self.uvarint()? as usize;
                let mut pairs = Vec::with_capacity(count);
                for _ in 0..count {
                    let k = self.decode(key_ty)?;
                    let v = self.decode(val_ty)?;
                    pairs.push((k, v));
                }
                let value = Value::dict(pairs);
                self.remember(value.clone());
                Ok(value)
            }
            TypeDescriptor::Struct(field_tys) => {
                let mut fields = Vec::with_capacity(field_tys.len());
                for (_, field_ty) in field_tys.iter() {
                    fields.push(self.decode(field_ty)?);
                }
                Ok(Value::struct_of(fields))
            }
            TypeDescriptor::Variant(cases) => {
                let index = self.uvarint()? as usize;
                let (name, case_ty) = cases
                    .get(index)
                    .ok_or_else(|| CodecError::UnknownVariantCase {
                        case: format!("index {index}"),
                    })?;
                let payload = self.decode(case_ty)?;
                Ok(Value::variant(name.clone(), payload))
            }
            TypeDescriptor::Ref(inner_ty) => {
                if let Some(v) = self.backref_tag()? {
                    return Ok(v);
                }
                let inner = self.decode(inner_ty)?;
                let value = Value::reference(inner);
                self.remember(value.clone());
                Ok(value)
            }
            TypeDescriptor::Vector(kind) => {
                let len = self.uvarint()? as usize;
                let buf = self.read_scalar_buffer(*kind, len)?;
                Ok(Value::Vector(Rc::new(std::cell::RefCell::new(buf))))
            }
            TypeDescriptor::Matrix(kind) => {
                let rows = self.uvarint()? as usize;
                let cols = self.uvarint()? as usize;
                let buf = self.read_scalar_buffer(*kind, rows * cols)?;
                Ok(Value::Matrix(Rc::new(std::cell::RefCell::new(MatrixBuffer {
                    rows,
                    cols,
                    data: buf,
                }))))
            }
            TypeDescriptor::Function(_, _) | TypeDescriptor::AsyncFunction(_, _) => self.decode_function(),
            TypeDescriptor::Recursive(_) | TypeDescriptor::RecursiveSelf(_) => {
                unreachable!("Recursive/RecursiveSelf is unwrapped above before this match")
            }
        }
    }

    fn decode_backref_seq(
        &mut self,
        mut decode_elem: impl FnMut(&mut Self) -> Result<Value, CodecError>,
        build: impl Fn(Vec<Value>) -> Value,
    ) -> Result<Value, CodecError> {
        if let Some(v) = self.backref_tag()? {
            return Ok(v);
        }
        let count = self.uvarint()? as usize;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(decode_elem(self)?);
        }
        let value = build(items);
        self.remember(value.clone());
        Ok(value)
    }

    fn read_scalar_buffer(&mut self, kind: ScalarKind, len: usize) -> Result<ScalarBuffer, CodecError> {
        match kind {
            ScalarKind::Float => {
                let mut out = Vec::with_capacity(len);
                for _ in 0..len {
                    let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
                    out.push(f64::from_le_bytes(bytes));
                }
                Ok(ScalarBuffer::Float(out))
            }
            ScalarKind::Integer => {
                let mut out = Vec::with_capacity(len);
                for _ in 0..len {
                    let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
                    out.push(i64::from_le_bytes(bytes));
                }
                Ok(ScalarBuffer::Integer(out))
            }
            ScalarKind::Boolean => {
                let mut out = Vec::with_capacity(len);
                for _ in 0..len {
                    out.push(self.take(1)?[0] != 0);
                }
                Ok(ScalarBuffer::Boolean(out))
            }
        }
    }

    fn decode_function(&mut self) -> Result<Value, CodecError> {
        let ir_len = self.uvarint()? as usize;
        let ir_bytes = self.take(ir_len)?;
        let (ir_value, _) = decode_self_describing(ir_bytes)?;
        let original = meta::value_to_ir_node(&ir_value)?;

        let capture_count = self.uvarint()? as usize;
        let frame = Frame::root();
        let mut captures = Vec::with_capacity(capture_count);
        for _ in 0..capture_count {
            let name_len = self.uvarint()? as usize;
            let name = std::str::from_utf8(self.take(name_len)?)
                .map_err(|_| CodecError::InvalidUtf8)?
                .to_string();
            let value_len = self.uvarint()? as usize;
            let value_bytes = self.take(value_len)?;
            let (value, _) = decode_self_describing(value_bytes)?;
            frame.bind(name.clone(), value);
            captures.push(crate::ir::CaptureSpec { name, mutable: false });
        }

        let (params, body, is_async) = match &original.kind {
            crate::ir::IrKind::Function { params, body, .. } => (params.clone(), Rc::clone(body), false),
            crate::ir::IrKind::AsyncFunction { params, body, .. } => (params.clone(), Rc::clone(body), true),
            other => {
                return Err(CodecError::TypeMismatch {
                    expected: "Function or AsyncFunction IR node".into(),
                    found: other.name().into(),
                });
            }
        };
        let builtins = registry::current_builtins().unwrap_or_default();
        let platform = registry::current_platform().unwrap_or_default();
        Ok(Value::Function(CompiledClosure::new(
            params, captures, body, frame, original, is_async, builtins, platform,
        )))
    }
}

fn write_scalar_buffer(kind: ScalarKind, buf: &ScalarBuffer, out: &mut Vec<u8>) -> Result<(), CodecError> {
    match (kind, buf) {
        (ScalarKind::Float, ScalarBuffer::Float(v)) => {
            for x in v {
                out.extend_from_slice(&x.to_le_bytes());
            }
            Ok(())
        }
        (ScalarKind::Integer, ScalarBuffer::Integer(v)) => {
            for x in v {
                out.extend_from_slice(&x.to_le_bytes());
            }
            Ok(())
        }
        (ScalarKind::Boolean, ScalarBuffer::Boolean(v)) => {
            for x in v {
                out.push(if *x { 1 } else { 0 });
            }
            Ok(())
        }
        _ => Err(CodecError::TypeMismatch {
            expected: format!("{} scalar buffer", kind.name()),
            found: "mismatched scalar buffer kind".into(),
        }),
    }
}

fn case_index(cases: &[NamedField], name: &str) -> Result<usize, CodecError> {
    cases
        .iter()
        .position(|(n, _)| n == name)
        .ok_or_else(|| CodecError::UnknownVariantCase { case: name.into() })
}

fn type_mismatch(expected: &str, found: &Value) -> CodecError {
    CodecError::TypeMismatch {
        expected: expected.into(),
        found: found.kind_name().into(),
    }
}

/// Tag-prefixed value encoding used only for a closure's retained IR tree
/// and its captured values, where no single declared type drives traversal.
/// Every `Value` kind (except `Function`, not needed for the values a
/// closure actually captures) carries its own tag byte.
struct SelfDescribing {
    out: Vec<u8>,
    seen: HashMap<usize, usize>,
}

const SD_NULL: u8 = 0;
const SD_BOOLEAN: u8 = 1;
const SD_INTEGER: u8 = 2;
const SD_FLOAT: u8 = 3;
const SD_STRING: u8 = 4;
const SD_DATETIME: u8 = 5;
const SD_BLOB: u8 = 6;
const SD_ARRAY: u8 = 7;
const SD_SET: u8 = 8;
const SD_DICT: u8 = 9;
const SD_STRUCT: u8 = 10;
const SD_VARIANT: u8 = 11;
const SD_REF: u8 = 12;
const SD_VECTOR: u8 = 13;
const SD_MATRIX: u8 = 14;
const SD_FUNCTION: u8 = 15;

impl SelfDescribing {
    fn new() -> Self {
        Self {
            out: Vec::new(),
            seen: HashMap::new(),
        }
    }

    fn backref_tag(&mut self, ptr: usize) -> bool {
        let start = self.out.len();
        match self.seen.get(&ptr) {
            Some(&first_start) => {
                write_uvarint((start - first_start) as u64, &mut self.out);
                false
            }
            None => {
                write_uvarint(0, &mut self.out);
                self.seen.insert(ptr, start);
                true
            }
        }
    }

    fn encode(&mut self, value: &Value) -> Result<(), CodecError> {
        match value {
            Value::Null => self.out.push(SD_NULL),
            Value::Boolean(b) => {
                self.out.push(SD_BOOLEAN);
                self.out.push(if *b { 1 } else { 0 });
            }
            Value::Integer(n) => {
                self.out.push(SD_INTEGER);
                write_zigzag(*n, &mut self.out);
            }
            Value::Float(x) => {
                self.out.push(SD_FLOAT);
                self.out.extend_from_slice(&x.to_le_bytes());
            }
            Value::String(s) => {
                self.out.push(SD_STRING);
                write_uvarint(s.len() as u64, &mut self.out);
                self.out.extend_from_slice(s.as_bytes());
            }
            Value::DateTime(t) => {
                self.out.push(SD_DATETIME);
                write_zigzag(*t, &mut self.out);
            }
            Value::Blob(b) => {
                self.out.push(SD_BLOB);
                write_uvarint(b.len() as u64, &mut self.out);
                self.out.extend_from_slice(b);
            }
            Value::Array(items) => {
                self.out.push(SD_ARRAY);
                let ptr = Rc::as_ptr(items) as usize;
                if self.backref_tag(ptr) {
                    let items = items.borrow();
                    write_uvarint(items.len() as u64, &mut self.out);
                    for item in items.iter() {
                        self.encode(item)?;
                    }
                }
            }
            Value::Set(items) => {
                self.out.push(SD_SET);
                let ptr = Rc::as_ptr(items) as usize;
                if self.backref_tag(ptr) {
                    let items = items.borrow();
                    write_uvarint(items.len() as u64, &mut self.out);
                    for item in items.iter() {
                        self.encode(item)?;
                    }
                }
            }
            Value::Dict(pairs) => {
                self.out.push(SD_DICT);
                let ptr = Rc::as_ptr(pairs) as usize;
                if self.backref_tag(ptr) {
                    let pairs = pairs.borrow();
                    write_uvarint(pairs.len() as u64, &mut self.out);
                    for (k, v) in pairs.iter() {
                        self.encode(k)?;
                        self.encode(v)?;
                    }
                }
            }
            Value::Struct(fields) => {
                self.out.push(SD_STRUCT);
                write_uvarint(fields.len() as u64, &mut self.out);
                for f in fields.iter() {
                    self.encode(f)?;
                }
            }
            Value::Variant(vv) => {
                self.out.push(SD_VARIANT);
                write_uvarint(vv.case.len() as u64, &mut self.out);
                self.out.extend_from_slice(vv.case.as_bytes());
                self.encode(&vv.payload)?;
            }
            Value::Ref(cell) => {
                self.out.push(SD_REF);
                let ptr = Rc::as_ptr(cell) as usize;
                if self.backref_tag(ptr) {
                    self.encode(&cell.borrow())?;
                }
            }
            Value::Vector(buf) => {
                self.out.push(SD_VECTOR);
                let buf = buf.borrow();
                self.out.push(scalar_kind_tag(&buf));
                write_uvarint(buf.len() as u64, &mut self.out);
                write_scalar_buffer(scalar_kind_of(&buf), &buf, &mut self.out)?;
            }
            Value::Matrix(buf) => {
                self.out.push(SD_MATRIX);
                let buf = buf.borrow();
                self.out.push(scalar_kind_tag(&buf.data));
                write_uvarint(buf.rows as u64, &mut self.out);
                write_uvarint(buf.cols as u64, &mut self.out);
                write_scalar_buffer(scalar_kind_of(&buf.data), &buf.data, &mut self.out)?;
            }
            Value::Function(closure) => {
                self.out.push(SD_FUNCTION);
                self.encode_function(closure)?;
            }
        }
        Ok(())
    }

    fn encode_function(&mut self, closure: &Rc<CompiledClosure>) -> Result<(), CodecError> {
        let ir_value = meta::ir_node_to_value(&closure.original);
        let ir_bytes = encode_self_describing(&ir_value)?;
        write_uvarint(ir_bytes.len() as u64, &mut self.out);
        self.out.extend_from_slice(&ir_bytes);

        let captured: Vec<(String, Value)> = closure
            .captures
            .iter()
            .map(|c| {
                let value = closure
                    .capture_frame
                    .lookup(&c.name)
                    .unwrap_or(Value::Null);
                (c.name.clone(), value)
            })
            .collect();
        write_uvarint(captured.len() as u64, &mut self.out);
        for (name, value) in &captured {
            write_uvarint(name.len() as u64, &mut self.out);
            self.out.extend_from_slice(name.as_bytes());
            let value_bytes = encode_self_describing(value)?;
            write_uvarint(value_bytes.len() as u64, &mut self.out);
            self.out.extend_from_slice(&value_bytes);
        }
        Ok(())
    }
}

fn scalar_kind_of(buf: &ScalarBuffer) -> ScalarKind {
    match buf {
        ScalarBuffer::Float(_) => ScalarKind::Float,
        ScalarBuffer::Integer(_) => ScalarKind::Integer,
        ScalarBuffer::Boolean(_) => ScalarKind::Boolean,
    }
}

fn scalar_kind_tag(buf: &ScalarBuffer) -> u8 {
    match buf {
        ScalarBuffer::Float(_) => 0,
        ScalarBuffer::Integer(_) => 1,
        ScalarBuffer::Boolean(_) => 2,
    }
}

fn scalar_kind_from_tag(tag: u8) -> Result<ScalarKind, CodecError> {
    match tag {
        0 => Ok(ScalarKind::Float),
        1 => Ok(ScalarKind::Integer),
        2 => Ok(ScalarKind::Boolean),
        _ => Err(CodecError::TypeMismatch {
            expected: "scalar kind tag".into(),
            found: format!("tag {tag}"),
        }),
    }
}

struct SelfDescribingDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    seen: HashMap<usize, Value>,
}

impl<'a> SelfDescribingDecoder<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            seen: HashMap::new(),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.bytes.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn uvarint(&mut self) -> Result<u64, CodecError> {
        let (v, used) = read_uvarint(&self.bytes[self.pos..])?;
        self.pos += used;
        Ok(v)
    }

    fn zigzag(&mut self) -> Result<i64, CodecError> {
        let (v, used) = read_zigzag(&self.bytes[self.pos..])?;
        self.pos += used;
        Ok(v)
    }

    fn backref_start(&mut self) -> Result<Result<usize, Value>, CodecError> {
        let start = self.pos;
        let distance = self.uvarint()?;
        if distance == 0 {
            Ok(Ok(start))
        } else {
            let target = start
                .checked_sub(distance as usize)
                .ok_or_else(|| CodecError::UnresolvableBackref {
                    distance_or_path: distance.to_string(),
                })?;
            self.seen
                .get(&target)
                .cloned()
                .map(Err)
                .ok_or_else(|| CodecError::UnresolvableBackref {
                    distance_or_path: distance.to_string(),
                })
        }
    }

    fn decode(&mut self) -> Result<Value, CodecError> {
        let tag = self.take(1)?[0];
        match tag {
            SD_NULL => Ok(Value::Null),
            SD_BOOLEAN => Ok(Value::Boolean(self.take(1)?[0] != 0)),
            SD_INTEGER => Ok(Value::Integer(self.zigzag()?)),
            SD_FLOAT => {
                let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
                Ok(Value::Float(f64::from_le_bytes(bytes)))
            }
            SD_STRING => {
                let len = self.uvarint()? as usize;
                let s = std::str::from_utf8(self.take(len)?).map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Value::string(s))
            }
            SD_DATETIME => Ok(Value::DateTime(self.zigzag()?)),
            SD_BLOB => {
                let len = self.uvarint()? as usize;
                Ok(Value::blob(self.take(len)?.to_vec()))
            }
            SD_ARRAY => match self.backref_start()? {
                Err(v) => Ok(v),
                Ok(start) => {
                    let count = self.uvarint()? as usize;
                    let mut items = Vec::with_capacity(count);
                    for _ in 0..count {
                        items.push(self.decode()?);
                    }
                    let value = Value::array(items);
                    self.seen.insert(start, value.clone());
                    Ok(value)
                }
            },
            SD_SET => match self.backref_start()? {
                Err(v) => Ok(v),
                Ok(start) => {
                    let count = self.uvarint()? as usize;
                    let mut items = Vec::with_capacity(count);
                    for _ in 0..count {
                        items.push(self.decode()?);
                    }
                    let value = Value::set(items);
                    self.seen.insert(start, value.clone());
                    Ok(value)
                }
            },
            SD_DICT => match self.backref_start()? {
                Err(v) => Ok(v),
                Ok(start) => {
                    let count = self.uvarint()? as usize;
                    let mut pairs = Vec::with_capacity(count);
                    for _ in 0..count {
                        let k = self.decode()?;
                        let v = self.decode()?;
                        pairs.push((k, v));
                    }
                    let value = Value::dict(pairs);
                    self.seen.insert(start, value.clone());
                    Ok(value)
                }
            },
            SD_STRUCT => {
                let count = self.uvarint()? as usize;
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    fields.push(self.decode()?);
                }
                Ok(Value::struct_of(fields))
            }
            SD_VARIANT => {
                let len = self.uvarint()? as usize;
                let case = std::str::from_utf8(self.take(len)?)
                    .map_err(|_| CodecError::InvalidUtf8)?
                    .to_string();
                let payload = self.decode()?;
                Ok(Value::variant(case, payload))
            }
            SD_REF => match self.backref_start()? {
                Err(v) => Ok(v),
                Ok(start) => {
                    let inner = self.decode()?;
                    let value = Value::reference(inner);
                    self.seen.insert(start, value.clone());
                    Ok(value)
                }
            },
            SD_VECTOR => {
                let kind = scalar_kind_from_tag(self.take(1)?[0])?;
                let len = self.uvarint()? as usize;
                let buf = self.read_scalar_buffer(kind, len)?;
                Ok(Value::Vector(Rc::new(std::cell::RefCell::new(buf))))
            }
            SD_MATRIX => {
                let kind = scalar_kind_from_tag(self.take(1)?[0])?;
                let rows = self.uvarint()? as usize;
                let cols = self.uvarint()? as usize;
                let buf = self.read_scalar_buffer(kind, rows * cols)?;
                Ok(Value::Matrix(Rc::new(std::cell::RefCell::new(MatrixBuffer {
                    rows,
                    cols,
                    data: buf,
                }))))
            }
            SD_FUNCTION => self.decode_function(),
            other => Err(CodecError::UnknownVariantCase {
                case: format!("self-describing tag {other}"),
            }),
        }
    }

    fn read_scalar_buffer(&mut self, kind: ScalarKind, len: usize) -> Result<ScalarBuffer, CodecError> {
        match kind {
            ScalarKind::Float => {
                let mut out = Vec::with_capacity(len);
                for _ in 0..len {
                    let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
                    out.push(f64::from_le_bytes(bytes));
                }
                Ok(ScalarBuffer::Float(out))
            }
            ScalarKind::Integer => {
                let mut out = Vec::with_capacity(len);
                for _ in 0..len {
                    let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
                    out.push(i64::from_le_bytes(bytes));
                }
                Ok(ScalarBuffer::Integer(out))
            }
            ScalarKind::Boolean => {
                let mut out = Vec::with_capacity(len);
                for _ in 0..len {
                    out.push(self.take(1)?[0] != 0);
                }
                Ok(ScalarBuffer::Boolean(out))
            }
        }
    }

    fn decode_function(&mut self) -> Result<Value, CodecError> {
        let ir_len = self.uvarint()? as usize;
        let ir_bytes = self.take(ir_len)?;
        let (ir_value, _) = decode_self_describing(ir_bytes)?;
        let original = meta::value_to_ir_node(&ir_value)?;

        let capture_count = self.uvarint()? as usize;
        let frame = Frame::root();
        let mut captures = Vec::with_capacity(capture_count);
        for _ in 0..capture_count {
            let name_len = self.uvarint()? as usize;
            let name = std::str::from_utf8(self.take(name_len)?)
                .map_err(|_| CodecError::InvalidUtf8)?
                .to_string();
            let value_len = self.uvarint()? as usize;
            let value_bytes = self.take(value_len)?;
            let (value, _) = decode_self_describing(value_bytes)?;
            frame.bind(name.clone(), value);
            captures.push(crate::ir::CaptureSpec { name, mutable: false });
        }

        let (params, body, is_async) = match &original.kind {
            crate::ir::IrKind::Function { params, body, .. } => (params.clone(), Rc::clone(body), false),
            crate::ir::IrKind::AsyncFunction { params, body, .. } => (params.clone(), Rc::clone(body), true),
            other => {
                return Err(CodecError::TypeMismatch {
                    expected: "Function or AsyncFunction IR node".into(),
                    found: other.name().into(),
                });
            }
        };
        let builtins = registry::current_builtins().unwrap_or_default();
        let platform = registry::current_platform().unwrap_or_default();
        Ok(Value::Function(CompiledClosure::new(
            params, captures, body, frame, original, is_async, builtins, platform,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_negative_one_is_one_byte() {
        let bytes = encode(&Value::Integer(-1), &TypeDescriptor::Integer).unwrap();
        assert_eq!(bytes, vec![0x01]);
        let (v, used) = decode(&bytes, &TypeDescriptor::Integer).unwrap();
        assert_eq!(v, Value::Integer(-1));
        assert_eq!(used, 1);
    }

    #[test]
    fn s2_hi_string_bytes() {
        let bytes = encode(&Value::string("hi"), &TypeDescriptor::String).unwrap();
        assert_eq!(bytes, vec![0x02, b'h', b'i']);
    }

    #[test]
    fn array_round_trips() {
        let ty = TypeDescriptor::array(TypeDescriptor::Integer);
        let v = Value::array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        let bytes = encode(&v, &ty).unwrap();
        let (back, _) = decode(&bytes, &ty).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn s5_ref_sharing_round_trips_through_backreferences() {
        let r = Value::reference(Value::Integer(0));
        let array = Value::array(vec![r.clone(), r]);
        let ty = TypeDescriptor::array(TypeDescriptor::reference(TypeDescriptor::Integer));
        let bytes = encode(&array, &ty).unwrap();
        let (decoded, _) = decode(&bytes, &ty).unwrap();
        if let Value::Array(items) = &decoded {
            let items = items.borrow();
            if let (Value::Ref(a), Value::Ref(b)) = (&items[0], &items[1]) {
                *a.borrow_mut() = Value::Integer(1);
                assert_eq!(*b.borrow(), Value::Integer(1));
            } else {
                panic!("expected refs");
            }
        } else {
            panic!("expected array");
        }
    }

    #[test]
    fn struct_round_trips_in_field_order() {
        let ty = TypeDescriptor::struct_of(vec![
            ("a".into(), TypeDescriptor::Integer),
            ("b".into(), TypeDescriptor::String),
        ]);
        let v = Value::struct_of(vec![Value::Integer(1), Value::string("x")]);
        let bytes = encode(&v, &ty).unwrap();
        let (back, _) = decode(&bytes, &ty).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn s4_variant_case_index_round_trips() {
        let ty = TypeDescriptor::variant_of(vec![("None".into(), TypeDescriptor::Null), ("Some".into(), TypeDescriptor::Integer)]);
        let v = Value::variant("Some", Value::Integer(5));
        let bytes = encode(&v, &ty).unwrap();
        assert_eq!(bytes[0], 1);
        let (back, _) = decode(&bytes, &ty).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn vector_round_trips() {
        let ty = TypeDescriptor::Vector(ScalarKind::Float);
        let v = Value::Vector(Rc::new(std::cell::RefCell::new(ScalarBuffer::Float(vec![1.5, 2.5]))));
        let bytes = encode(&v, &ty).unwrap();
        let (back, _) = decode(&bytes, &ty).unwrap();
        assert_eq!(back, v);
    }
}
