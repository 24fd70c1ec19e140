//! The framed codec: a self-describing envelope around a Compact-encoded
//! value, plus a legacy wire format carried over for documents written by
//! older tooling.
//!
//! A modern frame starts with an 8-byte magic, then a length-prefixed
//! self-describing encoding of the value's own `TypeDescriptor` (so the
//! reader does not need to already know the shape of what it is about to
//! read), then the value itself, Compact-encoded against that descriptor.
//!
//! A legacy frame starts with a different 8-byte magic and a completely
//! different body: one-byte kind tags, sort-preserving twiddled big-endian
//! numeric encodings, and `(0x01 elem)* 0x00` continuation runs instead of
//! varint-prefixed counts. Nothing reads or writes legacy frames except this
//! module; everything else in the runtime only ever sees `Value`/
//! `TypeDescriptor` pairs.

use crate::codec::compact;
use crate::error::CodecError;
use crate::meta;
use crate::types::TypeDescriptor;
use crate::value::{ScalarBuffer, Value};
use vellum_core::varint::{read_uvarint, write_uvarint};

pub const MODERN_MAGIC: [u8; 8] = [0x89, 0x45, 0x61, 0x73, 0x74, 0x0D, 0x0A, 0x01];
pub const LEGACY_MAGIC: [u8; 8] = [0x45, 0x61, 0x73, 0x74, 0x00, 0xEA, 0x57, 0xFF];

/// Encode `value` (of type `ty`) as a modern frame.
pub fn encode(value: &Value, ty: &TypeDescriptor) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    out.extend_from_slice(&MODERN_MAGIC);
    let descriptor_value = meta::type_to_value(ty);
    let descriptor_bytes = compact::encode_self_describing(&descriptor_value)?;
    write_uvarint(descriptor_bytes.len() as u64, &mut out);
    out.extend_from_slice(&descriptor_bytes);
    out.extend_from_slice(&compact::encode(value, ty)?);
    Ok(out)
}

/// Decode a frame, recognizing either magic. Returns the value and its
/// descriptor, since a modern frame carries its own descriptor and the
/// caller may not have one on hand.
pub fn decode(bytes: &[u8]) -> Result<(Value, TypeDescriptor), CodecError> {
    if bytes.len() < 8 {
        return Err(CodecError::UnexpectedEof);
    }
    let magic: [u8; 8] = bytes[0..8].try_into().unwrap();
    if magic == MODERN_MAGIC {
        decode_modern(&bytes[8..])
    } else if magic == LEGACY_MAGIC {
        decode_legacy(&bytes[8..])
    } else {
        Err(CodecError::BadMagic)
    }
}

fn decode_modern(rest: &[u8]) -> Result<(Value, TypeDescriptor), CodecError> {
    let (descriptor_len, used) = read_uvarint(rest)?;
    let descriptor_len = descriptor_len as usize;
    let rest = &rest[used..];
    if rest.len() < descriptor_len {
        return Err(CodecError::UnexpectedEof);
    }
    let (descriptor_value, consumed) = compact::decode_self_describing(&rest[..descriptor_len])?;
    if consumed != descriptor_len {
        return Err(CodecError::UnexpectedEof);
    }
    let ty = meta::value_to_type(&descriptor_value)?;
    let (value, _) = compact::decode(&rest[descriptor_len..], &ty)?;
    Ok((value, ty))
}

// Legacy schema tags. 7 and 12 are reserved by the format that produced
// these documents; decoding either is an unknown-case error rather than a
// panic, since a reserved tag might still appear in the wild.
const LEGACY_NULL: u8 = 0;
const LEGACY_BOOLEAN: u8 = 1;
const LEGACY_INTEGER: u8 = 2;
const LEGACY_FLOAT: u8 = 3;
const LEGACY_STRING: u8 = 4;
const LEGACY_BLOB: u8 = 5;
const LEGACY_ARRAY: u8 = 6;
const LEGACY_DICT: u8 = 8;
const LEGACY_STRUCT: u8 = 9;
const LEGACY_VARIANT: u8 = 10;
const LEGACY_SET: u8 = 11;
const LEGACY_DATETIME: u8 = 13;

fn decode_legacy(rest: &[u8]) -> Result<(Value, TypeDescriptor), CodecError> {
    let mut dec = LegacyDecoder { bytes: rest, pos: 0 };
    let value = dec.decode_value()?;
    let ty = infer_legacy_type(&value);
    Ok((value, ty))
}

/// A legacy document carries no descriptor; its runtime type is whatever
/// shape the decoded value happens to have. Compound values are typed by
/// their first element, matching how the legacy format itself has no notion
/// of a heterogeneous container.
fn infer_legacy_type(value: &Value) -> TypeDescriptor {
    match value {
        Value::Null => TypeDescriptor::Null,
        Value::Boolean(_) => TypeDescriptor::Boolean,
        Value::Integer(_) => TypeDescriptor::Integer,
        Value::Float(_) => TypeDescriptor::Float,
        Value::String(_) => TypeDescriptor::String,
        Value::DateTime(_) => TypeDescriptor::DateTime,
        Value::Blob(_) => TypeDescriptor::Blob,
        Value::Array(items) => {
            let items = items.borrow();
            let elem = items.first().map(infer_legacy_type).unwrap_or(TypeDescriptor::Never);
            TypeDescriptor::array(elem)
        }
        Value::Set(items) => {
            let items = items.borrow();
            let elem = items.first().map(infer_legacy_type).unwrap_or(TypeDescriptor::Never);
            TypeDescriptor::set(elem)
        }
        Value::Dict(pairs) => {
            let pairs = pairs.borrow();
            let (k, v) = pairs
                .first()
                .map(|(k, v)| (infer_legacy_type(k), infer_legacy_type(v)))
                .unwrap_or((TypeDescriptor::Never, TypeDescriptor::Never));
            TypeDescriptor::dict(k, v)
        }
        Value::Struct(fields) => TypeDescriptor::struct_of(
            fields
                .iter()
                .enumerate()
                .map(|(i, f)| (format!("field{i}"), infer_legacy_type(f)))
                .collect(),
        ),
        Value::Variant(vv) => TypeDescriptor::variant_of(vec![(
            vv.case.to_string(),
            infer_legacy_type(&vv.payload),
        )]),
        Value::Ref(cell) => TypeDescriptor::reference(infer_legacy_type(&cell.borrow())),
        Value::Vector(buf) => TypeDescriptor::Vector(scalar_kind_of(&buf.borrow())),
        Value::Matrix(buf) => TypeDescriptor::Matrix(scalar_kind_of(&buf.borrow().data)),
        Value::Function(_) => TypeDescriptor::Never,
    }
}

fn scalar_kind_of(buf: &ScalarBuffer) -> crate::types::ScalarKind {
    match buf {
        ScalarBuffer::Float(_) => crate::types::ScalarKind::Float,
        ScalarBuffer::Integer(_) => crate::types::ScalarKind::Integer,
        ScalarBuffer::Boolean(_) => crate::types::ScalarKind::Boolean,
    }
}

struct LegacyDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> LegacyDecoder<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.bytes.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn be_u64_len(&mut self) -> Result<usize, CodecError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(u64::from_be_bytes(bytes) as usize)
    }

    /// Reads one `(0x01 elem)* 0x00` continuation run, decoding each
    /// element with `decode_elem`.
    fn continuation_run(
        &mut self,
        mut decode_elem: impl FnMut(&mut Self) -> Result<Value, CodecError>,
    ) -> Result<Vec<Value>, CodecError> {
        let mut items = Vec::new();
        loop {
            match self.byte()? {
                0x00 => return Ok(items),
                0x01 => items.push(decode_elem(self)?),
                other => {
                    return Err(CodecError::UnknownVariantCase {
                        case: format!("legacy continuation byte 0x{other:02x}"),
                    })
                }
            }
        }
    }

    fn decode_value(&mut self) -> Result<Value, CodecError> {
        let tag = self.byte()?;
        match tag {
            LEGACY_NULL => Ok(Value::Null),
            LEGACY_BOOLEAN => Ok(Value::Boolean(self.byte()? != 0)),
            LEGACY_INTEGER => {
                let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
                Ok(Value::Integer(untwiddle_i64(u64::from_be_bytes(bytes))))
            }
            LEGACY_FLOAT => {
                let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
                Ok(Value::Float(untwiddle_f64(u64::from_be_bytes(bytes))))
            }
            LEGACY_DATETIME => {
                let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
                Ok(Value::DateTime(untwiddle_i64(u64::from_be_bytes(bytes))))
            }
            LEGACY_STRING => {
                let len = self.be_u64_len()?;
                let s = std::str::from_utf8(self.take(len)?).map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Value::string(s))
            }
            LEGACY_BLOB => {
                let len = self.be_u64_len()?;
                Ok(Value::blob(self.take(len)?.to_vec()))
            }
            LEGACY_ARRAY => {
                let items = self.continuation_run(|d| d.decode_value())?;
                Ok(Value::array(items))
            }
            LEGACY_SET => {
                let items = self.continuation_run(|d| d.decode_value())?;
                Ok(Value::set(items))
            }
            LEGACY_DICT => {
                let items = self.continuation_run(|d| {
                    let k = d.decode_value()?;
                    let v = d.decode_value()?;
                    Ok(Value::struct_of(vec![k, v]))
                })?;
                let pairs = items
                    .into_iter()
                    .map(|kv| match kv {
                        Value::Struct(fields) => (fields[0].clone(), fields[1].clone()),
                        _ => unreachable!("continuation_run built a Struct pair"),
                    })
                    .collect();
                Ok(Value::dict(pairs))
            }
            LEGACY_STRUCT => {
                let fields = self.continuation_run(|d| d.decode_value())?;
                Ok(Value::struct_of(fields))
            }
            LEGACY_VARIANT => {
                let len = self.be_u64_len()?;
                let case = std::str::from_utf8(self.take(len)?)
                    .map_err(|_| CodecError::InvalidUtf8)?
                    .to_string();
                let payload = self.decode_value()?;
                Ok(Value::variant(case, payload))
            }
            other => Err(CodecError::UnknownVariantCase {
                case: format!("legacy tag {other}"),
            }),
        }
    }
}

/// Sort-preserving big-endian twiddle for signed integers: flip the sign
/// bit so two's-complement ordering matches unsigned big-endian byte
/// ordering.
fn twiddle_i64(n: i64) -> u64 {
    (n as u64) ^ (1u64 << 63)
}

fn untwiddle_i64(u: u64) -> i64 {
    (u ^ (1u64 << 63)) as i64
}

/// Sort-preserving big-endian twiddle for IEEE-754 floats: for non-negative
/// floats, flip the sign bit; for negative floats, flip every bit. This
/// makes unsigned big-endian comparison agree with float comparison
/// (excluding NaN).
fn twiddle_f64(x: f64) -> u64 {
    let bits = x.to_bits();
    if bits & (1u64 << 63) != 0 {
        !bits
    } else {
        bits | (1u64 << 63)
    }
}

fn untwiddle_f64(u: u64) -> f64 {
    let bits = if u & (1u64 << 63) != 0 { u & !(1u64 << 63) } else { !u };
    f64::from_bits(bits)
}

#[allow(dead_code)]
fn encode_legacy_value(value: &Value, out: &mut Vec<u8>) -> Result<(), CodecError> {
    match value {
        Value::Null => out.push(LEGACY_NULL),
        Value::Boolean(b) => {
            out.push(LEGACY_BOOLEAN);
            out.push(if *b { 1 } else { 0 });
        }
        Value::Integer(n) => {
            out.push(LEGACY_INTEGER);
            out.extend_from_slice(&twiddle_i64(*n).to_be_bytes());
        }
        Value::Float(x) => {
            out.push(LEGACY_FLOAT);
            out.extend_from_slice(&twiddle_f64(*x).to_be_bytes());
        }
        Value::DateTime(t) => {
            out.push(LEGACY_DATETIME);
            out.extend_from_slice(&twiddle_i64(*t).to_be_bytes());
        }
        Value::String(s) => {
            out.push(LEGACY_STRING);
            out.extend_from_slice(&(s.len() as u64).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Value::Blob(b) => {
            out.push(LEGACY_BLOB);
            out.extend_from_slice(&(b.len() as u64).to_be_bytes());
            out.extend_from_slice(b);
        }
        Value::Array(items) => {
            out.push(LEGACY_ARRAY);
            for item in items.borrow().iter() {
                out.push(0x01);
                encode_legacy_value(item, out)?;
            }
            out.push(0x00);
        }
        Value::Set(items) => {
            out.push(LEGACY_SET);
            for item in items.borrow().iter() {
                out.push(0x01);
                encode_legacy_value(item, out)?;
            }
            out.push(0x00);
        }
        Value::Dict(pairs) => {
            out.push(LEGACY_DICT);
            for (k, v) in pairs.borrow().iter() {
                out.push(0x01);
                encode_legacy_value(k, out)?;
                encode_legacy_value(v, out)?;
            }
            out.push(0x00);
        }
        Value::Struct(fields) => {
            out.push(LEGACY_STRUCT);
            for field in fields.iter() {
                out.push(0x01);
                encode_legacy_value(field, out)?;
            }
            out.push(0x00);
        }
        Value::Variant(vv) => {
            out.push(LEGACY_VARIANT);
            out.extend_from_slice(&(vv.case.len() as u64).to_be_bytes());
            out.extend_from_slice(vv.case.as_bytes());
            encode_legacy_value(&vv.payload, out)?;
        }
        Value::Ref(_) | Value::Vector(_) | Value::Matrix(_) | Value::Function(_) => {
            return Err(CodecError::TypeMismatch {
                expected: "a legacy-representable value".into(),
                found: value.kind_name().into(),
            });
        }
    }
    Ok(())
}

/// Encode `value` as a legacy-format frame, for interoperability tests
/// against documents written by older tooling. Not used by anything else
/// in the runtime; new documents are always written as modern frames.
pub fn encode_legacy(value: &Value) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    out.extend_from_slice(&LEGACY_MAGIC);
    encode_legacy_value(value, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modern_round_trip_preserves_value_and_type() {
        let ty = TypeDescriptor::array(TypeDescriptor::Integer);
        let value = Value::array(vec![Value::Integer(1), Value::Integer(2)]);
        let bytes = encode(&value, &ty).unwrap();
        assert_eq!(&bytes[0..8], &MODERN_MAGIC);
        let (decoded, decoded_ty) = decode(&bytes).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(decoded_ty, ty);
    }

    #[test]
    fn legacy_round_trip_through_continuation_runs() {
        let value = Value::array(vec![Value::Integer(-1), Value::string("hi")]);
        let bytes = encode_legacy(&value).unwrap();
        assert_eq!(&bytes[0..8], &LEGACY_MAGIC);
        let (decoded, _) = decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn unknown_magic_is_rejected() {
        let bytes = vec![0u8; 8];
        assert_eq!(decode(&bytes), Err(CodecError::BadMagic));
    }

    #[test]
    fn twiddled_integer_ordering_matches_numeric_ordering() {
        let mut values = [-5i64, 10, 0, -100, 99];
        let twiddled: Vec<u64> = values.iter().map(|&n| twiddle_i64(n)).collect();
        let mut sorted_by_twiddle: Vec<(u64, i64)> =
            twiddled.into_iter().zip(values.iter().copied()).collect();
        sorted_by_twiddle.sort();
        values.sort();
        let recovered: Vec<i64> = sorted_by_twiddle.into_iter().map(|(_, n)| n).collect();
        assert_eq!(recovered, values);
    }
}
