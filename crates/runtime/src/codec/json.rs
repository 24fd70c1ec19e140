//! The JSON codec: a type-directed traversal emitting/parsing standard JSON
//! text, with deviations where plain JSON can't carry a value losslessly.
//!
//! Sharing uses the same path-stack idea as the textual codec but rendered
//! as a JSON Pointer (RFC 6901) inside a `{"$ref": "..."}` object: `~` and
//! `/` in a path segment are escaped as `~0`/`~1`.

use crate::codec::datetime;
use crate::error::CodecError;
use crate::types::{ScalarKind, TypeDescriptor};
use crate::value::{MatrixBuffer, ScalarBuffer, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub fn to_json(value: &Value, ty: &TypeDescriptor) -> Result<String, CodecError> {
    let mut printer = Printer {
        seen: HashMap::new(),
        path: Vec::new(),
        out: String::new(),
    };
    printer.write(value, ty)?;
    Ok(printer.out)
}

pub fn from_json(text: &str, ty: &TypeDescriptor) -> Result<Value, CodecError> {
    let mut parser = Parser {
        chars: text.chars().collect(),
        pos: 0,
        path: Vec::new(),
        seen: HashMap::new(),
    };
    parser.skip_ws();
    let value = parser.read(ty)?;
    parser.skip_ws();
    if parser.pos != parser.chars.len() {
        return Err(parser.detailed("trailing characters after value", ty.kind_name()));
    }
    Ok(value)
}

struct Printer {
    seen: HashMap<usize, Vec<String>>,
    path: Vec<String>,
    out: String,
}

impl Printer {
    fn write(&mut self, value: &Value, ty: &TypeDescriptor) -> Result<(), CodecError> {
        if let TypeDescriptor::Recursive(_) | TypeDescriptor::RecursiveSelf(_) = ty {
            return self.write(value, &ty.unwrap_recursive());
        }
        match (ty, value) {
            (TypeDescriptor::Never, _) => Ok(()),
            (TypeDescriptor::Null, Value::Null) => {
                self.out.push_str("null");
                Ok(())
            }
            (TypeDescriptor::Boolean, Value::Boolean(b)) => {
                self.out.push_str(if *b { "true" } else { "false" });
                Ok(())
            }
            (TypeDescriptor::Integer, Value::Integer(n)) => {
                self.json_string(&n.to_string());
                Ok(())
            }
            (TypeDescriptor::Float, Value::Float(x)) => {
                if x.is_finite() {
                    self.out.push_str(&format_finite_float(*x));
                } else {
                    self.json_string(&special_float_name(*x));
                }
                Ok(())
            }
            (TypeDescriptor::String, Value::String(s)) => {
                self.json_string(s);
                Ok(())
            }
            (TypeDescriptor::DateTime, Value::DateTime(t)) => {
                self.json_string(&datetime::format_millis_with_offset(*t));
                Ok(())
            }
            (TypeDescriptor::Blob, Value::Blob(b)) => {
                let mut hex = String::from("0x");
                for byte in b.iter() {
                    hex.push_str(&format!("{byte:02x}"));
                }
                self.json_string(&hex);
                Ok(())
            }
            (TypeDescriptor::Array(elem), Value::Array(items)) => self.with_backref(
                Rc::as_ptr(items) as usize,
                |p| {
                    p.out.push('[');
                    let items = items.borrow();
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            p.out.push(',');
                        }
                        p.path.push(format!("[{i}]"));
                        p.write(item, elem)?;
                        p.path.pop();
                    }
                    p.out.push(']');
                    Ok(())
                },
            ),
            (TypeDescriptor::Set(elem), Value::Set(items)) => self.with_backref(
                Rc::as_ptr(items) as usize,
                |p| {
                    p.out.push('[');
                    let items = items.borrow();
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            p.out.push(',');
                        }
                        p.path.push(format!("[{i}]"));
                        p.write(item, elem)?;
                        p.path.pop();
                    }
                    p.out.push(']');
                    Ok(())
                },
            ),
            (TypeDescriptor::Dict(key_ty, val_ty), Value::Dict(pairs)) => self.with_backref(
                Rc::as_ptr(pairs) as usize,
                |p| {
                    p.out.push('[');
                    let pairs = pairs.borrow();
                    for (i, (k, v)) in pairs.iter().enumerate() {
                        if i > 0 {
                            p.out.push(',');
                        }
                        p.out.push_str("{\"key\":");
                        p.path.push(format!("[{i}]"));
                        p.path.push(".key".to_string());
                        p.write(k, key_ty)?;
                        p.path.pop();
                        p.out.push_str(",\"value\":");
                        p.path.push(".value".to_string());
                        p.write(v, val_ty)?;
                        p.path.pop();
                        p.path.pop();
                        p.out.push('}');
                    }
                    p.out.push(']');
                    Ok(())
                },
            ),
            (TypeDescriptor::Struct(field_tys), Value::Struct(fields)) => {
                self.out.push('{');
                for (i, ((name, field_ty), field_val)) in field_tys.iter().zip(fields.iter()).enumerate() {
                    if i > 0 {
                        self.out.push(',');
                    }
                    self.json_string(name);
                    self.out.push(':');
                    self.path.push(format!(".{name}"));
                    self.write(field_val, field_ty)?;
                    self.path.pop();
                }
                self.out.push('}');
                Ok(())
            }
            (TypeDescriptor::Variant(cases), Value::Variant(vv)) => {
                let index = cases
                    .iter()
                    .position(|(n, _)| n.as_str() == vv.case.as_ref())
                    .ok_or_else(|| CodecError::UnknownVariantCase {
                        case: vv.case.to_string(),
                    })?;
                self.out.push_str("{\"type\":");
                self.json_string(&vv.case);
                self.out.push_str(",\"value\":");
                self.path.push(format!(".{}", vv.case));
                self.write(&vv.payload, &cases[index].1)?;
                self.path.pop();
                self.out.push('}');
                Ok(())
            }
            (TypeDescriptor::Ref(inner_ty), Value::Ref(cell)) => self.with_backref(
                Rc::as_ptr(cell) as usize,
                |p| {
                    p.out.push('[');
                    p.path.push(".*".to_string());
                    p.write(&cell.borrow(), inner_ty)?;
                    p.path.pop();
                    p.out.push(']');
                    Ok(())
                },
            ),
            (TypeDescriptor::Vector(kind), Value::Vector(buf)) => {
                self.write_scalar_array(*kind, &buf.borrow());
                Ok(())
            }
            (TypeDescriptor::Matrix(kind), Value::Matrix(buf)) => {
                let buf = buf.borrow();
                self.out.push('[');
                for r in 0..buf.rows {
                    if r > 0 {
                        self.out.push(',');
                    }
                    let row = row_slice(*kind, &buf, r);
                    self.write_scalar_array(*kind, &row);
                }
                self.out.push(']');
                Ok(())
            }
            (TypeDescriptor::Function(_, _) | TypeDescriptor::AsyncFunction(_, _), Value::Function(_)) => {
                Err(CodecError::TypeMismatch {
                    expected: "a JSON-representable type".into(),
                    found: "Function".into(),
                })
            }
            _ => Err(CodecError::TypeMismatch {
                expected: ty.kind_name().into(),
                found: value.kind_name().into(),
            }),
        }
    }

    fn write_scalar_array(&mut self, kind: ScalarKind, buf: &ScalarBuffer) {
        self.out.push('[');
        match (kind, buf) {
            (ScalarKind::Float, ScalarBuffer::Float(v)) => {
                for (i, x) in v.iter().enumerate() {
                    if i > 0 {
                        self.out.push(',');
                    }
                    if x.is_finite() {
                        self.out.push_str(&format_finite_float(*x));
                    } else {
                        self.json_string(&special_float_name(*x));
                    }
                }
            }
            (ScalarKind::Integer, ScalarBuffer::Integer(v)) => {
                for (i, x) in v.iter().enumerate() {
                    if i > 0 {
                        self.out.push(',');
                    }
                    self.json_string(&x.to_string());
                }
            }
            (ScalarKind::Boolean, ScalarBuffer::Boolean(v)) => {
                for (i, x) in v.iter().enumerate() {
                    if i > 0 {
                        self.out.push(',');
                    }
                    self.out.push_str(if *x { "true" } else { "false" });
                }
            }
            _ => {}
        }
        self.out.push(']');
    }

    fn with_backref(
        &mut self,
        ptr: usize,
        body: impl FnOnce(&mut Self) -> Result<(), CodecError>,
    ) -> Result<(), CodecError> {
        if let Some(target) = self.seen.get(&ptr).cloned() {
            self.write_json_ref(&target);
            return Ok(());
        }
        self.seen.insert(ptr, self.path.clone());
        body(self)
    }

    fn write_json_ref(&mut self, target: &[String]) {
        self.out.push_str("{\"$ref\":\"#");
        for seg in target {
            self.out.push('/');
            self.out.push_str(&escape_pointer(seg));
        }
        self.out.push_str("\"}");
    }

    fn json_string(&mut self, s: &str) {
        self.out.push('"');
        for c in s.chars() {
            match c {
                '"' => self.out.push_str("\\\""),
                '\\' => self.out.push_str("\\\\"),
                '\n' => self.out.push_str("\\n"),
                '\r' => self.out.push_str("\\r"),
                '\t' => self.out.push_str("\\t"),
                c if (c as u32) < 0x20 => self.out.push_str(&format!("\\u{:04x}", c as u32)),
                other => self.out.push(other),
            }
        }
        self.out.push('"');
    }
}

fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn special_float_name(x: f64) -> String {
    if x.is_nan() {
        "NaN".to_string()
    } else if x == f64::INFINITY {
        "Infinity".to_string()
    } else {
        "-Infinity".to_string()
    }
}

fn format_finite_float(x: f64) -> String {
    if x == 0.0 && x.is_sign_negative() {
        return "-0.0".to_string();
    }
    let s = format!("{x}");
    if s.contains('.') || s.contains('e') || s.contains('E') {
        s
    } else {
        format!("{s}.0")
    }
}

fn row_slice(kind: ScalarKind, buf: &MatrixBuffer, row: usize) -> ScalarBuffer {
    let start = row * buf.cols;
    let end = start + buf.cols;
    match (&buf.data, kind) {
        (ScalarBuffer::Float(v), ScalarKind::Float) => ScalarBuffer::Float(v[start..end].to_vec()),
        (ScalarBuffer::Integer(v), ScalarKind::Integer) => ScalarBuffer::Integer(v[start..end].to_vec()),
        (ScalarBuffer::Boolean(v), ScalarKind::Boolean) => ScalarBuffer::Boolean(v[start..end].to_vec()),
        _ => unreachable!("matrix buffer kind tag always matches its data"),
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    path: Vec<String>,
    seen: HashMap<String, Value>,
}

impl Parser {
    fn detailed(&self, reason: &str, type_name: &str) -> CodecError {
        let (line, col) = self.line_col();
        CodecError::Detailed {
            reason: reason.into(),
            path: if self.path.is_empty() {
                None
            } else {
                Some(self.path.concat())
            },
            line,
            col,
            type_name: type_name.into(),
        }
    }

    fn line_col(&self) -> (u32, u32) {
        let mut line = 1u32;
        let mut col = 1u32;
        for &c in &self.chars[..self.pos] {
            if c == '\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
        }
        (line, col)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char, ty_name: &str) -> Result<(), CodecError> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.detailed(&format!("expected `{c}`"), ty_name))
        }
    }

    fn try_consume(&mut self, s: &str) -> bool {
        self.skip_ws();
        let chars: Vec<char> = s.chars().collect();
        if self.chars[self.pos..].starts_with(&chars[..]) {
            self.pos += chars.len();
            true
        } else {
            false
        }
    }

    fn read_json_string(&mut self, ty_name: &str) -> Result<String, CodecError> {
        self.skip_ws();
        self.expect('"', ty_name)?;
        let mut s = String::new();
        loop {
            match self.bump() {
                Some('"') => break,
                Some('\\') => match self.bump() {
                    Some('"') => s.push('"'),
                    Some('\\') => s.push('\\'),
                    Some('/') => s.push('/'),
                    Some('n') => s.push('\n'),
                    Some('r') => s.push('\r'),
                    Some('t') => s.push('\t'),
                    Some('u') => {
                        let hex: String = (0..4).filter_map(|_| self.bump()).collect();
                        let code = u32::from_str_radix(&hex, 16)
                            .map_err(|_| self.detailed("invalid unicode escape", ty_name))?;
                        s.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
                    }
                    _ => return Err(self.detailed("invalid escape sequence", ty_name)),
                },
                Some(c) => s.push(c),
                None => return Err(self.detailed("unterminated JSON string", ty_name)),
            }
        }
        Ok(s)
    }

    /// Peeks whether the next value is a `{"$ref": "..."}` object.
    fn peek_is_ref(&mut self) -> bool {
        self.skip_ws();
        let save = self.pos;
        let is_ref = self.try_consume("{") && self.try_consume("\"$ref\"");
        self.pos = save;
        is_ref
    }

    fn read_ref(&mut self, ty_name: &str) -> Result<Value, CodecError> {
        self.expect('{', ty_name)?;
        self.try_consume("\"$ref\"");
        self.expect(':', ty_name)?;
        let pointer = self.read_json_string(ty_name)?;
        self.skip_ws();
        self.expect('}', ty_name)?;
        let path = pointer.strip_prefix("#/").unwrap_or("");
        let segments: Vec<String> = if path.is_empty() {
            Vec::new()
        } else {
            path.split('/')
                .map(|s| unescape_pointer(s))
                .collect()
        };
        let key = segments.concat();
        self.seen
            .get(&key)
            .cloned()
            .ok_or_else(|| self.detailed("$ref target not yet decoded", ty_name))
    }

    fn read(&mut self, ty: &TypeDescriptor) -> Result<Value, CodecError> {
        if let TypeDescriptor::Recursive(_) | TypeDescriptor::RecursiveSelf(_) = ty {
            return self.read(&ty.unwrap_recursive());
        }
        self.skip_ws();
        match ty {
            TypeDescriptor::Never => Err(self.detailed("Never has no value", "Never")),
            TypeDescriptor::Null => {
                if self.try_consume("null") {
                    Ok(Value::Null)
                } else {
                    Err(self.detailed("expected `null`", "Null"))
                }
            }
            TypeDescriptor::Boolean => {
                if self.try_consume("true") {
                    Ok(Value::Boolean(true))
                } else if self.try_consume("false") {
                    Ok(Value::Boolean(false))
                } else {
                    Err(self.detailed("expected `true` or `false`", "Boolean"))
                }
            }
            TypeDescriptor::Integer => {
                let text = self.read_json_string("Integer")?;
                text.parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| self.detailed("expected an integer string", "Integer"))
            }
            TypeDescriptor::Float => {
                self.skip_ws();
                if self.peek() == Some('"') {
                    let text = self.read_json_string("Float")?;
                    match text.as_str() {
                        "NaN" => Ok(Value::Float(f64::NAN)),
                        "Infinity" => Ok(Value::Float(f64::INFINITY)),
                        "-Infinity" => Ok(Value::Float(f64::NEG_INFINITY)),
                        _ => Err(self.detailed("unrecognized special float string", "Float")),
                    }
                } else {
                    let text = self.read_while(|c| c.is_ascii_digit() || "+-.eE".contains(c));
                    text.parse::<f64>()
                        .map(Value::Float)
                        .map_err(|_| self.detailed("expected a JSON number", "Float"))
                }
            }
            TypeDescriptor::String => self.read_json_string("String").map(Value::string),
            TypeDescriptor::DateTime => {
                let text = self.read_json_string("DateTime")?;
                datetime::parse(&text)
                    .map(Value::DateTime)
                    .ok_or_else(|| self.detailed("expected an ISO-8601 datetime string", "DateTime"))
            }
            TypeDescriptor::Blob => {
                let text = self.read_json_string("Blob")?;
                let hex = text.strip_prefix("0x").ok_or_else(|| self.detailed("expected `0x` blob prefix", "Blob"))?;
                decode_hex(hex).map(Value::blob).ok_or_else(|| self.detailed("invalid hex in blob", "Blob"))
            }
            TypeDescriptor::Array(elem) => self.read_backref_or("Array", |p| {
                p.expect('[', "Array")?;
                let mut items = Vec::new();
                let mut i = 0;
                loop {
                    p.skip_ws();
                    if p.peek() == Some(']') {
                        break;
                    }
                    if i > 0 {
                        p.expect(',', "Array")?;
                    }
                    p.path.push(format!("[{i}]"));
                    items.push(p.read(elem)?);
                    p.path.pop();
                    i += 1;
                }
                p.bump();
                Ok(Value::array(items))
            }),
            TypeDescriptor::Set(elem) => self.read_backref_or("Set", |p| {
                p.expect('[', "Set")?;
                let mut items = Vec::new();
                let mut i = 0;
                loop {
                    p.skip_ws();
                    if p.peek() == Some(']') {
                        break;
                    }
                    if i > 0 {
                        p.expect(',', "Set")?;
                    }
                    p.path.push(format!("[{i}]"));
                    items.push(p.read(elem)?);
                    p.path.pop();
                    i += 1;
                }
                p.bump();
                Ok(Value::set(items))
            }),
            TypeDescriptor::Dict(key_ty, val_ty) => self.read_backref_or("Dict", |p| {
                p.expect('[', "Dict")?;
                let mut pairs = Vec::new();
                let mut i = 0;
                loop {
                    p.skip_ws();
                    if p.peek() == Some(']') {
                        break;
                    }
                    if i > 0 {
                        p.expect(',', "Dict")?;
                    }
                    p.expect('{', "Dict")?;
                    p.try_consume("\"key\"");
                    p.expect(':', "Dict")?;
                    p.path.push(format!("[{i}]"));
                    p.path.push(".key".to_string());
                    let k = p.read(key_ty)?;
                    p.path.pop();
                    p.expect(',', "Dict")?;
                    p.try_consume("\"value\"");
                    p.expect(':', "Dict")?;
                    p.path.push(".value".to_string());
                    let v = p.read(val_ty)?;
                    p.path.pop();
                    p.path.pop();
                    p.skip_ws();
                    p.expect('}', "Dict")?;
                    pairs.push((k, v));
                    i += 1;
                }
                p.bump();
                Ok(Value::dict(pairs))
            }),
            TypeDescriptor::Struct(field_tys) => {
                self.expect('{', "Struct")?;
                let mut fields = vec![Value::Null; field_tys.len()];
                let mut first = true;
                loop {
                    self.skip_ws();
                    if self.peek() == Some('}') {
                        break;
                    }
                    if !first {
                        self.expect(',', "Struct")?;
                    }
                    first = false;
                    let name = self.read_json_string("Struct")?;
                    self.expect(':', "Struct")?;
                    let index = field_tys
                        .iter()
                        .position(|(n, _)| n == &name)
                        .ok_or_else(|| self.detailed("unknown struct field", "Struct"))?;
                    self.path.push(format!(".{name}"));
                    fields[index] = self.read(&field_tys[index].1)?;
                    self.path.pop();
                }
                self.bump();
                Ok(Value::struct_of(fields))
            }
            TypeDescriptor::Variant(cases) => {
                if self.peek_is_ref() {
                    return self.read_ref("Variant");
                }
                self.expect('{', "Variant")?;
                self.try_consume("\"type\"");
                self.expect(':', "Variant")?;
                let name = self.read_json_string("Variant")?;
                let index = cases
                    .iter()
                    .position(|(n, _)| n == &name)
                    .ok_or_else(|| self.detailed("unknown variant case", "Variant"))?;
                self.expect(',', "Variant")?;
                self.try_consume("\"value\"");
                self.expect(':', "Variant")?;
                self.path.push(format!(".{name}"));
                let payload = self.read(&cases[index].1)?;
                self.path.pop();
                self.skip_ws();
                self.expect('}', "Variant")?;
                Ok(Value::variant(name, payload))
            }
            TypeDescriptor::Ref(inner_ty) => self.read_backref_or("Ref", |p| {
                p.expect('[', "Ref")?;
                p.path.push(".*".to_string());
                let inner = p.read(inner_ty)?;
                p.path.pop();
                p.skip_ws();
                p.expect(']', "Ref")?;
                Ok(Value::reference(inner))
            }),
            TypeDescriptor::Vector(kind) => {
                self.expect('[', "Vector")?;
                let items = self.read_scalar_list(*kind, "Vector")?;
                self.expect(']', "Vector")?;
                Ok(Value::Vector(Rc::new(RefCell::new(items))))
            }
            TypeDescriptor::Matrix(kind) => {
                self.expect('[', "Matrix")?;
                let mut rows: Vec<ScalarBuffer> = Vec::new();
                let mut i = 0;
                loop {
                    self.skip_ws();
                    if self.peek() == Some(']') {
                        break;
                    }
                    if i > 0 {
                        self.expect(',', "Matrix")?;
                    }
                    self.expect('[', "Matrix")?;
                    rows.push(self.read_scalar_list(*kind, "Matrix")?);
                    self.expect(']', "Matrix")?;
                    i += 1;
                }
                self.expect(']', "Matrix")?;
                let cols = rows.first().map(|r| r.len()).unwrap_or(0);
                let data = concat_scalar_rows(*kind, &rows);
                Ok(Value::Matrix(Rc::new(RefCell::new(MatrixBuffer {
                    rows: rows.len(),
                    cols,
                    data,
                }))))
            }
            TypeDescriptor::Function(_, _) | TypeDescriptor::AsyncFunction(_, _) => {
                Err(self.detailed("function values are not parseable from JSON", "Function"))
            }
            TypeDescriptor::Recursive(_) | TypeDescriptor::RecursiveSelf(_) => {
                unreachable!("Recursive/RecursiveSelf is unwrapped above before this match")
            }
        }
    }

    fn read_backref_or(
        &mut self,
        ty_name: &'static str,
        body: impl FnOnce(&mut Self) -> Result<Value, CodecError>,
    ) -> Result<Value, CodecError> {
        if self.peek_is_ref() {
            return self.read_ref(ty_name);
        }
        let key = self.path.concat();
        let value = body(self)?;
        self.seen.insert(key, value.clone());
        Ok(value)
    }

    fn read_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if pred(c)) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn read_scalar_list(&mut self, kind: ScalarKind, ty_name: &'static str) -> Result<ScalarBuffer, CodecError> {
        let mut floats = Vec::new();
        let mut ints = Vec::new();
        let mut bools = Vec::new();
        let mut i = 0;
        loop {
            self.skip_ws();
            if self.peek() == Some(']') {
                break;
            }
            if i > 0 {
                self.expect(',', ty_name)?;
            }
            match kind {
                ScalarKind::Float => match self.read(&TypeDescriptor::Float)? {
                    Value::Float(x) => floats.push(x),
                    _ => unreachable!(),
                },
                ScalarKind::Integer => match self.read(&TypeDescriptor::Integer)? {
                    Value::Integer(n) => ints.push(n),
                    _ => unreachable!(),
                },
                ScalarKind::Boolean => match self.read(&TypeDescriptor::Boolean)? {
                    Value::Boolean(b) => bools.push(b),
                    _ => unreachable!(),
                },
            }
            i += 1;
        }
        Ok(match kind {
            ScalarKind::Float => ScalarBuffer::Float(floats),
            ScalarKind::Integer => ScalarBuffer::Integer(ints),
            ScalarKind::Boolean => ScalarBuffer::Boolean(bools),
        })
    }
}

fn concat_scalar_rows(kind: ScalarKind, rows: &[ScalarBuffer]) -> ScalarBuffer {
    match kind {
        ScalarKind::Float => ScalarBuffer::Float(
            rows.iter()
                .flat_map(|r| match r {
                    ScalarBuffer::Float(v) => v.clone(),
                    _ => vec![],
                })
                .collect(),
        ),
        ScalarKind::Integer => ScalarBuffer::Integer(
            rows.iter()
                .flat_map(|r| match r {
                    ScalarBuffer::Integer(v) => v.clone(),
                    _ => vec![],
                })
                .collect(),
        ),
        ScalarKind::Boolean => ScalarBuffer::Boolean(
            rows.iter()
                .flat_map(|r| match r {
                    ScalarBuffer::Boolean(v) => v.clone(),
                    _ => vec![],
                })
                .collect(),
        ),
    }
}

fn unescape_pointer(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_encode_as_json_strings() {
        let printed = to_json(&Value::Integer(42), &TypeDescriptor::Integer).unwrap();
        assert_eq!(printed, "\"42\"");
        assert_eq!(from_json(&printed, &TypeDescriptor::Integer).unwrap(), Value::Integer(42));
    }

    #[test]
    fn special_floats_round_trip_as_strings() {
        let ty = TypeDescriptor::Float;
        for v in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let printed = to_json(&Value::Float(v), &ty).unwrap();
            assert!(printed.starts_with('"'));
            let decoded = from_json(&printed, &ty).unwrap();
            if let Value::Float(x) = decoded {
                if v.is_nan() {
                    assert!(x.is_nan());
                } else {
                    assert_eq!(x, v);
                }
            }
        }
    }

    #[test]
    fn dict_encodes_as_array_of_key_value_objects() {
        let ty = TypeDescriptor::dict(TypeDescriptor::String, TypeDescriptor::Integer);
        let value = Value::dict(vec![(Value::string("a"), Value::Integer(1))]);
        let printed = to_json(&value, &ty).unwrap();
        assert_eq!(printed, "[{\"key\":\"a\",\"value\":\"1\"}]");
        assert_eq!(from_json(&printed, &ty).unwrap(), value);
    }

    #[test]
    fn variant_encodes_as_tagged_object() {
        let ty = TypeDescriptor::variant_of(vec![("Some".into(), TypeDescriptor::Integer)]);
        let value = Value::variant("Some", Value::Integer(7));
        let printed = to_json(&value, &ty).unwrap();
        assert_eq!(printed, "{\"type\":\"Some\",\"value\":\"7\"}");
        assert_eq!(from_json(&printed, &ty).unwrap(), value);
    }

    #[test]
    fn ref_sharing_uses_json_pointer_backreferences() {
        let r = Value::reference(Value::Integer(0));
        let array = Value::array(vec![r.clone(), r]);
        let ty = TypeDescriptor::array(TypeDescriptor::reference(TypeDescriptor::Integer));
        let printed = to_json(&array, &ty).unwrap();
        assert!(printed.contains("$ref"));
        let decoded = from_json(&printed, &ty).unwrap();
        if let Value::Array(items) = &decoded {
            let items = items.borrow();
            if let (Value::Ref(a), Value::Ref(b)) = (&items[0], &items[1]) {
                *a.borrow_mut() = Value::Integer(5);
                assert_eq!(*b.borrow(), Value::Integer(5));
            } else {
                panic!("expected refs");
            }
        } else {
            panic!("expected array");
        }
    }
}
