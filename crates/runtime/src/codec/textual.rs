//! The textual codec: a human-readable syntax that round-trips through the
//! same type-directed traversal as the binary codecs.
//!
//! Sharing is preserved with a **path-stack** backreference scheme instead
//! of the binary codecs' byte-distance one: every compound value descends
//! through named path segments (`[i]` for a sequence slot, `.name` for a
//! struct field, `.CaseName` for a variant payload, `.key`/`.value` for a
//! dict pair's two sides, `.*` for a `Ref`'s single cell), and a backref
//! prints as `N#rel` — pop `N` segments off the *current* path to reach the
//! lowest common ancestor with the first occurrence, then descend `rel` to
//! reach it. Decoders keep a map from absolute path to already-decoded
//! value and resolve backrefs by walking it.

use crate::codec::datetime;
use crate::error::CodecError;
use crate::types::{NamedField, ScalarKind, TypeDescriptor};
use crate::value::{MatrixBuffer, ScalarBuffer, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub fn print(value: &Value, ty: &TypeDescriptor) -> Result<String, CodecError> {
    let mut printer = Printer {
        seen: HashMap::new(),
        path: Vec::new(),
        out: String::new(),
    };
    printer.write(value, ty)?;
    Ok(printer.out)
}

pub fn parse(text: &str, ty: &TypeDescriptor) -> Result<Value, CodecError> {
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
                self.out.push_str(&n.to_string());
                Ok(())
            }
            (TypeDescriptor::Float, Value::Float(x)) => {
                self.out.push_str(&format_float(*x));
                Ok(())
            }
            (TypeDescriptor::String, Value::String(s)) => {
                self.out.push('"');
                for c in s.chars() {
                    match c {
                        '\\' => self.out.push_str("\\\\"),
                        '"' => self.out.push_str("\\\""),
                        other => self.out.push(other),
                    }
                }
                self.out.push('"');
                Ok(())
            }
            (TypeDescriptor::DateTime, Value::DateTime(t)) => {
                self.out.push_str(&datetime::format_millis(*t));
                Ok(())
            }
            (TypeDescriptor::Blob, Value::Blob(b)) => {
                self.out.push_str("0x");
                for byte in b.iter() {
                    self.out.push_str(&format!("{byte:02x}"));
                }
                Ok(())
            }
            (TypeDescriptor::Array(elem), Value::Array(items)) => {
                self.with_backref(Rc::as_ptr(items) as usize, '[', ']', |p| {
                    let items = items.borrow();
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            p.out.push_str(", ");
                        }
                        p.path.push(format!("[{i}]"));
                        p.write(item, elem)?;
                        p.path.pop();
                    }
                    Ok(())
                })
            }
            (TypeDescriptor::Set(elem), Value::Set(items)) => {
                self.with_backref(Rc::as_ptr(items) as usize, '{', '}', |p| {
                    let items = items.borrow();
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            p.out.push(',');
                        }
                        p.path.push(format!("[{i}]"));
                        p.write(item, elem)?;
                        p.path.pop();
                    }
                    Ok(())
                })
            }
            (TypeDescriptor::Dict(key_ty, val_ty), Value::Dict(pairs)) => {
                let ptr = Rc::as_ptr(pairs) as usize;
                if let Some(target) = self.seen.get(&ptr).cloned() {
                    self.write_backref(&target);
                    return Ok(());
                }
                self.seen.insert(ptr, self.path.clone());
                let pairs = pairs.borrow();
                if pairs.is_empty() {
                    self.out.push_str("{:}");
                    return Ok(());
                }
                self.out.push('{');
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.path.push(format!("[{i}]"));
                    self.path.push(".key".to_string());
                    self.write(k, key_ty)?;
                    self.path.pop();
                    self.out.push(':');
                    self.path.push(".value".to_string());
                    self.write(v, val_ty)?;
                    self.path.pop();
                    self.path.pop();
                }
                self.out.push('}');
                Ok(())
            }
            (TypeDescriptor::Struct(field_tys), Value::Struct(fields)) => {
                self.out.push('(');
                for (i, ((name, field_ty), field_val)) in field_tys.iter().zip(fields.iter()).enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.out.push_str(&print_identifier(name));
                    self.out.push('=');
                    self.path.push(format!(".{name}"));
                    self.write(field_val, field_ty)?;
                    self.path.pop();
                }
                self.out.push(')');
                Ok(())
            }
            (TypeDescriptor::Variant(cases), Value::Variant(vv)) => {
                let index = case_index(cases, &vv.case)?;
                self.out.push('.');
                self.out.push_str(&vv.case);
                if !matches!(cases[index].1, TypeDescriptor::Null) {
                    self.out.push(' ');
                    self.path.push(format!(".{}", vv.case));
                    self.write(&vv.payload, &cases[index].1)?;
                    self.path.pop();
                }
                Ok(())
            }
            (TypeDescriptor::Ref(inner_ty), Value::Ref(cell)) => {
                let ptr = Rc::as_ptr(cell) as usize;
                if let Some(target) = self.seen.get(&ptr).cloned() {
                    self.write_backref(&target);
                    return Ok(());
                }
                self.seen.insert(ptr, self.path.clone());
                self.out.push('&');
                self.path.push(".*".to_string());
                self.write(&cell.borrow(), inner_ty)?;
                self.path.pop();
                Ok(())
            }
            (TypeDescriptor::Vector(kind), Value::Vector(buf)) => {
                self.out.push_str("vec[");
                write_scalar_list(*kind, &buf.borrow(), &mut self.out);
                self.out.push(']');
                Ok(())
            }
            (TypeDescriptor::Matrix(kind), Value::Matrix(buf)) => {
                let buf = buf.borrow();
                self.out.push_str("mat[");
                for r in 0..buf.rows {
                    if r > 0 {
                        self.out.push_str(", ");
                    }
                    self.out.push('[');
                    let row = row_slice(*kind, &buf, r);
                    write_scalar_list(*kind, &row, &mut self.out);
                    self.out.push(']');
                }
                self.out.push(']');
                Ok(())
            }
            (TypeDescriptor::Function(_, _) | TypeDescriptor::AsyncFunction(_, _), Value::Function(_)) => {
                self.out.push('\u{03BB}');
                Ok(())
            }
            _ => Err(CodecError::TypeMismatch {
                expected: ty.kind_name().into(),
                found: value.kind_name().into(),
            }),
        }
    }

    fn with_backref(
        &mut self,
        ptr: usize,
        open: char,
        close: char,
        body: impl FnOnce(&mut Self) -> Result<(), CodecError>,
    ) -> Result<(), CodecError> {
        if let Some(target) = self.seen.get(&ptr).cloned() {
            self.write_backref(&target);
            return Ok(());
        }
        self.seen.insert(ptr, self.path.clone());
        self.out.push(open);
        body(self)?;
        self.out.push(close);
        Ok(())
    }

    fn write_backref(&mut self, target: &[String]) {
        let common = common_prefix_len(&self.path, target);
        let pop = self.path.len() - common;
        let rel: String = target[common..].concat();
        self.out.push_str(&pop.to_string());
        self.out.push('#');
        self.out.push_str(&rel);
    }
}

fn common_prefix_len(a: &[String], b: &[String]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
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

fn write_scalar_list(kind: ScalarKind, buf: &ScalarBuffer, out: &mut String) {
    match (kind, buf) {
        (ScalarKind::Float, ScalarBuffer::Float(v)) => {
            for (i, x) in v.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&format_float(*x));
            }
        }
        (ScalarKind::Integer, ScalarBuffer::Integer(v)) => {
            for (i, x) in v.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&x.to_string());
            }
        }
        (ScalarKind::Boolean, ScalarBuffer::Boolean(v)) => {
            for (i, x) in v.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(if *x { "true" } else { "false" });
            }
        }
        _ => {}
    }
}

fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "NaN".to_string();
    }
    if x == f64::INFINITY {
        return "Infinity".to_string();
    }
    if x == f64::NEG_INFINITY {
        return "-Infinity".to_string();
    }
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

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn print_identifier(name: &str) -> String {
    if is_plain_identifier(name) {
        name.to_string()
    } else {
        format!("`{name}`")
    }
}

fn case_index(cases: &[NamedField], name: &str) -> Result<usize, CodecError> {
    cases
        .iter()
        .position(|(n, _)| n == name)
        .ok_or_else(|| CodecError::UnknownVariantCase { case: name.into() })
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

    fn read_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if pred(c)) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    /// Peeks whether the upcoming token is a backref (`digits '#'`) rather
    /// than the literal syntax for the container kind about to be parsed.
    fn peek_is_backref(&mut self) -> bool {
        self.skip_ws();
        let mut i = self.pos;
        if !matches!(self.chars.get(i), Some(c) if c.is_ascii_digit()) {
            return false;
        }
        while matches!(self.chars.get(i), Some(c) if c.is_ascii_digit()) {
            i += 1;
        }
        self.chars.get(i) == Some(&'#')
    }

    fn read_backref_target(&mut self, ty_name: &str) -> Result<Value, CodecError> {
        self.skip_ws();
        let digits = self.read_while(|c| c.is_ascii_digit());
        let pop: usize = digits.parse().map_err(|_| self.detailed("malformed backreference", ty_name))?;
        self.expect('#', ty_name)?;
        let rel = self.read_while(|c| c != ',' && c != ')' && c != ']' && c != '}' && !c.is_whitespace());
        let rel_segments = parse_path_segments(&rel);
        if pop > self.path.len() {
            return Err(self.detailed("backreference pops past the document root", ty_name));
        }
        let mut target = self.path[..self.path.len() - pop].to_vec();
        target.extend(rel_segments);
        let key = target.concat();
        self.seen
            .get(&key)
            .cloned()
            .ok_or_else(|| self.detailed("backreference target not yet decoded", ty_name))
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
                let text = self.read_while(|c| c.is_ascii_digit() || c == '-' || c == '+');
                text.parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| self.detailed("expected an integer", "Integer"))
            }
            TypeDescriptor::Float => {
                if self.try_consume("NaN") {
                    return Ok(Value::Float(f64::NAN));
                }
                if self.try_consume("-Infinity") {
                    return Ok(Value::Float(f64::NEG_INFINITY));
                }
                if self.try_consume("Infinity") {
                    return Ok(Value::Float(f64::INFINITY));
                }
                let text = self.read_while(|c| c.is_ascii_digit() || "+-.eE".contains(c));
                text.parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| self.detailed("expected a float", "Float"))
            }
            TypeDescriptor::String => {
                self.expect('"', "String")?;
                let mut s = String::new();
                loop {
                    match self.bump() {
                        Some('"') => break,
                        Some('\\') => match self.bump() {
                            Some('\\') => s.push('\\'),
                            Some('"') => s.push('"'),
                            _ => return Err(self.detailed("invalid escape sequence", "String")),
                        },
                        Some(c) => s.push(c),
                        None => return Err(self.detailed("unterminated string literal", "String")),
                    }
                }
                Ok(Value::string(s))
            }
            TypeDescriptor::DateTime => {
                let text = self.read_while(|c| c.is_ascii_digit() || "-T:.+Z".contains(c));
                datetime::parse(&text)
                    .map(Value::DateTime)
                    .ok_or_else(|| self.detailed("expected an ISO-8601 datetime", "DateTime"))
            }
            TypeDescriptor::Blob => {
                if !self.try_consume("0x") {
                    return Err(self.detailed("expected `0x` blob prefix", "Blob"));
                }
                let hex = self.read_while(|c| c.is_ascii_hexdigit());
                decode_hex(&hex).map(Value::blob).ok_or_else(|| self.detailed("invalid hex in blob", "Blob"))
            }
            TypeDescriptor::Array(elem) => self.read_backref_or(
                '[',
                ']',
                "Array",
                |p| {
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
                    Ok(Value::array(items))
                },
            ),
            TypeDescriptor::Set(elem) => self.read_backref_or(
                '{',
                '}',
                "Set",
                |p| {
                    let mut items = Vec::new();
                    let mut i = 0;
                    loop {
                        p.skip_ws();
                        if p.peek() == Some('}') {
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
                    Ok(Value::set(items))
                },
            ),
            TypeDescriptor::Dict(key_ty, val_ty) => {
                if self.peek_is_backref() {
                    return self.read_backref_target("Dict");
                }
                self.expect('{', "Dict")?;
                self.skip_ws();
                let path_start = self.path.clone();
                let key = path_start.concat();
                let mut pairs = Vec::new();
                if self.try_consume(":") {
                    self.expect('}', "Dict")?;
                } else {
                    let mut i = 0;
                    loop {
                        self.skip_ws();
                        if self.peek() == Some('}') {
                            break;
                        }
                        if i > 0 {
                            self.expect(',', "Dict")?;
                        }
                        self.path.push(format!("[{i}]"));
                        self.path.push(".key".to_string());
                        let k = self.read(key_ty)?;
                        self.path.pop();
                        self.expect(':', "Dict")?;
                        self.path.push(".value".to_string());
                        let v = self.read(val_ty)?;
                        self.path.pop();
                        self.path.pop();
                        pairs.push((k, v));
                        i += 1;
                    }
                    self.bump();
                }
                let value = Value::dict(pairs);
                self.seen.insert(key, value.clone());
                Ok(value)
            }
            TypeDescriptor::Struct(field_tys) => {
                self.expect('(', "Struct")?;
                let mut fields = Vec::new();
                for (i, (name, field_ty)) in field_tys.iter().enumerate() {
                    self.skip_ws();
                    if i > 0 {
                        self.expect(',', "Struct")?;
                        self.skip_ws();
                    }
                    self.read_field_name()?;
                    self.expect('=', "Struct")?;
                    self.path.push(format!(".{name}"));
                    fields.push(self.read(field_ty)?);
                    self.path.pop();
                }
                self.skip_ws();
                self.expect(')', "Struct")?;
                Ok(Value::struct_of(fields))
            }
            TypeDescriptor::Variant(cases) => {
                self.expect('.', "Variant")?;
                let name = self.read_while(|c| c.is_ascii_alphanumeric() || c == '_');
                let index = cases
                    .iter()
                    .position(|(n, _)| n == &name)
                    .ok_or_else(|| self.detailed("unknown variant case", "Variant"))?;
                let case_ty = &cases[index].1;
                let payload = if matches!(case_ty, TypeDescriptor::Null) {
                    Value::Null
                } else {
                    self.path.push(format!(".{name}"));
                    let v = self.read(case_ty)?;
                    self.path.pop();
                    v
                };
                Ok(Value::variant(name, payload))
            }
            TypeDescriptor::Ref(inner_ty) => {
                if self.peek_is_backref() {
                    return self.read_backref_target("Ref");
                }
                self.expect('&', "Ref")?;
                let key = self.path.concat();
                self.path.push(".*".to_string());
                let inner = self.read(inner_ty)?;
                self.path.pop();
                let value = Value::reference(inner);
                self.seen.insert(key, value.clone());
                Ok(value)
            }
            TypeDescriptor::Vector(kind) => {
                if !self.try_consume("vec") {
                    return Err(self.detailed("expected `vec[...]`", "Vector"));
                }
                self.expect('[', "Vector")?;
                let items = self.read_scalar_list(*kind, "Vector")?;
                self.expect(']', "Vector")?;
                Ok(Value::Vector(Rc::new(RefCell::new(items))))
            }
            TypeDescriptor::Matrix(kind) => {
                if !self.try_consume("mat") {
                    return Err(self.detailed("expected `mat[...]`", "Matrix"));
                }
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
                Err(self.detailed("function values are not parseable from text", "Function"))
            }
        }
    }

    fn read_backref_or(
        &mut self,
        open: char,
        close: char,
        ty_name: &'static str,
        body: impl FnOnce(&mut Self) -> Result<Value, CodecError>,
    ) -> Result<Value, CodecError> {
        if self.peek_is_backref() {
            return self.read_backref_target(ty_name);
        }
        let key = self.path.concat();
        self.expect(open, ty_name)?;
        let value = body(self)?;
        self.expect(close, ty_name)?;
        self.seen.insert(key, value.clone());
        Ok(value)
    }

    fn read_field_name(&mut self) -> Result<String, CodecError> {
        self.skip_ws();
        if self.peek() == Some('`') {
            self.bump();
            let name = self.read_while(|c| c != '`');
            self.bump();
            Ok(name)
        } else {
            Ok(self.read_while(|c| c.is_ascii_alphanumeric() || c == '_'))
        }
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

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// Splits an already-concatenated path string back into segments, for
/// resolving a backreference's `rel` component.
fn parse_path_segments(s: &str) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    let mut segments = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let start = i;
        if chars[i] == '[' {
            while i < chars.len() && chars[i] != ']' {
                i += 1;
            }
            if i < chars.len() {
                i += 1;
            }
        } else if chars[i] == '.' {
            i += 1;
            while i < chars.len() && chars[i] != '[' && chars[i] != '.' {
                i += 1;
            }
        } else {
            i += 1;
        }
        segments.push(chars[start..i].iter().collect());
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s3_struct_prints_and_parses() {
        let ty = TypeDescriptor::struct_of(vec![
            ("a".into(), TypeDescriptor::Integer),
            ("b".into(), TypeDescriptor::String),
        ]);
        let value = Value::struct_of(vec![Value::Integer(1), Value::string("x")]);
        let printed = print(&value, &ty).unwrap();
        assert_eq!(printed, "(a=1, b=\"x\")");
        let parsed = parse(&printed, &ty).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn floats_always_print_with_a_decimal_point() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(-0.0), "-0.0");
        assert_eq!(format_float(f64::NAN), "NaN");
    }

    #[test]
    fn ref_sharing_round_trips_through_backreferences() {
        let r = Value::reference(Value::Integer(0));
        let array = Value::array(vec![r.clone(), r]);
        let ty = TypeDescriptor::array(TypeDescriptor::reference(TypeDescriptor::Integer));
        let printed = print(&array, &ty).unwrap();
        assert!(printed.contains('#'));
        let decoded = parse(&printed, &ty).unwrap();
        if let Value::Array(items) = &decoded {
            let items = items.borrow();
            if let (Value::Ref(a), Value::Ref(b)) = (&items[0], &items[1]) {
                *a.borrow_mut() = Value::Integer(9);
                assert_eq!(*b.borrow(), Value::Integer(9));
            } else {
                panic!("expected refs");
            }
        } else {
            panic!("expected array");
        }
    }

    #[test]
    fn variant_without_payload_prints_bare() {
        let ty = TypeDescriptor::variant_of(vec![("None".into(), TypeDescriptor::Null)]);
        let value = Value::variant("None", Value::Null);
        assert_eq!(print(&value, &ty).unwrap(), ".None");
        assert_eq!(parse(".None", &ty).unwrap(), value);
    }

    #[test]
    fn backtick_quotes_non_identifier_field_names() {
        let ty = TypeDescriptor::struct_of(vec![("has space".into(), TypeDescriptor::Integer)]);
        let value = Value::struct_of(vec![Value::Integer(1)]);
        let printed = print(&value, &ty).unwrap();
        assert_eq!(printed, "(`has space`=1)");
        assert_eq!(parse(&printed, &ty).unwrap(), value);
    }

    #[test]
    fn detailed_error_has_expected_shape() {
        let err = parse("nul", &TypeDescriptor::Null).unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("Error occurred because"));
        assert!(msg.contains("while parsing value of type \"Null\""));
    }
}
