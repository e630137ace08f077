use bytes::{BufMut, BytesMut};

use super::*;
use crate::signature::{ContainerKind, ScalarKind, TypeDescriptor};
use crate::WireValue;

/// Serializes values into a Hessian 2 stream.
///
/// One encoder covers one message body: class definitions written for the
/// first argument are referenced, not repeated, by later ones.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
    classes: Vec<(String, Vec<String>)>,
}

impl Encoder {
    pub fn new() -> Encoder {
        Default::default()
    }

    pub fn into_bytes(self) -> BytesMut {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_null(&mut self) {
        self.buf.put_u8(BC_NULL);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(if v { BC_TRUE } else { BC_FALSE });
    }

    pub fn write_int(&mut self, v: i32) {
        if (INT_DIRECT_MIN..=INT_DIRECT_MAX).contains(&v) {
            self.buf.put_u8((BC_INT_ZERO as i32 + v) as u8);
        } else if (INT_BYTE_MIN..=INT_BYTE_MAX).contains(&v) {
            self.buf.put_u8((BC_INT_BYTE_ZERO as i32 + (v >> 8)) as u8);
            self.buf.put_u8(v as u8);
        } else if (INT_SHORT_MIN..=INT_SHORT_MAX).contains(&v) {
            self.buf.put_u8((BC_INT_SHORT_ZERO as i32 + (v >> 16)) as u8);
            self.buf.put_u16(v as u16);
        } else {
            self.buf.put_u8(BC_INT);
            self.buf.put_i32(v);
        }
    }

    pub fn write_long(&mut self, v: i64) {
        if (LONG_DIRECT_MIN..=LONG_DIRECT_MAX).contains(&v) {
            self.buf.put_u8((BC_LONG_ZERO as i64 + v) as u8);
        } else if (LONG_BYTE_MIN..=LONG_BYTE_MAX).contains(&v) {
            self.buf.put_u8((BC_LONG_BYTE_ZERO as i64 + (v >> 8)) as u8);
            self.buf.put_u8(v as u8);
        } else if (LONG_SHORT_MIN..=LONG_SHORT_MAX).contains(&v) {
            self.buf.put_u8((BC_LONG_SHORT_ZERO as i64 + (v >> 16)) as u8);
            self.buf.put_u16(v as u16);
        } else if v >= i32::MIN as i64 && v <= i32::MAX as i64 {
            self.buf.put_u8(BC_LONG_INT);
            self.buf.put_i32(v as i32);
        } else {
            self.buf.put_u8(BC_LONG);
            self.buf.put_i64(v);
        }
    }

    pub fn write_double(&mut self, v: f64) {
        let int_value = v as i64;
        if int_value as f64 == v {
            if int_value == 0 && v.is_sign_positive() {
                self.buf.put_u8(BC_DOUBLE_ZERO);
                return;
            }
            if int_value == 1 {
                self.buf.put_u8(BC_DOUBLE_ONE);
                return;
            }
            if (-0x80..0x80).contains(&int_value) {
                self.buf.put_u8(BC_DOUBLE_BYTE);
                self.buf.put_i8(int_value as i8);
                return;
            }
            if (-0x8000..0x8000).contains(&int_value) {
                self.buf.put_u8(BC_DOUBLE_SHORT);
                self.buf.put_i16(int_value as i16);
                return;
            }
        }
        self.buf.put_u8(BC_DOUBLE);
        self.buf.put_f64(v);
    }

    /// writes a string; lengths count UTF-16 units the way the JVM side does.
    pub fn write_string(&mut self, s: &str) {
        let units: Vec<u16> = s.encode_utf16().collect();
        let mut rest = &units[..];

        while rest.len() > STRING_CHUNK_MAX {
            let (chunk, tail) = rest.split_at(STRING_CHUNK_MAX);
            self.buf.put_u8(BC_STRING_CHUNK);
            self.buf.put_u16(chunk.len() as u16);
            self.put_utf16(chunk);
            rest = tail;
        }

        let len = rest.len();
        if len <= STRING_DIRECT_MAX {
            self.buf.put_u8(BC_STRING_DIRECT + len as u8);
        } else if len <= STRING_SHORT_MAX {
            self.buf.put_u8(BC_STRING_SHORT + (len >> 8) as u8);
            self.buf.put_u8(len as u8);
        } else {
            self.buf.put_u8(BC_STRING);
            self.buf.put_u16(len as u16);
        }
        self.put_utf16(rest);
    }

    // each UTF-16 unit, surrogates included, is written as its own 1-3 byte sequence
    fn put_utf16(&mut self, units: &[u16]) {
        for &ch in units {
            let ch = ch as u32;
            if ch < 0x80 {
                self.buf.put_u8(ch as u8);
            } else if ch < 0x800 {
                self.buf.put_u8((0xc0 + ((ch >> 6) & 0x1f)) as u8);
                self.buf.put_u8((0x80 + (ch & 0x3f)) as u8);
            } else {
                self.buf.put_u8((0xe0 + ((ch >> 12) & 0xf)) as u8);
                self.buf.put_u8((0x80 + ((ch >> 6) & 0x3f)) as u8);
                self.buf.put_u8((0x80 + (ch & 0x3f)) as u8);
            }
        }
    }

    /// integers inside the 32-bit range go out as Hessian ints. Values with a
    /// declared `long` type go through `write_typed` instead.
    pub fn write_integer(&mut self, v: i64) {
        if v >= i32::MIN as i64 && v <= i32::MAX as i64 {
            self.write_int(v as i32);
        } else {
            self.write_long(v);
        }
    }

    pub fn write_binary(&mut self, bytes: &[u8]) {
        let mut rest = bytes;
        while rest.len() > BINARY_CHUNK_MAX {
            let (chunk, tail) = rest.split_at(BINARY_CHUNK_MAX);
            self.buf.put_u8(BC_BINARY_CHUNK);
            self.buf.put_u16(chunk.len() as u16);
            self.buf.put_slice(chunk);
            rest = tail;
        }

        let len = rest.len();
        if len <= BINARY_DIRECT_MAX {
            self.buf.put_u8(BC_BINARY_DIRECT + len as u8);
        } else if len <= BINARY_SHORT_MAX {
            self.buf.put_u8(BC_BINARY_SHORT + (len >> 8) as u8);
            self.buf.put_u8(len as u8);
        } else {
            self.buf.put_u8(BC_BINARY);
            self.buf.put_u16(len as u16);
        }
        self.buf.put_slice(rest);
    }

    /// Writes `value` in the form its declared type reads best on the JVM:
    /// `long` values stay longs and `byte[]` goes out as binary. Element types
    /// of arrays, lists and maps are followed; anything else falls back to
    /// `write_value`.
    pub fn write_typed(&mut self, value: &WireValue, td: &TypeDescriptor) {
        match (value, td) {
            (WireValue::Int64(v), _) if is_long(td) => self.write_long(*v),
            (WireValue::List(items), TypeDescriptor::ArrayOf(component)) => {
                let component: &TypeDescriptor = component;
                match as_bytes(component, items) {
                    Some(bytes) => self.write_binary(&bytes),
                    None => self.write_list_of(items, Some(component)),
                }
            }
            (WireValue::List(items), TypeDescriptor::Generic { kind, elements, .. })
                if *kind != ContainerKind::Map =>
            {
                self.write_list_of(items, elements.first())
            }
            (WireValue::Map(entries), TypeDescriptor::Generic { kind: ContainerKind::Map, elements, .. })
                if elements.len() == 2 =>
            {
                self.buf.put_u8(BC_MAP_UNTYPED);
                for (k, v) in entries {
                    self.write_typed(k, &elements[0]);
                    self.write_typed(v, &elements[1]);
                }
                self.buf.put_u8(BC_END);
            }
            _ => self.write_value(value),
        }
    }

    pub fn write_value(&mut self, value: &WireValue) {
        match value {
            WireValue::Null => self.write_null(),
            WireValue::Bool(v) => self.write_bool(*v),
            WireValue::Int64(v) => self.write_integer(*v),
            WireValue::Float64(v) => self.write_double(*v),
            WireValue::String(s) => self.write_string(s),
            WireValue::List(items) => self.write_list_of(items, None),
            WireValue::Map(entries) => {
                self.buf.put_u8(BC_MAP_UNTYPED);
                for (k, v) in entries {
                    self.write_value(k);
                    self.write_value(v);
                }
                self.buf.put_u8(BC_END);
            }
            WireValue::Struct { type_name, fields } if type_name.is_empty() => {
                self.write_string_map(fields);
            }
            WireValue::Struct { type_name, fields } => self.write_object(type_name, fields),
        }
    }

    pub fn write_string_map(&mut self, fields: &[(String, WireValue)]) {
        self.buf.put_u8(BC_MAP_UNTYPED);
        for (k, v) in fields {
            self.write_string(k);
            self.write_value(v);
        }
        self.buf.put_u8(BC_END);
    }

    fn write_list_of(&mut self, items: &[WireValue], element: Option<&TypeDescriptor>) {
        if items.len() <= LIST_DIRECT_MAX {
            self.buf.put_u8(BC_LIST_DIRECT_UNTYPED + items.len() as u8);
        } else {
            self.buf.put_u8(BC_LIST_FIXED_UNTYPED);
            self.write_int(items.len() as i32);
        }
        for item in items {
            match element {
                Some(td) => self.write_typed(item, td),
                None => self.write_value(item),
            }
        }
    }

    fn write_object(&mut self, type_name: &str, fields: &[(String, WireValue)]) {
        let names: Vec<String> = fields.iter().map(|(k, _)| k.clone()).collect();
        let class_ref = match self
            .classes
            .iter()
            .position(|(t, f)| t == type_name && *f == names)
        {
            Some(idx) => idx,
            None => {
                self.buf.put_u8(BC_OBJECT_DEF);
                self.write_string(type_name);
                self.write_int(names.len() as i32);
                for name in &names {
                    self.write_string(name);
                }
                self.classes.push((type_name.to_owned(), names));
                self.classes.len() - 1
            }
        };

        if class_ref <= OBJECT_DIRECT_MAX {
            self.buf.put_u8(BC_OBJECT_DIRECT + class_ref as u8);
        } else {
            self.buf.put_u8(BC_OBJECT);
            self.write_int(class_ref as i32);
        }
        for (_, v) in fields {
            self.write_value(v);
        }
    }
}

fn is_long(td: &TypeDescriptor) -> bool {
    matches!(td.scalar_kind(), Some(ScalarKind::Integral { max, .. }) if max == i64::MAX)
}

// the elements of a `byte[]`, if every one fits a byte
fn as_bytes(component: &TypeDescriptor, items: &[WireValue]) -> Option<Vec<u8>> {
    if !matches!(component, TypeDescriptor::Primitive(name) if name == "byte") {
        return None;
    }
    items
        .iter()
        .map(|item| match item {
            WireValue::Int64(v) if *v >= i8::MIN as i64 && *v <= i8::MAX as i64 => Some(*v as u8),
            _ => None,
        })
        .collect()
}
