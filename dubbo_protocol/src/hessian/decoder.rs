use byteorder::{BigEndian, ByteOrder};

use super::*;
use crate::{Error, ErrorKind, Result, WireValue};

#[derive(Debug, Clone)]
struct ClassDef {
    name: String,
    fields: Vec<String>,
}

/// Reads values out of a Hessian 2 stream.
///
/// Class definitions, type names and back references accumulate across
/// successive `read_value` calls, matching how the stream was written.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    classes: Vec<ClassDef>,
    types: Vec<String>,
    refs: Vec<WireValue>,
    depth: usize,
}

/// how deeply lists, maps and objects may nest.
pub const MAX_DEPTH: usize = 256;

fn malformed<S: AsRef<str>>(msg: S) -> Error {
    Error::new(
        ErrorKind::NativeProtocolFailure,
        format!("malformed hessian stream: {}", msg.as_ref()),
    )
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Decoder<'a> {
        Decoder {
            buf,
            pos: 0,
            classes: Vec::new(),
            types: Vec::new(),
            refs: Vec::new(),
            depth: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn peek(&self) -> Result<u8> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or_else(|| malformed("unexpected end of stream"))
    }

    fn read_u8(&mut self) -> Result<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(malformed(format!(
                "needed {} bytes at offset {}, {} left",
                n,
                self.pos,
                self.buf.len() - self.pos
            )));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn read_value(&mut self) -> Result<WireValue> {
        if self.depth >= MAX_DEPTH {
            return Err(malformed(format!("values nested deeper than {}", MAX_DEPTH)));
        }
        self.depth += 1;
        let v = self.read_tagged();
        self.depth -= 1;
        v
    }

    fn read_tagged(&mut self) -> Result<WireValue> {
        let mut tag = self.read_u8()?;
        while tag == BC_OBJECT_DEF {
            self.read_class_def()?;
            tag = self.read_u8()?;
        }
        match tag {
            BC_NULL => Ok(WireValue::Null),
            BC_TRUE => Ok(WireValue::Bool(true)),
            BC_FALSE => Ok(WireValue::Bool(false)),

            0x80..=0xbf | 0xc0..=0xcf | 0xd0..=0xd7 | BC_INT => {
                Ok(WireValue::Int64(self.read_int_tail(tag)? as i64))
            }
            0xd8..=0xef | 0xf0..=0xff | 0x38..=0x3f | BC_LONG_INT | BC_LONG => {
                Ok(WireValue::Int64(self.read_long_tail(tag)?))
            }
            BC_DOUBLE_ZERO | BC_DOUBLE_ONE | BC_DOUBLE_BYTE | BC_DOUBLE_SHORT | BC_DOUBLE_MILL
            | BC_DOUBLE => Ok(WireValue::Float64(self.read_double_tail(tag)?)),

            BC_DATE => Ok(WireValue::Int64(BigEndian::read_i64(self.take(8)?))),
            BC_DATE_MINUTE => Ok(WireValue::Int64(
                BigEndian::read_i32(self.take(4)?) as i64 * 60_000,
            )),

            0x00..=0x1f | 0x30..=0x33 | BC_STRING | BC_STRING_CHUNK => {
                Ok(WireValue::String(self.read_string_tail(tag)?))
            }

            0x20..=0x2f | 0x34..=0x37 | BC_BINARY | BC_BINARY_CHUNK => {
                let bytes = self.read_binary_tail(tag)?;
                Ok(WireValue::List(
                    bytes.into_iter().map(|b| WireValue::Int64(b as i64)).collect(),
                ))
            }

            BC_LIST_VARIABLE => {
                self.read_type()?;
                self.read_list_until_end()
            }
            BC_LIST_VARIABLE_UNTYPED => self.read_list_until_end(),
            BC_LIST_FIXED => {
                self.read_type()?;
                let len = self.read_length()?;
                self.read_list_fixed(len)
            }
            BC_LIST_FIXED_UNTYPED => {
                let len = self.read_length()?;
                self.read_list_fixed(len)
            }
            0x70..=0x77 => {
                self.read_type()?;
                self.read_list_fixed((tag - BC_LIST_DIRECT) as usize)
            }
            0x78..=0x7f => self.read_list_fixed((tag - BC_LIST_DIRECT_UNTYPED) as usize),

            BC_MAP => {
                self.read_type()?;
                self.read_map()
            }
            BC_MAP_UNTYPED => self.read_map(),

            BC_OBJECT => {
                let idx = self.read_length()?;
                self.read_object(idx)
            }
            0x60..=0x6f => self.read_object((tag - BC_OBJECT_DIRECT) as usize),

            BC_REF => {
                let idx = self.read_length()?;
                self.refs
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| malformed(format!("reference {} out of range", idx)))
            }

            other => Err(malformed(format!("unknown tag 0x{:02x}", other))),
        }
    }

    /// reads a value that must be numeric and fit an i32.
    pub fn read_int(&mut self) -> Result<i32> {
        match self.read_value()? {
            WireValue::Int64(v) if v >= i32::MIN as i64 && v <= i32::MAX as i64 => Ok(v as i32),
            other => Err(malformed(format!("expected int, found {:?}", other))),
        }
    }

    pub fn read_string(&mut self) -> Result<String> {
        match self.read_value()? {
            WireValue::String(s) => Ok(s),
            other => Err(malformed(format!("expected string, found {:?}", other))),
        }
    }

    fn read_int_tail(&mut self, tag: u8) -> Result<i32> {
        let v = match tag {
            0x80..=0xbf => tag as i32 - BC_INT_ZERO as i32,
            0xc0..=0xcf => ((tag as i32 - BC_INT_BYTE_ZERO as i32) << 8) + self.read_u8()? as i32,
            0xd0..=0xd7 => {
                let b = self.take(2)?;
                ((tag as i32 - BC_INT_SHORT_ZERO as i32) << 16) + BigEndian::read_u16(b) as i32
            }
            _ => BigEndian::read_i32(self.take(4)?),
        };
        Ok(v)
    }

    fn read_long_tail(&mut self, tag: u8) -> Result<i64> {
        let v = match tag {
            0xd8..=0xef => tag as i64 - BC_LONG_ZERO as i64,
            0xf0..=0xff => {
                ((tag as i64 - BC_LONG_BYTE_ZERO as i64) << 8) + self.read_u8()? as i64
            }
            0x38..=0x3f => {
                let b = self.take(2)?;
                ((tag as i64 - BC_LONG_SHORT_ZERO as i64) << 16) + BigEndian::read_u16(b) as i64
            }
            BC_LONG_INT => BigEndian::read_i32(self.take(4)?) as i64,
            _ => BigEndian::read_i64(self.take(8)?),
        };
        Ok(v)
    }

    fn read_double_tail(&mut self, tag: u8) -> Result<f64> {
        let v = match tag {
            BC_DOUBLE_ZERO => 0.0,
            BC_DOUBLE_ONE => 1.0,
            BC_DOUBLE_BYTE => self.read_u8()? as i8 as f64,
            BC_DOUBLE_SHORT => BigEndian::read_i16(self.take(2)?) as f64,
            BC_DOUBLE_MILL => 0.001 * BigEndian::read_i32(self.take(4)?) as f64,
            _ => BigEndian::read_f64(self.take(8)?),
        };
        Ok(v)
    }

    fn read_string_tail(&mut self, mut tag: u8) -> Result<String> {
        let mut units: Vec<u16> = Vec::new();
        loop {
            let (len, last) = match tag {
                0x00..=0x1f => ((tag - BC_STRING_DIRECT) as usize, true),
                0x30..=0x33 => ((((tag - BC_STRING_SHORT) as usize) << 8) + self.read_u8()? as usize, true),
                BC_STRING => (BigEndian::read_u16(self.take(2)?) as usize, true),
                BC_STRING_CHUNK => (BigEndian::read_u16(self.take(2)?) as usize, false),
                other => return Err(malformed(format!("bad string chunk tag 0x{:02x}", other))),
            };
            self.read_utf16_units(len, &mut units)?;
            if last {
                break;
            }
            tag = self.read_u8()?;
        }
        Ok(String::from_utf16_lossy(&units))
    }

    // `len` counts UTF-16 units; a 4-byte sequence from a non-JVM writer yields two
    fn read_utf16_units(&mut self, len: usize, out: &mut Vec<u16>) -> Result<()> {
        let target = out.len() + len;
        while out.len() < target {
            let b0 = self.read_u8()? as u32;
            let ch = if b0 < 0x80 {
                b0
            } else if b0 & 0xe0 == 0xc0 {
                ((b0 & 0x1f) << 6) | (self.read_u8()? as u32 & 0x3f)
            } else if b0 & 0xf0 == 0xe0 {
                let b = self.take(2)?;
                ((b0 & 0x0f) << 12) | ((b[0] as u32 & 0x3f) << 6) | (b[1] as u32 & 0x3f)
            } else if b0 & 0xf8 == 0xf0 {
                let b = self.take(3)?;
                ((b0 & 0x07) << 18)
                    | ((b[0] as u32 & 0x3f) << 12)
                    | ((b[1] as u32 & 0x3f) << 6)
                    | (b[2] as u32 & 0x3f)
            } else {
                return Err(malformed(format!("bad utf-8 lead byte 0x{:02x}", b0)));
            };

            match std::char::from_u32(ch) {
                Some(c) if ch > 0xffff => {
                    let mut pair = [0u16; 2];
                    out.extend_from_slice(c.encode_utf16(&mut pair));
                }
                _ => out.push(ch as u16),
            }
        }
        Ok(())
    }

    fn read_binary_tail(&mut self, mut tag: u8) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        loop {
            let (len, last) = match tag {
                0x20..=0x2f => ((tag - BC_BINARY_DIRECT) as usize, true),
                0x34..=0x37 => ((((tag - BC_BINARY_SHORT) as usize) << 8) + self.read_u8()? as usize, true),
                BC_BINARY => (BigEndian::read_u16(self.take(2)?) as usize, true),
                BC_BINARY_CHUNK => (BigEndian::read_u16(self.take(2)?) as usize, false),
                other => return Err(malformed(format!("bad binary chunk tag 0x{:02x}", other))),
            };
            bytes.extend_from_slice(self.take(len)?);
            if last {
                return Ok(bytes);
            }
            tag = self.read_u8()?;
        }
    }

    // a type is either a new name or an index into the names seen so far
    fn read_type(&mut self) -> Result<String> {
        match self.read_value()? {
            WireValue::String(name) => {
                self.types.push(name.clone());
                Ok(name)
            }
            WireValue::Int64(idx) => self
                .types
                .get(idx as usize)
                .cloned()
                .ok_or_else(|| malformed(format!("type reference {} out of range", idx))),
            other => Err(malformed(format!("expected type, found {:?}", other))),
        }
    }

    fn read_length(&mut self) -> Result<usize> {
        let len = self.read_int()?;
        if len < 0 {
            return Err(malformed(format!("negative length {}", len)));
        }
        Ok(len as usize)
    }

    fn reserve_ref(&mut self) -> usize {
        self.refs.push(WireValue::Null);
        self.refs.len() - 1
    }

    fn read_list_fixed(&mut self, len: usize) -> Result<WireValue> {
        let slot = self.reserve_ref();
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(self.read_value()?);
        }
        let list = WireValue::List(items);
        self.refs[slot] = list.clone();
        Ok(list)
    }

    fn read_list_until_end(&mut self) -> Result<WireValue> {
        let slot = self.reserve_ref();
        let mut items = Vec::new();
        while self.peek()? != BC_END {
            items.push(self.read_value()?);
        }
        self.pos += 1;
        let list = WireValue::List(items);
        self.refs[slot] = list.clone();
        Ok(list)
    }

    fn read_map(&mut self) -> Result<WireValue> {
        let slot = self.reserve_ref();
        let mut entries = Vec::new();
        while self.peek()? != BC_END {
            let k = self.read_value()?;
            let v = self.read_value()?;
            entries.push((k, v));
        }
        self.pos += 1;
        let map = WireValue::Map(entries);
        self.refs[slot] = map.clone();
        Ok(map)
    }

    fn read_class_def(&mut self) -> Result<()> {
        let name = self.read_string()?;
        let count = self.read_length()?;
        let mut fields = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            fields.push(self.read_string()?);
        }
        self.classes.push(ClassDef { name, fields });
        Ok(())
    }

    fn read_object(&mut self, idx: usize) -> Result<WireValue> {
        let def = self
            .classes
            .get(idx)
            .cloned()
            .ok_or_else(|| malformed(format!("class reference {} out of range", idx)))?;
        let slot = self.reserve_ref();
        let mut fields = Vec::with_capacity(def.fields.len());
        for name in def.fields {
            let v = self.read_value()?;
            fields.push((name, v));
        }
        let obj = WireValue::Struct {
            type_name: def.name,
            fields,
        };
        self.refs[slot] = obj.clone();
        Ok(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> WireValue {
        Decoder::new(bytes).read_value().unwrap()
    }

    #[test]
    fn reads_every_int_form() {
        assert_eq!(WireValue::Int64(0), decode(&[0x90]));
        assert_eq!(WireValue::Int64(-16), decode(&[0x80]));
        assert_eq!(WireValue::Int64(-256), decode(&[0xc7, 0x00]));
        assert_eq!(WireValue::Int64(-262144), decode(&[0xd0, 0x00, 0x00]));
        assert_eq!(WireValue::Int64(300), decode(&[b'I', 0x00, 0x00, 0x01, 0x2c]));
    }

    #[test]
    fn reads_every_long_form() {
        assert_eq!(WireValue::Int64(-8), decode(&[0xd8]));
        assert_eq!(WireValue::Int64(-2048), decode(&[0xf0, 0x00]));
        assert_eq!(WireValue::Int64(-262144), decode(&[0x38, 0x00, 0x00]));
        assert_eq!(WireValue::Int64(300), decode(&[0x59, 0x00, 0x00, 0x01, 0x2c]));
        assert_eq!(
            WireValue::Int64(1 << 40),
            decode(&[b'L', 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00])
        );
    }

    #[test]
    fn reads_doubles_including_mills() {
        assert_eq!(WireValue::Float64(0.0), decode(&[0x5b]));
        assert_eq!(WireValue::Float64(-1.0), decode(&[0x5d, 0xff]));
        assert_eq!(WireValue::Float64(0.001 * 12345.0), decode(&[0x5f, 0x00, 0x00, 0x30, 0x39]));
    }

    #[test]
    fn reads_chunked_strings() {
        let mut bytes = vec![b'R', 0x00, 0x02, b'a', b'b'];
        bytes.extend_from_slice(&[0x01, b'c']);
        assert_eq!(WireValue::string("abc"), decode(&bytes));
    }

    #[test]
    fn reads_surrogate_pairs_written_as_two_units() {
        let mut e = Encoder::new();
        e.write_string("hi \u{1F600}");
        let bytes = e.into_bytes();
        assert_eq!(WireValue::string("hi \u{1F600}"), decode(&bytes));
    }

    #[test]
    fn reads_typed_and_untyped_lists() {
        // compact typed list of two ints with type "[int"
        let mut bytes = vec![0x72, 0x04];
        bytes.extend_from_slice(b"[int");
        bytes.extend_from_slice(&[0x91, 0x92]);
        assert_eq!(WireValue::List(vec![1.into(), 2.into()]), decode(&bytes));

        let bytes = [BC_LIST_VARIABLE_UNTYPED, 0x91, b'Z'];
        assert_eq!(WireValue::List(vec![1.into()]), decode(&bytes));
    }

    #[test]
    fn reads_objects_and_back_references() {
        let mut bytes = vec![b'C', 0x03, b'C', b'a', b'r', 0x91, 0x05];
        bytes.extend_from_slice(b"color");
        bytes.extend_from_slice(&[0x60, 0x03, b'r', b'e', b'd']);
        let mut d = Decoder::new(&bytes);
        let car = d.read_value().unwrap();
        assert_eq!(Some("Car"), car.type_name());
        assert_eq!(Some(&WireValue::string("red")), car.field("color"));

        // a list whose second element refers back to the first map
        let bytes = [0x7a, b'H', 0x01, b'k', 0x91, b'Z', b'Q', 0x91];
        match decode(&bytes) {
            WireValue::List(items) => assert_eq!(items[0], items[1]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn reads_binary_as_byte_list() {
        assert_eq!(
            WireValue::List(vec![1.into(), 2.into()]),
            decode(&[0x22, 0x01, 0x02])
        );
    }

    #[test]
    fn truncation_is_a_native_protocol_failure() {
        let err = Decoder::new(&[b'I', 0x00]).read_value().unwrap_err();
        assert_eq!(ErrorKind::NativeProtocolFailure, err.kind());
        let err = Decoder::new(&[b'H', 0x91]).read_value().unwrap_err();
        assert_eq!(ErrorKind::NativeProtocolFailure, err.kind());
    }

    #[test]
    fn truncated_string_chunk() {
        for bytes in &[&[0x05, b'a', b'b'][..], &[b'R', 0x00, 0x05, b'a'], &[b'S', 0x00]] {
            let err = Decoder::new(bytes).read_value().unwrap_err();
            assert_eq!(ErrorKind::NativeProtocolFailure, err.kind(), "{:?}", bytes);
        }
    }

    #[test]
    fn unknown_tag() {
        for tag in &[0x40u8, b'E', b'G', b'P', BC_END] {
            let err = Decoder::new(&[*tag]).read_value().unwrap_err();
            assert_eq!(ErrorKind::NativeProtocolFailure, err.kind(), "0x{:02x}", tag);
        }
    }

    #[test]
    fn deep_nesting_is_rejected() {
        // one-element untyped lists, each holding the next
        let bytes = vec![0x79u8; 1_000_000];
        let err = Decoder::new(&bytes).read_value().unwrap_err();
        assert_eq!(ErrorKind::NativeProtocolFailure, err.kind());

        // typed lists whose type is itself a typed list
        let bytes = vec![0x70u8; 100_000];
        let err = Decoder::new(&bytes).read_value().unwrap_err();
        assert_eq!(ErrorKind::NativeProtocolFailure, err.kind());

        let mut bytes = vec![0x79u8; MAX_DEPTH - 1];
        bytes.push(0x91);
        let mut v = Decoder::new(&bytes).read_value().unwrap();
        for _ in 0..MAX_DEPTH - 1 {
            v = match v {
                WireValue::List(mut items) => items.remove(0),
                other => panic!("unexpected {:?}", other),
            };
        }
        assert_eq!(WireValue::Int64(1), v);
    }

    #[test]
    fn repeated_class_definitions() {
        // an object def with no fields, defined many times before its instance
        let mut bytes = Vec::new();
        for _ in 0..10_000 {
            bytes.extend_from_slice(&[b'C', 0x01, b'E', 0x90]);
        }
        bytes.push(0x60);
        assert_eq!(Some("E"), decode(&bytes).type_name());
    }

    #[test]
    fn encoder_output_reads_back() {
        let value = WireValue::Struct {
            type_name: "com.example.User".to_owned(),
            fields: vec![
                ("id".to_owned(), WireValue::Int64(1 << 33)),
                ("name".to_owned(), "Zhang San".into()),
                ("score".to_owned(), WireValue::Float64(98.5)),
                ("tags".to_owned(), WireValue::List(vec!["a".into(); 9])),
                (
                    "attrs".to_owned(),
                    WireValue::Map(vec![("k".into(), WireValue::Bool(true))]),
                ),
            ],
        };
        let mut e = Encoder::new();
        e.write_value(&value);
        e.write_value(&value);
        let bytes = e.into_bytes();
        let mut d = Decoder::new(&bytes);
        assert_eq!(value, d.read_value().unwrap());
        assert_eq!(value, d.read_value().unwrap());
        assert!(d.is_empty());
    }
}
