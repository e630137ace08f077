//! Conversion between caller JSON and `WireValue`, directed by parameter types.

use serde_json::{Map, Number, Value};

use crate::signature::{ContainerKind, ScalarKind, TypeDescriptor};
use crate::{Error, ErrorKind, Result, WireValue};

/// the key naming the concrete class of a JSON object.
pub const CLASS_KEY: &str = "class";

fn mismatch(json: &Value, td: &TypeDescriptor) -> Error {
    let mut shown = json.to_string();
    if shown.len() > 64 {
        let mut end = 61;
        while !shown.is_char_boundary(end) {
            end -= 1;
        }
        shown.truncate(end);
        shown.push_str("...");
    }
    Error::new(
        ErrorKind::TypeMismatchError,
        format!("cannot convert {} to {}", shown, td),
    )
}

fn count_mismatch(expected: usize, got: usize) -> Error {
    Error::new(
        ErrorKind::ParameterCountMismatch,
        format!("method takes {} parameters, {} given", expected, got),
    )
}

/// Builds the argument list for a typed call.
///
/// A single parameter takes the payload itself. An array payload for a
/// scalar or struct parameter must hold exactly that one value; scalars
/// reject any other length, struct types try the whole array. A
/// `java.lang.Object` parameter takes the array as it is. Several parameters
/// take a JSON array of the same length. An absent payload means zero
/// arguments.
pub fn to_wire_args(payload: Option<&Value>, types: &[TypeDescriptor]) -> Result<Vec<WireValue>> {
    match (types.len(), payload) {
        (0, None) => Ok(Vec::new()),
        (0, Some(Value::Array(items))) if items.is_empty() => Ok(Vec::new()),
        (0, Some(Value::Array(items))) => Err(count_mismatch(0, items.len())),
        (0, Some(_)) => Err(count_mismatch(0, 1)),
        (n, None) => Err(count_mismatch(n, 0)),
        (1, Some(json)) => {
            let td = &types[0];
            match json {
                Value::Array(items) if !td.is_sequence() && !is_object(td) => match items.len() {
                    1 => Ok(vec![to_wire(&items[0], td)?]),
                    n if td.is_primitive() || td.scalar_kind().is_some() => Err(count_mismatch(1, n)),
                    _ => Ok(vec![to_wire(json, td)?]),
                },
                _ => Ok(vec![to_wire(json, td)?]),
            }
        }
        (n, Some(Value::Array(items))) => {
            if items.len() != n {
                return Err(count_mismatch(n, items.len()));
            }
            items
                .iter()
                .zip(types)
                .map(|(json, td)| to_wire(json, td))
                .collect()
        }
        (n, Some(_)) => Err(count_mismatch(n, 1)),
    }
}

fn is_object(td: &TypeDescriptor) -> bool {
    matches!(td, TypeDescriptor::Named(name) if name.is_empty() || name == "java.lang.Object")
}

/// converts one JSON value to the wire form of its declared type.
pub fn to_wire(json: &Value, td: &TypeDescriptor) -> Result<WireValue> {
    if json.is_null() {
        return if td.is_primitive() {
            Err(mismatch(json, td))
        } else {
            Ok(WireValue::Null)
        };
    }

    if let Some(kind) = td.scalar_kind() {
        return to_scalar(json, td, kind);
    }

    match td {
        TypeDescriptor::ArrayOf(component) => match json {
            Value::Array(items) => items
                .iter()
                .map(|item| to_wire(item, component))
                .collect::<Result<Vec<_>>>()
                .map(WireValue::List),
            _ => Err(mismatch(json, td)),
        },
        TypeDescriptor::Generic { kind, elements, .. } => match (kind, json) {
            (ContainerKind::List, Value::Array(items)) | (ContainerKind::Set, Value::Array(items)) => {
                items
                    .iter()
                    .map(|item| match elements.first() {
                        Some(element) => to_wire(item, element),
                        None => Ok(to_wire_untyped(item)),
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(WireValue::List)
            }
            (ContainerKind::Map, Value::Object(map)) => {
                let mut entries = Vec::with_capacity(map.len());
                for (k, v) in map {
                    let entry = match (elements.get(0), elements.get(1)) {
                        (Some(key_type), Some(value_type)) => (
                            to_wire(&Value::String(k.clone()), key_type)?,
                            to_wire(v, value_type)?,
                        ),
                        _ => (WireValue::string(k.as_str()), to_wire_untyped(v)),
                    };
                    entries.push(entry);
                }
                Ok(WireValue::Map(entries))
            }
            _ => Err(mismatch(json, td)),
        },
        TypeDescriptor::Named(_) if is_object(td) => Ok(to_wire_untyped(json)),
        TypeDescriptor::Named(name) if name == "java.math.BigDecimal" || name == "java.math.BigInteger" => {
            match json {
                Value::Number(n) => Ok(decimal(name, n.to_string())),
                Value::String(s) if s.trim().parse::<f64>().is_ok() => Ok(decimal(name, s.trim().to_owned())),
                _ => Err(mismatch(json, td)),
            }
        }
        TypeDescriptor::Named(name) => match json {
            Value::Object(map) => Ok(to_struct(name, map)),
            // an enum constant
            Value::String(s) => Ok(WireValue::Struct {
                type_name: name.clone(),
                fields: vec![("name".to_owned(), WireValue::string(s.as_str()))],
            }),
            _ => Err(mismatch(json, td)),
        },
        TypeDescriptor::Primitive(_) => Err(mismatch(json, td)),
    }
}

fn decimal(class: &str, digits: String) -> WireValue {
    WireValue::Struct {
        type_name: class.to_owned(),
        fields: vec![("value".to_owned(), WireValue::String(digits))],
    }
}

fn to_scalar(json: &Value, td: &TypeDescriptor, kind: ScalarKind) -> Result<WireValue> {
    match kind {
        ScalarKind::Boolean => match json {
            Value::Bool(b) => Ok(WireValue::Bool(*b)),
            Value::String(s) if s == "true" || s == "false" => Ok(WireValue::Bool(s == "true")),
            _ => Err(mismatch(json, td)),
        },
        ScalarKind::Integral { min, max } => {
            let v = match json {
                Value::Number(n) => n.as_i64().or_else(|| {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < 9.2e18)
                        .map(|f| f as i64)
                }),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            match v {
                Some(v) if v >= min && v <= max => Ok(WireValue::Int64(v)),
                _ => Err(mismatch(json, td)),
            }
        }
        ScalarKind::Floating => match json {
            Value::Number(n) => n
                .as_f64()
                .map(WireValue::Float64)
                .ok_or_else(|| mismatch(json, td)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(WireValue::Float64)
                .map_err(|_| mismatch(json, td)),
            _ => Err(mismatch(json, td)),
        },
        ScalarKind::Char => match json {
            Value::String(s) if s.chars().count() == 1 => Ok(WireValue::string(s.as_str())),
            _ => Err(mismatch(json, td)),
        },
        ScalarKind::Text => match json {
            Value::String(s) => Ok(WireValue::string(s.as_str())),
            Value::Number(n) => Ok(WireValue::String(n.to_string())),
            Value::Bool(b) => Ok(WireValue::String(b.to_string())),
            _ => Err(mismatch(json, td)),
        },
    }
}

fn to_struct(declared: &str, map: &Map<String, Value>) -> WireValue {
    let type_name = match map.get(CLASS_KEY) {
        Some(Value::String(class)) if !class.is_empty() => class.clone(),
        _ => declared.to_owned(),
    };
    let fields = map
        .iter()
        .filter(|(k, _)| k.as_str() != CLASS_KEY)
        .map(|(k, v)| (k.clone(), to_wire_untyped(v)))
        .collect();
    WireValue::Struct { type_name, fields }
}

/// Structural conversion for values without a declared type.
///
/// Objects become structs named by their `class` key; objects without one stay
/// untyped and go out as maps.
pub fn to_wire_untyped(json: &Value) -> WireValue {
    match json {
        Value::Null => WireValue::Null,
        Value::Bool(b) => WireValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(v) => WireValue::Int64(v),
            None => WireValue::Float64(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => WireValue::string(s.as_str()),
        Value::Array(items) => WireValue::List(items.iter().map(to_wire_untyped).collect()),
        Value::Object(map) => to_struct("", map),
    }
}

/// the type a value without a declared parameter type is sent as.
pub fn infer_descriptor(value: &WireValue) -> TypeDescriptor {
    match value {
        WireValue::Null => TypeDescriptor::named("java.lang.Object"),
        WireValue::Bool(_) => TypeDescriptor::Primitive("boolean".to_owned()),
        WireValue::Int64(v) if *v >= i32::MIN as i64 && *v <= i32::MAX as i64 => {
            TypeDescriptor::Primitive("int".to_owned())
        }
        WireValue::Int64(_) => TypeDescriptor::Primitive("long".to_owned()),
        WireValue::Float64(_) => TypeDescriptor::Primitive("double".to_owned()),
        WireValue::String(_) => TypeDescriptor::named("java.lang.String"),
        WireValue::List(_) => TypeDescriptor::Generic {
            kind: ContainerKind::List,
            name: "java.util.List".to_owned(),
            elements: Vec::new(),
        },
        WireValue::Struct { type_name, .. } if !type_name.is_empty() => {
            TypeDescriptor::named(type_name.as_str())
        }
        WireValue::Map(_) | WireValue::Struct { .. } => TypeDescriptor::Generic {
            kind: ContainerKind::Map,
            name: "java.util.Map".to_owned(),
            elements: Vec::new(),
        },
    }
}

/// The argument of a call made without parameter types: the whole payload is
/// one structured argument, its type inferred from its shape.
pub fn to_wire_traditional(payload: Option<&Value>) -> (Vec<TypeDescriptor>, Vec<WireValue>) {
    match payload {
        None => (Vec::new(), Vec::new()),
        Some(json) => {
            let value = to_wire_untyped(json);
            (vec![infer_descriptor(&value)], vec![value])
        }
    }
}

/// converts a wire result back to JSON; structs gain their `class` key.
pub fn from_wire(value: &WireValue) -> Value {
    match value {
        WireValue::Null => Value::Null,
        WireValue::Bool(b) => Value::Bool(*b),
        WireValue::Int64(v) => Value::Number((*v).into()),
        WireValue::Float64(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        WireValue::String(s) => Value::String(s.clone()),
        WireValue::List(items) => Value::Array(items.iter().map(from_wire).collect()),
        WireValue::Map(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (k, v) in entries {
                let key = match k {
                    WireValue::String(s) => s.clone(),
                    other => from_wire(other).to_string(),
                };
                map.insert(key, from_wire(v));
            }
            Value::Object(map)
        }
        WireValue::Struct { type_name, fields } => {
            let mut map = Map::with_capacity(fields.len() + 1);
            if !type_name.is_empty() {
                map.insert(CLASS_KEY.to_owned(), Value::String(type_name.clone()));
            }
            for (k, v) in fields {
                map.insert(k.clone(), from_wire(v));
            }
            Value::Object(map)
        }
    }
}

/// Reads caller parameter text leniently: JSON first, then a quoted string,
/// then the raw text as a single string. Blank text means no parameters.
pub fn parse_parameter_values(text: &str) -> Option<Value> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(json) = serde_json::from_str::<Value>(text) {
        return Some(json);
    }
    let unquoted = ['"', '\'']
        .iter()
        .find(|q| text.len() >= 2 && text.starts_with(**q) && text.ends_with(**q))
        .map(|_| &text[1..text.len() - 1]);
    Some(Value::String(unquoted.unwrap_or(text).to_owned()))
}
