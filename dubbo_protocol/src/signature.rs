//! Parsing of comma-separated Java type signatures such as
//! `int,java.util.Map<java.lang.String,java.util.List<com.example.User>>,long[]`.

use std::fmt;

use strum_macros::{Display, EnumString};

use crate::{Error, ErrorKind, Result};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, EnumString)]
pub enum ContainerKind {
    List,
    Set,
    Map,
}

/// How a scalar descriptor expects its JSON value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScalarKind {
    Boolean,
    Integral { min: i64, max: i64 },
    Floating,
    Char,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDescriptor {
    Primitive(String),
    Named(String),
    ArrayOf(Box<TypeDescriptor>),
    Generic {
        kind: ContainerKind,
        name: String,
        elements: Vec<TypeDescriptor>,
    },
}

const PRIMITIVES: [(&str, &str); 9] = [
    ("boolean", "Z"),
    ("byte", "B"),
    ("char", "C"),
    ("short", "S"),
    ("int", "I"),
    ("long", "J"),
    ("float", "F"),
    ("double", "D"),
    ("void", "V"),
];

const LIST_TYPES: [&str; 7] = [
    "java.util.List",
    "java.util.ArrayList",
    "java.util.LinkedList",
    "java.util.Collection",
    "java.util.Vector",
    "java.util.Stack",
    "java.util.concurrent.CopyOnWriteArrayList",
];

const SET_TYPES: [&str; 5] = [
    "java.util.Set",
    "java.util.HashSet",
    "java.util.LinkedHashSet",
    "java.util.TreeSet",
    "java.util.SortedSet",
];

const MAP_TYPES: [&str; 6] = [
    "java.util.Map",
    "java.util.HashMap",
    "java.util.LinkedHashMap",
    "java.util.TreeMap",
    "java.util.SortedMap",
    "java.util.concurrent.ConcurrentHashMap",
];

fn signature_error<S: AsRef<str>>(signature: &str, msg: S) -> Error {
    Error::new(
        ErrorKind::TypeSignatureError,
        format!("invalid type signature `{}`: {}", signature, msg.as_ref()),
    )
}

/// the container kind of a class name, accepting the `java.util` short forms.
pub fn container_kind(name: &str) -> Option<ContainerKind> {
    let matches = |known: &[&str]| {
        known
            .iter()
            .any(|k| *k == name || k.rsplit('.').next() == Some(name))
    };
    if matches(&LIST_TYPES) {
        Some(ContainerKind::List)
    } else if matches(&SET_TYPES) {
        Some(ContainerKind::Set)
    } else if matches(&MAP_TYPES) {
        Some(ContainerKind::Map)
    } else {
        None
    }
}

fn qualify(name: &str) -> String {
    match name {
        "String" | "Object" | "Integer" | "Long" | "Short" | "Byte" | "Boolean" | "Double"
        | "Float" | "Character" => format!("java.lang.{}", name),
        _ if !name.contains('.') && container_kind(name).is_some() => format!("java.util.{}", name),
        _ => name.to_owned(),
    }
}

/// Parses a signature into its top-level parameter types.
///
/// An empty or blank signature is an error; use [`parse_optional`] where zero
/// parameters are acceptable.
pub fn parse(signature: &str) -> Result<Vec<TypeDescriptor>> {
    if signature.trim().is_empty() {
        return Err(signature_error(signature, "no parameter types given"));
    }
    check_balance(signature)?;
    split_top_level(signature)
        .into_iter()
        .map(|part| parse_one(signature, part))
        .collect()
}

pub fn parse_optional(signature: &str) -> Result<Vec<TypeDescriptor>> {
    if signature.trim().is_empty() {
        Ok(Vec::new())
    } else {
        parse(signature)
    }
}

fn check_balance(signature: &str) -> Result<()> {
    let mut stack = Vec::new();
    for (i, c) in signature.char_indices() {
        match c {
            '<' | '[' => stack.push(c),
            '>' | ']' => {
                let open = if c == '>' { '<' } else { '[' };
                if stack.pop() != Some(open) {
                    return Err(signature_error(
                        signature,
                        format!("unbalanced `{}` at offset {}", c, i),
                    ));
                }
            }
            _ => {}
        }
    }
    if let Some(open) = stack.pop() {
        return Err(signature_error(signature, format!("unclosed `{}`", open)));
    }
    Ok(())
}

fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '<' | '[' => depth += 1,
            '>' | ']' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn parse_one(signature: &str, part: &str) -> Result<TypeDescriptor> {
    let part = part.trim();
    if part.is_empty() {
        return Err(signature_error(signature, "empty parameter type"));
    }

    if let Some(component) = part.strip_suffix("[]") {
        return Ok(TypeDescriptor::ArrayOf(Box::new(parse_one(signature, component)?)));
    }

    // wildcards collapse to their bound
    if part == "?" {
        return Ok(TypeDescriptor::Named("java.lang.Object".to_owned()));
    }
    if let Some(bound) = part
        .strip_prefix("? extends ")
        .or_else(|| part.strip_prefix("? super "))
    {
        return parse_one(signature, bound);
    }

    if let Some(open) = part.find('<') {
        if !part.ends_with('>') {
            return Err(signature_error(
                signature,
                format!("unexpected text after `>` in `{}`", part),
            ));
        }
        let name = qualify(check_name(signature, part[..open].trim())?);
        let inner = &part[open + 1..part.len() - 1];
        let elements = split_top_level(inner)
            .into_iter()
            .map(|p| parse_one(signature, p))
            .collect::<Result<Vec<_>>>()?;

        return match container_kind(&name) {
            Some(kind) => {
                let arity_ok = match kind {
                    ContainerKind::List | ContainerKind::Set => elements.len() == 1,
                    ContainerKind::Map => elements.len() == 2,
                };
                if !arity_ok {
                    return Err(signature_error(
                        signature,
                        format!("`{}` takes {} type arguments", name, if kind == ContainerKind::Map { 2 } else { 1 }),
                    ));
                }
                Ok(TypeDescriptor::Generic { kind, name, elements })
            }
            // type arguments of other generic classes are erased
            None => Ok(TypeDescriptor::Named(name)),
        };
    }

    let name = check_name(signature, part)?;
    if PRIMITIVES.iter().any(|(p, _)| *p == name) {
        return Ok(TypeDescriptor::Primitive(name.to_owned()));
    }
    let name = qualify(name);
    match container_kind(&name) {
        Some(kind) => Ok(TypeDescriptor::Generic {
            kind,
            name,
            elements: Vec::new(),
        }),
        None => Ok(TypeDescriptor::Named(name)),
    }
}

fn check_name<'a>(signature: &str, name: &'a str) -> Result<&'a str> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '_' || c == '$');
    if valid {
        Ok(name)
    } else {
        Err(signature_error(signature, format!("`{}` is not a type name", name)))
    }
}

impl TypeDescriptor {
    pub fn named<S: Into<String>>(name: S) -> TypeDescriptor {
        TypeDescriptor::Named(name.into())
    }

    pub fn list_of(element: TypeDescriptor) -> TypeDescriptor {
        TypeDescriptor::Generic {
            kind: ContainerKind::List,
            name: "java.util.List".to_owned(),
            elements: vec![element],
        }
    }

    /// the JVM field descriptor used for the wire parameter signature.
    pub fn jvm_descriptor(&self) -> String {
        match self {
            TypeDescriptor::Primitive(name) => PRIMITIVES
                .iter()
                .find(|(p, _)| *p == name.as_str())
                .map(|(_, d)| (*d).to_owned())
                .unwrap_or_else(|| format!("L{};", name.replace('.', "/"))),
            TypeDescriptor::Named(name) | TypeDescriptor::Generic { name, .. } => {
                format!("L{};", name.replace('.', "/"))
            }
            TypeDescriptor::ArrayOf(component) => format!("[{}", component.jvm_descriptor()),
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, TypeDescriptor::Primitive(_))
    }

    /// whether a JSON array is the natural shape of this type.
    pub fn is_sequence(&self) -> bool {
        match self {
            TypeDescriptor::ArrayOf(_) => true,
            TypeDescriptor::Generic { kind, .. } => *kind != ContainerKind::Map,
            _ => false,
        }
    }

    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        let name = match self {
            TypeDescriptor::Primitive(name) | TypeDescriptor::Named(name) => name.as_str(),
            _ => return None,
        };
        let kind = match name {
            "boolean" | "java.lang.Boolean" => ScalarKind::Boolean,
            "byte" | "java.lang.Byte" => ScalarKind::Integral {
                min: i8::MIN as i64,
                max: i8::MAX as i64,
            },
            "short" | "java.lang.Short" => ScalarKind::Integral {
                min: i16::MIN as i64,
                max: i16::MAX as i64,
            },
            "int" | "java.lang.Integer" => ScalarKind::Integral {
                min: i32::MIN as i64,
                max: i32::MAX as i64,
            },
            "long" | "java.lang.Long" => ScalarKind::Integral {
                min: i64::MIN,
                max: i64::MAX,
            },
            "float" | "double" | "java.lang.Float" | "java.lang.Double" => ScalarKind::Floating,
            "char" | "java.lang.Character" => ScalarKind::Char,
            "java.lang.String" => ScalarKind::Text,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Primitive(name) | TypeDescriptor::Named(name) => f.write_str(name),
            TypeDescriptor::ArrayOf(component) => write!(f, "{}[]", component),
            TypeDescriptor::Generic { name, elements, .. } => {
                f.write_str(name)?;
                if !elements.is_empty() {
                    f.write_str("<")?;
                    f.write_str(&join(elements))?;
                    f.write_str(">")?;
                }
                Ok(())
            }
        }
    }
}

/// renders descriptors back into a comma-separated signature.
pub fn join(types: &[TypeDescriptor]) -> String {
    types
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// the concatenated JVM descriptors of a parameter list, e.g. `ILjava/lang/String;`.
pub fn jvm_parameter_descriptor(types: &[TypeDescriptor]) -> String {
    types.iter().map(|t| t.jvm_descriptor()).collect()
}
