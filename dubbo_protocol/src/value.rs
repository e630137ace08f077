/// The intermediate value model shared by the marshaller and the Hessian codec.
///
/// Maps and struct fields keep insertion order; Hessian class definitions list
/// fields in the order they are first written.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    List(Vec<WireValue>),
    Map(Vec<(WireValue, WireValue)>),
    Struct {
        type_name: String,
        fields: Vec<(String, WireValue)>,
    },
}

impl WireValue {
    pub fn string<S: Into<String>>(s: S) -> WireValue {
        WireValue::String(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, WireValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            WireValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// looks up a struct field, or a map entry with a string key.
    pub fn field(&self, name: &str) -> Option<&WireValue> {
        match self {
            WireValue::Struct { fields, .. } => {
                fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
            }
            WireValue::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(name))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// the declared class of a struct; empty for untyped maps.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            WireValue::Struct { type_name, .. } => Some(type_name),
            _ => None,
        }
    }
}

impl From<&str> for WireValue {
    fn from(s: &str) -> Self {
        WireValue::String(s.to_owned())
    }
}

impl From<String> for WireValue {
    fn from(s: String) -> Self {
        WireValue::String(s)
    }
}

impl From<i64> for WireValue {
    fn from(v: i64) -> Self {
        WireValue::Int64(v)
    }
}

impl From<i32> for WireValue {
    fn from(v: i32) -> Self {
        WireValue::Int64(v as i64)
    }
}

impl From<bool> for WireValue {
    fn from(v: bool) -> Self {
        WireValue::Bool(v)
    }
}

impl From<f64> for WireValue {
    fn from(v: f64) -> Self {
        WireValue::Float64(v)
    }
}
