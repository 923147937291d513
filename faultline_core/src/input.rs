use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of value kinds the mutation engine understands.
///
/// Every candidate input is a `serde_json::Value` of one of these kinds;
/// `Null` never appears as a top-level fuzz value. Keeping this a real enum
/// (instead of free-form type-name strings) lets strategy dispatch be checked
/// exhaustively at compile time.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    /// Classifies a JSON value. Returns `None` for `Null`, which is not a
    /// mutable kind.
    pub fn of(value: &Value) -> Option<ParamType> {
        match value {
            Value::String(_) => Some(ParamType::String),
            Value::Number(_) => Some(ParamType::Number),
            Value::Bool(_) => Some(ParamType::Boolean),
            Value::Object(_) => Some(ParamType::Object),
            Value::Array(_) => Some(ParamType::Array),
            Value::Null => None,
        }
    }

    /// A neutral default value of this kind, used to pad multi-parameter
    /// candidates before a boundary value is substituted in.
    pub fn default_value(&self) -> Value {
        match self {
            ParamType::String => Value::String(String::new()),
            ParamType::Number => Value::from(0),
            ParamType::Boolean => Value::Bool(false),
            ParamType::Object => Value::Object(serde_json::Map::new()),
            ParamType::Array => Value::Array(Vec::new()),
        }
    }
}

/// Canonical serialized form of a fuzz value.
///
/// `serde_json` keeps object keys in a sorted map, so this is deterministic
/// for equal values and safe to hash for identity.
pub fn canonical_text(value: &Value) -> String {
    value.to_string()
}

/// Canonical byte form, as delivered to the execution adapter. Text-safe by
/// construction, which also covers the persistence contract for seed content.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    canonical_text(value).into_bytes()
}

/// Size of a value in bytes of its canonical form.
pub fn byte_len(value: &Value) -> usize {
    canonical_text(value).len()
}

/// Stable content identity: md5 hex digest of the canonical form.
/// Two structurally equal values always map to the same id.
pub fn content_id(value: &Value) -> String {
    format!("{:x}", md5::compute(canonical_text(value).as_bytes()))
}
