//! Positional-argument decoding.
//!
//! Handlers receive `args` as a JSON array. [`decode_args`] maps it onto an
//! ordered field description, producing typed values in array order. The
//! contract is *direct set on scalar kinds*: a scalar field takes exactly
//! the JSON value at its position — `null`, missing positions, lossy
//! numeric conversions, and non-scalar kinds are all per-field errors.
//! Composite values go through [`crate::Msg::typed_args`] instead.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Integer,
    Float,
    Bool,
    /// Arrays and objects. Refused by [`decode_args`]; use
    /// [`crate::Msg::typed_args`] for these.
    Composite,
}

/// One position of the expected argument list.
#[derive(Debug, Clone)]
pub struct ArgField {
    pub name: String,
    pub kind: ArgKind,
}

impl ArgField {
    pub fn new(name: impl Into<String>, kind: ArgKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ArgsError {
    #[error("missing argument for field `{0}`")]
    Missing(String),

    #[error("field `{field}` expected {expected}, got {found}")]
    Mismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("field `{0}` has a composite kind; decode it with `Msg::typed_args`")]
    Composite(String),
}

/// Decode `args` against `fields`, in order.
pub fn decode_args(args: &[Value], fields: &[ArgField]) -> Result<Vec<ArgValue>, ArgsError> {
    fields
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            let value = args
                .get(idx)
                .ok_or_else(|| ArgsError::Missing(field.name.clone()))?;
            decode_one(field, value)
        })
        .collect()
}

fn decode_one(field: &ArgField, value: &Value) -> Result<ArgValue, ArgsError> {
    let mismatch = |expected: &'static str| ArgsError::Mismatch {
        field: field.name.clone(),
        expected,
        found: type_name(value),
    };
    match field.kind {
        ArgKind::String => value
            .as_str()
            .map(|s| ArgValue::String(s.to_string()))
            .ok_or_else(|| mismatch("a string")),
        // `as_i64` refuses fractional values and out-of-range magnitudes,
        // which is exactly the no-lossy-conversion contract.
        ArgKind::Integer => value
            .as_i64()
            .map(ArgValue::Integer)
            .ok_or_else(|| mismatch("an integer")),
        ArgKind::Float => value
            .as_f64()
            .map(ArgValue::Float)
            .ok_or_else(|| mismatch("a number")),
        ArgKind::Bool => value
            .as_bool()
            .map(ArgValue::Bool)
            .ok_or_else(|| mismatch("a boolean")),
        ArgKind::Composite => Err(ArgsError::Composite(field.name.clone())),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "an integer",
        Value::Number(_) => "a float",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
