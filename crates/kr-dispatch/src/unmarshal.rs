//! Typed stream attribute values (`{"S": ..}`, `{"N": ..}`, ...) to plain JSON.

use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnmarshalError {
    #[error("attribute value must be an object with one type tag")]
    NotTagged,
    #[error("unsupported attribute type {0}")]
    UnsupportedType(String),
    #[error("malformed {tag} value")]
    Malformed { tag: &'static str },
    #[error("invalid number {0}")]
    BadNumber(String),
}

fn number(raw: &str) -> Result<Value, UnmarshalError> {
    let trimmed = raw.trim();
    if let Ok(int) = trimmed.parse::<i64>() {
        return Ok(Value::Number(int.into()));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| UnmarshalError::BadNumber(raw.to_string()))
}

fn strings<'v>(value: &'v Value, tag: &'static str) -> Result<Vec<&'v str>, UnmarshalError> {
    value
        .as_array()
        .ok_or(UnmarshalError::Malformed { tag })?
        .iter()
        .map(|v| v.as_str().ok_or(UnmarshalError::Malformed { tag }))
        .collect()
}

pub fn unmarshal_value(value: &Value) -> Result<Value, UnmarshalError> {
    let object = value.as_object().filter(|o| o.len() == 1).ok_or(UnmarshalError::NotTagged)?;
    let (tag, inner) = object.iter().next().ok_or(UnmarshalError::NotTagged)?;
    match tag.as_str() {
        "S" => inner
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or(UnmarshalError::Malformed { tag: "S" }),
        "N" => number(inner.as_str().ok_or(UnmarshalError::Malformed { tag: "N" })?),
        "BOOL" => inner
            .as_bool()
            .map(Value::Bool)
            .ok_or(UnmarshalError::Malformed { tag: "BOOL" }),
        "NULL" => Ok(Value::Null),
        "M" => inner
            .as_object()
            .ok_or(UnmarshalError::Malformed { tag: "M" })
            .and_then(unmarshal_image)
            .map(Value::Object),
        "L" => inner
            .as_array()
            .ok_or(UnmarshalError::Malformed { tag: "L" })?
            .iter()
            .map(unmarshal_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        "SS" => Ok(Value::Array(
            strings(inner, "SS")?
                .into_iter()
                .map(|s| Value::String(s.to_string()))
                .collect(),
        )),
        "NS" => strings(inner, "NS")?
            .into_iter()
            .map(number)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Err(UnmarshalError::UnsupportedType(other.to_string())),
    }
}

/// A whole `NewImage` / `OldImage` map.
pub fn unmarshal_image(image: &Map<String, Value>) -> Result<Map<String, Value>, UnmarshalError> {
    image
        .iter()
        .map(|(name, value)| unmarshal_value(value).map(|v| (name.clone(), v)))
        .collect()
}
