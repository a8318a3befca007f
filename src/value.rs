//! Helpers over the open structured-value domain.
//!
//! Event payloads and `eq` operands are `serde_json::Value`s. Equality here
//! is by value: numbers compare numerically regardless of their integer or
//! float representation, arrays element-wise, objects key-wise.

use serde_json::{Map, Number, Value};

/// Look up a named field of a payload. Non-object payloads have no fields.
#[must_use]
pub fn field<'a>(data: &'a Value, name: &str) -> Option<&'a Value> {
    data.as_object().and_then(|m| m.get(name))
}

/// Deep value equality.
#[must_use]
pub fn structurally_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| structurally_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => objects_equal(x, y),
        _ => false,
    }
}

fn objects_equal(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .all(|(k, v)| b.get(k).is_some_and(|other| structurally_equal(v, other)))
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    // One side is a float, or the integers sit on opposite sides of i64::MAX.
    // Integers past 2^53 lose precision here and may equal a nearby float.
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}
