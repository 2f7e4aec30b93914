use serde_json::Value;

/// Present and meaningful: not null, false, zero, blank, or empty.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.trim().is_empty(),
        Value::Array(values) => !values.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

pub fn is_present(value: Option<&Value>) -> bool {
    value.is_some_and(is_truthy)
}
