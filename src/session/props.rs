use crate::model::{FieldKind, Value};

/// Converts a renderer-supplied JSON value for a field of `kind`.
///
/// Only scalar kinds can be edited from the renderer; `None` means the
/// value cannot be stored in such a field.
pub(crate) fn value_from_json(kind: FieldKind, json: &serde_json::Value) -> Option<Value> {
    if json.is_null() {
        return match kind {
            FieldKind::List | FieldKind::Map | FieldKind::Object => None,
            _ => Some(Value::Null),
        };
    }
    match kind {
        FieldKind::Bool => json.as_bool().map(Value::Bool),
        FieldKind::Int => json.as_i64().or_else(|| integral(json)).map(Value::Int),
        FieldKind::Float => json.as_f64().map(Value::Float),
        FieldKind::Text => json.as_str().map(|s| Value::Text(s.to_string())),
        FieldKind::Enum(_) => json.as_str().map(|s| Value::Enum(s.to_string())),
        FieldKind::Object | FieldKind::List | FieldKind::Map => None,
    }
}

// Renderers that only speak doubles send `3.0` for an integer field.
fn integral(json: &serde_json::Value) -> Option<i64> {
    let f = json.as_f64()?;
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
}
