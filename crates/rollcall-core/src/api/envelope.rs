//! Normalization of the response envelopes the remote service uses.
//!
//! The same endpoint family answers with a bare value, `{ "data": v }` or
//! `{ "data": { "data": v } }`. Everything is reduced to the inner value.

use serde_json::Value;

use super::ApiError;

/// Maximum envelope depth we unwrap.
const MAX_ENVELOPE_DEPTH: usize = 2;

/// Unwrap up to two `data` layers.
pub fn unwrap_envelope(mut value: Value) -> Value {
    for _ in 0..MAX_ENVELOPE_DEPTH {
        match value {
            Value::Object(mut map) if map.contains_key("data") => {
                value = map.remove("data").unwrap_or(Value::Null);
            }
            other => return other,
        }
    }
    value
}

/// Records of a list partition. `null` means no data.
pub fn records(value: Value) -> Result<Vec<Value>, ApiError> {
    match unwrap_envelope(value) {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(ApiError::InvalidResponse(format!(
            "expected a list, got {}",
            kind(&other)
        ))),
    }
}

/// Single-object partition. `null` and an empty list mean no data; a list
/// holding objects yields its first element.
pub fn object(value: Value) -> Result<Option<serde_json::Map<String, Value>>, ApiError> {
    match unwrap_envelope(value) {
        Value::Object(map) => Ok(Some(map)),
        Value::Null => Ok(None),
        Value::Array(items) => match items.into_iter().next() {
            Some(Value::Object(map)) => Ok(Some(map)),
            None => Ok(None),
            Some(other) => Err(ApiError::InvalidResponse(format!(
                "expected an object, got a list of {}",
                kind(&other)
            ))),
        },
        other => Err(ApiError::InvalidResponse(format!(
            "expected an object, got {}",
            kind(&other)
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_three_envelope_shapes_normalize_equally() {
        let bare = json!([{"id": 1}, {"id": 2}]);
        let single = json!({"data": [{"id": 1}, {"id": 2}]});
        let double = json!({"data": {"data": [{"id": 1}, {"id": 2}]}});

        let expected = records(bare).unwrap();
        assert_eq!(expected.len(), 2);
        assert_eq!(records(single).unwrap(), expected);
        assert_eq!(records(double).unwrap(), expected);
    }

    #[test]
    fn test_null_and_empty_are_no_data() {
        assert!(records(json!(null)).unwrap().is_empty());
        assert!(records(json!({"data": null})).unwrap().is_empty());
        assert!(records(json!({"data": []})).unwrap().is_empty());
        assert_eq!(object(json!({"data": null})).unwrap(), None);
        assert_eq!(object(json!([])).unwrap(), None);
    }

    #[test]
    fn test_object_partition_shapes() {
        let menu = json!({"main": "nasi goreng"});
        let expected = object(menu.clone()).unwrap().unwrap();
        assert_eq!(object(json!({"data": menu.clone()})).unwrap().unwrap(), expected);
        assert_eq!(
            object(json!({"data": {"data": menu.clone()}})).unwrap().unwrap(),
            expected
        );
        assert_eq!(object(json!([menu])).unwrap().unwrap(), expected);
    }

    #[test]
    fn test_unexpected_shapes_are_invalid() {
        assert!(matches!(
            records(json!({"items": []})),
            Err(ApiError::InvalidResponse(_))
        ));
        assert!(matches!(records(json!("oops")), Err(ApiError::InvalidResponse(_))));
        assert!(matches!(object(json!(5)), Err(ApiError::InvalidResponse(_))));
    }
}
