//! Small accessors over the dynamic, vendor-defined JSON payloads the
//! stdio and WebSocket adapters dispatch on, so call sites read like
//! `get_str(value, "type")` instead of a chain of `.get().and_then()`.

use serde_json::Value;

/// Reads a string field, or `None` if absent/wrong type.
pub fn get_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Reads an integer field, or `None` if absent/wrong type.
pub fn get_i64(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(Value::as_i64)
}

/// Reads a boolean field, defaulting to `false` if absent/wrong type.
pub fn get_bool(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Reads a nested object field, or `None` if absent/wrong type.
pub fn get_obj<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key).filter(|v| v.is_object())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accessors_read_present_fields() {
        let value = json!({"type": "ping", "count": 3, "is_error": true, "usage": {"in": 1}});
        assert_eq!(get_str(&value, "type"), Some("ping"));
        assert_eq!(get_i64(&value, "count"), Some(3));
        assert!(get_bool(&value, "is_error"));
        assert!(get_obj(&value, "usage").is_some());
    }

    #[test]
    fn accessors_are_none_on_missing_or_wrong_type() {
        let value = json!({"type": "ping"});
        assert_eq!(get_str(&value, "missing"), None);
        assert_eq!(get_i64(&value, "type"), None);
        assert!(!get_bool(&value, "missing"));
        assert!(get_obj(&value, "type").is_none());
    }
}
