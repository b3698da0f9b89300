//! Conversion between the `tags` attribute and the ARM `tags` object.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Build the request `tags` object from configuration.
///
/// Non-string values are rendered as their JSON text; `null` becomes an empty object.
pub fn expand(tags: Option<&Value>) -> BTreeMap<String, String> {
    tags.and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Convert an API `tags` object back into state. Missing tags flatten to `{}`.
pub fn flatten(tags: Option<&Value>) -> Value {
    let mut out = Map::new();
    if let Some(map) = tags.and_then(Value::as_object) {
        for (k, v) in map {
            let v = match v {
                Value::String(s) => Value::String(s.clone()),
                Value::Null => Value::String(String::new()),
                other => Value::String(other.to_string()),
            };
            out.insert(k.clone(), v);
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expand() {
        let tags = expand(Some(&json!({"env": "prod", "cost": 10})));
        assert_eq!(tags.get("env").map(String::as_str), Some("prod"));
        assert_eq!(tags.get("cost").map(String::as_str), Some("10"));
        assert!(expand(None).is_empty());
        assert!(expand(Some(&Value::Null)).is_empty());
    }

    #[test]
    fn test_flatten() {
        assert_eq!(flatten(Some(&json!({"env": "prod"}))), json!({"env": "prod"}));
        assert_eq!(flatten(None), json!({}));
    }
}
