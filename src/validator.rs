//! Comparison helpers shared by the built-in assertions and
//! extractors.

use serde_json::Value;
use std::collections::HashMap;

/// Walk a dotted path through objects and arrays. Numeric segments
/// index arrays; an empty path returns the value itself.
pub fn get_by_json_path<'a>(json: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = json;

    for part in path.split('.').filter(|p| !p.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// One error per expected text missing from `body`.
pub fn validate_contains(body: &str, texts: &[String]) -> Vec<String> {
    texts
        .iter()
        .filter(|text| !body.contains(text.as_str()))
        .map(|text| format!("response body does not contain '{text}'"))
        .collect()
}

/// One error per expected header that is missing or differs. Header
/// names compare case-insensitively; `actual` keys must be lowercase.
pub fn validate_headers(
    actual: &HashMap<String, String>,
    expected: &[(String, String)],
) -> Vec<String> {
    let mut errors = Vec::new();

    for (name, want) in expected {
        match actual.get(&name.to_ascii_lowercase()) {
            Some(got) if got == want => {}
            Some(got) => errors.push(format!(
                "header '{name}' mismatch: expected '{want}', got '{got}'"
            )),
            None => errors.push(format!("header '{name}' missing from response")),
        }
    }

    errors
}

/// Describe the first difference between two JSON values, or `None`
/// when they are equal.
pub fn json_difference(expected: &Value, actual: &Value) -> Option<String> {
    diff_at("$", expected, actual)
}

fn diff_at(path: &str, expected: &Value, actual: &Value) -> Option<String> {
    match (expected, actual) {
        (Value::Object(want), Value::Object(got)) => {
            for (key, w) in want {
                let child = format!("{path}.{key}");
                match got.get(key) {
                    Some(g) => {
                        if let Some(diff) = diff_at(&child, w, g) {
                            return Some(diff);
                        }
                    }
                    None => return Some(format!("{child} is missing")),
                }
            }
            got.keys()
                .find(|key| !want.contains_key(*key))
                .map(|key| format!("{path}.{key} is unexpected"))
        }
        (Value::Array(want), Value::Array(got)) => {
            if want.len() != got.len() {
                return Some(format!(
                    "{path} has {} element(s), expected {}",
                    got.len(),
                    want.len()
                ));
            }
            want.iter()
                .zip(got)
                .enumerate()
                .find_map(|(i, (w, g))| diff_at(&format!("{path}[{i}]"), w, g))
        }
        _ if expected == actual => None,
        _ => Some(format!("{path}: expected {expected}, got {actual}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_by_json_path() {
        let doc = json!({"data": {"items": [{"id": "a"}, {"id": "b"}], "n": 3}});
        assert_eq!(get_by_json_path(&doc, "data.n"), Some(&json!(3)));
        assert_eq!(get_by_json_path(&doc, "data.items.1.id"), Some(&json!("b")));
        assert_eq!(get_by_json_path(&doc, ""), Some(&doc));
        assert_eq!(get_by_json_path(&doc, "data.items.9"), None);
        assert_eq!(get_by_json_path(&doc, "data.n.x"), None);
        assert_eq!(get_by_json_path(&doc, "data.items.x"), None);
    }

    #[test]
    fn test_validate_contains() {
        let errors = validate_contains(
            "Hello runner world",
            &["runner".to_string(), "absent".to_string()],
        );
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("absent"));
    }

    #[test]
    fn test_validate_headers() {
        let actual = HashMap::from([("x-test".to_string(), "ok".to_string())]);
        let ok = validate_headers(&actual, &[("X-Test".to_string(), "ok".to_string())]);
        assert!(ok.is_empty());

        let errors = validate_headers(
            &actual,
            &[
                ("x-test".to_string(), "bad".to_string()),
                ("x-missing".to_string(), "1".to_string()),
            ],
        );
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_json_difference() {
        assert_eq!(json_difference(&json!({"a": [1, 2]}), &json!({"a": [1, 2]})), None);
        assert_eq!(
            json_difference(&json!({"a": 1}), &json!({"a": 2})).unwrap(),
            "$.a: expected 1, got 2"
        );
        assert_eq!(
            json_difference(&json!({"a": 1}), &json!({})).unwrap(),
            "$.a is missing"
        );
        assert_eq!(
            json_difference(&json!({}), &json!({"b": 1})).unwrap(),
            "$.b is unexpected"
        );
        assert_eq!(
            json_difference(&json!([1]), &json!([1, 2])).unwrap(),
            "$ has 2 element(s), expected 1"
        );
        assert_eq!(
            json_difference(&json!({"l": [{"x": 1}]}), &json!({"l": [{"x": "1"}]})).unwrap(),
            "$.l[0].x: expected 1, got \"1\""
        );
    }
}
