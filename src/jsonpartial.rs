//! `JsonPartial` scoring: fraction of specified leaves found equal in the
//! request JSON. A leaf whose expected value is the string `"*"` is a
//! wildcard and is skipped (it never counts as a miss, nor raises the
//! denominator's weight beyond 1).

use serde_json::Value;

const WILDCARD: &str = "*";

/// Flatten a JSON value into `(path, leaf_value)` pairs, one per scalar,
/// null, or empty container leaf.
fn flatten(value: &Value, prefix: String, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (k, v) in map {
                let path = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(v, path, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, v) in items.iter().enumerate() {
                flatten(v, format!("{prefix}[{i}]"), out);
            }
        }
        other => out.push((prefix, other.clone())),
    }
}

/// Score an actual JSON document against a partial expectation: the fraction
/// of expected leaves present and equal (missing leaves count as a miss,
/// `"*"` leaves are skipped entirely). Returns 0.0 if there is no body.
pub fn score(actual: Option<&Value>, expected: &Value) -> f64 {
    let Some(actual) = actual else {
        return 0.0;
    };

    let mut expected_leaves = Vec::new();
    flatten(expected, String::new(), &mut expected_leaves);

    let mut actual_leaves = Vec::new();
    flatten(actual, String::new(), &mut actual_leaves);
    let actual_map: std::collections::HashMap<_, _> = actual_leaves.into_iter().collect();

    let scoreable: Vec<_> = expected_leaves
        .iter()
        .filter(|(_, v)| !(v.is_string() && v.as_str() == Some(WILDCARD)))
        .collect();

    if scoreable.is_empty() {
        return 1.0;
    }

    let matched = scoreable
        .iter()
        .filter(|(path, expected_value)| actual_map.get(path) == Some(expected_value))
        .count();

    matched as f64 / scoreable.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn full_match_scores_one() {
        let actual = json!({"a": 1, "b": {"c": 2}});
        let expected = json!({"a": 1, "b": {"c": 2}});
        assert_eq!(score(Some(&actual), &expected), 1.0);
    }

    #[test]
    fn missing_leaf_counts_as_miss() {
        let actual = json!({"a": 1});
        let expected = json!({"a": 1, "b": 2});
        assert_eq!(score(Some(&actual), &expected), 0.5);
    }

    #[test]
    fn wildcard_leaf_is_skipped() {
        let actual = json!({"a": 1, "b": "anything"});
        let expected = json!({"a": 1, "b": "*"});
        assert_eq!(score(Some(&actual), &expected), 1.0);
    }

    #[test]
    fn no_body_scores_zero() {
        let expected = json!({"a": 1});
        assert_eq!(score(None, &expected), 0.0);
    }
}
