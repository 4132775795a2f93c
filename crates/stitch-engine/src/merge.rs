//! Output-merge rules shared by Collector fan-in and the callback protocol.

use serde_json::Value;

/// Object-merges `updates` over `base` in order, last write wins on key
/// clash. Used for Collector fan-in (`base = {}`, `updates` = predecessor
/// outputs in adjacency order).
pub fn merge_objects<'a>(values: impl IntoIterator<Item = &'a Value>) -> Value {
  let mut merged = serde_json::Map::new();
  for value in values {
    if let Value::Object(map) = value {
      for (k, v) in map {
        merged.insert(k.clone(), v.clone());
      }
    }
  }
  Value::Object(merged)
}

/// Merges a callback's `output` over a node's stored pass-through `input`.
/// If either side is not an object, falls back to `{input, output}` rather
/// than silently dropping data.
pub fn merge_callback_output(stored_input: Option<&Value>, new_output: Option<&Value>) -> Value {
  match (stored_input, new_output) {
    (Some(Value::Object(a)), Some(Value::Object(b))) => {
      let mut merged = a.clone();
      for (k, v) in b {
        merged.insert(k.clone(), v.clone());
      }
      Value::Object(merged)
    }
    (None, Some(output)) => output.clone(),
    (Some(input), None) => input.clone(),
    (Some(input), Some(output)) => serde_json::json!({ "input": input, "output": output }),
    (None, None) => Value::Object(serde_json::Map::new()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn merge_objects_last_write_wins() {
    let a = serde_json::json!({"x": 1, "y": 1});
    let b = serde_json::json!({"y": 2});
    let merged = merge_objects([&a, &b]);
    assert_eq!(merged, serde_json::json!({"x": 1, "y": 2}));
  }

  #[test]
  fn callback_merge_over_object_input() {
    let input = serde_json::json!({"a": 1});
    let output = serde_json::json!({"b": 2});
    let merged = merge_callback_output(Some(&input), Some(&output));
    assert_eq!(merged, serde_json::json!({"a": 1, "b": 2}));
  }

  #[test]
  fn callback_merge_falls_back_when_non_object() {
    let input = serde_json::json!("raw-string-input");
    let output = serde_json::json!({"b": 2});
    let merged = merge_callback_output(Some(&input), Some(&output));
    assert_eq!(merged, serde_json::json!({"input": "raw-string-input", "output": {"b": 2}}));
  }
}
