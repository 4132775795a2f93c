//! Minimal dot-path JSON resolution, used by the generic entity-extraction
//! fallback. Array indices are written `[n]`, e.g. `answers[0].email`.

use serde_json::Value;

pub fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
  path
    .split('.')
    .filter(|s| !s.is_empty())
    .try_fold(value, resolve_segment)
}

/// Resolves one dot-separated segment, which may carry zero or more
/// trailing `[n]` index suffixes (e.g. `answers[0]`, or bare `[2]`):
/// the key (if any) is looked up first, then each bracketed index walks
/// into the resulting array in turn.
fn resolve_segment<'a>(cur: &'a Value, segment: &str) -> Option<&'a Value> {
  let key_end = segment.find('[').unwrap_or(segment.len());
  let (key, mut rest) = segment.split_at(key_end);

  let mut current = if key.is_empty() { cur } else { cur.get(key)? };

  while let Some(after_bracket) = rest.strip_prefix('[') {
    let close = after_bracket.find(']')?;
    let index: usize = after_bracket[..close].parse().ok()?;
    current = current.as_array()?.get(index)?;
    rest = &after_bracket[close + 1..];
  }

  Some(current)
}

pub fn resolve_string(value: &Value, path: &str) -> Option<String> {
  resolve(value, path).and_then(|v| match v {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  })
}
