use serde_json::{Map, Value};

/// Recursively merges `source` into `target`.
///
/// Nested maps are merged key by key; every other value (arrays included)
/// replaces whatever `target` held under the same key.
pub fn deep_merge(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Overwrites the top-level keys of `target` with those of `patch`.
pub fn shallow_merge(mut target: Map<String, Value>, patch: &Map<String, Value>) -> Map<String, Value> {
    for (key, value) in patch {
        target.insert(key.clone(), value.clone());
    }
    target
}
