//! Layered document merge
//!
//! Pure function over two generic documents. Layers are folded in precedence
//! order bundled < company < user < project, each overlaying the previous.
//!
//! Rules:
//! - objects merge key by key, recursively
//! - a `null` overlay value removes the key
//! - scalars and plain lists replace the base value
//! - a list whose first element is a marker string changes list handling:
//!   - `$append`: base items followed by the overlay items
//!   - `$remove`: base items minus overlay items (matched by equality, or by
//!     `id` when the overlay item is a string and the base item an object)
//!   - `$merge-by-id`: objects with the same `id` are merged recursively, new
//!     ids are appended
//!   - `$replace`: the overlay items, explicitly

use serde_json::{Map, Value};

pub const APPEND: &str = "$append";
pub const REMOVE: &str = "$remove";
pub const MERGE_BY_ID: &str = "$merge-by-id";
pub const REPLACE: &str = "$replace";

/// Overlay `overlay` onto `base`, returning the merged document.
pub fn merge_documents(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(b), Value::Object(o)) => Value::Object(merge_objects(b, o)),
        (_, Value::Array(items)) => merge_list(base, items),
        (_, other) => strip_markers(other),
    }
}

/// Fold a sequence of layers, lowest precedence first.
pub fn merge_layers<'a>(layers: impl IntoIterator<Item = &'a Value>) -> Value {
    layers
        .into_iter()
        .fold(Value::Object(Map::new()), |acc, layer| merge_documents(&acc, layer))
}

fn merge_objects(base: &Map<String, Value>, overlay: &Map<String, Value>) -> Map<String, Value> {
    let mut out = base.clone();
    for (key, value) in overlay {
        if value.is_null() {
            out.remove(key);
            continue;
        }
        let merged = match out.get(key) {
            Some(existing) => merge_documents(existing, value),
            None => strip_markers(value),
        };
        out.insert(key.clone(), merged);
    }
    out
}

fn merge_list(base: &Value, items: &[Value]) -> Value {
    let marker = items.first().and_then(|v| v.as_str()).filter(|s| {
        matches!(*s, APPEND | REMOVE | MERGE_BY_ID | REPLACE)
    });

    let Some(marker) = marker else {
        return Value::Array(items.iter().map(strip_markers).collect());
    };

    let rest: Vec<Value> = items[1..].iter().map(strip_markers).collect();
    let base_items: Vec<Value> = match base {
        Value::Array(b) => b.clone(),
        _ => Vec::new(),
    };

    match marker {
        APPEND => {
            let mut out = base_items;
            out.extend(rest);
            Value::Array(out)
        }
        REMOVE => Value::Array(
            base_items
                .into_iter()
                .filter(|item| !rest.iter().any(|r| matches_for_removal(item, r)))
                .collect(),
        ),
        MERGE_BY_ID => {
            let mut out = base_items;
            for item in rest {
                let position = item_id(&item)
                    .and_then(|id| out.iter().position(|b| item_id(b) == Some(id)));
                match position {
                    Some(i) => {
                        let merged = merge_documents(&out[i], &item);
                        out[i] = merged;
                    }
                    None => out.push(item),
                }
            }
            Value::Array(out)
        }
        _ => Value::Array(rest),
    }
}

fn item_id(value: &Value) -> Option<&str> {
    value.get("id").and_then(|v| v.as_str())
}

fn matches_for_removal(item: &Value, pattern: &Value) -> bool {
    if item == pattern {
        return true;
    }
    match (item_id(item), pattern) {
        (Some(id), Value::String(p)) => id == p,
        (Some(id), Value::Object(_)) => item_id(pattern) == Some(id),
        _ => false,
    }
}

// Markers only mean something relative to a base; a layer introducing a
// fresh list must not leak them into the result.
fn strip_markers(value: &Value) -> Value {
    match value {
        Value::Array(items) => {
            let marker = items.first().and_then(|v| v.as_str());
            match marker {
                Some(REMOVE) => Value::Array(Vec::new()),
                Some(APPEND | MERGE_BY_ID | REPLACE) => {
                    Value::Array(items[1..].iter().map(strip_markers).collect())
                }
                _ => Value::Array(items.iter().map(strip_markers).collect()),
            }
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_markers(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_objects_merge_recursively() {
        let base = json!({"validation": {"max_rounds": 3, "max_concurrent": 4}});
        let overlay = json!({"validation": {"max_rounds": 5}});
        assert_eq!(
            merge_documents(&base, &overlay),
            json!({"validation": {"max_rounds": 5, "max_concurrent": 4}})
        );
    }

    #[test]
    fn test_null_removes_key() {
        let base = json!({"a": 1, "b": 2});
        assert_eq!(merge_documents(&base, &json!({"b": null})), json!({"a": 1}));
    }

    #[test]
    fn test_plain_list_replaces() {
        let base = json!({"flags": ["-a", "-b"]});
        let overlay = json!({"flags": ["-c"]});
        assert_eq!(merge_documents(&base, &overlay), json!({"flags": ["-c"]}));
    }

    #[test]
    fn test_append_marker() {
        let base = json!(["a", "b"]);
        assert_eq!(merge_documents(&base, &json!(["$append", "c"])), json!(["a", "b", "c"]));
    }

    #[test]
    fn test_remove_marker_by_value_and_id() {
        let base = json!(["a", "b", "c"]);
        assert_eq!(merge_documents(&base, &json!(["$remove", "b"])), json!(["a", "c"]));

        let base = json!([{"id": "x", "wave": "global"}, {"id": "y", "wave": "critical"}]);
        assert_eq!(
            merge_documents(&base, &json!(["$remove", "x"])),
            json!([{"id": "y", "wave": "critical"}])
        );
    }

    #[test]
    fn test_merge_by_id_marker() {
        let base = json!([
            {"id": "global-codex", "engine": "codex", "blocking": true},
            {"id": "security", "engine": "claude"}
        ]);
        let overlay = json!([
            "$merge-by-id",
            {"id": "global-codex", "blocking": false},
            {"id": "perf", "engine": "gemini"}
        ]);
        assert_eq!(
            merge_documents(&base, &overlay),
            json!([
                {"id": "global-codex", "engine": "codex", "blocking": false},
                {"id": "security", "engine": "claude"},
                {"id": "perf", "engine": "gemini"}
            ])
        );
    }

    #[test]
    fn test_replace_marker() {
        let base = json!(["a", "b"]);
        assert_eq!(merge_documents(&base, &json!(["$replace", "z"])), json!(["z"]));
    }

    #[test]
    fn test_markers_on_fresh_keys_are_stripped() {
        let base = json!({});
        let overlay = json!({"list": ["$append", "a"], "gone": ["$remove", "x"]});
        assert_eq!(
            merge_documents(&base, &overlay),
            json!({"list": ["a"], "gone": []})
        );
    }

    #[test]
    fn test_layer_precedence() {
        let bundled = json!({"lock": {"timeout_seconds": 30}, "preset": "standard"});
        let company = json!({"lock": {"timeout_seconds": 60}});
        let user = json!({"preset": "quick"});
        let project = json!({"lock": {"timeout_seconds": 10}});
        assert_eq!(
            merge_layers([&bundled, &company, &user, &project]),
            json!({"lock": {"timeout_seconds": 10}, "preset": "quick"})
        );
    }
}
