//! Local copy of a subscribed subtree.
//!
//! The streaming endpoint only sends deltas (`put` replaces the value at a
//! relative path, `patch` merges children), so the listener keeps a mirror
//! and hands out full snapshots. Writing `null` deletes.

use serde_json::{Map, Value};

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Replace the value at `path` (relative to `root`) with `data`
pub fn apply_put(root: &mut Value, path: &str, data: Value) {
    let segments = segments(path);
    let Some((last, parents)) = segments.split_last() else {
        *root = data;
        return;
    };

    if data.is_null() {
        remove_at(root, &segments);
        if is_empty_object(root) {
            *root = Value::Null;
        }
        return;
    }

    let mut node = root;
    for segment in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map.entry(segment.to_string()).or_insert(Value::Null),
            _ => return,
        };
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        map.insert(last.to_string(), data);
    }
}

fn is_empty_object(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.is_empty())
}

/// Delete the child at `segments`, then every ancestor left without
/// children: the database has no empty nodes.
fn remove_at(node: &mut Value, segments: &[&str]) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    let Value::Object(map) = node else {
        return;
    };

    let emptied = if rest.is_empty() {
        true
    } else {
        match map.get_mut(*first) {
            Some(child) => {
                remove_at(child, rest);
                is_empty_object(child)
            }
            None => false,
        }
    };

    if emptied {
        // retain keeps the remaining keys in wire order
        map.retain(|key, _| key.as_str() != *first);
    }
}

/// Merge every child of `data` under `path`
pub fn apply_patch(root: &mut Value, path: &str, data: Value) {
    match data {
        Value::Object(children) => {
            let base = path.trim_end_matches('/');
            for (key, value) in children {
                apply_put(root, &format!("{}/{}", base, key), value);
            }
        }
        // a patch always carries an object; treat anything else as a put
        other => apply_put(root, path, other),
    }
}

/// Value at `path`, or `null` when any segment is missing
pub fn value_at(root: &Value, path: &str) -> Value {
    let mut node = root;
    for segment in segments(path) {
        match node.get(segment) {
            Some(child) => node = child,
            None => return Value::Null,
        }
    }
    node.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_at_root_replaces_everything() {
        let mut root = json!({"A": {"latitude": 1}});
        apply_put(&mut root, "/", json!({"B": {"latitude": 2}}));
        assert_eq!(root, json!({"B": {"latitude": 2}}));
    }

    #[test]
    fn put_nested_creates_parents() {
        let mut root = Value::Null;
        apply_put(&mut root, "/A/latitude", json!("1.5"));
        assert_eq!(root, json!({"A": {"latitude": "1.5"}}));
    }

    #[test]
    fn put_null_deletes_key() {
        let mut root = json!({"A": {"latitude": 1}, "B": {"latitude": 2}});
        apply_put(&mut root, "/A", Value::Null);
        assert_eq!(root, json!({"B": {"latitude": 2}}));
    }

    #[test]
    fn put_null_under_missing_parent_is_noop() {
        let mut root = json!({"A": 1});
        apply_put(&mut root, "/B/latitude", Value::Null);
        assert_eq!(root, json!({"A": 1}));
    }

    #[test]
    fn deleting_only_child_removes_emptied_parent() {
        let mut root = json!({"A": {"latitude": 1}, "B": {"latitude": 2}});
        apply_put(&mut root, "/A/latitude", Value::Null);
        assert_eq!(root, json!({"B": {"latitude": 2}}));
    }

    #[test]
    fn pruning_walks_up_every_emptied_ancestor() {
        let mut root = json!({"motorcycle": {"data": {"A": {"signal": 1}}}, "other": 1});
        apply_put(&mut root, "motorcycle/data/A/signal", Value::Null);
        assert_eq!(root, json!({"other": 1}));

        apply_put(&mut root, "other", Value::Null);
        assert_eq!(root, Value::Null);
    }

    #[test]
    fn pruning_keeps_parents_with_remaining_children() {
        let mut root = json!({"A": {"latitude": 1, "signal": 3}});
        apply_put(&mut root, "/A/latitude", Value::Null);
        assert_eq!(root, json!({"A": {"signal": 3}}));
    }

    #[test]
    fn patch_with_null_child_prunes() {
        let mut root = json!({"A": {"vibration": "Ada Getaran"}, "B": {}});
        apply_patch(&mut root, "/A", json!({"vibration": null}));
        assert_eq!(root, json!({"B": {}}));
    }

    #[test]
    fn delete_preserves_order_of_remaining_keys() {
        let mut root = json!({"Z": 1, "A": 2, "M": 3});
        apply_put(&mut root, "/Z", Value::Null);
        let keys: Vec<&String> = root.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["A", "M"]);
    }

    #[test]
    fn patch_merges_children() {
        let mut root = json!({"A": {"latitude": 1, "vibration": ""}});
        apply_patch(&mut root, "/A", json!({"vibration": "Ada Getaran", "signal": 4}));
        assert_eq!(
            root,
            json!({"A": {"latitude": 1, "vibration": "Ada Getaran", "signal": 4}})
        );
    }

    #[test]
    fn patch_at_root() {
        let mut root = json!({"A": {"latitude": 1}});
        apply_patch(&mut root, "/", json!({"B": {"latitude": 2}}));
        assert_eq!(root, json!({"A": {"latitude": 1}, "B": {"latitude": 2}}));
    }

    #[test]
    fn value_at_walks_objects() {
        let root = json!({"motorcycle": {"data": {"A": {"latitude": 1}}}});
        assert_eq!(value_at(&root, "motorcycle/data/A"), json!({"latitude": 1}));
        assert_eq!(value_at(&root, "motorcycle/data/B"), Value::Null);
        assert_eq!(value_at(&root, ""), root);
    }
}
