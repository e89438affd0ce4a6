#![forbid(unsafe_code)]

//! Copy-on-write access to the form store.
//!
//! A store is any JSON value. Every write returns a new store; the input is
//! only ever borrowed, so a version handed to one reader is never changed
//! underneath it. `None` plays the role of an absent value.

use serde_json::{Map, Value};

use crate::name_path::{NamePath, PathKey};

/// The nested structure holding every field value of a form.
pub type Store = Value;

// ---------------------------------------------------------------------------
// Path accessor
// ---------------------------------------------------------------------------

fn child<'a>(container: &'a Value, key: &PathKey) -> Option<&'a Value> {
    match container {
        Value::Object(map) => map.get(&key.to_key()),
        Value::Array(items) => key.as_index().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Read the value at `path`. The empty path yields the whole store.
///
/// Returns `None` as soon as an intermediate value is null or missing.
#[must_use]
pub fn get_value<'a>(store: &'a Value, path: &[PathKey]) -> Option<&'a Value> {
    let mut current = store;
    for key in path {
        if current.is_null() {
            return None;
        }
        current = child(current, key)?;
    }
    Some(current)
}

fn array_to_object(items: Vec<Value>) -> Map<String, Value> {
    items
        .into_iter()
        .enumerate()
        .map(|(i, v)| (i.to_string(), v))
        .collect()
}

/// Most null slots an array write may pad before the array is keyed as an
/// object instead.
const MAX_ARRAY_GAP: usize = 1024;

/// Write `value` under `key`, growing arrays with nulls and turning an array
/// into an object when the key is not an index or lies too far past the end.
fn put(container: Value, key: &PathKey, value: Value) -> Value {
    match container {
        Value::Array(mut items) => match key.as_index() {
            Some(i) if i < items.len() => {
                items[i] = value;
                Value::Array(items)
            }
            Some(i) if i - items.len() <= MAX_ARRAY_GAP => {
                items.resize(i, Value::Null);
                items.push(value);
                Value::Array(items)
            }
            _ => {
                let mut map = array_to_object(items);
                map.insert(key.to_key(), value);
                Value::Object(map)
            }
        },
        Value::Object(mut map) => {
            map.insert(key.to_key(), value);
            Value::Object(map)
        }
        _ => {
            let mut map = Map::new();
            map.insert(key.to_key(), value);
            Value::Object(map)
        }
    }
}

/// Remove `key` from a container. Array slots become null so later indices
/// keep their positions.
fn remove(container: Value, key: &PathKey) -> Value {
    match container {
        Value::Object(mut map) => {
            map.shift_remove(&key.to_key());
            Value::Object(map)
        }
        Value::Array(mut items) => {
            if let Some(slot) = key.as_index().and_then(|i| items.get_mut(i)) {
                *slot = Value::Null;
            }
            Value::Array(items)
        }
        other => other,
    }
}

fn is_falsy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => !b,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(_) => false,
    }
}

fn internal_set(
    entity: Option<&Value>,
    path: &[PathKey],
    value: Option<Value>,
    remove_if_absent: bool,
) -> Value {
    let Some((key, rest)) = path.split_first() else {
        return value.unwrap_or(Value::Null);
    };

    let clone = match entity {
        Some(Value::Array(items)) => Value::Array(items.clone()),
        Some(Value::Object(map)) => Value::Object(map.clone()),
        current if key.is_index() && is_falsy(current) => Value::Array(Vec::new()),
        _ => Value::Object(Map::new()),
    };

    if remove_if_absent && value.is_none() && rest.len() == 1 {
        // Copy the parent of the leaf as well, so the caller's store is untouched.
        let parent = child(&clone, key).cloned().unwrap_or(Value::Null);
        let pruned = remove(parent, &rest[0]);
        return put(clone, key, pruned);
    }

    let next = internal_set(child(&clone, key), rest, value, remove_if_absent);
    put(clone, key, next)
}

/// Return a copy of `store` with `value` written at `path`.
///
/// Each container along the path is shallow-copied; a missing container
/// becomes an array when the next key is an index and an object otherwise.
/// The empty path returns `value` itself.
///
/// With `remove_if_absent` set and `value` absent, the leaf key is deleted
/// instead of being written, and a path whose parent does not exist leaves
/// the store unchanged. An absent value written without `remove_if_absent`
/// is stored as `null`.
#[must_use]
pub fn set_value(
    store: &Value,
    path: &[PathKey],
    value: Option<Value>,
    remove_if_absent: bool,
) -> Value {
    if let Some((_, parent)) = path.split_last()
        && remove_if_absent
        && value.is_none()
        && is_falsy(get_value(store, parent))
    {
        return store.clone();
    }

    internal_set(Some(store), path, value, remove_if_absent)
}

/// A new store containing only the values found at `paths`.
#[must_use]
pub fn clone_by_name_path_list(store: &Value, paths: &[NamePath]) -> Value {
    paths.iter().fold(Value::Object(Map::new()), |acc, path| {
        let value = get_value(store, path).cloned();
        set_value(&acc, path, value, false)
    })
}

// ---------------------------------------------------------------------------
// Store merger
// ---------------------------------------------------------------------------

/// A plain key-value object: not an array, not null.
#[must_use]
pub fn is_plain_object(value: &Value) -> bool {
    value.is_object()
}

fn merge_into(store: &Value, patch: &Value) -> Value {
    let mut merged = match store {
        Value::Array(items) => Value::Array(items.clone()),
        Value::Object(map) => Value::Object(map.clone()),
        _ => Value::Object(Map::new()),
    };

    let entries: Vec<(PathKey, &Value)> = match patch {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (PathKey::Key(k.clone()), v))
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (PathKey::Index(i), v))
            .collect(),
        _ => return merged,
    };

    for (key, incoming) in entries {
        let next = match child(&merged, &key) {
            Some(existing) if is_plain_object(existing) && is_plain_object(incoming) => {
                merge_into(existing, incoming)
            }
            _ => incoming.clone(),
        };
        merged = put(merged, &key, next);
    }
    merged
}

/// Deep-merge `patches` into `base`, left to right.
///
/// Plain objects present on both sides are merged recursively; anything
/// else, arrays included, is replaced by the incoming value. The top-level
/// container keeps the accumulator's kind.
///
/// ```rust
/// use serde_json::json;
/// use xe_form::merge_stores;
///
/// let merged = merge_stores(&json!({"a": 1, "b": {"c": 2}}), &[json!({"a": 4, "b": {"d": 5}})]);
/// assert_eq!(merged, json!({"a": 4, "b": {"c": 2, "d": 5}}));
/// ```
#[must_use]
pub fn merge_stores<'a>(base: &Value, patches: impl IntoIterator<Item = &'a Value>) -> Value {
    patches
        .into_iter()
        .fold(merge_into(base, &Value::Null), |acc, patch| {
            merge_into(&acc, patch)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name_path;
    use serde_json::json;

    // -- get_value --

    #[test]
    fn get_walks_nested_keys() {
        let store = json!({"a": {"b": 10}});
        assert_eq!(get_value(&store, &name_path!["a", "b"]), Some(&json!(10)));
        assert_eq!(get_value(&store, &name_path!["a"]), Some(&json!({"b": 10})));
    }

    #[test]
    fn get_stops_at_missing_or_null() {
        let store = json!({"a": 10, "b": null});
        assert_eq!(get_value(&store, &name_path!["a", "b"]), None);
        assert_eq!(get_value(&store, &name_path!["b", "c"]), None);
        assert_eq!(get_value(&store, &name_path!["missing"]), None);
        assert_eq!(get_value(&store, &name_path!["b"]), Some(&Value::Null));
    }

    #[test]
    fn get_empty_path_returns_store() {
        let store = json!({"a": 1});
        assert_eq!(get_value(&store, &[]), Some(&store));
    }

    #[test]
    fn get_indexes_arrays() {
        let store = json!({"list": [1, 2, 3]});
        assert_eq!(get_value(&store, &name_path!["list", 1usize]), Some(&json!(2)));
        assert_eq!(get_value(&store, &name_path!["list", "2"]), Some(&json!(3)));
        assert_eq!(get_value(&store, &name_path!["list", 9usize]), None);
        assert_eq!(get_value(&store, &name_path!["list", "01"]), None, "non-canonical index");
    }

    // -- set_value --

    #[test]
    fn set_creates_nested_objects() {
        let store = json!({});
        let next = set_value(&store, &name_path!["val", "val1", "val2"], Some(json!(1)), false);
        assert_eq!(next, json!({"val": {"val1": {"val2": 1}}}));
        assert_eq!(store, json!({}), "input store must not change");
    }

    #[test]
    fn set_creates_arrays_for_index_keys() {
        let next = set_value(&json!({}), &name_path!["list", 1usize], Some(json!("x")), false);
        assert_eq!(next, json!({"list": [null, "x"]}));
    }

    #[test]
    fn set_copies_existing_arrays() {
        let store = json!({"list": [1, 2]});
        let next = set_value(&store, &name_path!["list", 0usize], Some(json!(9)), false);
        assert_eq!(next, json!({"list": [9, 2]}));
        assert_eq!(store, json!({"list": [1, 2]}));
    }

    #[test]
    fn set_empty_path_replaces_store() {
        let next = set_value(&json!({"a": 1}), &[], Some(json!([1])), false);
        assert_eq!(next, json!([1]));
    }

    #[test]
    fn set_replaces_primitive_intermediate() {
        let next = set_value(&json!({"a": 5}), &name_path!["a", "b"], Some(json!(1)), false);
        assert_eq!(next, json!({"a": {"b": 1}}));
    }

    #[test]
    fn set_absent_without_removal_writes_null() {
        let next = set_value(&json!({"a": 1}), &name_path!["a"], None, false);
        assert_eq!(next, json!({"a": null}));
    }

    #[test]
    fn remove_if_absent_deletes_leaf() {
        let store = json!({"obj1": {"obj2": {"x": 1}, "keep": true}});
        let next = set_value(&store, &name_path!["obj1", "obj2"], None, true);
        assert_eq!(next, json!({"obj1": {"keep": true}}));
        assert_eq!(
            store,
            json!({"obj1": {"obj2": {"x": 1}, "keep": true}}),
            "removal must not reach into the original store"
        );
    }

    #[test]
    fn remove_if_absent_without_parent_is_noop() {
        let store = json!({"a": 1});
        let next = set_value(&store, &name_path!["missing", "leaf"], None, true);
        assert_eq!(next, store);
    }

    #[test]
    fn remove_if_absent_top_level_key() {
        // A single-key path has the store itself as parent.
        let next = set_value(&json!({"a": 1, "b": 2}), &name_path!["a"], None, true);
        assert_eq!(next, json!({"a": null, "b": 2}));
    }

    #[test]
    fn remove_if_absent_array_slot_becomes_null() {
        let store = json!({"list": [1, 2, 3]});
        let next = set_value(&store, &name_path!["list", 1usize], None, true);
        assert_eq!(next, json!({"list": [1, null, 3]}));
    }

    #[test]
    fn set_far_past_array_end_keys_by_index() {
        let store = json!({"list": [1]});
        let next = set_value(&store, &name_path!["list", usize::MAX], Some(json!(2)), false);
        let key = usize::MAX.to_string();
        assert_eq!(next["list"]["0"], json!(1));
        assert_eq!(next["list"][key.as_str()], json!(2));
        assert_eq!(
            get_value(&next, &name_path!["list", usize::MAX]),
            Some(&json!(2)),
            "the written value stays reachable by its index"
        );
    }

    #[test]
    fn set_pads_small_gaps_with_null() {
        let next = set_value(&json!([1]), &name_path![3usize], Some(json!(4)), false);
        assert_eq!(next, json!([1, null, null, 4]));
    }

    // -- clone_by_name_path_list --

    #[test]
    fn clone_by_paths_picks_listed_values() {
        let store = json!({"a": {"b": 1, "c": 2}, "d": 3});
        let picked = clone_by_name_path_list(&store, &[name_path!["a", "b"], name_path!["d"]]);
        assert_eq!(picked, json!({"a": {"b": 1}, "d": 3}));
    }

    // -- merge_stores --

    #[test]
    fn merge_recurses_into_objects() {
        let merged = merge_stores(
            &json!({"a": 1, "b": {"c": 2}}),
            &[json!({"a": 4, "b": {"d": 5}})],
        );
        assert_eq!(merged, json!({"a": 4, "b": {"c": 2, "d": 5}}));
    }

    #[test]
    fn merge_replaces_arrays_wholesale() {
        let merged = merge_stores(&json!({"tags": [1, 2, 3]}), &[json!({"tags": [9]})]);
        assert_eq!(merged, json!({"tags": [9]}));
    }

    #[test]
    fn merge_replaces_object_with_primitive() {
        let merged = merge_stores(&json!({"a": {"b": 1}}), &[json!({"a": null})]);
        assert_eq!(merged, json!({"a": null}));
    }

    #[test]
    fn merge_keeps_top_level_array() {
        let merged = merge_stores(&json!([1, 2, 3]), &[json!([9])]);
        assert_eq!(merged, json!([9, 2, 3]));
    }

    #[test]
    fn merge_applies_patches_left_to_right() {
        let merged = merge_stores(
            &json!({}),
            &[json!({"a": 1}), json!({"a": 2, "b": 1}), json!({"b": {"c": 1}})],
        );
        assert_eq!(merged, json!({"a": 2, "b": {"c": 1}}));
    }

    #[test]
    fn merge_ignores_non_container_patch() {
        let base = json!({"a": 1});
        assert_eq!(merge_stores(&base, &[Value::Null, json!(5)]), base);
    }

    #[test]
    fn merge_large_index_key_over_array() {
        let merged = merge_stores(&json!([1]), [&json!({"99999999999999999": 1})]);
        assert_eq!(merged, json!({"0": 1, "99999999999999999": 1}));
    }

    #[test]
    fn merge_does_not_mutate_inputs() {
        let base = json!({"a": {"b": 1}});
        let patch = json!({"a": {"c": 2}});
        let _ = merge_stores(&base, [&patch]);
        assert_eq!(base, json!({"a": {"b": 1}}));
        assert_eq!(patch, json!({"a": {"c": 2}}));
    }
}
