//! In-place application of patch operations.

use serde_json::{Map, Value};

use crate::error::PatchError;
use crate::op::PatchOp;
use crate::pointer::{array_index, resolve, Pointer, APPEND};

/// What applying an operation actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The operation applied as written.
    Applied,
    /// A `replace` whose target did not exist; applied with `add` semantics.
    ReplacedMissing,
    /// Nothing to do (e.g. `remove` of an already-absent target).
    Noop,
}

/// Apply one operation to `doc`, mutating it in place.
///
/// Ops for one document must be applied strictly in arrival order; they are
/// not commutative. Errors describe malformed pointers and leave the caller
/// to decide policy. An errored op never writes the target value, though
/// intermediate containers auto-created before the failing segment stay
/// behind, and a `move` whose removal succeeded keeps the removal.
pub fn apply(doc: &mut Value, op: &PatchOp) -> Result<Outcome, PatchError> {
    match op {
        PatchOp::Add { path, value } => add(doc, path, value.clone(), false),
        PatchOp::Replace { path, value } => add(doc, path, value.clone(), true),
        PatchOp::Remove { path } => remove(doc, path),
        PatchOp::Move { from, path } => {
            let taken = take(doc, from)?;
            add(doc, path, taken, false)
        }
        PatchOp::Copy { from, path } => {
            let source = Pointer::parse(from);
            let cloned = resolve(doc, &source)
                .cloned()
                .ok_or_else(|| PatchError::SourceNotFound {
                    pointer: from.clone(),
                })?;
            add(doc, path, cloned, false)
        }
    }
}

/// Walk `segments`, creating missing intermediates as plain objects. Existing
/// arrays keep array semantics for their level: a numeric index descends and
/// an index at or past the end (or `-`) appends a fresh object.
fn descend_vivify<'a>(
    doc: &'a mut Value,
    segments: &[String],
    pointer: &str,
) -> Result<&'a mut Value, PatchError> {
    let mut current = doc;
    for segment in segments {
        current = match current {
            Value::Object(map) => map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => {
                let index = if segment == APPEND {
                    items.len()
                } else {
                    array_index(segment).ok_or_else(|| PatchError::InvalidIndex {
                        pointer: pointer.to_string(),
                        segment: segment.clone(),
                    })?
                };
                if index >= items.len() {
                    items.push(Value::Object(Map::new()));
                    let last = items.len() - 1;
                    &mut items[last]
                } else {
                    &mut items[index]
                }
            }
            _ => {
                return Err(PatchError::UnresolvablePath {
                    pointer: pointer.to_string(),
                    segment: segment.clone(),
                })
            }
        };
    }
    Ok(current)
}

/// Walk `segments` without creating anything. `Ok(None)` means some segment
/// was simply absent; scalars on the path are still an error.
fn descend_existing<'a>(
    doc: &'a mut Value,
    segments: &[String],
    pointer: &str,
) -> Result<Option<&'a mut Value>, PatchError> {
    let mut current = doc;
    for segment in segments {
        current = match current {
            Value::Object(map) => match map.get_mut(segment) {
                Some(value) => value,
                None => return Ok(None),
            },
            Value::Array(items) => {
                let Some(index) = array_index(segment) else {
                    return Ok(None);
                };
                match items.get_mut(index) {
                    Some(value) => value,
                    None => return Ok(None),
                }
            }
            _ => {
                return Err(PatchError::UnresolvablePath {
                    pointer: pointer.to_string(),
                    segment: segment.clone(),
                })
            }
        };
    }
    Ok(Some(current))
}

fn add(doc: &mut Value, path: &str, value: Value, replace: bool) -> Result<Outcome, PatchError> {
    let pointer = Pointer::parse(path);
    let Some((parents, last)) = pointer.split_last() else {
        // Whole-document replacement.
        *doc = value;
        return Ok(Outcome::Applied);
    };

    let parent = descend_vivify(doc, parents, path)?;
    match parent {
        Value::Object(map) => {
            let existed = map.insert(last.to_string(), value).is_some();
            if replace && !existed {
                Ok(Outcome::ReplacedMissing)
            } else {
                Ok(Outcome::Applied)
            }
        }
        Value::Array(items) => {
            if last == APPEND {
                items.push(value);
                return Ok(Outcome::Applied);
            }
            let index = array_index(last).ok_or_else(|| PatchError::InvalidIndex {
                pointer: path.to_string(),
                segment: last.to_string(),
            })?;
            if replace {
                if index < items.len() {
                    items[index] = value;
                    Ok(Outcome::Applied)
                } else {
                    items.push(value);
                    Ok(Outcome::ReplacedMissing)
                }
            } else {
                // Past-the-end inserts clamp to append; replayed streams may
                // carry indices computed against a longer array.
                let at = index.min(items.len());
                items.insert(at, value);
                Ok(Outcome::Applied)
            }
        }
        _ => Err(PatchError::UnresolvablePath {
            pointer: path.to_string(),
            segment: last.to_string(),
        }),
    }
}

fn remove(doc: &mut Value, path: &str) -> Result<Outcome, PatchError> {
    let pointer = Pointer::parse(path);
    let Some((parents, last)) = pointer.split_last() else {
        // The root cannot be removed.
        return Ok(Outcome::Noop);
    };

    match descend_existing(doc, parents, path)? {
        None => Ok(Outcome::Noop),
        Some(Value::Object(map)) => {
            if map.remove(last).is_some() {
                Ok(Outcome::Applied)
            } else {
                Ok(Outcome::Noop)
            }
        }
        Some(Value::Array(items)) => match array_index(last) {
            Some(index) if index < items.len() => {
                items.remove(index);
                Ok(Outcome::Applied)
            }
            _ => Ok(Outcome::Noop),
        },
        Some(_) => Err(PatchError::UnresolvablePath {
            pointer: path.to_string(),
            segment: last.to_string(),
        }),
    }
}

/// Remove and return the value at `path` for a `move`. A missing source is
/// an error rather than a no-op: moving nothing somewhere is never intended.
fn take(doc: &mut Value, path: &str) -> Result<Value, PatchError> {
    let pointer = Pointer::parse(path);
    let Some((parents, last)) = pointer.split_last() else {
        // Moving the root: the document resets to its empty-object identity.
        return Ok(std::mem::replace(doc, Value::Object(Map::new())));
    };

    let missing = || PatchError::SourceNotFound {
        pointer: path.to_string(),
    };
    match descend_existing(doc, parents, path)? {
        None => Err(missing()),
        Some(Value::Object(map)) => map.remove(last).ok_or_else(missing),
        Some(Value::Array(items)) => match array_index(last) {
            Some(index) if index < items.len() => Ok(items.remove(index)),
            _ => Err(missing()),
        },
        Some(_) => Err(PatchError::UnresolvablePath {
            pointer: path.to_string(),
            segment: last.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add_op(path: &str, value: Value) -> PatchOp {
        PatchOp::Add {
            path: path.into(),
            value,
        }
    }

    #[test]
    fn test_add_then_append() {
        // Declare an array, then append through `-`.
        let mut doc = json!({});
        apply(&mut doc, &add_op("/items", json!([]))).unwrap();
        apply(&mut doc, &add_op("/items/-", json!({"name": "alpha"}))).unwrap();

        assert_eq!(doc["items"].as_array().unwrap().len(), 1);
        assert_eq!(doc["items"][0]["name"], "alpha");
    }

    #[test]
    fn test_append_regardless_of_length() {
        let mut doc = json!({"items": [1, 2, 3]});
        apply(&mut doc, &add_op("/items/-", json!(4))).unwrap();
        assert_eq!(doc["items"], json!([1, 2, 3, 4]));
    }

    #[test]
    fn test_array_insert_shifts() {
        let mut doc = json!({"items": ["a", "c"]});
        apply(&mut doc, &add_op("/items/1", json!("b"))).unwrap();
        assert_eq!(doc["items"], json!(["a", "b", "c"]));
    }

    #[test]
    fn test_array_insert_past_end_clamps() {
        let mut doc = json!({"items": ["a"]});
        apply(&mut doc, &add_op("/items/9", json!("b"))).unwrap();
        assert_eq!(doc["items"], json!(["a", "b"]));
    }

    #[test]
    fn test_object_autovivify_at_depth() {
        let mut doc = json!({});
        apply(&mut doc, &add_op("/a/b/c", json!(1))).unwrap();
        assert_eq!(doc, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn test_array_element_autovivifies_as_object() {
        // `/items/0/...` creates items[0] as an object when absent.
        let mut doc = json!({"items": []});
        apply(&mut doc, &add_op("/items/0/routes", json!(["x"]))).unwrap();
        assert_eq!(doc["items"][0]["routes"], json!(["x"]));
    }

    #[test]
    fn test_replace_existing() {
        let mut doc = json!({"a": 1});
        let outcome = apply(
            &mut doc,
            &PatchOp::Replace {
                path: "/a".into(),
                value: json!(2),
            },
        )
        .unwrap();
        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(doc["a"], 2);
    }

    #[test]
    fn test_replace_missing_degrades_to_add() {
        let mut doc = json!({});
        let outcome = apply(
            &mut doc,
            &PatchOp::Replace {
                path: "/a".into(),
                value: json!(2),
            },
        )
        .unwrap();
        assert_eq!(outcome, Outcome::ReplacedMissing);
        assert_eq!(doc["a"], 2);
    }

    #[test]
    fn test_remove_object_key() {
        let mut doc = json!({"a": 1, "b": 2});
        assert_eq!(
            apply(&mut doc, &PatchOp::Remove { path: "/a".into() }).unwrap(),
            Outcome::Applied
        );
        assert_eq!(doc, json!({"b": 2}));
    }

    #[test]
    fn test_remove_array_element_shifts_down() {
        let mut doc = json!({"items": ["a", "b", "c"]});
        apply(
            &mut doc,
            &PatchOp::Remove {
                path: "/items/1".into(),
            },
        )
        .unwrap();
        assert_eq!(doc["items"], json!(["a", "c"]));
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut doc = json!({"a": 1});
        assert_eq!(
            apply(&mut doc, &PatchOp::Remove { path: "/b".into() }).unwrap(),
            Outcome::Noop
        );
        assert_eq!(
            apply(
                &mut doc,
                &PatchOp::Remove {
                    path: "/x/y".into()
                }
            )
            .unwrap(),
            Outcome::Noop
        );
        assert_eq!(doc, json!({"a": 1}));
    }

    #[test]
    fn test_move_takes_literal_value() {
        let mut doc = json!({"a": {"nested": [1, 2]}, "b": null});
        apply(
            &mut doc,
            &PatchOp::Move {
                from: "/a".into(),
                path: "/c".into(),
            },
        )
        .unwrap();
        assert_eq!(resolve(&doc, &Pointer::parse("/a")), None);
        assert_eq!(doc["c"], json!({"nested": [1, 2]}));
    }

    #[test]
    fn test_move_missing_source_errors() {
        let mut doc = json!({});
        let err = apply(
            &mut doc,
            &PatchOp::Move {
                from: "/a".into(),
                path: "/b".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::SourceNotFound { .. }));
    }

    #[test]
    fn test_copy_is_deep() {
        // Mutating the source after a copy never shows through the copy.
        let mut doc = json!({"items": [{"name": "alpha", "routes": ["r1"]}]});
        apply(
            &mut doc,
            &PatchOp::Copy {
                from: "/items/0".into(),
                path: "/items/1".into(),
            },
        )
        .unwrap();
        apply(&mut doc, &add_op("/items/0/routes/-", json!("r2"))).unwrap();

        assert_eq!(doc["items"][0]["routes"], json!(["r1", "r2"]));
        assert_eq!(doc["items"][1]["routes"], json!(["r1"]));
    }

    #[test]
    fn test_scalar_ancestor_is_unresolvable() {
        let mut doc = json!({"a": 5});
        let err = apply(&mut doc, &add_op("/a/b", json!(1))).unwrap_err();
        assert!(matches!(err, PatchError::UnresolvablePath { .. }));
        // Document untouched.
        assert_eq!(doc, json!({"a": 5}));
    }

    #[test]
    fn test_non_numeric_segment_on_array() {
        let mut doc = json!({"items": []});
        let err = apply(&mut doc, &add_op("/items/first", json!(1))).unwrap_err();
        assert!(matches!(err, PatchError::InvalidIndex { .. }));
    }

    #[test]
    fn test_root_replacement() {
        let mut doc = json!({"old": true});
        apply(&mut doc, &add_op("", json!({"new": true}))).unwrap();
        assert_eq!(doc, json!({"new": true}));
    }

    #[test]
    fn test_root_remove_is_noop() {
        let mut doc = json!({"a": 1});
        assert_eq!(
            apply(&mut doc, &PatchOp::Remove { path: "".into() }).unwrap(),
            Outcome::Noop
        );
        assert_eq!(doc, json!({"a": 1}));
    }

    #[test]
    fn test_escaped_keys() {
        let mut doc = json!({});
        apply(&mut doc, &add_op("/a~1b", json!(1))).unwrap();
        assert_eq!(doc, json!({"a/b": 1}));
    }

    #[test]
    fn test_ordered_sequence_reproduces_structure() {
        let ops = vec![
            add_op("/models", json!([])),
            add_op("/models/-", json!({"id": "m1"})),
            add_op("/models/-", json!({"id": "m2"})),
            add_op("/models/0/progress", json!(10)),
            PatchOp::Replace {
                path: "/models/0/progress".into(),
                value: json!(90),
            },
            PatchOp::Remove {
                path: "/models/1".into(),
            },
        ];
        let mut doc = json!({});
        for op in &ops {
            apply(&mut doc, op).unwrap();
        }
        assert_eq!(doc, json!({"models": [{"id": "m1", "progress": 90}]}));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn key() -> impl Strategy<Value = String> {
            "[a-z]{1,6}"
        }

        proptest! {
            /// Adding a value at any object path makes it resolvable there,
            /// no matter how deep the auto-vivified chain is.
            #[test]
            fn add_resolves_at_any_depth(
                segments in proptest::collection::vec(key(), 1..5),
                n in 0i64..1000,
            ) {
                let path = format!("/{}", segments.join("/"));
                let mut doc = serde_json::json!({});
                apply(&mut doc, &add_op(&path, serde_json::json!(n))).unwrap();
                let found = resolve(&doc, &Pointer::parse(&path));
                prop_assert_eq!(found, Some(&serde_json::json!(n)));
            }

            /// Append always grows the array by exactly one, at the tail.
            #[test]
            fn append_always_appends(init in proptest::collection::vec(0i64..100, 0..8)) {
                let mut doc = serde_json::json!({ "items": init.clone() });
                apply(&mut doc, &add_op("/items/-", serde_json::json!(-1))).unwrap();
                let items = doc["items"].as_array().unwrap();
                prop_assert_eq!(items.len(), init.len() + 1);
                prop_assert_eq!(items.last(), Some(&serde_json::json!(-1)));
            }
        }
    }
}
