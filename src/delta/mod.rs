//! Delta engine: inverse-computable patch pairs over typed (JSON-shaped)
//! documents, used to drive undo/redo and tree time-travel. Applies only the
//! ops a mutation actually touched, replayed in deterministic order, the
//! same discipline a WAL replay follows.

pub mod error;

pub use error::{DeltaError, Result};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One JSON-pointer patch operation (RFC 6902 subset: `add`, `remove`,
/// `replace`, `move` — no `copy`/`test`, which this engine never needs to
/// emit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Op {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Move { from: String, path: String },
}

/// An inverse-computable mutation: `apply` transforms a document the way the
/// mutation does, `revert` undoes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaPair {
    pub apply: Vec<Op>,
    pub revert: Vec<Op>,
}

impl DeltaPair {
    pub fn is_empty(&self) -> bool {
        self.apply.is_empty() && self.revert.is_empty()
    }
}

/// Composes `first` then `second` into one delta: applying it runs `first`
/// then `second`; reverting it undoes `second` then `first`.
pub fn combine(first: &DeltaPair, second: &DeltaPair) -> DeltaPair {
    DeltaPair {
        apply: [first.apply.clone(), second.apply.clone()].concat(),
        revert: [second.revert.clone(), first.revert.clone()].concat(),
    }
}

/// Swaps `apply` and `revert`, turning a delta into its own inverse.
pub fn invert(d: &DeltaPair) -> DeltaPair {
    DeltaPair {
        apply: d.revert.clone(),
        revert: d.apply.clone(),
    }
}

/// Folds a sequence of deltas, applied in order, into one composed delta.
pub fn fold(deltas: &[DeltaPair]) -> DeltaPair {
    deltas.iter().fold(DeltaPair::default(), |acc, d| combine(&acc, d))
}

fn escape_token(raw: &str) -> String {
    raw.replace('~', "~0").replace('/', "~1")
}

fn unescape_token(tok: &str) -> String {
    tok.replace("~1", "/").replace("~0", "~")
}

fn split_pointer(path: &str) -> Vec<String> {
    if path.is_empty() {
        return Vec::new();
    }
    path.trim_start_matches('/')
        .split('/')
        .map(unescape_token)
        .collect()
}

fn join_pointer(prefix: &str, token: &str) -> String {
    format!("{}/{}", prefix, escape_token(token))
}

fn navigate<'a>(root: &'a Value, tokens: &[String]) -> Result<&'a Value> {
    let mut cur = root;
    for tok in tokens {
        cur = match cur {
            Value::Object(m) => m
                .get(tok)
                .ok_or_else(|| DeltaError::PathNotFound(tok.clone()))?,
            Value::Array(arr) => {
                let idx: usize = tok
                    .parse()
                    .map_err(|_| DeltaError::MalformedPointer(tok.clone()))?;
                arr.get(idx)
                    .ok_or_else(|| DeltaError::PathNotFound(tok.clone()))?
            }
            _ => return Err(DeltaError::PathNotFound(tok.clone())),
        };
    }
    Ok(cur)
}

fn navigate_mut<'a>(root: &'a mut Value, tokens: &[String]) -> Result<&'a mut Value> {
    let mut cur = root;
    for tok in tokens {
        cur = match cur {
            Value::Object(m) => m
                .get_mut(tok)
                .ok_or_else(|| DeltaError::PathNotFound(tok.clone()))?,
            Value::Array(arr) => {
                let idx: usize = tok
                    .parse()
                    .map_err(|_| DeltaError::MalformedPointer(tok.clone()))?;
                arr.get_mut(idx)
                    .ok_or_else(|| DeltaError::PathNotFound(tok.clone()))?
            }
            _ => return Err(DeltaError::PathNotFound(tok.clone())),
        };
    }
    Ok(cur)
}

/// Structural diff of `before` vs `after`, emitting the minimal `add`/
/// `remove`/`replace` sequence that transforms `before` into `after`.
/// JSON objects are always diffed as unordered maps; JSON arrays are
/// diffed preserving order (common prefix/suffix, single-element
/// insert/remove in the middle, or a whole-array `replace` for anything
/// more structurally different than this engine's mutators ever produce).
pub fn diff(before: &Value, after: &Value, path: &str) -> Vec<Op> {
    if before == after {
        return Vec::new();
    }
    match (before, after) {
        (Value::Object(b), Value::Object(a)) => {
            let mut ops = Vec::new();
            for (k, av) in a.iter() {
                match b.get(k) {
                    None => ops.push(Op::Add {
                        path: join_pointer(path, k),
                        value: av.clone(),
                    }),
                    Some(bv) if bv != av => {
                        ops.extend(diff(bv, av, &join_pointer(path, k)));
                    }
                    _ => {}
                }
            }
            for k in b.keys() {
                if !a.contains_key(k) {
                    ops.push(Op::Remove {
                        path: join_pointer(path, k),
                    });
                }
            }
            ops
        }
        (Value::Array(b), Value::Array(a)) => diff_arrays(b, a, path),
        _ => vec![Op::Replace {
            path: path.to_string(),
            value: after.clone(),
        }],
    }
}

fn diff_arrays(b: &[Value], a: &[Value], path: &str) -> Vec<Op> {
    let mut prefix = 0;
    while prefix < b.len() && prefix < a.len() && b[prefix] == a[prefix] {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < b.len() - prefix
        && suffix < a.len() - prefix
        && b[b.len() - 1 - suffix] == a[a.len() - 1 - suffix]
    {
        suffix += 1;
    }
    let mid_b = &b[prefix..b.len() - suffix];
    let mid_a = &a[prefix..a.len() - suffix];

    if mid_b.is_empty() && mid_a.len() == 1 {
        let idx = prefix;
        let pos = if idx >= b.len() { "-".to_string() } else { idx.to_string() };
        return vec![Op::Add {
            path: join_pointer(path, &pos),
            value: mid_a[0].clone(),
        }];
    }
    if mid_a.is_empty() && mid_b.len() == 1 {
        return vec![Op::Remove {
            path: join_pointer(path, &prefix.to_string()),
        }];
    }
    // Anything beyond a single middle insert/remove (this engine's own
    // mutators never reorder arrays arbitrarily) is captured as a whole
    // replace rather than a best-effort multi-op reorder.
    vec![Op::Replace {
        path: path.to_string(),
        value: Value::Array(a.to_vec()),
    }]
}

/// Applies `ops` to `doc` in place.
pub fn apply_ops(doc: &mut Value, ops: &[Op]) -> Result<()> {
    for op in ops {
        apply_one(doc, op)?;
    }
    Ok(())
}

fn apply_one(doc: &mut Value, op: &Op) -> Result<()> {
    match op {
        Op::Add { path, value } => {
            let tokens = split_pointer(path);
            if tokens.is_empty() {
                *doc = value.clone();
                return Ok(());
            }
            let (parent_tokens, last) = tokens.split_at(tokens.len() - 1);
            let last = &last[0];
            let parent = navigate_mut(doc, parent_tokens)?;
            match parent {
                Value::Object(m) => {
                    m.insert(last.clone(), value.clone());
                }
                Value::Array(arr) => {
                    let idx = if last == "-" {
                        arr.len()
                    } else {
                        last.parse::<usize>()
                            .map_err(|_| DeltaError::MalformedPointer(last.clone()))?
                    };
                    if idx > arr.len() {
                        return Err(DeltaError::InvalidTarget(path.clone()));
                    }
                    arr.insert(idx, value.clone());
                }
                _ => return Err(DeltaError::InvalidTarget(path.clone())),
            }
        }
        Op::Remove { path } => {
            let tokens = split_pointer(path);
            if tokens.is_empty() {
                return Err(DeltaError::InvalidTarget(path.clone()));
            }
            let (parent_tokens, last) = tokens.split_at(tokens.len() - 1);
            let last = &last[0];
            let parent = navigate_mut(doc, parent_tokens)?;
            match parent {
                Value::Object(m) => {
                    m.remove(last).ok_or_else(|| DeltaError::PathNotFound(path.clone()))?;
                }
                Value::Array(arr) => {
                    let idx: usize = last
                        .parse()
                        .map_err(|_| DeltaError::MalformedPointer(last.clone()))?;
                    if idx >= arr.len() {
                        return Err(DeltaError::PathNotFound(path.clone()));
                    }
                    arr.remove(idx);
                }
                _ => return Err(DeltaError::InvalidTarget(path.clone())),
            }
        }
        Op::Replace { path, value } => {
            let tokens = split_pointer(path);
            if tokens.is_empty() {
                *doc = value.clone();
            } else {
                let target = navigate_mut(doc, &tokens)?;
                *target = value.clone();
            }
        }
        Op::Move { from, path } => {
            let from_tokens = split_pointer(from);
            let value = navigate(doc, &from_tokens)?.clone();
            apply_one(doc, &Op::Remove { path: from.clone() })?;
            apply_one(
                doc,
                &Op::Add {
                    path: path.clone(),
                    value,
                },
            )?;
        }
    }
    Ok(())
}

/// Runs `mutator` over a deep copy of `*doc`, commits the mutated copy back
/// into `*doc`, and returns the delta pair describing the change.
pub fn make_delta<F>(doc: &mut Value, mutator: F) -> DeltaPair
where
    F: FnOnce(&mut Value),
{
    let before = doc.clone();
    let mut after = before.clone();
    mutator(&mut after);
    let apply = diff(&before, &after, "");
    let revert = diff(&after, &before, "");
    *doc = after;
    DeltaPair { apply, revert }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_replace_round_trips() {
        let mut doc = json!({"hp": 10});
        let delta = make_delta(&mut doc, |d| {
            d["hp"] = json!(7);
        });
        assert_eq!(doc, json!({"hp": 7}));
        apply_ops(&mut doc, &delta.revert).unwrap();
        assert_eq!(doc, json!({"hp": 10}));
        apply_ops(&mut doc, &delta.apply).unwrap();
        assert_eq!(doc, json!({"hp": 7}));
    }

    #[test]
    fn object_key_add_and_remove_round_trip() {
        let mut doc = json!({"inventory": {"sword": 1}});
        let delta = make_delta(&mut doc, |d| {
            d["inventory"]["shield"] = json!(1);
            d["inventory"].as_object_mut().unwrap().remove("sword");
        });
        assert_eq!(doc, json!({"inventory": {"shield": 1}}));
        apply_ops(&mut doc, &delta.revert).unwrap();
        assert_eq!(doc, json!({"inventory": {"sword": 1}}));
    }

    #[test]
    fn array_push_preserves_order_on_undo() {
        let mut doc = json!({"children_ids": ["a", "b"]});
        let delta = make_delta(&mut doc, |d| {
            d["children_ids"].as_array_mut().unwrap().push(json!("c"));
        });
        assert_eq!(doc, json!({"children_ids": ["a", "b", "c"]}));
        apply_ops(&mut doc, &delta.revert).unwrap();
        assert_eq!(doc, json!({"children_ids": ["a", "b"]}));
        apply_ops(&mut doc, &delta.apply).unwrap();
        assert_eq!(doc, json!({"children_ids": ["a", "b", "c"]}));
    }

    #[test]
    fn array_removal_of_middle_element_round_trips_preserving_order() {
        let mut doc = json!({"children_ids": ["a", "b", "c"]});
        let delta = make_delta(&mut doc, |d| {
            let arr = d["children_ids"].as_array_mut().unwrap();
            arr.remove(1);
        });
        assert_eq!(doc, json!({"children_ids": ["a", "c"]}));
        apply_ops(&mut doc, &delta.revert).unwrap();
        assert_eq!(doc, json!({"children_ids": ["a", "b", "c"]}));
    }

    #[test]
    fn no_op_mutation_yields_empty_delta() {
        let mut doc = json!({"hp": 10});
        let delta = make_delta(&mut doc, |_| {});
        assert!(delta.is_empty());
    }

    #[test]
    fn nested_world_state_patch_round_trips() {
        let mut doc = json!({
            "state": {"location": "tavern", "flags": {"met_innkeeper": false}},
            "plots": []
        });
        let delta = make_delta(&mut doc, |d| {
            d["state"]["location"] = json!("forest");
            d["state"]["flags"]["met_innkeeper"] = json!(true);
            d["plots"]
                .as_array_mut()
                .unwrap()
                .push(json!({"id": "p1", "title": "Lost heirloom"}));
        });
        let before = json!({
            "state": {"location": "tavern", "flags": {"met_innkeeper": false}},
            "plots": []
        });
        apply_ops(&mut doc, &delta.revert).unwrap();
        assert_eq!(doc, before);
        apply_ops(&mut doc, &delta.apply).unwrap();
        assert_eq!(doc["state"]["location"], json!("forest"));
        assert_eq!(doc["plots"].as_array().unwrap().len(), 1);
    }
}
