//! `{state, plots}` mutation primitives. `state` is a free-form JSON tree
//! touched only through `deep_set`/`patch_state`; `plots` is an ordered
//! sequence of [`Plot`] touched only through `add_plot`/`update_plot`/
//! `remove_plot`. Every operation here both mutates its document argument
//! and returns the delta pair describing the change.

pub mod error;

pub use error::{Result, WorldStateError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::delta::{make_delta, DeltaPair};

/// A plot thread tracked independently of the free-form `state` tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plot {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub alignment: f64,
    pub created_at_turn: u32,
}

/// Per-field replacement for [`update_plot`]; absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlotUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub player_alignment: Option<f64>,
}

/// Sets `doc["state"]` at the `/`-separated pointer `path`, creating
/// intermediate objects as needed (indexing a `Value` with a missing key
/// auto-vivifies it as an object).
pub fn deep_set(doc: &mut Value, path: &str, value: Value) -> DeltaPair {
    make_delta(doc, |d| {
        if d.get("state").is_none() {
            d["state"] = Value::Object(Map::new());
        }
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };
        let mut cur = &mut d["state"];
        for seg in parents {
            cur = &mut cur[*seg];
        }
        cur[*last] = value;
    })
}

/// Shallow-merges every key of `partial` into `doc["state"]`.
pub fn patch_state(doc: &mut Value, partial: &Value) -> DeltaPair {
    let partial = partial.clone();
    make_delta(doc, |d| {
        if d.get("state").is_none() {
            d["state"] = Value::Object(Map::new());
        }
        if let (Some(state), Some(obj)) = (d["state"].as_object_mut(), partial.as_object()) {
            for (k, v) in obj {
                state.insert(k.clone(), v.clone());
            }
        }
    })
}

fn plots_array(doc: &mut Value) -> &mut Vec<Value> {
    if doc.get("plots").is_none() {
        doc["plots"] = Value::Array(Vec::new());
    }
    doc["plots"].as_array_mut().expect("plots is always an array")
}

fn plot_index(doc: &Value, plot_id: Uuid) -> Result<usize> {
    doc.get("plots")
        .and_then(Value::as_array)
        .and_then(|arr| {
            arr.iter()
                .position(|p| p.get("id").and_then(Value::as_str) == Some(plot_id.to_string().as_str()))
        })
        .ok_or(WorldStateError::PlotNotFound(plot_id))
}

/// Appends a new plot, returning its freshly assigned id alongside the
/// delta pair.
pub fn add_plot(
    doc: &mut Value,
    title: String,
    description: String,
    alignment: f64,
    created_at_turn: u32,
) -> (Uuid, DeltaPair) {
    let id = Uuid::new_v4();
    let plot = Plot {
        id,
        title,
        description,
        alignment,
        created_at_turn,
    };
    let delta = make_delta(doc, |d| {
        plots_array(d).push(serde_json::to_value(&plot).expect("Plot always serializes"));
    });
    (id, delta)
}

/// Replaces the fields of `updates` that are `Some` on the plot with id
/// `plot_id`.
pub fn update_plot(doc: &mut Value, plot_id: Uuid, updates: PlotUpdate) -> Result<DeltaPair> {
    let idx = plot_index(doc, plot_id)?;
    Ok(make_delta(doc, |d| {
        let entry = &mut plots_array(d)[idx];
        if let Some(title) = &updates.title {
            entry["title"] = Value::String(title.clone());
        }
        if let Some(description) = &updates.description {
            entry["description"] = Value::String(description.clone());
        }
        if let Some(alignment) = updates.player_alignment {
            entry["alignment"] = serde_json::json!(alignment);
        }
    }))
}

/// Removes the plot with id `plot_id`.
pub fn remove_plot(doc: &mut Value, plot_id: Uuid) -> Result<DeltaPair> {
    let idx = plot_index(doc, plot_id)?;
    Ok(make_delta(doc, |d| {
        plots_array(d).remove(idx);
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_set_creates_intermediate_objects() {
        let mut doc = json!({"state": {}, "plots": []});
        deep_set(&mut doc, "player/hp", json!(100));
        assert_eq!(doc["state"]["player"]["hp"], json!(100));
    }

    #[test]
    fn patch_state_merges_keys_without_touching_others() {
        let mut doc = json!({"state": {"player": {"hp": 80}}, "plots": []});
        patch_state(&mut doc, &json!({"flag": true}));
        assert_eq!(doc["state"]["player"]["hp"], json!(80));
        assert_eq!(doc["state"]["flag"], json!(true));
    }

    #[test]
    fn add_update_remove_plot_round_trip() {
        let mut doc = json!({"state": {}, "plots": []});
        let (id, _) = add_plot(&mut doc, "Main Quest".into(), "Defeat the dragon".into(), 0.1, 1);
        assert_eq!(doc["plots"].as_array().unwrap().len(), 1);

        update_plot(
            &mut doc,
            id,
            PlotUpdate {
                player_alignment: Some(0.15),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(doc["plots"][0]["alignment"], json!(0.15));

        remove_plot(&mut doc, id).unwrap();
        assert!(doc["plots"].as_array().unwrap().is_empty());
    }

    #[test]
    fn update_plot_on_unknown_id_errors() {
        let mut doc = json!({"state": {}, "plots": []});
        assert!(matches!(
            update_plot(&mut doc, Uuid::new_v4(), PlotUpdate::default()),
            Err(WorldStateError::PlotNotFound(_))
        ));
    }

    #[test]
    fn deltas_revert_to_initial_document() {
        let mut doc = json!({"state": {"player": {"hp": 80}}, "plots": []});
        let initial = doc.clone();

        let d1 = deep_set(&mut doc, "player/hp", json!(100));
        let (id, d2) = add_plot(&mut doc, "Main Quest".into(), "Defeat the dragon".into(), 0.1, 1);
        let d3 = update_plot(
            &mut doc,
            id,
            PlotUpdate {
                player_alignment: Some(0.15),
                ..Default::default()
            },
        )
        .unwrap();
        let d4 = remove_plot(&mut doc, id).unwrap();

        for delta in [&d4, &d3, &d2, &d1] {
            crate::delta::apply_ops(&mut doc, &delta.revert).unwrap();
        }
        assert_eq!(doc, initial);
    }
}
