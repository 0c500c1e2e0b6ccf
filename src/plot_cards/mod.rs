//! Plot-card index: named, keyword-triggerable lore cards with embeddings,
//! ranked by a keyword-trigger-then-semantic merge.

pub mod error;

pub use error::{PlotCardError, Result};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Metric;
use crate::delta::{diff, DeltaPair};
use crate::providers::EmbeddingProvider;
use crate::vector_store::{Store, VectorInput};

/// Cosine scores on unit vectors lie in `[-1, 1]`; this sentinel is
/// strictly above that range so a triggered card always outranks any
/// semantic hit.
pub const TRIGGER_SCORE: f32 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotCard {
    pub id: u64,
    pub category: String,
    pub name: String,
    pub content: String,
    pub trigger_keyword: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub card: PlotCard,
    pub score: f32,
}

fn mirror_doc(mirror: &HashMap<u64, PlotCard>) -> Value {
    serde_json::json!({ "plot_cards": serde_json::to_value(mirror).unwrap_or(Value::Null) })
}

pub struct PlotCardIndex {
    store: Store,
    embedder: Arc<dyn EmbeddingProvider>,
    mirror: RwLock<HashMap<u64, PlotCard>>,
}

fn card_meta(card: &PlotCard) -> serde_json::Map<String, Value> {
    let mut m = serde_json::Map::new();
    m.insert("category".into(), Value::String(card.category.clone()));
    m.insert("name".into(), Value::String(card.name.clone()));
    m.insert("content".into(), Value::String(card.content.clone()));
    m.insert(
        "trigger_keyword".into(),
        Value::String(card.trigger_keyword.clone()),
    );
    m
}

fn card_from_meta(id: u64, meta: &serde_json::Map<String, Value>) -> PlotCard {
    let get = |k: &str| meta.get(k).and_then(|v| v.as_str()).unwrap_or_default().to_string();
    PlotCard {
        id,
        category: get("category"),
        name: get("name"),
        content: get("content"),
        trigger_keyword: get("trigger_keyword"),
    }
}

impl PlotCardIndex {
    pub fn new(store: Store, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let mirror = store
            .scan()
            .into_iter()
            .map(|rec| (rec.id, card_from_meta(rec.id, &rec.meta)))
            .collect();
        Self {
            store,
            embedder,
            mirror: RwLock::new(mirror),
        }
    }

    pub async fn add_plot_card(
        &self,
        category: String,
        name: String,
        content: String,
        trigger_keyword: String,
    ) -> Result<(u64, DeltaPair)> {
        let vector = self.embedder.embed(&content).await?;
        let card = PlotCard {
            id: 0,
            category,
            name,
            content,
            trigger_keyword,
        };
        let id = self.store.insert(None, VectorInput::Dense(vector), card_meta(&card))?;
        let card = PlotCard { id, ..card };

        let mut guard = self.mirror.write();
        let before = mirror_doc(&guard);
        guard.insert(id, card);
        let after = mirror_doc(&guard);
        Ok((
            id,
            DeltaPair {
                apply: diff(&before, &after, ""),
                revert: diff(&after, &before, ""),
            },
        ))
    }

    /// Re-embeds only if `content` changed; otherwise reuses the stored
    /// vector via a point-get.
    pub async fn edit_plot_card(
        &self,
        id: u64,
        category: Option<String>,
        name: Option<String>,
        content: Option<String>,
        trigger_keyword: Option<String>,
    ) -> Result<DeltaPair> {
        let existing = {
            let guard = self.mirror.read();
            guard.get(&id).cloned().ok_or(PlotCardError::NotFound(id))?
        };
        let content_changed = content.as_ref().is_some_and(|c| *c != existing.content);
        let updated = PlotCard {
            id,
            category: category.unwrap_or(existing.category.clone()),
            name: name.unwrap_or(existing.name.clone()),
            content: content.unwrap_or(existing.content.clone()),
            trigger_keyword: trigger_keyword.unwrap_or(existing.trigger_keyword.clone()),
        };

        if content_changed {
            let vector = self.embedder.embed(&updated.content).await?;
            self.store.insert(Some(id), VectorInput::Dense(vector), card_meta(&updated))?;
        } else {
            let record = self.store.get(id).ok_or(PlotCardError::NotFound(id))?;
            self.store.insert(Some(id), crate::vector_store::VectorInput::Dense(
                match record.vector {
                    crate::vector_store::VectorData::Dense(v) => v,
                    crate::vector_store::VectorData::Binary(_) => {
                        return Err(PlotCardError::NotFound(id))
                    }
                },
            ), card_meta(&updated))?;
        }

        let mut guard = self.mirror.write();
        let before = mirror_doc(&guard);
        guard.insert(id, updated);
        let after = mirror_doc(&guard);
        Ok(DeltaPair {
            apply: diff(&before, &after, ""),
            revert: diff(&after, &before, ""),
        })
    }

    pub fn remove_plot_card(&self, id: u64) -> Result<Option<DeltaPair>> {
        if !self.store.delete(id)? {
            return Ok(None);
        }
        let mut guard = self.mirror.write();
        let before = mirror_doc(&guard);
        guard.remove(&id);
        let after = mirror_doc(&guard);
        Ok(Some(DeltaPair {
            apply: diff(&before, &after, ""),
            revert: diff(&after, &before, ""),
        }))
    }

    pub fn get_all_plot_cards(&self) -> Vec<PlotCard> {
        self.mirror.read().values().cloned().collect()
    }

    pub fn clear(&self) -> Result<()> {
        self.store.clear()?;
        self.mirror.write().clear();
        Ok(())
    }

    /// Keyword-triggered cards (sentinel [`TRIGGER_SCORE`]) merged with
    /// semantic cosine hits, triggered entries always outranking semantic
    /// ones.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let lower = query.to_lowercase();
        let triggered: Vec<u64> = {
            let guard = self.mirror.read();
            guard
                .values()
                .filter(|c| !c.trigger_keyword.is_empty() && lower.contains(&c.trigger_keyword.to_lowercase()))
                .map(|c| c.id)
                .collect()
        };

        let qvec = self.embedder.embed(query).await?;
        let k = limit + triggered.len();
        let semantic = self.store.query_dense(&qvec, Metric::Cosine, k, None, None)?;

        let mut scores: HashMap<u64, f32> = HashMap::new();
        for (id, score) in semantic {
            scores.insert(id, score);
        }
        for id in &triggered {
            scores.insert(*id, TRIGGER_SCORE);
        }

        let guard = self.mirror.read();
        let mut hits: Vec<SearchHit> = scores
            .into_iter()
            .filter_map(|(id, score)| guard.get(&id).cloned().map(|card| SearchHit { card, score }))
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StoreConfig, VectorFormat};
    use crate::providers::test_support::FakeEmbeddingProvider;
    use tempfile::tempdir;

    fn index() -> PlotCardIndex {
        let dir = tempdir().unwrap();
        let cfg = StoreConfig {
            dimension: 8,
            format: VectorFormat::Dense,
            ..Default::default()
        };
        let store = Store::open(cfg, dir.path(), Vec::new()).unwrap();
        PlotCardIndex::new(store, Arc::new(FakeEmbeddingProvider { dim: 8 }))
    }

    #[tokio::test]
    async fn triggered_card_outranks_semantic_hits() {
        let idx = index();
        idx.add_plot_card(
            "npc".into(),
            "Old Hermit".into(),
            "A recluse living at the edge of the forest".into(),
            "hermit".into(),
        )
        .await
        .unwrap();
        idx.add_plot_card(
            "item".into(),
            "Silver Ring".into(),
            "A plain silver ring with no markings".into(),
            "zzzz_never_matches".into(),
        )
        .await
        .unwrap();

        let hits = idx.search("you meet the hermit on the road", 2).await.unwrap();
        assert_eq!(hits[0].card.name, "Old Hermit");
        assert_eq!(hits[0].score, TRIGGER_SCORE);
    }

    #[tokio::test]
    async fn edit_without_content_change_reuses_stored_vector() {
        let idx = index();
        let (id, _) = idx
            .add_plot_card("npc".into(), "Baker".into(), "Sells bread".into(), "baker".into())
            .await
            .unwrap();
        let before = idx.store.get(id).unwrap().vector;
        idx.edit_plot_card(id, None, Some("Master Baker".into()), None, None)
            .await
            .unwrap();
        let after = idx.store.get(id).unwrap().vector;
        assert_eq!(before, after);
        assert_eq!(idx.mirror.read().get(&id).unwrap().name, "Master Baker");
    }

    #[tokio::test]
    async fn remove_plot_card_clears_store_and_mirror() {
        let idx = index();
        let (id, _) = idx
            .add_plot_card("item".into(), "Map".into(), "A torn map".into(), "map".into())
            .await
            .unwrap();
        let delta = idx.remove_plot_card(id).unwrap();
        assert!(delta.is_some());
        assert!(idx.store.get(id).is_none());
        assert!(idx.mirror.read().get(&id).is_none());
    }
}
