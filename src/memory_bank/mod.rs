//! Memory bank: a retrieval set of embedded textual memories blending
//! semantic similarity and recency.
//!
//! Wraps a vector store with an in-memory mirror: the mirror is the
//! authoritative copy for recency bookkeeping, while the vector store is
//! authoritative for the embeddings themselves.

pub mod error;

pub use error::{MemoryBankError, Result};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::delta::{apply_ops, diff, DeltaPair, Op};
use crate::providers::{ChatMessage, ChatProvider, ChatRequest, EmbeddingProvider};
use crate::vector_store::{Store, VectorInput};
use crate::config::Metric;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: u64,
    pub text: String,
    pub created_at_turn: u32,
    pub last_accessed_at_turn: u32,
}

fn think_tag_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<think>.*?</think>").unwrap())
}

fn strip_think_tags(text: &str) -> String {
    think_tag_re().replace_all(text, "").trim().to_string()
}

fn mirror_doc(mirror: &HashMap<u64, Memory>) -> Value {
    serde_json::json!({ "memories": serde_json::to_value(mirror).unwrap_or(Value::Null) })
}

pub struct MemoryBank {
    store: Store,
    embedder: Arc<dyn EmbeddingProvider>,
    mirror: RwLock<HashMap<u64, Memory>>,
}

impl MemoryBank {
    /// Hydrates the mirror from the persistent store at construction time;
    /// the mirror is the source of truth after a cold start.
    pub fn new(store: Store, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let mirror = store
            .scan()
            .into_iter()
            .map(|rec| {
                let text = rec
                    .meta
                    .get("text")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let created_at_turn = rec
                    .meta
                    .get("created_at_turn")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32;
                (
                    rec.id,
                    Memory {
                        id: rec.id,
                        text,
                        created_at_turn,
                        last_accessed_at_turn: created_at_turn,
                    },
                )
            })
            .collect();
        Self {
            store,
            embedder,
            mirror: RwLock::new(mirror),
        }
    }

    pub async fn add_memory(&self, text: String, current_turn: u32) -> Result<(u64, DeltaPair)> {
        let vector = self.embedder.embed(&text).await?;
        let mut meta = serde_json::Map::new();
        meta.insert("text".into(), Value::String(text.clone()));
        meta.insert("created_at_turn".into(), Value::from(current_turn));
        let id = self.store.insert(None, VectorInput::Dense(vector), meta)?;

        let mut guard = self.mirror.write();
        let before = mirror_doc(&guard);
        guard.insert(
            id,
            Memory {
                id,
                text,
                created_at_turn: current_turn,
                last_accessed_at_turn: current_turn,
            },
        );
        let after = mirror_doc(&guard);
        Ok((
            id,
            DeltaPair {
                apply: diff(&before, &after, ""),
                revert: diff(&after, &before, ""),
            },
        ))
    }

    /// Summarizes `turns` (rendered as `actor: text` lines) via `chat`, strips
    /// any `<think>...</think>` spans, then adds the result as a memory.
    pub async fn generate_and_add_memory(
        &self,
        turns: &[(String, String)],
        current_turn: u32,
        chat: &dyn ChatProvider,
        deadline: std::time::Duration,
    ) -> Result<(u64, DeltaPair)> {
        let transcript = turns
            .iter()
            .map(|(actor, text)| format!("{actor}: {text}"))
            .collect::<Vec<_>>()
            .join("\n");
        let req = ChatRequest {
            messages: vec![ChatMessage {
                role: "system".to_string(),
                content: format!(
                    "Summarize the following scene into one concise memory:\n{transcript}"
                ),
            }],
            tool_names: Vec::new(),
            deadline,
        };
        let resp = chat.chat(req).await?;
        let cleaned = strip_think_tags(&resp.text);
        self.add_memory(cleaned, current_turn).await
    }

    pub fn remove_memory(&self, id: u64) -> Result<Option<DeltaPair>> {
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

    /// Embeds `query`, takes `2*limit` dense cosine nearest neighbors,
    /// bumps their `last_accessed_at_turn` in the mirror, then blends in up
    /// to 5 of the most recently accessed memories not already in the hit
    /// set. Final result is the union sorted by `last_accessed_at_turn`
    /// descending, truncated to `limit`.
    pub async fn search(&self, query: &str, current_turn: u32, limit: usize) -> Result<Vec<Memory>> {
        let qvec = self.embedder.embed(query).await?;
        let hits = self
            .store
            .query_dense(&qvec, Metric::Cosine, limit * 2, None, None)?;

        let mut guard = self.mirror.write();
        let mut hit_ids = std::collections::HashSet::new();
        for (id, _score) in &hits {
            if let Some(m) = guard.get_mut(id) {
                m.last_accessed_at_turn = current_turn;
                hit_ids.insert(*id);
            }
        }

        let mut recency_candidates: Vec<Memory> = guard
            .values()
            .filter(|m| !hit_ids.contains(&m.id))
            .cloned()
            .collect();
        recency_candidates.sort_by(|a, b| b.last_accessed_at_turn.cmp(&a.last_accessed_at_turn));
        recency_candidates.truncate(5);

        let mut union: Vec<Memory> = hit_ids
            .iter()
            .filter_map(|id| guard.get(id).cloned())
            .chain(recency_candidates)
            .collect();
        union.sort_by(|a, b| b.last_accessed_at_turn.cmp(&a.last_accessed_at_turn));
        union.truncate(limit);
        Ok(union)
    }

    /// Reconciles the mirror to the state `ops` describes, re-embedding any
    /// added memory whose text the backing store no longer holds (always
    /// true for memories re-added by an undone removal).
    pub async fn apply_delta(&self, ops: &[Op]) -> Result<()> {
        let target_doc = {
            let guard = self.mirror.read();
            let mut doc = mirror_doc(&guard);
            apply_ops(&mut doc, ops)?;
            doc
        };
        let target: HashMap<u64, Memory> = serde_json::from_value(
            target_doc.get("memories").cloned().unwrap_or(Value::Null),
        )
        .map_err(|e| MemoryBankError::MalformedDocument(e.to_string()))?;

        let current_ids: std::collections::HashSet<u64> =
            self.mirror.read().keys().copied().collect();
        let target_ids: std::collections::HashSet<u64> = target.keys().copied().collect();

        for id in target_ids.difference(&current_ids) {
            let mem = &target[id];
            if self.store.get(*id).is_none() {
                let vector = self.embedder.embed(&mem.text).await?;
                let mut meta = serde_json::Map::new();
                meta.insert("text".into(), Value::String(mem.text.clone()));
                meta.insert("created_at_turn".into(), Value::from(mem.created_at_turn));
                self.store.insert(Some(*id), VectorInput::Dense(vector), meta)?;
            }
        }
        for id in current_ids.difference(&target_ids) {
            self.store.delete(*id)?;
        }

        *self.mirror.write() = target;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.store.clear()?;
        self.mirror.write().clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.mirror.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
