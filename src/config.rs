//! Small typed configuration structs, following this codebase's convention
//! of plain `serde`-deserializable settings structs with `Default` impls
//! rather than a generic config-file framework.

use serde::{Deserialize, Serialize};

/// Vector format a store holds. A store may mix both; each record tags
/// itself explicitly (see [`crate::vector_store::VectorFormat`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorFormat {
    Dense,
    Binary,
}

/// Distance/similarity metric used by a top-K query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    Cosine,
    Euclidean,
    Hamming,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub name: String,
    pub schema_version: u32,
    pub dimension: usize,
    pub format: VectorFormat,
    /// L2-normalize dense vectors at insert time and in `Cosine` queries.
    /// Forced to `false` when `format == Binary`.
    pub normalize: bool,
    pub id_field: String,
    pub meta_indexes: Vec<String>,
    pub cache: bool,
    pub verbose: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            schema_version: 1,
            dimension: 0,
            format: VectorFormat::Dense,
            normalize: true,
            id_field: "id".to_string(),
            meta_indexes: Vec::new(),
            cache: true,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Generate a new memory every `memory_generation_interval` turns.
    pub memory_generation_interval: u32,
    /// How many recent turns to include when building director/writer context.
    pub recent_turns_window: usize,
    /// Number of memories returned by a memory-bank search.
    pub memory_search_limit: usize,
    /// Number of plot cards returned by a plot-card search.
    pub plot_card_search_limit: usize,
    /// Per-provider-call deadline.
    pub provider_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_generation_interval: 10,
            recent_turns_window: 20,
            memory_search_limit: 5,
            plot_card_search_limit: 5,
            provider_timeout_ms: 30_000,
        }
    }
}
