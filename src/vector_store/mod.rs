//! Persistent vector store: record CRUD, online schema migrations, an
//! optional in-memory mirror, and heap-based top-K search over dense and
//! binary vectors.

pub mod accel;
pub mod error;
pub mod kv;
pub mod search;

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Map as JsonMap;
use serde_json::Value;

pub use accel::AccelPopcount;
pub use error::{Result, VectorStoreError};
pub use kv::{StoreMeta, VectorData, VectorRecord};

use crate::config::{Metric, StoreConfig, VectorFormat};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// An insertable vector before it is coerced into this store's on-disk
/// representation.
#[derive(Debug, Clone)]
pub enum VectorInput {
    Dense(Vec<f32>),
    BinaryBits(Vec<bool>),
    BinaryBytes(Vec<u8>),
}

/// A query vector, coerced the same way as [`VectorInput`] but without an id.
pub type QueryInput = VectorInput;

fn pack_bits_lsb_first(bits: &[bool]) -> Vec<u8> {
    let mut out = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            out[i / 8] |= 1 << (i % 8);
        }
    }
    out
}

/// One registered schema migration hop. Scoped to a single store
/// construction call rather than a process-global registry.
pub struct Migration {
    pub from: u32,
    pub to: u32,
    pub migrate: Box<dyn Fn(&mut VectorRecord) -> Result<()> + Send + Sync>,
}

struct CacheEntry {
    vector: VectorData,
    meta: JsonMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportedVector {
    pub id: u64,
    pub vector: VectorData,
    pub meta: JsonMap<String, Value>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportedStore {
    pub schema_version: u32,
    pub dimension: usize,
    pub format: VectorFormat,
    pub vectors: Vec<ExportedVector>,
}

/// Non-unique secondary index over one `meta` field, rebuilt from the
/// record map on open. Keyed by the field's JSON value rendered to a
/// canonical string, since `serde_json::Value` is not `Hash`.
#[derive(Default)]
struct SecondaryIndexes {
    by_field: std::collections::HashMap<String, std::collections::HashMap<String, Vec<u64>>>,
}

impl SecondaryIndexes {
    fn build(fields: &[String], records: &[VectorRecord]) -> Self {
        let mut by_field: std::collections::HashMap<String, std::collections::HashMap<String, Vec<u64>>> =
            fields.iter().map(|f| (f.clone(), Default::default())).collect();
        for rec in records {
            for field in fields {
                if let Some(v) = rec.meta.get(field) {
                    by_field
                        .get_mut(field)
                        .unwrap()
                        .entry(v.to_string())
                        .or_default()
                        .push(rec.id);
                }
            }
        }
        Self { by_field }
    }

    fn insert(&mut self, fields: &[String], id: u64, meta: &JsonMap<String, Value>) {
        for field in fields {
            if let Some(v) = meta.get(field) {
                self.by_field
                    .entry(field.clone())
                    .or_default()
                    .entry(v.to_string())
                    .or_default()
                    .push(id);
            }
        }
    }

    fn remove(&mut self, id: u64) {
        for index in self.by_field.values_mut() {
            for ids in index.values_mut() {
                ids.retain(|&x| x != id);
            }
        }
    }

    fn lookup(&self, field: &str, value: &Value) -> Option<Vec<u64>> {
        self.by_field.get(field)?.get(&value.to_string()).cloned()
    }
}

pub struct Store {
    config: StoreConfig,
    backend: kv::KvBackend,
    dir: PathBuf,
    meta: RwLock<StoreMeta>,
    cache: Option<RwLock<std::collections::HashMap<u64, CacheEntry>>>,
    accel: Option<Box<dyn AccelPopcount>>,
    indexes: RwLock<SecondaryIndexes>,
}

impl Store {
    /// Opens (creating if absent) a store at `dir`, running every registered
    /// migration hop needed to bring a persisted older schema up to
    /// `config.schema_version` inside one atomic meta-record update.
    pub fn open(config: StoreConfig, dir: impl AsRef<Path>, migrations: Vec<Migration>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let backend = kv::KvBackend::open(&dir)?;

        let existing = StoreMeta::load(&dir)?;
        let mut meta = match existing {
            // A brand-new store starts at the base schema version (1) and
            // runs the same migration chain a reopened older store would,
            // so the `migrations` log records every hop even when there
            // was never any data to transform.
            None => StoreMeta {
                schema_version: 1,
                dimension: config.dimension,
                format: config.format,
                normalize: config.normalize && config.format == VectorFormat::Dense,
                indexes: config.meta_indexes.clone(),
                created_at_ms: now_ms(),
                updated_at_ms: now_ms(),
                migrations: Vec::new(),
            },
            Some(m) => m,
        };

        if meta.schema_version > config.schema_version {
            return Err(VectorStoreError::SchemaNewerThanCode {
                code: config.schema_version,
                persisted: meta.schema_version,
            });
        }
        if meta.schema_version < config.schema_version {
            run_migrations(&backend, &mut meta, config.schema_version, &migrations)?;
        }
        meta.updated_at_ms = now_ms();
        meta.save(&dir)?;
        let meta = meta;

        let all_records = backend.scan();
        let indexes = SecondaryIndexes::build(&config.meta_indexes, &all_records);

        let cache = if config.cache {
            let map = all_records
                .into_iter()
                .map(|r| {
                    (
                        r.id,
                        CacheEntry {
                            vector: r.vector,
                            meta: r.meta,
                        },
                    )
                })
                .collect();
            Some(RwLock::new(map))
        } else {
            None
        };

        Ok(Self {
            config,
            backend,
            dir,
            meta: RwLock::new(meta),
            cache,
            accel: None,
            indexes: RwLock::new(indexes),
        })
    }

    /// Looks up ids whose `meta.<field>` equals `value`, for a field listed
    /// in this store's configured `meta_indexes`. Returns `None` if `field`
    /// is not an indexed field.
    pub fn lookup_index(&self, field: &str, value: &Value) -> Option<Vec<u64>> {
        self.indexes.read().lookup(field, value)
    }

    /// Installs a native-accelerated popcount implementation for binary
    /// Hamming queries. Absent a call to this, binary queries always use
    /// the in-language fallback table.
    pub fn set_accel(&mut self, accel: Box<dyn AccelPopcount>) {
        self.accel = Some(accel);
    }

    pub fn disable_cache(&mut self) {
        self.cache = None;
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn schema_version(&self) -> u32 {
        self.meta.read().schema_version
    }

    pub fn migrations_log(&self) -> Vec<(u32, u32)> {
        self.meta.read().migrations.clone()
    }

    fn coerce(&self, input: VectorInput) -> Result<VectorData> {
        match (self.config.format, input) {
            (VectorFormat::Dense, VectorInput::Dense(mut v)) => {
                if v.len() != self.config.dimension {
                    return Err(VectorStoreError::DimensionMismatch {
                        expected: self.config.dimension,
                        got: v.len(),
                    });
                }
                if self.config.normalize {
                    let n = search::norm(&v);
                    if n > 0.0 {
                        for x in v.iter_mut() {
                            *x /= n;
                        }
                    }
                }
                Ok(VectorData::Dense(v))
            }
            (VectorFormat::Binary, VectorInput::BinaryBits(bits)) => {
                if bits.len() != self.config.dimension {
                    return Err(VectorStoreError::DimensionMismatch {
                        expected: self.config.dimension,
                        got: bits.len(),
                    });
                }
                Ok(VectorData::Binary(pack_bits_lsb_first(&bits)))
            }
            (VectorFormat::Binary, VectorInput::BinaryBytes(bytes)) => {
                if bytes.len() * 8 < self.config.dimension {
                    return Err(VectorStoreError::DimensionMismatch {
                        expected: self.config.dimension,
                        got: bytes.len() * 8,
                    });
                }
                Ok(VectorData::Binary(bytes))
            }
            (expected, got) => Err(VectorStoreError::FormatMismatch {
                id: 0,
                expected,
                got: got.format_hint(),
            }),
        }
    }

    /// Inserts a new record (if `id` is `None`) or upserts an existing one.
    pub fn insert(
        &self,
        id: Option<u64>,
        input: VectorInput,
        meta: JsonMap<String, Value>,
    ) -> Result<u64> {
        let vector = self.coerce(input)?;
        let id = id.unwrap_or_else(|| self.backend.allocate_id());
        let ts = now_ms();
        let created_at_ms = self.backend.get(id).map(|r| r.created_at_ms).unwrap_or(ts);
        let record = VectorRecord {
            id,
            vector: vector.clone(),
            meta: meta.clone(),
            created_at_ms,
            updated_at_ms: ts,
        };
        self.backend.upsert(record)?;
        self.indexes.write().remove(id);
        self.indexes.write().insert(&self.config.meta_indexes, id, &meta);
        if let Some(cache) = &self.cache {
            cache.write().insert(id, CacheEntry { vector, meta });
        }
        Ok(id)
    }

    pub fn delete(&self, id: u64) -> Result<bool> {
        let deleted = self.backend.delete(id)?;
        if deleted {
            self.indexes.write().remove(id);
            if let Some(cache) = &self.cache {
                cache.write().remove(&id);
            }
        }
        Ok(deleted)
    }

    pub fn get(&self, id: u64) -> Option<VectorRecord> {
        self.backend.get(id)
    }

    pub fn count(&self) -> usize {
        self.backend.len()
    }

    pub fn clear(&self) -> Result<()> {
        self.backend.clear()?;
        *self.indexes.write() = SecondaryIndexes::build(&self.config.meta_indexes, &[]);
        if let Some(cache) = &self.cache {
            cache.write().clear();
        }
        Ok(())
    }

    /// Folds every record in id order through `f`, used by cursor-style
    /// scans that don't want a full materialized `Vec`.
    pub fn scan(&self) -> Vec<VectorRecord> {
        self.backend.scan()
    }

    /// Persists the compacted in-memory map and truncates the change log.
    pub fn compact(&self) -> Result<()> {
        self.backend.compact()
    }

    /// Dense top-K search (cosine or Euclidean). `predicate` filters
    /// candidates by `meta` before any vector math runs.
    pub fn query_dense(
        &self,
        query: &[f32],
        metric: Metric,
        k: usize,
        predicate: Option<&dyn Fn(&JsonMap<String, Value>) -> bool>,
        max_candidates: Option<usize>,
    ) -> Result<Vec<(u64, f32)>> {
        if query.len() != self.config.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.config.dimension,
                got: query.len(),
            });
        }
        let mut q = query.to_vec();
        if self.config.normalize && matches!(metric, Metric::Cosine) {
            let n = search::norm(&q);
            if n > 0.0 {
                for x in q.iter_mut() {
                    *x /= n;
                }
            }
        }

        let scored: Vec<(u64, f32)> = if let Some(cache) = &self.cache {
            let guard = cache.read();
            guard
                .iter()
                .take(max_candidates.unwrap_or(usize::MAX))
                .filter(|(_, e)| predicate.map(|p| p(&e.meta)).unwrap_or(true))
                .filter_map(|(id, e)| match &e.vector {
                    VectorData::Dense(v) => Some((*id, score_dense(metric, &q, v))),
                    VectorData::Binary(_) => None,
                })
                .collect()
        } else {
            self.backend
                .scan()
                .into_iter()
                .take(max_candidates.unwrap_or(usize::MAX))
                .filter(|r| predicate.map(|p| p(&r.meta)).unwrap_or(true))
                .filter_map(|r| match &r.vector {
                    VectorData::Dense(v) => Some((r.id, score_dense(metric, &q, v))),
                    VectorData::Binary(_) => None,
                })
                .collect()
        };

        Ok(search::top_k(scored.into_iter(), k))
    }

    /// Binary Hamming top-K search over packed bit vectors.
    pub fn query_binary(
        &self,
        query: &QueryInput,
        k: usize,
        predicate: Option<&dyn Fn(&JsonMap<String, Value>) -> bool>,
        max_candidates: Option<usize>,
    ) -> Result<Vec<(u64, f32)>> {
        let packed = match query {
            VectorInput::BinaryBits(bits) => pack_bits_lsb_first(bits),
            VectorInput::BinaryBytes(bytes) => bytes.clone(),
            VectorInput::Dense(_) => {
                return Err(VectorStoreError::FormatMismatch {
                    id: 0,
                    expected: VectorFormat::Binary,
                    got: VectorFormat::Dense,
                })
            }
        };
        let accel = self.accel.as_deref();

        let scored: Vec<(u64, f32)> = if let Some(cache) = &self.cache {
            let guard = cache.read();
            guard
                .iter()
                .take(max_candidates.unwrap_or(usize::MAX))
                .filter(|(_, e)| predicate.map(|p| p(&e.meta)).unwrap_or(true))
                .filter_map(|(id, e)| match &e.vector {
                    VectorData::Binary(v) => {
                        Some((*id, -(accel::hamming_distance(accel, &packed, v) as f32)))
                    }
                    VectorData::Dense(_) => None,
                })
                .collect()
        } else {
            self.backend
                .scan()
                .into_iter()
                .take(max_candidates.unwrap_or(usize::MAX))
                .filter(|r| predicate.map(|p| p(&r.meta)).unwrap_or(true))
                .filter_map(|r| match &r.vector {
                    VectorData::Binary(v) => {
                        Some((r.id, -(accel::hamming_distance(accel, &packed, v) as f32)))
                    }
                    VectorData::Dense(_) => None,
                })
                .collect()
        };

        Ok(search::top_k(scored.into_iter(), k))
    }

    pub fn export(&self) -> ExportedStore {
        let meta = self.meta.read();
        ExportedStore {
            schema_version: meta.schema_version,
            dimension: self.config.dimension,
            format: self.config.format,
            vectors: self
                .backend
                .scan()
                .into_iter()
                .map(|r| ExportedVector {
                    id: r.id,
                    vector: r.vector,
                    meta: r.meta,
                    created_at_ms: r.created_at_ms,
                    updated_at_ms: r.updated_at_ms,
                })
                .collect(),
        }
    }

    pub fn import(&self, data: ExportedStore, clear_before: bool) -> Result<()> {
        if data.dimension != self.config.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.config.dimension,
                got: data.dimension,
            });
        }
        if clear_before {
            self.clear()?;
        }
        for v in data.vectors {
            let input = match v.vector {
                VectorData::Dense(d) => VectorInput::Dense(d),
                VectorData::Binary(b) => VectorInput::BinaryBytes(b),
            };
            self.insert(Some(v.id), input, v.meta)?;
        }
        Ok(())
    }
}

impl VectorInput {
    fn format_hint(&self) -> VectorFormat {
        match self {
            VectorInput::Dense(_) => VectorFormat::Dense,
            VectorInput::BinaryBits(_) | VectorInput::BinaryBytes(_) => VectorFormat::Binary,
        }
    }
}

fn score_dense(metric: Metric, q: &[f32], v: &[f32]) -> f32 {
    match metric {
        Metric::Cosine => search::dot(q, v),
        Metric::Euclidean => -search::euclidean(q, v),
        Metric::Hamming => f32::NAN,
    }
}

fn run_migrations(
    backend: &kv::KvBackend,
    meta: &mut StoreMeta,
    target: u32,
    migrations: &[Migration],
) -> Result<()> {
    let mut v = meta.schema_version;
    while v < target {
        let next = v + 1;
        if let Some(hop) = migrations.iter().find(|m| m.from == v && m.to == next) {
            let mut records = backend.scan();
            for rec in records.iter_mut() {
                (hop.migrate)(rec).map_err(|e| VectorStoreError::MigrationFailed {
                    from: v,
                    to: next,
                    cause: e.to_string(),
                })?;
            }
            for rec in records {
                backend.upsert(rec)?;
            }
            meta.migrations.push((v, next));
            tracing::info!(target: "ifengine::vector_store", from = v, to = next, "applied schema migration");
        } else {
            tracing::warn!(
                target: "ifengine::vector_store",
                from = v,
                to = next,
                "no migration hop registered for this step, skipping"
            );
        }
        v = next;
    }
    meta.schema_version = target;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn dense_config(dim: usize) -> StoreConfig {
        StoreConfig {
            dimension: dim,
            format: VectorFormat::Dense,
            normalize: true,
            ..Default::default()
        }
    }

    fn binary_config(dim: usize) -> StoreConfig {
        StoreConfig {
            dimension: dim,
            format: VectorFormat::Binary,
            normalize: false,
            ..Default::default()
        }
    }

    #[test]
    fn insert_and_query_dense_cosine_ranks_closest_first() {
        let dir = tempdir().unwrap();
        let store = Store::open(dense_config(2), dir.path(), Vec::new()).unwrap();
        store.insert(None, VectorInput::Dense(vec![1.0, 0.0]), JsonMap::new()).unwrap();
        store.insert(None, VectorInput::Dense(vec![0.0, 1.0]), JsonMap::new()).unwrap();
        store.insert(None, VectorInput::Dense(vec![0.9, 0.1]), JsonMap::new()).unwrap();
        let results = store
            .query_dense(&[1.0, 0.0], Metric::Cosine, 2, None, None)
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 1);
    }

    #[test]
    fn insert_normalizes_dense_vectors() {
        let dir = tempdir().unwrap();
        let store = Store::open(dense_config(2), dir.path(), Vec::new()).unwrap();
        let id = store.insert(None, VectorInput::Dense(vec![3.0, 4.0]), JsonMap::new()).unwrap();
        match store.get(id).unwrap().vector {
            VectorData::Dense(v) => {
                let n = (v[0] * v[0] + v[1] * v[1]).sqrt();
                assert!((n - 1.0).abs() < 1e-5);
            }
            _ => panic!("expected dense"),
        }
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let store = Store::open(dense_config(3), dir.path(), Vec::new()).unwrap();
        let err = store.insert(None, VectorInput::Dense(vec![1.0, 0.0]), JsonMap::new());
        assert!(matches!(err, Err(VectorStoreError::DimensionMismatch { .. })));
    }

    #[test]
    fn binary_query_ranks_by_hamming_distance() {
        let dir = tempdir().unwrap();
        let store = Store::open(binary_config(8), dir.path(), Vec::new()).unwrap();
        let bits_a = vec![true, true, true, true, false, false, false, false];
        let bits_b = vec![false, false, false, false, true, true, true, true];
        let id_a = store
            .insert(None, VectorInput::BinaryBits(bits_a.clone()), JsonMap::new())
            .unwrap();
        let id_b = store
            .insert(None, VectorInput::BinaryBits(bits_b), JsonMap::new())
            .unwrap();
        let results = store
            .query_binary(&VectorInput::BinaryBits(bits_a), 2, None, None)
            .unwrap();
        assert_eq!(results[0].0, id_a);
        assert_eq!(results[1].0, id_b);
        assert!(results[0].1 > results[1].1);
    }

    #[test]
    fn metadata_predicate_filters_candidates() {
        let dir = tempdir().unwrap();
        let store = Store::open(dense_config(1), dir.path(), Vec::new()).unwrap();
        let mut meta_a = JsonMap::new();
        meta_a.insert("tag".into(), Value::String("keep".into()));
        let mut meta_b = JsonMap::new();
        meta_b.insert("tag".into(), Value::String("drop".into()));
        store.insert(None, VectorInput::Dense(vec![1.0]), meta_a).unwrap();
        store.insert(None, VectorInput::Dense(vec![1.0]), meta_b).unwrap();
        let pred = |m: &JsonMap<String, Value>| m.get("tag").and_then(|v| v.as_str()) == Some("keep");
        let results = store
            .query_dense(&[1.0], Metric::Cosine, 10, Some(&pred), None)
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn schema_upgrade_runs_registered_migrations_in_order() {
        let dir = tempdir().unwrap();
        {
            let store = Store::open(dense_config(1), dir.path(), Vec::new()).unwrap();
            store.insert(None, VectorInput::Dense(vec![1.0]), JsonMap::new()).unwrap();
        }
        let mut cfg = dense_config(1);
        cfg.schema_version = 3;
        let migrations = vec![
            Migration {
                from: 1,
                to: 2,
                migrate: Box::new(|r: &mut VectorRecord| {
                    r.meta.insert("v2".into(), Value::Bool(true));
                    Ok(())
                }),
            },
            Migration {
                from: 2,
                to: 3,
                migrate: Box::new(|r: &mut VectorRecord| {
                    r.meta.insert("v3".into(), Value::Bool(true));
                    Ok(())
                }),
            },
        ];
        let store = Store::open(cfg, dir.path(), migrations).unwrap();
        assert_eq!(store.schema_version(), 3);
        let rec = store.get(1).unwrap();
        assert_eq!(rec.meta.get("v2"), Some(&Value::Bool(true)));
        assert_eq!(rec.meta.get("v3"), Some(&Value::Bool(true)));
    }

    #[test]
    fn reopening_with_older_schema_version_fails() {
        let dir = tempdir().unwrap();
        {
            let mut cfg = dense_config(1);
            cfg.schema_version = 2;
            Store::open(cfg, dir.path(), Vec::new()).unwrap();
        }
        let cfg = dense_config(1); // schema_version = 1 by default
        let err = Store::open(cfg, dir.path(), Vec::new());
        assert!(matches!(err, Err(VectorStoreError::SchemaNewerThanCode { .. })));
    }

    #[test]
    fn secondary_index_lookup_finds_matching_ids() {
        let dir = tempdir().unwrap();
        let mut cfg = dense_config(1);
        cfg.meta_indexes = vec!["tag".to_string()];
        let store = Store::open(cfg, dir.path(), Vec::new()).unwrap();
        let mut meta_a = JsonMap::new();
        meta_a.insert("tag".into(), Value::String("npc".into()));
        let id_a = store.insert(None, VectorInput::Dense(vec![1.0]), meta_a).unwrap();
        let mut meta_b = JsonMap::new();
        meta_b.insert("tag".into(), Value::String("item".into()));
        store.insert(None, VectorInput::Dense(vec![1.0]), meta_b).unwrap();

        let found = store.lookup_index("tag", &Value::String("npc".into())).unwrap();
        assert_eq!(found, vec![id_a]);
    }

    #[test]
    fn export_import_round_trips_records() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();
        let store_a = Store::open(dense_config(2), dir_a.path(), Vec::new()).unwrap();
        store_a.insert(None, VectorInput::Dense(vec![1.0, 0.0]), JsonMap::new()).unwrap();
        store_a.insert(None, VectorInput::Dense(vec![0.0, 1.0]), JsonMap::new()).unwrap();
        let exported = store_a.export();

        let store_b = Store::open(dense_config(2), dir_b.path(), Vec::new()).unwrap();
        store_b.import(exported, false).unwrap();
        assert_eq!(store_b.count(), 2);
    }
}
