//! Embedded, versioned key-value engine backing a single named vector store:
//! an in-memory map mirrored by an append-only change log (magic + kind +
//! len + payload + crc32 framing) and periodic bincode snapshots, published
//! via write-next-then-rename. No transaction/commit boundary: every vector
//! record mutation is a single self-contained change-log entry, since the
//! vector store's unit of durability is one record, not a multi-edge
//! transaction.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use crc32fast::Hasher as Crc32;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::error::{Result, VectorStoreError};
use crate::config::VectorFormat;

const LOG_MAGIC: u32 = 0x5653_5431; // 'VST1'
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VectorData {
    Dense(Vec<f32>),
    Binary(Vec<u8>),
}

impl VectorData {
    pub fn format(&self) -> VectorFormat {
        match self {
            VectorData::Dense(_) => VectorFormat::Dense,
            VectorData::Binary(_) => VectorFormat::Binary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: u64,
    pub vector: VectorData,
    pub meta: serde_json::Map<String, serde_json::Value>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ChangeKind {
    Insert = 1,
    Delete = 2,
    Clear = 3,
}

impl ChangeKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(ChangeKind::Insert),
            2 => Some(ChangeKind::Delete),
            3 => Some(ChangeKind::Clear),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    next_id: u64,
    records: Vec<VectorRecord>,
}

/// The backend for one named store: an ordered in-memory map plus its
/// durable change log and compacted snapshot.
pub struct KvBackend {
    dir: PathBuf,
    map: RwLock<BTreeMap<u64, VectorRecord>>,
    log_file: parking_lot::Mutex<File>,
    next_id: AtomicU64,
}

fn log_path(dir: &Path) -> PathBuf {
    dir.join("changes.log")
}

fn snapshot_path(dir: &Path) -> PathBuf {
    dir.join("snapshot.bin")
}

fn snapshot_tmp_path(dir: &Path) -> PathBuf {
    dir.join("snapshot.bin.tmp")
}

fn write_change_record(file: &mut File, kind: ChangeKind, payload: &[u8]) -> Result<()> {
    let mut buf = Vec::with_capacity(4 + 1 + 4 + payload.len() + 4);
    buf.extend_from_slice(&LOG_MAGIC.to_le_bytes());
    buf.push(kind as u8);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    let mut hasher = Crc32::new();
    hasher.update(payload);
    buf.extend_from_slice(&hasher.finalize().to_le_bytes());
    file.write_all(&buf)?;
    file.flush()?;
    file.sync_all()?;
    Ok(())
}

struct ChangeRecord {
    kind: ChangeKind,
    payload: Vec<u8>,
}

fn read_change_log(dir: &Path) -> Result<Vec<ChangeRecord>> {
    let path = log_path(dir);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = BufReader::new(File::open(&path)?);
    let mut out = Vec::new();
    loop {
        let mut header = [0u8; 4 + 1 + 4];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
        if magic != LOG_MAGIC {
            // A torn write at the tail; stop replay here rather than fail
            // the whole open.
            tracing::warn!(target: "ifengine::vector_store", "change log magic mismatch, truncating replay");
            break;
        }
        let kind = match ChangeKind::from_u8(header[4]) {
            Some(k) => k,
            None => break,
        };
        let len = u32::from_le_bytes(header[5..9].try_into().unwrap()) as usize;
        let mut payload = vec![0u8; len];
        if reader.read_exact(&mut payload).is_err() {
            break;
        }
        let mut crc_buf = [0u8; 4];
        if reader.read_exact(&mut crc_buf).is_err() {
            break;
        }
        let expected = u32::from_le_bytes(crc_buf);
        let mut hasher = Crc32::new();
        hasher.update(&payload);
        if hasher.finalize() != expected {
            tracing::warn!(target: "ifengine::vector_store", "change log CRC mismatch, truncating replay");
            break;
        }
        out.push(ChangeRecord { kind, payload });
    }
    Ok(out)
}

fn load_snapshot(dir: &Path) -> Result<Snapshot> {
    let path = snapshot_path(dir);
    if !path.exists() {
        return Ok(Snapshot {
            version: SNAPSHOT_VERSION,
            next_id: 1,
            records: Vec::new(),
        });
    }
    let bytes = std::fs::read(&path)?;
    let snap: Snapshot = bincode::deserialize(&bytes)?;
    Ok(snap)
}

fn write_snapshot_atomic(dir: &Path, snap: &Snapshot) -> Result<()> {
    let tmp = snapshot_tmp_path(dir);
    let bytes = bincode::serialize(snap)?;
    {
        let mut f = File::create(&tmp)?;
        f.write_all(&bytes)?;
        f.flush()?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, snapshot_path(dir))?;
    Ok(())
}

impl KvBackend {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let snap = load_snapshot(&dir)?;
        let mut map: BTreeMap<u64, VectorRecord> =
            snap.records.into_iter().map(|r| (r.id, r)).collect();
        let mut next_id = snap.next_id;

        for change in read_change_log(&dir)? {
            match change.kind {
                ChangeKind::Insert => {
                    let rec: VectorRecord = bincode::deserialize(&change.payload)?;
                    next_id = next_id.max(rec.id + 1);
                    map.insert(rec.id, rec);
                }
                ChangeKind::Delete => {
                    if change.payload.len() == 8 {
                        let id = u64::from_le_bytes(change.payload[..8].try_into().unwrap());
                        map.remove(&id);
                    }
                }
                ChangeKind::Clear => {
                    map.clear();
                }
            }
        }

        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path(&dir))?;

        Ok(Self {
            dir,
            map: RwLock::new(map),
            log_file: parking_lot::Mutex::new(log_file),
            next_id: AtomicU64::new(next_id),
        })
    }

    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, AtomicOrdering::SeqCst)
    }

    pub fn observe_id(&self, id: u64) {
        // Keep the allocator ahead of any explicitly supplied id.
        self.next_id.fetch_max(id + 1, AtomicOrdering::SeqCst);
    }

    pub fn upsert(&self, record: VectorRecord) -> Result<()> {
        let payload = bincode::serialize(&record)?;
        write_change_record(&mut self.log_file.lock(), ChangeKind::Insert, &payload)?;
        self.observe_id(record.id);
        self.map.write().insert(record.id, record);
        Ok(())
    }

    pub fn delete(&self, id: u64) -> Result<bool> {
        let existed = self.map.read().contains_key(&id);
        if !existed {
            return Ok(false);
        }
        write_change_record(&mut self.log_file.lock(), ChangeKind::Delete, &id.to_le_bytes())?;
        self.map.write().remove(&id);
        Ok(true)
    }

    pub fn get(&self, id: u64) -> Option<VectorRecord> {
        self.map.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> Result<()> {
        write_change_record(&mut self.log_file.lock(), ChangeKind::Clear, &[])?;
        self.map.write().clear();
        Ok(())
    }

    /// Snapshot the current map to `snapshot.bin` via write-temp + fsync +
    /// atomic rename, then truncate the change log since every record it
    /// held is now reflected in the snapshot.
    pub fn compact(&self) -> Result<()> {
        let map = self.map.read();
        let records: Vec<VectorRecord> = map.values().cloned().collect();
        let next_id = self.next_id.load(AtomicOrdering::SeqCst);
        drop(map);
        write_snapshot_atomic(
            &self.dir,
            &Snapshot {
                version: SNAPSHOT_VERSION,
                next_id,
                records,
            },
        )?;
        let mut log = self.log_file.lock();
        *log = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(log_path(&self.dir))?;
        Ok(())
    }

    /// Ordered snapshot of every record, id-ascending (the `BTreeMap`'s
    /// natural order), used by cursor scans and cache hydration.
    pub fn scan(&self) -> Vec<VectorRecord> {
        self.map.read().values().cloned().collect()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

pub fn meta_path(dir: &Path) -> PathBuf {
    dir.join("meta.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub schema_version: u32,
    pub dimension: usize,
    pub format: VectorFormat,
    pub normalize: bool,
    pub indexes: Vec<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub migrations: Vec<(u32, u32)>,
}

impl StoreMeta {
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = meta_path(dir);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let tmp = dir.join("meta.json.tmp");
        let bytes = serde_json::to_vec_pretty(self)?;
        {
            let mut f = File::create(&tmp)?;
            f.write_all(&bytes)?;
            f.flush()?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp, meta_path(dir))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn rec(id: u64, v: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id,
            vector: VectorData::Dense(v),
            meta: serde_json::Map::new(),
            created_at_ms: 0,
            updated_at_ms: 0,
        }
    }

    #[test]
    fn upsert_then_reopen_replays_change_log() -> Result<()> {
        let dir = tempdir().unwrap();
        {
            let backend = KvBackend::open(dir.path())?;
            backend.upsert(rec(1, vec![1.0, 0.0]))?;
            backend.upsert(rec(2, vec![0.0, 1.0]))?;
            backend.delete(1)?;
        }
        let backend = KvBackend::open(dir.path())?;
        assert_eq!(backend.len(), 1);
        assert!(backend.get(1).is_none());
        assert!(backend.get(2).is_some());
        Ok(())
    }

    #[test]
    fn compact_then_reopen_preserves_state_and_truncates_log() -> Result<()> {
        let dir = tempdir().unwrap();
        {
            let backend = KvBackend::open(dir.path())?;
            backend.upsert(rec(1, vec![1.0, 0.0]))?;
            backend.compact()?;
            backend.upsert(rec(2, vec![0.0, 1.0]))?;
        }
        let backend = KvBackend::open(dir.path())?;
        assert_eq!(backend.len(), 2);
        Ok(())
    }

    #[test]
    fn clear_removes_all_records_durably() -> Result<()> {
        let dir = tempdir().unwrap();
        {
            let backend = KvBackend::open(dir.path())?;
            backend.upsert(rec(1, vec![1.0]))?;
            backend.upsert(rec(2, vec![2.0]))?;
            backend.clear()?;
        }
        let backend = KvBackend::open(dir.path())?;
        assert_eq!(backend.len(), 0);
        Ok(())
    }

    #[test]
    fn allocate_id_is_monotonic_and_survives_explicit_ids() -> Result<()> {
        let dir = tempdir().unwrap();
        let backend = KvBackend::open(dir.path())?;
        backend.upsert(rec(10, vec![1.0]))?;
        let next = backend.allocate_id();
        assert!(next > 10);
        Ok(())
    }
}
