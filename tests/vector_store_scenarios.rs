use ifengine::config::{StoreConfig, VectorFormat};
use ifengine::vector_store::{AccelPopcount, Migration, Store, VectorInput};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tempfile::tempdir;

/// Scenario 1: registering migrations `1->2` (adds a `cat` index) and
/// `2->3` (no-op) on a fresh store opened at declared version 3 leaves
/// `schema.version == 3`, `migrations == [(1,2),(2,3)]`, and the `cat`
/// index usable.
#[test]
fn migration_log_on_fresh_store_records_every_hop() {
    let dir = tempdir().unwrap();
    let cfg = StoreConfig {
        dimension: 4,
        schema_version: 3,
        format: VectorFormat::Dense,
        meta_indexes: vec!["cat".to_string()],
        ..Default::default()
    };
    let migrations = vec![
        Migration {
            from: 1,
            to: 2,
            migrate: Box::new(|_rec| Ok(())),
        },
        Migration {
            from: 2,
            to: 3,
            migrate: Box::new(|_rec| Ok(())),
        },
    ];
    let store = Store::open(cfg, dir.path(), migrations).unwrap();
    assert_eq!(store.schema_version(), 3);
    assert_eq!(store.migrations_log(), vec![(1, 2), (2, 3)]);

    let mut meta = serde_json::Map::new();
    meta.insert("cat".into(), serde_json::Value::String("npc".into()));
    store
        .insert(None, VectorInput::Dense(vec![1.0, 0.0, 0.0, 0.0]), meta)
        .unwrap();
    let found = store.lookup_index("cat", &serde_json::Value::String("npc".into()));
    assert_eq!(found.unwrap().len(), 1);
}

struct OracleAccel;

impl AccelPopcount for OracleAccel {
    fn hamming(&self, a: &[u8], b: &[u8]) -> Option<u32> {
        Some(ifengine::vector_store::accel::hamming_fallback(a, b))
    }
}

fn random_bits(n: usize, seed: u64) -> Vec<bool> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen::<bool>()).collect()
}

/// Scenario 2: querying 1,000 random 256-bit binary records under fallback
/// popcount, then again under an oracle accelerated path that simply wraps
/// the fallback, yields identical id sequences and distances.
#[test]
fn binary_popcount_accel_matches_fallback() {
    let dir = tempdir().unwrap();
    let cfg = StoreConfig {
        dimension: 256,
        format: VectorFormat::Binary,
        normalize: false,
        ..Default::default()
    };
    let mut store = Store::open(cfg, dir.path(), Vec::new()).unwrap();
    for i in 0..1000u64 {
        let bits = random_bits(256, i);
        store
            .insert(None, VectorInput::BinaryBits(bits), serde_json::Map::new())
            .unwrap();
    }
    let query = VectorInput::BinaryBits(random_bits(256, 9999));

    let fallback_hits = store.query_binary(&query, 10, None, None).unwrap();

    store.set_accel(Box::new(OracleAccel));
    let accel_hits = store.query_binary(&query, 10, None, None).unwrap();

    assert_eq!(fallback_hits, accel_hits);
}
