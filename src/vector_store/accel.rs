//! Pluggable native-accelerated Hamming distance, with a permanent
//! in-language fallback when no accelerated module is configured or the
//! configured one fails to load.
//!
//! The native module is modeled as a trait object rather than a concrete
//! WASM/FFI binding so this crate never depends on a WASM runtime itself;
//! a caller that wants the accelerated path plugs in their own
//! `AccelPopcount` implementation wrapping whatever ABI they loaded
//! (`hamming`/`hamming_distance`/`hammingDistance`/`popcount_xor` exported
//! over shared linear memory).

/// A 256-entry popcount table, one lookup per byte, summed over the XOR of
/// two equal-length byte slices.
fn popcount_table() -> &'static [u8; 256] {
    static TABLE: std::sync::OnceLock<[u8; 256]> = std::sync::OnceLock::new();
    TABLE.get_or_init(|| {
        let mut t = [0u8; 256];
        for (i, slot) in t.iter_mut().enumerate() {
            *slot = (i as u8).count_ones() as u8;
        }
        t
    })
}

/// In-language fallback: always correct, never fails.
pub fn hamming_fallback(a: &[u8], b: &[u8]) -> u32 {
    let table = popcount_table();
    let mut dist = 0u32;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dist += table[(x ^ y) as usize] as u32;
    }
    dist
}

/// A native-accelerated popcount implementation. Implementors own whatever
/// module-loading mechanism (WASM, FFI, SIMD intrinsic) backs `hamming`;
/// this crate only needs the distance, not the loading protocol.
pub trait AccelPopcount: Send + Sync {
    /// Returns `None` if the accelerated path cannot service this call (e.g.
    /// the module failed to load); the caller falls back permanently for the
    /// session in that case.
    fn hamming(&self, a: &[u8], b: &[u8]) -> Option<u32>;
}

/// Resolves a distance using `accel` if present and it returns `Some`,
/// logging a warning and falling back otherwise.
pub fn hamming_distance(accel: Option<&dyn AccelPopcount>, a: &[u8], b: &[u8]) -> u32 {
    if let Some(acc) = accel {
        if let Some(d) = acc.hamming(a, b) {
            return d;
        }
        tracing::warn!(
            target: "ifengine::vector_store",
            "accelerated popcount module failed, falling back to table-based popcount for this session"
        );
    }
    hamming_fallback(a, b)
}
