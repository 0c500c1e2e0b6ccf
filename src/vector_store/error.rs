use thiserror::Error;

/// Error taxonomy for the vector store, expressed as a `thiserror` enum with
/// one variant per failure shape rather than a single struct-carrying code.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("vector has dimension {got}, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("record {id} has format {got:?}, query expected {expected:?}")]
    FormatMismatch {
        id: u64,
        expected: crate::config::VectorFormat,
        got: crate::config::VectorFormat,
    },

    #[error("store has not been opened")]
    NotInitialized,

    #[error("persisted schema version {persisted} is newer than the code's {code}")]
    SchemaNewerThanCode { code: u32, persisted: u32 },

    #[error("migration from {from} to {to} failed: {cause}")]
    MigrationFailed {
        from: u32,
        to: u32,
        cause: String,
    },

    #[error("record {0} not found")]
    NotFound(u64),

    #[error("backend error: {0}")]
    Backend(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("snapshot codec error: {0}")]
    Bincode(#[from] Box<bincode::ErrorKind>),
}

pub type Result<T> = std::result::Result<T, VectorStoreError>;
