use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryBankError {
    #[error("vector store error: {0}")]
    Store(#[from] crate::vector_store::VectorStoreError),

    #[error("delta error: {0}")]
    Delta(#[from] crate::delta::DeltaError),

    #[error("provider error: {0}")]
    Provider(#[from] crate::providers::ProviderError),

    #[error("malformed memory bank document: {0}")]
    MalformedDocument(String),
}

pub type Result<T> = std::result::Result<T, MemoryBankError>;
