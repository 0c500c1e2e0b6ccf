use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("story tree error: {0}")]
    Tree(#[from] crate::story_tree::TreeError),

    #[error("delta error: {0}")]
    Delta(#[from] crate::delta::DeltaError),

    #[error("memory bank error: {0}")]
    MemoryBank(#[from] crate::memory_bank::MemoryBankError),

    #[error("plot card error: {0}")]
    PlotCard(#[from] crate::plot_cards::PlotCardError),

    #[error("provider error: {0}")]
    Provider(#[from] crate::providers::ProviderError),

    #[error("provider call timed out")]
    ProviderTimeout,

    #[error("nothing to undo")]
    NothingToUndo,

    #[error("nothing to redo")]
    NothingToRedo,

    #[error("a turn is already in flight")]
    TurnInFlight,

    #[error("engine has not been initialized with a root node")]
    NotInitialized,

    #[error("node {0} is not a writer node")]
    NotAWriterNode(Uuid),

    #[error("a prior delta failed to apply and left the engine in an unusable state: {0}")]
    DeltaApplyFailed(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
