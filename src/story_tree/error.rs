use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("node {0} not found")]
    NotFound(Uuid),

    #[error("tree already has a root node")]
    RootAlreadyExists,

    #[error("the root node cannot be deleted")]
    CannotDeleteRoot,

    #[error("tree has no root node")]
    EmptyTree,

    #[error("node {0} would create a cycle")]
    WouldCreateCycle(Uuid),
}

pub type Result<T> = std::result::Result<T, TreeError>;
