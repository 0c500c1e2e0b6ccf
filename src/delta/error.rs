use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeltaError {
    #[error("path {0} does not resolve to an existing value")]
    PathNotFound(String),

    #[error("path {0} does not resolve to a container that can hold a new member")]
    InvalidTarget(String),

    #[error("malformed json pointer: {0}")]
    MalformedPointer(String),
}

pub type Result<T> = std::result::Result<T, DeltaError>;
