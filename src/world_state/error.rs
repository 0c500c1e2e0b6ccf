use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WorldStateError {
    #[error("plot {0} not found")]
    PlotNotFound(Uuid),
}

pub type Result<T> = std::result::Result<T, WorldStateError>;
