//! Error types for stroke admission and worker configuration.

use crate::stroke::StrokeId;

/// Errors returned by stroke admission calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StrokeError {
    /// The id no longer resolves, usually because the stroke already
    /// completed and left the queue.
    #[error("{0} is not in the queue")]
    StrokeNotFound(StrokeId),

    #[error("{0} has already ended")]
    StrokeEnded(StrokeId),

    /// A job added to one half of a buddy pair could not be cloned for the
    /// other half.
    #[error("job for {stroke} cannot be cloned for level of detail {level_of_detail}")]
    LodCloneUnavailable {
        stroke: StrokeId,
        level_of_detail: u32,
    },
}

/// Result alias for admission calls.
pub type StrokeResult<T> = Result<T, StrokeError>;

/// Errors from loading worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}")]
    InvalidValue(String),

    #[error("worker pool needs at least one worker")]
    ZeroWorkers,
}

/// Errors from starting a [`ThreadedUpdater`](crate::ThreadedUpdater).
#[derive(Debug, thiserror::Error)]
pub enum UpdaterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn worker thread")]
    Spawn(#[from] std::io::Error),
}
