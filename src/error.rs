//! Crate-level error type

use crate::config::ConfigError;
use crate::graph::FragmentId;
use crate::resolver::ResolveError;
use crate::storage::StoreError;
use thiserror::Error;

/// Errors surfaced by the request layer and by a pull step
#[derive(Debug, Error)]
pub enum CuratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("a fragment needs at least one triple pattern")]
    EmptyPatternSet,

    #[error("Fragment not found: {0}")]
    FragmentNotFound(FragmentId),

    #[error("Sink not found: {0}")]
    SinkNotFound(String),
}

impl CuratorError {
    /// Whether retrying on a later tick may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Unavailable(_) | StoreError::LockPoisoned)
                | Self::Resolve(_)
        )
    }
}

/// Result type for curator operations
pub type CuratorResult<T> = Result<T, CuratorError>;
