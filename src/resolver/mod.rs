//! Pattern resolver interface
//!
//! The resolver turns a pattern set into a plan and an ordered stream of
//! quads. It is an external collaborator; `DatasetResolver` is the
//! in-process reference implementation.

mod dataset;

pub use dataset::DatasetResolver;

use crate::graph::{PatternSet, PlanGraph, Quad};
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The resolver could not be reached; the pull is retried later
    #[error("resolver unreachable: {0}")]
    Unreachable(String),

    /// The quad stream broke off after it started
    #[error("resolver stream failed: {0}")]
    Stream(String),

    #[error("invalid dataset: {0}")]
    Dataset(String),
}

pub type ResolveResult<T> = Result<T, ResolveError>;

/// Ordered quads for one pull cycle
pub type QuadStream = BoxStream<'static, ResolveResult<Quad>>;

/// Output of a successful resolve call
pub struct Resolution {
    pub quads: QuadStream,
    pub plan: PlanGraph,
    /// False when no plan exists for the pattern set
    pub satisfiable: bool,
}

impl Resolution {
    pub fn new(quads: QuadStream, plan: PlanGraph) -> Self {
        let satisfiable = !plan.is_empty();
        Self {
            quads,
            plan,
            satisfiable,
        }
    }

    /// The pattern set has no plan and will never produce data
    pub fn unsatisfiable() -> Self {
        Self {
            quads: Box::pin(futures::stream::empty::<ResolveResult<Quad>>()),
            plan: PlanGraph::empty(),
            satisfiable: false,
        }
    }
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolution")
            .field("plan", &self.plan)
            .field("satisfiable", &self.satisfiable)
            .finish_non_exhaustive()
    }
}

/// Resolves pattern sets into quad streams
#[async_trait]
pub trait PatternResolver: Send + Sync {
    async fn resolve(&self, patterns: &PatternSet, concurrency: usize) -> ResolveResult<Resolution>;
}
