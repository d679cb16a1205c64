//! Plugin trait: the contract consumers of fragment data implement

use crate::fragment::{Sink, SinkId};
use crate::graph::{FragmentId, PlanGraph, Quad};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("sink rejected delivery: {0}")]
    Rejected(String),
    #[error("plugin error: {0}")]
    Internal(String),
}

/// A consumer of fragment quads.
///
/// A plugin declaring a sink type is called once per matching sink, with
/// the quad already remapped for that sink. A generic plugin (no sink
/// type) is called once per quad with no sink.
#[async_trait]
pub trait FragmentPlugin: Send + Sync {
    /// Unique identifier, used for deduplication and configuration
    fn id(&self) -> &str;

    /// Sink type this plugin delivers to; `None` for generic plugins
    fn sink_type(&self) -> Option<&str> {
        None
    }

    /// Whether `complete` is called per sink rather than once per cycle
    fn sink_aware(&self) -> bool {
        false
    }

    /// Consume one quad. An error excludes the sink for the rest of the cycle.
    async fn consume(
        &self,
        fragment: &FragmentId,
        quad: &Quad,
        plan: &PlanGraph,
        sink: Option<&Sink>,
    ) -> Result<(), PluginError>;

    /// The pull cycle finished
    async fn complete(&self, fragment: &FragmentId, sink: Option<&Sink>) -> Result<(), PluginError>;

    /// The sink was cancelled or its fragment destroyed; drop anything kept for it
    fn release(&self, _sink: &SinkId) {}
}
