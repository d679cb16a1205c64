//! Built-in plugins

use super::traits::{FragmentPlugin, PluginError};
use crate::fragment::{Sink, SinkId};
use crate::graph::{FragmentId, PlanGraph, Quad};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Generic plugin that logs every quad and completion
#[derive(Debug, Default)]
pub struct TracePlugin {
    quads: AtomicUsize,
}

impl TracePlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quads seen since startup
    pub fn quads_seen(&self) -> usize {
        self.quads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl FragmentPlugin for TracePlugin {
    fn id(&self) -> &str {
        "trace"
    }

    async fn consume(
        &self,
        fragment: &FragmentId,
        quad: &Quad,
        _plan: &PlanGraph,
        _sink: Option<&Sink>,
    ) -> Result<(), PluginError> {
        self.quads.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(fragment = %fragment, pattern = %quad.pattern_id, triple = %quad.triple, "quad");
        Ok(())
    }

    async fn complete(&self, fragment: &FragmentId, _sink: Option<&Sink>) -> Result<(), PluginError> {
        tracing::debug!(fragment = %fragment, quads_seen = self.quads_seen(), "pull cycle complete");
        Ok(())
    }
}

/// Per-sink delivery record kept by [`DeliveryPlugin`]
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    pub quads: Vec<Quad>,
    /// Completed cycles
    pub completions: usize,
}

/// Sink-aware plugin buffering delivered quads per sink.
///
/// Handles sinks of type `delivery`. The outbox is shared between clones
/// of the handle returned by [`DeliveryPlugin::outbox`].
#[derive(Debug, Clone, Default)]
pub struct DeliveryPlugin {
    outbox: Arc<DashMap<SinkId, Delivery>>,
}

impl DeliveryPlugin {
    pub const SINK_TYPE: &'static str = "delivery";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn outbox(&self) -> Arc<DashMap<SinkId, Delivery>> {
        self.outbox.clone()
    }

    pub fn delivered(&self, sink: &SinkId) -> Vec<Quad> {
        self.outbox
            .get(sink)
            .map(|d| d.quads.clone())
            .unwrap_or_default()
    }

    pub fn completions(&self, sink: &SinkId) -> usize {
        self.outbox.get(sink).map_or(0, |d| d.completions)
    }

    /// Remove and return everything buffered for a sink
    pub fn drain(&self, sink: &SinkId) -> Vec<Quad> {
        self.outbox
            .remove(sink)
            .map(|(_, d)| d.quads)
            .unwrap_or_default()
    }
}

#[async_trait]
impl FragmentPlugin for DeliveryPlugin {
    fn id(&self) -> &str {
        "delivery"
    }

    fn sink_type(&self) -> Option<&str> {
        Some(Self::SINK_TYPE)
    }

    fn sink_aware(&self) -> bool {
        true
    }

    async fn consume(
        &self,
        _fragment: &FragmentId,
        quad: &Quad,
        _plan: &PlanGraph,
        sink: Option<&Sink>,
    ) -> Result<(), PluginError> {
        let sink = sink.ok_or_else(|| PluginError::Internal("delivery needs a sink".into()))?;
        self.outbox
            .entry(sink.id.clone())
            .or_default()
            .quads
            .push(quad.clone());
        Ok(())
    }

    async fn complete(&self, fragment: &FragmentId, sink: Option<&Sink>) -> Result<(), PluginError> {
        let sink = sink.ok_or_else(|| PluginError::Internal("delivery needs a sink".into()))?;
        self.outbox.entry(sink.id.clone()).or_default().completions += 1;
        tracing::debug!(fragment = %fragment, sink = %sink.id, "delivery complete");
        Ok(())
    }

    fn release(&self, sink: &SinkId) {
        if self.outbox.remove(sink).is_some() {
            tracing::debug!(sink = %sink, "delivery outbox dropped");
        }
    }
}
