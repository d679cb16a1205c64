//! Sinks: per-subscriber state of a fragment

use crate::graph::{FragmentId, Quad};
use crate::storage::{keys, Batch, FragmentStore, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of a sink
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SinkId(String);

impl SinkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SinkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SinkId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Delivery status of a sink.
///
/// `Pending` until a pull cycle picks the sink up, `Accepted` while the
/// cycle streams to it, `Ready` once the cycle completed for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Accepted,
    Ready,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Ready => "ready",
        };
        f.pad(s)
    }
}

/// A subscriber of one fragment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sink {
    pub id: SinkId,
    pub fragment_id: FragmentId,
    /// Which plugins deliver to this sink
    pub sink_type: String,
    pub status: DeliveryStatus,
    /// Pattern ID renaming applied to every quad delivered to this sink
    #[serde(default)]
    pub mapping: HashMap<String, String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Sink {
    /// The quad as this sink sees it
    pub fn remap(&self, quad: &Quad) -> Quad {
        if self.mapping.is_empty() {
            quad.clone()
        } else {
            quad.remapped(&self.mapping)
        }
    }
}

/// Request to subscribe to a fragment
#[derive(Debug, Clone, Default)]
pub struct SinkRequest {
    pub sink_type: String,
    pub mapping: HashMap<String, String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl SinkRequest {
    pub fn new(sink_type: impl Into<String>) -> Self {
        Self {
            sink_type: sink_type.into(),
            ..Default::default()
        }
    }

    pub fn with_mapping(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.mapping.insert(from.into(), to.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Store-backed sink records
#[derive(Clone)]
pub struct SinkRepository {
    store: Arc<dyn FragmentStore>,
}

impl SinkRepository {
    pub fn new(store: Arc<dyn FragmentStore>) -> Self {
        Self { store }
    }

    /// Create a sink and subscribe it to `fragment` in one batch
    pub fn create(
        &self,
        fragment: &FragmentId,
        request: SinkRequest,
        status: DeliveryStatus,
    ) -> StoreResult<Sink> {
        let mut batch = Batch::new();
        let sink = self.prepare(fragment, request, status, &mut batch)?;
        self.store.execute(&batch)?;
        tracing::info!(fragment = %fragment, sink = %sink.id, sink_type = %sink.sink_type, status = %status, "sink created");
        Ok(sink)
    }

    /// Add the writes creating a sink to `batch` without executing it
    pub fn prepare(
        &self,
        fragment: &FragmentId,
        request: SinkRequest,
        status: DeliveryStatus,
        batch: &mut Batch,
    ) -> StoreResult<Sink> {
        let sink = Sink {
            id: SinkId::new(),
            fragment_id: fragment.clone(),
            sink_type: request.sink_type,
            status,
            mapping: request.mapping,
            metadata: request.metadata,
            created_at: Utc::now(),
        };
        batch
            .set(keys::sink(sink.id.as_str()), serde_json::to_string(&sink)?)
            .set_add(keys::requests(fragment), sink.id.as_str());
        Ok(sink)
    }

    pub fn load(&self, id: &SinkId) -> StoreResult<Option<Sink>> {
        let key = keys::sink(id.as_str());
        match self.store.get(&key)? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError::corrupt(key, e)),
            None => Ok(None),
        }
    }

    /// All valid sinks subscribed to a fragment.
    ///
    /// Subscribers without a readable record are skipped; only store
    /// failures are errors.
    pub fn load_for_fragment(&self, fragment: &FragmentId) -> StoreResult<Vec<Sink>> {
        let mut sinks = Vec::new();
        for id in self.store.set_members(&keys::requests(fragment))? {
            let id = SinkId::from_string(id);
            match self.load(&id) {
                Ok(Some(sink)) => sinks.push(sink),
                Ok(None) => {
                    tracing::warn!(fragment = %fragment, sink = %id, "subscriber has no sink record");
                }
                Err(StoreError::Corrupt { key, reason }) => {
                    tracing::warn!(fragment = %fragment, sink = %id, key = %key, reason = %reason, "skipping corrupt sink record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(sinks)
    }

    /// Rewrite an existing sink record. A sink removed in the meantime is
    /// not brought back; returns whether the record still existed.
    pub fn update(&self, sink: &Sink) -> StoreResult<bool> {
        self.store
            .set_if_present(&keys::sink(sink.id.as_str()), &serde_json::to_string(sink)?)
    }

    /// Persist a status change. Returns false if the sink no longer exists.
    pub fn set_status(&self, id: &SinkId, status: DeliveryStatus) -> StoreResult<bool> {
        let Some(mut sink) = self.load(id)? else {
            return Ok(false);
        };
        if sink.status == status {
            return Ok(true);
        }
        sink.status = status;
        self.update(&sink)
    }

    /// Move every pending sink of a fragment to accepted; returns all sinks
    /// still subscribed
    pub fn accept_pending(&self, fragment: &FragmentId) -> StoreResult<Vec<Sink>> {
        let mut sinks = Vec::new();
        let mut accepted = 0;
        for mut sink in self.load_for_fragment(fragment)? {
            if sink.status == DeliveryStatus::Pending {
                sink.status = DeliveryStatus::Accepted;
                if !self.update(&sink)? {
                    continue;
                }
                accepted += 1;
            }
            sinks.push(sink);
        }
        if accepted > 0 {
            tracing::debug!(fragment = %fragment, accepted, "pending sinks accepted");
        }
        Ok(sinks)
    }

    /// Unsubscribe and delete a sink. Returns the removed sink, if any.
    pub fn remove(&self, id: &SinkId) -> StoreResult<Option<Sink>> {
        let Some(sink) = self.load(id)? else {
            return Ok(None);
        };
        let mut batch = Batch::new();
        batch
            .delete(keys::sink(id.as_str()))
            .set_remove(keys::requests(&sink.fragment_id), id.as_str());
        self.store.execute(&batch)?;
        tracing::info!(fragment = %sink.fragment_id, sink = %id, "sink removed");
        Ok(Some(sink))
    }
}
