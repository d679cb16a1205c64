//! Fragment registry: membership, pattern sets, lifecycle flags and the
//! per-cycle stream buffer, all kept in the fragment store

use super::sinks::SinkId;
use crate::error::{CuratorError, CuratorResult};
use crate::graph::{FragmentId, PatternId, PatternSet, Quad, Triple, TriplePattern};
use crate::storage::{keys, Batch, FragmentStore, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle state of a fragment, derived from its store flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FragmentState {
    Idle,
    Pulling,
    Synced,
    OnDemand,
}

impl std::fmt::Display for FragmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Pulling => "pulling",
            Self::Synced => "synced",
            Self::OnDemand => "on-demand",
        };
        f.pad(s)
    }
}

/// Snapshot of one fragment
#[derive(Debug, Clone, Serialize)]
pub struct Fragment {
    pub id: FragmentId,
    pub patterns: PatternSet,
    pub state: FragmentState,
    /// When the last pull completed
    pub updated: Option<DateTime<Utc>>,
    /// Remaining time in the synced state
    pub ttl: Option<Duration>,
    /// IDs of the subscribed sinks
    pub subscribers: Vec<String>,
}

/// Compacted data of one pattern
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FragmentContext {
    pub pattern_id: PatternId,
    /// Triple description recovered from the resolver plan
    pub pattern: Option<TriplePattern>,
    pub triples: Vec<Triple>,
}

/// Store-backed fragment registry
#[derive(Clone)]
pub struct FragmentRegistry {
    store: Arc<dyn FragmentStore>,
}

impl FragmentRegistry {
    pub fn new(store: Arc<dyn FragmentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn FragmentStore> {
        &self.store
    }

    // === Membership ===

    /// Register a pattern set, returning its ID and whether it was new.
    ///
    /// The pattern set is written in the same batch as the membership
    /// entry, so the scheduler never sees a member without patterns.
    pub fn register(&self, patterns: &PatternSet) -> CuratorResult<(FragmentId, bool)> {
        let id = FragmentId::for_patterns(patterns);
        if !patterns.is_empty() && self.contains(&id)? {
            return Ok((id, false));
        }
        let mut batch = Batch::new();
        let (id, created) = self.prepare(patterns, &mut batch)?;
        self.store.execute(&batch)?;
        tracing::info!(fragment = %id, patterns = patterns.len(), "fragment registered");
        Ok((id, created))
    }

    /// Add the writes registering `patterns` to `batch` without executing
    /// it. The writes are idempotent, so a fragment destroyed before the
    /// batch runs is registered again.
    pub fn prepare(&self, patterns: &PatternSet, batch: &mut Batch) -> CuratorResult<(FragmentId, bool)> {
        if patterns.is_empty() {
            return Err(CuratorError::EmptyPatternSet);
        }
        let id = FragmentId::for_patterns(patterns);
        let created = !self.contains(&id)?;
        batch
            .set(keys::patterns(&id), serde_json::to_string(patterns).map_err(StoreError::from)?)
            .set_add(keys::FRAGMENTS, id.as_str());
        Ok((id, created))
    }

    pub fn contains(&self, id: &FragmentId) -> StoreResult<bool> {
        self.store.is_member(keys::FRAGMENTS, id.as_str())
    }

    pub fn ids(&self) -> StoreResult<Vec<FragmentId>> {
        Ok(self
            .store
            .set_members(keys::FRAGMENTS)?
            .into_iter()
            .map(FragmentId::from_string)
            .collect())
    }

    pub fn patterns(&self, id: &FragmentId) -> StoreResult<Option<PatternSet>> {
        let key = keys::patterns(id);
        match self.store.get(&key)? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError::corrupt(key, e)),
            None => Ok(None),
        }
    }

    // === Lifecycle flags ===

    pub fn state(&self, id: &FragmentId) -> StoreResult<FragmentState> {
        if self.is_pulling(id)? {
            Ok(FragmentState::Pulling)
        } else if self.store.exists(&keys::synced(id))? {
            Ok(FragmentState::Synced)
        } else if self.store.exists(&keys::on_demand(id))? {
            Ok(FragmentState::OnDemand)
        } else {
            Ok(FragmentState::Idle)
        }
    }

    /// Whether the scheduler may start a pull: an idle member with at
    /// least one subscriber
    pub fn is_eligible(&self, id: &FragmentId) -> StoreResult<bool> {
        Ok(self.contains(id)?
            && self.state(id)? == FragmentState::Idle
            && self.subscriber_count(id)? > 0)
    }

    pub fn is_pulling(&self, id: &FragmentId) -> StoreResult<bool> {
        self.store.exists(&keys::pulling(id))
    }

    pub fn set_pulling(&self, id: &FragmentId) -> StoreResult<()> {
        self.store.set(&keys::pulling(id), "1", None)
    }

    pub fn clear_pulling(&self, id: &FragmentId) -> StoreResult<()> {
        self.store.delete(&keys::pulling(id)).map(|_| ())
    }

    /// Wake an on-demand fragment so the next tick pulls it.
    ///
    /// Returns whether the fragment was parked on-demand.
    pub fn demand(&self, id: &FragmentId) -> StoreResult<bool> {
        self.store.delete(&keys::on_demand(id))
    }

    pub fn updated(&self, id: &FragmentId) -> StoreResult<Option<DateTime<Utc>>> {
        let key = keys::updated(id);
        match self.store.get(&key)? {
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|e| StoreError::corrupt(key, e)),
            None => Ok(None),
        }
    }

    // === Subscribers ===

    pub fn subscribers(&self, id: &FragmentId) -> StoreResult<Vec<String>> {
        self.store.set_members(&keys::requests(id))
    }

    pub fn subscriber_count(&self, id: &FragmentId) -> StoreResult<usize> {
        self.store.set_len(&keys::requests(id))
    }

    // === Reads ===

    pub fn load(&self, id: &FragmentId) -> StoreResult<Option<Fragment>> {
        if !self.contains(id)? {
            return Ok(None);
        }
        let Some(patterns) = self.patterns(id)? else {
            return Ok(None);
        };
        Ok(Some(Fragment {
            id: id.clone(),
            patterns,
            state: self.state(id)?,
            updated: self.updated(id)?,
            ttl: self.store.ttl(&keys::synced(id))?,
            subscribers: self.subscribers(id)?,
        }))
    }

    /// The compacted per-pattern contexts, in pattern order
    pub fn contexts(&self, id: &FragmentId) -> StoreResult<Vec<FragmentContext>> {
        let mut pattern_ids: Vec<PatternId> = self
            .store
            .set_members(&keys::contexts(id))?
            .into_iter()
            .map(PatternId::from_string)
            .collect();
        // p2 before p10
        pattern_ids.sort_by_key(|p| (p.as_str().len(), p.as_str().to_string()));

        let mut contexts = Vec::with_capacity(pattern_ids.len());
        for pattern_id in pattern_ids {
            let pattern_key = keys::context_pattern(id, &pattern_id);
            let pattern = match self.store.get(&pattern_key)? {
                Some(json) => Some(
                    serde_json::from_str(&json).map_err(|e| StoreError::corrupt(pattern_key, e))?,
                ),
                None => None,
            };
            let triples = self.store.triples(&keys::context(id, &pattern_id))?;
            contexts.push(FragmentContext {
                pattern_id,
                pattern,
                triples,
            });
        }
        Ok(contexts)
    }

    // === Stream buffer ===

    /// Buffer a streamed quad; returns false if this cycle already saw it
    pub fn buffer_quad(&self, id: &FragmentId, quad: &Quad) -> StoreResult<bool> {
        let member = serde_json::to_string(&quad.triple)?;
        self.store
            .set_add(&keys::streams(id), quad.pattern_id.as_str())?;
        self.store
            .set_add(&keys::stream(id, &quad.pattern_id), &member)
    }

    /// Buffered triples of one pattern
    pub fn buffered(&self, id: &FragmentId, pattern: &PatternId) -> StoreResult<Vec<Triple>> {
        let key = keys::stream(id, pattern);
        self.store
            .set_members(&key)?
            .iter()
            .map(|m| serde_json::from_str(m).map_err(|e| StoreError::corrupt(key.clone(), e)))
            .collect()
    }

    /// Drop the stream buffer of an aborted cycle
    pub fn clear_stream(&self, id: &FragmentId) -> StoreResult<()> {
        let mut batch = Batch::new();
        for pattern in self.store.set_members(&keys::streams(id))? {
            batch.delete(keys::stream(id, &PatternId::from_string(pattern)));
        }
        batch.delete(keys::streams(id));
        self.store.execute(&batch)
    }

    // === Destruction ===

    /// Remove the fragment and everything derived from it in one batch:
    /// every `fragment:{id}:` key, the records of its sinks and its
    /// membership entry.
    /// Returns the IDs of the sinks removed with it.
    pub fn destroy(&self, id: &FragmentId) -> StoreResult<Vec<SinkId>> {
        let subscribers = self.subscribers(id)?;
        let mut batch = Batch::new();
        for sink in &subscribers {
            batch.delete(keys::sink(sink));
        }
        for key in self.store.keys(&keys::fragment_prefix(id))? {
            batch.delete(key);
        }
        batch.set_remove(keys::FRAGMENTS, id.as_str());
        self.store.execute(&batch)?;
        tracing::info!(fragment = %id, sinks = subscribers.len(), "fragment destroyed");
        Ok(subscribers.into_iter().map(SinkId::from_string).collect())
    }

    /// Clear pulling flags and stream buffers left behind by a previous
    /// process. Returns the number of keys removed.
    pub fn clear_transient(&self) -> StoreResult<usize> {
        let mut batch = Batch::new();
        for key in self.store.keys("fragment:")? {
            if key.ends_with(":pulling") || key.ends_with(":streams") || key.contains(":stream:") {
                batch.delete(key);
            }
        }
        let removed = batch.len();
        self.store.execute(&batch)?;
        Ok(removed)
    }
}
