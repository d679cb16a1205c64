//! Pull orchestrator: one pull cycle of one fragment
//!
//! resolve -> claim (pull + consume locks, `pulling` flag) -> stream into
//! the buffer while fanning quads out -> re-lock -> compact, refresh and
//! clear `pulling` in one batch -> notify completion.

use crate::error::CuratorResult;
use crate::fragment::{
    compaction, FragmentRegistry, LockHandle, LockKind, LockManager, Refresh, RefreshPolicy,
    SinkRepository,
};
use crate::graph::{FragmentId, PlanGraph};
use crate::plugin::{ActiveSinks, PluginDispatch};
use crate::resolver::{PatternResolver, QuadStream};
use crate::storage::{keys, Batch, StoreResult};
use chrono::Utc;
use futures::StreamExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How a pull attempt ended
#[derive(Debug, Clone, PartialEq)]
pub enum PullOutcome {
    /// Nothing to do: unknown fragment, or another worker is pulling it
    Skipped,
    /// Transient failure; state is unchanged and the next tick retries
    Deferred(String),
    /// The fragment was removed
    Destroyed,
    Completed {
        quads: usize,
        new_quads: usize,
        elapsed: Duration,
        refresh: Refresh,
    },
}

impl PullOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

impl std::fmt::Display for PullOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skipped => write!(f, "skipped"),
            Self::Deferred(reason) => write!(f, "deferred: {}", reason),
            Self::Destroyed => write!(f, "destroyed"),
            Self::Completed { quads, new_quads, .. } => {
                write!(f, "completed ({} quads, {} new)", quads, new_quads)
            }
        }
    }
}

#[derive(Debug, Default)]
struct StreamStats {
    quads: usize,
    new_quads: usize,
}

/// Runs pull cycles. Shared by every worker task.
pub struct PullOrchestrator {
    registry: FragmentRegistry,
    sinks: SinkRepository,
    locks: LockManager,
    resolver: Arc<dyn PatternResolver>,
    dispatch: PluginDispatch,
    policy: RefreshPolicy,
    concurrency: usize,
    rng: Mutex<StdRng>,
}

impl PullOrchestrator {
    pub fn new(
        registry: FragmentRegistry,
        sinks: SinkRepository,
        locks: LockManager,
        resolver: Arc<dyn PatternResolver>,
        dispatch: PluginDispatch,
    ) -> Self {
        Self {
            registry,
            sinks,
            locks,
            resolver,
            dispatch,
            policy: RefreshPolicy::default(),
            concurrency: 8,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Concurrency hint passed to the resolver
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Make refresh decisions reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Run one pull cycle. Never fails; errors become `Deferred`.
    pub async fn pull(&self, id: &FragmentId) -> PullOutcome {
        match self.run(id).await {
            Ok(outcome) => {
                tracing::info!(fragment = %id, outcome = %outcome, "pull finished");
                outcome
            }
            Err(e) => {
                tracing::warn!(fragment = %id, error = %e, "pull deferred");
                PullOutcome::Deferred(e.to_string())
            }
        }
    }

    async fn run(&self, id: &FragmentId) -> CuratorResult<PullOutcome> {
        let Some(patterns) = self.registry.patterns(id)? else {
            return Ok(PullOutcome::Skipped);
        };
        if patterns.is_empty() || !self.registry.contains(id)? {
            return Ok(PullOutcome::Skipped);
        }
        if self.registry.subscriber_count(id)? == 0 {
            tracing::debug!(fragment = %id, "no subscribers yet, not pulling");
            return Ok(PullOutcome::Skipped);
        }

        let started = Instant::now();
        let resolution = self.resolver.resolve(&patterns, self.concurrency).await?;
        if !resolution.satisfiable || resolution.plan.is_empty() {
            return self.destroy_unsatisfiable(id).await;
        }
        let plan = resolution.plan;

        // Claim the fragment
        let (mut active, consume) = {
            let pull = self.locks.acquire(id, LockKind::Pull).await?;
            let consume = match self.locks.acquire(id, LockKind::Consume).await {
                Ok(handle) => handle,
                Err(e) => {
                    self.locks.release_quietly(&pull);
                    return Err(e.into());
                }
            };
            let claimed = self.claim(id);
            self.locks.release_quietly(&pull);
            match claimed {
                Ok(Some(active)) => (active, consume),
                Ok(None) => {
                    self.locks.release_quietly(&consume);
                    tracing::debug!(fragment = %id, "already pulling elsewhere");
                    return Ok(PullOutcome::Skipped);
                }
                Err(e) => {
                    self.abort(id);
                    self.locks.release_quietly(&consume);
                    return Err(e.into());
                }
            }
        };

        let stats = match self.stream(id, resolution.quads, &plan, &mut active).await {
            Ok(stats) => stats,
            Err(e) => {
                self.abort(id);
                self.locks.release_quietly(&consume);
                return Err(e);
            }
        };
        let elapsed = started.elapsed();
        self.locks.release_quietly(&consume);

        let pull = match self.locks.acquire(id, LockKind::Pull).await {
            Ok(handle) => handle,
            Err(e) => {
                self.abort(id);
                return Err(e.into());
            }
        };
        let consume = match self.locks.acquire(id, LockKind::Consume).await {
            Ok(handle) => handle,
            Err(e) => {
                self.abort(id);
                self.locks.release_quietly(&pull);
                return Err(e.into());
            }
        };
        let finalized = self.finalize(id, &plan, elapsed);
        if finalized.is_err() {
            self.abort(id);
        }
        self.release_pair(pull, consume);

        let Some(refresh) = finalized? else {
            return Ok(PullOutcome::Destroyed);
        };

        match self.dispatch.dispatch_completion(id, &active).await {
            Ok(report) => {
                tracing::debug!(fragment = %id, ready = report.ready, notified = report.notified, "completion dispatched");
            }
            Err(e) => {
                tracing::warn!(fragment = %id, error = %e, "could not persist sink completion");
            }
        }

        Ok(PullOutcome::Completed {
            quads: stats.quads,
            new_quads: stats.new_quads,
            elapsed,
            refresh,
        })
    }

    /// Under both locks: refuse if another worker is pulling, otherwise set
    /// `pulling` and pick up pending sinks
    fn claim(&self, id: &FragmentId) -> StoreResult<Option<ActiveSinks>> {
        if self.registry.is_pulling(id)? {
            return Ok(None);
        }
        let sinks = self.sinks.accept_pending(id)?;
        let subscribers = self.registry.subscriber_count(id)?;
        self.registry.set_pulling(id)?;
        Ok(Some(ActiveSinks::new(sinks, subscribers)))
    }

    async fn stream(
        &self,
        id: &FragmentId,
        mut quads: QuadStream,
        plan: &PlanGraph,
        active: &mut ActiveSinks,
    ) -> CuratorResult<StreamStats> {
        let mut stats = StreamStats::default();
        while let Some(item) = quads.next().await {
            let quad = item?;
            stats.quads += 1;

            let subscribers = self.registry.subscriber_count(id)?;
            if active.is_stale(subscribers) {
                let sinks = self.sinks.accept_pending(id)?;
                tracing::debug!(fragment = %id, subscribers, "subscriber set changed, sinks reloaded");
                active.reload(sinks, subscribers);
            }

            if self.registry.buffer_quad(id, &quad)? {
                stats.new_quads += 1;
                self.dispatch.dispatch_quad(id, &quad, plan, active).await;
            }
        }
        Ok(stats)
    }

    /// Under both locks: destroy if nobody is subscribed any more, otherwise
    /// compact, apply the refresh policy and leave the pulling state in one
    /// batch. Returns `None` when the fragment was destroyed.
    fn finalize(
        &self,
        id: &FragmentId,
        plan: &PlanGraph,
        elapsed: Duration,
    ) -> StoreResult<Option<Refresh>> {
        if self.registry.subscriber_count(id)? == 0 {
            let removed = self.registry.destroy(id)?;
            self.dispatch.release(&removed);
            return Ok(None);
        }

        let mut batch = Batch::new();
        let compacted = compaction::prepare(self.registry.store().as_ref(), id, plan, &mut batch)?;

        let refresh = {
            let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
            self.policy.decide(elapsed, &mut *rng)
        };
        match refresh {
            Refresh::OnDemand => {
                batch.set(keys::on_demand(id), "1").delete(keys::synced(id));
            }
            Refresh::Synced { ttl } => {
                batch
                    .set_with_ttl(keys::synced(id), "1", ttl)
                    .delete(keys::on_demand(id));
            }
        }
        batch
            .set(keys::updated(id), Utc::now().to_rfc3339())
            .delete(keys::pulling(id));
        self.registry.store().execute(&batch)?;

        tracing::debug!(
            fragment = %id,
            contexts = compacted.contexts,
            triples = compacted.triples,
            refresh = ?refresh,
            "fragment compacted"
        );
        Ok(Some(refresh))
    }

    /// No plan exists: tell every current sink, then remove the fragment
    async fn destroy_unsatisfiable(&self, id: &FragmentId) -> CuratorResult<PullOutcome> {
        let sinks = self.sinks.load_for_fragment(id)?;
        let active = ActiveSinks::new(sinks, 0);
        self.dispatch.dispatch_completion(id, &active).await?;

        let pull = self.locks.acquire(id, LockKind::Pull).await?;
        let consume = match self.locks.acquire(id, LockKind::Consume).await {
            Ok(handle) => handle,
            Err(e) => {
                self.locks.release_quietly(&pull);
                return Err(e.into());
            }
        };
        let destroyed = self.registry.destroy(id);
        self.release_pair(pull, consume);
        self.dispatch.release(&destroyed?);

        tracing::info!(fragment = %id, "pattern set unsatisfiable, fragment destroyed");
        Ok(PullOutcome::Destroyed)
    }

    /// Best-effort cleanup of an aborted cycle
    fn abort(&self, id: &FragmentId) {
        if let Err(e) = self.registry.clear_stream(id) {
            tracing::warn!(fragment = %id, error = %e, "could not clear stream buffer");
        }
        if let Err(e) = self.registry.clear_pulling(id) {
            tracing::warn!(fragment = %id, error = %e, "could not clear pulling flag");
        }
    }

    fn release_pair(&self, pull: LockHandle, consume: LockHandle) {
        self.locks.release_quietly(&consume);
        self.locks.release_quietly(&pull);
    }
}
