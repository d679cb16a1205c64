//! Request-layer entry point.
//!
//! `Curator` wires the store, resolver and plugins together and exposes
//! the operations clients need: registering fragments, subscribing and
//! cancelling sinks, reading fragments, and running the scheduler.

use crate::config::CuratorConfig;
use crate::engine::{PullOrchestrator, PullOutcome, Scheduler};
use crate::error::{CuratorError, CuratorResult};
use crate::fragment::{
    DeliveryStatus, Fragment, FragmentContext, FragmentRegistry, LockKind, LockManager, Sink,
    SinkId, SinkRepository, SinkRequest,
};
use crate::graph::{FragmentId, PatternSet};
use crate::plugin::{PluginCatalog, PluginDispatch, PluginRegistry};
use crate::resolver::PatternResolver;
use crate::storage::{Batch, FragmentStore};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What startup cleaned up
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StartupReport {
    pub locks_cleared: usize,
    pub transient_keys_cleared: usize,
}

/// A fragment together with its compacted data and sink states
#[derive(Debug, Clone, Serialize)]
pub struct FragmentView {
    pub fragment: Fragment,
    pub contexts: Vec<FragmentContext>,
    pub sinks: Vec<SinkStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkStatus {
    pub id: SinkId,
    pub sink_type: String,
    pub status: DeliveryStatus,
}

/// A sink together with the fragment it was registered with
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub fragment: FragmentId,
    /// The pattern set was not registered before
    pub created: bool,
    pub sink: Sink,
}

/// Result of cancelling a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cancelled {
    pub sink: SinkId,
    pub fragment: FragmentId,
    /// The sink was the last subscriber and the fragment is gone
    pub fragment_destroyed: bool,
}

/// Single entry point for all client-facing operations.
#[derive(Clone)]
pub struct Curator {
    store: Arc<dyn FragmentStore>,
    registry: FragmentRegistry,
    sinks: SinkRepository,
    locks: LockManager,
    dispatch: PluginDispatch,
    orchestrator: Arc<PullOrchestrator>,
    config: CuratorConfig,
}

impl Curator {
    pub fn new(
        store: Arc<dyn FragmentStore>,
        resolver: Arc<dyn PatternResolver>,
        plugins: PluginRegistry,
        config: CuratorConfig,
    ) -> Self {
        let registry = FragmentRegistry::new(store.clone());
        let sinks = SinkRepository::new(store.clone());
        let locks = LockManager::new(store.clone(), config.lock_lease(), config.lock_retry());
        let dispatch = PluginDispatch::new(plugins, sinks.clone());
        let orchestrator = PullOrchestrator::new(
            registry.clone(),
            sinks.clone(),
            locks.clone(),
            resolver,
            dispatch.clone(),
        )
        .with_policy(config.refresh_policy())
        .with_concurrency(config.resolver_concurrency);

        Self {
            store,
            registry,
            sinks,
            locks,
            dispatch,
            orchestrator: Arc::new(orchestrator),
            config,
        }
    }

    /// Build with the plugins named in the configuration
    pub fn from_config(
        store: Arc<dyn FragmentStore>,
        resolver: Arc<dyn PatternResolver>,
        config: CuratorConfig,
        catalog: &PluginCatalog,
    ) -> CuratorResult<Self> {
        config.validate()?;
        let plugins = PluginRegistry::from_names(config.plugins.as_slice(), catalog)?;
        Ok(Self::new(store, resolver, plugins, config))
    }

    pub fn config(&self) -> &CuratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn FragmentStore> {
        &self.store
    }

    // --- Lifecycle ---

    /// Clear state left behind by a previous process: locks, pulling
    /// flags and stream buffers. Run before the scheduler starts.
    pub fn startup(&self) -> CuratorResult<StartupReport> {
        let report = StartupReport {
            locks_cleared: self.locks.clear_all()?,
            transient_keys_cleared: self.registry.clear_transient()?,
        };
        tracing::info!(
            locks = report.locks_cleared,
            transient = report.transient_keys_cleared,
            "startup cleanup done"
        );
        Ok(report)
    }

    /// A scheduler over this curator's fragments
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.registry.clone(),
            self.orchestrator.clone(),
            self.config.pool_size(),
            self.config.tick(),
        )
    }

    /// Run the scheduler until `token` is cancelled
    pub async fn run(&self, token: CancellationToken) -> Vec<(FragmentId, PullOutcome)> {
        self.scheduler().run(token).await
    }

    /// Run one pull cycle now, outside the scheduler
    pub async fn pull(&self, id: &FragmentId) -> PullOutcome {
        self.orchestrator.pull(id).await
    }

    // --- Fragments ---

    /// Register a pattern set without subscribing to it. The fragment is
    /// not pulled until its first sink arrives.
    pub fn register_fragment(&self, patterns: &PatternSet) -> CuratorResult<(FragmentId, bool)> {
        self.registry.register(patterns)
    }

    /// Register a pattern set and subscribe a sink to it in one batch
    pub fn subscribe(&self, patterns: &PatternSet, request: SinkRequest) -> CuratorResult<Subscription> {
        let mut batch = Batch::new();
        let (fragment, created) = self.registry.prepare(patterns, &mut batch)?;
        let status = if created { DeliveryStatus::Pending } else { self.initial_status(&fragment)? };
        let sink = self.sinks.prepare(&fragment, request, status, &mut batch)?;
        self.store.execute(&batch)?;

        tracing::info!(fragment = %fragment, sink = %sink.id, created, status = %status, "subscribed");
        Ok(Subscription {
            fragment,
            created,
            sink,
        })
    }

    pub fn fragments(&self) -> CuratorResult<Vec<Fragment>> {
        let mut fragments = Vec::new();
        for id in self.registry.ids()? {
            if let Some(fragment) = self.registry.load(&id)? {
                fragments.push(fragment);
            }
        }
        Ok(fragments)
    }

    /// Read a fragment. Wakes it if it was parked on-demand.
    pub fn read_fragment(&self, id: &FragmentId) -> CuratorResult<FragmentView> {
        let fragment = self
            .registry
            .load(id)?
            .ok_or_else(|| CuratorError::FragmentNotFound(id.clone()))?;
        let contexts = self.registry.contexts(id)?;
        let sinks = self
            .sinks
            .load_for_fragment(id)?
            .into_iter()
            .map(|s| SinkStatus {
                id: s.id,
                sink_type: s.sink_type,
                status: s.status,
            })
            .collect();
        self.demand(id)?;
        Ok(FragmentView {
            fragment,
            contexts,
            sinks,
        })
    }

    /// Make an on-demand fragment eligible for the next tick
    pub fn demand(&self, id: &FragmentId) -> CuratorResult<bool> {
        let woken = self.registry.demand(id)?;
        if woken {
            tracing::debug!(fragment = %id, "on-demand fragment woken");
        }
        Ok(woken)
    }

    // --- Sinks ---

    /// Subscribe to a fragment.
    ///
    /// The sink is ready at once when the fragment holds a completed pull
    /// and is not pulling; otherwise it waits for the next cycle.
    pub fn create_sink(&self, fragment: &FragmentId, request: SinkRequest) -> CuratorResult<Sink> {
        if !self.registry.contains(fragment)? {
            return Err(CuratorError::FragmentNotFound(fragment.clone()));
        }
        let status = self.initial_status(fragment)?;
        Ok(self.sinks.create(fragment, request, status)?)
    }

    fn initial_status(&self, fragment: &FragmentId) -> CuratorResult<DeliveryStatus> {
        if self.registry.updated(fragment)?.is_some() && !self.registry.is_pulling(fragment)? {
            Ok(DeliveryStatus::Ready)
        } else {
            Ok(DeliveryStatus::Pending)
        }
    }

    pub fn sink(&self, id: &SinkId) -> CuratorResult<Sink> {
        self.sinks
            .load(id)?
            .ok_or_else(|| CuratorError::SinkNotFound(id.to_string()))
    }

    /// Unsubscribe a sink; the last cancellation destroys the fragment.
    ///
    /// A fragment in the middle of a pull is left to its orchestrator,
    /// which destroys it once the stream ends.
    pub async fn cancel_sink(&self, id: &SinkId) -> CuratorResult<Cancelled> {
        let sink = self
            .sinks
            .remove(id)?
            .ok_or_else(|| CuratorError::SinkNotFound(id.to_string()))?;
        self.dispatch.release(std::slice::from_ref(id));
        let fragment = sink.fragment_id;

        let mut destroyed = false;
        if self.registry.subscriber_count(&fragment)? == 0 && !self.registry.is_pulling(&fragment)? {
            let pull = self.locks.acquire(&fragment, LockKind::Pull).await?;
            let consume = match self.locks.acquire(&fragment, LockKind::Consume).await {
                Ok(handle) => handle,
                Err(e) => {
                    self.locks.release_quietly(&pull);
                    return Err(e.into());
                }
            };
            let result = self.destroy_if_abandoned(&fragment);
            self.locks.release_quietly(&consume);
            self.locks.release_quietly(&pull);
            destroyed = result?;
        }

        Ok(Cancelled {
            sink: id.clone(),
            fragment,
            fragment_destroyed: destroyed,
        })
    }

    /// Under both locks: re-check and destroy
    fn destroy_if_abandoned(&self, fragment: &FragmentId) -> CuratorResult<bool> {
        if self.registry.subscriber_count(fragment)? > 0 || self.registry.is_pulling(fragment)? {
            return Ok(false);
        }
        if !self.registry.contains(fragment)? {
            return Ok(false);
        }
        let removed = self.registry.destroy(fragment)?;
        self.dispatch.release(&removed);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::FragmentState;
    use crate::graph::{Slot, Triple, TriplePattern};
    use crate::resolver::DatasetResolver;
    use crate::storage::{keys, MemoryStore};

    fn curator() -> (Curator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let resolver = DatasetResolver::with_triples([Triple::new("a", "p", "b")]);
        let config = CuratorConfig::default()
            .with_plugins(["trace", "delivery"])
            .with_refresh(0.0, 60.0)
            .with_lock_retry_ms(1);
        let curator =
            Curator::from_config(store.clone(), Arc::new(resolver), config, &PluginCatalog::builtin())
                .unwrap();
        (curator, store)
    }

    fn patterns() -> PatternSet {
        PatternSet::new(vec![TriplePattern::new(
            Slot::variable("s"),
            "p",
            Slot::variable("o"),
        )])
    }

    #[test]
    fn sink_on_unknown_fragment_is_rejected() {
        let (curator, _) = curator();
        let result = curator.create_sink(&FragmentId::from("nope"), SinkRequest::new("delivery"));
        assert!(matches!(result, Err(CuratorError::FragmentNotFound(_))));
    }

    #[tokio::test]
    async fn sink_is_ready_immediately_after_a_completed_pull() {
        let (curator, _) = curator();
        let (id, _) = curator.register_fragment(&patterns()).unwrap();
        let first = curator.create_sink(&id, SinkRequest::new("delivery")).unwrap();
        assert_eq!(first.status, DeliveryStatus::Pending);

        assert!(curator.pull(&id).await.is_completed());
        let second = curator.create_sink(&id, SinkRequest::new("delivery")).unwrap();
        assert_eq!(second.status, DeliveryStatus::Ready);

        let view = curator.read_fragment(&id).unwrap();
        assert_eq!(view.fragment.state, FragmentState::Synced);
        assert_eq!(view.contexts.len(), 1);
        assert!(view.sinks.iter().all(|s| s.status == DeliveryStatus::Ready));
    }

    #[tokio::test]
    async fn cancelling_the_last_sink_destroys_the_fragment() {
        let (curator, store) = curator();
        let (id, _) = curator.register_fragment(&patterns()).unwrap();
        let a = curator.create_sink(&id, SinkRequest::new("delivery")).unwrap();
        let b = curator.create_sink(&id, SinkRequest::new("delivery")).unwrap();
        curator.pull(&id).await;

        assert!(!curator.cancel_sink(&a.id).await.unwrap().fragment_destroyed);
        assert!(curator.cancel_sink(&b.id).await.unwrap().fragment_destroyed);
        assert!(store.keys(&keys::fragment_prefix(&id)).unwrap().is_empty());
        assert!(matches!(
            curator.cancel_sink(&b.id).await,
            Err(CuratorError::SinkNotFound(_))
        ));
    }

    #[tokio::test]
    async fn startup_clears_leftovers() {
        let (curator, store) = curator();
        let id = curator
            .subscribe(&patterns(), SinkRequest::new("delivery"))
            .unwrap()
            .fragment;
        store.set(&keys::lock(&id, LockKind::Pull), "dead", None).unwrap();
        store.set(&keys::pulling(&id), "1", None).unwrap();

        let report = curator.startup().unwrap();
        assert_eq!(report.locks_cleared, 1);
        assert_eq!(report.transient_keys_cleared, 1);
        assert!(curator.registry.is_eligible(&id).unwrap());
    }

    #[test]
    fn read_wakes_on_demand_fragments() {
        let (curator, store) = curator();
        let (id, _) = curator.register_fragment(&patterns()).unwrap();
        curator.create_sink(&id, SinkRequest::new("delivery")).unwrap();
        store.set(&keys::on_demand(&id), "1", None).unwrap();

        let view = curator.read_fragment(&id).unwrap();
        assert_eq!(view.fragment.state, FragmentState::OnDemand);
        assert!(curator.registry.is_eligible(&id).unwrap());
        assert!(!curator.demand(&id).unwrap());
    }

    #[tokio::test]
    async fn subscribed_fragment_survives_its_first_tick() {
        let (curator, store) = curator();
        let first = curator
            .subscribe(&patterns(), SinkRequest::new("delivery"))
            .unwrap();
        assert!(first.created);
        assert_eq!(first.sink.status, DeliveryStatus::Pending);
        assert!(store
            .is_member(&keys::requests(&first.fragment), first.sink.id.as_str())
            .unwrap());

        let mut scheduler = curator.scheduler();
        assert_eq!(scheduler.tick_once().await.submitted, vec![first.fragment.clone()]);
        assert!(scheduler.shutdown().await[0].1.is_completed());

        let second = curator
            .subscribe(&patterns(), SinkRequest::new("delivery"))
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.fragment, first.fragment);
        assert_eq!(second.sink.status, DeliveryStatus::Ready);
        assert_eq!(curator.read_fragment(&first.fragment).unwrap().sinks.len(), 2);
    }

    #[tokio::test]
    async fn registered_fragment_waits_for_its_first_sink() {
        let (curator, _) = curator();
        let (id, _) = curator.register_fragment(&patterns()).unwrap();

        let mut scheduler = curator.scheduler();
        assert!(scheduler.tick_once().await.submitted.is_empty());
        assert_eq!(curator.pull(&id).await, PullOutcome::Skipped);

        let sink = curator.create_sink(&id, SinkRequest::new("delivery")).unwrap();
        assert_eq!(scheduler.tick_once().await.submitted, vec![id.clone()]);
        scheduler.shutdown().await;
        assert_eq!(curator.sink(&sink.id).unwrap().status, DeliveryStatus::Ready);
    }

    #[test]
    fn subscribe_rejects_empty_pattern_sets() {
        let (curator, store) = curator();
        let result = curator.subscribe(&PatternSet::default(), SinkRequest::new("delivery"));
        assert!(matches!(result, Err(CuratorError::EmptyPatternSet)));
        assert!(store.keys("").unwrap().is_empty());
    }

    #[test]
    fn unknown_plugin_in_config_fails() {
        let config = CuratorConfig::default().with_plugins(["bogus"]);
        let result = Curator::from_config(
            Arc::new(MemoryStore::new()),
            Arc::new(DatasetResolver::new()),
            config,
            &PluginCatalog::builtin(),
        );
        assert!(matches!(result, Err(CuratorError::Config(_))));
    }
}
