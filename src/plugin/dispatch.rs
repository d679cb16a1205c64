//! Plugin dispatch: per-quad and completion fan-out
//!
//! Fan-out with failure isolation. A sink whose plugin fails is dropped
//! from the active set for the rest of the cycle; other sinks and plugins
//! are unaffected. Generic plugin errors are logged and swallowed.

use super::registry::PluginRegistry;
use crate::fragment::{DeliveryStatus, Sink, SinkId, SinkRepository};
use crate::graph::{FragmentId, PlanGraph, Quad};
use crate::storage::StoreResult;
use std::collections::HashSet;

/// The sinks still receiving data in the current cycle
#[derive(Debug, Clone, Default)]
pub struct ActiveSinks {
    sinks: Vec<Sink>,
    failed: HashSet<SinkId>,
    /// Subscriber count the current list was loaded for
    subscribers: usize,
}

impl ActiveSinks {
    pub fn new(sinks: Vec<Sink>, subscribers: usize) -> Self {
        Self {
            sinks,
            failed: HashSet::new(),
            subscribers,
        }
    }

    /// Sinks that have not failed this cycle
    pub fn active(&self) -> impl Iterator<Item = &Sink> {
        self.sinks.iter().filter(|s| !self.failed.contains(&s.id))
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    pub fn is_failed(&self, id: &SinkId) -> bool {
        self.failed.contains(id)
    }

    pub fn failed(&self) -> &HashSet<SinkId> {
        &self.failed
    }

    /// Exclude a sink for the rest of the cycle
    pub fn fail(&mut self, id: &SinkId) {
        self.failed.insert(id.clone());
    }

    /// Whether the subscriber set changed size since the last load
    pub fn is_stale(&self, subscribers: usize) -> bool {
        subscribers != self.subscribers
    }

    /// Replace the sink list; failed sinks stay excluded
    pub fn reload(&mut self, sinks: Vec<Sink>, subscribers: usize) {
        self.sinks = sinks;
        self.subscribers = subscribers;
    }
}

/// Outcome of one completion fan-out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionReport {
    /// Sinks moved to ready
    pub ready: usize,
    /// Sinks that failed this cycle and were moved back to accepted
    pub demoted: usize,
    pub notified: usize,
    /// Errors from individual plugins (plugin_id, error)
    pub errors: Vec<(String, String)>,
}

/// Fans quads and completion out to the registered plugins
#[derive(Clone)]
pub struct PluginDispatch {
    plugins: PluginRegistry,
    sinks: SinkRepository,
}

impl PluginDispatch {
    pub fn new(plugins: PluginRegistry, sinks: SinkRepository) -> Self {
        Self { plugins, sinks }
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Deliver one quad to every interested plugin.
    ///
    /// Sink-typed plugins get the quad once per active sink of their type,
    /// remapped for that sink. Generic plugins get it once with no sink.
    pub async fn dispatch_quad(
        &self,
        fragment: &FragmentId,
        quad: &Quad,
        plan: &PlanGraph,
        sinks: &mut ActiveSinks,
    ) {
        for plugin in self.plugins.plugins() {
            match plugin.sink_type() {
                Some(sink_type) => {
                    let targets: Vec<Sink> = sinks
                        .active()
                        .filter(|s| s.sink_type == sink_type)
                        .cloned()
                        .collect();
                    for sink in targets {
                        let remapped = sink.remap(quad);
                        if let Err(e) = plugin.consume(fragment, &remapped, plan, Some(&sink)).await {
                            tracing::warn!(
                                fragment = %fragment,
                                sink = %sink.id,
                                plugin = plugin.id(),
                                error = %e,
                                "sink failed, excluded for the rest of the cycle"
                            );
                            sinks.fail(&sink.id);
                        }
                    }
                }
                None => {
                    if let Err(e) = plugin.consume(fragment, quad, plan, None).await {
                        tracing::warn!(fragment = %fragment, plugin = plugin.id(), error = %e, "plugin failed on quad");
                    }
                }
            }
        }
    }

    /// Mark every active sink ready, move sinks that failed this cycle
    /// back to accepted, and notify the plugins.
    ///
    /// Only store failures are errors; plugin errors are logged and
    /// reported.
    pub async fn dispatch_completion(
        &self,
        fragment: &FragmentId,
        sinks: &ActiveSinks,
    ) -> StoreResult<CompletionReport> {
        let mut report = CompletionReport::default();

        for sink in sinks.active() {
            if sink.status != DeliveryStatus::Ready
                && self.sinks.set_status(&sink.id, DeliveryStatus::Ready)?
            {
                report.ready += 1;
            }
        }
        for sink in sinks.sinks.iter().filter(|s| sinks.is_failed(&s.id)) {
            if sink.status != DeliveryStatus::Accepted
                && self.sinks.set_status(&sink.id, DeliveryStatus::Accepted)?
            {
                report.demoted += 1;
            }
        }

        for plugin in self.plugins.plugins() {
            if plugin.sink_aware() {
                let matching = sinks
                    .active()
                    .filter(|s| plugin.sink_type().map_or(true, |t| t == s.sink_type));
                for sink in matching {
                    report.notified += 1;
                    if let Err(e) = plugin.complete(fragment, Some(sink)).await {
                        tracing::warn!(fragment = %fragment, sink = %sink.id, plugin = plugin.id(), error = %e, "completion failed");
                        report.errors.push((plugin.id().to_string(), e.to_string()));
                    }
                }
            } else {
                report.notified += 1;
                if let Err(e) = plugin.complete(fragment, None).await {
                    tracing::warn!(fragment = %fragment, plugin = plugin.id(), error = %e, "completion failed");
                    report.errors.push((plugin.id().to_string(), e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Tell every plugin that these sinks are gone
    pub fn release(&self, sinks: &[SinkId]) {
        for sink in sinks {
            for plugin in self.plugins.plugins() {
                plugin.release(sink);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::SinkRequest;
    use crate::plugin::{DeliveryPlugin, FragmentPlugin, PluginError};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Sink-typed plugin failing for one sink
    struct Picky {
        refuse: Mutex<Option<SinkId>>,
        seen: Mutex<Vec<(SinkId, Quad)>>,
    }

    #[async_trait]
    impl FragmentPlugin for Picky {
        fn id(&self) -> &str {
            "picky"
        }
        fn sink_type(&self) -> Option<&str> {
            Some("picky")
        }
        async fn consume(
            &self,
            _fragment: &FragmentId,
            quad: &Quad,
            _plan: &PlanGraph,
            sink: Option<&Sink>,
        ) -> Result<(), PluginError> {
            let sink = sink.unwrap();
            if self.refuse.lock().unwrap().as_ref() == Some(&sink.id) {
                return Err(PluginError::Rejected("no".into()));
            }
            self.seen.lock().unwrap().push((sink.id.clone(), quad.clone()));
            Ok(())
        }
        async fn complete(&self, _fragment: &FragmentId, _sink: Option<&Sink>) -> Result<(), PluginError> {
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl FragmentPlugin for Broken {
        fn id(&self) -> &str {
            "broken"
        }
        async fn consume(
            &self,
            _fragment: &FragmentId,
            _quad: &Quad,
            _plan: &PlanGraph,
            _sink: Option<&Sink>,
        ) -> Result<(), PluginError> {
            Err(PluginError::Internal("always".into()))
        }
        async fn complete(&self, _fragment: &FragmentId, _sink: Option<&Sink>) -> Result<(), PluginError> {
            Err(PluginError::Internal("always".into()))
        }
    }

    fn repo() -> SinkRepository {
        SinkRepository::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn failing_sink_is_excluded_others_continue() {
        let repo = repo();
        let fragment = FragmentId::from("f");
        let a = repo
            .create(&fragment, SinkRequest::new("picky"), DeliveryStatus::Accepted)
            .unwrap();
        let b = repo
            .create(&fragment, SinkRequest::new("picky"), DeliveryStatus::Accepted)
            .unwrap();

        let picky = Arc::new(Picky {
            refuse: Mutex::new(Some(a.id.clone())),
            seen: Mutex::new(Vec::new()),
        });
        let dispatch = PluginDispatch::new(
            PluginRegistry::new(vec![picky.clone() as Arc<dyn FragmentPlugin>, Arc::new(Broken)]),
            repo.clone(),
        );
        let mut active = ActiveSinks::new(vec![a.clone(), b.clone()], 2);

        let plan = PlanGraph::empty();
        dispatch
            .dispatch_quad(&fragment, &Quad::of("p1", "x", "y", "z"), &plan, &mut active)
            .await;
        *picky.refuse.lock().unwrap() = None;
        dispatch
            .dispatch_quad(&fragment, &Quad::of("p1", "x", "y", "w"), &plan, &mut active)
            .await;

        assert!(active.is_failed(&a.id));
        let seen = picky.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|(id, _)| id == &b.id));

        let report = dispatch.dispatch_completion(&fragment, &active).await.unwrap();
        assert_eq!(report.ready, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(repo.load(&b.id).unwrap().unwrap().status, DeliveryStatus::Ready);
        assert_eq!(repo.load(&a.id).unwrap().unwrap().status, DeliveryStatus::Accepted);
    }

    #[tokio::test]
    async fn sink_failing_after_a_ready_cycle_is_no_longer_ready() {
        let repo = repo();
        let fragment = FragmentId::from("f");
        let a = repo
            .create(&fragment, SinkRequest::new("picky"), DeliveryStatus::Ready)
            .unwrap();
        let picky = Arc::new(Picky {
            refuse: Mutex::new(Some(a.id.clone())),
            seen: Mutex::new(Vec::new()),
        });
        let dispatch = PluginDispatch::new(
            PluginRegistry::new(vec![picky as Arc<dyn FragmentPlugin>]),
            repo.clone(),
        );
        let mut active = ActiveSinks::new(vec![a.clone()], 1);

        dispatch
            .dispatch_quad(&fragment, &Quad::of("p1", "x", "y", "z"), &PlanGraph::empty(), &mut active)
            .await;
        let report = dispatch.dispatch_completion(&fragment, &active).await.unwrap();

        assert_eq!(report.ready, 0);
        assert_eq!(report.demoted, 1);
        assert_eq!(repo.load(&a.id).unwrap().unwrap().status, DeliveryStatus::Accepted);
    }

    #[tokio::test]
    async fn quads_are_remapped_per_sink() {
        let repo = repo();
        let fragment = FragmentId::from("f");
        let sink = repo
            .create(
                &fragment,
                SinkRequest::new(DeliveryPlugin::SINK_TYPE).with_mapping("p1", "people"),
                DeliveryStatus::Accepted,
            )
            .unwrap();
        let delivery = DeliveryPlugin::new();
        let dispatch = PluginDispatch::new(
            PluginRegistry::new(vec![Arc::new(delivery.clone()) as Arc<dyn FragmentPlugin>]),
            repo,
        );
        let mut active = ActiveSinks::new(vec![sink.clone()], 1);

        dispatch
            .dispatch_quad(&fragment, &Quad::of("p1", "a", "b", "c"), &PlanGraph::empty(), &mut active)
            .await;
        assert_eq!(delivery.delivered(&sink.id)[0].pattern_id.as_str(), "people");
    }

    #[test]
    fn reload_keeps_failures() {
        let repo = repo();
        let fragment = FragmentId::from("f");
        let a = repo
            .create(&fragment, SinkRequest::new("t"), DeliveryStatus::Accepted)
            .unwrap();
        let mut active = ActiveSinks::new(vec![a.clone()], 1);
        active.fail(&a.id);

        assert!(active.is_stale(2));
        let b = repo
            .create(&fragment, SinkRequest::new("t"), DeliveryStatus::Accepted)
            .unwrap();
        active.reload(vec![a, b.clone()], 2);
        assert!(!active.is_stale(2));
        let ids: Vec<&SinkId> = active.active().map(|s| &s.id).collect();
        assert_eq!(ids, vec![&b.id]);
    }
}
