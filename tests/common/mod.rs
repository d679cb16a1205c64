//! Shared helpers for the integration tests
//!
//! `ScriptedResolver` replays a queue of scripted resolve results, so a
//! test decides what each pull cycle streams (including streams it feeds
//! by hand through a channel). `RecordingPlugin` records every delivery
//! and can be told to fail for a sink.

#![allow(dead_code)]

use async_trait::async_trait;
use curator::{
    Curator, CuratorConfig, FragmentId, FragmentPlugin, FragmentStore, MemoryStore, PatternResolver,
    PatternSet, PlanGraph, PluginError, PluginRegistry, Quad, Resolution, ResolveError, Sink, SinkId,
    Slot, TriplePattern,
};
use futures::channel::mpsc;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// === Resolver ===

/// One scripted answer of the resolver
pub enum Script {
    /// Stream these quads, then end
    Quads(Vec<Quad>),
    /// Stream these quads, then fail mid-stream
    FailAfter(Vec<Quad>, String),
    /// Stream whatever the test sends through the channel
    Channel(mpsc::UnboundedReceiver<Result<Quad, ResolveError>>),
    Unreachable,
    /// No plan exists
    Unsatisfiable,
}

/// Replays scripts in order; an exhausted queue streams nothing
#[derive(Default)]
pub struct ScriptedResolver {
    scripts: Mutex<VecDeque<Script>>,
    calls: AtomicUsize,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Queue a channel-fed stream and return its sender
    pub fn push_channel(&self) -> mpsc::UnboundedSender<Result<Quad, ResolveError>> {
        let (tx, rx) = mpsc::unbounded();
        self.push(Script::Channel(rx));
        tx
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PatternResolver for ScriptedResolver {
    async fn resolve(
        &self,
        patterns: &PatternSet,
        _concurrency: usize,
    ) -> Result<Resolution, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Quads(Vec::new()));
        let plan = PlanGraph::for_patterns(patterns);

        match script {
            Script::Quads(quads) => Ok(Resolution::new(
                futures::stream::iter(quads.into_iter().map(Ok::<Quad, ResolveError>)).boxed(),
                plan,
            )),
            Script::FailAfter(quads, reason) => {
                let items = quads
                    .into_iter()
                    .map(Ok::<Quad, ResolveError>)
                    .chain(std::iter::once(Err(ResolveError::Stream(reason))));
                Ok(Resolution::new(futures::stream::iter(items).boxed(), plan))
            }
            Script::Channel(rx) => Ok(Resolution::new(rx.boxed(), plan)),
            Script::Unreachable => Err(ResolveError::Unreachable("connection refused".into())),
            Script::Unsatisfiable => Ok(Resolution::unsatisfiable()),
        }
    }
}

// === Plugins ===

/// Sink type served by `RecordingPlugin`
pub const RECORD: &str = "record";

/// Sink-aware plugin recording deliveries and completions per sink
#[derive(Default)]
pub struct RecordingPlugin {
    received: Mutex<Vec<(SinkId, Quad)>>,
    completed: Mutex<Vec<SinkId>>,
    released: Mutex<Vec<SinkId>>,
    /// Sink -> 1-based delivery attempt that fails
    fail_at: Mutex<HashMap<SinkId, usize>>,
    attempts: Mutex<HashMap<SinkId, usize>>,
}

impl RecordingPlugin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the `n`-th quad delivered to `sink` (1-based)
    pub fn fail_sink_at(&self, sink: &SinkId, n: usize) {
        self.fail_at.lock().unwrap().insert(sink.clone(), n);
    }

    pub fn quads_for(&self, sink: &SinkId) -> Vec<Quad> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == sink)
            .map(|(_, q)| q.clone())
            .collect()
    }

    pub fn total(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    pub fn completed(&self, sink: &SinkId) -> bool {
        self.completed.lock().unwrap().contains(sink)
    }

    pub fn released(&self, sink: &SinkId) -> bool {
        self.released.lock().unwrap().contains(sink)
    }
}

#[async_trait]
impl FragmentPlugin for RecordingPlugin {
    fn id(&self) -> &str {
        "recording"
    }

    fn sink_type(&self) -> Option<&str> {
        Some(RECORD)
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
        let sink = sink.ok_or_else(|| PluginError::Internal("no sink".into()))?;
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(sink.id.clone()).or_insert(0);
            *n += 1;
            *n
        };
        if self.fail_at.lock().unwrap().get(&sink.id) == Some(&attempt) {
            return Err(PluginError::Rejected(format!("refusing quad {attempt}")));
        }
        self.received.lock().unwrap().push((sink.id.clone(), quad.clone()));
        Ok(())
    }

    async fn complete(&self, _fragment: &FragmentId, sink: Option<&Sink>) -> Result<(), PluginError> {
        if let Some(sink) = sink {
            self.completed.lock().unwrap().push(sink.id.clone());
        }
        Ok(())
    }

    fn release(&self, sink: &SinkId) {
        self.released.lock().unwrap().push(sink.clone());
    }
}

/// Generic plugin that fails on everything
pub struct FailingPlugin;

#[async_trait]
impl FragmentPlugin for FailingPlugin {
    fn id(&self) -> &str {
        "failing"
    }

    async fn consume(
        &self,
        _fragment: &FragmentId,
        _quad: &Quad,
        _plan: &PlanGraph,
        _sink: Option<&Sink>,
    ) -> Result<(), PluginError> {
        Err(PluginError::Internal("broken".into()))
    }

    async fn complete(&self, _fragment: &FragmentId, _sink: Option<&Sink>) -> Result<(), PluginError> {
        Err(PluginError::Internal("broken".into()))
    }
}

// === Fixtures ===

/// Config with fast lock retries and pulls that always end synced
pub fn test_config() -> CuratorConfig {
    CuratorConfig::default()
        .with_tick_ms(5)
        .with_refresh(0.0, 60.0)
        .with_lock_retry_ms(1)
}

pub struct Harness {
    pub curator: Curator,
    pub store: Arc<MemoryStore>,
    pub resolver: Arc<ScriptedResolver>,
    pub recorder: Arc<RecordingPlugin>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: CuratorConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let resolver = Arc::new(ScriptedResolver::new());
        let recorder = RecordingPlugin::new();
        let plugins = PluginRegistry::new(vec![
            recorder.clone() as Arc<dyn FragmentPlugin>,
            Arc::new(FailingPlugin),
        ]);
        let curator = Curator::new(store.clone(), resolver.clone(), plugins, config);
        Self {
            curator,
            store,
            resolver,
            recorder,
        }
    }

    /// Keys under `prefix` still in the store
    pub fn keys(&self, prefix: &str) -> Vec<String> {
        self.store.keys(prefix).unwrap()
    }
}

/// `?s <predicate> ?o`, one pattern per predicate
pub fn patterns(predicates: &[&str]) -> PatternSet {
    predicates
        .iter()
        .map(|p| TriplePattern::new(Slot::variable("s"), *p, Slot::variable("o")))
        .collect()
}

/// Wait until `check` holds, polling every millisecond for up to a second
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached within a second");
}
