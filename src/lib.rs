//! Curator: fragment collection and consumption engine
//!
//! A fragment is a cached, incrementally refreshed materialization of all
//! data matching a fixed set of triple patterns. The engine keeps fragments
//! and their subscribers (sinks) in a durable store, periodically pulls
//! each eligible fragment from a pattern resolver, fans the streamed quads
//! out to consumer plugins, and compacts the result atomically.
//!
//! # Core Concepts
//!
//! - **Fragments**: pattern sets with a stable ID and a lifecycle
//!   (idle, pulling, synced, on-demand)
//! - **Sinks**: subscribers of a fragment, served by plugins of their type
//! - **Pull cycles**: resolve, stream, compact, refresh, notify
//!
//! # Example
//!
//! ```
//! use curator::{Curator, CuratorConfig, DatasetResolver, MemoryStore, PluginCatalog};
//! use std::sync::Arc;
//!
//! let curator = Curator::from_config(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(DatasetResolver::new()),
//!     CuratorConfig::default(),
//!     &PluginCatalog::builtin(),
//! )
//! .unwrap();
//! assert!(curator.fragments().unwrap().is_empty());
//! ```

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod fragment;
pub mod graph;
pub mod logging;
pub mod plugin;
pub mod resolver;
pub mod storage;

pub use api::{Cancelled, Curator, FragmentView, SinkStatus, StartupReport, Subscription};
pub use config::{ConfigError, CuratorConfig};
pub use engine::{PullOrchestrator, PullOutcome, Scheduler};
pub use error::{CuratorError, CuratorResult};
pub use fragment::{
    DeliveryStatus, Fragment, FragmentContext, FragmentState, Refresh, RefreshPolicy, Sink, SinkId,
    SinkRequest,
};
pub use graph::{FragmentId, PatternId, PatternSet, PlanGraph, Quad, Slot, Triple, TriplePattern};
pub use plugin::{DeliveryPlugin, FragmentPlugin, PluginCatalog, PluginError, PluginRegistry, TracePlugin};
pub use resolver::{DatasetResolver, PatternResolver, QuadStream, Resolution, ResolveError};
pub use storage::{FragmentStore, MemoryStore, OpenStore, SqliteStore, StoreError, StoreResult};
pub use tokio_util::sync::CancellationToken;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
