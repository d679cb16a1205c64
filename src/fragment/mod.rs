//! Fragment state: registry, sinks, locks, compaction and refresh policy

pub mod compaction;
mod lock;
mod policy;
mod registry;
mod sinks;

pub use compaction::CompactionStats;
pub use lock::{LockHandle, LockKind, LockManager};
pub use policy::{Refresh, RefreshPolicy};
pub use registry::{Fragment, FragmentContext, FragmentRegistry, FragmentState};
pub use sinks::{DeliveryStatus, Sink, SinkId, SinkRepository, SinkRequest};
