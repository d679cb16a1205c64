//! Pull engine: per-fragment pull cycles and the scheduler driving them

mod orchestrator;
mod scheduler;

pub use orchestrator::{PullOrchestrator, PullOutcome};
pub use scheduler::{Scheduler, TickReport, Ticker};
