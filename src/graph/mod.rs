//! Graph vocabulary: triple patterns, triples, quads and resolver plans

mod pattern;
mod plan;
mod triple;

pub use pattern::{FragmentId, PatternId, PatternSet, Slot, TriplePattern};
pub use plan::{PlanGraph, PlanNode};
pub use triple::{Quad, Triple};
