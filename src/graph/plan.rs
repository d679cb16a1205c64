//! Plan graph returned by the pattern resolver alongside the quad stream

use super::pattern::{PatternId, PatternSet, Slot, TriplePattern};
use serde::{Deserialize, Serialize};

/// One pattern node of a resolver plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanNode {
    pub pattern_id: PatternId,
    pub subject: Slot,
    pub predicate: String,
    pub object: Slot,
}

impl PlanNode {
    /// The triple description of this node
    pub fn pattern(&self) -> TriplePattern {
        TriplePattern::new(self.subject.clone(), self.predicate.clone(), self.object.clone())
    }
}

/// The resolver's execution plan for a pattern set.
///
/// Only used to recover each pattern's triple description and to detect
/// the no-plan case: an empty plan means the pattern set is unsatisfiable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanGraph {
    nodes: Vec<PlanNode>,
}

impl PlanGraph {
    pub fn new(nodes: Vec<PlanNode>) -> Self {
        Self { nodes }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// A plan with one node per pattern, in set order
    pub fn for_patterns(patterns: &PatternSet) -> Self {
        Self {
            nodes: patterns
                .iter()
                .map(|(id, p)| PlanNode {
                    pattern_id: id,
                    subject: p.subject.clone(),
                    predicate: p.predicate.clone(),
                    object: p.object.clone(),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    pub fn node(&self, id: &PatternId) -> Option<&PlanNode> {
        self.nodes.iter().find(|n| &n.pattern_id == id)
    }
}
