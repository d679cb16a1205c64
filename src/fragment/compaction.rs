//! Fragment compaction
//!
//! Moves the stream buffer of a finished pull cycle into the per-pattern
//! contexts. All commands go into one batch, so a reader observes either
//! the previous contexts or the new ones.

use crate::graph::{FragmentId, PatternId, PlanGraph, Triple};
use crate::storage::{keys, Batch, FragmentStore, StoreError, StoreResult};
use serde::Serialize;
use std::collections::BTreeSet;

/// What a compaction replaced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompactionStats {
    /// Contexts that existed before and were cleared
    pub cleared_contexts: usize,
    /// Contexts written from the stream buffer
    pub contexts: usize,
    pub triples: usize,
}

/// Append the compaction of `fragment` to `batch`.
///
/// The caller executes the batch (possibly together with other lifecycle
/// commands) while holding the fragment's consume lock.
pub fn prepare(
    store: &dyn FragmentStore,
    fragment: &FragmentId,
    plan: &PlanGraph,
    batch: &mut Batch,
) -> StoreResult<CompactionStats> {
    let mut stats = CompactionStats::default();

    for pattern in store.set_members(&keys::contexts(fragment))? {
        let pattern = PatternId::from_string(pattern);
        batch
            .delete(keys::context(fragment, &pattern))
            .delete(keys::context_pattern(fragment, &pattern));
        stats.cleared_contexts += 1;
    }
    batch.delete(keys::contexts(fragment));

    let buffered: BTreeSet<String> = store
        .set_members(&keys::streams(fragment))?
        .into_iter()
        .collect();
    for pattern in buffered {
        let pattern = PatternId::from_string(pattern);
        let stream_key = keys::stream(fragment, &pattern);
        let context_key = keys::context(fragment, &pattern);

        for member in store.set_members(&stream_key)? {
            let triple: Triple = serde_json::from_str(&member)
                .map_err(|e| StoreError::corrupt(stream_key.clone(), e))?;
            batch.add_triple(context_key.clone(), triple);
            stats.triples += 1;
        }
        batch.set_add(keys::contexts(fragment), pattern.as_str());
        if let Some(node) = plan.node(&pattern) {
            batch.set(
                keys::context_pattern(fragment, &pattern),
                serde_json::to_string(&node.pattern())?,
            );
        }
        batch.delete(stream_key);
        stats.contexts += 1;
    }
    batch.delete(keys::streams(fragment));

    Ok(stats)
}

/// Compact on its own, outside a larger lifecycle batch
pub fn compact(
    store: &dyn FragmentStore,
    fragment: &FragmentId,
    plan: &PlanGraph,
) -> StoreResult<CompactionStats> {
    let mut batch = Batch::new();
    let stats = prepare(store, fragment, plan, &mut batch)?;
    store.execute(&batch)?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::FragmentRegistry;
    use crate::graph::{PatternSet, Quad, Slot, TriplePattern};
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryStore>, FragmentRegistry, FragmentId, PlanGraph) {
        let store = Arc::new(MemoryStore::new());
        let registry = FragmentRegistry::new(store.clone());
        let patterns = PatternSet::new(vec![
            TriplePattern::new(Slot::variable("s"), "ex:knows", Slot::variable("o")),
            TriplePattern::new(Slot::variable("s"), "ex:name", Slot::variable("n")),
        ]);
        let (id, _) = registry.register(&patterns).unwrap();
        (store, registry, id, PlanGraph::for_patterns(&patterns))
    }

    #[test]
    fn compaction_moves_buffer_into_contexts() {
        let (store, registry, id, plan) = setup();
        registry.buffer_quad(&id, &Quad::of("p1", "a", "ex:knows", "b")).unwrap();
        registry.buffer_quad(&id, &Quad::of("p1", "b", "ex:knows", "c")).unwrap();
        registry.buffer_quad(&id, &Quad::of("p2", "a", "ex:name", "Ann")).unwrap();

        let stats = compact(store.as_ref(), &id, &plan).unwrap();
        assert_eq!(stats.contexts, 2);
        assert_eq!(stats.triples, 3);

        let contexts = registry.contexts(&id).unwrap();
        assert_eq!(contexts.len(), 2);
        assert_eq!(contexts[0].triples.len(), 2);
        assert_eq!(
            contexts[1].pattern.as_ref().map(|p| p.predicate.as_str()),
            Some("ex:name")
        );
        assert!(store.keys(&keys::streams(&id)).unwrap().is_empty());
        assert!(registry
            .buffered(&id, &PatternId::from("p1"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn recompaction_replaces_previous_contexts() {
        let (store, registry, id, plan) = setup();
        registry.buffer_quad(&id, &Quad::of("p1", "a", "ex:knows", "b")).unwrap();
        registry.buffer_quad(&id, &Quad::of("p2", "a", "ex:name", "Ann")).unwrap();
        compact(store.as_ref(), &id, &plan).unwrap();

        registry.buffer_quad(&id, &Quad::of("p1", "x", "ex:knows", "y")).unwrap();
        let stats = compact(store.as_ref(), &id, &plan).unwrap();
        assert_eq!(stats.cleared_contexts, 2);

        let contexts = registry.contexts(&id).unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].triples, vec![Triple::new("x", "ex:knows", "y")]);
        assert!(store
            .get(&keys::context_pattern(&id, &PatternId::from("p2")))
            .unwrap()
            .is_none());
    }

    #[test]
    fn empty_buffer_clears_contexts() {
        let (store, registry, id, plan) = setup();
        registry.buffer_quad(&id, &Quad::of("p1", "a", "ex:knows", "b")).unwrap();
        compact(store.as_ref(), &id, &plan).unwrap();

        compact(store.as_ref(), &id, &plan).unwrap();
        assert!(registry.contexts(&id).unwrap().is_empty());
    }
}
