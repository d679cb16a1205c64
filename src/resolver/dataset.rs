//! Resolver over an in-memory triple dataset

use super::{PatternResolver, ResolveError, ResolveResult, Resolution};
use crate::graph::{PatternSet, PlanGraph, Quad, Triple};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Matches each pattern against a shared set of triples.
///
/// A pattern whose predicate never occurs in the dataset makes the whole
/// set unsatisfiable. The dataset can be edited between pulls, which is
/// how the next cycle picks up changes.
#[derive(Debug, Clone, Default)]
pub struct DatasetResolver {
    triples: Arc<RwLock<BTreeSet<Triple>>>,
}

impl DatasetResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_triples(triples: impl IntoIterator<Item = Triple>) -> Self {
        Self {
            triples: Arc::new(RwLock::new(triples.into_iter().collect())),
        }
    }

    /// Load a JSON array of `{"subject", "predicate", "object"}` objects
    pub fn from_json_file(path: impl AsRef<Path>) -> ResolveResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ResolveError::Dataset(format!("{}: {}", path.display(), e)))?;
        let triples: Vec<Triple> = serde_json::from_str(&raw)
            .map_err(|e| ResolveError::Dataset(format!("{}: {}", path.display(), e)))?;
        tracing::info!(path = %path.display(), triples = triples.len(), "dataset loaded");
        Ok(Self::with_triples(triples))
    }

    pub fn insert(&self, triple: Triple) -> ResolveResult<bool> {
        Ok(self.write()?.insert(triple))
    }

    pub fn remove(&self, triple: &Triple) -> ResolveResult<bool> {
        Ok(self.write()?.remove(triple))
    }

    pub fn len(&self) -> usize {
        self.triples.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self) -> ResolveResult<std::sync::RwLockWriteGuard<'_, BTreeSet<Triple>>> {
        self.triples
            .write()
            .map_err(|_| ResolveError::Unreachable("dataset lock poisoned".into()))
    }
}

#[async_trait]
impl PatternResolver for DatasetResolver {
    async fn resolve(&self, patterns: &PatternSet, concurrency: usize) -> ResolveResult<Resolution> {
        let triples = self
            .triples
            .read()
            .map_err(|_| ResolveError::Unreachable("dataset lock poisoned".into()))?;

        let known: BTreeSet<&str> = triples.iter().map(|t| t.predicate.as_str()).collect();
        if let Some(missing) = patterns
            .patterns()
            .iter()
            .find(|p| !known.contains(p.predicate.as_str()))
        {
            tracing::debug!(predicate = %missing.predicate, "no plan: predicate not in dataset");
            return Ok(Resolution::unsatisfiable());
        }

        let mut quads: Vec<ResolveResult<Quad>> = Vec::new();
        for (pattern_id, pattern) in patterns.iter() {
            for triple in triples.iter().filter(|t| {
                t.predicate == pattern.predicate
                    && pattern.subject.matches(&t.subject)
                    && pattern.object.matches(&t.object)
            }) {
                quads.push(Ok(Quad::new(pattern_id.clone(), triple.clone())));
            }
        }
        tracing::debug!(patterns = patterns.len(), quads = quads.len(), concurrency, "dataset resolved");

        Ok(Resolution::new(
            Box::pin(futures::stream::iter(quads)),
            PlanGraph::for_patterns(patterns),
        ))
    }
}
