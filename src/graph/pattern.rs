//! Triple patterns and the ordered pattern sets that define a fragment

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Namespace for deriving fragment IDs from canonical pattern encodings.
const FRAGMENT_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0x3e, 0x0c, 0x52, 0x9a, 0x41, 0x4f, 0x0e, 0xb7, 0x1d, 0x55, 0x2a, 0xc8, 0x90, 0x13, 0x7f,
]);

/// Stable identifier of a fragment.
///
/// Derived from the canonical JSON encoding of the pattern set, so
/// registering the same patterns twice yields the same fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentId(String);

impl FragmentId {
    /// Derive the ID of the fragment materializing `patterns`
    pub fn for_patterns(patterns: &PatternSet) -> Self {
        Self(Uuid::new_v5(&FRAGMENT_NAMESPACE, patterns.canonical().as_bytes()).to_string())
    }

    /// Wrap an existing ID string (e.g. read back from the store)
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FragmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FragmentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of one pattern inside a pattern set (`p1`, `p2`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(String);

impl PatternId {
    /// The ID of the pattern at `index` (zero-based) in its set
    pub fn for_index(index: usize) -> Self {
        Self(format!("p{}", index + 1))
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PatternId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PatternId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One position of a triple pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Slot {
    /// Named variable, matches any term
    Variable(String),
    /// Bound resource identifier
    Value(String),
    /// Literal placeholder
    Literal(String),
}

impl Slot {
    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    pub fn value(v: impl Into<String>) -> Self {
        Self::Value(v.into())
    }

    pub fn literal(v: impl Into<String>) -> Self {
        Self::Literal(v.into())
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Self::Variable(_))
    }

    /// Whether a concrete term satisfies this slot
    pub fn matches(&self, term: &str) -> bool {
        match self {
            Self::Variable(_) => true,
            Self::Value(v) | Self::Literal(v) => v == term,
        }
    }

    /// Rename a variable through `mapping`; bound slots are returned as-is
    pub fn renamed(&self, mapping: &HashMap<String, String>) -> Self {
        match self {
            Self::Variable(name) => match mapping.get(name) {
                Some(renamed) => Self::Variable(renamed.clone()),
                None => self.clone(),
            },
            other => other.clone(),
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Variable(name) => write!(f, "?{}", name),
            Self::Value(v) => write!(f, "<{}>", v),
            Self::Literal(v) => write!(f, "\"{}\"", v),
        }
    }
}

/// Structural description of one graph edge to match
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriplePattern {
    pub subject: Slot,
    pub predicate: String,
    pub object: Slot,
}

impl TriplePattern {
    pub fn new(subject: Slot, predicate: impl Into<String>, object: Slot) -> Self {
        Self {
            subject,
            predicate: predicate.into(),
            object,
        }
    }

    /// Names of the variables used by this pattern, subject first
    pub fn variables(&self) -> Vec<&str> {
        [&self.subject, &self.object]
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Variable(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn renamed(&self, mapping: &HashMap<String, String>) -> Self {
        Self {
            subject: self.subject.renamed(mapping),
            predicate: self.predicate.clone(),
            object: self.object.renamed(mapping),
        }
    }
}

impl std::fmt::Display for TriplePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <{}> {}", self.subject, self.predicate, self.object)
    }
}

/// Ordered, immutable set of triple patterns defining a fragment
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternSet(Vec<TriplePattern>);

impl PatternSet {
    pub fn new(patterns: Vec<TriplePattern>) -> Self {
        Self(patterns)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Patterns paired with their positional IDs
    pub fn iter(&self) -> impl Iterator<Item = (PatternId, &TriplePattern)> {
        self.0
            .iter()
            .enumerate()
            .map(|(i, p)| (PatternId::for_index(i), p))
    }

    pub fn get(&self, id: &PatternId) -> Option<&TriplePattern> {
        self.iter().find(|(pid, _)| pid == id).map(|(_, p)| p)
    }

    pub fn patterns(&self) -> &[TriplePattern] {
        &self.0
    }

    /// Canonical encoding used for ID derivation
    pub fn canonical(&self) -> String {
        // Vec order is the canonical order; slots serialize with stable tags.
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

impl FromIterator<TriplePattern> for PatternSet {
    fn from_iter<I: IntoIterator<Item = TriplePattern>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
