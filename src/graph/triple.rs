//! Triples and the quads streamed by the pattern resolver

use super::pattern::PatternId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A concrete graph edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl Triple {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }
}

impl std::fmt::Display for Triple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)
    }
}

/// One unit of resolver output: a triple tagged with the pattern it matched
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quad {
    pub pattern_id: PatternId,
    pub triple: Triple,
}

impl Quad {
    pub fn new(pattern_id: impl Into<PatternId>, triple: Triple) -> Self {
        Self {
            pattern_id: pattern_id.into(),
            triple,
        }
    }

    /// Shorthand for `Quad::new(pattern, Triple::new(s, p, o))`
    pub fn of(pattern_id: &str, subject: &str, predicate: &str, object: &str) -> Self {
        Self::new(pattern_id, Triple::new(subject, predicate, object))
    }

    /// Rename the pattern ID through a sink's renaming map
    pub fn remapped(&self, mapping: &HashMap<String, String>) -> Self {
        match mapping.get(self.pattern_id.as_str()) {
            Some(renamed) => Self {
                pattern_id: PatternId::from_string(renamed.clone()),
                triple: self.triple.clone(),
            },
            None => self.clone(),
        }
    }
}
