//! Store key layout
//!
//! Everything derived from a fragment lives under `fragment:{id}:`, so a
//! prefix scan finds all of it. Sink records and locks live in their own
//! namespaces.

use crate::fragment::LockKind;
use crate::graph::{FragmentId, PatternId};

/// Set of registered fragment IDs
pub const FRAGMENTS: &str = "fragments";

pub fn fragment_prefix(id: &FragmentId) -> String {
    format!("fragment:{}:", id)
}

/// JSON-encoded pattern set
pub fn patterns(id: &FragmentId) -> String {
    format!("fragment:{}:patterns", id)
}

pub fn pulling(id: &FragmentId) -> String {
    format!("fragment:{}:pulling", id)
}

/// Expiring marker of the synced state
pub fn synced(id: &FragmentId) -> String {
    format!("fragment:{}:synced", id)
}

pub fn on_demand(id: &FragmentId) -> String {
    format!("fragment:{}:on_demand", id)
}

/// RFC 3339 timestamp of the last completed pull
pub fn updated(id: &FragmentId) -> String {
    format!("fragment:{}:updated", id)
}

/// Set of subscribed sink IDs
pub fn requests(id: &FragmentId) -> String {
    format!("fragment:{}:requests", id)
}

/// Set of pattern IDs that currently have a compacted context
pub fn contexts(id: &FragmentId) -> String {
    format!("fragment:{}:contexts", id)
}

/// Triple context holding the compacted data of one pattern
pub fn context(id: &FragmentId, pattern: &PatternId) -> String {
    format!("fragment:{}:context:{}", id, pattern)
}

/// Triple description of the pattern behind a context
pub fn context_pattern(id: &FragmentId, pattern: &PatternId) -> String {
    format!("fragment:{}:context:{}:pattern", id, pattern)
}

/// Set of pattern IDs with buffered quads in the current cycle
pub fn streams(id: &FragmentId) -> String {
    format!("fragment:{}:streams", id)
}

/// Per-cycle buffer of JSON-encoded triples for one pattern
pub fn stream(id: &FragmentId, pattern: &PatternId) -> String {
    format!("fragment:{}:stream:{}", id, pattern)
}

pub const SINK_PREFIX: &str = "sink:";

pub fn sink(id: &str) -> String {
    format!("{}{}", SINK_PREFIX, id)
}

pub const LOCK_PREFIX: &str = "lock:";

pub fn lock(id: &FragmentId, kind: LockKind) -> String {
    format!("{}{}:{}", LOCK_PREFIX, id, kind)
}

/// Recover the fragment ID from any `fragment:{id}:...` key
pub fn fragment_of(key: &str) -> Option<FragmentId> {
    let rest = key.strip_prefix("fragment:")?;
    let (id, _) = rest.split_once(':')?;
    Some(FragmentId::from(id))
}
