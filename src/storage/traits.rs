//! Fragment store trait definitions

use crate::graph::Triple;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store cannot be reached; callers defer and retry later
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store lock poisoned")]
    LockPoisoned,

    /// A stored record could not be interpreted
    #[error("corrupt record at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    pub fn corrupt(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// One command of an atomic batch.
///
/// `Delete` removes the name from every namespace (value, set and
/// triple context), the way a key/value server deletes any key type.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
    SetAdd {
        key: String,
        member: String,
    },
    SetRemove {
        key: String,
        member: String,
    },
    AddTriple {
        context: String,
        triple: Triple,
    },
}

/// A list of commands executed all-or-nothing
#[derive(Debug, Clone, Default)]
pub struct Batch {
    commands: Vec<Command>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.commands.push(Command::Set {
            key: key.into(),
            value: value.into(),
            ttl: None,
        });
        self
    }

    pub fn set_with_ttl(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Duration,
    ) -> &mut Self {
        self.commands.push(Command::Set {
            key: key.into(),
            value: value.into(),
            ttl: Some(ttl),
        });
        self
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.commands.push(Command::Delete { key: key.into() });
        self
    }

    pub fn set_add(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.commands.push(Command::SetAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn set_remove(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.commands.push(Command::SetRemove {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn add_triple(&mut self, context: impl Into<String>, triple: Triple) -> &mut Self {
        self.commands.push(Command::AddTriple {
            context: context.into(),
            triple,
        });
        self
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Trait for fragment storage backends
///
/// Implementations must be thread-safe (Send + Sync); they are shared
/// between the scheduler, every running pull and the request layer.
/// All operations may fail with `StoreError::Unavailable`.
pub trait FragmentStore: Send + Sync {
    // === Batches ===

    /// Execute all commands atomically: readers observe either none or all of them
    fn execute(&self, batch: &Batch) -> StoreResult<()>;

    // === Sets ===

    /// Add a member; returns false if it was already present
    fn set_add(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Remove a member; returns false if it was absent
    fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// All members, sorted
    fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    fn set_len(&self, key: &str) -> StoreResult<usize>;

    fn is_member(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self.set_members(key)?.iter().any(|m| m == member))
    }

    // === Values ===

    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Set only if no live value exists; returns whether the value was written
    fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool>;

    /// Overwrite a live value, keeping its expiry; returns false and writes
    /// nothing if the key is absent
    fn set_if_present(&self, key: &str, value: &str) -> StoreResult<bool>;

    /// Delete a name from every namespace; returns whether anything was removed
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Delete a value only if it currently equals `expected`
    fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Remaining time to live of a value, `None` if absent or persistent
    fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    // === Triple contexts ===

    /// Add a triple to a context; returns false if it was already present
    fn add_triple(&self, context: &str, triple: &Triple) -> StoreResult<bool>;

    fn remove_triple(&self, context: &str, triple: &Triple) -> StoreResult<bool>;

    /// All triples of a context, sorted
    fn triples(&self, context: &str) -> StoreResult<Vec<Triple>>;

    // === Maintenance ===

    /// Every live name (any namespace) starting with `prefix`, sorted and deduplicated
    fn keys(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: FragmentStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StoreResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StoreResult<Self>;
}
