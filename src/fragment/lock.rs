//! Per-fragment mutual exclusion backed by the fragment store
//!
//! A lock is a store value created with `set_if_absent`, owned by a random
//! token and leased for a bounded time so a crashed holder cannot wedge a
//! fragment. Because the store is shared, the locks hold across processes.

use crate::graph::FragmentId;
use crate::storage::{keys, FragmentStore, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// The two locks every fragment has. Always acquired `Pull` before `Consume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// Guards the transition into and out of the `pulling` state
    Pull,
    /// Guards the stream buffer and compacted contexts
    Consume,
}

impl std::fmt::Display for LockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pull => write!(f, "pull"),
            Self::Consume => write!(f, "consume"),
        }
    }
}

/// Proof of holding a lock. Hand it back to `LockManager::release`.
#[derive(Debug)]
pub struct LockHandle {
    fragment: FragmentId,
    kind: LockKind,
    key: String,
    token: String,
}

impl LockHandle {
    pub fn fragment(&self) -> &FragmentId {
        &self.fragment
    }

    pub fn kind(&self) -> LockKind {
        self.kind
    }
}

/// Acquires and releases fragment locks
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn FragmentStore>,
    lease: Duration,
    retry: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn FragmentStore>, lease: Duration, retry: Duration) -> Self {
        Self {
            store,
            lease,
            retry,
        }
    }

    /// Wait until the lock is held.
    ///
    /// Polls the store every `retry`; fails only when the store does.
    pub async fn acquire(&self, fragment: &FragmentId, kind: LockKind) -> StoreResult<LockHandle> {
        let key = keys::lock(fragment, kind);
        let token = Uuid::new_v4().to_string();

        loop {
            if self.store.set_if_absent(&key, &token, Some(self.lease))? {
                tracing::trace!(fragment = %fragment, lock = %kind, "lock acquired");
                return Ok(LockHandle {
                    fragment: fragment.clone(),
                    kind,
                    key,
                    token,
                });
            }
            tokio::time::sleep(self.retry).await;
        }
    }

    /// Release a held lock. Returns false if it was already released or its lease ran out.
    pub fn release(&self, handle: &LockHandle) -> StoreResult<bool> {
        let released = self.store.delete_if_equals(&handle.key, &handle.token)?;
        tracing::trace!(fragment = %handle.fragment, lock = %handle.kind, released, "lock released");
        Ok(released)
    }

    /// Release, logging instead of failing. Used on cleanup paths where the
    /// lease expiry is the fallback.
    pub fn release_quietly(&self, handle: &LockHandle) {
        if let Err(e) = self.release(handle) {
            tracing::warn!(
                fragment = %handle.fragment,
                lock = %handle.kind,
                error = %e,
                "could not release lock, leaving it to expire"
            );
        }
    }

    pub fn is_locked(&self, fragment: &FragmentId, kind: LockKind) -> StoreResult<bool> {
        self.store.exists(&keys::lock(fragment, kind))
    }

    /// Drop every lock in the store. Only safe before any pull is running.
    pub fn clear_all(&self) -> StoreResult<usize> {
        let mut cleared = 0;
        for key in self.store.keys(keys::LOCK_PREFIX)? {
            if self.store.delete(&key)? {
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}
