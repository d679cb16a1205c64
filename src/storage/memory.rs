//! In-memory fragment store
//!
//! Keeps all namespaces behind one mutex, which makes every batch atomic
//! for free. Availability can be switched off to simulate an unreachable
//! store.

use super::traits::{Batch, Command, FragmentStore, StoreError, StoreResult};
use crate::graph::Triple;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct State {
    values: HashMap<String, (String, Option<Instant>)>,
    sets: HashMap<String, BTreeSet<String>>,
    contexts: HashMap<String, BTreeSet<Triple>>,
}

impl State {
    fn live_value(&mut self, key: &str) -> Option<&(String, Option<Instant>)> {
        let expired = matches!(
            self.values.get(key),
            Some((_, Some(deadline))) if *deadline <= Instant::now()
        );
        if expired {
            self.values.remove(key);
        }
        self.values.get(key)
    }

    fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>) {
        let deadline = ttl.map(|t| Instant::now() + t);
        self.values
            .insert(key.to_string(), (value.to_string(), deadline));
    }

    fn delete(&mut self, key: &str) -> bool {
        let live = self.live_value(key).is_some();
        self.values.remove(key);
        let set = self.sets.remove(key).is_some();
        let ctx = self.contexts.remove(key).is_some();
        live || set || ctx
    }

    fn set_add(&mut self, key: &str, member: &str) -> bool {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string())
    }

    fn set_remove(&mut self, key: &str, member: &str) -> bool {
        let Some(set) = self.sets.get_mut(key) else {
            return false;
        };
        let removed = set.remove(member);
        if set.is_empty() {
            self.sets.remove(key);
        }
        removed
    }

    fn add_triple(&mut self, context: &str, triple: &Triple) -> bool {
        self.contexts
            .entry(context.to_string())
            .or_default()
            .insert(triple.clone())
    }

    fn apply(&mut self, command: &Command) {
        match command {
            Command::Set { key, value, ttl } => self.set(key, value, *ttl),
            Command::Delete { key } => {
                self.delete(key);
            }
            Command::SetAdd { key, member } => {
                self.set_add(key, member);
            }
            Command::SetRemove { key, member } => {
                self.set_remove(key, member);
            }
            Command::AddTriple { context, triple } => {
                self.add_triple(context, triple);
            }
        }
    }
}

/// Mutex-guarded in-memory store
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Make every subsequent operation fail with `StoreError::Unavailable` (or succeed again)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        self.state.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentStore for MemoryStore {
    fn execute(&self, batch: &Batch) -> StoreResult<()> {
        let mut state = self.lock()?;
        for command in batch.commands() {
            state.apply(command);
        }
        Ok(())
    }

    fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self.lock()?.set_add(key, member))
    }

    fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self.lock()?.set_remove(key, member))
    }

    fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .lock()?
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn set_len(&self, key: &str) -> StoreResult<usize> {
        Ok(self.lock()?.sets.get(key).map_or(0, |s| s.len()))
    }

    fn is_member(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self
            .lock()?
            .sets
            .get(key)
            .map_or(false, |s| s.contains(member)))
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.lock()?.live_value(key).map(|(v, _)| v.clone()))
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.lock()?.set(key, value, ttl);
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool> {
        let mut state = self.lock()?;
        if state.live_value(key).is_some() {
            return Ok(false);
        }
        state.set(key, value, ttl);
        Ok(true)
    }

    fn set_if_present(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut state = self.lock()?;
        if state.live_value(key).is_none() {
            return Ok(false);
        }
        if let Some(entry) = state.values.get_mut(key) {
            entry.0 = value.to_string();
        }
        Ok(true)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.lock()?.delete(key))
    }

    fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut state = self.lock()?;
        match state.live_value(key) {
            Some((value, _)) if value == expected => {
                state.values.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut state = self.lock()?;
        Ok(state
            .live_value(key)
            .and_then(|(_, deadline)| *deadline)
            .map(|d| d.saturating_duration_since(Instant::now())))
    }

    fn add_triple(&self, context: &str, triple: &Triple) -> StoreResult<bool> {
        Ok(self.lock()?.add_triple(context, triple))
    }

    fn remove_triple(&self, context: &str, triple: &Triple) -> StoreResult<bool> {
        let mut state = self.lock()?;
        let Some(ctx) = state.contexts.get_mut(context) else {
            return Ok(false);
        };
        let removed = ctx.remove(triple);
        if ctx.is_empty() {
            state.contexts.remove(context);
        }
        Ok(removed)
    }

    fn triples(&self, context: &str) -> StoreResult<Vec<Triple>> {
        Ok(self
            .lock()?
            .contexts
            .get(context)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut state = self.lock()?;
        let now = Instant::now();
        state
            .values
            .retain(|_, (_, deadline)| deadline.map_or(true, |d| d > now));

        let keys: BTreeSet<String> = state
            .values
            .keys()
            .chain(state.sets.keys())
            .chain(state.contexts.keys())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        Ok(keys.into_iter().collect())
    }
}
