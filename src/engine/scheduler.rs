//! Scheduler: submits eligible fragments to a bounded worker pool
//!
//! The loop never awaits a pull. Each tick it reaps finished workers,
//! lists eligible fragments and spawns one worker per fragment while
//! permits are available; the rest wait for a later tick.

use super::orchestrator::{PullOrchestrator, PullOutcome};
use crate::fragment::FragmentRegistry;
use crate::graph::FragmentId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Fixed-period tick source; missed ticks are delayed, not bunched
pub struct Ticker {
    interval: Interval,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Workers reaped this tick
    pub finished: usize,
    pub submitted: Vec<FragmentId>,
    /// Eligible fragments left for a later tick because the pool was full
    pub saturated: usize,
    /// Eligible fragments with a worker still running
    pub busy: usize,
}

pub struct Scheduler {
    registry: FragmentRegistry,
    orchestrator: Arc<PullOrchestrator>,
    permits: Arc<Semaphore>,
    pool_size: usize,
    period: Duration,
    in_flight: HashMap<FragmentId, JoinHandle<PullOutcome>>,
}

impl Scheduler {
    pub fn new(
        registry: FragmentRegistry,
        orchestrator: Arc<PullOrchestrator>,
        pool_size: usize,
        period: Duration,
    ) -> Self {
        Self {
            registry,
            orchestrator,
            permits: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            period,
            in_flight: HashMap::new(),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Number of workers not yet reaped
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, id: &FragmentId) -> bool {
        self.in_flight.contains_key(id)
    }

    /// Run one scheduling pass
    pub async fn tick_once(&mut self) -> TickReport {
        let mut report = TickReport {
            finished: self.reap().await.len(),
            ..Default::default()
        };

        let eligible = match self.eligible() {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "cannot list fragments, skipping tick");
                return report;
            }
        };

        for id in eligible {
            if self.in_flight.contains_key(&id) {
                report.busy += 1;
                continue;
            }
            let permit = match self.permits.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    report.saturated += 1;
                    continue;
                }
            };

            let orchestrator = self.orchestrator.clone();
            let task_id = id.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                orchestrator.pull(&task_id).await
            });
            self.in_flight.insert(id.clone(), handle);
            report.submitted.push(id);
        }

        if report.saturated > 0 {
            tracing::debug!(saturated = report.saturated, pool = self.pool_size, "worker pool full");
        }
        report
    }

    /// Tick until cancelled, then wait for running workers
    pub async fn run(&mut self, token: CancellationToken) -> Vec<(FragmentId, PullOutcome)> {
        tracing::info!(pool = self.pool_size, period_ms = self.period.as_millis() as u64, "scheduler started");
        let mut ticker = Ticker::new(self.period);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.tick_once().await;
                    if !report.submitted.is_empty() {
                        tracing::debug!(submitted = report.submitted.len(), in_flight = self.in_flight.len(), "tick");
                    }
                }
            }
        }
        tracing::info!(in_flight = self.in_flight.len(), "scheduler stopping");
        self.shutdown().await
    }

    /// Wait for every running worker and return their outcomes
    pub async fn shutdown(&mut self) -> Vec<(FragmentId, PullOutcome)> {
        let mut outcomes = Vec::with_capacity(self.in_flight.len());
        for (id, handle) in self.in_flight.drain() {
            if let Some(outcome) = Self::join(&id, handle).await {
                outcomes.push((id, outcome));
            }
        }
        outcomes
    }

    fn eligible(&self) -> crate::storage::StoreResult<Vec<FragmentId>> {
        let mut eligible = Vec::new();
        for id in self.registry.ids()? {
            if self.registry.is_eligible(&id)? {
                eligible.push(id);
            }
        }
        Ok(eligible)
    }

    /// Remove finished workers, logging panics
    async fn reap(&mut self) -> Vec<(FragmentId, PullOutcome)> {
        let finished: Vec<FragmentId> = self
            .in_flight
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        let mut outcomes = Vec::with_capacity(finished.len());
        for id in finished {
            if let Some(handle) = self.in_flight.remove(&id) {
                if let Some(outcome) = Self::join(&id, handle).await {
                    outcomes.push((id, outcome));
                }
            }
        }
        outcomes
    }

    async fn join(id: &FragmentId, handle: JoinHandle<PullOutcome>) -> Option<PullOutcome> {
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) if e.is_panic() => {
                tracing::error!(fragment = %id, "pull worker panicked");
                None
            }
            Err(e) => {
                tracing::warn!(fragment = %id, error = %e, "pull worker cancelled");
                None
            }
        }
    }
}
