//! Adaptive refresh policy
//!
//! After each successful pull the fragment is either parked on-demand
//! (cheap pulls, re-pulled when read) or marked synced for a jittered TTL
//! that grows with the pull cost, which spreads refreshes of similar
//! fragments apart.

use rand::Rng;
use serde::Serialize;
use std::time::Duration;

/// Next lifecycle state chosen after a pull
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum Refresh {
    /// No TTL; the next read triggers a re-pull
    OnDemand,
    /// Fresh until the TTL runs out
    Synced { ttl: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshPolicy {
    /// Pulls faster than this may go on-demand
    pub on_demand_threshold: Duration,
    /// Lower bound of the synced TTL base
    pub min_sync: Duration,
}

impl RefreshPolicy {
    pub fn new(on_demand_threshold: Duration, min_sync: Duration) -> Self {
        Self {
            on_demand_threshold,
            min_sync,
        }
    }

    /// Choose the refresh mode for a pull that took `elapsed`.
    ///
    /// On-demand when `elapsed < T` and `draw * elapsed < T / 4` for a uniform
    /// draw in `[0, 1)`; synced otherwise.
    pub fn decide<R: Rng + ?Sized>(&self, elapsed: Duration, rng: &mut R) -> Refresh {
        let t = elapsed.as_secs_f64();
        let threshold = self.on_demand_threshold.as_secs_f64();
        if t < threshold && rng.gen::<f64>() * t < threshold / 4.0 {
            return Refresh::OnDemand;
        }
        Refresh::Synced {
            ttl: self.synced_ttl(elapsed, rng),
        }
    }

    /// Uniform TTL in `[base, 2 * base]` with `base = max(min_sync, elapsed)`
    pub fn synced_ttl<R: Rng + ?Sized>(&self, elapsed: Duration, rng: &mut R) -> Duration {
        let base = self.min_sync.max(elapsed);
        if base.is_zero() {
            return base;
        }
        let secs = base.as_secs_f64();
        let drawn = Duration::from_secs_f64(rng.gen_range(secs..=secs * 2.0));
        // float round-trips may land a nanosecond outside the interval
        drawn.clamp(base, base * 2)
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn slow_pulls_are_always_synced() {
        let policy = RefreshPolicy::new(Duration::from_secs(2), Duration::from_secs(10));
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            match policy.decide(Duration::from_secs(3), &mut rng) {
                Refresh::Synced { ttl } => {
                    assert!(ttl >= Duration::from_secs(10) && ttl <= Duration::from_secs(20));
                }
                Refresh::OnDemand => panic!("slow pull went on-demand"),
            }
        }
    }

    #[test]
    fn instant_pulls_go_on_demand() {
        let policy = RefreshPolicy::default();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(policy.decide(Duration::ZERO, &mut rng), Refresh::OnDemand);
    }

    #[test]
    fn ttl_base_is_elapsed_when_above_minimum() {
        let policy = RefreshPolicy::new(Duration::from_secs(1), Duration::from_secs(5));
        let mut rng = StdRng::seed_from_u64(3);
        let ttl = policy.synced_ttl(Duration::from_secs(40), &mut rng);
        assert!(ttl >= Duration::from_secs(40) && ttl <= Duration::from_secs(80));
    }

    #[test]
    fn zero_base_gives_zero_ttl() {
        let policy = RefreshPolicy::new(Duration::ZERO, Duration::ZERO);
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(policy.synced_ttl(Duration::ZERO, &mut rng), Duration::ZERO);
    }
}
