//! Periodic self-tuning pass
//!
//! Runs on the maintenance interval. Reads the hit rate over the window since
//! the previous pass, escalates the eviction policy when the cache is cold,
//! grows the byte budget when the cache is hot and underfilled, and moves
//! entries between the hot and persistent tiers from observed access counts.

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::coordinator::CacheCoordinator;

/// Hit rate below which the eviction policy is escalated
const ESCALATE_HIT_RATE: f64 = 0.5;
/// Hit rate above which the byte budget may grow
const GROW_HIT_RATE: f64 = 0.8;
/// Occupancy fraction below which growth is allowed
const GROW_OCCUPANCY_FRACTION: f64 = 0.7;
/// Budget growth step
const GROW_FACTOR: f64 = 1.2;
/// Promotion threshold as a multiple of the hot tier average access count
const PROMOTE_FACTOR: f64 = 1.5;
/// Demotion threshold as a multiple of the persistent tier average
const DEMOTE_FACTOR: f64 = 0.5;

/// Outcome of one optimization pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OptimizationOutcome {
    pub policy_escalated: bool,
    pub budget_grown: bool,
    pub promoted: usize,
    pub demoted: usize,
}

/// Windowed self-tuning state
///
/// Owned by whichever loop drives the pass (the maintenance thread, or a test
/// stepping time by hand); all shared state lives in the coordinator.
#[derive(Debug, Default)]
pub struct Optimizer {
    window_hits: u64,
    window_misses: u64,
}

impl Optimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one tuning pass against the coordinator
    pub fn run_pass<V>(&mut self, coordinator: &CacheCoordinator<V>) -> OptimizationOutcome
    where
        V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let mut outcome = OptimizationOutcome::default();

        let stats = coordinator.stats();
        let hits = stats.total_hits();
        let misses = stats.total_misses();
        let window_hits = hits.saturating_sub(self.window_hits);
        let window_misses = misses.saturating_sub(self.window_misses);
        self.window_hits = hits;
        self.window_misses = misses;

        let window_total = window_hits + window_misses;
        if window_total > 0 {
            let hit_rate = window_hits as f64 / window_total as f64;

            if hit_rate < ESCALATE_HIT_RATE {
                if let Some(policy) = coordinator.policy().escalate() {
                    log::info!(
                        "window hit rate {:.2} below {:.2}, escalating eviction policy to {:?}",
                        hit_rate,
                        ESCALATE_HIT_RATE,
                        policy
                    );
                    outcome.policy_escalated = true;
                }
            } else if hit_rate > GROW_HIT_RATE {
                outcome.budget_grown = self.try_grow_budget(coordinator, hit_rate);
            }
        }

        outcome.promoted = coordinator.promote_frequent(PROMOTE_FACTOR);
        outcome.demoted = coordinator.demote_infrequent(DEMOTE_FACTOR);
        outcome
    }

    fn try_grow_budget<V>(&self, coordinator: &CacheCoordinator<V>, hit_rate: f64) -> bool
    where
        V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let config = coordinator.config_snapshot();
        let (_, occupied_bytes) = coordinator.hot_occupancy();
        let occupancy_limit = (config.max_size_bytes as f64 * GROW_OCCUPANCY_FRACTION) as u64;
        if occupied_bytes >= occupancy_limit {
            return false;
        }

        let ceiling = coordinator.budget_ceiling();
        if config.max_size_bytes >= ceiling {
            return false;
        }

        let grown = ((config.max_size_bytes as f64 * GROW_FACTOR) as u64).min(ceiling);
        log::info!(
            "window hit rate {:.2} with occupancy {}B under {}B, growing budget {} -> {}",
            hit_rate,
            occupied_bytes,
            occupancy_limit,
            config.max_size_bytes,
            grown
        );

        let mut next = (*config).clone();
        next.max_size_bytes = grown;
        coordinator.install_config(next);
        true
    }
}
