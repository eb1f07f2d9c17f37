//! Eviction policy engine
//!
//! Selects the next eviction victim from entry metadata under the active
//! policy. Selection is deterministic: every policy breaks ties by creation
//! time ascending, then by id, so repeated runs over the same metadata pick
//! the same victim.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_utils::atomic::AtomicCell;

use super::config::EvictionPolicyType;
use super::entry::CacheEntry;

/// Policy-driven victim selector with atomic policy switching
#[derive(Debug)]
pub struct EvictionPolicyEngine {
    /// Current active policy
    active: AtomicCell<EvictionPolicyType>,
    /// Whether adaptive escalation has already wrapped past Priority
    wrapped: AtomicBool,
}

impl EvictionPolicyEngine {
    pub fn new(policy: EvictionPolicyType) -> Self {
        Self {
            active: AtomicCell::new(policy),
            wrapped: AtomicBool::new(false),
        }
    }

    pub fn active_policy(&self) -> EvictionPolicyType {
        self.active.load()
    }

    /// Select the next eviction victim under the active policy
    pub fn select_victim<V>(&self, entries: &HashMap<String, CacheEntry<V>>) -> Option<String> {
        let policy = self.active.load();
        entries
            .iter()
            .min_by(|(id_a, a), (id_b, b)| Self::victim_order(policy, id_a, a, id_b, b))
            .map(|(id, _)| id.clone())
    }

    /// Escalate the active policy one step: LRU -> LFU -> Priority, wrapping
    /// back to LRU at most once. Returns the new policy when a switch happened.
    pub fn escalate(&self) -> Option<EvictionPolicyType> {
        let next = match self.active.load() {
            EvictionPolicyType::Lru => EvictionPolicyType::Lfu,
            EvictionPolicyType::Lfu => EvictionPolicyType::Priority,
            EvictionPolicyType::Priority => {
                if self.wrapped.swap(true, Ordering::Relaxed) {
                    return None;
                }
                EvictionPolicyType::Lru
            }
            // A TTL-configured cache joins the adaptive chain at its start.
            EvictionPolicyType::Ttl => EvictionPolicyType::Lru,
        };
        self.active.store(next);
        Some(next)
    }

    fn victim_order<V>(
        policy: EvictionPolicyType,
        id_a: &str,
        a: &CacheEntry<V>,
        id_b: &str,
        b: &CacheEntry<V>,
    ) -> std::cmp::Ordering {
        let ordering = match policy {
            EvictionPolicyType::Lru => (a.last_accessed_at, a.created_at)
                .cmp(&(b.last_accessed_at, b.created_at)),
            EvictionPolicyType::Lfu => {
                (a.access_count, a.created_at).cmp(&(b.access_count, b.created_at))
            }
            EvictionPolicyType::Ttl => a.created_at.cmp(&b.created_at),
            EvictionPolicyType::Priority => (a.priority.rank(), a.last_accessed_at, a.created_at)
                .cmp(&(b.priority.rank(), b.last_accessed_at, b.created_at)),
        };
        ordering.then_with(|| id_a.cmp(id_b))
    }
}
