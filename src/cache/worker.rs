//! Background maintenance scheduler
//!
//! One named worker thread per cache instance multiplexes a periodic tick
//! against a shutdown channel. Each tick runs the TTL sweep, the lifecycle
//! cleanup passes, and the optimizer. The handle is explicitly cancellable:
//! `stop()` signals the thread and joins it, and dropping the scheduler stops
//! it. Tests that need deterministic time call [`run_maintenance_tick`]
//! directly instead of waiting on the timer.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::coordinator::CacheCoordinator;
use super::optimizer::Optimizer;
use crate::lifecycle::{PressureLevel, TourLifecycleManager};

/// Run one full maintenance pass: sweep, lifecycle cleanup, optimizer
pub fn run_maintenance_tick<V>(
    coordinator: &CacheCoordinator<V>,
    lifecycle: &TourLifecycleManager,
    optimizer: &mut Optimizer,
) where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let swept = coordinator.sweep_expired();
    if swept > 0 {
        log::debug!("maintenance sweep expired {} entries", swept);
    }

    lifecycle.cleanup_inactive_tours();
    if lifecycle.pressure_level() != PressureLevel::Low {
        lifecycle.cleanup_by_memory_pressure();
    }

    optimizer.run_pass(coordinator);
}

/// Cancellable handle to the maintenance thread
pub struct MaintenanceScheduler {
    shutdown: Option<Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl MaintenanceScheduler {
    /// Spawn the maintenance thread for a cache instance
    pub fn start<V>(
        coordinator: Arc<CacheCoordinator<V>>,
        lifecycle: Arc<TourLifecycleManager>,
        interval: Duration,
    ) -> Self
    where
        V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);

        let handle = std::thread::Builder::new()
            .name("tourcache-maintenance".to_string())
            .spawn(move || {
                let ticker = crossbeam_channel::tick(interval);
                let mut optimizer = Optimizer::new();
                log::info!("maintenance scheduler started with {:?} interval", interval);

                loop {
                    crossbeam_channel::select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            run_maintenance_tick(&coordinator, &lifecycle, &mut optimizer);
                        }
                    }
                }
                log::info!("maintenance scheduler exiting");
            })
            .ok();

        if handle.is_none() {
            log::error!("failed to spawn maintenance thread; periodic cleanup is disabled");
        }

        Self {
            shutdown: handle.as_ref().map(|_| shutdown_tx),
            handle,
        }
    }

    /// Signal the thread and join it; safe to call more than once
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("maintenance thread panicked during shutdown");
            }
        }
    }
}

impl Drop for MaintenanceScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MaintenanceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceScheduler")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::{CacheConfig, LifecycleConfig};
    use crate::cache::durable::MemoryStore;
    use crate::cache::entry::Priority;

    fn fixtures(ttl_ms: u64) -> (Arc<CacheCoordinator<String>>, Arc<TourLifecycleManager>) {
        let config = CacheConfig {
            ttl_ms,
            ..CacheConfig::default()
        };
        let coordinator = Arc::new(CacheCoordinator::new(config, Arc::new(MemoryStore::new())));
        let lifecycle = Arc::new(TourLifecycleManager::new(LifecycleConfig::default()));
        (coordinator, lifecycle)
    }

    #[test]
    fn test_manual_tick_sweeps_expired_entries() {
        let (coordinator, lifecycle) = fixtures(30);
        coordinator.set("short", "def".to_string(), Priority::Medium);

        std::thread::sleep(Duration::from_millis(60));
        let mut optimizer = Optimizer::new();
        run_maintenance_tick(&coordinator, &lifecycle, &mut optimizer);

        assert_eq!(coordinator.stats().snapshot().expirations, 1);
        assert_eq!(coordinator.hot_occupancy().0, 0);
    }

    #[test]
    fn test_background_tick_fires_and_sweeps() {
        let (coordinator, lifecycle) = fixtures(20);
        coordinator.set("short", "def".to_string(), Priority::Medium);

        let mut scheduler =
            MaintenanceScheduler::start(coordinator.clone(), lifecycle, Duration::from_millis(25));
        std::thread::sleep(Duration::from_millis(120));
        scheduler.stop();

        assert_eq!(coordinator.hot_occupancy().0, 0);
        assert!(coordinator.stats().snapshot().expirations >= 1);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (coordinator, lifecycle) = fixtures(1000);
        let mut scheduler =
            MaintenanceScheduler::start(coordinator, lifecycle, Duration::from_millis(10));
        scheduler.stop();
        scheduler.stop();
    }
}
