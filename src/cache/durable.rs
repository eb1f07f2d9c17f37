//! Durable store adapter and fire-and-forget write service
//!
//! The durable store is the cold end of the fallback chain, consulted only
//! after both in-process tiers miss. Backends are pluggable behind the
//! [`DurableStore`] trait; nothing above this module may assume a specific
//! storage technology. Guarantees are last-write-wins only, and every backend
//! error is non-fatal to the cache.
//!
//! Writes go through a dedicated service thread so `set()` never blocks on
//! storage I/O. Failures are logged and counted, never raised to the caller.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::cache::config::sanitize_cache_id;
use crate::cache::error::DurableStoreError;
use crate::telemetry::CacheStatistics;

/// Pluggable cold-storage backend
///
/// Keys are definition ids; values are opaque encoded bytes. Implementations
/// must be safe to call from the write service thread and the read path
/// concurrently.
pub trait DurableStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DurableStoreError>;
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), DurableStoreError>;
    fn remove(&self, key: &str) -> Result<(), DurableStoreError>;
}

/// In-memory backend for tests and cache-only deployments
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DurableStoreError> {
        Ok(self.lock().get(key).cloned())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), DurableStoreError> {
        self.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), DurableStoreError> {
        self.lock().remove(key);
        Ok(())
    }
}

/// File-per-key backend rooted at a base directory
///
/// Keys are sanitized for filesystem safety before use, the same way cache
/// ids are sanitized for storage paths.
#[derive(Debug)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Open a file store, creating the base directory if needed
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self, DurableStoreError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.bin", sanitize_cache_id(key)))
    }
}

impl DurableStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DurableStoreError> {
        match std::fs::read(self.key_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), DurableStoreError> {
        // Write-then-rename keeps a concurrent reader from seeing a torn file.
        let path = self.key_path(key);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), DurableStoreError> {
        match std::fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

enum WriteCommand {
    Put { key: String, bytes: Vec<u8> },
    Remove { key: String },
    Flush { ack: Sender<()> },
}

/// Handle to the durable backend and its background write service
///
/// Reads go straight to the backend; writes are dispatched to the service
/// thread and never block the caller.
pub struct DurableWriter {
    store: Arc<dyn DurableStore>,
    sender: Mutex<Option<Sender<WriteCommand>>>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl DurableWriter {
    pub fn spawn(store: Arc<dyn DurableStore>, stats: Arc<CacheStatistics>) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let service_store = store.clone();
        let handle = std::thread::Builder::new()
            .name("tourcache-durable-writer".to_string())
            .spawn(move || Self::service_loop(service_store, stats, receiver))
            .ok();

        if handle.is_none() {
            log::error!("failed to spawn durable write service; writes will be dropped");
        }

        Self {
            store,
            sender: Mutex::new(handle.as_ref().map(|_| sender)),
            handle: Mutex::new(handle),
        }
    }

    fn service_loop(
        store: Arc<dyn DurableStore>,
        stats: Arc<CacheStatistics>,
        receiver: Receiver<WriteCommand>,
    ) {
        log::debug!("durable write service started");
        while let Ok(command) = receiver.recv() {
            match command {
                WriteCommand::Put { key, bytes } => {
                    if let Err(err) = store.put(&key, &bytes) {
                        stats.record_durable_write_failure();
                        log::warn!("durable write for '{}' failed: {}", key, err);
                    }
                }
                WriteCommand::Remove { key } => {
                    if let Err(err) = store.remove(&key) {
                        stats.record_durable_write_failure();
                        log::warn!("durable remove for '{}' failed: {}", key, err);
                    }
                }
                WriteCommand::Flush { ack } => {
                    let _ = ack.send(());
                }
            }
        }
        log::debug!("durable write service exiting");
    }

    /// Synchronous read used by the fallback chain
    pub fn read(&self, key: &str) -> Result<Option<Vec<u8>>, DurableStoreError> {
        self.store.get(key)
    }

    /// Queue a fire-and-forget write
    pub fn enqueue_put(&self, key: String, bytes: Vec<u8>) {
        self.send(WriteCommand::Put { key, bytes });
    }

    /// Queue a fire-and-forget removal
    pub fn enqueue_remove(&self, key: String) {
        self.send(WriteCommand::Remove { key });
    }

    fn send(&self, command: WriteCommand) {
        let guard = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_ref() {
            Some(sender) => {
                if sender.send(command).is_err() {
                    log::warn!("durable write service is gone; dropping write");
                }
            }
            None => log::debug!("durable write service closed; dropping write"),
        }
    }

    /// Wait until every queued write has been applied, up to the timeout
    pub fn flush(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        self.send(WriteCommand::Flush { ack: ack_tx });
        ack_rx.recv_timeout(timeout).is_ok()
    }

    /// Bounded best-effort flush, then stop the service
    ///
    /// If the flush times out the service thread is left to drain and exit on
    /// its own rather than blocking shutdown indefinitely.
    pub fn shutdown(&self, timeout: Duration) {
        let flushed = self.flush(timeout);
        if !flushed {
            log::warn!("durable flush timed out after {:?}; pending writes may be lost", timeout);
        }

        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(sender);

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if flushed {
                if handle.join().is_err() {
                    log::warn!("durable write service panicked during shutdown");
                }
            }
            // On timeout the handle is dropped and the thread detaches.
        }
    }
}

impl std::fmt::Debug for DurableWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableWriter").finish_non_exhaustive()
    }
}
