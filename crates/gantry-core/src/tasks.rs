//! Background cache sweeper.
//!
//! Periodically sheds memory outside the request path: entries idle past the
//! TTL are dropped, and when resident bytes exceed the advisory soft limit
//! the store is shed back under it. Without the sweeper the hard limit still
//! holds; eviction just happens synchronously inside `put`.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{CacheSettings, CacheStore};

/// Periodic cache cleanup task.
///
/// Sweeps go through the store's own eviction entry points, so they take the
/// same lock as `put` and can never interleave with a partial mutation.
pub struct CacheSweeper {
    cache: Arc<CacheStore>,
    sweep_interval: Duration,
    max_idle: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl CacheSweeper {
    /// Creates a sweeper over the given store. Call [`CacheSweeper::start`]
    /// to begin sweeping.
    #[must_use]
    pub fn new(cache: Arc<CacheStore>, settings: &CacheSettings) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            cache,
            sweep_interval: settings.sweep_interval(),
            max_idle: settings.ttl(),
            task: Mutex::new(None),
            shutdown_tx,
        }
    }

    /// Spawns the periodic sweep task. Idempotent: a second call while the
    /// task is running is a no-op.
    pub fn start(&self) {
        let mut task = self.task.lock().expect("sweeper task lock poisoned");
        if task.is_some() {
            return;
        }

        let cache = Arc::clone(&self.cache);
        let sweep_interval = self.sweep_interval;
        let max_idle = self.max_idle;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!(
            sweep_interval_secs = sweep_interval.as_secs(),
            max_idle_secs = max_idle.as_secs(),
            "Starting cache sweeper"
        );
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            // The first tick completes immediately; skip it so the initial
            // sweep happens one interval after startup.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        sweep(&cache, max_idle);
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Cache sweeper shutting down");
                        break;
                    }
                }
            }
        }));
    }

    /// Runs a single sweep synchronously. Exposed for composition with an
    /// external scheduler and for tests.
    pub fn sweep_once(&self) {
        sweep(&self.cache, self.max_idle);
    }

    /// Stops the sweep task and waits for it to finish.
    pub async fn shutdown(&self) {
        let task = self
            .task
            .lock()
            .expect("sweeper task lock poisoned")
            .take();
        if let Some(handle) = task {
            let _ = self.shutdown_tx.send(());
            let _ = handle.await;
            info!("Cache sweeper stopped");
        }
    }
}

impl std::fmt::Debug for CacheSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSweeper")
            .field("sweep_interval", &self.sweep_interval)
            .field("max_idle", &self.max_idle)
            .finish_non_exhaustive()
    }
}

fn sweep(cache: &CacheStore, max_idle: Duration) {
    let idle_evicted = cache.evict_idle(max_idle);
    if idle_evicted > 0 {
        debug!(idle_evicted, "Swept idle cache entries");
    }

    let stats = cache.stats();
    let soft_limit = cache.soft_limit_bytes();
    if stats.current_size_bytes > soft_limit {
        let freed = cache.shed_to(soft_limit);
        info!(
            freed_bytes = freed,
            resident_bytes = stats.current_size_bytes - freed,
            soft_limit_bytes = soft_limit,
            "Shed cache to soft limit"
        );
    }
}
