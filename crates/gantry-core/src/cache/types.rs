//! Core data types for the byte-budget cache.

use chrono::{DateTime, Utc};
use gantry_abstraction::ModelHandle;
use serde::Serialize;
use std::time::Instant;

/// A resident cache entry with its accounting metadata.
#[derive(Clone)]
pub struct CacheEntry {
    /// The cached handle.
    pub value: ModelHandle,
    /// Declared size of the entry in bytes, fixed at insertion.
    pub size_bytes: u64,
    /// Timestamp of last access (monotonic clock, used for idle detection).
    pub last_accessed: Instant,
    /// Wall-clock time of last access, for reporting only.
    pub last_used_at: DateTime<Utc>,
    /// Number of times this entry has been returned by `get`.
    pub access_count: u64,
    /// Recency sequence number. Strictly increasing across all accesses to
    /// the store, so eviction order is total even when two accesses land on
    /// the same clock tick.
    pub recency: u64,
}

impl CacheEntry {
    /// Creates a fresh entry at the most-recently-used position.
    pub fn new(value: ModelHandle, size_bytes: u64, recency: u64) -> Self {
        Self {
            value,
            size_bytes,
            last_accessed: Instant::now(),
            last_used_at: Utc::now(),
            access_count: 1,
            recency,
        }
    }

    /// Records an access: refreshes timestamps, bumps the access count, and
    /// moves the entry to the given recency position.
    pub fn touch(&mut self, recency: u64) {
        self.last_accessed = Instant::now();
        self.last_used_at = Utc::now();
        self.access_count += 1;
        self.recency = recency;
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("size_bytes", &self.size_bytes)
            .field("last_accessed", &self.last_accessed)
            .field("access_count", &self.access_count)
            .field("recency", &self.recency)
            .finish_non_exhaustive()
    }
}

/// Snapshot of cache statistics for observability.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Number of entries currently resident.
    pub item_count: usize,
    /// Sum of the declared sizes of all resident entries.
    pub current_size_bytes: u64,
    /// Hard byte budget of the store.
    pub max_size_bytes: u64,
    /// `current_size_bytes / max_size_bytes`.
    pub utilization: f64,
    /// Total number of cache hits since construction.
    pub total_hits: u64,
    /// Total number of cache misses since construction.
    pub total_misses: u64,
    /// Total number of evictions (capacity, idle sweep, or shed).
    pub total_evictions: u64,
}
