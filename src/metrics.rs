//! Observability counters for bridge operations
//!
//! Tracks session-cache behaviour and crypto call volume. Counters are
//! lock-free; [`BridgeMetrics::snapshot`] produces a serializable copy that a
//! host can export however it likes.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters owned by a bridge context
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    sessions_built: AtomicU64,
    duplicates_discarded: AtomicU64,
    encrypt_calls: AtomicU64,
    decrypt_calls: AtomicU64,
    encrypt_micros: AtomicU64,
    decrypt_micros: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of [`BridgeMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Session acquisitions served from the cache
    pub cache_hits: u64,
    /// Session acquisitions that had to construct a session
    pub cache_misses: u64,
    /// Native sessions constructed (cached or not)
    pub sessions_built: u64,
    /// Race-built duplicate sessions freed during double-checked insertion
    pub duplicates_discarded: u64,
    pub encrypt_calls: u64,
    pub decrypt_calls: u64,
    /// Cumulative time inside native encrypt, in microseconds
    pub encrypt_micros: u64,
    /// Cumulative time inside native decrypt, in microseconds
    pub decrypt_micros: u64,
    /// Calls that returned a failure status
    pub failures: u64,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_built(&self) {
        self.sessions_built.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn duplicate_discarded(&self) {
        self.duplicates_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn encrypted(&self, micros: u64) {
        self.encrypt_calls.fetch_add(1, Ordering::Relaxed);
        self.encrypt_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub(crate) fn decrypted(&self, micros: u64) {
        self.decrypt_calls.fetch_add(1, Ordering::Relaxed);
        self.decrypt_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            sessions_built: self.sessions_built.load(Ordering::Relaxed),
            duplicates_discarded: self.duplicates_discarded.load(Ordering::Relaxed),
            encrypt_calls: self.encrypt_calls.load(Ordering::Relaxed),
            decrypt_calls: self.decrypt_calls.load(Ordering::Relaxed),
            encrypt_micros: self.encrypt_micros.load(Ordering::Relaxed),
            decrypt_micros: self.decrypt_micros.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Fraction of acquisitions served from the cache (0.0 when none happened)
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / total as f64
    }

    /// Total time spent inside native crypto calls
    pub fn total_crypto_micros(&self) -> u64 {
        self.encrypt_micros + self.decrypt_micros
    }
}
