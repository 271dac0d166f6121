//! Buffer pool statistics tracking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters tracked by a buffer pool instance.
///
/// All fields are atomic so any thread can bump them without a lock.
/// `Ordering::Relaxed` everywhere: the counters only need atomicity, not
/// ordering relative to each other.
#[derive(Debug, Default)]
pub struct BufferPoolStats {
    /// Number of times a requested page was already resident.
    pub cache_hits: AtomicU64,

    /// Number of times a requested page had to be read from disk.
    pub cache_misses: AtomicU64,

    /// Number of times a resident page was evicted to make room.
    pub evictions: AtomicU64,

    /// Number of pages read from disk.
    pub pages_read: AtomicU64,

    /// Number of pages written to disk.
    pub pages_written: AtomicU64,
}

impl BufferPoolStats {
    /// Create a new stats tracker with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a non-atomic copy of the current counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            pages_read: self.pages_read.load(Ordering::Relaxed),
            pages_written: self.pages_written.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of buffer pool statistics, safe to print,
/// compare, and aggregate.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
    pub pages_read: u64,
    pub pages_written: u64,
}

impl StatsSnapshot {
    /// Cache hit rate in [0.0, 1.0].
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Element-wise sum, for aggregating across pool instances.
    pub fn merge(&self, other: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits + other.cache_hits,
            cache_misses: self.cache_misses + other.cache_misses,
            evictions: self.evictions + other.evictions,
            pages_read: self.pages_read + other.pages_read,
            pages_written: self.pages_written + other.pages_written,
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats {{ hits: {}, misses: {}, evictions: {}, hit_rate: {:.2}% }}",
            self.cache_hits,
            self.cache_misses,
            self.evictions,
            self.hit_rate() * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = BufferPoolStats::new();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.cache_hits, 0);
        assert_eq!(snapshot.hit_rate(), 0.0);
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = BufferPoolStats::new();
        stats.cache_hits.fetch_add(7, Ordering::Relaxed);
        stats.cache_misses.fetch_add(3, Ordering::Relaxed);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.cache_hits, 7);
        assert_eq!(snapshot.cache_misses, 3);
        assert_eq!(snapshot.hit_rate(), 0.7);
    }

    #[test]
    fn test_stats_merge() {
        let a = StatsSnapshot {
            cache_hits: 1,
            cache_misses: 2,
            evictions: 3,
            pages_read: 4,
            pages_written: 5,
        };
        let merged = a.merge(&a);
        assert_eq!(merged.cache_hits, 2);
        assert_eq!(merged.pages_written, 10);
    }

    #[test]
    fn test_stats_display() {
        let stats = BufferPoolStats::new();
        stats.cache_hits.fetch_add(80, Ordering::Relaxed);
        stats.cache_misses.fetch_add(20, Ordering::Relaxed);

        let display = format!("{}", stats.snapshot());
        assert!(display.contains("hits: 80"));
        assert!(display.contains("80.00%"));
    }
}
