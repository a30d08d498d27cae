use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct AnalyzeStats {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    rejected: AtomicU64,
    upstream_events: AtomicU64,
    dropped_events: AtomicU64,
}

impl Default for AnalyzeStats {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyzeStats {
    pub const fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            upstream_events: AtomicU64::new(0),
            dropped_events: AtomicU64::new(0),
        }
    }

    pub fn inc_requests(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_upstream_events(&self, n: u64) {
        self.upstream_events.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_dropped_events(&self, n: u64) {
        self.dropped_events.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            upstream_events: self.upstream_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub cache_hits: u64,
    pub rejected: u64,
    pub upstream_events: u64,
    pub dropped_events: u64,
}

pub static ANALYZE_STATS: AnalyzeStats = AnalyzeStats::new();
