//! Runtime counters for the cache engine
//!
//! Thread-safe metrics collection using atomic operations.

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector shared across request tasks
#[derive(Debug, Default)]
pub struct CdnMetrics {
    total_requests: AtomicU64,
    coalesced_followers: AtomicU64,
    artifacts_written: AtomicU64,
    sidecars_written: AtomicU64,
    not_modified: AtomicU64,
    not_found: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub coalesced_followers: u64,
    pub artifacts_written: u64,
    pub sidecars_written: u64,
    pub not_modified: u64,
    pub not_found: u64,
}

impl CdnMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record followers served from another request's flight
    pub fn record_coalesced(&self, followers: u64) {
        self.coalesced_followers.fetch_add(followers, Ordering::Relaxed);
    }

    pub fn record_artifact_written(&self) {
        self.artifacts_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sidecar_written(&self) {
        self.sidecars_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_modified(&self) {
        self.not_modified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            coalesced_followers: self.coalesced_followers.load(Ordering::Relaxed),
            artifacts_written: self.artifacts_written.load(Ordering::Relaxed),
            sidecars_written: self.sidecars_written.load(Ordering::Relaxed),
            not_modified: self.not_modified.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
        }
    }
}
