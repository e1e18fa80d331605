use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for operational visibility. Shared by clones.
#[derive(Clone, Default)]
pub struct DispatchCounters {
    pub attempts: Arc<AtomicU64>,
    pub assigned: Arc<AtomicU64>,

    // failure buckets
    pub not_found: Arc<AtomicU64>,
    pub conflicts: Arc<AtomicU64>,
    pub internal: Arc<AtomicU64>,
}

/// Point-in-time copy of `DispatchCounters`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub attempts: u64,
    pub assigned: u64,
    pub not_found: u64,
    pub conflicts: u64,
    pub internal: u64,
}

impl DispatchCounters {
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            assigned: self.assigned.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            internal: self.internal.load(Ordering::Relaxed),
        }
    }
}
