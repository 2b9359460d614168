//! Engine counters.
//!
//! Relaxed atomics shared by the fetch coordinator, the update sources and the
//! controller. Snapshots are cheap copies for logging and tests.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SyncMetrics {
    fetches_issued: AtomicU64,
    /// `fetch_range` calls rejected because a fetch was outstanding.
    fetches_dropped: AtomicU64,
    fetches_failed: AtomicU64,
    /// Fetch or poll results discarded after a clear or target change.
    stale_discarded: AtomicU64,
    pushes_applied: AtomicU64,
    pushes_filtered: AtomicU64,
    polls_applied: AtomicU64,
    rows_rendered: AtomicU64,
    rows_evicted: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncMetricsSnapshot {
    pub fetches_issued: u64,
    pub fetches_dropped: u64,
    pub fetches_failed: u64,
    pub stale_discarded: u64,
    pub pushes_applied: u64,
    pub pushes_filtered: u64,
    pub polls_applied: u64,
    pub rows_rendered: u64,
    pub rows_evicted: u64,
}

impl SyncMetrics {
    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        use Ordering::Relaxed;
        SyncMetricsSnapshot {
            fetches_issued: self.fetches_issued.load(Relaxed),
            fetches_dropped: self.fetches_dropped.load(Relaxed),
            fetches_failed: self.fetches_failed.load(Relaxed),
            stale_discarded: self.stale_discarded.load(Relaxed),
            pushes_applied: self.pushes_applied.load(Relaxed),
            pushes_filtered: self.pushes_filtered.load(Relaxed),
            polls_applied: self.polls_applied.load(Relaxed),
            rows_rendered: self.rows_rendered.load(Relaxed),
            rows_evicted: self.rows_evicted.load(Relaxed),
        }
    }

    pub(crate) fn incr_issued(&self) {
        self.fetches_issued.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn incr_dropped(&self) {
        self.fetches_dropped.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn incr_failed(&self) {
        self.fetches_failed.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn incr_stale(&self) {
        self.stale_discarded.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn incr_push_applied(&self) {
        self.pushes_applied.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn incr_push_filtered(&self) {
        self.pushes_filtered.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn incr_poll_applied(&self) {
        self.polls_applied.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn incr_rendered(&self) {
        self.rows_rendered.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn add_evicted(&self, n: u64) {
        self.rows_evicted.fetch_add(n, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let m = SyncMetrics::default();
        m.incr_issued();
        m.incr_issued();
        m.incr_dropped();
        m.add_evicted(7);
        let snap = m.snapshot();
        assert_eq!(snap.fetches_issued, 2);
        assert_eq!(snap.fetches_dropped, 1);
        assert_eq!(snap.rows_evicted, 7);
        assert_eq!(snap.pushes_applied, 0);
    }
}
