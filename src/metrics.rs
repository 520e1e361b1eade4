use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphMetricsSnapshot {
    pub cursors_opened: u64,
    pub scans: u64,
    /// Rows the cursor stepped onto, including rows a wildcard filtered out.
    pub rows_scanned: u64,
    pub rows_returned: u64,
    pub tx_begin_count: u64,
    pub tx_commit_count: u64,
    pub tx_rollback_count: u64,
}

#[derive(Default)]
pub struct GraphMetrics {
    cursors_opened: AtomicU64,
    scans: AtomicU64,
    rows_scanned: AtomicU64,
    rows_returned: AtomicU64,
    tx_begin: AtomicU64,
    tx_commit: AtomicU64,
    tx_rollback: AtomicU64,
}

impl GraphMetrics {
    pub fn snapshot(&self) -> GraphMetricsSnapshot {
        GraphMetricsSnapshot {
            cursors_opened: self.cursors_opened.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            rows_scanned: self.rows_scanned.load(Ordering::Relaxed),
            rows_returned: self.rows_returned.load(Ordering::Relaxed),
            tx_begin_count: self.tx_begin.load(Ordering::Relaxed),
            tx_commit_count: self.tx_commit.load(Ordering::Relaxed),
            tx_rollback_count: self.tx_rollback.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.cursors_opened.store(0, Ordering::Relaxed);
        self.scans.store(0, Ordering::Relaxed);
        self.rows_scanned.store(0, Ordering::Relaxed);
        self.rows_returned.store(0, Ordering::Relaxed);
        self.tx_begin.store(0, Ordering::Relaxed);
        self.tx_commit.store(0, Ordering::Relaxed);
        self.tx_rollback.store(0, Ordering::Relaxed);
    }

    pub fn record_cursor_open(&self) {
        self.cursors_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan(&self, visited: u64, returned: usize) {
        self.scans.fetch_add(1, Ordering::Relaxed);
        self.rows_scanned.fetch_add(visited, Ordering::Relaxed);
        self.rows_returned.fetch_add(returned as u64, Ordering::Relaxed);
    }

    pub fn record_begin(&self) {
        self.tx_begin.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit(&self) {
        self.tx_commit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollback(&self) {
        self.tx_rollback.fetch_add(1, Ordering::Relaxed);
    }
}
