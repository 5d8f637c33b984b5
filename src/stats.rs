use std::sync::atomic::{AtomicU64, Ordering};

/// Paging counters, updated without taking any memory-manager lock
#[derive(Default)]
pub struct Stats {
    page_faults: AtomicU64,
    evictions: AtomicU64,
    swap_ins: AtomicU64,
    swap_outs: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub page_faults: u64,
    pub evictions: u64,
    pub swap_ins: u64,
    pub swap_outs: u64,
}

impl Stats {
    #[inline]
    pub fn record_page_fault(&self) {
        self.page_faults.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_swap_in(&self) {
        self.swap_ins.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_swap_out(&self) {
        self.swap_outs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            page_faults: self.page_faults.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            swap_ins: self.swap_ins.load(Ordering::Relaxed),
            swap_outs: self.swap_outs.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "page faults={}, evictions={}, swap-ins={}, swap-outs={}",
            self.page_faults, self.evictions, self.swap_ins, self.swap_outs
        )
    }
}
