//! Engine statistics
//!
//! Counters are written only by the engine's control loop and may be read
//! from anywhere. Nothing in the engine branches on them.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Live counters shared between the control loop and engine handles
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) listeners: AtomicUsize,
    pub(crate) broadcasts: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) evicted: AtomicU64,
    pub(crate) rejected: AtomicU64,
}

impl Counters {
    pub(crate) fn set_listeners(&self, count: usize) {
        self.listeners.store(count, Ordering::Relaxed);
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BroadcastStats {
        BroadcastStats {
            listeners: self.listeners.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time statistics for one engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Currently registered listeners
    pub listeners: usize,
    /// Values fanned out to at least one listener
    pub broadcasts: u64,
    /// Values dropped because no listener was registered
    pub dropped: u64,
    /// Listeners evicted for missing a delivery deadline
    pub evicted: u64,
    /// Values the converter dropped or failed to convert
    pub rejected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = Counters::default();
        assert_eq!(counters.snapshot(), BroadcastStats::default());

        counters.set_listeners(3);
        Counters::incr(&counters.broadcasts);
        Counters::incr(&counters.broadcasts);
        Counters::incr(&counters.evicted);

        let stats = counters.snapshot();
        assert_eq!(stats.listeners, 3);
        assert_eq!(stats.broadcasts, 2);
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.dropped, 0);
    }
}
