//! Registry entry types
//!
//! Per-key state stored in the keyed registry.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::broadcast::{BroadcastStats, Broadcaster};

/// Entry for a single key in the registry
pub(crate) struct RegistryEntry<T> {
    /// Engine fanning out the key's stream
    pub(crate) broadcaster: Broadcaster<T>,

    /// Release signal of the key's source
    pub(crate) release: CancellationToken,

    /// When the source was opened
    pub(crate) opened_at: Instant,
}

impl<T> RegistryEntry<T> {
    pub(crate) fn new(broadcaster: Broadcaster<T>, release: CancellationToken) -> Self {
        Self {
            broadcaster,
            release,
            opened_at: Instant::now(),
        }
    }

    /// Check whether the entry's engine can still accept listeners
    pub(crate) fn is_live(&self) -> bool {
        !self.broadcaster.is_closed()
    }

    pub(crate) fn stats(&self) -> EntryStats {
        EntryStats {
            engine_id: self.broadcaster.id(),
            broadcast: self.broadcaster.stats(),
            age: self.opened_at.elapsed(),
            released: self.release.is_cancelled(),
        }
    }
}

/// Statistics for one key
#[derive(Debug, Clone)]
pub struct EntryStats {
    /// ID of the engine currently serving the key
    pub engine_id: u64,
    /// Engine counters
    pub broadcast: BroadcastStats,
    /// Time since the key's source was opened
    pub age: Duration,
    /// Whether the source has been released
    pub released: bool,
}
