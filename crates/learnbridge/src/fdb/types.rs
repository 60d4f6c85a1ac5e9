//! Learning table types.

use bridge_types::PortNumber;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// A learned host location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdbEntry {
    pub port: PortNumber,
    pub learned_at: DateTime<Utc>,
}

impl FdbEntry {
    pub fn new(port: PortNumber, learned_at: DateTime<Utc>) -> Self {
        Self { port, learned_at }
    }

    /// Returns true if the entry is older than `aging` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, aging: Option<std::time::Duration>) -> bool {
        let Some(aging) = aging else {
            return false;
        };
        match chrono::Duration::from_std(aging) {
            Ok(aging) => now.signed_duration_since(self.learned_at) > aging,
            Err(_) => false,
        }
    }
}

/// Learning table counters.
#[derive(Debug, Default)]
pub struct FdbStats {
    pub entries_added: AtomicU64,
    pub entries_moved: AtomicU64,
    pub entries_aged: AtomicU64,
}

impl FdbStats {
    pub fn added(&self) -> u64 {
        self.entries_added.load(Ordering::Relaxed)
    }

    pub fn moved(&self) -> u64 {
        self.entries_moved.load(Ordering::Relaxed)
    }

    pub fn aged(&self) -> u64 {
        self.entries_aged.load(Ordering::Relaxed)
    }
}
