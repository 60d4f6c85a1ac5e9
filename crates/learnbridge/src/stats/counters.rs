//! Engine counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters updated by the engine's event handlers.
#[derive(Debug, Default)]
pub struct BridgeStats {
    pub frames_received: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub frames_skipped: AtomicU64,
    pub frames_blocked: AtomicU64,
    pub frames_flooded: AtomicU64,
    pub frames_forwarded: AtomicU64,
    pub rules_installed: AtomicU64,
    pub install_failures: AtomicU64,
    pub rule_events: AtomicU64,
    pub pairs_retired: AtomicU64,
    pub connections_tracked: AtomicU64,
    pub connections_logged: AtomicU64,
}

/// Point-in-time copy of [`BridgeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStatsSnapshot {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub frames_skipped: u64,
    pub frames_blocked: u64,
    pub frames_flooded: u64,
    pub frames_forwarded: u64,
    pub rules_installed: u64,
    pub install_failures: u64,
    pub rule_events: u64,
    pub pairs_retired: u64,
    pub connections_tracked: u64,
    pub connections_logged: u64,
}

impl BridgeStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        BridgeStatsSnapshot {
            frames_received: load(&self.frames_received),
            frames_dropped: load(&self.frames_dropped),
            frames_skipped: load(&self.frames_skipped),
            frames_blocked: load(&self.frames_blocked),
            frames_flooded: load(&self.frames_flooded),
            frames_forwarded: load(&self.frames_forwarded),
            rules_installed: load(&self.rules_installed),
            install_failures: load(&self.install_failures),
            rule_events: load(&self.rule_events),
            pairs_retired: load(&self.pairs_retired),
            connections_tracked: load(&self.connections_tracked),
            connections_logged: load(&self.connections_logged),
        }
    }
}
