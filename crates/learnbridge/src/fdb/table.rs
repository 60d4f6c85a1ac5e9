//! Concurrent learning table.

use bridge_types::{MacAddress, PortNumber, SwitchId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, info};

use super::types::{FdbEntry, FdbStats};

/// Switch id → (host MAC → port).
///
/// Each switch's inner map sits behind its own shard lock, so updates on
/// different switches never contend.
#[derive(Debug, Default)]
pub struct LearningTable {
    switches: DashMap<SwitchId, HashMap<MacAddress, FdbEntry>>,
    aging: Option<Duration>,
    stats: FdbStats,
}

impl LearningTable {
    pub fn new(aging: Option<Duration>) -> Self {
        Self {
            switches: DashMap::new(),
            aging,
            stats: FdbStats::default(),
        }
    }

    /// Records that `mac` was seen on `port` of `switch`. Last write wins.
    pub fn learn(&self, switch: &SwitchId, mac: MacAddress, port: PortNumber, now: DateTime<Utc>) {
        let mut macs = self.switches.entry(switch.clone()).or_default();
        match macs.insert(mac, FdbEntry::new(port, now)) {
            None => {
                self.stats.entries_added.fetch_add(1, Ordering::Relaxed);
                info!(switch = %switch, mac = %mac, port = %port, "Learned host");
            }
            Some(prev) if prev.port != port => {
                self.stats.entries_moved.fetch_add(1, Ordering::Relaxed);
                info!(
                    switch = %switch,
                    mac = %mac,
                    from = %prev.port,
                    to = %port,
                    "Host moved"
                );
            }
            Some(_) => {}
        }
    }

    /// Returns the port `mac` was last seen on, unless the entry has aged out.
    pub fn lookup(&self, switch: &SwitchId, mac: &MacAddress, now: DateTime<Utc>) -> Option<PortNumber> {
        let macs = self.switches.get(switch)?;
        let entry = macs.get(mac)?;
        if entry.is_stale(now, self.aging) {
            debug!(switch = %switch, mac = %mac, "Ignoring aged learning entry");
            return None;
        }
        Some(entry.port)
    }

    /// Returns the raw entry, ignoring aging.
    pub fn entry(&self, switch: &SwitchId, mac: &MacAddress) -> Option<FdbEntry> {
        self.switches.get(switch)?.get(mac).copied()
    }

    /// Snapshot of one switch's entries.
    pub fn entries(&self, switch: &SwitchId) -> Vec<(MacAddress, FdbEntry)> {
        self.switches
            .get(switch)
            .map(|macs| macs.iter().map(|(m, e)| (*m, *e)).collect())
            .unwrap_or_default()
    }

    /// Total number of entries across all switches.
    pub fn len(&self) -> usize {
        self.switches.iter().map(|s| s.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes aged entries. Returns how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        if self.aging.is_none() {
            return 0;
        }

        let mut removed = 0;
        for mut macs in self.switches.iter_mut() {
            let before = macs.len();
            macs.retain(|_, e| !e.is_stale(now, self.aging));
            removed += before - macs.len();
        }
        self.switches.retain(|_, macs| !macs.is_empty());

        if removed > 0 {
            self.stats
                .entries_aged
                .fetch_add(removed as u64, Ordering::Relaxed);
            info!(removed, "Swept aged learning entries");
        }
        removed
    }

    pub fn clear(&self) {
        self.switches.clear();
    }

    pub fn stats(&self) -> &FdbStats {
        &self.stats
    }
}
