//! Concurrent connection map.

use bridge_types::{MacAddress, SwitchId};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use super::types::{ConnectionKey, ConnectionRecord};

/// Connection key → open record.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    connections: DashMap<ConnectionKey, ConnectionRecord>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a record for `key` unless one exists. Returns true if created.
    pub fn on_syn(&self, key: ConnectionKey, switch: &SwitchId, now: DateTime<Utc>) -> bool {
        match self.connections.entry(key) {
            Entry::Occupied(_) => {
                debug!(connection = %key, "Duplicate SYN, keeping original start");
                false
            }
            Entry::Vacant(vacant) => {
                vacant.insert(ConnectionRecord::new(
                    switch.clone(),
                    key.src_mac,
                    key.dst_mac,
                    now,
                ));
                info!(
                    switch = %switch,
                    src = %key.src_mac,
                    dst = %key.dst_mac,
                    connection = %key,
                    "Tracking TCP connection"
                );
                true
            }
        }
    }

    /// Removes the record for `key` and closes it at `now`.
    pub fn finalize(&self, key: &ConnectionKey, now: DateTime<Utc>) -> Option<ConnectionRecord> {
        let (_, mut record) = self.connections.remove(key)?;
        record.close(now);
        Some(record)
    }

    /// Removes and closes every open record.
    pub fn drain(&self, now: DateTime<Utc>) -> Vec<(ConnectionKey, ConnectionRecord)> {
        let keys: Vec<ConnectionKey> = self.connections.iter().map(|e| *e.key()).collect();
        keys.iter()
            .filter_map(|key| self.finalize(key, now).map(|record| (*key, record)))
            .collect()
    }

    /// Returns true if any open record exists for the MAC pair.
    pub fn has_open_between(&self, src: &MacAddress, dst: &MacAddress) -> bool {
        self.connections
            .iter()
            .any(|e| &e.key().src_mac == src && &e.key().dst_mac == dst && e.value().is_open())
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<ConnectionRecord> {
        self.connections.get(key).map(|r| r.value().clone())
    }

    pub fn contains(&self, key: &ConnectionKey) -> bool {
        self.connections.contains_key(key)
    }

    pub fn open_snapshot(&self) -> Vec<(ConnectionKey, ConnectionRecord)> {
        self.connections
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
