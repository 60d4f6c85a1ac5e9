//! Connection key and record types.

use bridge_types::{Ipv4Address, MacAddress, SwitchId};
use chrono::{DateTime, Utc};
use std::fmt;

use crate::packet::{Ipv4Fields, TcpFields};
use crate::rule::MatchPredicate;

/// Identity of one TCP flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub src_mac: MacAddress,
    pub dst_mac: MacAddress,
    pub src_ip: Ipv4Address,
    pub dst_ip: Ipv4Address,
    pub src_port: u16,
    pub dst_port: u16,
}

impl ConnectionKey {
    pub fn new(
        src_mac: MacAddress,
        dst_mac: MacAddress,
        src_ip: Ipv4Address,
        dst_ip: Ipv4Address,
        src_port: u16,
        dst_port: u16,
    ) -> Self {
        Self {
            src_mac,
            dst_mac,
            src_ip,
            dst_ip,
            src_port,
            dst_port,
        }
    }

    pub fn from_headers(
        src_mac: MacAddress,
        dst_mac: MacAddress,
        ip: &Ipv4Fields,
        tcp: &TcpFields,
    ) -> Self {
        Self::new(src_mac, dst_mac, ip.src, ip.dst, tcp.src_port, tcp.dst_port)
    }

    /// Rebuilds the key from a rule's match predicate.
    ///
    /// Returns `None` unless both MACs, both IPv4 addresses and both TCP
    /// ports are matched.
    pub fn from_match(selector: &MatchPredicate) -> Option<Self> {
        Some(Self::new(
            selector.eth_src?,
            selector.eth_dst?,
            *selector.ipv4_src?.address(),
            *selector.ipv4_dst?.address(),
            selector.tcp_src?,
            selector.tcp_dst?,
        ))
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port
        )
    }
}

/// Tracked metadata of one TCP flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub switch: SwitchId,
    pub src_mac: MacAddress,
    pub dst_mac: MacAddress,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl ConnectionRecord {
    pub fn new(switch: SwitchId, src_mac: MacAddress, dst_mac: MacAddress, start: DateTime<Utc>) -> Self {
        Self {
            switch,
            src_mac,
            dst_mac,
            start,
            end: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Sets the end time. A record that already ended keeps its end time.
    pub fn close(&mut self, at: DateTime<Utc>) {
        if self.end.is_none() {
            self.end = Some(at);
        }
    }

    /// Elapsed milliseconds, frozen at `end` once set. Never negative.
    pub fn duration_ms(&self, now: DateTime<Utc>) -> u64 {
        let until = self.end.unwrap_or(now);
        let ms = until.signed_duration_since(self.start).num_milliseconds();
        u64::try_from(ms).unwrap_or(0)
    }
}
