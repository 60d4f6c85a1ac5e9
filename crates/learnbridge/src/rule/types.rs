//! Forwarding rule descriptor types.
//!
//! A forwarding rule consists of:
//! - Match conditions (which frames it applies to)
//! - A single output action (egress port)
//! - A priority tier (plain MAC rule or finer-grained TCP rule)
//! - The owning application and a soft expiration interval

use bridge_types::{Ipv4Prefix, MacAddress, PortNumber, SwitchId};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::platform::AppId;

/// Priority tier of an installed rule.
///
/// A host can be the source of a plain learned route and a TCP-specific
/// route at the same time. The TCP rule must win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTier {
    /// Matches ingress port and MAC pair only.
    Plain,
    /// Additionally matches the IPv4/TCP 5-tuple.
    TcpAware,
}

impl fmt::Display for RuleTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => write!(f, "PLAIN"),
            Self::TcpAware => write!(f, "TCP"),
        }
    }
}

/// Match predicate of a forwarding rule.
///
/// Every criterion is optional so that predicates reported back by the
/// platform (which may belong to rules this bridge did not build) can be
/// represented faithfully.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchPredicate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_port: Option<PortNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eth_src: Option<MacAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eth_dst: Option<MacAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eth_type: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_src: Option<Ipv4Prefix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_dst: Option<Ipv4Prefix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_proto: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_src: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_dst: Option<u16>,
}

impl MatchPredicate {
    /// Returns the (source, destination) MAC pair, if both are matched.
    pub fn mac_pair(&self) -> Option<(MacAddress, MacAddress)> {
        Some((self.eth_src?, self.eth_dst?))
    }

    /// Returns true if the predicate matches on both TCP ports.
    pub fn has_tcp_ports(&self) -> bool {
        self.tcp_src.is_some() && self.tcp_dst.is_some()
    }

    /// Returns true if this predicate matches exactly the given MAC pair.
    pub fn matches_pair(&self, src: &MacAddress, dst: &MacAddress) -> bool {
        self.eth_src.as_ref() == Some(src) && self.eth_dst.as_ref() == Some(dst)
    }
}

impl fmt::Display for MatchPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(p) = self.in_port {
            parts.push(format!("IN_PORT:{}", p));
        }
        if let Some(m) = self.eth_src {
            parts.push(format!("ETH_SRC:{}", m));
        }
        if let Some(m) = self.eth_dst {
            parts.push(format!("ETH_DST:{}", m));
        }
        if let Some(t) = self.eth_type {
            parts.push(format!("ETH_TYPE:0x{:04x}", t));
        }
        if let Some(p) = self.ipv4_src {
            parts.push(format!("IPV4_SRC:{}", p));
        }
        if let Some(p) = self.ipv4_dst {
            parts.push(format!("IPV4_DST:{}", p));
        }
        if let Some(p) = self.ip_proto {
            parts.push(format!("IP_PROTO:{}", p));
        }
        if let Some(p) = self.tcp_src {
            parts.push(format!("TCP_SRC:{}", p));
        }
        if let Some(p) = self.tcp_dst {
            parts.push(format!("TCP_DST:{}", p));
        }
        write!(f, "[{}]", parts.join(", "))
    }
}

/// A rule ready to be submitted to the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingRule {
    pub switch: SwitchId,
    pub selector: MatchPredicate,
    pub output: PortNumber,
    pub tier: RuleTier,
    pub priority: u16,
    pub app_id: AppId,
    /// Soft timeout in seconds.
    pub timeout_secs: u32,
    /// Permanent rules never expire. Learned rules are always soft.
    pub permanent: bool,
}

impl fmt::Display for ForwardingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> OUTPUT:{} (prio {} {}, timeout {}s, app {})",
            self.switch,
            self.selector,
            self.output,
            self.priority,
            self.tier,
            self.timeout_secs,
            self.app_id
        )
    }
}
