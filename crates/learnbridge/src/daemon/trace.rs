//! JSON-lines trace format.
//!
//! ```text
//! {"type":"inbound_frame","switch":"of:0000000000000001","in_port":1,"src":"00:00:00:00:00:a1","dst":"ff:ff:ff:ff:ff:ff"}
//! {"type":"inbound_frame","switch":"of:0000000000000001","in_port":1,"src":"00:00:00:00:00:a1","dst":"00:00:00:00:00:b1",
//!  "tcp":{"src_ip":"10.0.0.1","dst_ip":"10.0.0.2","src_port":5000,"dst_port":80,"syn":true}}
//! {"type":"rule_removed","src":"00:00:00:00:00:a1","dst":"00:00:00:00:00:b1","bytes":1000,"packets":7}
//! {"type":"expire_all"}
//! {"type":"pause","millis":250}
//! ```

use bridge_types::{Ipv4Address, MacAddress, PortNumber, SwitchId};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::packet::{encode_ethernet_frame, encode_tcp_frame, TcpFlags, ETHER_TYPE_ARP};
use crate::platform::InboundFrame;

/// IPv4/TCP part of a synthesized frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpSpec {
    pub src_ip: Ipv4Address,
    pub dst_ip: Ipv4Address,
    pub src_port: u16,
    pub dst_port: u16,
    #[serde(default)]
    pub syn: bool,
    #[serde(default)]
    pub ack: bool,
    #[serde(default)]
    pub fin: bool,
    #[serde(default)]
    pub rst: bool,
}

impl TcpSpec {
    fn flags(&self) -> TcpFlags {
        TcpFlags {
            syn: self.syn,
            ack: self.ack,
            fin: self.fin,
            rst: self.rst,
        }
    }
}

/// One line of the trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    /// A frame punted by a switch. Either synthesized from `src`/`dst`
    /// (and `tcp`), or given verbatim as `raw_hex`.
    InboundFrame {
        switch: SwitchId,
        in_port: PortNumber,
        #[serde(default)]
        src: Option<MacAddress>,
        #[serde(default)]
        dst: Option<MacAddress>,
        #[serde(default)]
        ether_type: Option<u16>,
        #[serde(default)]
        tcp: Option<TcpSpec>,
        #[serde(default)]
        raw_hex: Option<String>,
        #[serde(default)]
        handled: bool,
    },
    /// Expires the installed rules matching a MAC pair, optionally narrowed
    /// to one switch and one TCP port pair.
    RuleRemoved {
        #[serde(default)]
        switch: Option<SwitchId>,
        src: MacAddress,
        dst: MacAddress,
        #[serde(default)]
        src_port: Option<u16>,
        #[serde(default)]
        dst_port: Option<u16>,
        /// Replaces the rule's byte counter when set.
        #[serde(default)]
        bytes: Option<u64>,
        /// Replaces the rule's packet counter when set.
        #[serde(default)]
        packets: Option<u64>,
    },
    /// Idle-expires every rule that is not permanent.
    ExpireAll,
    /// Waits for in-flight work, then sleeps.
    Pause { millis: u64 },
}

impl TraceEvent {
    /// Decodes one trace line.
    pub fn parse_line(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| BridgeError::Trace(e.to_string()))
    }

    /// Builds the inbound frame of an `inbound_frame` event.
    pub fn to_frame(&self) -> Result<Option<InboundFrame>> {
        let TraceEvent::InboundFrame {
            switch,
            in_port,
            src,
            dst,
            ether_type,
            tcp,
            raw_hex,
            handled,
        } = self
        else {
            return Ok(None);
        };

        let data = match (raw_hex, src, dst) {
            (Some(hex), _, _) => decode_hex(hex)?,
            (None, Some(src), Some(dst)) => match tcp {
                Some(tcp) => encode_tcp_frame(
                    *src,
                    *dst,
                    tcp.src_ip,
                    tcp.dst_ip,
                    tcp.src_port,
                    tcp.dst_port,
                    tcp.flags(),
                    &[],
                )?,
                None => encode_ethernet_frame(
                    *src,
                    *dst,
                    ether_type.unwrap_or(ETHER_TYPE_ARP),
                    &[0; 28],
                ),
            },
            _ => {
                return Err(BridgeError::Trace(
                    "inbound_frame needs raw_hex or both src and dst".to_string(),
                ))
            }
        };

        let mut frame = InboundFrame::new(switch.clone(), *in_port, data);
        frame.handled = *handled;
        Ok(Some(frame))
    }
}

/// Decodes a hex dump, ignoring `:` separators and whitespace.
fn decode_hex(text: &str) -> Result<Vec<u8>> {
    let digits: String = text
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && *c != ':')
        .collect();
    hex::decode(&digits)
        .map_err(|e| BridgeError::Trace(format!("invalid raw_hex {:?}: {}", text, e)))
}
