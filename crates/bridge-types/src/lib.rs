//! Common types for the learning bridge controller.
//!
//! This crate provides type-safe representations of the network primitives
//! shared by the bridge engine and its platform boundary:
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`Ipv4Address`]: IPv4 addresses
//! - [`Ipv4Prefix`]: IPv4 network prefixes (CIDR notation)
//! - [`SwitchId`]: Opaque handle of a managed switch
//! - [`PortNumber`]: Switch port number

mod device;
mod ip;
mod mac;

pub use device::{PortNumber, SwitchId};
pub use ip::{Ipv4Address, Ipv4Prefix};
pub use mac::MacAddress;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    #[error("invalid switch id: {0}")]
    InvalidSwitchId(String),
}
