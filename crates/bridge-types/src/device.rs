//! Switch and port identifiers.
//!
//! Both are opaque handles handed out by the control-plane platform. The
//! bridge only uses them as map keys and never interprets their contents.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a managed switch (e.g. `of:0000000000000001`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SwitchId(String);

impl SwitchId {
    /// Creates a switch id from any non-empty string.
    pub fn new(id: impl Into<String>) -> Result<Self, ParseError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ParseError::InvalidSwitchId(id));
        }
        Ok(SwitchId(id))
    }
}

impl fmt::Display for SwitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SwitchId {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        SwitchId::new(s)
    }
}

impl From<SwitchId> for String {
    fn from(id: SwitchId) -> String {
        id.0
    }
}

/// A switch port number, as reported with a punted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortNumber(u32);

impl PortNumber {
    pub const fn new(port: u32) -> Self {
        PortNumber(port)
    }
}

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
