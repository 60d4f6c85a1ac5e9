//! Types exchanged with the control-plane platform.

use bridge_types::{PortNumber, SwitchId};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::rule::MatchPredicate;

/// Platform-assigned rule identifier.
pub type RuleId = u64;

/// Identity of the application that owns a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    pub fn new(name: impl Into<String>) -> Self {
        AppId(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A frame punted to the controller by a switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub switch: SwitchId,
    pub in_port: PortNumber,
    pub data: Vec<u8>,
    /// Set when another application has already handled this frame.
    pub handled: bool,
}

impl InboundFrame {
    pub fn new(switch: SwitchId, in_port: PortNumber, data: Vec<u8>) -> Self {
        Self {
            switch,
            in_port,
            data,
            handled: false,
        }
    }
}

/// Kind of flow rule notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleEventType {
    Added,
    Updated,
    Removed,
}

/// A flow rule notification from the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEvent {
    pub event_type: RuleEventType,
    pub rule_id: RuleId,
    pub switch: SwitchId,
    pub app_id: AppId,
    pub selector: MatchPredicate,
    /// Final byte counter of the rule.
    pub bytes: u64,
    /// Final packet counter of the rule.
    pub packets: u64,
}

impl RuleEvent {
    /// Builds a removal notification for an installed rule.
    pub fn removed(rule: &InstalledRule) -> Self {
        Self {
            event_type: RuleEventType::Removed,
            rule_id: rule.rule_id,
            switch: rule.switch.clone(),
            app_id: rule.app_id.clone(),
            selector: rule.selector.clone(),
            bytes: rule.bytes,
            packets: rule.packets,
        }
    }
}

/// A rule currently installed on a switch, as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledRule {
    pub rule_id: RuleId,
    pub switch: SwitchId,
    pub app_id: AppId,
    pub selector: MatchPredicate,
    pub output: PortNumber,
    pub priority: u16,
    /// Idle timeout in seconds.
    pub timeout_secs: u32,
    /// Never expires on idle.
    pub permanent: bool,
    pub bytes: u64,
    pub packets: u64,
}
