//! Control-plane platform boundary.
//!
//! The bridge never talks to switches itself. Everything that leaves the
//! engine goes through the [`Platform`] trait: packet-out (flood or
//! forward), rule installation, and the rule/device queries the lifecycle
//! reconciler needs. Calls are fire-and-forget from the engine's point of
//! view. Retries and timeouts belong to the platform.
//!
//! [`MemoryPlatform`] is an in-process implementation used by the replay
//! daemon and the test suites.

mod memory;
mod types;

use async_trait::async_trait;
use bridge_types::{PortNumber, SwitchId};
use thiserror::Error;

use crate::rule::ForwardingRule;

pub use memory::{MemoryPlatform, PacketOut};
pub use types::{AppId, InboundFrame, InstalledRule, RuleEvent, RuleEventType, RuleId};

/// Errors reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("rule installation rejected: {0}")]
    InstallRejected(String),

    #[error("switch unreachable: {0}")]
    SwitchUnreachable(SwitchId),

    #[error("packet-out failed: {0}")]
    PacketOut(String),

    #[error("query failed: {0}")]
    Query(String),
}

/// Result type for platform calls.
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Side-effecting services offered by the control-plane platform.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Sends the frame out every port of its switch except the ingress port.
    async fn flood_frame(&self, frame: &InboundFrame) -> PlatformResult<()>;

    /// Sends the frame out a single port of its switch.
    async fn forward_frame(&self, frame: &InboundFrame, port: PortNumber) -> PlatformResult<()>;

    /// Installs a forwarding rule, returning the platform's rule id.
    async fn install_rule(&self, rule: &ForwardingRule) -> PlatformResult<RuleId>;

    /// Lists the rules currently installed on a switch.
    async fn query_installed_rules(&self, switch: &SwitchId) -> PlatformResult<Vec<InstalledRule>>;

    /// Lists the switch-type devices known to the platform.
    async fn query_known_switches(&self) -> PlatformResult<Vec<SwitchId>>;

    /// Removes every rule owned by the application. Returns how many were removed.
    async fn remove_all_rules_owned_by(&self, app_id: &AppId) -> PlatformResult<usize>;
}
