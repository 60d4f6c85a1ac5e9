//! Engine event and outcome types.

use serde::Serialize;

use crate::lifecycle::ReconcileOutcome;
use crate::platform::{InboundFrame, RuleEvent, RuleId};

/// An event delivered to the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    InboundFrame(InboundFrame),
    RuleRemoved(RuleEvent),
}

/// What happened to an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Already handled by another application.
    Skipped,
    /// Unparseable, or discarded after a failed installation.
    Dropped,
    /// Source is at its fan-out limit.
    Blocked,
    /// Destination unknown or a group address.
    Flooded,
    /// Sent out the learned port. `rule_id` is `None` when installation failed.
    Forwarded { rule_id: Option<RuleId> },
}

/// Result of [`LearningBridge::dispatch`](super::LearningBridge::dispatch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Frame(Disposition),
    Rule(ReconcileOutcome),
}

/// What `stop()` cleaned up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StopSummary {
    pub connections_flushed: usize,
    pub rules_removed: usize,
}
