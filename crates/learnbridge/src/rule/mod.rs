//! Forwarding rules and their installation.
//!
//! [`RuleInstaller`] turns a forwarding decision into a [`ForwardingRule`],
//! submits it to the platform, keeps the admission index in step and sends
//! the triggering frame on its way.

mod installer;
mod types;

pub use installer::{ForwardingDecision, InstallOutcome, RuleInstaller};
pub use types::{ForwardingRule, MatchPredicate, RuleTier};
