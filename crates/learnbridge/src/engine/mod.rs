//! Learning and forwarding engine.
//!
//! [`LearningBridge`] owns the learning table, admission index, connection
//! tracker and stats log, and turns inbound frames and rule removals into
//! updates of that state plus platform calls. Handlers take `&self`, so one
//! bridge behind an `Arc` serves any number of concurrent callers.

mod bridge;
mod types;

pub use bridge::LearningBridge;
pub use types::{BridgeEvent, DispatchOutcome, Disposition, StopSummary};
