//! Connection stats log and engine counters.

mod counters;
mod logger;

pub use counters::{BridgeStats, BridgeStatsSnapshot};
pub use logger::{format_line, StatsLogger, TIMESTAMP_FORMAT};
