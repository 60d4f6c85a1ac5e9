//! Reactive learning bridge controller.
//!
//! Observes frames punted by switches of a software-defined network, learns
//! which port reaches which host, installs forwarding rules so later traffic
//! stays in the data plane, caps how many distinct destinations a host may
//! reach at once, and records the lifetime and volume of TCP connections.
//!
//! The control plane itself sits behind the [`platform::Platform`] trait.

pub mod admission;
pub mod clock;
pub mod config;
pub mod conntrack;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod fdb;
pub mod lifecycle;
pub mod packet;
pub mod platform;
pub mod rule;
pub mod stats;

pub use admission::{AdmissionController, Reservation};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AdmissionMode, BridgeConfig, InstallFailurePolicy, DEFAULT_CONFIG_PATH};
pub use conntrack::{ConnectionKey, ConnectionRecord, ConnectionTracker};
pub use engine::{BridgeEvent, DispatchOutcome, Disposition, LearningBridge, StopSummary};
pub use error::{BridgeError, Result};
pub use fdb::LearningTable;
pub use lifecycle::ReconcileOutcome;
pub use platform::{MemoryPlatform, Platform, PlatformError};
pub use stats::{BridgeStatsSnapshot, StatsLogger};
