//! Trace replay daemon.
//!
//! Drives a [`LearningBridge`](crate::engine::LearningBridge) over a
//! [`MemoryPlatform`](crate::platform::MemoryPlatform) from a JSON-lines
//! event trace. Frames fan out over a worker pool. Rule expiries act as
//! barriers: every frame read before them is processed first.

mod replay;
mod trace;

pub use replay::{ReplayDaemon, ReplayReport};
pub use trace::{TcpSpec, TraceEvent};
