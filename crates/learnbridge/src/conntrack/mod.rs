//! TCP connection tracking.
//!
//! A record is opened on the first SYN seen for a 6-tuple and closed when
//! the TCP-aware rule carrying that tuple is removed. Closed records leave
//! the map at the moment they are finalized.

mod tracker;
mod types;

pub use tracker::ConnectionTracker;
pub use types::{ConnectionKey, ConnectionRecord};
