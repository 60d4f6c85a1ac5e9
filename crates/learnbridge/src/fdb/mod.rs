//! Learning table (per-switch forwarding database).
//!
//! Maps each switch to the port on which every source MAC was last seen.
//! Entries are overwritten on every observed frame. With aging enabled,
//! an entry older than the aging time is treated as unknown.

mod table;
mod types;

pub use table::LearningTable;
pub use types::{FdbEntry, FdbStats};
