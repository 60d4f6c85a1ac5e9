//! Error types for the learning bridge.

use bridge_types::ParseError;
use thiserror::Error;

use crate::platform::PlatformError;

/// Errors raised inside the bridge engine.
///
/// None of these are fatal to the process. Event handlers log them and skip
/// the affected event.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Frame could not be decoded as Ethernet
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// A call into the control-plane platform failed
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Identifier or address parse failure
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Stats log could not be written
    #[error("Stats log error: {0}")]
    StatsLog(#[source] std::io::Error),

    /// Event trace could not be read or decoded
    #[error("Trace error: {0}")]
    Trace(String),

    /// Engine used before `start()` or after `stop()`
    #[error("Bridge is not running")]
    NotRunning,
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
