//! Append-only connection stats log.
//!
//! One line per finalized connection:
//!
//! ```text
//! <timestamp> | <switch> | <srcMac> | <dstMac> | <srcIP>:<srcPort> -> <dstIP>:<dstPort> | <durationMs> | <bytes> | <packets>
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

use crate::conntrack::{ConnectionKey, ConnectionRecord};
use crate::error::{BridgeError, Result};

/// Timestamp format of the first column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Renders one log line (without the trailing newline).
pub fn format_line(
    logged_at: DateTime<Utc>,
    key: &ConnectionKey,
    record: &ConnectionRecord,
    bytes: u64,
    packets: u64,
) -> String {
    format!(
        "{} | {} | {} | {} | {} | {} | {} | {}",
        logged_at.format(TIMESTAMP_FORMAT),
        record.switch,
        record.src_mac,
        record.dst_mac,
        key,
        record.duration_ms(logged_at),
        bytes,
        packets
    )
}

/// Writer for the connection stats log.
///
/// The file is opened in append mode on first write and stays open. Writes
/// are serialised so lines never interleave.
#[derive(Debug)]
pub struct StatsLogger {
    path: PathBuf,
    file: Mutex<Option<File>>,
    lines_written: AtomicU64,
    write_errors: AtomicU64,
}

impl StatsLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
            lines_written: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line to the log.
    pub fn append(&self, line: &str) -> Result<()> {
        let mut guard = self.file.lock();
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(BridgeError::StatsLog)?;
            *guard = Some(file);
        }

        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');

        let written = match guard.as_mut() {
            Some(file) => file.write_all(buf.as_bytes()).and_then(|_| file.flush()),
            None => Ok(()),
        };
        if let Err(e) = written {
            // Reopen on the next write.
            *guard = None;
            return Err(BridgeError::StatsLog(e));
        }
        self.lines_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Logs a finalized connection. Failures are reported and swallowed.
    pub fn log_connection(
        &self,
        logged_at: DateTime<Utc>,
        key: &ConnectionKey,
        record: &ConnectionRecord,
        bytes: u64,
        packets: u64,
    ) -> bool {
        let line = format_line(logged_at, key, record, bytes, packets);
        match self.append(&line) {
            Ok(()) => {
                debug!(path = %self.path.display(), %line, "Logged connection stats");
                true
            }
            Err(e) => {
                self.write_errors.fetch_add(1, Ordering::Relaxed);
                error!(path = %self.path.display(), error = %e, "Failed to write connection stats");
                false
            }
        }
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }
}
