//! Per-channel logging configuration
//!
//! The bootstrap configuration loader lives outside this engine; it hands
//! us one validated [`LogChannelConfig`] per channel. Setters here follow
//! the validate-then-apply convention: a whole batch is checked first and
//! applied only if every record passes, so partial application never
//! occurs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::*;
use crate::error::{Error, Result};

/// The three independent log streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Access,
    Error,
    Audit,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Access => "access",
            LogKind::Error => "error",
            LogKind::Audit => "audit",
        }
    }
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Units for rotation and expiration intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl TimeUnit {
    /// Seconds per unit. A month is 31 days.
    pub fn secs(&self) -> i64 {
        match self {
            TimeUnit::Minute => 60,
            TimeUnit::Hour => 60 * 60,
            TimeUnit::Day => 24 * 60 * 60,
            TimeUnit::Week => 7 * 24 * 60 * 60,
            TimeUnit::Month => 31 * 24 * 60 * 60,
        }
    }

    /// Interval of `count` units in seconds, saturating on overflow.
    ///
    /// A non-positive count disables the interval (-1 is the conventional
    /// "never" value) and is returned as-is.
    pub fn interval_secs(&self, count: i64) -> i64 {
        if count <= 0 {
            return count;
        }
        count.checked_mul(self.secs()).unwrap_or(i64::MAX)
    }
}

/// Configuration for one log channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogChannelConfig {
    /// Which stream this channel carries
    pub kind: LogKind,
    /// Disabled channels drop writes silently
    pub enabled: bool,
    /// Path of the active log file
    pub path: PathBuf,
    /// Permission mode for newly created log files
    pub mode: u32,
    /// Maximum number of log files kept, the active file included.
    /// 1 disables rotation entirely: with nowhere to store a renamed
    /// predecessor, only outright deletion can reclaim space.
    pub max_num_logs: usize,
    /// Maximum size of one log file in bytes (0 = unlimited)
    pub max_log_size: u64,
    /// Rotation interval count (≤ 0 = never rotate by time)
    pub rotation_time: i64,
    /// Unit for `rotation_time`
    pub rotation_unit: TimeUnit,
    /// Rotate at a fixed wall-clock time instead of purely by elapsed time
    pub rotation_sync_enabled: bool,
    /// Target hour for sync-to-clock rotation (0-23)
    pub sync_hour: u32,
    /// Target minute for sync-to-clock rotation (0-59)
    pub sync_min: u32,
    /// Maximum total disk space for this channel in bytes (0 = unlimited)
    pub max_disk_space: u64,
    /// Minimum free space that must remain on the filesystem (0 = disabled)
    pub min_free_space: u64,
    /// Expiration interval count for historical files (≤ 0 = never expire)
    pub exp_time: i64,
    /// Unit for `exp_time`
    pub exp_unit: TimeUnit,
    /// Gzip rotated files; the historical name grows a `.gz` suffix
    pub compression: bool,
    /// Buffer writes through the in-memory arena (access channel only)
    pub buffering: bool,
}

impl LogChannelConfig {
    /// A config with the stock defaults for the given kind and path
    pub fn new(kind: LogKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            enabled: true,
            path: path.into(),
            mode: DEFAULT_LOG_MODE,
            max_num_logs: DEFAULT_MAX_NUM_LOGS,
            max_log_size: DEFAULT_MAX_LOG_SIZE,
            rotation_time: DEFAULT_ROTATION_TIME,
            rotation_unit: TimeUnit::Day,
            rotation_sync_enabled: false,
            sync_hour: DEFAULT_SYNC_HOUR,
            sync_min: DEFAULT_SYNC_MIN,
            max_disk_space: 0,
            min_free_space: 0,
            exp_time: DEFAULT_EXP_TIME,
            exp_unit: TimeUnit::Month,
            compression: false,
            buffering: kind == LogKind::Access,
        }
    }

    /// Rotation interval in seconds, saturated
    pub fn rotation_secs(&self) -> i64 {
        self.rotation_unit.interval_secs(self.rotation_time)
    }

    /// Expiration interval in seconds, saturated
    pub fn exp_secs(&self) -> i64 {
        self.exp_unit.interval_secs(self.exp_time)
    }

    /// Path of the rotation-ledger sidecar (`<path>.rotationinfo`)
    pub fn ledger_path(&self) -> PathBuf {
        let mut s = self.path.as_os_str().to_owned();
        s.push(".");
        s.push(ROTATION_INFO_SUFFIX);
        PathBuf::from(s)
    }

    /// Validate without applying. Called for the whole batch before any
    /// record takes effect.
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::config(format!(
                "{} log: path must not be empty",
                self.kind
            )));
        }
        if self.max_num_logs < 1 {
            return Err(Error::config(format!(
                "{} log: maxnumlogs must be at least 1",
                self.kind
            )));
        }
        if self.max_disk_space > 0 && self.max_disk_space < self.max_log_size {
            return Err(Error::config(format!(
                "{} log: maxdiskspace {} (bytes) is less than max log size {} (bytes)",
                self.kind, self.max_disk_space, self.max_log_size
            )));
        }
        if self.sync_hour > 23 {
            return Err(Error::config(format!(
                "{} log: rotation sync hour {} out of range 0-23",
                self.kind, self.sync_hour
            )));
        }
        if self.sync_min > 59 {
            return Err(Error::config(format!(
                "{} log: rotation sync minute {} out of range 0-59",
                self.kind, self.sync_min
            )));
        }
        Ok(())
    }
}
