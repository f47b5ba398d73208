//! In-memory bookkeeping for one open log channel

use std::fs::File;

/// One rotated log file the channel still tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoricalLogEntry {
    /// Creation time of the file, epoch seconds
    pub ctime: i64,
    /// Size in bytes at rotation time, before any compression
    pub size: u64,
    /// The on-disk file carries a `.gz` suffix
    pub compressed: bool,
}

/// Lifecycle of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Closed,
    Opening,
    Open,
    Writing,
    Rotating,
    /// Open failed on a non-fatal channel; writes are silently dropped
    Degraded,
    /// Open or write failed on the error channel; the server must exit
    Fatal,
}

/// Mutable state of one channel, exclusively owned behind its lock
pub struct ChannelState {
    /// Active file handle, None while closed or degraded
    pub file: Option<File>,
    /// Creation time of the active file, epoch seconds
    pub ctime: i64,
    /// Next wall-clock sync instant, epoch seconds (0 when sync disabled)
    pub sync_clock: i64,
    /// Historical files, newest first
    pub chain: Vec<HistoricalLogEntry>,
    /// Number of log files tracked, the active file included
    pub num_logs: usize,
    /// Size of the active file in bytes
    pub cur_size: u64,
    /// A title line must be written before the next payload
    pub need_title: bool,
    pub status: ChannelStatus,
}

impl ChannelState {
    pub fn new() -> Self {
        Self {
            file: None,
            ctime: 0,
            sync_clock: 0,
            chain: Vec::new(),
            num_logs: 1,
            cur_size: 0,
            need_title: false,
            status: ChannelStatus::Closed,
        }
    }

    /// Total bytes held by historical files
    pub fn historical_size(&self) -> u64 {
        self.chain.iter().map(|e| e.size).sum()
    }

    /// Index of the globally oldest historical entry by creation time
    pub fn oldest_index(&self) -> Option<usize> {
        self.chain
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.ctime)
            .map(|(i, _)| i)
    }

    /// The tracked count must match the chain; drift signals a corrupt
    /// ledger and the caller must self-heal.
    pub fn chain_consistent(&self) -> bool {
        self.chain.len() + 1 == self.num_logs
    }
}

impl Default for ChannelState {
    fn default() -> Self {
        Self::new()
    }
}
