//! Historical-file retention: count, disk-space, free-space, and age limits

use std::fs;
use std::path::{Path, PathBuf};

use dirlog_core::{format_short, LogChannelConfig};
use tracing::{debug, warn};

use crate::state::{ChannelState, ChannelStatus, HistoricalLogEntry};

/// Read-only filesystem probe, injectable so tests can fake a full disk
pub trait DiskProbe: Send + Sync {
    /// Free bytes available on the filesystem holding `path`, or None if
    /// the probe itself failed.
    fn free_space(&self, path: &Path) -> Option<u64>;
}

/// Production probe backed by statvfs
pub struct StatvfsProbe;

impl DiskProbe for StatvfsProbe {
    #[cfg(unix)]
    fn free_space(&self, path: &Path) -> Option<u64> {
        let dir = if path.is_dir() {
            path
        } else {
            path.parent().unwrap_or(path)
        };
        match nix::sys::statvfs::statvfs(dir) {
            Ok(vfs) => Some(vfs.blocks_available() as u64 * vfs.fragment_size() as u64),
            Err(err) => {
                warn!(path = %dir.display(), %err, "unable to probe free space");
                None
            }
        }
    }

    #[cfg(not(unix))]
    fn free_space(&self, _path: &Path) -> Option<u64> {
        None
    }
}

/// Decides which historical file, if any, must go to satisfy the channel's
/// limits, and deletes it.
pub struct RetentionEnforcer<'a> {
    cfg: &'a LogChannelConfig,
    probe: &'a dyn DiskProbe,
}

impl<'a> RetentionEnforcer<'a> {
    pub fn new(cfg: &'a LogChannelConfig, probe: &'a dyn DiskProbe) -> Self {
        Self { cfg, probe }
    }

    /// Evict at most one historical file if any constraint is violated.
    ///
    /// Checked in fixed priority: count, total disk space, filesystem free
    /// space, then per-entry expiration. Returns true if an entry was
    /// evicted, so callers loop until no constraint is violated. Deletion
    /// is best-effort; the in-memory entry is unlinked regardless.
    pub fn evict_one_if_needed(&self, state: &mut ChannelState, now: i64) -> bool {
        // With one log "eviction" means deleting the active file outright,
        // the only way to reclaim space when rotation is disabled.
        if self.cfg.max_num_logs == 1 {
            self.delete_active(state);
            return false;
        }

        let mut victim: Option<usize> = None;
        let reason;

        if state.num_logs + 1 > self.cfg.max_num_logs {
            reason = "exceeded max number of logs allowed";
        } else if self.cfg.max_disk_space > 0
            && state.historical_size() + state.cur_size >= self.cfg.max_disk_space
        {
            reason = "exceeded maximum log disk space";
        } else if self.cfg.min_free_space > 0 && self.free_space_low() {
            reason = "not enough free disk space";
        } else if let Some(idx) = self.expired_index(state, now) {
            victim = Some(idx);
            reason = "file is older than the log expiration time";
        } else {
            return false;
        }

        let idx = match victim.or_else(|| state.oldest_index()) {
            Some(idx) => idx,
            // Nothing rotated yet; nothing to evict.
            None => return false,
        };

        let entry = state.chain.remove(idx);
        state.num_logs = state.num_logs.saturating_sub(1);
        remove_historical_file(self.cfg, &entry, reason);
        true
    }

    fn free_space_low(&self) -> bool {
        match self.probe.free_space(&self.cfg.path) {
            Some(free) => free < self.cfg.min_free_space,
            // Probe failure: assume there is enough space rather than
            // deleting logs on bad information.
            None => false,
        }
    }

    fn expired_index(&self, state: &ChannelState, now: i64) -> Option<usize> {
        let exp_secs = self.cfg.exp_secs();
        if exp_secs <= 0 {
            return None;
        }
        state
            .chain
            .iter()
            .position(|e| now - e.ctime > exp_secs)
    }

    fn delete_active(&self, state: &mut ChannelState) {
        state.file = None;
        state.cur_size = 0;
        state.status = ChannelStatus::Closed;
        for path in [self.cfg.path.clone(), self.cfg.ledger_path()] {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(kind = %self.cfg.kind, path = %path.display(), "deleted single-log file");
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!(kind = %self.cfg.kind, path = %path.display(), "file already removed");
                }
                Err(err) => {
                    warn!(kind = %self.cfg.kind, path = %path.display(), %err, "unable to remove file");
                }
            }
        }
    }
}

/// Name of the rotated file created for an entry with this creation time
pub fn historical_path(base: &Path, ctime: i64) -> PathBuf {
    let mut s = base.as_os_str().to_owned();
    s.push(".");
    s.push(format_short(ctime));
    PathBuf::from(s)
}

/// `<path>.gz`, the name a rotated file carries after compression
pub fn compressed_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".gz");
    PathBuf::from(s)
}

/// Path of the on-disk file behind a historical entry
pub fn entry_path(base: &Path, entry: &HistoricalLogEntry) -> PathBuf {
    let plain = historical_path(base, entry.ctime);
    if entry.compressed {
        compressed_path(&plain)
    } else {
        plain
    }
}

/// Delete the file behind `entry`, best-effort. The compressed flag can
/// lag reality after a self-heal, so the other name form is tried when the
/// first one is absent.
pub(crate) fn remove_historical_file(
    cfg: &LogChannelConfig,
    entry: &HistoricalLogEntry,
    reason: &str,
) {
    let plain = historical_path(&cfg.path, entry.ctime);
    let (primary, fallback) = if entry.compressed {
        (compressed_path(&plain), plain.clone())
    } else {
        (plain.clone(), compressed_path(&plain))
    };
    match fs::remove_file(&primary) {
        Ok(()) => {
            debug!(kind = %cfg.kind, path = %primary.display(), reason, "removed rotated log");
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => match fs::remove_file(&fallback) {
            Ok(()) => {
                debug!(kind = %cfg.kind, path = %fallback.display(), reason, "removed rotated log");
            }
            Err(_) => {
                debug!(kind = %cfg.kind, path = %primary.display(), "rotated log already removed");
            }
        },
        Err(err) => {
            warn!(kind = %cfg.kind, path = %primary.display(), %err, "unable to remove rotated log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::HistoricalLogEntry;
    use dirlog_core::{now_epoch, LogKind};
    use tempfile::TempDir;

    struct FakeProbe(Option<u64>);

    impl DiskProbe for FakeProbe {
        fn free_space(&self, _path: &Path) -> Option<u64> {
            self.0
        }
    }

    fn setup(dir: &TempDir) -> LogChannelConfig {
        let mut cfg = LogChannelConfig::new(LogKind::Access, dir.path().join("access"));
        cfg.exp_time = -1;
        cfg
    }

    fn entry_on_disk(cfg: &LogChannelConfig, ctime: i64, size: u64) -> HistoricalLogEntry {
        let path = historical_path(&cfg.path, ctime);
        fs::write(&path, vec![b'x'; size as usize]).unwrap();
        HistoricalLogEntry { ctime, size, compressed: false }
    }

    #[test]
    fn test_no_violation_no_eviction() {
        let dir = TempDir::new().unwrap();
        let cfg = setup(&dir);
        let probe = FakeProbe(Some(u64::MAX));
        let mut state = ChannelState::new();
        state.chain.push(entry_on_disk(&cfg, now_epoch() - 60, 10));
        state.num_logs = 2;

        let enforcer = RetentionEnforcer::new(&cfg, &probe);
        assert!(!enforcer.evict_one_if_needed(&mut state, now_epoch()));
        assert_eq!(state.chain.len(), 1);
        assert!(historical_path(&cfg.path, state.chain[0].ctime).exists());
    }

    #[test]
    fn test_count_limit_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let mut cfg = setup(&dir);
        cfg.max_num_logs = 2;
        let probe = FakeProbe(Some(u64::MAX));
        let now = now_epoch();
        let old = entry_on_disk(&cfg, now - 7200, 10);
        let newer = entry_on_disk(&cfg, now - 3600, 10);
        let mut state = ChannelState::new();
        state.chain = vec![newer, old];
        state.num_logs = 3;

        let enforcer = RetentionEnforcer::new(&cfg, &probe);
        assert!(enforcer.evict_one_if_needed(&mut state, now));
        assert_eq!(state.chain, vec![newer]);
        assert!(!historical_path(&cfg.path, old.ctime).exists());
        assert!(historical_path(&cfg.path, newer.ctime).exists());
    }

    #[test]
    fn test_low_free_space_evicts() {
        let dir = TempDir::new().unwrap();
        let mut cfg = setup(&dir);
        cfg.min_free_space = 100 * 1024 * 1024;
        let probe = FakeProbe(Some(50 * 1024 * 1024));
        let now = now_epoch();
        let entry = entry_on_disk(&cfg, now - 3600, 10);
        let mut state = ChannelState::new();
        state.chain = vec![entry];
        state.num_logs = 2;

        let enforcer = RetentionEnforcer::new(&cfg, &probe);
        assert!(enforcer.evict_one_if_needed(&mut state, now));
        assert!(state.chain.is_empty());
    }

    #[test]
    fn test_probe_failure_is_not_low_space() {
        let dir = TempDir::new().unwrap();
        let mut cfg = setup(&dir);
        cfg.min_free_space = 100;
        let probe = FakeProbe(None);
        let mut state = ChannelState::new();
        state.chain.push(entry_on_disk(&cfg, now_epoch(), 10));
        state.num_logs = 2;

        let enforcer = RetentionEnforcer::new(&cfg, &probe);
        assert!(!enforcer.evict_one_if_needed(&mut state, now_epoch()));
    }

    #[test]
    fn test_expiration_targets_the_expired_entry() {
        let dir = TempDir::new().unwrap();
        let mut cfg = setup(&dir);
        cfg.exp_time = 1;
        cfg.exp_unit = dirlog_core::TimeUnit::Hour;
        let probe = FakeProbe(Some(u64::MAX));
        let now = now_epoch();
        let fresh = entry_on_disk(&cfg, now - 60, 10);
        let stale = entry_on_disk(&cfg, now - 7200, 10);
        let mut state = ChannelState::new();
        state.chain = vec![fresh, stale];
        state.num_logs = 3;

        let enforcer = RetentionEnforcer::new(&cfg, &probe);
        assert!(enforcer.evict_one_if_needed(&mut state, now));
        assert_eq!(state.chain, vec![fresh]);
        assert!(!historical_path(&cfg.path, stale.ctime).exists());
    }

    #[test]
    fn test_missing_victim_file_still_unlinks_entry() {
        let dir = TempDir::new().unwrap();
        let mut cfg = setup(&dir);
        cfg.max_num_logs = 2;
        let probe = FakeProbe(Some(u64::MAX));
        let now = now_epoch();
        let mut state = ChannelState::new();
        // Entry never written to disk.
        state.chain = vec![HistoricalLogEntry { ctime: now - 60, size: 10, compressed: false }];
        state.num_logs = 3;

        let enforcer = RetentionEnforcer::new(&cfg, &probe);
        assert!(enforcer.evict_one_if_needed(&mut state, now));
        assert!(state.chain.is_empty());
    }

    #[test]
    fn test_compressed_entry_removed_by_gz_name() {
        let dir = TempDir::new().unwrap();
        let mut cfg = setup(&dir);
        cfg.max_num_logs = 2;
        let probe = FakeProbe(Some(u64::MAX));
        let now = now_epoch();
        let gz = compressed_path(&historical_path(&cfg.path, now - 60));
        fs::write(&gz, b"gz payload").unwrap();
        let mut state = ChannelState::new();
        state.chain = vec![HistoricalLogEntry { ctime: now - 60, size: 10, compressed: true }];
        state.num_logs = 2;

        let enforcer = RetentionEnforcer::new(&cfg, &probe);
        assert!(enforcer.evict_one_if_needed(&mut state, now));
        assert!(state.chain.is_empty());
        assert!(!gz.exists());
    }

    #[test]
    fn test_single_log_deletes_active_and_ledger() {
        let dir = TempDir::new().unwrap();
        let mut cfg = setup(&dir);
        cfg.max_num_logs = 1;
        let probe = FakeProbe(Some(u64::MAX));
        fs::write(&cfg.path, b"data").unwrap();
        fs::write(cfg.ledger_path(), b"LOGINFO").unwrap();
        let mut state = ChannelState::new();
        state.file = Some(fs::File::open(&cfg.path).unwrap());
        state.cur_size = 4;

        let enforcer = RetentionEnforcer::new(&cfg, &probe);
        assert!(!enforcer.evict_one_if_needed(&mut state, now_epoch()));
        assert!(!cfg.path.exists());
        assert!(!cfg.ledger_path().exists());
        assert!(state.file.is_none());
        assert_eq!(state.cur_size, 0);
    }
}
