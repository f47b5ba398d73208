//! Process-wide logging entry point
//!
//! One owned [`LogChannel`] per kind, explicit init/shutdown, no ambient
//! globals. The protocol and JSON-formatting layers only ever see
//! `write_line`, `flush`, and `reconfigure`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use dirlog_core::{now_epoch, LogChannelConfig, LogKind, Result};

use crate::channel::LogChannel;
use crate::emergency::EmergencyWriter;
use crate::retention::{DiskProbe, StatvfsProbe};

/// Configuration batch for all three channels
#[derive(Debug, Clone)]
pub struct LogManagerConfig {
    pub access: LogChannelConfig,
    pub error: LogChannelConfig,
    pub audit: LogChannelConfig,
    /// Identity line written at the top of fresh log files
    pub banner: Option<String>,
}

impl LogManagerConfig {
    /// Stock configs with the conventional file names under `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            access: LogChannelConfig::new(LogKind::Access, dir.join("access")),
            error: LogChannelConfig::new(LogKind::Error, dir.join("errors")),
            audit: LogChannelConfig::new(LogKind::Audit, dir.join("audit")),
            banner: None,
        }
    }

    /// Validate the whole batch before anything is applied
    pub fn validate(&self) -> Result<()> {
        self.access.validate()?;
        self.error.validate()?;
        self.audit.validate()?;
        Ok(())
    }
}

pub struct LogManager {
    access: LogChannel,
    error: LogChannel,
    audit: LogChannel,
    fatal: Arc<AtomicBool>,
}

impl LogManager {
    pub fn new(cfg: LogManagerConfig) -> Result<Self> {
        Self::with_probe(cfg, Arc::new(StatvfsProbe))
    }

    /// Construction with an injected filesystem probe, for tests
    pub fn with_probe(cfg: LogManagerConfig, probe: Arc<dyn DiskProbe>) -> Result<Self> {
        cfg.validate()?;

        let fatal = Arc::new(AtomicBool::new(false));
        let emergency = Arc::new(EmergencyWriter::new(cfg.error.path.clone(), cfg.error.mode));
        let banner = cfg.banner;

        Ok(Self {
            access: LogChannel::new(
                cfg.access,
                probe.clone(),
                emergency.clone(),
                fatal.clone(),
                banner.clone(),
            )?,
            error: LogChannel::new(
                cfg.error,
                probe.clone(),
                emergency.clone(),
                fatal.clone(),
                banner.clone(),
            )?,
            audit: LogChannel::new(cfg.audit, probe, emergency, fatal.clone(), banner)?,
            fatal,
        })
    }

    /// Open every enabled channel. An error-channel failure is fatal and
    /// propagates; access/audit failures degrade those channels and init
    /// continues.
    pub fn init(&self) -> Result<()> {
        let now = now_epoch();
        self.error.open(now)?;
        for channel in [&self.access, &self.audit] {
            if let Err(err) = channel.open(now) {
                warn!(kind = %channel.kind(), %err, "channel degraded at startup");
            }
        }
        Ok(())
    }

    /// Write one record to a channel. Disabled or degraded channels drop
    /// the record silently.
    pub fn write_line(&self, kind: LogKind, bytes: &[u8]) -> Result<()> {
        self.channel(kind).write_line(bytes, now_epoch())
    }

    /// Flush a channel's buffered data to disk
    pub fn flush(&self, kind: LogKind) -> Result<()> {
        self.channel(kind).flush(true)
    }

    /// Flush every channel, e.g. from a periodic flush thread
    pub fn flush_all(&self) {
        for kind in [LogKind::Access, LogKind::Error, LogKind::Audit] {
            if let Err(err) = self.flush(kind) {
                warn!(%kind, %err, "flush failed");
            }
        }
    }

    /// Replace one channel's configuration, validate-then-apply
    pub fn reconfigure(&self, kind: LogKind, cfg: LogChannelConfig) -> Result<()> {
        self.channel(kind).reconfigure(cfg, now_epoch())
    }

    /// Paths of a channel's historical files, newest first
    pub fn historical_files(&self, kind: LogKind) -> Vec<PathBuf> {
        self.channel(kind).historical_files()
    }

    /// Delete every rotated file on every channel. Called by the disk
    /// monitor as a last resort to keep the server running.
    pub fn delete_rotated_logs(&self) {
        for kind in [LogKind::Access, LogKind::Error, LogKind::Audit] {
            self.channel(kind).delete_rotated();
        }
    }

    /// True once an unrecoverable error-channel failure occurred; the
    /// embedding server polls this and exits.
    pub fn fatal_requested(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }

    /// Flush and close every channel
    pub fn shutdown(&self) {
        self.flush_all();
        for kind in [LogKind::Access, LogKind::Error, LogKind::Audit] {
            self.channel(kind).close();
        }
    }

    pub fn channel(&self, kind: LogKind) -> &LogChannel {
        match kind {
            LogKind::Access => &self.access,
            LogKind::Error => &self.error,
            LogKind::Audit => &self.audit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> LogManager {
        let mut cfg = LogManagerConfig::in_dir(dir.path());
        cfg.access.exp_time = -1;
        cfg.error.exp_time = -1;
        cfg.audit.exp_time = -1;
        let mgr = LogManager::new(cfg).unwrap();
        mgr.init().unwrap();
        mgr
    }

    #[test]
    fn test_write_to_each_channel() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);

        mgr.write_line(LogKind::Access, b"conn=1 op=0 SRCH").unwrap();
        mgr.write_line(LogKind::Error, b"WARN something odd").unwrap();
        mgr.write_line(LogKind::Audit, b"MOD cn=config").unwrap();
        mgr.shutdown();

        let access = std::fs::read_to_string(dir.path().join("access")).unwrap();
        assert!(access.contains("conn=1 op=0 SRCH"));
        let errors = std::fs::read_to_string(dir.path().join("errors")).unwrap();
        assert!(errors.contains("WARN something odd"));
        let audit = std::fs::read_to_string(dir.path().join("audit")).unwrap();
        assert!(audit.contains("MOD cn=config"));
        assert!(!mgr.fatal_requested());
    }

    #[test]
    fn test_access_writes_are_buffered_until_flush() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);

        mgr.write_line(LogKind::Access, b"buffered line").unwrap();
        let on_disk = std::fs::read_to_string(dir.path().join("access")).unwrap();
        assert!(!on_disk.contains("buffered line"));

        mgr.flush(LogKind::Access).unwrap();
        let on_disk = std::fs::read_to_string(dir.path().join("access")).unwrap();
        assert!(on_disk.contains("buffered line"));
    }

    #[test]
    fn test_buffering_disabled_writes_through() {
        let dir = TempDir::new().unwrap();
        let mut cfg = LogManagerConfig::in_dir(dir.path());
        cfg.access.buffering = false;
        cfg.access.exp_time = -1;
        let mgr = LogManager::new(cfg).unwrap();
        mgr.init().unwrap();

        mgr.write_line(LogKind::Access, b"unbuffered line").unwrap();
        let on_disk = std::fs::read_to_string(dir.path().join("access")).unwrap();
        assert!(on_disk.contains("unbuffered line"));
    }

    #[test]
    fn test_banner_written_on_fresh_file() {
        let dir = TempDir::new().unwrap();
        let mut cfg = LogManagerConfig::in_dir(dir.path());
        cfg.banner = Some("dirsrv-Directory/0.1.0 B2026.001".to_string());
        cfg.audit.exp_time = -1;
        let mgr = LogManager::new(cfg).unwrap();
        mgr.init().unwrap();

        mgr.write_line(LogKind::Audit, b"first entry").unwrap();
        let audit = std::fs::read_to_string(dir.path().join("audit")).unwrap();
        assert!(audit.starts_with("\tdirsrv-Directory/0.1.0 B2026.001\n"));
        assert!(audit.contains("first entry"));
    }

    #[test]
    fn test_batch_validation_rejects_everything() {
        let dir = TempDir::new().unwrap();
        let mut cfg = LogManagerConfig::in_dir(dir.path());
        cfg.audit.max_log_size = 2048;
        cfg.audit.max_disk_space = 1024;
        assert!(LogManager::new(cfg).is_err());
    }

    #[test]
    fn test_delete_rotated_logs_clears_history() {
        let dir = TempDir::new().unwrap();
        let mut cfg = LogManagerConfig::in_dir(dir.path());
        cfg.audit.max_log_size = 32;
        cfg.audit.max_num_logs = 5;
        cfg.audit.exp_time = -1;
        let mgr = LogManager::new(cfg.clone()).unwrap();
        mgr.init().unwrap();

        mgr.write_line(LogKind::Audit, &[b'z'; 40]).unwrap();
        mgr.write_line(LogKind::Audit, &[b'z'; 40]).unwrap();
        assert!(!mgr.historical_files(LogKind::Audit).is_empty());
        let rotated = mgr.historical_files(LogKind::Audit);

        mgr.delete_rotated_logs();
        assert!(mgr.historical_files(LogKind::Audit).is_empty());
        for path in rotated {
            assert!(!path.exists());
        }
        // The ledger no longer lists the deleted files, so a restart
        // recovers an empty chain without a self-heal pass.
        let ledger_text =
            std::fs::read_to_string(cfg.audit.ledger_path()).unwrap();
        assert!(!ledger_text.contains("Previous Log File:"));
        mgr.shutdown();

        let mgr = LogManager::new(cfg).unwrap();
        mgr.init().unwrap();
        assert!(mgr.historical_files(LogKind::Audit).is_empty());
    }
}
