//! One log channel: open, write, rotate, close
//!
//! Every channel owns its file descriptor, its historical chain, and its
//! ledger outright; all state mutation happens under the channel's write
//! lock. The access channel additionally fronts writes with the
//! [`WriteBuffer`], whose cursor lock is the access serialization point.

use std::borrow::Cow;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::RwLock;
use tracing::{debug, warn};

use dirlog_core::{now_epoch, Error, LogChannelConfig, LogKind, Result, LOG_BUFFER_SIZE};

use crate::buffer::WriteBuffer;
use crate::emergency::EmergencyWriter;
use crate::ledger::{LedgerOutcome, RotationLedger};
use crate::policy::{self, RotationCheck};
use crate::retention::{
    compressed_path, entry_path, historical_path, remove_historical_file, DiskProbe,
    RetentionEnforcer,
};
use crate::state::{ChannelState, ChannelStatus, HistoricalLogEntry};

struct ChannelInner {
    cfg: LogChannelConfig,
    state: ChannelState,
}

pub struct LogChannel {
    kind: LogKind,
    inner: RwLock<ChannelInner>,
    /// Present on the access channel only
    buffer: Option<WriteBuffer>,
    banner: Option<String>,
    probe: Arc<dyn DiskProbe>,
    emergency: Arc<EmergencyWriter>,
    fatal: Arc<AtomicBool>,
}

impl LogChannel {
    pub fn new(
        cfg: LogChannelConfig,
        probe: Arc<dyn DiskProbe>,
        emergency: Arc<EmergencyWriter>,
        fatal: Arc<AtomicBool>,
        banner: Option<String>,
    ) -> Result<Self> {
        cfg.validate()?;
        let kind = cfg.kind;
        let buffer = (kind == LogKind::Access).then(|| WriteBuffer::new(LOG_BUFFER_SIZE));
        Ok(Self {
            kind,
            inner: RwLock::new(ChannelInner {
                cfg,
                state: ChannelState::new(),
            }),
            buffer,
            banner,
            probe,
            emergency,
            fatal,
        })
    }

    pub fn kind(&self) -> LogKind {
        self.kind
    }

    pub fn status(&self) -> ChannelStatus {
        self.inner.read().state.status
    }

    pub fn config(&self) -> LogChannelConfig {
        self.inner.read().cfg.clone()
    }

    /// Open the channel at startup, recovering the historical chain from
    /// the ledger. A failure is fatal for the error channel and degrades
    /// the others to disabled.
    pub fn open(&self, now: i64) -> Result<()> {
        let mut inner = self.inner.write();
        self.open_locked(&mut inner, now)
    }

    fn open_locked(&self, inner: &mut ChannelInner, now: i64) -> Result<()> {
        let ChannelInner { cfg, state } = inner;
        if !cfg.enabled {
            state.status = ChannelStatus::Closed;
            return Ok(());
        }
        state.status = ChannelStatus::Opening;

        let ledger = RotationLedger::for_config(cfg);
        let outcome = ledger.load(cfg, state, now);

        let file = match open_active(cfg) {
            Ok(file) => file,
            Err(err) => return self.open_failed(state, err),
        };
        state.cur_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        state.file = Some(file);

        if outcome == LedgerOutcome::New {
            state.need_title = self.banner.is_some();
            if let Err(err) = ledger.rewrite(state, cfg.mode) {
                warn!(kind = %self.kind, %err, "unable to write rotation ledger");
            }
        }

        state.sync_clock = if policy::sync_applies(cfg) {
            let mut clock = policy::next_sync_clock(now, cfg.sync_hour, cfg.sync_min);
            let interval = cfg.rotation_secs();
            // A rotation missed while the process was down must fire on
            // the first write, not a full interval later.
            if outcome == LedgerOutcome::Reopened
                && interval > 0
                && state.ctime < clock - interval
            {
                clock -= interval;
            }
            clock
        } else {
            0
        };

        state.status = ChannelStatus::Open;
        debug!(kind = %self.kind, path = %cfg.path.display(), num_logs = state.num_logs, "log channel open");
        Ok(())
    }

    fn open_failed(&self, state: &mut ChannelState, err: Error) -> Result<()> {
        if self.kind == LogKind::Error {
            state.status = ChannelStatus::Fatal;
            self.fatal.store(true, Ordering::Release);
            self.emergency
                .emit(&format!("unable to open the error log: {}", err));
        } else {
            state.status = ChannelStatus::Degraded;
            warn!(kind = %self.kind, %err, "log channel disabled: open failed, writes will be dropped");
        }
        Err(err)
    }

    /// Write one record. A record without a trailing newline gets one, so
    /// a flush boundary can never split it mid-line.
    pub fn write_line(&self, bytes: &[u8], now: i64) -> Result<()> {
        {
            let inner = self.inner.read();
            if !inner.cfg.enabled
                || matches!(
                    inner.state.status,
                    ChannelStatus::Degraded | ChannelStatus::Fatal
                )
            {
                return Ok(());
            }
        }

        let record: Cow<'_, [u8]> = if bytes.ends_with(b"\n") {
            Cow::Borrowed(bytes)
        } else {
            let mut owned = Vec::with_capacity(bytes.len() + 1);
            owned.extend_from_slice(bytes);
            owned.push(b'\n');
            Cow::Owned(owned)
        };

        match &self.buffer {
            Some(buffer) => buffer.append(self, &record, now),
            None => self.write_direct(&record, now),
        }
    }

    /// Unbuffered write: rotation check, maybe rotate, then write.
    pub(crate) fn write_direct(&self, bytes: &[u8], now: i64) -> Result<()> {
        let mut inner = self.inner.write();
        self.write_locked(&mut inner, bytes, now, false)
    }

    /// Sink for the write buffer. Runs the exact same rotation and
    /// retention steps as the direct path; a rotation may occur mid-flush.
    pub(crate) fn flush_arena(&self, bytes: &[u8], sync_now: bool) -> Result<()> {
        let mut inner = self.inner.write();
        self.write_locked(&mut inner, bytes, now_epoch(), sync_now)
    }

    fn write_locked(
        &self,
        inner: &mut ChannelInner,
        bytes: &[u8],
        now: i64,
        sync_now: bool,
    ) -> Result<()> {
        if let RotationCheck::Rotate(reason) = policy::check(&inner.cfg, &inner.state, now) {
            debug!(kind = %self.kind, ?reason, "rotating log");
            if let Err(err) = self.rotate_locked(inner, now) {
                return Err(self.escalate(&mut inner.state, err));
            }
        }

        let ChannelInner { cfg, state } = inner;
        let Some(file) = state.file.as_mut() else {
            // Single-log retention can delete the active file outright.
            return Ok(());
        };

        state.status = ChannelStatus::Writing;
        if state.need_title {
            if let Some(banner) = &self.banner {
                let title = format!("\t{}\n", banner);
                if file.write_all(title.as_bytes()).is_ok() {
                    state.cur_size += title.len() as u64;
                }
            }
            state.need_title = false;
        }

        match file.write_all(bytes) {
            Ok(()) => {
                if sync_now {
                    let _ = file.sync_data();
                }
                state.cur_size += bytes.len() as u64;
                state.status = ChannelStatus::Open;
                Ok(())
            }
            Err(err) => {
                let err = Error::write(format!(
                    "cannot write to the {} log ({}): {}",
                    cfg.kind,
                    cfg.path.display(),
                    err
                ));
                Err(self.escalate(state, err))
            }
        }
    }

    /// Rotate under the channel's write lock: snapshot, enforce retention,
    /// close, rename, reopen, rewrite the ledger, recompute the sync
    /// target.
    fn rotate_locked(&self, inner: &mut ChannelInner, now: i64) -> Result<()> {
        let ChannelInner { cfg, state } = inner;
        state.status = ChannelStatus::Rotating;
        let ledger = RotationLedger::for_config(cfg);

        if state.file.is_some() {
            let f_size = state
                .file
                .as_ref()
                .and_then(|f| f.metadata().ok())
                .map(|m| m.len())
                .unwrap_or(cfg.max_log_size);

            let enforcer = RetentionEnforcer::new(cfg, self.probe.as_ref());
            while enforcer.evict_one_if_needed(state, now) {}

            // Close before rename; single-log eviction may have closed it
            // for us.
            drop(state.file.take());

            if cfg.max_num_logs > 1 {
                let dest = historical_path(&cfg.path, state.ctime);
                // Unix rename silently replaces an existing destination. A
                // second rotation within the same second must not overwrite
                // the file rotated moments ago; the collision is tolerated
                // and logging continues into the old name until the clock
                // moves on.
                if dest.exists() || (cfg.compression && compressed_path(&dest).exists()) {
                    warn!(kind = %self.kind, dest = %dest.display(), "rotation target exists, continuing with the active file");
                } else {
                    fs::rename(&cfg.path, &dest).map_err(|err| {
                        Error::rotate(format!(
                            "cannot rename {} to {}: {}",
                            cfg.path.display(),
                            dest.display(),
                            err
                        ))
                    })?;
                    let mut compressed = false;
                    if cfg.compression {
                        match gzip_file(&dest) {
                            Ok(()) => compressed = true,
                            Err(err) => {
                                warn!(kind = %self.kind, path = %dest.display(), %err, "failed to compress rotated log");
                            }
                        }
                    }
                    state.chain.insert(
                        0,
                        HistoricalLogEntry {
                            ctime: state.ctime,
                            size: f_size,
                            compressed,
                        },
                    );
                    state.num_logs += 1;
                }
            }
        }

        let file = open_active(cfg)?;
        state.cur_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        state.file = Some(file);
        state.ctime = now;
        state.need_title = self.banner.is_some();

        if let Err(err) = ledger.rewrite(state, cfg.mode) {
            warn!(kind = %self.kind, %err, "unable to rewrite rotation ledger");
        }

        if policy::sync_applies(cfg) {
            if state.sync_clock == 0 {
                state.sync_clock = policy::next_sync_clock(now, cfg.sync_hour, cfg.sync_min);
            }
            state.sync_clock =
                policy::advance_sync_clock(state.sync_clock, cfg.rotation_secs(), state.ctime);
        }

        state.status = ChannelStatus::Open;
        Ok(())
    }

    /// Route an unrecoverable failure: the error channel signals server
    /// shutdown through the emergency path, the others continue
    /// best-effort.
    fn escalate(&self, state: &mut ChannelState, err: Error) -> Error {
        if self.kind == LogKind::Error {
            state.status = ChannelStatus::Fatal;
            self.fatal.store(true, Ordering::Release);
            self.emergency.emit_and_reopen(&err.to_string());
        } else {
            state.status = ChannelStatus::Open;
            self.emergency.emit(&err.to_string());
        }
        err
    }

    /// Flush buffered bytes to disk. No-op for unbuffered channels.
    pub fn flush(&self, sync_now: bool) -> Result<()> {
        match &self.buffer {
            Some(buffer) => buffer.flush(self, sync_now),
            None => Ok(()),
        }
    }

    /// Validate-then-apply reconfiguration; on violation the channel is
    /// left untouched.
    pub fn reconfigure(&self, new_cfg: LogChannelConfig, now: i64) -> Result<()> {
        if new_cfg.kind != self.kind {
            return Err(Error::config(format!(
                "cannot reconfigure {} channel with a {} config",
                self.kind, new_cfg.kind
            )));
        }
        new_cfg.validate()?;

        let mut inner = self.inner.write();
        let reopen = new_cfg.path != inner.cfg.path
            || (new_cfg.enabled && !inner.cfg.enabled)
            || inner.state.status == ChannelStatus::Degraded;
        let close = !new_cfg.enabled && inner.cfg.enabled;
        inner.cfg = new_cfg;

        if close {
            drop(inner.state.file.take());
            inner.state.status = ChannelStatus::Closed;
        } else if reopen {
            drop(inner.state.file.take());
            self.open_locked(&mut inner, now)?;
        }
        Ok(())
    }

    /// Close at shutdown. Buffered data must be flushed first.
    pub fn close(&self) {
        let mut inner = self.inner.write();
        drop(inner.state.file.take());
        inner.state.status = ChannelStatus::Closed;
    }

    /// Unconditionally delete every historical file. Last resort for the
    /// disk-monitoring thread when the filesystem is nearly full.
    pub fn delete_rotated(&self) {
        let mut inner = self.inner.write();
        let ChannelInner { cfg, state } = &mut *inner;
        for entry in state.chain.drain(..) {
            remove_historical_file(cfg, &entry, "administrative delete");
        }
        state.num_logs = 1;
        // The sidecar must stop listing the deleted files, otherwise the
        // next open takes a needless self-heal pass.
        let ledger = RotationLedger::for_config(cfg);
        if let Err(err) = ledger.rewrite(state, cfg.mode) {
            warn!(kind = %cfg.kind, %err, "unable to rewrite rotation ledger");
        }
    }

    /// Paths of the historical files, newest first
    pub fn historical_files(&self) -> Vec<PathBuf> {
        let inner = self.inner.read();
        inner
            .state
            .chain
            .iter()
            .map(|e| entry_path(&inner.cfg.path, e))
            .collect()
    }

    pub(crate) fn sync_boundary_passed(&self, now: i64) -> bool {
        let inner = self.inner.read();
        inner.cfg.rotation_sync_enabled
            && inner.state.sync_clock > 0
            && now >= inner.state.sync_clock
    }

    pub(crate) fn buffering_enabled(&self) -> bool {
        self.inner.read().cfg.buffering
    }

    #[cfg(test)]
    pub(crate) fn active_size(&self) -> u64 {
        self.inner.read().state.cur_size
    }

    #[cfg(test)]
    pub(crate) fn chain_len(&self) -> usize {
        self.inner.read().state.chain.len()
    }
}

/// Gzip a rotated file into `<path>.gz` and remove the original. The
/// chain entry keeps the uncompressed size.
fn gzip_file(path: &Path) -> std::io::Result<()> {
    let gz_path = compressed_path(path);
    let mut src = File::open(path)?;
    let dst = File::create(&gz_path)?;
    let mut encoder = GzEncoder::new(dst, Compression::default());
    std::io::copy(&mut src, &mut encoder)?;
    encoder.finish()?;
    fs::remove_file(path)?;
    Ok(())
}

/// Open the active log file for append, creating it with the configured
/// permissions.
fn open_active(cfg: &LogChannelConfig) -> Result<File> {
    let mut opts = OpenOptions::new();
    opts.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(cfg.mode);
    }
    opts.open(&cfg.path)
        .map_err(|err| Error::open(cfg.path.clone(), err.to_string()))
}
