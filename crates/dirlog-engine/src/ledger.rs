//! The `.rotationinfo` sidecar: persisted bookkeeping of historical files
//!
//! The format is read by external tooling and must stay bit-compatible:
//!
//! ```text
//! LOGINFO:Log file created at: 02/Jan/2024:00:00:00 (1704153600)
//! LOGINFO:Previous Log File:/var/log/dirlog/access.20240101-000000 (1704067200) (52301)
//! ```
//!
//! A ledger that references files missing from disk, or that omits rotated
//! files present on disk, is corrupt; it is never fatal — the chain is
//! rebuilt from a directory scan instead.

use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use dirlog_core::{
    format_long, format_short, parse_log_time, Error, LogChannelConfig, Result,
    LOGINFO_MARKER, PREV_LOGFILE_PREFIX,
};

use crate::state::{ChannelState, HistoricalLogEntry};

/// Timestamp suffix of a rotated filename: 8 digits, dash, 6 digits, with
/// an optional `.gz` when the file was compressed after rotation
static ROTATED_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{8}-\d{6}(\.gz)?$").expect("invalid rotated-suffix regex"));

/// What the ledger told us about the active file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    /// No usable ledger; the active file starts a fresh history
    New,
    /// Ledger parsed cleanly; creation time and chain were recovered
    Reopened,
}

/// Reader/writer for one channel's rotation ledger
pub struct RotationLedger {
    log_path: PathBuf,
    ledger_path: PathBuf,
}

impl RotationLedger {
    pub fn for_config(cfg: &LogChannelConfig) -> Self {
        Self {
            log_path: cfg.path.clone(),
            ledger_path: cfg.ledger_path(),
        }
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    /// Read the ledger back into `state`, self-healing from a directory
    /// scan when it is corrupt. Runs once at channel open.
    pub fn load(&self, cfg: &LogChannelConfig, state: &mut ChannelState, now: i64) -> LedgerOutcome {
        state.chain.clear();
        state.num_logs = 1;
        state.ctime = now;

        let text = match fs::read_to_string(&self.ledger_path) {
            Ok(text) => text,
            Err(_) => return LedgerOutcome::New,
        };

        match self
            .parse(cfg, state, now, &text)
            .and_then(|_| self.check_prev_logs(&text))
        {
            Ok(()) if state.chain_consistent() => LedgerOutcome::Reopened,
            Ok(()) => {
                warn!(
                    path = %self.ledger_path.display(),
                    "ledger chain count drifted, rebuilding from directory scan"
                );
                self.rebuild_from_directory(state, now);
                LedgerOutcome::New
            }
            Err(err) => {
                warn!(
                    path = %self.ledger_path.display(),
                    %err,
                    "rotation ledger corrupt, rebuilding from directory scan"
                );
                self.rebuild_from_directory(state, now);
                LedgerOutcome::New
            }
        }
    }

    /// Parse every ledger line. The first parsed line is the active file's
    /// header; each subsequent line becomes a historical entry.
    fn parse(
        &self,
        cfg: &LogChannelConfig,
        state: &mut ChannelState,
        now: i64,
        text: &str,
    ) -> Result<()> {
        let mut main_log = true;
        for line in text.lines() {
            let (ctime, size, compressed) = match parse_ledger_line(line)? {
                Some(parsed) => parsed,
                None => continue,
            };
            if main_log {
                state.ctime = if ctime > 0 { ctime } else { now };
                main_log = false;
            } else {
                state.chain.push(HistoricalLogEntry {
                    ctime: if ctime > 0 { ctime } else { now },
                    size: if size > 0 { size } else { cfg.max_log_size },
                    compressed,
                });
            }
            state.num_logs = state.chain.len() + 1;
        }
        Ok(())
    }

    /// A rotated file on disk that the ledger does not mention also makes
    /// the ledger corrupt: its bookkeeping no longer covers reality.
    fn check_prev_logs(&self, text: &str) -> Result<()> {
        for name in self.scan_rotated_names() {
            if !text.contains(&name) {
                return Err(Error::ledger(format!(
                    "rotated file {} not recorded in {}",
                    name,
                    self.ledger_path.display()
                )));
            }
        }
        Ok(())
    }

    /// Discard the in-memory chain and rebuild it from the log directory.
    /// Timestamps come from filenames, sizes from stat; an unparsable
    /// timestamp is treated as "now".
    pub fn rebuild_from_directory(&self, state: &mut ChannelState, now: i64) {
        state.chain.clear();
        state.ctime = now;

        let dir = match self.log_path.parent() {
            Some(dir) => dir,
            None => {
                state.num_logs = 1;
                return;
            }
        };
        for name in self.scan_rotated_names() {
            let compressed = name.ends_with(".gz");
            let stem = name.strip_suffix(".gz").unwrap_or(&name);
            let suffix = &stem[stem.rfind('.').map(|i| i + 1).unwrap_or(0)..];
            let ctime = match parse_log_time(suffix) {
                0 => now,
                t => t,
            };
            let size = fs::metadata(dir.join(&name)).map(|m| m.len()).unwrap_or(0);
            state.chain.push(HistoricalLogEntry { ctime, size, compressed });
            debug!(file = %name, ctime, size, "recovered rotated log from directory scan");
        }
        // Newest first, as rotation maintains the chain.
        state.chain.sort_by(|a, b| b.ctime.cmp(&a.ctime));
        state.num_logs = state.chain.len() + 1;
    }

    /// Rewrite the whole ledger: one header line for the active file, one
    /// history line per entry, newest first.
    pub fn rewrite(&self, state: &ChannelState, mode: u32) -> Result<()> {
        use std::io::Write;

        let mut opts = fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;

        let mut file = opts.open(&self.ledger_path)?;
        writeln!(
            file,
            "{}:Log file created at: {} ({})",
            LOGINFO_MARKER,
            format_long(state.ctime),
            state.ctime
        )?;
        for entry in &state.chain {
            writeln!(
                file,
                "{}:{}{}.{}{} ({}) ({})",
                LOGINFO_MARKER,
                PREV_LOGFILE_PREFIX,
                self.log_path.display(),
                format_short(entry.ctime),
                if entry.compressed { ".gz" } else { "" },
                entry.ctime,
                entry.size
            )?;
        }
        Ok(())
    }

    /// Delete the ledger file, best-effort
    pub fn remove(&self) {
        if let Err(err) = fs::remove_file(&self.ledger_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.ledger_path.display(), %err, "unable to remove rotation ledger");
            }
        }
    }

    /// Names in the log directory of form `<basename>.<YYYYMMDD-HHMMSS>`
    fn scan_rotated_names(&self) -> Vec<String> {
        let (Some(dir), Some(base)) = (
            self.log_path.parent(),
            self.log_path.file_name().and_then(|n| n.to_str()),
        ) else {
            return Vec::new();
        };
        let prefix = format!("{}.", base);
        let mut names = Vec::new();
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(suffix) = name.strip_prefix(&prefix) {
                if ROTATED_SUFFIX.is_match(suffix) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }
}

/// Parse one ledger line into (ctime, size, compressed).
///
/// Every line must carry the `LOGINFO` marker; a line without it means the
/// file is not ours and the ledger is corrupt. Lines without a `(...)`
/// group carry no record and are skipped. A `Previous Log File:` line whose
/// path is absent from disk is corrupt; a path ending in `.gz` marks the
/// entry compressed.
fn parse_ledger_line(line: &str) -> Result<Option<(i64, u64, bool)>> {
    if !line.contains(LOGINFO_MARKER) {
        return Err(Error::ledger(format!("line without LOGINFO marker: {:?}", line)));
    }

    let Some((ctime_text, rest)) = paren_group(line) else {
        return Ok(None);
    };
    let ctime = ctime_text.trim().parse::<i64>().unwrap_or(0);
    let size = match paren_group(rest) {
        Some((size_text, _)) => size_text.trim().parse::<u64>().unwrap_or(0),
        None => 0,
    };

    let mut compressed = false;
    if let Some(after) = line.split(PREV_LOGFILE_PREFIX).nth(1) {
        let path_text = after
            .split([' ', '('])
            .next()
            .unwrap_or("")
            .trim();
        compressed = path_text.ends_with(".gz");
        if !path_text.is_empty() && !Path::new(path_text).exists() {
            return Err(Error::ledger(format!(
                "previous log file missing from disk: {}",
                path_text
            )));
        }
    }

    Ok(Some((ctime, size, compressed)))
}

/// First `(...)` group and the text following it
fn paren_group(text: &str) -> Option<(&str, &str)> {
    let open = text.find('(')?;
    let rest = &text[open + 1..];
    let close = rest.find(')')?;
    Some((&rest[..close], &rest[close + 1..]))
}
