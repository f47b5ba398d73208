//! Rotation decision and wall-clock sync arithmetic
//!
//! The decision is pure: it reads config and state and an explicit `now`,
//! touching nothing. Callers that get [`RotationCheck::Rotate`] perform the
//! rotation under the channel write lock.

use chrono::{Local, TimeZone, Timelike};
use dirlog_core::LogChannelConfig;
use tracing::debug;

use crate::state::ChannelState;

/// Why a rotation fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateReason {
    /// No open descriptor; the channel must (re)open
    NoFile,
    /// Active file reached the size limit
    SizeExceeded,
    /// Rotation interval or sync instant passed
    TimeElapsed,
}

/// Outcome of a rotation check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationCheck {
    Continue,
    Rotate(RotateReason),
}

/// Decide whether the active file must be rotated now.
///
/// Evaluated in order, first match wins:
/// no descriptor, single-log channel (rotation disabled), size limit,
/// interval disabled, then time (sync clock for day-or-coarser units with
/// sync enabled, elapsed interval otherwise).
pub fn check(cfg: &LogChannelConfig, state: &ChannelState, now: i64) -> RotationCheck {
    if state.file.is_none() {
        return RotationCheck::Rotate(RotateReason::NoFile);
    }

    // With one log there is nowhere to store a renamed predecessor, so
    // rotation by time or size is disabled entirely.
    if cfg.max_num_logs == 1 {
        return RotationCheck::Continue;
    }

    if cfg.max_log_size > 0 && state.cur_size >= cfg.max_log_size {
        debug!(
            kind = %cfg.kind,
            max = cfg.max_log_size,
            size = state.cur_size,
            "end of log because size exceeded"
        );
        return RotationCheck::Rotate(RotateReason::SizeExceeded);
    }

    let rotation_secs = cfg.rotation_secs();
    if rotation_secs <= 0 {
        return RotationCheck::Continue;
    }

    let expired = if sync_applies(cfg) {
        now > state.sync_clock
    } else {
        now - state.ctime > rotation_secs
    };
    if expired {
        debug!(
            kind = %cfg.kind,
            max_secs = rotation_secs,
            age_secs = now - state.ctime,
            "end of log because time exceeded"
        );
        return RotationCheck::Rotate(RotateReason::TimeElapsed);
    }

    RotationCheck::Continue
}

/// Sync-to-clock only governs day-or-coarser units; hour and minute units
/// always rotate on elapsed time.
pub fn sync_applies(cfg: &LogChannelConfig) -> bool {
    use dirlog_core::TimeUnit;
    cfg.rotation_sync_enabled
        && !matches!(cfg.rotation_unit, TimeUnit::Hour | TimeUnit::Minute)
}

/// Next wall-clock instant matching `hour:minute`, strictly within
/// `[now, now + 24h)`.
pub fn next_sync_clock(now: i64, sync_hour: u32, sync_min: u32) -> i64 {
    let local = match Local.timestamp_opt(now, 0).single() {
        Some(dt) => dt,
        None => return now,
    };
    let cur_hour = local.hour() as i64;
    let cur_min = local.minute() as i64;
    let sync_hour = sync_hour as i64;
    let sync_min = sync_min as i64;

    let (minutes, mut hours) = if sync_min < cur_min {
        (sync_min + 60 - cur_min, sync_hour - 1 - cur_hour)
    } else {
        (sync_min - cur_min, sync_hour - cur_hour)
    };
    if hours < 0 {
        hours += 24;
    }

    now + hours * 3600 + minutes * 60
}

/// Advance the sync clock past `ctime` by whole intervals. Handles any
/// number of rotations missed while the process was down.
pub fn advance_sync_clock(mut sync_clock: i64, interval_secs: i64, ctime: i64) -> i64 {
    let step = interval_secs.abs();
    if step == 0 {
        return sync_clock;
    }
    while sync_clock <= ctime {
        sync_clock = sync_clock.saturating_add(step);
    }
    sync_clock
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirlog_core::{LogChannelConfig, LogKind, TimeUnit};

    fn open_state() -> ChannelState {
        let mut state = ChannelState::new();
        state.file = Some(tempfile::tempfile().unwrap());
        state
    }

    fn cfg() -> LogChannelConfig {
        LogChannelConfig::new(LogKind::Access, "/tmp/access")
    }

    #[test]
    fn test_no_file_rotates() {
        let state = ChannelState::new();
        assert_eq!(
            check(&cfg(), &state, 0),
            RotationCheck::Rotate(RotateReason::NoFile)
        );
    }

    #[test]
    fn test_single_log_never_rotates() {
        let mut cfg = cfg();
        cfg.max_num_logs = 1;
        cfg.max_log_size = 10;
        let mut state = open_state();
        state.cur_size = 1_000_000;
        assert_eq!(check(&cfg, &state, i64::MAX / 2), RotationCheck::Continue);
    }

    #[test]
    fn test_size_exceeded() {
        let mut cfg = cfg();
        cfg.max_log_size = 1024;
        let mut state = open_state();
        state.ctime = 1_000_000;
        state.cur_size = 1024;
        assert_eq!(
            check(&cfg, &state, 1_000_001),
            RotationCheck::Rotate(RotateReason::SizeExceeded)
        );
    }

    #[test]
    fn test_interval_disabled() {
        let mut cfg = cfg();
        cfg.rotation_time = -1;
        let mut state = open_state();
        state.ctime = 0;
        assert_eq!(check(&cfg, &state, i64::MAX / 2), RotationCheck::Continue);
    }

    #[test]
    fn test_elapsed_interval() {
        let mut cfg = cfg();
        cfg.rotation_time = 1;
        cfg.rotation_unit = TimeUnit::Hour;
        let mut state = open_state();
        state.ctime = 10_000;
        assert_eq!(check(&cfg, &state, 10_000 + 3600), RotationCheck::Continue);
        assert_eq!(
            check(&cfg, &state, 10_000 + 3601),
            RotationCheck::Rotate(RotateReason::TimeElapsed)
        );
    }

    #[test]
    fn test_sync_clock_governs_day_unit() {
        let mut cfg = cfg();
        cfg.rotation_time = 1;
        cfg.rotation_unit = TimeUnit::Day;
        cfg.rotation_sync_enabled = true;
        let mut state = open_state();
        state.ctime = 0;
        state.sync_clock = 500_000;
        assert_eq!(check(&cfg, &state, 500_000), RotationCheck::Continue);
        assert_eq!(
            check(&cfg, &state, 500_001),
            RotationCheck::Rotate(RotateReason::TimeElapsed)
        );
    }

    #[test]
    fn test_sync_ignored_for_fine_units() {
        let mut cfg = cfg();
        cfg.rotation_sync_enabled = true;
        cfg.rotation_unit = TimeUnit::Minute;
        assert!(!sync_applies(&cfg));
        cfg.rotation_unit = TimeUnit::Week;
        assert!(sync_applies(&cfg));
    }

    #[test]
    fn test_next_sync_clock_within_a_day() {
        let now = dirlog_core::now_epoch();
        for (h, m) in [(0, 0), (3, 30), (12, 0), (23, 59)] {
            let sync = next_sync_clock(now, h, m);
            assert!(sync >= now, "sync {} < now {}", sync, now);
            assert!(sync < now + 24 * 3600, "sync {} a day past now {}", sync, now);
        }
    }

    #[test]
    fn test_advance_past_missed_rotations() {
        // Five missed daily rotations: the clock ends within one interval
        // of the new creation time.
        let day = 86_400;
        let ctime = 10 * day;
        let stale = 5 * day;
        let advanced = advance_sync_clock(stale, day, ctime);
        assert!(advanced > ctime);
        assert!(advanced - ctime <= day);
    }

    #[test]
    fn test_advance_zero_interval_is_noop() {
        assert_eq!(advance_sync_clock(100, 0, 1_000), 100);
    }
}
