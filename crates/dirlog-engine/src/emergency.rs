//! Last-resort diagnostic path for when the error channel cannot write
//!
//! Messages always go to the platform syslog facility. On request the
//! configured error-log file is additionally reopened in plain append mode
//! and written directly, bypassing rotation entirely so a failure in the
//! rotation path cannot be re-entered.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::error;

use dirlog_core::EMERGENCY_PREFIX;

pub struct EmergencyWriter {
    error_path: PathBuf,
    mode: u32,
}

impl EmergencyWriter {
    pub fn new(error_path: impl Into<PathBuf>, mode: u32) -> Self {
        Self {
            error_path: error_path.into(),
            mode,
        }
    }

    pub fn error_path(&self) -> &Path {
        &self.error_path
    }

    /// Send `message` to syslog with the fixed emergency prefix.
    pub fn emit(&self, message: &str) {
        error!(target: "dirlog::emergency", "{}", message);
        syslog_err(&format!("{}: {}", EMERGENCY_PREFIX, message));
    }

    /// Syslog plus a direct append to the error-log file. Used when the
    /// error channel's own descriptor is the thing that failed.
    pub fn emit_and_reopen(&self, message: &str) {
        self.emit(message);

        let mut opts = OpenOptions::new();
        opts.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(self.mode);
        }
        match opts.open(&self.error_path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", message);
            }
            Err(err) => {
                syslog_err(&format!(
                    "{}: failed to reopen error log {}: {}",
                    EMERGENCY_PREFIX,
                    self.error_path.display(),
                    err
                ));
            }
        }
    }
}

#[cfg(unix)]
fn syslog_err(message: &str) {
    use std::ffi::CString;
    let Ok(msg) = CString::new(message) else {
        return;
    };
    const FMT: &[u8] = b"%s\0";
    // SAFETY: FMT is a constant "%s" and msg is a valid NUL-terminated
    // string for its single argument.
    unsafe {
        libc::syslog(
            libc::LOG_ERR,
            FMT.as_ptr() as *const libc::c_char,
            msg.as_ptr(),
        );
    }
}

#[cfg(not(unix))]
fn syslog_err(message: &str) {
    eprintln!("{}", message);
}
