//! Constants and default values for dirlog

/// Marker every rotation-ledger line must carry
pub const LOGINFO_MARKER: &str = "LOGINFO";

/// Prefix of a historical-file line in the rotation ledger
pub const PREV_LOGFILE_PREFIX: &str = "Previous Log File:";

/// Suffix of the ledger sidecar file (`<log-path>.rotationinfo`)
pub const ROTATION_INFO_SUFFIX: &str = "rotationinfo";

/// Short timestamp form used in rotated filenames and ledger lines
pub const TIME_FORMAT_SHORT: &str = "%Y%m%d-%H%M%S";

/// Long timestamp form used in the ledger header
pub const TIME_FORMAT_LONG: &str = "%d/%b/%Y:%H:%M:%S";

/// Default maximum size of one log file (100MB)
pub const DEFAULT_MAX_LOG_SIZE: u64 = 100 * 1024 * 1024;

/// Default number of log files kept (active file included)
pub const DEFAULT_MAX_NUM_LOGS: usize = 10;

/// Default rotation interval count
pub const DEFAULT_ROTATION_TIME: i64 = 1;

/// Default expiration interval count
pub const DEFAULT_EXP_TIME: i64 = 1;

/// Default wall-clock sync hour (midnight)
pub const DEFAULT_SYNC_HOUR: u32 = 0;

/// Default wall-clock sync minute
pub const DEFAULT_SYNC_MIN: u32 = 0;

/// Default permission mode for newly created log files
pub const DEFAULT_LOG_MODE: u32 = 0o600;

/// Size of the access-channel write buffer arena (512KB)
pub const LOG_BUFFER_SIZE: usize = 512 * 1024;

/// Sleep between refcount polls while draining the write buffer
pub const BUFFER_DRAIN_SLEEP_MS: u64 = 1;

/// Maximum refcount polls before a flush gives up
pub const BUFFER_DRAIN_MAX_POLLS: u32 = 5000;

/// Fixed prefix on every emergency syslog message
pub const EMERGENCY_PREFIX: &str = "dirlog emergency";
