//! Dirlog Engine - Log rotation, retention, and buffered writes
//!
//! Three independent channels (access, error, audit) with size-, time-,
//! and wall-clock-synchronized rotation, disk-space-aware retention of
//! rotated files, a crash-tolerant `.rotationinfo` ledger, and a
//! low-contention write buffer in front of the access channel.

mod buffer;
mod channel;
mod emergency;
mod ledger;
mod manager;
mod policy;
mod retention;
mod state;

pub use buffer::WriteBuffer;
pub use channel::LogChannel;
pub use emergency::EmergencyWriter;
pub use ledger::{LedgerOutcome, RotationLedger};
pub use manager::{LogManager, LogManagerConfig};
pub use policy::{check as rotation_check, next_sync_clock, RotateReason, RotationCheck};
pub use retention::{
    compressed_path, entry_path, historical_path, DiskProbe, RetentionEnforcer, StatvfsProbe,
};
pub use state::{ChannelState, ChannelStatus, HistoricalLogEntry};
