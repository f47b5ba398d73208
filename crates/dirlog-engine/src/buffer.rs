//! Lock-minimizing concurrent append buffer for the access channel
//!
//! Contention on the buffer lock hurts badly on multi-core boxes when the
//! lock is held for the whole copy of a log line. The append is therefore
//! split in two phases: under the lock we only reserve a byte range and
//! bump an in-flight refcount; the copy itself runs unlocked. A flush may
//! not reuse the arena until the refcount is back to zero, otherwise
//! concurrently-copying lines would interleave.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use dirlog_core::{Error, Result, BUFFER_DRAIN_MAX_POLLS, BUFFER_DRAIN_SLEEP_MS};

use crate::channel::LogChannel;

pub struct WriteBuffer {
    arena: Box<[UnsafeCell<u8>]>,
    cursor: Mutex<usize>,
    in_flight: AtomicUsize,
}

// The arena is raw bytes; disjoint reserved ranges are written by their
// owning threads only, and reads happen after the refcount drains.
unsafe impl Send for WriteBuffer {}
unsafe impl Sync for WriteBuffer {}

impl WriteBuffer {
    pub fn new(capacity: usize) -> Self {
        let arena = (0..capacity).map(|_| UnsafeCell::new(0)).collect();
        Self {
            arena,
            cursor: Mutex::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.arena.len()
    }

    /// Bytes currently buffered. Test/diagnostic accessor.
    pub fn pending(&self) -> usize {
        *self.cursor.lock()
    }

    /// Append one record. `now` drives the wall-clock flush check.
    ///
    /// Phase 1 (locked): flush first if the record would overflow the arena
    /// or a scheduled sync rotation boundary has passed, then reserve the
    /// range and raise the in-flight count. Phase 2 (unlocked): copy.
    /// Phase 3: if administrative buffering is off, flush synchronously.
    pub fn append(&self, channel: &LogChannel, bytes: &[u8], now: i64) -> Result<()> {
        let size = bytes.len();

        let mut cursor = self.cursor.lock();
        if *cursor + size > self.capacity() || channel.sync_boundary_passed(now) {
            self.flush_locked(&mut cursor, channel, false)?;
        }

        // A record larger than the whole arena bypasses it.
        if size > self.capacity() {
            drop(cursor);
            return channel.write_direct(bytes, now);
        }

        let start = *cursor;
        *cursor += size;
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        drop(cursor);

        // SAFETY: [start, start+size) was reserved above while holding the
        // cursor lock, so no other thread writes this range, and no flush
        // resets the cursor while in_flight is nonzero.
        unsafe {
            let dst = self.arena[start].get();
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, size);
        }
        self.in_flight.fetch_sub(1, Ordering::AcqRel);

        if !channel.buffering_enabled() {
            let mut cursor = self.cursor.lock();
            self.flush_locked(&mut cursor, channel, true)?;
        }
        Ok(())
    }

    /// Flush buffered bytes through the channel's direct write path
    /// (rotation and retention run exactly as unbuffered writes do).
    pub fn flush(&self, channel: &LogChannel, sync_now: bool) -> Result<()> {
        let mut cursor = self.cursor.lock();
        self.flush_locked(&mut cursor, channel, sync_now)
    }

    fn flush_locked(
        &self,
        cursor: &mut usize,
        channel: &LogChannel,
        sync_now: bool,
    ) -> Result<()> {
        self.drain_in_flight()?;

        let len = *cursor;
        if len == 0 {
            return Ok(());
        }

        // SAFETY: in_flight is zero and the cursor lock is held, so no
        // thread is copying and none can reserve until we return.
        let payload =
            unsafe { std::slice::from_raw_parts(self.arena[0].get() as *const u8, len) };
        channel.flush_arena(payload, sync_now)?;

        // Reset only after the write succeeded; on failure the arena is
        // kept intact and the error propagates.
        *cursor = 0;
        Ok(())
    }

    /// Busy-wait until no writer is mid-copy. The copies are memcpys of
    /// single log lines, expected to resolve in microseconds, so a short
    /// bounded sleep loop is deliberate.
    fn drain_in_flight(&self) -> Result<()> {
        let mut polls = 0u32;
        while self.in_flight.load(Ordering::Acquire) > 0 {
            polls += 1;
            if polls > BUFFER_DRAIN_MAX_POLLS {
                warn!("write buffer drain exceeded poll bound, flush aborted");
                return Err(Error::write(
                    "in-flight writers did not drain, buffer left intact",
                ));
            }
            std::thread::sleep(Duration::from_millis(BUFFER_DRAIN_SLEEP_MS));
        }
        Ok(())
    }
}
