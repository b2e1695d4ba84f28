//! Byte budget shared between the reader and the spiller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log;
use parking_lot::{Condvar, Mutex};

use crate::CancellationToken;

/// How long a parked reader sleeps before re-checking cancellation.
pub const PARK_TIMEOUT: Duration = Duration::from_millis(100);

/// Counter of line bytes currently held in memory by in-flight chunks.
///
/// The counter itself is only ever changed with atomic add/sub. The mutex guards nothing
/// but the condition variable, which lets the reader park until the spiller frees enough bytes.
#[derive(Debug)]
pub struct ByteBudget {
    threshold: u64,
    buffered: AtomicU64,
    peak: AtomicU64,
    lock: Mutex<()>,
    released: Condvar,
}

impl ByteBudget {
    /// Creates a budget that holds producers back once `threshold` bytes are buffered.
    pub fn new(threshold: u64) -> Self {
        ByteBudget {
            threshold: threshold.max(1),
            buffered: AtomicU64::new(0),
            peak: AtomicU64::new(0),
            lock: Mutex::new(()),
            released: Condvar::new(),
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> u64 {
        self.buffered.load(Ordering::Acquire)
    }

    /// Highest value the counter has reached.
    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::Acquire)
    }

    /// Accounts `bytes` of a line appended to a chunk.
    pub fn acquire(&self, bytes: u64) {
        let buffered = self.buffered.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.peak.fetch_max(buffered, Ordering::AcqRel);
    }

    /// Releases `bytes` of a line written out to disk.
    /// Releasing more than is buffered empties the counter instead of wrapping it around.
    pub fn release(&self, bytes: u64) {
        let previous = self
            .buffered
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |buffered| {
                Some(buffered.saturating_sub(bytes))
            })
            .unwrap_or_else(|buffered| buffered);
        if previous < bytes {
            log::warn!("releasing {} bytes with only {} buffered", bytes, previous);
        }

        if previous >= self.threshold && previous.saturating_sub(bytes) < self.threshold {
            // taking the lock orders the wakeup after the waiter's last check
            let _guard = self.lock.lock();
            self.released.notify_all();
        }
    }

    /// Blocks until the buffered bytes drop below the threshold or `cancel` fires.
    /// Returns the time spent waiting.
    pub fn wait_for_capacity(&self, cancel: &CancellationToken) -> Duration {
        if self.buffered() < self.threshold {
            return Duration::ZERO;
        }

        let start = Instant::now();
        let mut guard = self.lock.lock();
        while self.buffered() >= self.threshold && !cancel.is_cancelled() {
            self.released.wait_for(&mut guard, PARK_TIMEOUT);
        }

        start.elapsed()
    }
}
