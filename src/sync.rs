//! Counting semaphore on top of `parking_lot`.
//!
//! Used for the command-queue handoff, the two-token frame-pacing handshake
//! and the init/finished handshakes between the facade and the render thread.
//! Signalling pairs with waiting as release/acquire through the mutex.

use parking_lot::{Condvar, Mutex};

pub(crate) struct Semaphore {
    count: Mutex<u32>,
    max: u32,
    cond: Condvar,
}

impl Semaphore {
    pub(crate) fn new(initial: u32, max: u32) -> Self {
        debug_assert!(initial <= max);
        Self {
            count: Mutex::new(initial),
            max,
            cond: Condvar::new(),
        }
    }

    /// Add one token, saturating at the semaphore's maximum.
    pub(crate) fn signal(&self) {
        let mut count = self.count.lock();
        if *count < self.max {
            *count += 1;
        }
        drop(count);
        self.cond.notify_one();
    }

    /// Take one token, blocking until one is available.
    pub(crate) fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.cond.wait(&mut count);
        }
        *count -= 1;
    }
}
