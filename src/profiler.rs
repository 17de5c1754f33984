//! GPU timer-query profiling.
//!
//! Two halves with a hand-off ring between them:
//!
//! * [`QueryRecorder`] lives on the render thread. Profile-block jobs call
//!   [`QueryRecorder::begin`]/[`QueryRecorder::end`], which take a query from
//!   the free pool (or create one), emit a timestamp and append a record.
//!   The swap job calls [`QueryRecorder::frame`], which reads every
//!   timestamp back, recycles the queries and hands the frame's records to
//!   the ring.
//! * [`TimingsRing`] is a three-slot single-producer single-consumer history
//!   ring. The render thread is the only writer, the producer side (via
//!   [`Renderer::get_gpu_timings`](crate::Renderer::get_gpu_timings)) the
//!   only reader. A frame whose timings cannot be stored because all slots
//!   hold unread history is dropped; unread results are never overwritten.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::driver::{Driver, QueryHandle};

/// One resolved timestamp of a profile block.
///
/// Blocks arrive as begin/end pairs in recording order; `is_end` records end
/// markers (their `name` is empty). Pair them with a stack to rebuild the
/// block tree, or feed them to [`chrometrace`](crate::chrometrace).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuTimerRecord {
    pub name: &'static str,
    /// Raw backend timestamp; only differences are meaningful.
    pub timestamp: u64,
    pub is_end: bool,
}

const HISTORY_SLOTS: u32 = 3;

/// The SPSC history ring. See the module docs.
pub(crate) struct TimingsRing {
    history: [Mutex<Vec<GpuTimerRecord>>; HISTORY_SLOTS as usize],
    /// Slots consumed by the reader. Written by the producer side only.
    read: AtomicU32,
    /// Slots filled by the render thread. Written by the render thread only.
    write: AtomicU32,
}

impl TimingsRing {
    pub(crate) fn new() -> Self {
        Self {
            history: [const { Mutex::new(Vec::new()) }; HISTORY_SLOTS as usize],
            read: AtomicU32::new(0),
            write: AtomicU32::new(0),
        }
    }

    /// Store one frame of records, render-thread side.
    ///
    /// Returns false (and leaves `records` untouched) when all slots hold
    /// unread history; the caller drops that frame.
    pub(crate) fn store(&self, records: &mut Vec<GpuTimerRecord>) -> bool {
        // Acquire the reader's cursor so a freed slot's prior read is visible.
        let read = self.read.load(Ordering::Acquire);
        let write = self.write.load(Ordering::Relaxed);
        debug_assert!(write.wrapping_sub(read) <= HISTORY_SLOTS);
        if write.wrapping_sub(read) == HISTORY_SLOTS {
            return false;
        }
        // The cursor protocol keeps reader and writer on different slots, so
        // this lock is never contended.
        let mut slot = self.history[(write % HISTORY_SLOTS) as usize].lock();
        std::mem::swap(&mut *slot, records);
        drop(slot);
        // Publish the slot. Exactly one increment per stored frame.
        self.write.store(write.wrapping_add(1), Ordering::Release);
        true
    }

    /// Swap the oldest unread frame into `out`, producer side.
    pub(crate) fn read_into(&self, out: &mut Vec<GpuTimerRecord>) -> bool {
        // Acquire the writer's cursor so the slot's contents are visible.
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Relaxed);
        if read == write {
            return false;
        }
        let mut slot = self.history[(read % HISTORY_SLOTS) as usize].lock();
        std::mem::swap(&mut *slot, out);
        drop(slot);
        self.read.store(read.wrapping_add(1), Ordering::Release);
        true
    }
}

struct PendingQuery {
    query: QueryHandle,
    name: &'static str,
    is_end: bool,
}

/// Render-thread half of the profiler. See the module docs.
pub(crate) struct QueryRecorder {
    /// Free queries recycled across frames.
    pool: Vec<QueryHandle>,
    /// This frame's begin/end records, in emission order.
    frame: Vec<PendingQuery>,
}

impl QueryRecorder {
    pub(crate) fn new() -> Self {
        Self {
            pool: Vec::new(),
            frame: Vec::new(),
        }
    }

    pub(crate) fn begin(&mut self, driver: &mut dyn Driver, name: &'static str) {
        self.emit(driver, name, false);
    }

    pub(crate) fn end(&mut self, driver: &mut dyn Driver) {
        self.emit(driver, "", true);
    }

    fn emit(&mut self, driver: &mut dyn Driver, name: &'static str, is_end: bool) {
        let query = match self.pool.pop() {
            Some(query) => query,
            None => match driver.create_query() {
                Ok(query) => query,
                Err(err) => {
                    log::error!("timestamp query creation failed: {err}");
                    // Keep the begin/end pairing intact; the record resolves
                    // to timestamp 0.
                    QueryHandle::INVALID
                }
            },
        };
        if query.is_valid() {
            driver.query_timestamp(query);
        }
        self.frame.push(PendingQuery {
            query,
            name,
            is_end,
        });
    }

    /// Resolve the frame's queries and rotate the results into the ring.
    ///
    /// Runs inside the swap job. Reading a query result blocks until the
    /// device has produced it, which is the GPU-side cost of profiling a
    /// frame.
    pub(crate) fn frame(&mut self, driver: &mut dyn Driver, ring: &TimingsRing) {
        let mut records = Vec::with_capacity(self.frame.len());
        for pending in self.frame.drain(..) {
            let timestamp = if pending.query.is_valid() {
                let value = driver.get_query_result(pending.query);
                self.pool.push(pending.query);
                value
            } else {
                0
            };
            records.push(GpuTimerRecord {
                name: pending.name,
                timestamp,
                is_end: pending.is_end,
            });
        }
        // Back-pressure: drop the frame rather than overwrite unread history.
        ring.store(&mut records);
    }

    /// Return every pooled query to the driver. Part of render-thread teardown.
    pub(crate) fn shutdown(&mut self, driver: &mut dyn Driver) {
        debug_assert!(self.frame.is_empty(), "shutdown with unresolved queries");
        for query in self.pool.drain(..) {
            driver.destroy_query(query);
        }
    }
}
