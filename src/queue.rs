//! The single-consumer command queue feeding the render thread.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::job::RenderJob;
use crate::sync::Semaphore;

/// Lock-protected FIFO of pending render jobs plus a counting semaphore for
/// consumer wake-up. Producers are the scheduler's push tasks; the consumer
/// is the render thread.
///
/// The queue preserves insertion order; because every push task is
/// preconditioned on the previous one, insertion order equals submission
/// order on the producer timeline.
pub(crate) struct CommandQueue {
    jobs: Mutex<VecDeque<Box<dyn RenderJob>>>,
    ready: Semaphore,
}

impl CommandQueue {
    pub(crate) fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            ready: Semaphore::new(0, u32::MAX),
        }
    }

    /// Append a job and wake the consumer.
    pub(crate) fn push(&self, job: Box<dyn RenderJob>) {
        self.jobs.lock().push_back(job);
        self.ready.signal();
    }

    /// Detach the oldest job, blocking until one is available.
    ///
    /// The caller executes the job outside the queue lock.
    pub(crate) fn pop(&self) -> Box<dyn RenderJob> {
        self.ready.wait();
        self.jobs
            .lock()
            .pop_front()
            .expect("queue semaphore signalled without a job")
    }
}
