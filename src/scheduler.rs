//! Worker-pool job scheduler with signal preconditions.
//!
//! A task is a closure plus an optional *precondition* [`Signal`]; running it
//! produces a *completion* signal. Tasks whose precondition has not fired yet
//! park on that signal and are moved to the run queue the moment it fires, so
//! a chain of `run` calls costs no blocked worker.
//!
//! The pipeline uses exactly two patterns: the per-submission setup/push
//! chain (each task preconditioned on its predecessor) and the end-of-frame
//! wait on the most recent push signal.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

/// Completion state of a scheduled task.
///
/// Cloning is cheap; all clones observe the same state. A signal fires once
/// and stays fired.
#[derive(Clone)]
pub struct Signal {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    state: Mutex<SignalState>,
    cond: Condvar,
}

struct SignalState {
    fired: bool,
    /// Tasks parked until this signal fires.
    parked: Vec<Task>,
}

impl Signal {
    fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                state: Mutex::new(SignalState {
                    fired: false,
                    parked: Vec::new(),
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// A signal that is already fired; useful as the seed of a chain.
    pub fn fired() -> Self {
        let signal = Self::new();
        signal.inner.state.lock().fired = true;
        signal
    }

    pub fn is_fired(&self) -> bool {
        self.inner.state.lock().fired
    }

    /// Block the calling thread until the signal fires.
    pub fn wait(&self) {
        let mut state = self.inner.state.lock();
        while !state.fired {
            self.inner.cond.wait(&mut state);
        }
    }
}

struct Task {
    run: Box<dyn FnOnce() + Send>,
    completion: Signal,
}

struct SchedulerShared {
    queue: Mutex<VecDeque<Task>>,
    work_available: Condvar,
    shutdown: AtomicBool,
}

impl SchedulerShared {
    fn enqueue(&self, task: Task) {
        self.queue.lock().push_back(task);
        self.work_available.notify_one();
    }

    /// Mark a task's completion signal fired and release everything parked on it.
    fn fire(&self, signal: &Signal) {
        let parked = {
            let mut state = signal.inner.state.lock();
            state.fired = true;
            std::mem::take(&mut state.parked)
        };
        signal.inner.cond.notify_all();
        if !parked.is_empty() {
            let mut queue = self.queue.lock();
            for task in parked {
                queue.push_back(task);
            }
            drop(queue);
            self.work_available.notify_all();
        }
    }
}

/// N-worker scheduler. See the module docs.
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(workers: usize) -> Self {
        assert!(workers > 0);
        let shared = Arc::new(SchedulerShared {
            queue: Mutex::new(VecDeque::new()),
            work_available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let workers = (0..workers)
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("worker {i}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn scheduler worker")
            })
            .collect();
        Self { shared, workers }
    }

    /// Schedule `f`, to run once `precondition` (if any) has fired.
    ///
    /// Returns the completion signal of `f`. The call never blocks; if the
    /// precondition is still pending the task parks on it.
    pub fn run(&self, precondition: Option<&Signal>, f: impl FnOnce() + Send + 'static) -> Signal {
        let completion = Signal::new();
        let task = Task {
            run: Box::new(f),
            completion: completion.clone(),
        };
        match precondition {
            Some(pre) => {
                let mut state = pre.inner.state.lock();
                if state.fired {
                    drop(state);
                    self.shared.enqueue(task);
                } else {
                    state.parked.push(task);
                }
            }
            None => self.shared.enqueue(task),
        }
        completion
    }

    /// Block until `signal` fires.
    pub fn wait(&self, signal: &Signal) {
        signal.wait();
    }
}

impl Drop for Scheduler {
    /// Drains the run queue, then stops the workers.
    ///
    /// Tasks still parked on an unfired signal at this point are dropped
    /// without running; the renderer drains its chain before shutdown so
    /// this does not occur in normal operation.
    fn drop(&mut self) {
        // Set the flag under the queue lock: a worker between its check and
        // its wait still holds the lock, so the notify cannot get lost.
        {
            let _queue = self.shared.queue.lock();
            self.shared.shutdown.store(true, Ordering::Release);
        }
        self.shared.work_available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: &SchedulerShared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    break task;
                }
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                shared.work_available.wait(&mut queue);
            }
        };
        (task.run)();
        shared.fire(&task.completion);
    }
}
