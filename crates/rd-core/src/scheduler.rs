//! The single logical execution queue of a protocol instance
//!
//! All inbound frame dispatch is marshaled onto one scheduler so that frames
//! for the same entity are applied in wire order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, ReentrantMutex};

pub type Task = Box<dyn FnOnce() + Send>;

/// Execution queue
pub trait Scheduler: Send + Sync {
    /// Enqueue an action. Actions run one at a time, in queue order.
    fn queue(&self, action: Task);

    /// Whether the caller is currently executing on this queue
    fn is_active(&self) -> bool;

    fn name(&self) -> &str {
        "scheduler"
    }
}

/// Runs every action inline on the calling thread. Callers on different
/// threads take turns, so actions never overlap.
#[derive(Debug, Default)]
pub struct SynchronousScheduler {
    running: ReentrantMutex<()>,
}

impl SynchronousScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for SynchronousScheduler {
    fn queue(&self, action: Task) {
        let _running = self.running.lock();
        action();
    }

    fn is_active(&self) -> bool {
        self.running.is_owned_by_current_thread()
    }

    fn name(&self) -> &str {
        "synchronous"
    }
}

/// Queue drained explicitly by [`ManualScheduler::pump`]
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<VecDeque<Task>>,
    pumping: AtomicBool,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Run queued actions, including those enqueued while pumping.
    /// Returns the number of actions executed.
    pub fn pump(&self) -> usize {
        if self.pumping.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let mut executed = 0;
        loop {
            let next = self.queue.lock().pop_front();
            match next {
                Some(action) => {
                    action();
                    executed += 1;
                }
                None => break,
            }
        }
        self.pumping.store(false, Ordering::Release);
        executed
    }
}

impl Scheduler for ManualScheduler {
    fn queue(&self, action: Task) {
        self.queue.lock().push_back(action);
    }

    fn is_active(&self) -> bool {
        self.pumping.load(Ordering::Acquire)
    }

    fn name(&self) -> &str {
        "manual"
    }
}
