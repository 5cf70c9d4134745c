//! Counting semaphore with a FIFO wait queue.

use std::collections::VecDeque;
use std::sync::Arc;

use machine::IntLevel;
use spin::Mutex;

use crate::thread::{Scheduler, Thread};

struct Inner {
    value: usize,
    queue: VecDeque<Arc<Thread>>,
}

pub struct Semaphore {
    name: &'static str,
    sched: Arc<Scheduler>,
    inner: Mutex<Inner>,
}

impl Semaphore {
    pub fn new(sched: Arc<Scheduler>, name: &'static str, initial: usize) -> Self {
        Self {
            name,
            sched,
            inner: Mutex::new(Inner {
                value: initial,
                queue: VecDeque::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Wait until the value is positive, then decrement.
    ///
    /// Checking and decrementing must be atomic, so the simulated interrupt
    /// is masked around the critical section and the *prior* level restored
    /// on exit — `v` may legitimately be called with interrupts already off.
    pub fn p(&self) {
        let old_level = self.sched.interrupt().set_level(IntLevel::Off);

        loop {
            let mut inner = self.inner.lock();
            if inner.value > 0 {
                inner.value -= 1;
                break;
            }
            inner.queue.push_back(self.sched.current());
            drop(inner);
            // Nobody else can run between the enqueue above and this sleep:
            // the baton is still ours.
            self.sched.sleep();
        }

        self.sched.interrupt().set_level(old_level);
    }

    /// Increment, waking the longest-waiting thread if there is one.
    pub fn v(&self) {
        let old_level = self.sched.interrupt().set_level(IntLevel::Off);

        let mut inner = self.inner.lock();
        if let Some(thread) = inner.queue.pop_front() {
            self.sched.ready_to_run(thread);
        }
        inner.value += 1;
        drop(inner);

        self.sched.interrupt().set_level(old_level);
    }
}
