//! Condition variable with Mesa semantics.

use std::collections::VecDeque;
use std::sync::Arc;

use spin::Mutex;

use super::{Lock, Semaphore};

/// Each waiter parks on its own fresh 0-semaphore; signalling pops queue
/// order, so wake-up is FIFO. The signaller keeps the lock — a woken thread
/// must re-check its predicate after reacquiring it.
pub struct Condition {
    name: &'static str,
    lock: Arc<Lock>,
    queue: Mutex<VecDeque<Arc<Semaphore>>>,
}

impl Condition {
    pub fn new(name: &'static str, lock: Arc<Lock>) -> Self {
        Self {
            name,
            lock,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Release the lock, wait to be signalled, reacquire the lock.
    pub fn wait(&self) {
        assert!(
            self.lock.is_held_by_current_thread(),
            "condition `{}` waited on without holding `{}`",
            self.name,
            self.lock.name()
        );

        let sem = Arc::new(Semaphore::new(self.lock.scheduler().clone(), "waiter", 0));
        self.queue.lock().push_back(sem.clone());

        self.lock.release();
        sem.p();
        self.lock.acquire();
    }

    /// Wake the longest waiter, if any.
    pub fn signal(&self) {
        assert!(self.lock.is_held_by_current_thread());
        if let Some(sem) = self.queue.lock().pop_front() {
            sem.v();
        }
    }

    /// Wake every waiter.
    pub fn broadcast(&self) {
        assert!(self.lock.is_held_by_current_thread());
        let mut queue = self.queue.lock();
        while let Some(sem) = queue.pop_front() {
            sem.v();
        }
    }
}
