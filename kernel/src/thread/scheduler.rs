//! The scheduler: a ready list plus the baton handoff that keeps exactly one
//! kernel thread running.
//!
//! The ready list pops the highest effective priority first (FIFO among
//! equals), which is what makes priority donation observable. Context
//! switches save and restore per-thread machine state: the user registers
//! and, for threads with an address space, the TLB bookkeeping.

use std::collections::VecDeque;
use std::sync::Arc;

use machine::{Interrupt, Machine};
use spin::Mutex;

use super::Thread;
use crate::sync::Semaphore;

struct Inner {
    ready: VecDeque<Arc<Thread>>,
    current: Arc<Thread>,
}

pub struct Scheduler {
    machine: Arc<Machine>,
    inner: Mutex<Inner>,
}

impl Scheduler {
    /// Create the scheduler and adopt the calling host thread as the kernel's
    /// `main` thread, which is running by definition.
    pub fn new(machine: Arc<Machine>) -> Arc<Self> {
        let main = Thread::new_main();
        Arc::new(Self {
            machine,
            inner: Mutex::new(Inner {
                ready: VecDeque::new(),
                current: main,
            }),
        })
    }

    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.machine.interrupt
    }

    /// The one thread holding the baton. Since callers are kernel code, the
    /// answer is always the caller's own thread.
    pub fn current(&self) -> Arc<Thread> {
        self.inner.lock().current.clone()
    }

    /// Put a thread on the ready list; it keeps its FIFO position among
    /// threads of equal effective priority.
    pub fn ready_to_run(&self, thread: Arc<Thread>) {
        self.inner.lock().ready.push_back(thread);
    }

    /// Fork a new kernel thread running `body`. The thread is readied
    /// immediately; `body` runs once the baton reaches it. A thread whose
    /// body returns finishes with status 0.
    pub fn fork(
        self: &Arc<Self>,
        name: &str,
        priority: u32,
        can_join: bool,
        body: impl FnOnce() + Send + 'static,
    ) -> Arc<Thread> {
        let join_sem = can_join.then(|| Semaphore::new(self.clone(), "join", 0));
        let thread = Thread::new(name, priority, join_sem);
        self.ready_to_run(thread.clone());

        let sched = self.clone();
        let carrier = thread.clone();
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                carrier.gate.park();
                body();
                sched.finish_current(0);
            })
            .expect("failed to spawn host thread");
        thread
    }

    /// Give up the processor but stay runnable.
    pub fn yield_now(&self) {
        self.switch(true);
    }

    /// Block the current thread. The caller must already have queued itself
    /// wherever its wake-up will come from; a wake-up that arrives between
    /// queueing and this call is remembered by the gate.
    pub fn sleep(&self) {
        self.switch(false);
    }

    /// Terminate the current thread, publishing `status` to a joiner if there
    /// is one. Never returns; the carrying host thread parks forever.
    pub fn finish_current(&self, status: i32) -> ! {
        let prev = self.current();
        log::debug!("thread `{}` finishing with status {}", prev.name(), status);
        *prev.join.status.lock() = Some(status);
        if let Some(sem) = &prev.join.sem {
            sem.v();
        }

        let next = {
            let mut inner = self.inner.lock();
            let next = Self::pop_best(&mut inner.ready)
                .expect("no ready threads: the last runnable thread finished");
            inner.current = next.clone();
            next
        };
        self.restore_state(&next);
        next.gate.unpark();
        loop {
            // Nothing will ever open this gate again.
            prev.gate.park();
        }
    }

    fn switch(&self, requeue: bool) {
        let (prev, next) = {
            let mut inner = self.inner.lock();
            let prev = inner.current.clone();
            if requeue {
                inner.ready.push_back(prev.clone());
            }
            let next = Self::pop_best(&mut inner.ready)
                .expect("no ready threads: all threads are blocked (deadlock)");
            inner.current = next.clone();
            (prev, next)
        };
        if Arc::ptr_eq(&prev, &next) {
            return; // yielded with nobody else ready
        }
        self.save_state(&prev);
        self.restore_state(&next);
        next.gate.unpark();
        prev.gate.park();
    }

    /// First thread with the highest effective priority.
    fn pop_best(ready: &mut VecDeque<Arc<Thread>>) -> Option<Arc<Thread>> {
        if ready.is_empty() {
            return None;
        }
        let mut best = 0;
        for i in 1..ready.len() {
            if ready[i].priority() > ready[best].priority() {
                best = i;
            }
        }
        ready.remove(best)
    }

    fn save_state(&self, thread: &Arc<Thread>) {
        if let Some(space) = thread.space() {
            thread.save_user_regs(&self.machine.regs);
            space.save_state(&self.machine);
        }
    }

    fn restore_state(&self, thread: &Arc<Thread>) {
        if let Some(space) = thread.space() {
            thread.restore_user_regs(&self.machine.regs);
            space.restore_state(&self.machine);
        }
    }
}
