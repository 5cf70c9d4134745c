//! Mutual-exclusion lock with single-hop priority donation.

use std::sync::Arc;

use spin::Mutex;

use crate::thread::{Scheduler, Thread};

use super::Semaphore;

/// A non-recursive mutex built on a binary semaphore plus an owner field.
///
/// On contention, a waiter with higher effective priority than the holder
/// donates its priority so the holder cannot be starved off the processor
/// while inside the critical section. Donation is deliberately single-hop:
/// it does not chain through a holder that is itself blocked on another
/// lock.
pub struct Lock {
    name: &'static str,
    sched: Arc<Scheduler>,
    sem: Semaphore,
    owner: Mutex<Option<Arc<Thread>>>,
}

impl Lock {
    pub fn new(sched: Arc<Scheduler>, name: &'static str) -> Self {
        Self {
            name,
            sched: sched.clone(),
            sem: Semaphore::new(sched, name, 1),
            owner: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn acquire(&self) {
        assert!(
            !self.is_held_by_current_thread(),
            "lock `{}` acquired twice by `{}`",
            self.name,
            self.sched.current().name()
        );

        let me = self.sched.current();
        {
            let owner = self.owner.lock();
            if let Some(holder) = owner.as_ref() {
                if holder.priority() < me.priority() {
                    holder.donate_priority(me.priority());
                }
            }
        }

        self.sem.p();

        *self.owner.lock() = Some(me);
    }

    pub fn release(&self) {
        assert!(
            self.is_held_by_current_thread(),
            "lock `{}` released by non-owner `{}`",
            self.name,
            self.sched.current().name()
        );

        self.sched.current().restore_priority();
        *self.owner.lock() = None;
        self.sem.v();
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        let owner = self.owner.lock();
        match owner.as_ref() {
            Some(holder) => Arc::ptr_eq(holder, &self.sched.current()),
            None => false,
        }
    }

    pub(crate) fn scheduler(&self) -> &Arc<Scheduler> {
        &self.sched
    }
}
