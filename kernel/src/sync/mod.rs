//! Thread synchronization primitives.
//!
//! The semaphore is the only primitive that touches the interrupt mask; the
//! lock, the condition variable and the channel are built on top of it and
//! inherit atomicity without masking anything themselves.

mod channel;
mod condvar;
mod lock;
mod semaphore;

pub use self::{channel::Channel, condvar::Condition, lock::Lock, semaphore::Semaphore};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use machine::{Machine, Statistics, DEFAULT_PHYS_PAGES};
    use spin::Mutex;

    use super::*;
    use crate::config::DEFAULT_PRIORITY;
    use crate::thread::Scheduler;

    fn scheduler() -> Arc<Scheduler> {
        let stats = Arc::new(Statistics::new());
        let machine = Arc::new(Machine::new(DEFAULT_PHYS_PAGES, stats));
        Scheduler::new(machine)
    }

    #[test]
    fn semaphore_wakeup_is_fifo() {
        let sched = scheduler();
        let sem = Arc::new(Semaphore::new(sched.clone(), "fifo", 0));
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut parked = Vec::new();
        for i in 0..3 {
            let sem = sem.clone();
            let order = order.clone();
            parked.push(sched.fork(&format!("waiter-{}", i), DEFAULT_PRIORITY, true, move || {
                sem.p();
                order.lock().push(i);
            }));
        }
        // Let all three park in arrival order before posting.
        sched.yield_now();

        for _ in 0..3 {
            sem.v();
        }
        for thread in &parked {
            thread.join();
        }
        assert_eq!(&*order.lock(), &[0, 1, 2]);
    }

    #[test]
    fn lock_is_not_recursive() {
        let sched = scheduler();
        let lock = Arc::new(Lock::new(sched.clone(), "outer"));
        lock.acquire();
        assert!(lock.is_held_by_current_thread());
        lock.release();
        assert!(!lock.is_held_by_current_thread());
    }

    #[test]
    fn lock_donates_priority_to_holder() {
        let sched = scheduler();
        let lock = Arc::new(Lock::new(sched.clone(), "donated"));

        lock.acquire();
        let waiter = {
            let lock = lock.clone();
            sched.fork("waiter", DEFAULT_PRIORITY + 2, true, move || {
                lock.acquire();
                lock.release();
            })
        };
        // The higher-priority waiter preempts us at the yield, contends, and
        // donates its priority before blocking.
        sched.yield_now();
        assert_eq!(sched.current().priority(), DEFAULT_PRIORITY + 2);

        lock.release();
        // Release restores our own priority.
        assert_eq!(sched.current().priority(), DEFAULT_PRIORITY);
        waiter.join();
    }

    #[test]
    fn condition_producer_consumer() {
        const SLOTS: usize = 4;
        const ITEMS: i32 = 20;

        let sched = scheduler();
        let lock = Arc::new(Lock::new(sched.clone(), "buffer"));
        let not_full = Arc::new(Condition::new("not full", lock.clone()));
        let not_empty = Arc::new(Condition::new("not empty", lock.clone()));
        let buffer = Arc::new(Mutex::new(Vec::new()));

        let producer = {
            let (lock, not_full, not_empty, buffer) = (
                lock.clone(),
                not_full.clone(),
                not_empty.clone(),
                buffer.clone(),
            );
            sched.fork("producer", DEFAULT_PRIORITY, true, move || {
                for item in 0..ITEMS {
                    lock.acquire();
                    while buffer.lock().len() == SLOTS {
                        not_full.wait();
                    }
                    buffer.lock().push(item);
                    not_empty.signal();
                    lock.release();
                }
            })
        };

        let consumed = Arc::new(Mutex::new(Vec::new()));
        let consumer = {
            let (lock, not_full, not_empty, buffer, consumed) = (
                lock.clone(),
                not_full.clone(),
                not_empty.clone(),
                buffer.clone(),
                consumed.clone(),
            );
            sched.fork("consumer", DEFAULT_PRIORITY, true, move || {
                for _ in 0..ITEMS {
                    lock.acquire();
                    while buffer.lock().is_empty() {
                        not_empty.wait();
                    }
                    let item = buffer.lock().remove(0);
                    consumed.lock().push(item);
                    not_full.signal();
                    lock.release();
                }
            })
        };

        producer.join();
        consumer.join();
        assert_eq!(&*consumed.lock(), &(0..ITEMS).collect::<Vec<_>>());
    }

    #[test]
    fn channel_round_trip() {
        let sched = scheduler();
        let channel = Arc::new(Channel::new(sched.clone(), "rendezvous"));

        let sender = {
            let channel = channel.clone();
            sched.fork("sender", DEFAULT_PRIORITY, true, move || {
                channel.send(42);
            })
        };
        assert_eq!(channel.receive(), 42);
        sender.join();
    }

    #[test]
    fn channel_signals_one_queued_sender() {
        let sched = scheduler();
        let channel = Arc::new(Channel::new(sched.clone(), "queued"));

        let mut senders = Vec::new();
        for value in [7, 8] {
            let channel = channel.clone();
            senders.push(sched.fork("sender", DEFAULT_PRIORITY, true, move || {
                channel.send(value);
            }));
        }
        sched.yield_now(); // both senders queue on the receiver condition

        // Each receive completes exactly one rendezvous, in sender FIFO order.
        assert_eq!(channel.receive(), 7);
        assert_eq!(channel.receive(), 8);
        for sender in senders {
            sender.join();
        }
    }

    #[test]
    fn yield_round_robin() {
        let sched = scheduler();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut threads = Vec::new();
        for name in ["first", "second"] {
            let log = log.clone();
            let sched2 = sched.clone();
            threads.push(sched.fork(name, DEFAULT_PRIORITY, true, move || {
                for round in 0..3 {
                    log.lock().push((name, round));
                    sched2.yield_now();
                }
            }));
        }
        for thread in threads {
            thread.join();
        }
        let log = log.lock();
        assert_eq!(log.len(), 6);
        // The two threads strictly alternate under FIFO scheduling.
        for pair in log.chunks(2) {
            assert_eq!(pair[0].1, pair[1].1);
        }
    }
}
