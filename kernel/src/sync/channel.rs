//! Synchronous rendezvous channel carrying one integer per exchange.

use std::sync::Arc;

use spin::Mutex;

use crate::thread::Scheduler;

use super::{Condition, Lock};

struct Slot {
    /// A receiver is parked and expecting a value.
    armed: bool,
    /// The value in flight from sender to receiver.
    message: Option<i32>,
}

/// One lock, three conditions:
///
/// - `receiver` — a sender waits here until some receiver has armed the slot;
/// - `sender` — the deposit/acknowledge handshake between the matched pair;
/// - `available` — extra receivers wait here until the slot frees up.
///
/// At most one send/receive pair is in progress at a time; additional
/// senders and receivers queue in FIFO order on their conditions.
pub struct Channel {
    name: &'static str,
    lock: Arc<Lock>,
    sender: Condition,
    receiver: Condition,
    available: Condition,
    slot: Mutex<Slot>,
}

impl Channel {
    pub fn new(sched: Arc<Scheduler>, name: &'static str) -> Self {
        let lock = Arc::new(Lock::new(sched, name));
        Self {
            name,
            sender: Condition::new("sender", lock.clone()),
            receiver: Condition::new("receiver", lock.clone()),
            available: Condition::new("available", lock.clone()),
            lock,
            slot: Mutex::new(Slot {
                armed: false,
                message: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Block until a receiver is parked, hand it `message`, and return once
    /// the receiver has acknowledged the handoff.
    pub fn send(&self, message: i32) {
        self.lock.acquire();

        while !self.slot.lock().armed {
            self.receiver.wait();
        }

        {
            let mut slot = self.slot.lock();
            slot.message = Some(message);
            slot.armed = false;
        }
        self.sender.signal();

        // Wait for the receiver to take the value.
        self.sender.wait();

        self.available.signal();
        self.lock.release();
    }

    /// Block until no other receiver is parked, arm the slot, and return the
    /// value a sender deposits.
    pub fn receive(&self) -> i32 {
        self.lock.acquire();

        while self.slot.lock().armed {
            self.available.wait();
        }
        self.slot.lock().armed = true;

        self.receiver.signal();

        // Wait for the deposit.
        self.sender.wait();
        let message = self
            .slot
            .lock()
            .message
            .take()
            .expect("rendezvous completed without a message");

        // Acknowledge the handoff: signal one queued sender, if any. The
        // FIFO queue guarantees the matched sender (which parked first)
        // wakes before any newly queued one.
        self.sender.signal();

        self.lock.release();
        message
    }
}
