//! The user-thread table: maps a `SpaceId` to the kernel thread running
//! that space, for `exec`/`join`.

use std::sync::Arc;

use spin::Mutex;

use crate::config::MAX_USER_THREADS;
use crate::thread::Thread;
use crate::vm::SpaceId;

enum Slot {
    Free,
    /// Id handed out, address space still under construction.
    Reserved,
    Bound(Arc<Thread>),
}

pub struct UserThreads {
    slots: Mutex<Vec<Slot>>,
}

impl UserThreads {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new((0..MAX_USER_THREADS).map(|_| Slot::Free).collect()),
        }
    }

    /// Claim an id before building the space, so the swap file can carry it.
    pub fn reserve(&self) -> Option<SpaceId> {
        let mut slots = self.slots.lock();
        let id = slots.iter().position(|slot| matches!(slot, Slot::Free))?;
        slots[id] = Slot::Reserved;
        Some(id)
    }

    pub fn bind(&self, id: SpaceId, thread: Arc<Thread>) {
        let mut slots = self.slots.lock();
        assert!(matches!(slots[id], Slot::Reserved));
        slots[id] = Slot::Bound(thread);
    }

    pub fn release(&self, id: SpaceId) {
        self.slots.lock()[id] = Slot::Free;
    }

    pub fn get(&self, id: SpaceId) -> Option<Arc<Thread>> {
        match self.slots.lock().get(id) {
            Some(Slot::Bound(thread)) => Some(thread.clone()),
            _ => None,
        }
    }
}

impl Default for UserThreads {
    fn default() -> Self {
        Self::new()
    }
}
