//! Per-file synchronization for open regular files: readers–writers
//! coordination with writer preference, the open refcount, and the
//! mark-for-removal flag behind deferred deletion.

use std::sync::Arc;

use spin::Mutex as SpinMutex;

use crate::fs::file_header::FileHeader;
use crate::sync::{Condition, Lock};
use crate::thread::Scheduler;

use super::synch_disk::SynchDisk;

struct State {
    opened: u32,
    being_removed: bool,
    reading: u32,
    writing: bool,
    waiting_to_write: u32,
}

/// Exists exactly while the file is open by at least one thread; all its
/// openers share the header cached here, so an expansion by one is seen by
/// all.
pub struct FileSynch {
    path: String,
    sector: u32,
    header: Arc<SpinMutex<FileHeader>>,
    lock: Arc<Lock>,
    cond: Condition,
    state: SpinMutex<State>,
}

impl FileSynch {
    /// Created on the first successful open; the creator counts as the
    /// first opener.
    pub fn new(sched: Arc<Scheduler>, disk: &SynchDisk, path: &str, sector: u32) -> Self {
        let lock = Arc::new(Lock::new(sched, "file"));
        Self {
            path: path.to_string(),
            sector,
            header: Arc::new(SpinMutex::new(FileHeader::fetch_from(disk, sector))),
            cond: Condition::new("read/write", lock.clone()),
            lock,
            state: SpinMutex::new(State {
                opened: 1,
                being_removed: false,
                reading: 0,
                writing: false,
                waiting_to_write: 0,
            }),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn sector(&self) -> u32 {
        self.sector
    }

    pub fn header(&self) -> Arc<SpinMutex<FileHeader>> {
        self.header.clone()
    }

    /// Count another opener. Returns false when the file is marked for
    /// removal, in which case the open must fail.
    pub fn file_opened(&self) -> bool {
        self.lock.acquire();
        let mut state = self.state.lock();
        let ok = !state.being_removed;
        if ok {
            state.opened += 1;
        }
        drop(state);
        self.lock.release();
        ok
    }

    /// Count a close; true when this was the last opener.
    pub fn file_closed(&self) -> bool {
        self.lock.acquire();
        let mut state = self.state.lock();
        assert!(state.opened > 0);
        state.opened -= 1;
        let all_closed = state.opened == 0;
        drop(state);
        self.lock.release();
        all_closed
    }

    pub fn set_to_remove(&self) {
        self.lock.acquire();
        self.state.lock().being_removed = true;
        self.lock.release();
    }

    /// The file can be physically deleted: marked, and nobody has it open.
    pub fn ready_to_remove(&self) -> bool {
        self.lock.acquire();
        let state = self.state.lock();
        let ready = state.being_removed && state.opened == 0;
        drop(state);
        self.lock.release();
        ready
    }

    /// Wait until no writer is active *and none is waiting* — a declared
    /// writer keeps new readers out so a reader stream cannot starve it.
    pub fn begin_reading(&self) {
        self.lock.acquire();
        loop {
            {
                let mut state = self.state.lock();
                if !state.writing && state.waiting_to_write == 0 {
                    state.reading += 1;
                    break;
                }
            }
            self.cond.wait();
        }
        self.lock.release();
    }

    pub fn finish_reading(&self) {
        self.lock.acquire();
        let mut state = self.state.lock();
        assert!(state.reading > 0);
        state.reading -= 1;
        let last_reader = state.reading == 0;
        drop(state);
        if last_reader {
            self.cond.broadcast();
        }
        self.lock.release();
    }

    pub fn begin_writing(&self) {
        self.lock.acquire();
        self.state.lock().waiting_to_write += 1;
        loop {
            {
                let mut state = self.state.lock();
                if !state.writing && state.reading == 0 {
                    state.waiting_to_write -= 1;
                    state.writing = true;
                    break;
                }
            }
            self.cond.wait();
        }
        self.lock.release();
    }

    pub fn finish_writing(&self) {
        self.lock.acquire();
        {
            let mut state = self.state.lock();
            assert!(state.writing);
            state.writing = false;
        }
        self.cond.broadcast();
        self.lock.release();
    }
}

pub struct FileSynchList {
    lock: Lock,
    list: SpinMutex<Vec<Arc<FileSynch>>>,
}

impl FileSynchList {
    pub fn new(sched: Arc<Scheduler>) -> Self {
        Self {
            lock: Lock::new(sched, "file synch list"),
            list: SpinMutex::new(Vec::new()),
        }
    }

    pub fn acquire_lock(&self) {
        self.lock.acquire();
    }

    pub fn release_lock(&self) {
        self.lock.release();
    }

    pub fn add(&self, synch: Arc<FileSynch>) {
        assert!(self.lock.is_held_by_current_thread());
        self.list.lock().push(synch);
    }

    pub fn get(&self, sector: u32) -> Option<Arc<FileSynch>> {
        assert!(self.lock.is_held_by_current_thread());
        self.list
            .lock()
            .iter()
            .find(|synch| synch.sector == sector)
            .cloned()
    }

    pub fn remove(&self, sector: u32) {
        assert!(self.lock.is_held_by_current_thread());
        self.list.lock().retain(|synch| synch.sector != sector);
    }
}
