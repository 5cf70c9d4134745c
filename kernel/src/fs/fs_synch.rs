//! Per-directory (and free-map) synchronization.
//!
//! Every open directory, plus the free map, owns an `FsSynch`: the open file
//! backing it and a lock serializing all modifications of that file and its
//! header. The list finds them by header sector; its own lock is only held
//! around lookup and mutation.

use std::sync::Arc;

use spin::Mutex as SpinMutex;

use crate::fs::file_header::FileHeader;
use crate::sync::Lock;
use crate::thread::Scheduler;

use super::open_file::OpenFile;

pub struct FsSynch {
    file: OpenFile,
    sector: u32,
    lock: Lock,
}

impl FsSynch {
    pub fn new(sched: Arc<Scheduler>, file: OpenFile, sector: u32) -> Self {
        Self {
            file,
            sector,
            lock: Lock::new(sched, "directory"),
        }
    }

    pub fn file(&self) -> &OpenFile {
        &self.file
    }

    pub fn header(&self) -> Arc<SpinMutex<FileHeader>> {
        self.file.header()
    }

    pub fn sector(&self) -> u32 {
        self.sector
    }

    pub fn acquire_lock(&self) {
        self.lock.acquire();
    }

    pub fn release_lock(&self) {
        self.lock.release();
    }
}

pub struct FsSynchList {
    lock: Lock,
    list: SpinMutex<Vec<Arc<FsSynch>>>,
}

impl FsSynchList {
    pub fn new(sched: Arc<Scheduler>) -> Self {
        Self {
            lock: Lock::new(sched, "fs synch list"),
            list: SpinMutex::new(Vec::new()),
        }
    }

    pub fn acquire_lock(&self) {
        self.lock.acquire();
    }

    pub fn release_lock(&self) {
        self.lock.release();
    }

    pub fn add(&self, synch: Arc<FsSynch>) -> Arc<FsSynch> {
        assert!(self.lock.is_held_by_current_thread());
        self.list.lock().push(synch.clone());
        synch
    }

    pub fn get(&self, sector: u32) -> Option<Arc<FsSynch>> {
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
