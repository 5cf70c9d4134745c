//! Synchronous disk access.
//!
//! The raw device completes a request by raising an interrupt that posts the
//! completion semaphore; one lock serializes requests so only one is
//! outstanding at a time. In this simulation the completion is posted by the
//! requesting thread itself right after the device call — the blocking
//! structure is the same, only the timing model is degenerate.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use machine::{SectorDevice, Statistics, SECTOR_SIZE};

use crate::sync::{Lock, Semaphore};
use crate::thread::Scheduler;

pub struct SynchDisk {
    device: Arc<dyn SectorDevice>,
    lock: Lock,
    done: Semaphore,
    stats: Arc<Statistics>,
}

impl SynchDisk {
    pub fn new(sched: Arc<Scheduler>, device: Arc<dyn SectorDevice>) -> Self {
        let stats = sched.machine().stats.clone();
        Self {
            device,
            lock: Lock::new(sched.clone(), "synch disk"),
            done: Semaphore::new(sched, "disk done", 0),
            stats,
        }
    }

    pub fn read_sector(&self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) {
        self.lock.acquire();
        self.device.read_sector(sector as usize, buf);
        self.done.v(); // the completion interrupt
        self.done.p();
        self.stats.num_disk_reads.fetch_add(1, Ordering::Relaxed);
        self.lock.release();
    }

    pub fn write_sector(&self, sector: u32, buf: &[u8; SECTOR_SIZE]) {
        self.lock.acquire();
        self.device.write_sector(sector as usize, buf);
        self.done.v();
        self.done.p();
        self.stats.num_disk_writes.fetch_add(1, Ordering::Relaxed);
        self.lock.release();
    }

    /// Zero a sector, used when a header sector is released.
    pub fn clear_sector(&self, sector: u32) {
        self.write_sector(sector, &[0u8; SECTOR_SIZE]);
    }
}
