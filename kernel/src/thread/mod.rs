//! Kernel threads.
//!
//! Each kernel thread is carried by a host thread, but the [`Scheduler`]
//! hands a single baton between them, so at most one kernel thread executes
//! at any instant — the uniprocessor the synchronization primitives assume.
//! A thread blocks by parking on its gate and runs again when another thread
//! (or the scheduler) opens it.

mod scheduler;

pub use scheduler::Scheduler;

use std::sync::{Condvar, Mutex as HostMutex};

use machine::{Registers, NUM_TOTAL_REGS};
use spin::Mutex;

use crate::config::DEFAULT_PRIORITY;
use crate::fs::{OpenFile, ROOT_DIRECTORY_SECTOR};
use crate::sync::Semaphore;
use crate::vm::{AddressSpace, SpaceId};
use std::sync::Arc;

/// The baton. `park` blocks the host thread until someone `unpark`s it; an
/// unpark that arrives first is remembered, so the handoff has no lost-wakeup
/// window.
pub(crate) struct Gate {
    runnable: HostMutex<bool>,
    cond: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            runnable: HostMutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn park(&self) {
        let mut runnable = self.runnable.lock().unwrap();
        while !*runnable {
            runnable = self.cond.wait(runnable).unwrap();
        }
        *runnable = false;
    }

    pub(crate) fn unpark(&self) {
        *self.runnable.lock().unwrap() = true;
        self.cond.notify_one();
    }
}

struct PriorityState {
    base: u32,
    effective: u32,
}

/// Join plumbing: a joinable thread publishes its exit status through a
/// 0-semaphore that `finish` posts exactly once.
pub(crate) struct JoinState {
    pub(crate) sem: Option<Semaphore>,
    pub(crate) status: Mutex<Option<i32>>,
}

pub struct Thread {
    name: String,
    pub(crate) gate: Gate,
    priority: Mutex<PriorityState>,
    pub(crate) join: JoinState,

    // User-program state; untouched for plain kernel threads.
    user_regs: Mutex<[i32; NUM_TOTAL_REGS]>,
    space: Mutex<Option<Arc<AddressSpace>>>,
    space_id: Mutex<Option<SpaceId>>,
    files: Mutex<Vec<Option<Arc<OpenFile>>>>,
    current_dir: Mutex<u32>,
}

impl Thread {
    pub(crate) fn new(name: &str, priority: u32, join_sem: Option<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            gate: Gate::new(),
            priority: Mutex::new(PriorityState {
                base: priority,
                effective: priority,
            }),
            join: JoinState {
                sem: join_sem,
                status: Mutex::new(None),
            },
            user_regs: Mutex::new([0; NUM_TOTAL_REGS]),
            space: Mutex::new(None),
            space_id: Mutex::new(None),
            files: Mutex::new(vec![None; crate::config::MAX_OPEN_FILES]),
            current_dir: Mutex::new(ROOT_DIRECTORY_SECTOR),
        })
    }

    pub(crate) fn new_main() -> Arc<Self> {
        Self::new("main", DEFAULT_PRIORITY, None)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective scheduling priority, including any donation.
    pub fn priority(&self) -> u32 {
        self.priority.lock().effective
    }

    pub fn base_priority(&self) -> u32 {
        self.priority.lock().base
    }

    /// Raise the effective priority on behalf of a higher-priority waiter.
    /// Never lowers it, so nested donations keep the highest one.
    pub fn donate_priority(&self, priority: u32) {
        let mut p = self.priority.lock();
        if priority > p.effective {
            log::debug!(
                "thread `{}` priority raised {} -> {} by donation",
                self.name,
                p.effective,
                priority
            );
            p.effective = priority;
        }
    }

    /// Drop back to the thread's own priority. Idempotent.
    pub fn restore_priority(&self) {
        let mut p = self.priority.lock();
        p.effective = p.base;
    }

    pub fn can_join(&self) -> bool {
        self.join.sem.is_some()
    }

    /// Block until this thread finishes and return its exit status.
    pub fn join(&self) -> i32 {
        let sem = self.join.sem.as_ref().expect("thread is not joinable");
        sem.p();
        let status = *self.join.status.lock();
        status.expect("joined a thread with no exit status")
    }

    pub fn exit_status(&self) -> Option<i32> {
        *self.join.status.lock()
    }

    // --- user-program state ---

    pub fn space(&self) -> Option<Arc<AddressSpace>> {
        self.space.lock().clone()
    }

    pub fn set_space(&self, space: Arc<AddressSpace>, id: SpaceId) {
        *self.space.lock() = Some(space);
        *self.space_id.lock() = Some(id);
    }

    pub fn take_space(&self) -> Option<Arc<AddressSpace>> {
        *self.space_id.lock() = None;
        self.space.lock().take()
    }

    pub fn space_id(&self) -> Option<SpaceId> {
        *self.space_id.lock()
    }

    pub(crate) fn save_user_regs(&self, regs: &Registers) {
        *self.user_regs.lock() = regs.save();
    }

    pub(crate) fn restore_user_regs(&self, regs: &Registers) {
        regs.restore(&self.user_regs.lock());
    }

    /// Header sector of the thread's current directory.
    pub fn current_dir(&self) -> u32 {
        *self.current_dir.lock()
    }

    pub fn set_current_dir(&self, sector: u32) {
        *self.current_dir.lock() = sector;
    }

    /// Bind an open file to the first free descriptor (ids 0 and 1 belong to
    /// the console). Fails when the table is full.
    pub fn add_file(&self, file: Arc<OpenFile>) -> Option<usize> {
        let mut files = self.files.lock();
        for (fid, slot) in files.iter_mut().enumerate().skip(2) {
            if slot.is_none() {
                *slot = Some(file);
                return Some(fid);
            }
        }
        None
    }

    pub fn get_file(&self, fid: usize) -> Option<Arc<OpenFile>> {
        self.files.lock().get(fid).cloned().flatten()
    }

    pub fn remove_file(&self, fid: usize) -> Option<Arc<OpenFile>> {
        if fid < 2 {
            return None;
        }
        self.files.lock().get_mut(fid).and_then(Option::take)
    }

    /// Drop every open file, releasing their headers. Called on exit.
    pub fn close_all_files(&self) {
        let files: Vec<_> = self.files.lock().iter_mut().map(Option::take).collect();
        drop(files);
    }
}
