//! The coremap: physical-frame allocation plus second-chance eviction.
//!
//! For every allocated frame the coremap records which `(space, vpn)` is
//! resident there; the invariant is that the owning page-table entry has
//! that frame and is valid. A rotating victim cursor implements the clock:
//! frames whose entries were recently used get their use bit cleared and a
//! second chance, so selection terminates within two sweeps of the ring.

use machine::Machine;
use spin::Mutex;

use crate::fs::Bitmap;

use super::{SpaceId, Vm};

struct Inner {
    free: Bitmap,
    owners: Vec<Option<(SpaceId, u32)>>,
    victim: usize,
}

pub struct Coremap {
    num_phys_pages: usize,
    inner: Mutex<Inner>,
}

impl Coremap {
    pub fn new(num_phys_pages: usize) -> Self {
        Self {
            num_phys_pages,
            inner: Mutex::new(Inner {
                free: Bitmap::new(num_phys_pages),
                owners: vec![None; num_phys_pages],
                victim: 0,
            }),
        }
    }

    pub fn count_free(&self) -> usize {
        self.inner.lock().free.count_clear()
    }

    /// Reserve a frame for `(space, vpn)`. The caller has ensured a frame is
    /// free, either by checking or by evicting one.
    pub fn find(&self, space: SpaceId, vpn: u32) -> u32 {
        let mut inner = self.inner.lock();
        let frame = inner
            .free
            .find()
            .expect("coremap.find with no free frame");
        inner.owners[frame] = Some((space, vpn));
        frame as u32
    }

    /// Release one frame at space teardown or explicit unmap.
    pub fn release(&self, frame: u32) {
        let mut inner = self.inner.lock();
        inner.free.clear(frame as usize);
        inner.owners[frame as usize] = None;
    }

    /// Does the coremap agree that `(space, vpn)` currently occupies
    /// `frame`? Guards every path that trusts a possibly stale
    /// `physical_page` field.
    pub fn in_memory(&self, space: SpaceId, vpn: u32, frame: u32) -> bool {
        if frame as usize >= self.num_phys_pages {
            return false;
        }
        self.inner.lock().owners[frame as usize] == Some((space, vpn))
    }

    /// Evict the clock's victim: write it to its swap file and free the
    /// frame.
    pub fn free_page(&self, vm: &Vm, machine: &Machine) {
        self.update_victim(vm);

        let (space, vpn) = {
            let mut inner = self.inner.lock();
            let victim = inner.victim;
            inner.free.clear(victim);
            inner.owners[victim].expect("victim frame has no owner")
        };

        let space = vm.space(space).expect("victim's space vanished");
        space.save_to_swap(vpn, machine);
    }

    /// Advance the victim cursor past every recently used frame, clearing
    /// use bits as it goes. Terminates in at most two laps: a cleared bit is
    /// not set again while we hold the processor.
    fn update_victim(&self, vm: &Vm) {
        let mut inner = self.inner.lock();
        loop {
            inner.victim = (inner.victim + 1) % self.num_phys_pages;
            let Some((space, vpn)) = inner.owners[inner.victim] else {
                break; // unowned frame: nobody to give a second chance
            };
            let Some(space) = vm.space(space) else {
                break;
            };
            if !space.test_and_clear_use(vpn) {
                break;
            }
        }
    }

    /// Propagate a dirty bit from an evicted TLB line into the resident
    /// page's table entry — but only if the frame still holds that page, so
    /// a racing `save_to_swap` cannot resurrect a stale mapping.
    pub fn update_entry(&self, vm: &Vm, frame: u32) {
        let owner = {
            let inner = self.inner.lock();
            inner.owners.get(frame as usize).copied().flatten()
        };
        if let Some((space_id, vpn)) = owner {
            if let Some(space) = vm.space(space_id) {
                space.mark_dirty_if_resident(vpn, frame);
            }
        }
    }

    /// Frames owned by `space`, for teardown.
    pub fn frames_of(&self, space: SpaceId) -> Vec<u32> {
        let inner = self.inner.lock();
        inner
            .owners
            .iter()
            .enumerate()
            .filter(|(_, owner)| matches!(owner, Some((id, _)) if *id == space))
            .map(|(frame, _)| frame as u32)
            .collect()
    }
}

impl Coremap {
    /// Owner listing for assertions in tests.
    pub fn owner_of(&self, frame: u32) -> Option<(SpaceId, u32)> {
        self.inner.lock().owners.get(frame as usize).copied().flatten()
    }
}
