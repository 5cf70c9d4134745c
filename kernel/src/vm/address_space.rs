//! Per-process address spaces.
//!
//! With demand paging on, a space starts with an all-invalid page table, its
//! executable stays open for its whole life, and a private swap file of
//! exactly `num_pages * PAGE_SIZE` bytes backs evicted pages. Without the
//! TLB, every page is pre-populated from the executable at construction and
//! the linear table is handed to the MMU on each context switch.

use std::sync::Arc;

use machine::{EntryFlags, Machine, TranslationEntry, NO_PHYS_PAGE, PAGE_SIZE, STACK_REG};
use spin::Mutex;

use crate::config::USER_STACK_SIZE;
use crate::fs::{FileSystem, OpenFile};
use crate::userprog::Executable;
use crate::KernelConfig;

use super::{SpaceId, Vm};

pub struct AddressSpace {
    space_id: SpaceId,
    num_pages: usize,
    page_table: Mutex<Vec<TranslationEntry>>,
    /// Kept open across the space's lifetime while demand paging.
    exec: Mutex<Option<Executable>>,
    swap_file: Mutex<Option<Arc<OpenFile>>>,
    swap_path: Option<String>,
    code_addr: usize,
    code_size: usize,
    init_data_addr: usize,
    init_data_size: usize,
}

impl AddressSpace {
    /// Build the space for an executable. Demand paging defers all loading
    /// to the first fault on each page; otherwise the whole image is copied
    /// in here and the table is valid from the start.
    pub fn new(
        machine: &Arc<Machine>,
        fs: &Arc<FileSystem>,
        vm: &Arc<Vm>,
        config: &KernelConfig,
        exec_file: Arc<OpenFile>,
        space_id: SpaceId,
    ) -> Option<Arc<Self>> {
        let exe = Executable::new(exec_file)?;

        let size = exe.size() + USER_STACK_SIZE;
        let num_pages = size.div_ceil(PAGE_SIZE);
        log::debug!(
            "initializing address space {}: {} pages, {} bytes",
            space_id,
            num_pages,
            num_pages * PAGE_SIZE
        );

        if !config.vmem {
            // Without swap there is no eviction; the whole space must fit.
            assert!(
                num_pages <= vm.coremap.count_free(),
                "program too big for physical memory"
            );
        }

        let mut table = Vec::with_capacity(num_pages);
        for vpn in 0..num_pages {
            let mut entry = TranslationEntry::invalid();
            entry.virtual_page = vpn as u32;
            if !config.use_tlb {
                entry.physical_page = vm.coremap.find(space_id, vpn as u32);
                entry.set(EntryFlags::VALID, true);
            }
            table.push(entry);
        }

        let swap_path = config.vmem.then(|| format!("/SWAP.{}", space_id));
        let swap_file = match &swap_path {
            Some(path) => {
                fs.create(path, num_pages * PAGE_SIZE, false).ok()?;
                Some(fs.open(path).ok()?)
            }
            None => None,
        };

        let space = Arc::new(Self {
            space_id,
            num_pages,
            page_table: Mutex::new(table),
            code_addr: exe.code_addr(),
            code_size: exe.code_size(),
            init_data_addr: exe.init_data_addr(),
            init_data_size: exe.init_data_size(),
            exec: Mutex::new(Some(exe)),
            swap_file: Mutex::new(swap_file),
            swap_path,
        });

        if !config.use_tlb {
            // Copy code and data in now; untouched pages stay zero.
            for vpn in 0..num_pages {
                let frame = space.page_table.lock()[vpn].physical_page;
                space.fill_frame_from_executable(vpn, frame, machine);
            }
            if !config.vmem {
                // The executable is fully materialized; no reason to keep it.
                // Taken out first: closing it must not happen under the lock.
                let exec = space.exec.lock().take();
                drop(exec);
            }
        }

        Some(space)
    }

    pub fn space_id(&self) -> SpaceId {
        self.space_id
    }

    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    /// Initial user register state: PC at 0 (with the branch-delay slot's
    /// next-PC at 4) and the stack pointer just below the top of the space.
    pub fn init_registers(&self, machine: &Machine) {
        for reg in 0..machine::NUM_TOTAL_REGS {
            machine.write_register(reg, 0);
        }
        machine.write_register(machine::PC_REG, 0);
        machine.write_register(machine::NEXT_PC_REG, 4);
        let stack_top = self.num_pages * PAGE_SIZE - 16;
        machine.write_register(STACK_REG, stack_top as i32);
        log::debug!("stack register initialized to {}", stack_top);
    }

    /// On a context switch out: fold the TLB's dirty bits into the table so
    /// eviction decisions see them.
    pub fn save_state(&self, machine: &Arc<Machine>) {
        if !machine.mmu.tlb_enabled() {
            return;
        }
        machine.mmu.with_tlb(|tlb| {
            let mut table = self.page_table.lock();
            for line in tlb.iter() {
                if line.is_valid() && line.is_dirty() {
                    if let Some(entry) = table.get_mut(line.virtual_page as usize) {
                        entry.set(EntryFlags::DIRTY, true);
                    }
                }
            }
        });
    }

    /// On a context switch in: the TLB holds another space's translations,
    /// so invalidate it; without a TLB, install the linear table.
    pub fn restore_state(&self, machine: &Arc<Machine>) {
        if machine.mmu.tlb_enabled() {
            machine.mmu.with_tlb(|tlb| {
                for line in tlb.iter_mut() {
                    line.set(EntryFlags::VALID, false);
                }
            });
        } else {
            machine.mmu.set_page_table(self.page_table.lock().clone());
        }
    }

    /// Resolve a faulting page and return its (now valid) entry for the TLB.
    ///
    /// A page that was never written out comes from the executable — zeroed,
    /// then overlaid with whatever of the code and initialized-data regions
    /// intersects it. A page with its swap bit set comes back from the swap
    /// file instead.
    pub fn load_page(&self, vpn: usize, machine: &Machine, vm: &Vm) -> TranslationEntry {
        assert!(vpn < self.num_pages, "fault past end of address space");
        {
            let mut table = self.page_table.lock();
            table[vpn].set(EntryFlags::VALID, true);
            table[vpn].set(EntryFlags::USE, true);
        }

        let (resident, from_swap) = {
            let table = self.page_table.lock();
            let entry = table[vpn];
            (
                entry.physical_page != NO_PHYS_PAGE
                    && vm
                        .coremap
                        .in_memory(self.space_id, vpn as u32, entry.physical_page),
                entry.flags.contains(EntryFlags::SWAP),
            )
        };

        if !resident {
            if vm.coremap.count_free() == 0 {
                vm.coremap.free_page(vm, machine);
            }
            let frame = vm.coremap.find(self.space_id, vpn as u32);
            self.page_table.lock()[vpn].physical_page = frame;

            if from_swap {
                let mut page = [0u8; PAGE_SIZE];
                let swap = self.swap_file.lock().clone().expect("no swap file");
                let read = swap.read_at(&mut page, vpn * PAGE_SIZE);
                assert_eq!(read, PAGE_SIZE, "short swap read");
                machine.mmu.write_frame(frame as usize, &page);
            } else {
                self.fill_frame_from_executable(vpn, frame, machine);
            }
        }

        self.page_table.lock()[vpn]
    }

    /// Zero the frame, then overlay the executable bytes that fall inside
    /// this page. Pages entirely above the initialized region stay zero.
    fn fill_frame_from_executable(&self, vpn: usize, frame: u32, machine: &Machine) {
        let mut page = [0u8; PAGE_SIZE];
        let page_start = vpn * PAGE_SIZE;
        let page_end = page_start + PAGE_SIZE;

        let exec = self.exec.lock();
        if let Some(exe) = exec.as_ref() {
            let begin = page_start.max(self.code_addr);
            let end = page_end.min(self.code_addr + self.code_size);
            if begin < end {
                exe.read_code_block(
                    &mut page[begin - page_start..end - page_start],
                    begin - self.code_addr,
                );
            }

            let begin = page_start.max(self.init_data_addr);
            let end = page_end.min(self.init_data_addr + self.init_data_size);
            if begin < end {
                exe.read_data_block(
                    &mut page[begin - page_start..end - page_start],
                    begin - self.init_data_addr,
                );
            }
        }
        machine.mmu.write_frame(frame as usize, &page);
    }

    /// Eviction: write the page out if dirty (marking it swap-backed),
    /// invalidate its entry, and drop any TLB line mapping the frame.
    pub fn save_to_swap(&self, vpn: u32, machine: &Machine) {
        let vpn = vpn as usize;
        let (dirty, frame) = {
            let table = self.page_table.lock();
            (table[vpn].is_dirty(), table[vpn].physical_page)
        };

        if dirty {
            self.page_table.lock()[vpn].set(EntryFlags::SWAP, true);
            let mut page = [0u8; PAGE_SIZE];
            machine.mmu.read_frame(frame as usize, &mut page);
            let swap = self.swap_file.lock().clone().expect("no swap file");
            let written = swap.write_at(&page, vpn * PAGE_SIZE);
            assert_eq!(written, PAGE_SIZE, "short swap write");
        }

        {
            let mut table = self.page_table.lock();
            table[vpn].set(EntryFlags::VALID, false);
            table[vpn].set(EntryFlags::USE, false);
            table[vpn].set(EntryFlags::DIRTY, false);
        }

        machine.mmu.with_tlb(|tlb| {
            for line in tlb.iter_mut() {
                if line.physical_page == frame {
                    line.set(EntryFlags::VALID, false);
                    break;
                }
            }
        });
    }

    /// Second-chance probe: was the page recently used? Clears the bit
    /// either way.
    pub fn test_and_clear_use(&self, vpn: u32) -> bool {
        let mut table = self.page_table.lock();
        let entry = &mut table[vpn as usize];
        let used = entry.flags.contains(EntryFlags::USE);
        entry.set(EntryFlags::USE, false);
        used
    }

    /// Dirty-bit propagation from a TLB line being evicted, guarded by the
    /// caller's coremap agreement plus our own residency check.
    pub fn mark_dirty_if_resident(&self, vpn: u32, frame: u32) {
        let mut table = self.page_table.lock();
        let entry = &mut table[vpn as usize];
        if entry.is_valid() && entry.physical_page == frame {
            entry.set(EntryFlags::DIRTY, true);
        }
    }

    /// Release everything the space owns: its frames, its executable, and
    /// its swap file (removed from the file system as the handle closes).
    pub fn teardown(&self, vm: &Vm, fs: &FileSystem) {
        {
            let table = self.page_table.lock();
            for entry in table.iter() {
                if entry.physical_page != NO_PHYS_PAGE
                    && vm
                        .coremap
                        .in_memory(self.space_id, entry.virtual_page, entry.physical_page)
                {
                    vm.coremap.release(entry.physical_page);
                }
            }
        }

        let exec = self.exec.lock().take();
        drop(exec);
        if let Some(path) = &self.swap_path {
            // Mark it now; the blocks go back to the free map when the
            // handle below drops.
            if let Err(err) = fs.remove(path) {
                log::warn!("removing `{}` failed: {}", path, err);
            }
        }
        let swap = self.swap_file.lock().take();
        drop(swap);
        vm.unregister(self.space_id);
    }
}
