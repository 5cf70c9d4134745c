//! Memory management unit: the main-memory byte array, the translation
//! cache (TLB) and, for kernels that do not use the TLB, a linear page
//! table installed on every context switch.
//!
//! Translation failures are reported to the caller as [`Exception`]s; the
//! kernel resolves them (refilling the TLB slot that missed) and retries the
//! access, exactly like a faulting user instruction would be retried.

use std::sync::Arc;

use bitflags::bitflags;
use spin::Mutex;

use crate::stats::Statistics;

/// Bytes per virtual page, equal to the disk sector size so that a swapped
/// page occupies exactly one sector-aligned slot of its swap file.
pub const PAGE_SIZE: usize = crate::disk::SECTOR_SIZE;

/// Entries in the translation cache.
pub const TLB_SIZE: usize = 4;

bitflags! {
    /// State bits of a translation entry.
    pub struct EntryFlags: u8 {
        const VALID     = 1 << 0;
        const USE       = 1 << 1;
        const DIRTY     = 1 << 2;
        const READ_ONLY = 1 << 3;
        /// The page has been written out to its swap file at least once.
        const SWAP      = 1 << 4;
    }
}

/// Sentinel physical page for entries that are not resident.
pub const NO_PHYS_PAGE: u32 = u32::MAX;

/// One virtual-to-physical translation, as stored both in page tables and in
/// the TLB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    pub virtual_page: u32,
    pub physical_page: u32,
    pub flags: EntryFlags,
}

impl TranslationEntry {
    pub fn invalid() -> Self {
        Self {
            virtual_page: 0,
            physical_page: NO_PHYS_PAGE,
            flags: EntryFlags::empty(),
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.flags.contains(EntryFlags::VALID)
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.flags.contains(EntryFlags::DIRTY)
    }

    #[inline]
    pub fn set(&mut self, flag: EntryFlags, on: bool) {
        self.flags.set(flag, on);
    }
}

/// A failed memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    /// No valid translation for the page holding `vaddr`.
    PageFault { vaddr: usize },
    /// Store to a page mapped read-only.
    ReadOnly { vaddr: usize },
    /// Unaligned or out-of-range access.
    AddressError { vaddr: usize },
}

pub struct Mmu {
    memory: Mutex<Vec<u8>>,
    num_phys_pages: usize,
    tlb: Mutex<[TranslationEntry; TLB_SIZE]>,
    tlb_enabled: Mutex<bool>,
    /// Linear page table used when the TLB is disabled; reinstalled by the
    /// kernel on every context switch.
    page_table: Mutex<Vec<TranslationEntry>>,
    stats: Arc<Statistics>,
}

impl Mmu {
    pub fn new(num_phys_pages: usize, stats: Arc<Statistics>) -> Self {
        Self {
            memory: Mutex::new(vec![0; num_phys_pages * PAGE_SIZE]),
            num_phys_pages,
            tlb: Mutex::new([TranslationEntry::invalid(); TLB_SIZE]),
            tlb_enabled: Mutex::new(false),
            page_table: Mutex::new(Vec::new()),
            stats,
        }
    }

    #[inline]
    pub fn num_phys_pages(&self) -> usize {
        self.num_phys_pages
    }

    pub fn enable_tlb(&self) {
        *self.tlb_enabled.lock() = true;
    }

    pub fn tlb_enabled(&self) -> bool {
        *self.tlb_enabled.lock()
    }

    /// Run `f` over the TLB array. The kernel uses this for refill, for
    /// invalidation on context switch and for dirty-bit harvesting.
    pub fn with_tlb<R>(&self, f: impl FnOnce(&mut [TranslationEntry; TLB_SIZE]) -> R) -> R {
        f(&mut self.tlb.lock())
    }

    /// Install the linear page table used while the TLB is disabled.
    pub fn set_page_table(&self, table: Vec<TranslationEntry>) {
        *self.page_table.lock() = table;
    }

    /// Translate `vaddr`, recording use/dirty bits on the matched entry.
    fn translate(&self, vaddr: usize, writing: bool) -> Result<usize, Exception> {
        let vpn = vaddr / PAGE_SIZE;
        let offset = vaddr % PAGE_SIZE;

        let entry = if self.tlb_enabled() {
            let mut tlb = self.tlb.lock();
            let slot = tlb
                .iter_mut()
                .find(|e| e.is_valid() && e.virtual_page == vpn as u32);
            match slot {
                Some(entry) => {
                    self.stats.num_page_hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    entry.set(EntryFlags::USE, true);
                    if writing {
                        if entry.flags.contains(EntryFlags::READ_ONLY) {
                            return Err(Exception::ReadOnly { vaddr });
                        }
                        entry.set(EntryFlags::DIRTY, true);
                    }
                    *entry
                }
                None => {
                    self.stats.num_page_faults.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    return Err(Exception::PageFault { vaddr });
                }
            }
        } else {
            let mut table = self.page_table.lock();
            let entry = match table.get_mut(vpn) {
                Some(entry) if entry.is_valid() => entry,
                _ => return Err(Exception::PageFault { vaddr }),
            };
            entry.set(EntryFlags::USE, true);
            if writing {
                if entry.flags.contains(EntryFlags::READ_ONLY) {
                    return Err(Exception::ReadOnly { vaddr });
                }
                entry.set(EntryFlags::DIRTY, true);
            }
            *entry
        };

        let ppn = entry.physical_page as usize;
        if ppn >= self.num_phys_pages {
            return Err(Exception::AddressError { vaddr });
        }
        Ok(ppn * PAGE_SIZE + offset)
    }

    pub fn read_mem(&self, vaddr: usize, size: usize) -> Result<i32, Exception> {
        if !matches!(size, 1 | 2 | 4) || vaddr % size != 0 {
            return Err(Exception::AddressError { vaddr });
        }
        let paddr = self.translate(vaddr, false)?;
        let memory = self.memory.lock();
        let value = match size {
            1 => memory[paddr] as i32,
            2 => u16::from_le_bytes([memory[paddr], memory[paddr + 1]]) as i32,
            _ => i32::from_le_bytes([
                memory[paddr],
                memory[paddr + 1],
                memory[paddr + 2],
                memory[paddr + 3],
            ]),
        };
        Ok(value)
    }

    pub fn write_mem(&self, vaddr: usize, size: usize, value: i32) -> Result<(), Exception> {
        if !matches!(size, 1 | 2 | 4) || vaddr % size != 0 {
            return Err(Exception::AddressError { vaddr });
        }
        let paddr = self.translate(vaddr, true)?;
        let mut memory = self.memory.lock();
        match size {
            1 => memory[paddr] = value as u8,
            2 => memory[paddr..paddr + 2].copy_from_slice(&(value as u16).to_le_bytes()),
            _ => memory[paddr..paddr + 4].copy_from_slice(&value.to_le_bytes()),
        }
        Ok(())
    }

    /// Copy a physical frame out of main memory.
    pub fn read_frame(&self, ppn: usize, buf: &mut [u8]) {
        assert!(ppn < self.num_phys_pages);
        assert_eq!(buf.len(), PAGE_SIZE);
        let memory = self.memory.lock();
        buf.copy_from_slice(&memory[ppn * PAGE_SIZE..(ppn + 1) * PAGE_SIZE]);
    }

    /// Overwrite a physical frame.
    pub fn write_frame(&self, ppn: usize, buf: &[u8]) {
        assert!(ppn < self.num_phys_pages);
        assert_eq!(buf.len(), PAGE_SIZE);
        let mut memory = self.memory.lock();
        memory[ppn * PAGE_SIZE..(ppn + 1) * PAGE_SIZE].copy_from_slice(buf);
    }

    pub fn zero_frame(&self, ppn: usize) {
        assert!(ppn < self.num_phys_pages);
        let mut memory = self.memory.lock();
        memory[ppn * PAGE_SIZE..(ppn + 1) * PAGE_SIZE].fill(0);
    }
}
