//! Exception handling outside the syscall path.
//!
//! A TLB miss picks a slot round-robin, propagates the dirty bit of the
//! line being evicted back through the coremap, and refills the slot from
//! the faulting space's `load_page`. The fault is resolved silently and the
//! access retried. A store to a read-only page is not resolved: it kills
//! the offending thread.

use machine::{Exception, PAGE_SIZE, TLB_SIZE};

use crate::Kernel;

/// Resolve a TLB miss / page fault at `vaddr`.
pub fn page_fault(kernel: &Kernel, vaddr: usize) {
    let vpn = vaddr / PAGE_SIZE;
    let current = kernel.sched.current();
    let space = current.space().expect("page fault outside any address space");

    let slot = {
        let mut victim = kernel.tlb_victim.lock();
        let slot = *victim;
        *victim = (slot + 1) % TLB_SIZE;
        slot
    };

    // The line we are about to overwrite may carry a dirty bit the page
    // table has not seen yet.
    let evicted_frame = kernel.machine.mmu.with_tlb(|tlb| {
        let line = &tlb[slot];
        (line.is_valid() && line.is_dirty()).then_some(line.physical_page)
    });
    if let Some(frame) = evicted_frame {
        kernel.vm.coremap.update_entry(&kernel.vm, frame);
    }

    let entry = space.load_page(vpn, &kernel.machine, &kernel.vm);
    kernel.machine.mmu.with_tlb(|tlb| tlb[slot] = entry);
}

/// A user-mode load, with the machine's retry semantics: page faults are
/// resolved silently and the instruction retried; any other fault kills the
/// thread.
pub fn user_read(kernel: &Kernel, addr: usize, size: usize) -> i32 {
    loop {
        match kernel.machine.read_mem(addr, size) {
            Ok(value) => return value,
            Err(Exception::PageFault { vaddr }) => page_fault(kernel, vaddr),
            Err(fault) => user_fault(kernel, fault),
        }
    }
}

/// A user-mode store; see [`user_read`].
pub fn user_write(kernel: &Kernel, addr: usize, size: usize, value: i32) {
    loop {
        match kernel.machine.write_mem(addr, size, value) {
            Ok(()) => return,
            Err(Exception::PageFault { vaddr }) => page_fault(kernel, vaddr),
            Err(fault) => user_fault(kernel, fault),
        }
    }
}

/// A user fault the kernel does not resolve: terminate the thread with
/// status -1.
pub fn user_fault(kernel: &Kernel, fault: Exception) -> ! {
    let current = kernel.sched.current();
    log::error!(
        "thread `{}` died on unhandled user fault: {:?}",
        current.name(),
        fault
    );
    kernel.exit_current(-1)
}
