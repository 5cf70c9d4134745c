//! Demand paging: fault-driven loading, eviction through the coremap,
//! swap-file round trips, and boot-time swap cleanup.

use std::sync::Arc;

use kernel::userprog::{build_image, exception, syscall};
use kernel::{Kernel, KernelConfig};
use kernel_fuse::test_utils::*;
use machine::PAGE_SIZE;

/// Put an executable image on disk: one page of code at address 0, then
/// `uninit_pages` pages of zero-initialized data above it.
fn install_program(kernel: &Arc<Kernel>, path: &str, uninit_pages: usize) {
    let code = vec![0u8; PAGE_SIZE];
    let image = build_image(0, &code, 0, &[], (uninit_pages * PAGE_SIZE) as u32);
    kernel.fs.create(path, 0, false).unwrap();
    let file = kernel.fs.open(path).unwrap();
    assert_eq!(file.write(&image), image.len());
}

fn exit(kernel: &Arc<Kernel>, status: i32) {
    syscall::invoke(kernel, syscall::SYSCALL_EXIT, [status, 0, 0, 0]);
}

#[test]
fn evicted_page_comes_back_intact() {
    setup_logger(log::LevelFilter::Warn);
    let kernel = boot_paged(4);
    install_program(&kernel, "prog", 8);
    kernel.register_program("prog", |k| {
        let base = PAGE_SIZE; // first data page
        exception::user_write(k, base, 4, 0x1234_5678);
        // Touch more pages than there are frames, evicting `base`.
        for page in 2..8 {
            exception::user_write(k, page * PAGE_SIZE, 4, page as i32);
        }
        let value = exception::user_read(k, base, 4);
        exit(k, if value == 0x1234_5678 { 0 } else { 1 });
    });

    let id = kernel.exec("prog", true, None).unwrap();
    assert_eq!(kernel.join(id), Some(0));
    assert!(kernel.stats.page_faults() > 0);
}

#[test]
fn working_set_larger_than_memory_completes() {
    let kernel = boot_paged(4);
    install_program(&kernel, "thrash", 8);
    kernel.register_program("thrash", |k| {
        let base = PAGE_SIZE;
        const ROUNDS: usize = 1000;
        for round in 0..ROUNDS {
            for page in 0..8 {
                let addr = base + page * PAGE_SIZE;
                let value = (round * 8 + page) as i32;
                exception::user_write(k, addr, 4, value);
                if exception::user_read(k, addr, 4) != value {
                    exit(k, 1);
                }
                // A second read of a just-touched page hits the TLB.
                if exception::user_read(k, addr, 4) != value {
                    exit(k, 1);
                }
            }
        }
        // The last round's values survived all the eviction traffic iff the
        // swap round trips were faithful.
        for page in 0..8 {
            let expect = ((ROUNDS - 1) * 8 + page) as i32;
            if exception::user_read(k, base + page * PAGE_SIZE, 4) != expect {
                exit(k, 2);
            }
        }
        exit(k, 0);
    });

    let id = kernel.exec("thrash", true, None).unwrap();
    assert_eq!(kernel.join(id), Some(0));
    assert!(kernel.stats.page_faults() > 0);
    assert!(kernel.stats.page_hits() > kernel.stats.page_faults());
}

#[test]
fn untouched_pages_read_as_zero() {
    let kernel = boot_paged(4);
    install_program(&kernel, "zeros", 8);
    kernel.register_program("zeros", |k| {
        // Never written: both fresh pages and pages that cycled through
        // eviction must read back zero.
        for page in 1..8 {
            if exception::user_read(k, page * PAGE_SIZE, 4) != 0 {
                exit(k, 1);
            }
        }
        for page in 1..8 {
            if exception::user_read(k, page * PAGE_SIZE + 64, 4) != 0 {
                exit(k, 1);
            }
        }
        exit(k, 0);
    });

    let id = kernel.exec("zeros", true, None).unwrap();
    assert_eq!(kernel.join(id), Some(0));
}

#[test]
fn two_spaces_interleave_without_mixing() {
    let kernel = boot_paged(8);
    for name in ["left", "right"] {
        install_program(&kernel, name, 4);
    }
    // Each program stamps its own pages, yields to the other, and verifies
    // its stamps survived the other's traffic and the context switches.
    fn body(stamp: i32) -> impl Fn(&Arc<Kernel>) + Send + Sync {
        move |k: &Arc<Kernel>| {
            let base = PAGE_SIZE;
            for round in 0..20 {
                for page in 0..4 {
                    let addr = base + page * PAGE_SIZE;
                    exception::user_write(k, addr, 4, stamp + round * 4 + page as i32);
                }
                k.sched.yield_now();
                for page in 0..4 {
                    let addr = base + page * PAGE_SIZE;
                    if exception::user_read(k, addr, 4) != stamp + round * 4 + page as i32 {
                        exit(k, 1);
                    }
                }
            }
            exit(k, 0);
        }
    }
    kernel.register_program("left", body(0x1000));
    kernel.register_program("right", body(0x2000));

    let left = kernel.exec("left", true, None).unwrap();
    let right = kernel.exec("right", true, None).unwrap();
    assert_eq!(kernel.join(left), Some(0));
    assert_eq!(kernel.join(right), Some(0));
}

#[test]
fn misaligned_access_kills_the_thread() {
    let kernel = boot_paged(4);
    install_program(&kernel, "crash", 2);
    kernel.register_program("crash", |k| {
        let _ = exception::user_read(k, PAGE_SIZE + 1, 4); // never returns
        exit(k, 0);
    });

    let id = kernel.exec("crash", true, None).unwrap();
    assert_eq!(kernel.join(id), Some(-1));
}

#[test]
fn swap_files_are_cleaned_up() {
    let device = ram_disk();
    {
        let kernel = Kernel::boot(KernelConfig::demand_paged(4), device.clone(), true);
        install_program(&kernel, "quick", 2);
        kernel.register_program("quick", |k| exit(k, 0));
        let id = kernel.exec("quick", true, None).unwrap();
        assert_eq!(kernel.join(id), Some(0));

        // A clean exit already removed its own swap file.
        assert!(!kernel.fs.list().iter().any(|p| p.contains("SWAP.")));

        // Leave a stale one behind, as a crashed run would.
        kernel.fs.create("/SWAP.9", 3 * PAGE_SIZE, false).unwrap();
        assert!(kernel.fs.list().iter().any(|p| p.contains("SWAP.9")));
    }

    // Reboot without formatting: the stale file is swept at mount.
    let kernel = Kernel::boot(KernelConfig::demand_paged(4), device, false);
    assert!(!kernel.fs.list().iter().any(|p| p.contains("SWAP.")));
    assert!(kernel.fs.check());
}
