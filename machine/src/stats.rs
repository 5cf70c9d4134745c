//! Performance counters maintained by the machine emulation and the kernel.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Statistics {
    pub num_disk_reads: AtomicU64,
    pub num_disk_writes: AtomicU64,
    pub num_console_chars_read: AtomicU64,
    pub num_console_chars_written: AtomicU64,
    pub num_page_faults: AtomicU64,
    pub num_page_hits: AtomicU64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disk_reads(&self) -> u64 {
        self.num_disk_reads.load(Ordering::Relaxed)
    }

    pub fn disk_writes(&self) -> u64 {
        self.num_disk_writes.load(Ordering::Relaxed)
    }

    pub fn page_faults(&self) -> u64 {
        self.num_page_faults.load(Ordering::Relaxed)
    }

    pub fn page_hits(&self) -> u64 {
        self.num_page_hits.load(Ordering::Relaxed)
    }

    /// Log the counters at shutdown, the way the original printed them.
    pub fn report(&self) {
        log::info!(
            "disk I/O: reads {}, writes {}",
            self.disk_reads(),
            self.disk_writes()
        );
        log::info!(
            "console I/O: reads {}, writes {}",
            self.num_console_chars_read.load(Ordering::Relaxed),
            self.num_console_chars_written.load(Ordering::Relaxed)
        );
        let faults = self.page_faults();
        let hits = self.page_hits();
        log::info!("paging: faults {}, hits {}", faults, hits);
        if faults + hits > 0 {
            log::info!(
                "hit ratio: {:.2}%",
                hits as f64 * 100.0 / (hits + faults) as f64
            );
        }
    }
}
