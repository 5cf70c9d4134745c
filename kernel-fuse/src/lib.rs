//! Host-side harness for the kernel: a file-backed sector device, helpers
//! that boot a kernel on a fresh disk, and the integration test suites in
//! `tests/`.

mod block_file;

pub use block_file::DiskFile;
pub use test_utils::*;

pub mod test_utils {
    use std::sync::Arc;

    use kernel::{Kernel, KernelConfig};
    use log::LevelFilter;
    use machine::{RamDisk, SectorDevice};
    use simple_logger::SimpleLogger;

    pub fn setup_logger(filter: LevelFilter) {
        let _ = SimpleLogger::new().with_level(filter).init();
    }

    pub fn ram_disk() -> Arc<dyn SectorDevice> {
        Arc::new(RamDisk::new())
    }

    /// Fresh kernel on a freshly formatted RAM disk, no paging.
    pub fn boot_fresh() -> Arc<Kernel> {
        Kernel::boot(KernelConfig::default(), ram_disk(), true)
    }

    /// Fresh kernel with demand paging and swap on `num_phys_pages` frames.
    pub fn boot_paged(num_phys_pages: usize) -> Arc<Kernel> {
        Kernel::boot(KernelConfig::demand_paged(num_phys_pages), ram_disk(), true)
    }

    /// A scratch image path unique to the calling test.
    pub fn scratch_image(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("kernel-fuse-{}-{}.img", std::process::id(), name))
    }
}

#[cfg(test)]
mod device_tests {
    use machine::{SectorDevice, NUM_SECTORS, SECTOR_SIZE};

    use super::*;

    #[test]
    fn ram_disk_round_trip() {
        let device = test_utils::ram_disk();
        let mut buf = [0u8; SECTOR_SIZE];
        device.read_sector(0, &mut buf);
        assert_eq!(buf, [0u8; SECTOR_SIZE]);

        buf[0] = 1;
        buf[SECTOR_SIZE - 1] = 2;
        device.write_sector(NUM_SECTORS - 1, &buf);

        let mut back = [0u8; SECTOR_SIZE];
        device.read_sector(NUM_SECTORS - 1, &mut back);
        assert_eq!(back[0], 1);
        assert_eq!(back[SECTOR_SIZE - 1], 2);
    }

    #[test]
    fn disk_file_round_trip() {
        let path = test_utils::scratch_image("device-round-trip");
        let device = DiskFile::create(&path).unwrap();

        let mut buf = [0u8; SECTOR_SIZE];
        buf[7] = 0x5a;
        device.write_sector(3, &buf);

        let mut back = [0u8; SECTOR_SIZE];
        device.read_sector(3, &mut back);
        assert_eq!(back[7], 0x5a);

        drop(device);
        let reopened = DiskFile::open(&path).unwrap();
        let mut back = [0u8; SECTOR_SIZE];
        reopened.read_sector(3, &mut back);
        assert_eq!(back[7], 0x5a);
        std::fs::remove_file(&path).ok();
    }
}
