//! The disk: an array of fixed-size sectors addressed by number.
//!
//! The kernel drives it through the [`SectorDevice`] trait so that tests can
//! run against an in-memory disk while tools work on a real image file.

use spin::Mutex;

/// Bytes per sector, the unit of disk I/O.
pub const SECTOR_SIZE: usize = 128;

/// Sectors on the disk.
pub const NUM_SECTORS: usize = 1024;

pub trait SectorDevice: Send + Sync {
    /// Read sector `sector` into `buf` (`buf.len() == SECTOR_SIZE`).
    fn read_sector(&self, sector: usize, buf: &mut [u8]);
    /// Write `buf` (`buf.len() == SECTOR_SIZE`) to sector `sector`.
    fn write_sector(&self, sector: usize, buf: &[u8]);
}

/// Memory-backed disk, the default for tests and freshly formatted kernels.
pub struct RamDisk {
    sectors: Mutex<Vec<u8>>,
}

impl RamDisk {
    pub fn new() -> Self {
        Self {
            sectors: Mutex::new(vec![0; NUM_SECTORS * SECTOR_SIZE]),
        }
    }
}

impl Default for RamDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl SectorDevice for RamDisk {
    fn read_sector(&self, sector: usize, buf: &mut [u8]) {
        assert!(sector < NUM_SECTORS, "sector {} out of range", sector);
        assert_eq!(buf.len(), SECTOR_SIZE);
        let sectors = self.sectors.lock();
        buf.copy_from_slice(&sectors[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE]);
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) {
        assert!(sector < NUM_SECTORS, "sector {} out of range", sector);
        assert_eq!(buf.len(), SECTOR_SIZE);
        let mut sectors = self.sectors.lock();
        sectors[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE].copy_from_slice(buf);
    }
}
