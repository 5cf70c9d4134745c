//! A disk image in a host file.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use machine::{SectorDevice, NUM_SECTORS, SECTOR_SIZE};

pub struct DiskFile(pub Mutex<std::fs::File>);

impl DiskFile {
    /// Create (truncating) a full-size disk image.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((NUM_SECTORS * SECTOR_SIZE) as u64)?;
        Ok(Self(Mutex::new(file)))
    }

    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self(Mutex::new(file)))
    }
}

impl SectorDevice for DiskFile {
    fn read_sector(&self, sector: usize, buf: &mut [u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64)).unwrap();
        assert_eq!(
            file.read(buf).unwrap(),
            SECTOR_SIZE,
            "not a complete sector"
        );
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64)).unwrap();
        assert_eq!(
            file.write(buf).unwrap(),
            SECTOR_SIZE,
            "not a complete sector"
        );
        file.flush().unwrap();
    }
}
