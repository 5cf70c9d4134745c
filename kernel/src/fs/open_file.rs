//! An open file: a handle bound to a header sector, with a cursor for
//! sequential calls and positional read/write underneath.
//!
//! Files opened through the file-system facade carry their `FileSynch` and
//! bracket every access in the readers–writers protocol; the file system's
//! own backing files (free map, directories) have no `FileSynch` — their
//! `FsSynch` lock already serializes access.

use std::sync::{Arc, Weak};

use machine::SECTOR_SIZE;
use spin::Mutex as SpinMutex;

use super::file_header::FileHeader;
use super::file_synch::FileSynch;
use super::synch_disk::SynchDisk;
use super::FileSystem;

pub struct OpenFile {
    sector: u32,
    header: Arc<SpinMutex<FileHeader>>,
    pos: SpinMutex<usize>,
    disk: Arc<SynchDisk>,
    synch: Option<Arc<FileSynch>>,
    fs: Weak<FileSystem>,
}

impl OpenFile {
    /// Open a file-system internal file (free map, directory): the header is
    /// private and access runs unbracketed.
    pub fn new(disk: Arc<SynchDisk>, sector: u32) -> Self {
        let header = Arc::new(SpinMutex::new(FileHeader::fetch_from(&disk, sector)));
        Self {
            sector,
            header,
            pos: SpinMutex::new(0),
            disk,
            synch: None,
            fs: Weak::new(),
        }
    }

    /// Open a regular file on behalf of a user: shares the `FileSynch`'s
    /// header with every other opener and participates in close/removal
    /// bookkeeping.
    pub(super) fn new_synchronized(
        disk: Arc<SynchDisk>,
        synch: Arc<FileSynch>,
        fs: &Arc<FileSystem>,
    ) -> Self {
        Self {
            sector: synch.sector(),
            header: synch.header(),
            pos: SpinMutex::new(0),
            disk,
            synch: Some(synch),
            fs: Arc::downgrade(fs),
        }
    }

    pub fn sector(&self) -> u32 {
        self.sector
    }

    pub fn header(&self) -> Arc<SpinMutex<FileHeader>> {
        self.header.clone()
    }

    pub fn length(&self) -> usize {
        self.header.lock().num_bytes()
    }

    /// Read from the cursor, advancing it.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let offset = *self.pos.lock();
        let read = self.read_at(buf, offset);
        *self.pos.lock() += read;
        read
    }

    /// Write at the cursor, advancing it.
    pub fn write(&self, buf: &[u8]) -> usize {
        let offset = *self.pos.lock();
        let written = self.write_at(buf, offset);
        *self.pos.lock() += written;
        written
    }

    pub fn seek(&self, offset: usize) {
        *self.pos.lock() = offset;
    }

    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        match &self.synch {
            Some(synch) => {
                synch.begin_reading();
                let read = self.read_at_raw(buf, offset);
                synch.finish_reading();
                read
            }
            None => self.read_at_raw(buf, offset),
        }
    }

    /// Write at `offset`, expanding the file first when the write runs past
    /// the end. Expansion happens while this writer excludes every reader
    /// and other writer; if it fails (disk full) the write is truncated at
    /// the current end.
    pub fn write_at(&self, buf: &[u8], offset: usize) -> usize {
        match &self.synch {
            Some(synch) => {
                synch.begin_writing();
                let end = offset + buf.len();
                let length = self.length();
                if end > length {
                    if let Some(fs) = self.fs.upgrade() {
                        if !fs.expand_file(self.sector, end - length) {
                            log::warn!(
                                "could not expand file at sector {} to {} bytes",
                                self.sector,
                                end
                            );
                        }
                    }
                }
                let written = self.write_at_raw(buf, offset);
                synch.finish_writing();
                written
            }
            None => self.write_at_raw(buf, offset),
        }
    }

    /// The sectors covering `[offset, end)`, resolved in one header lock.
    fn sector_run(&self, offset: usize, len: usize) -> (usize, Vec<u32>) {
        let header = self.header.lock();
        let end = (offset + len).min(header.num_bytes());
        if offset >= end {
            return (offset, Vec::new());
        }
        let first = offset / SECTOR_SIZE;
        let last = (end - 1) / SECTOR_SIZE;
        let sectors = (first..=last)
            .map(|index| header.byte_to_sector(index * SECTOR_SIZE))
            .collect();
        (end, sectors)
    }

    fn read_at_raw(&self, buf: &mut [u8], offset: usize) -> usize {
        let (end, sectors) = self.sector_run(offset, buf.len());
        if sectors.is_empty() {
            return 0;
        }

        let mut cursor = offset;
        let mut read = 0;
        let mut block = [0u8; SECTOR_SIZE];
        for sector in sectors {
            let in_sector = cursor % SECTOR_SIZE;
            let take = (SECTOR_SIZE - in_sector).min(end - cursor);
            self.disk.read_sector(sector, &mut block);
            buf[read..read + take].copy_from_slice(&block[in_sector..in_sector + take]);
            cursor += take;
            read += take;
        }
        read
    }

    fn write_at_raw(&self, buf: &[u8], offset: usize) -> usize {
        let (end, sectors) = self.sector_run(offset, buf.len());
        if sectors.is_empty() {
            return 0;
        }

        let mut cursor = offset;
        let mut written = 0;
        let mut block = [0u8; SECTOR_SIZE];
        for sector in sectors {
            let in_sector = cursor % SECTOR_SIZE;
            let take = (SECTOR_SIZE - in_sector).min(end - cursor);
            if take != SECTOR_SIZE {
                // Partial sector: keep the bytes around the write.
                self.disk.read_sector(sector, &mut block);
            }
            block[in_sector..in_sector + take].copy_from_slice(&buf[written..written + take]);
            self.disk.write_sector(sector, &block);
            cursor += take;
            written += take;
        }
        written
    }
}

impl core::fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OpenFile")
            .field("sector", &self.sector)
            .field("length", &self.length())
            .finish()
    }
}

impl Drop for OpenFile {
    /// Closing is what arms deferred deletion: the last close of a file
    /// marked for removal frees its blocks.
    fn drop(&mut self) {
        if self.synch.is_some() {
            if let Some(fs) = self.fs.upgrade() {
                fs.close_file(self.sector);
            }
        }
    }
}
