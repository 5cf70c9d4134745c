//! The on-disk file header (what UNIX would call the i-node).
//!
//! The header proper fits in exactly one sector: length bookkeeping, the
//! direct block table and the sector of the first-level indirection table.
//! Files larger than `NUM_DIRECT` sectors go through two levels: the
//! first-level table holds sectors of second-level tables, each of which
//! holds data-sector numbers. Both levels are cached in memory beside the
//! raw header, so mapping a byte offset to its sector never touches the
//! disk.

use machine::SECTOR_SIZE;

use super::bitmap::Bitmap;
use super::synch_disk::SynchDisk;

/// Data sectors addressed directly from the header.
pub const NUM_DIRECT: usize = (SECTOR_SIZE - 3 * core::mem::size_of::<u32>())
    / core::mem::size_of::<u32>();
/// Sector numbers per indirection table.
pub const NUM_INDIRECT: usize = SECTOR_SIZE / core::mem::size_of::<u32>();
/// Largest file reachable without indirection.
pub const MAX_DIRECT_SIZE: usize = NUM_DIRECT * SECTOR_SIZE;
/// Data sectors in the largest representable file. A file may use exactly
/// this many.
pub const MAX_FILE_SECTORS: usize = NUM_DIRECT + NUM_INDIRECT * NUM_INDIRECT;

/// Sentinel filling every unused sector slot.
pub const NO_SECTOR: u32 = u32::MAX;

#[repr(C)]
#[derive(Clone)]
pub struct RawFileHeader {
    pub num_bytes: u32,
    pub num_sectors: u32,
    /// Sector of the first-level indirection table, or `NO_SECTOR`.
    pub indir_sector: u32,
    pub direct: [u32; NUM_DIRECT],
}

const_assert_eq!(core::mem::size_of::<RawFileHeader>(), SECTOR_SIZE);

type IndirectTable = [u32; NUM_INDIRECT];

#[derive(Clone)]
pub struct FileHeader {
    raw: RawFileHeader,
    /// Sectors of the second-level tables.
    first_indir: IndirectTable,
    /// Data-sector numbers, one table per used first-level slot.
    second_indir: [IndirectTable; NUM_INDIRECT],
}

impl FileHeader {
    pub fn new() -> Self {
        Self {
            raw: RawFileHeader {
                num_bytes: 0,
                num_sectors: 0,
                indir_sector: NO_SECTOR,
                direct: [NO_SECTOR; NUM_DIRECT],
            },
            first_indir: [NO_SECTOR; NUM_INDIRECT],
            second_indir: [[NO_SECTOR; NUM_INDIRECT]; NUM_INDIRECT],
        }
    }

    pub fn num_bytes(&self) -> usize {
        self.raw.num_bytes as usize
    }

    pub fn num_sectors(&self) -> usize {
        self.raw.num_sectors as usize
    }

    pub fn raw(&self) -> &RawFileHeader {
        &self.raw
    }

    fn data_sectors(bytes: usize) -> usize {
        bytes.div_ceil(SECTOR_SIZE)
    }

    /// Indirection-table sectors needed to address `sectors` data sectors.
    fn table_sectors(sectors: usize) -> usize {
        if sectors <= NUM_DIRECT {
            0
        } else {
            1 + (sectors - NUM_DIRECT).div_ceil(NUM_INDIRECT)
        }
    }

    /// Reserve data (and, if needed, indirection) sectors for a file of
    /// `size` bytes. Either the whole allocation commits or the free map is
    /// left untouched.
    pub fn allocate(&mut self, free_map: &mut Bitmap, size: usize) -> bool {
        let num_sectors = Self::data_sectors(size);
        if num_sectors > MAX_FILE_SECTORS {
            return false;
        }
        if free_map.count_clear() < num_sectors + Self::table_sectors(num_sectors) {
            return false;
        }

        self.raw.num_bytes = size as u32;
        self.raw.num_sectors = num_sectors as u32;
        self.claim_sectors(free_map, 0, num_sectors);
        true
    }

    /// Grow the file in place by `add_bytes`. Bytes left in the last used
    /// sector absorb growth with no new allocation; beyond that, whole
    /// sectors are claimed, promoting to indirect addressing when the file
    /// crosses `NUM_DIRECT` sectors. Fails atomically when the free map
    /// cannot satisfy the demand.
    pub fn expand(&mut self, free_map: &mut Bitmap, add_bytes: usize) -> bool {
        assert!(add_bytes != 0);

        let old_sectors = self.num_sectors();
        let new_bytes = self.num_bytes() + add_bytes;
        let new_sectors = Self::data_sectors(new_bytes);
        if new_sectors > MAX_FILE_SECTORS {
            return false;
        }

        let needed = (new_sectors - old_sectors)
            + (Self::table_sectors(new_sectors) - Self::table_sectors(old_sectors));
        if free_map.count_clear() < needed {
            return false;
        }

        log::debug!(
            "expanding file of length {} to {}",
            self.num_bytes(),
            new_bytes
        );
        self.raw.num_bytes = new_bytes as u32;
        self.raw.num_sectors = new_sectors as u32;
        self.claim_sectors(free_map, old_sectors, new_sectors);
        true
    }

    /// Claim sectors for data indexes `[from, to)`, plus whatever
    /// indirection tables the range needs. The caller has already verified
    /// the free map holds enough clear bits.
    fn claim_sectors(&mut self, free_map: &mut Bitmap, from: usize, to: usize) {
        let grab = |free_map: &mut Bitmap| free_map.find().expect("free map changed underfoot") as u32;

        for index in from..to.min(NUM_DIRECT) {
            self.raw.direct[index] = grab(free_map);
        }
        if to <= NUM_DIRECT {
            return;
        }
        if self.raw.indir_sector == NO_SECTOR {
            self.raw.indir_sector = grab(free_map);
        }
        for index in from.max(NUM_DIRECT)..to {
            let slot = index - NUM_DIRECT;
            let first = slot / NUM_INDIRECT;
            if self.first_indir[first] == NO_SECTOR {
                self.first_indir[first] = grab(free_map);
            }
            self.second_indir[first][slot % NUM_INDIRECT] = grab(free_map);
        }
    }

    /// Release every sector the header references. Each must currently be
    /// marked in the free map.
    pub fn deallocate(&self, free_map: &mut Bitmap) {
        for index in 0..self.num_sectors().min(NUM_DIRECT) {
            free_map.clear(self.raw.direct[index] as usize);
        }
        if self.raw.indir_sector == NO_SECTOR {
            return;
        }
        free_map.clear(self.raw.indir_sector as usize);
        for (first, &table_sector) in self.first_indir.iter().enumerate() {
            if table_sector == NO_SECTOR {
                break;
            }
            free_map.clear(table_sector as usize);
            for &data_sector in &self.second_indir[first] {
                if data_sector == NO_SECTOR {
                    break;
                }
                free_map.clear(data_sector as usize);
            }
        }
    }

    /// Which sector stores the byte at `offset`. O(1): at most one cached
    /// indirection level is consulted.
    pub fn byte_to_sector(&self, offset: usize) -> u32 {
        let index = offset / SECTOR_SIZE;
        assert!(index < self.num_sectors(), "offset {} past end of file", offset);
        if index < NUM_DIRECT {
            self.raw.direct[index]
        } else {
            let slot = index - NUM_DIRECT;
            self.second_indir[slot / NUM_INDIRECT][slot % NUM_INDIRECT]
        }
    }

    /// Read the header and its used indirection tables from disk. Data
    /// blocks are not touched.
    pub fn fetch_from(disk: &SynchDisk, sector: u32) -> Self {
        let mut hdr = Self::new();
        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_sector(sector, &mut buf);
        hdr.raw = RawFileHeader::from_bytes(&buf);

        if hdr.raw.indir_sector != NO_SECTOR {
            disk.read_sector(hdr.raw.indir_sector, &mut buf);
            hdr.first_indir = table_from_bytes(&buf);
            for first in 0..NUM_INDIRECT {
                if hdr.first_indir[first] == NO_SECTOR {
                    break;
                }
                disk.read_sector(hdr.first_indir[first], &mut buf);
                hdr.second_indir[first] = table_from_bytes(&buf);
            }
        }
        hdr
    }

    /// Write the header and its used indirection tables back to disk.
    pub fn write_back(&self, disk: &SynchDisk, sector: u32) {
        disk.write_sector(sector, &self.raw.to_bytes());
        if self.raw.indir_sector != NO_SECTOR {
            disk.write_sector(self.raw.indir_sector, &table_to_bytes(&self.first_indir));
            for first in 0..NUM_INDIRECT {
                if self.first_indir[first] == NO_SECTOR {
                    break;
                }
                disk.write_sector(self.first_indir[first], &table_to_bytes(&self.second_indir[first]));
            }
        }
    }

    /// The sector of every second-level indirection table in use, for the
    /// consistency checker.
    pub fn table_sector_numbers(&self) -> Vec<u32> {
        let mut sectors = Vec::new();
        if self.raw.indir_sector != NO_SECTOR {
            sectors.push(self.raw.indir_sector);
            for &table_sector in &self.first_indir {
                if table_sector == NO_SECTOR {
                    break;
                }
                sectors.push(table_sector);
            }
        }
        sectors
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl RawFileHeader {
    fn from_bytes(buf: &[u8; SECTOR_SIZE]) -> Self {
        let words = table_from_bytes(buf);
        let mut direct = [NO_SECTOR; NUM_DIRECT];
        direct.copy_from_slice(&words[3..3 + NUM_DIRECT]);
        Self {
            num_bytes: words[0],
            num_sectors: words[1],
            indir_sector: words[2],
            direct,
        }
    }

    fn to_bytes(&self) -> [u8; SECTOR_SIZE] {
        let mut words = [0u32; NUM_INDIRECT];
        words[0] = self.num_bytes;
        words[1] = self.num_sectors;
        words[2] = self.indir_sector;
        words[3..3 + NUM_DIRECT].copy_from_slice(&self.direct);
        table_to_bytes(&words)
    }
}

/// Sector numbers are stored on disk as little-endian words.
fn table_from_bytes(buf: &[u8; SECTOR_SIZE]) -> IndirectTable {
    let mut table = [NO_SECTOR; NUM_INDIRECT];
    for (word, chunk) in table.iter_mut().zip(buf.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    table
}

fn table_to_bytes(table: &IndirectTable) -> [u8; SECTOR_SIZE] {
    let mut buf = [0u8; SECTOR_SIZE];
    for (word, chunk) in table.iter().zip(buf.chunks_exact_mut(4)) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_then_deallocate_restores_free_map() {
        let mut free_map = Bitmap::new(machine::NUM_SECTORS);
        free_map.mark(0);
        free_map.mark(1);
        let before = free_map.count_clear();

        for size in [0, 1, SECTOR_SIZE, MAX_DIRECT_SIZE, MAX_DIRECT_SIZE + 1, 200 * SECTOR_SIZE] {
            let mut hdr = FileHeader::new();
            assert!(hdr.allocate(&mut free_map, size), "size {}", size);
            assert_eq!(hdr.num_sectors(), size.div_ceil(SECTOR_SIZE));
            hdr.deallocate(&mut free_map);
            assert_eq!(free_map.count_clear(), before, "size {}", size);
        }
    }

    #[test]
    fn byte_to_sector_enumerates_distinct_sectors() {
        let mut free_map = Bitmap::new(machine::NUM_SECTORS);
        let mut hdr = FileHeader::new();
        let sectors = NUM_DIRECT + NUM_INDIRECT + 3; // forces two levels
        assert!(hdr.allocate(&mut free_map, sectors * SECTOR_SIZE));

        let mut seen = std::collections::HashSet::new();
        for k in 0..sectors {
            let s = hdr.byte_to_sector(k * SECTOR_SIZE);
            assert_ne!(s, NO_SECTOR);
            assert!(seen.insert(s), "sector {} mapped twice", s);
        }
    }

    #[test]
    fn allocate_fails_without_space_and_changes_nothing() {
        let mut free_map = Bitmap::new(8);
        let before = free_map.count_clear();
        let mut hdr = FileHeader::new();
        assert!(!hdr.allocate(&mut free_map, 20 * SECTOR_SIZE));
        assert_eq!(free_map.count_clear(), before);
    }

    #[test]
    fn expand_fills_partial_sector_first() {
        let mut free_map = Bitmap::new(64);
        let mut hdr = FileHeader::new();
        assert!(hdr.allocate(&mut free_map, SECTOR_SIZE / 2));
        let used = 64 - free_map.count_clear();

        // Growth within the last sector allocates nothing.
        assert!(hdr.expand(&mut free_map, SECTOR_SIZE / 4));
        assert_eq!(64 - free_map.count_clear(), used);
        assert_eq!(hdr.num_sectors(), 1);

        // Crossing the sector boundary claims exactly one more.
        assert!(hdr.expand(&mut free_map, SECTOR_SIZE));
        assert_eq!(64 - free_map.count_clear(), used + 1);
        assert_eq!(hdr.num_sectors(), 2);
    }

    #[test]
    fn expand_promotes_to_indirection() {
        let mut free_map = Bitmap::new(machine::NUM_SECTORS);
        let mut hdr = FileHeader::new();
        assert!(hdr.allocate(&mut free_map, MAX_DIRECT_SIZE));
        assert_eq!(hdr.raw().indir_sector, NO_SECTOR);

        assert!(hdr.expand(&mut free_map, 1));
        assert_ne!(hdr.raw().indir_sector, NO_SECTOR);
        assert_eq!(hdr.num_sectors(), NUM_DIRECT + 1);
        // One data sector, one first-level table, one second-level table.
        assert_eq!(
            machine::NUM_SECTORS - free_map.count_clear(),
            NUM_DIRECT + 3
        );
    }

    #[test]
    fn expand_fails_atomically() {
        let mut free_map = Bitmap::new(4);
        let mut hdr = FileHeader::new();
        assert!(hdr.allocate(&mut free_map, 2 * SECTOR_SIZE));
        let clear = free_map.count_clear();
        assert!(!hdr.expand(&mut free_map, 10 * SECTOR_SIZE));
        assert_eq!(free_map.count_clear(), clear);
        assert_eq!(hdr.num_sectors(), 2);
    }

    #[test]
    fn max_file_is_representable() {
        let mut free_map = Bitmap::new(MAX_FILE_SECTORS + NUM_INDIRECT + 2);
        let mut hdr = FileHeader::new();
        assert!(hdr.allocate(&mut free_map, MAX_FILE_SECTORS * SECTOR_SIZE));
        assert_eq!(hdr.num_sectors(), MAX_FILE_SECTORS);
        assert!(!hdr.expand(&mut free_map, 1));
    }
}
