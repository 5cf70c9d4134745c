//! The file system.
//!
//! On disk: sector 0 holds the file header of the free-sector bitmap file,
//! sector 1 the header of the root directory file; both are kept open for
//! the life of the file system. Every other file is a header sector, data
//! blocks, and an entry in some directory.
//!
//! Multi-step operations share a skeleton: split the path, resolve the
//! directory part to its `FsSynch`, take that directory's lock, fetch the
//! directory, do the work, and — only if it mutated on-disk state — write
//! the directory and free map back while still holding the locks. A failed
//! operation simply discards its in-memory copies.

mod bitmap;
mod directory;
mod error;
mod file_header;
mod file_synch;
mod fs_synch;
mod open_file;
pub mod path;
mod synch_disk;

pub use bitmap::Bitmap;
pub use directory::{Directory, DirectoryEntry, DIRECTORY_ENTRY_SIZE};
pub use error::FsError;
pub use file_header::{FileHeader, MAX_DIRECT_SIZE, MAX_FILE_SECTORS, NO_SECTOR, NUM_DIRECT, NUM_INDIRECT};
pub use file_synch::{FileSynch, FileSynchList};
pub use fs_synch::{FsSynch, FsSynchList};
pub use open_file::OpenFile;
pub use synch_disk::SynchDisk;

use std::collections::HashSet;
use std::sync::Arc;

use machine::{SECTOR_SIZE, NUM_SECTORS};

use crate::config::{FILE_NAME_MAX_LEN, NUM_DIR_ENTRIES, PATH_NAME_MAX_LEN};
use crate::thread::Scheduler;

use path::{components, split_path};

/// Sector of the free map's file header, fixed at format time.
pub const FREE_MAP_SECTOR: u32 = 0;
/// Sector of the root directory's file header.
pub const ROOT_DIRECTORY_SECTOR: u32 = 1;

pub const FREE_MAP_FILE_SIZE: usize = NUM_SECTORS / 8;
pub const DIRECTORY_FILE_SIZE: usize = DIRECTORY_ENTRY_SIZE * NUM_DIR_ENTRIES;

pub struct FileSystem {
    sched: Arc<Scheduler>,
    disk: Arc<SynchDisk>,
    fs_synch_list: FsSynchList,
    file_synch_list: FileSynchList,
}

impl FileSystem {
    /// Mount the file system, formatting the disk first when asked. The free
    /// map and root directory come up open and stay open.
    pub fn new(sched: Arc<Scheduler>, disk: Arc<SynchDisk>, format: bool) -> Arc<Self> {
        log::debug!("initializing the file system (format: {})", format);
        if format {
            Self::format(&disk);
        }

        let fs = Arc::new(Self {
            sched: sched.clone(),
            disk: disk.clone(),
            fs_synch_list: FsSynchList::new(sched.clone()),
            file_synch_list: FileSynchList::new(sched.clone()),
        });

        fs.fs_synch_list.acquire_lock();
        fs.fs_synch_list.add(Arc::new(FsSynch::new(
            sched.clone(),
            OpenFile::new(disk.clone(), FREE_MAP_SECTOR),
            FREE_MAP_SECTOR,
        )));
        fs.fs_synch_list.add(Arc::new(FsSynch::new(
            sched,
            OpenFile::new(disk, ROOT_DIRECTORY_SECTOR),
            ROOT_DIRECTORY_SECTOR,
        )));
        fs.fs_synch_list.release_lock();
        fs
    }

    fn format(disk: &Arc<SynchDisk>) {
        log::debug!("formatting the disk");
        let mut free_map = Bitmap::new(NUM_SECTORS);
        free_map.mark(FREE_MAP_SECTOR as usize);
        free_map.mark(ROOT_DIRECTORY_SECTOR as usize);

        let mut map_hdr = FileHeader::new();
        let mut dir_hdr = FileHeader::new();
        assert!(map_hdr.allocate(&mut free_map, FREE_MAP_FILE_SIZE));
        assert!(dir_hdr.allocate(&mut free_map, DIRECTORY_FILE_SIZE));

        // Headers must hit the disk before the files can be opened.
        map_hdr.write_back(disk, FREE_MAP_SECTOR);
        dir_hdr.write_back(disk, ROOT_DIRECTORY_SECTOR);

        let map_file = OpenFile::new(disk.clone(), FREE_MAP_SECTOR);
        let dir_file = OpenFile::new(disk.clone(), ROOT_DIRECTORY_SECTOR);
        free_map.write_back(&map_file);
        Directory::new(NUM_DIR_ENTRIES).write_back(&dir_file);
    }

    pub fn disk(&self) -> &Arc<SynchDisk> {
        &self.disk
    }

    /// Create a file of `initial_size` bytes, or an empty directory.
    ///
    /// Fails on a missing intermediate directory, a name collision, no free
    /// sector for the header or data, or a full directory whose expansion
    /// failed. `SWAP.`-prefixed directory names are rejected at the root so
    /// they cannot collide with demand-paging swap files.
    pub fn create(&self, full_path: &str, initial_size: usize, is_dir: bool) -> Result<(), FsError> {
        if full_path.len() > PATH_NAME_MAX_LEN {
            return Err(FsError::NameTooLong);
        }
        let (dir_path, name) = split_path(full_path);
        if name.is_empty() {
            return Err(FsError::AlreadyExists);
        }
        if name.len() > FILE_NAME_MAX_LEN {
            return Err(FsError::NameTooLong);
        }

        let dir_synch = self.find_directory(dir_path).ok_or(FsError::NotFound)?;
        if is_dir && dir_synch.sector() == ROOT_DIRECTORY_SECTOR && name.starts_with("SWAP.") {
            return Err(FsError::ReservedName);
        }

        if is_dir {
            log::debug!("creating directory `{}`", full_path);
        } else {
            log::debug!("creating file `{}`, size {}", full_path, initial_size);
        }

        dir_synch.acquire_lock();
        let result = self.create_locked(&dir_synch, name, initial_size, is_dir);
        dir_synch.release_lock();
        result
    }

    fn create_locked(
        &self,
        dir_synch: &Arc<FsSynch>,
        name: &str,
        initial_size: usize,
        is_dir: bool,
    ) -> Result<(), FsError> {
        let mut dir = Directory::new(0);
        dir.fetch_from(dir_synch.file());
        if dir.find(name).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let free_map_synch = self.synch_for(FREE_MAP_SECTOR);
        free_map_synch.acquire_lock();
        let result = (|| {
            let mut free_map = Bitmap::new(NUM_SECTORS);
            free_map.fetch_from(free_map_synch.file());

            let sector = free_map.find().ok_or(FsError::NoFreeSector)? as u32;
            let mut hdr = FileHeader::new();
            let size = if is_dir { DIRECTORY_FILE_SIZE } else { initial_size };
            if !hdr.allocate(&mut free_map, size) {
                return Err(FsError::NoFreeSector);
            }
            // The directory slot comes last: its expansion writes the
            // directory header out, so every fallible step must already have
            // passed by then.
            dir.add(name, sector, is_dir, &mut free_map, dir_synch, &self.disk)?;

            hdr.write_back(&self.disk, sector);
            dir.write_back(dir_synch.file());
            free_map.write_back(free_map_synch.file());

            if is_dir {
                // A fresh directory starts as an empty table on its first
                // data sectors.
                let new_dir_file = OpenFile::new(self.disk.clone(), sector);
                Directory::new(NUM_DIR_ENTRIES).write_back(&new_dir_file);
            }
            Ok(())
        })();
        free_map_synch.release_lock();
        result
    }

    /// Open a regular file for reading and writing.
    pub fn open(self: &Arc<Self>, full_path: &str) -> Result<Arc<OpenFile>, FsError> {
        if full_path.len() > PATH_NAME_MAX_LEN {
            return Err(FsError::NameTooLong);
        }
        let (dir_path, name) = split_path(full_path);
        let dir_synch = self.find_directory(dir_path).ok_or(FsError::NotFound)?;

        log::debug!("opening file `{}`", full_path);
        dir_synch.acquire_lock();
        let result = (|| {
            let mut dir = Directory::new(0);
            dir.fetch_from(dir_synch.file());
            let entry = dir.entry(name).ok_or(FsError::NotFound)?;
            if entry.is_dir() {
                return Err(FsError::IsADirectory);
            }
            let sector = entry.sector();

            self.file_synch_list.acquire_lock();
            let synch = match self.file_synch_list.get(sector) {
                Some(synch) => {
                    if !synch.file_opened() {
                        self.file_synch_list.release_lock();
                        return Err(FsError::BeingRemoved);
                    }
                    synch
                }
                None => {
                    let synch = Arc::new(FileSynch::new(
                        self.sched.clone(),
                        &self.disk,
                        full_path,
                        sector,
                    ));
                    self.file_synch_list.add(synch.clone());
                    synch
                }
            };
            self.file_synch_list.release_lock();

            Ok(Arc::new(OpenFile::new_synchronized(
                self.disk.clone(),
                synch,
                self,
            )))
        })();
        dir_synch.release_lock();
        result
    }

    /// Remove a file or an empty directory.
    ///
    /// A file still open by some thread is only marked: opens fail from this
    /// point on, and the blocks are freed when the last opener closes.
    pub fn remove(&self, full_path: &str) -> Result<(), FsError> {
        if full_path.len() > PATH_NAME_MAX_LEN {
            return Err(FsError::NameTooLong);
        }
        let (dir_path, name) = split_path(full_path);
        let dir_synch = self.find_directory(dir_path).ok_or(FsError::NotFound)?;

        log::debug!("removing `{}`", full_path);
        dir_synch.acquire_lock();
        let result = self.remove_locked(&dir_synch, name);
        dir_synch.release_lock();
        result
    }

    fn remove_locked(&self, dir_synch: &Arc<FsSynch>, name: &str) -> Result<(), FsError> {
        let mut dir = Directory::new(0);
        dir.fetch_from(dir_synch.file());
        let entry = dir.entry(name).ok_or(FsError::NotFound)?;
        let sector = entry.sector();

        if entry.is_dir() {
            // Only empty directories go; drop the directory's FsSynch with
            // it so a later create at this sector starts fresh.
            self.fs_synch_list.acquire_lock();
            let sub_synch = self.fs_synch_list.get(sector);
            let opened_here;
            let sub_file: &OpenFile = match &sub_synch {
                Some(synch) => {
                    opened_here = None;
                    synch.file()
                }
                None => {
                    opened_here = Some(OpenFile::new(self.disk.clone(), sector));
                    opened_here.as_ref().unwrap()
                }
            };
            let mut sub_dir = Directory::new(0);
            sub_dir.fetch_from(sub_file);
            if !sub_dir.is_empty() {
                self.fs_synch_list.release_lock();
                return Err(FsError::DirectoryNotEmpty);
            }
            if sub_synch.is_some() {
                self.fs_synch_list.remove(sector);
            }
            self.fs_synch_list.release_lock();
        } else {
            self.file_synch_list.acquire_lock();
            let synch = self.file_synch_list.get(sector);
            self.file_synch_list.release_lock();
            if let Some(synch) = synch {
                log::debug!("`{}` is open; deferring removal", name);
                synch.set_to_remove();
                return Ok(());
            }
        }

        self.delete_on_disk(&mut dir, dir_synch, name, sector);
        Ok(())
    }

    /// Physically delete: free the data blocks and the header sector, drop
    /// the directory entry, flush free map and directory.
    fn delete_on_disk(
        &self,
        dir: &mut Directory,
        dir_synch: &Arc<FsSynch>,
        name: &str,
        sector: u32,
    ) {
        let hdr = FileHeader::fetch_from(&self.disk, sector);

        let free_map_synch = self.synch_for(FREE_MAP_SECTOR);
        free_map_synch.acquire_lock();
        let mut free_map = Bitmap::new(NUM_SECTORS);
        free_map.fetch_from(free_map_synch.file());
        hdr.deallocate(&mut free_map);
        free_map.clear(sector as usize);
        dir.remove(name);
        free_map.write_back(free_map_synch.file());
        free_map_synch.release_lock();

        self.disk.clear_sector(sector);
        dir.write_back(dir_synch.file());
    }

    /// Close bookkeeping, reached from the open-file handle's drop. The last
    /// close of a file marked for removal re-runs `remove` on the stored
    /// path; with the `FileSynch` gone it takes the physical-delete branch.
    pub(crate) fn close_file(&self, sector: u32) {
        self.file_synch_list.acquire_lock();
        let Some(synch) = self.file_synch_list.get(sector) else {
            self.file_synch_list.release_lock();
            return;
        };
        let all_closed = synch.file_closed();
        let mut remove_path = None;
        if all_closed {
            self.file_synch_list.remove(sector);
            if synch.ready_to_remove() {
                remove_path = Some(synch.path().to_string());
            }
        }
        self.file_synch_list.release_lock();

        if let Some(path) = remove_path {
            if let Err(err) = self.remove(&path) {
                log::warn!("deferred removal of `{}` failed: {}", path, err);
            }
        }
    }

    /// Grow an open file by `add_bytes`, flushing header and free map. The
    /// caller must hold the file's writer exclusion.
    pub fn expand_file(&self, sector: u32, add_bytes: usize) -> bool {
        assert!(add_bytes != 0);

        self.file_synch_list.acquire_lock();
        let synch = self.file_synch_list.get(sector);
        self.file_synch_list.release_lock();
        let synch = synch.expect("expanding a file that is not open");

        let free_map_synch = self.synch_for(FREE_MAP_SECTOR);
        free_map_synch.acquire_lock();
        let mut free_map = Bitmap::new(NUM_SECTORS);
        free_map.fetch_from(free_map_synch.file());

        let header = synch.header();
        let expanded = {
            let mut hdr = header.lock();
            hdr.expand(&mut free_map, add_bytes).then(|| hdr.clone())
        };
        let ok = match expanded {
            Some(hdr) => {
                hdr.write_back(&self.disk, sector);
                free_map.write_back(free_map_synch.file());
                true
            }
            None => false,
        };
        free_map_synch.release_lock();
        ok
    }

    /// Resolve a directory path to its `FsSynch`, opening (lazily creating
    /// synch state for) every directory along the way. Parent locks are
    /// released as the walk advances; nothing is held on return.
    pub fn find_directory(&self, dir_path: &str) -> Option<Arc<FsSynch>> {
        let mut current = if dir_path.starts_with('/') {
            self.synch_for(ROOT_DIRECTORY_SECTOR)
        } else {
            let cwd = self.sched.current().current_dir();
            self.synch_for(cwd)
        };

        for component in components(dir_path) {
            current.acquire_lock();
            let mut dir = Directory::new(0);
            dir.fetch_from(current.file());
            let next = match dir.entry(component) {
                Some(entry) if entry.is_dir() => entry.sector(),
                _ => {
                    current.release_lock();
                    return None;
                }
            };
            let next_synch = self.synch_for(next);
            current.release_lock();
            current = next_synch;
        }
        Some(current)
    }

    /// The `FsSynch` for a header sector, created on first use.
    fn synch_for(&self, sector: u32) -> Arc<FsSynch> {
        self.fs_synch_list.acquire_lock();
        let synch = match self.fs_synch_list.get(sector) {
            Some(synch) => synch,
            None => self.fs_synch_list.add(Arc::new(FsSynch::new(
                self.sched.clone(),
                OpenFile::new(self.disk.clone(), sector),
                sector,
            ))),
        };
        self.fs_synch_list.release_lock();
        synch
    }

    /// Remove swap files left in the root directory by a previous run.
    pub fn cleanup(&self) {
        let root = self.synch_for(ROOT_DIRECTORY_SECTOR);
        root.acquire_lock();
        let mut dir = Directory::new(0);
        dir.fetch_from(root.file());
        let stale = dir.swap_file_names();
        root.release_lock();

        for name in stale {
            let swap_path = format!("/{}", name);
            log::info!("removing stale swap file `{}`", swap_path);
            if let Err(err) = self.remove(&swap_path) {
                log::warn!("could not remove `{}`: {}", swap_path, err);
            }
        }
    }

    /// Every path in the file system, directories suffixed with `/`.
    pub fn list(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.list_dir(ROOT_DIRECTORY_SECTOR, "", &mut paths);
        paths
    }

    fn list_dir(&self, sector: u32, prefix: &str, paths: &mut Vec<String>) {
        let file = OpenFile::new(self.disk.clone(), sector);
        let mut dir = Directory::new(0);
        dir.fetch_from(&file);
        for entry in dir.entries() {
            let entry_path = format!("{}/{}", prefix, entry.name());
            if entry.is_dir() {
                paths.push(format!("{}/", entry_path));
                self.list_dir(entry.sector(), &entry_path, paths);
            } else {
                paths.push(entry_path);
            }
        }
    }

    /// Verify the invariants the file system lives by: every referenced
    /// sector in range and referenced exactly once, header sizes consistent,
    /// directory names unique and bounded, and the rebuilt shadow bitmap
    /// equal to the on-disk free map. True iff no inconsistency.
    pub fn check(&self) -> bool {
        log::debug!("performing file system check");
        let mut shadow = Bitmap::new(NUM_SECTORS);
        shadow.mark(FREE_MAP_SECTOR as usize);
        shadow.mark(ROOT_DIRECTORY_SECTOR as usize);
        let mut ok = true;

        let map_hdr = FileHeader::fetch_from(&self.disk, FREE_MAP_SECTOR);
        if map_hdr.num_bytes() != FREE_MAP_FILE_SIZE {
            log::warn!("bad free map header: wrong file size");
            ok = false;
        }
        ok &= Self::check_header(&map_hdr, &mut shadow);

        let dir_hdr = FileHeader::fetch_from(&self.disk, ROOT_DIRECTORY_SECTOR);
        ok &= Self::check_header(&dir_hdr, &mut shadow);
        ok &= self.check_directory(ROOT_DIRECTORY_SECTOR, &mut shadow);

        let mut free_map = Bitmap::new(NUM_SECTORS);
        free_map.fetch_from(&OpenFile::new(self.disk.clone(), FREE_MAP_SECTOR));
        for sector in 0..NUM_SECTORS {
            if free_map.test(sector) != shadow.test(sector) {
                log::warn!(
                    "inconsistent bitmap at sector {}: marked {}, referenced {}",
                    sector,
                    free_map.test(sector),
                    shadow.test(sector)
                );
                ok = false;
            }
        }

        log::debug!(
            "file system check {}",
            if ok { "succeeded" } else { "failed" }
        );
        ok
    }

    fn check_sector(sector: u32, shadow: &mut Bitmap) -> bool {
        if sector as usize >= NUM_SECTORS {
            log::warn!("sector number {} out of range", sector);
            return false;
        }
        if shadow.test(sector as usize) {
            log::warn!("sector {} referenced twice", sector);
            return false;
        }
        shadow.mark(sector as usize);
        true
    }

    fn check_header(hdr: &FileHeader, shadow: &mut Bitmap) -> bool {
        let mut ok = true;
        if hdr.num_sectors() != hdr.num_bytes().div_ceil(SECTOR_SIZE) {
            log::warn!("sector count not compatible with file size");
            ok = false;
        }
        if hdr.num_sectors() > MAX_FILE_SECTORS {
            log::warn!("too many blocks in header");
            return false;
        }
        for index in 0..hdr.num_sectors() {
            ok &= Self::check_sector(hdr.byte_to_sector(index * SECTOR_SIZE), shadow);
        }
        for table_sector in hdr.table_sector_numbers() {
            ok &= Self::check_sector(table_sector, shadow);
        }
        ok
    }

    fn check_directory(&self, sector: u32, shadow: &mut Bitmap) -> bool {
        let file = OpenFile::new(self.disk.clone(), sector);
        let mut dir = Directory::new(0);
        dir.fetch_from(&file);

        let mut ok = true;
        let mut names = HashSet::new();
        for entry in dir.entries() {
            if entry.name().len() > FILE_NAME_MAX_LEN {
                log::warn!("name `{}` too long", entry.name());
                ok = false;
            }
            if !names.insert(entry.name().to_string()) {
                log::warn!("repeated name `{}`", entry.name());
                ok = false;
            }
            ok &= Self::check_sector(entry.sector(), shadow);
            let hdr = FileHeader::fetch_from(&self.disk, entry.sector());
            ok &= Self::check_header(&hdr, shadow);
            if entry.is_dir() {
                ok &= self.check_directory(entry.sector(), shadow);
            }
        }
        ok
    }
}
