use core::fmt;

/// Why a file-system operation failed. These surface at the syscall boundary
/// as `-1` plus a log line; kernel bugs are asserts, not variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    NotADirectory,
    IsADirectory,
    AlreadyExists,
    /// No free disk sector for a header, table or data block.
    NoFreeSector,
    /// Directory full and its expansion failed.
    DirectoryFull,
    DirectoryNotEmpty,
    /// The file is marked for removal; new opens must fail.
    BeingRemoved,
    NameTooLong,
    /// `SWAP.`-prefixed directory names are reserved under the root.
    ReservedName,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FsError::NotFound => "no such file or directory",
            FsError::NotADirectory => "not a directory",
            FsError::IsADirectory => "is a directory",
            FsError::AlreadyExists => "name already exists",
            FsError::NoFreeSector => "no free disk sector",
            FsError::DirectoryFull => "directory full and expansion failed",
            FsError::DirectoryNotEmpty => "directory not empty",
            FsError::BeingRemoved => "file is being removed",
            FsError::NameTooLong => "name too long",
            FsError::ReservedName => "name is reserved",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for FsError {}
