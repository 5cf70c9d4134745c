//! Kernel-wide constants.

use machine::PAGE_SIZE;

/// Bytes reserved for a user program's stack when sizing its address space.
pub const USER_STACK_SIZE: usize = 8 * PAGE_SIZE;

/// File and directory names are bounded so a directory entry stays fixed
/// size; paths are bounded so syscall marshalling can use a fixed buffer.
pub const FILE_NAME_MAX_LEN: usize = 20;
pub const PATH_NAME_MAX_LEN: usize = FILE_NAME_MAX_LEN * 5;

/// Entries a freshly created directory starts with.
pub const NUM_DIR_ENTRIES: usize = 10;
/// Entries added when a full directory expands.
pub const NEW_DIR_ENTRIES: usize = 5;

/// Slots in a thread's open-file table, including the two console ids.
pub const MAX_OPEN_FILES: usize = 16;

/// Concurrently live user spaces.
pub const MAX_USER_THREADS: usize = 16;

/// Scheduling priorities; higher runs first. New threads start in the
/// middle so tests can fork both lower- and higher-priority peers.
pub const NUM_PRIORITIES: u32 = 10;
pub const DEFAULT_PRIORITY: u32 = NUM_PRIORITIES / 2;
