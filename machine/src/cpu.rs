//! The MIPS register file.

use spin::Mutex;

/// General-purpose registers plus the special ones below.
pub const NUM_TOTAL_REGS: usize = 40;

/// User stack pointer.
pub const STACK_REG: usize = 29;
/// Holds the return address for procedure calls.
pub const RET_ADDR_REG: usize = 31;
/// Current program counter.
pub const PC_REG: usize = 34;
/// Next program counter, needed for the branch-delay slot.
pub const NEXT_PC_REG: usize = 35;
/// Previous program counter, for debugging.
pub const PREV_PC_REG: usize = 36;
/// The failing virtual address on an exception.
pub const BAD_VADDR_REG: usize = 39;

pub struct Registers {
    regs: Mutex<[i32; NUM_TOTAL_REGS]>,
}

impl Registers {
    pub fn new() -> Self {
        Self {
            regs: Mutex::new([0; NUM_TOTAL_REGS]),
        }
    }

    pub fn read(&self, reg: usize) -> i32 {
        assert!(reg < NUM_TOTAL_REGS);
        self.regs.lock()[reg]
    }

    pub fn write(&self, reg: usize, value: i32) {
        assert!(reg < NUM_TOTAL_REGS);
        self.regs.lock()[reg] = value;
    }

    /// Snapshot for a context switch out.
    pub fn save(&self) -> [i32; NUM_TOTAL_REGS] {
        *self.regs.lock()
    }

    /// Reload on a context switch in.
    pub fn restore(&self, saved: &[i32; NUM_TOTAL_REGS]) {
        *self.regs.lock() = *saved;
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}
