//! The simulated interrupt mask.
//!
//! On the simulated uniprocessor, masking interrupts is what makes the
//! semaphore's check-and-sleep atomic. Only one kernel thread ever runs at a
//! time, so the mask here is bookkeeping: it lets the primitives assert the
//! discipline the original hardware enforced, and it always restores the
//! prior level on exit, since the semaphore may be entered with interrupts
//! already disabled.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntLevel {
    Off,
    On,
}

pub struct Interrupt {
    enabled: AtomicBool,
    halted: AtomicBool,
}

impl Interrupt {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            halted: AtomicBool::new(false),
        }
    }

    /// Set the mask and return the previous level.
    pub fn set_level(&self, level: IntLevel) -> IntLevel {
        let was = self.enabled.swap(level == IntLevel::On, Ordering::SeqCst);
        if was {
            IntLevel::On
        } else {
            IntLevel::Off
        }
    }

    pub fn level(&self) -> IntLevel {
        if self.enabled.load(Ordering::SeqCst) {
            IntLevel::On
        } else {
            IntLevel::Off
        }
    }

    /// Shut the machine down; the kernel checks this after every syscall.
    pub fn halt(&self) {
        log::info!("machine halting");
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}
