//! Synchronized console: per-direction locks so concurrent writers do not
//! interleave characters, plus the completion semaphores the raw device
//! posts. As with the disk, completion is posted synchronously in this
//! simulation; the blocking structure is the original's.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use machine::{Console, Statistics};

use crate::sync::{Lock, Semaphore};
use crate::thread::Scheduler;

pub struct SynchConsole {
    console: Console,
    read_avail: Semaphore,
    write_done: Semaphore,
    read_lock: Lock,
    write_lock: Lock,
    stats: Arc<Statistics>,
}

impl SynchConsole {
    pub fn new(sched: Arc<Scheduler>, console: Console) -> Self {
        let stats = sched.machine().stats.clone();
        Self {
            console,
            read_avail: Semaphore::new(sched.clone(), "read avail", 0),
            write_done: Semaphore::new(sched.clone(), "write done", 0),
            read_lock: Lock::new(sched.clone(), "console read"),
            write_lock: Lock::new(sched, "console write"),
            stats,
        }
    }

    /// One byte from the input stream; `None` at end of input.
    pub fn read_char(&self) -> Option<u8> {
        self.read_avail.v(); // the input-ready interrupt
        self.read_avail.p();
        let ch = self.console.get_char();
        if ch.is_some() {
            self.stats.num_console_chars_read.fetch_add(1, Ordering::Relaxed);
        }
        ch
    }

    pub fn write_char(&self, ch: u8) {
        self.console.put_char(ch);
        self.write_done.v(); // the output-done interrupt
        self.write_done.p();
        self.stats
            .num_console_chars_written
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Read up to `size` bytes, stopping after a newline. The newline, when
    /// seen, is included; the returned length is the byte count.
    pub fn read_buffer(&self, size: usize) -> Vec<u8> {
        self.read_lock.acquire();
        let mut buffer = Vec::with_capacity(size);
        while buffer.len() < size {
            match self.read_char() {
                Some(ch) => {
                    buffer.push(ch);
                    if ch == b'\n' {
                        break;
                    }
                }
                None => break,
            }
        }
        self.read_lock.release();
        buffer
    }

    pub fn write_buffer(&self, buffer: &[u8]) {
        self.write_lock.acquire();
        for &ch in buffer {
            self.write_char(ch);
        }
        self.write_lock.release();
    }
}
