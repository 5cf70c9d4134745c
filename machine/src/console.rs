//! The character console: one input stream, one output stream.
//!
//! The kernel wraps this with its own locks and completion semaphores; the
//! raw device only moves single bytes.

use std::io::{Read, Write};

use spin::Mutex;

pub struct Console {
    input: Mutex<Box<dyn Read + Send>>,
    output: Mutex<Box<dyn Write + Send>>,
}

impl Console {
    pub fn new(input: Box<dyn Read + Send>, output: Box<dyn Write + Send>) -> Self {
        Self {
            input: Mutex::new(input),
            output: Mutex::new(output),
        }
    }

    /// Read one byte, or `None` when the input stream is exhausted.
    pub fn get_char(&self) -> Option<u8> {
        let mut byte = [0u8; 1];
        let mut input = self.input.lock();
        match input.read(&mut byte) {
            Ok(1) => Some(byte[0]),
            _ => None,
        }
    }

    pub fn put_char(&self, ch: u8) {
        let mut output = self.output.lock();
        // Console output is best-effort; a broken pipe is not a kernel error.
        let _ = output.write_all(&[ch]);
        let _ = output.flush();
    }
}
