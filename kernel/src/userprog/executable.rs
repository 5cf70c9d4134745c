//! User executable images.
//!
//! An image starts with a fixed 40-byte header: a magic word and three
//! segments (code, initialized data, uninitialized data), each described by
//! its virtual address, its offset in the file and its size. The
//! uninitialized segment occupies no file bytes; it only contributes to the
//! address-space size.

use std::sync::Arc;

use crate::fs::OpenFile;

pub const NOFF_MAGIC: u32 = 0x00ba_dfad;

const HEADER_SIZE: usize = 40;

#[derive(Debug, Clone, Copy, Default)]
pub struct Segment {
    pub virtual_addr: u32,
    pub in_file_addr: u32,
    pub size: u32,
}

pub struct Executable {
    file: Arc<OpenFile>,
    code: Segment,
    init_data: Segment,
    uninit_data: Segment,
}

impl Executable {
    /// Parse the header; `None` when the magic does not match or the file is
    /// too short to hold a header.
    pub fn new(file: Arc<OpenFile>) -> Option<Self> {
        let mut header = [0u8; HEADER_SIZE];
        if file.read_at(&mut header, 0) != HEADER_SIZE {
            return None;
        }
        let word = |index: usize| {
            u32::from_le_bytes([
                header[index * 4],
                header[index * 4 + 1],
                header[index * 4 + 2],
                header[index * 4 + 3],
            ])
        };
        if word(0) != NOFF_MAGIC {
            log::debug!("executable has bad magic {:#x}", word(0));
            return None;
        }
        let segment = |at: usize| Segment {
            virtual_addr: word(at),
            in_file_addr: word(at + 1),
            size: word(at + 2),
        };
        Some(Self {
            file,
            code: segment(1),
            init_data: segment(4),
            uninit_data: segment(7),
        })
    }

    /// Bytes of address space the image needs, stack excluded.
    pub fn size(&self) -> usize {
        (self.code.size + self.init_data.size + self.uninit_data.size) as usize
    }

    pub fn code_addr(&self) -> usize {
        self.code.virtual_addr as usize
    }

    pub fn code_size(&self) -> usize {
        self.code.size as usize
    }

    pub fn init_data_addr(&self) -> usize {
        self.init_data.virtual_addr as usize
    }

    pub fn init_data_size(&self) -> usize {
        self.init_data.size as usize
    }

    /// Read code-segment bytes starting `offset` bytes into the segment.
    pub fn read_code_block(&self, buf: &mut [u8], offset: usize) -> usize {
        self.file
            .read_at(buf, self.code.in_file_addr as usize + offset)
    }

    /// Read initialized-data bytes starting `offset` bytes into the segment.
    pub fn read_data_block(&self, buf: &mut [u8], offset: usize) -> usize {
        self.file
            .read_at(buf, self.init_data.in_file_addr as usize + offset)
    }
}

/// Assemble an image: header, then code bytes, then initialized data. Used
/// by the disk packer and by tests standing in for a real cross-compiler.
pub fn build_image(
    code_addr: u32,
    code: &[u8],
    init_data_addr: u32,
    init_data: &[u8],
    uninit_data_size: u32,
) -> Vec<u8> {
    let mut image = Vec::with_capacity(HEADER_SIZE + code.len() + init_data.len());
    let code_at = HEADER_SIZE as u32;
    let data_at = code_at + code.len() as u32;

    for word in [
        NOFF_MAGIC,
        code_addr,
        code_at,
        code.len() as u32,
        init_data_addr,
        data_at,
        init_data.len() as u32,
        code_addr + code.len() as u32 + init_data.len() as u32,
        0,
        uninit_data_size,
    ] {
        image.extend_from_slice(&word.to_le_bytes());
    }
    image.extend_from_slice(code);
    image.extend_from_slice(init_data);
    image
}
