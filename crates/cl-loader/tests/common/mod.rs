//! Fixture images for loader tests

#![allow(dead_code)]

use cl_loader::elf::{ident, shf, sht, Endian, ELF_MAGIC, EHDR_SIZE, SHDR_SIZE};
use cl_loader::ErrorSink;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::io::Write;
use tempfile::NamedTempFile;

/// One section of a fixture image
#[derive(Debug, Clone)]
pub struct FixtureSection {
    pub sh_type: u32,
    pub flags: u32,
    pub addr: u32,
    /// Bytes stored in the file for this section
    pub data: Vec<u8>,
    /// sh_size override (NOBITS sections have no file data)
    pub size: Option<u32>,
    /// sh_offset override
    pub offset: Option<u32>,
}

impl FixtureSection {
    pub fn null() -> Self {
        Self::new(sht::NULL, 0, 0, Vec::new())
    }

    pub fn new(sh_type: u32, flags: u32, addr: u32, data: Vec<u8>) -> Self {
        Self {
            sh_type,
            flags,
            addr,
            data,
            size: None,
            offset: None,
        }
    }

    pub fn progbits(addr: u32, data: Vec<u8>) -> Self {
        Self::new(sht::PROGBITS, shf::ALLOC | shf::EXECINSTR, addr, data)
    }

    pub fn nobits(addr: u32, size: u32) -> Self {
        Self {
            size: Some(size),
            ..Self::new(sht::NOBITS, shf::ALLOC | shf::WRITE, addr, Vec::new())
        }
    }

    pub fn compressed(addr: u32, data: &[u8], endian: Endian) -> Self {
        Self::new(
            sht::PROGBITS,
            shf::ALLOC | shf::RPL_ZLIB,
            addr,
            compress_section(data, data.len() as u32, endian),
        )
    }
}

/// Size prefix followed by the zlib stream of `data`
pub fn compress_section(data: &[u8], declared_size: u32, endian: Endian) -> Vec<u8> {
    let mut out = match endian {
        Endian::Big => declared_size.to_be_bytes().to_vec(),
        Endian::Little => declared_size.to_le_bytes().to_vec(),
    };
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    out.extend(encoder.finish().unwrap());
    out
}

/// Deterministic, non-repeating-looking content
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(2654435761).rotate_left(seed as u32 % 32) as u8 ^ seed)
        .collect()
}

/// Builds an RPL image in memory
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    pub endian: Endian,
    pub sections: Vec<FixtureSection>,
    pub table_offset: Option<u32>,
    pub shnum_override: Option<u16>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self {
            endian: Endian::Big,
            sections: Vec::new(),
            table_offset: None,
            shnum_override: None,
        }
    }

    pub fn endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn section(mut self, section: FixtureSection) -> Self {
        self.sections.push(section);
        self
    }

    pub fn table_offset(mut self, offset: u32) -> Self {
        self.table_offset = Some(offset);
        self
    }

    pub fn shnum(mut self, count: u16) -> Self {
        self.shnum_override = Some(count);
        self
    }

    fn put_u16(&self, buf: &mut [u8], at: usize, value: u16) {
        let bytes = match self.endian {
            Endian::Big => value.to_be_bytes(),
            Endian::Little => value.to_le_bytes(),
        };
        buf[at..at + 2].copy_from_slice(&bytes);
    }

    fn put_u32(&self, buf: &mut [u8], at: usize, value: u32) {
        let bytes = match self.endian {
            Endian::Big => value.to_be_bytes(),
            Endian::Little => value.to_le_bytes(),
        };
        buf[at..at + 4].copy_from_slice(&bytes);
    }

    /// Lay out header, section data and table; returns the bytes and each section's offset
    pub fn build_with_offsets(&self) -> (Vec<u8>, Vec<u32>) {
        let table_len = (self.sections.len() * SHDR_SIZE) as u32;
        let mut cursor = match self.table_offset {
            Some(offset) => offset + table_len,
            None => 0x40,
        };

        let mut offsets = Vec::with_capacity(self.sections.len());
        let mut blobs = Vec::new();
        for section in &self.sections {
            if section.data.is_empty() {
                offsets.push(section.offset.unwrap_or(0));
                continue;
            }
            cursor = (cursor + 15) & !15;
            offsets.push(section.offset.unwrap_or(cursor));
            blobs.push((cursor, &section.data));
            cursor += section.data.len() as u32;
        }

        let table_offset = self.table_offset.unwrap_or((cursor + 3) & !3);
        let file_len = (cursor as usize).max(table_offset as usize + table_len as usize);
        let mut buf = vec![0u8; file_len.max(EHDR_SIZE)];

        buf[0..4].copy_from_slice(&ELF_MAGIC);
        buf[ident::CLASS] = ident::ELFCLASS32;
        buf[ident::DATA] = match self.endian {
            Endian::Big => ident::ELFDATA2MSB,
            Endian::Little => ident::ELFDATA2LSB,
        };
        buf[6] = 1;
        buf[ident::OSABI] = ident::OSABI_CAFE;
        buf[ident::ABIVERSION] = ident::ABIVERSION_CAFE;
        self.put_u16(&mut buf, 16, 0xFE01);
        self.put_u16(&mut buf, 18, 20);
        self.put_u32(&mut buf, 20, 1);
        self.put_u32(&mut buf, 32, table_offset);
        self.put_u16(&mut buf, 40, EHDR_SIZE as u16);
        self.put_u16(&mut buf, 46, SHDR_SIZE as u16);
        self.put_u16(
            &mut buf,
            48,
            self.shnum_override.unwrap_or(self.sections.len() as u16),
        );

        for (offset, data) in blobs {
            buf[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        }

        for (i, section) in self.sections.iter().enumerate() {
            let at = table_offset as usize + i * SHDR_SIZE;
            let size = section.size.unwrap_or(section.data.len() as u32);
            self.put_u32(&mut buf, at + 4, section.sh_type);
            self.put_u32(&mut buf, at + 8, section.flags);
            self.put_u32(&mut buf, at + 12, section.addr);
            self.put_u32(&mut buf, at + 16, offsets[i]);
            self.put_u32(&mut buf, at + 20, size);
        }

        (buf, offsets)
    }

    pub fn build(&self) -> Vec<u8> {
        self.build_with_offsets().0
    }

    pub fn write(&self) -> NamedTempFile {
        write_temp(&self.build())
    }
}

pub fn write_temp(data: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(data).expect("Failed to write image");
    file.flush().unwrap();
    file
}

/// Sink that keeps every report for later inspection
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}
