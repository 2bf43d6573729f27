//! Header and section table reader
//!
//! Both the header and the section header table are exposed through
//! read-only file mappings. Every field access goes through a slice whose
//! length was validated against the file when it was mapped.

use crate::elf::{Elf32Header, Endian, SectionHeader, EHDR_SIZE, SHDR_SIZE};
use cl_core::error::{FormatError, LoaderError, Result};
use cl_memory::{FileMapping, PageSize};
use std::fs::File;
use std::io;
use tracing::debug;

/// The parsed header together with the mapping it was read from
#[derive(Debug)]
pub struct ImageHeader {
    mapping: FileMapping,
    header: Elf32Header,
}

impl ImageHeader {
    pub fn header(&self) -> &Elf32Header {
        &self.header
    }

    /// The raw header bytes as they appear in the file
    pub fn raw(&self) -> &[u8] {
        self.mapping.as_slice()
    }
}

/// Bounds-checked view over the mapped section header table
#[derive(Debug)]
pub struct SectionTable {
    mapping: FileMapping,
    count: usize,
    entry_size: usize,
    endian: Endian,
}

impl SectionTable {
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Decode entry `index`, or `None` past the end of the table
    pub fn get(&self, index: usize) -> Option<SectionHeader> {
        if index >= self.count {
            return None;
        }
        let start = index.checked_mul(self.entry_size)?;
        let bytes = self.mapping.as_slice().get(start..start.checked_add(SHDR_SIZE)?)?;
        Some(SectionHeader::parse(bytes, self.endian))
    }

    /// All entries in table order, including the null entry at index 0
    pub fn iter(&self) -> impl Iterator<Item = SectionHeader> + '_ {
        (0..self.count).filter_map(move |i| self.get(i))
    }
}

/// Reads image metadata from an open file
#[derive(Debug, Clone, Copy)]
pub struct ImageReader {
    page: PageSize,
}

impl ImageReader {
    /// Create a reader mapping with the given page granularity
    ///
    /// `page` must be the host page size (or a multiple of it) since it
    /// determines the file offsets handed to `mmap`.
    pub fn new(page: PageSize) -> Self {
        Self { page }
    }

    /// Read and identify the file header
    pub fn read_header(&self, file: &File) -> Result<ImageHeader> {
        let file_size = file_len(file)?;

        if file_size < EHDR_SIZE as u64 {
            return Err(LoaderError::io(
                "failed to read image header",
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "file is {} bytes, the header needs {}",
                        file_size, EHDR_SIZE
                    ),
                ),
            ));
        }

        let mapping = FileMapping::map(file, 0, EHDR_SIZE, self.page)?;
        let header = Elf32Header::parse(mapping.as_slice())?;

        if !header.is_cafe_abi() {
            debug!(
                "OS ABI is {:#04x}/{:#04x}, not Cafe OS; loading anyway",
                header.e_ident[crate::elf::ident::OSABI],
                header.e_ident[crate::elf::ident::ABIVERSION]
            );
        }

        debug!(
            "Image header: type=0x{:04x}, machine={}, shoff=0x{:x}, shnum={}, shentsize={}, {:?}-endian",
            header.e_type,
            header.e_machine,
            header.e_shoff,
            header.e_shnum,
            header.e_shentsize,
            header.endian()
        );

        Ok(ImageHeader { mapping, header })
    }

    /// Validate the section table bounds and map the table
    pub fn read_section_table(&self, file: &File, header: &Elf32Header) -> Result<SectionTable> {
        if header.e_shnum == 0 {
            return Err(FormatError::EmptySectionTable.into());
        }

        let file_size = file_len(file)?;
        let offset = u64::from(header.e_shoff);
        let table_len = u64::from(header.e_shnum)
            .checked_mul(u64::from(header.e_shentsize))
            .ok_or(FormatError::Overflow("section table length"))?;
        let end = offset
            .checked_add(table_len)
            .ok_or(FormatError::Overflow("section table end"))?;

        if offset >= file_size || end > file_size {
            return Err(FormatError::SectionTableOutOfBounds {
                offset,
                end,
                file_size,
            }
            .into());
        }

        let len = usize::try_from(table_len).map_err(|_| FormatError::Overflow("section table length"))?;
        let mapping = FileMapping::map(file, offset, len, self.page)?;

        debug!(
            "Mapped {} section headers at 0x{:x} ({} bytes, {} mapped)",
            header.e_shnum,
            offset,
            len,
            mapping.mapped_len()
        );

        Ok(SectionTable {
            mapping,
            count: header.e_shnum as usize,
            entry_size: header.e_shentsize as usize,
            endian: header.endian(),
        })
    }
}

impl Default for ImageReader {
    fn default() -> Self {
        Self::new(PageSize::host())
    }
}

pub(crate) fn file_len(file: &File) -> Result<u64> {
    file.metadata()
        .map(|meta| meta.len())
        .map_err(|e| LoaderError::io("failed to query image size", e))
}
