//! Load region planning

use crate::elf::{Endian, SectionHeader};
use cl_core::error::{FormatError, LoaderError, Result};
use cl_memory::PageSize;
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, trace};

/// Size of the inflated-size prefix on compressed sections
pub const COMPRESSED_PREFIX_SIZE: u32 = 4;

/// How a section's bytes reach the load region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionContent {
    /// No file content; left zero-filled
    NoBits,
    /// Copied verbatim from the file
    Raw,
    /// Size prefix followed by a zlib stream
    Compressed,
}

/// A participating section with its logical size resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedSection {
    /// Position in the section header table
    pub index: usize,
    pub header: SectionHeader,
    /// In-memory size (the inflated size for compressed sections)
    pub logical_size: u32,
    pub content: SectionContent,
}

impl PlannedSection {
    pub fn addr(&self) -> u32 {
        self.header.sh_addr
    }

    /// First image address past the section
    pub fn end(&self) -> u64 {
        u64::from(self.header.sh_addr) + u64::from(self.logical_size)
    }
}

/// The address range an image needs and the sections that fill it
#[derive(Debug, Clone)]
pub struct LoadPlan {
    /// Lowest participating section address
    pub min_addr: u32,
    /// Highest participating section end address
    pub max_addr: u64,
    /// Page granularity the region was rounded to
    pub page: PageSize,
    /// Participating sections in table order
    pub sections: Vec<PlannedSection>,
}

impl LoadPlan {
    /// Image address that maps to the first byte of the region
    pub fn region_start(&self) -> u64 {
        self.page.align_down(u64::from(self.min_addr))
    }

    /// Page-rounded end of the image's address range
    pub fn region_end(&self) -> u64 {
        // max_addr < 2^33, so rounding up cannot overflow
        self.page.align_up(self.max_addr).unwrap_or(u64::MAX)
    }

    /// Bytes the load region must span
    pub fn region_size(&self) -> u64 {
        self.region_end() - self.region_start()
    }

    /// Offset within the region of an image address, if the address is inside it
    pub fn region_offset(&self, addr: u32) -> Option<u64> {
        let offset = u64::from(addr).checked_sub(self.region_start())?;
        (offset < self.region_size()).then_some(offset)
    }
}

/// Computes the load range for an image's sections
#[derive(Debug, Clone, Copy)]
pub struct AddressPlanner {
    page: PageSize,
    endian: Endian,
}

impl AddressPlanner {
    pub fn new(page: PageSize, endian: Endian) -> Self {
        Self { page, endian }
    }

    /// Resolve logical sizes for every participating section and compute the range
    ///
    /// Compressed sections have their size prefix read from `reader` exactly
    /// once; the result is kept in the returned plan.
    pub fn plan<I, R>(&self, sections: I, reader: &mut R, file_size: u64) -> Result<LoadPlan>
    where
        I: IntoIterator<Item = SectionHeader>,
        R: Read + Seek,
    {
        let mut planned = Vec::new();

        for (index, header) in sections.into_iter().enumerate() {
            if !header.is_loadable() {
                trace!(
                    "Section {} ({}) at 0x{:08x} does not participate",
                    index,
                    header.type_name(),
                    header.sh_addr
                );
                continue;
            }

            let (content, logical_size) = if header.is_nobits() {
                (SectionContent::NoBits, header.sh_size)
            } else if header.is_compressed() {
                let size = self.read_inflated_size(reader, index, &header, file_size)?;
                (SectionContent::Compressed, size)
            } else {
                check_file_range(index, header.sh_offset, header.sh_size, file_size)?;
                (SectionContent::Raw, header.sh_size)
            };

            debug!(
                "Planned section {}: addr=0x{:08x}, size=0x{:x}, logical=0x{:x}, {:?}",
                index, header.sh_addr, header.sh_size, logical_size, content
            );

            planned.push(PlannedSection {
                index,
                header,
                logical_size,
                content,
            });
        }

        let (min_addr, max_addr) = compute_range(&planned)?;
        let plan = LoadPlan {
            min_addr,
            max_addr,
            page: self.page,
            sections: planned,
        };

        if plan.region_size() == 0 {
            return Err(FormatError::EmptyLoadRange.into());
        }

        debug!(
            "Load range 0x{:08x}..0x{:x}, region 0x{:x}..0x{:x} (0x{:x} bytes)",
            plan.min_addr,
            plan.max_addr,
            plan.region_start(),
            plan.region_end(),
            plan.region_size()
        );

        Ok(plan)
    }

    fn read_inflated_size<R: Read + Seek>(
        &self,
        reader: &mut R,
        index: usize,
        header: &SectionHeader,
        file_size: u64,
    ) -> Result<u32> {
        if header.sh_size < COMPRESSED_PREFIX_SIZE {
            return Err(FormatError::CompressedTooSmall {
                index,
                size: header.sh_size,
            }
            .into());
        }
        check_file_range(index, header.sh_offset, header.sh_size, file_size)?;

        reader
            .seek(SeekFrom::Start(u64::from(header.sh_offset)))
            .map_err(|e| {
                LoaderError::io(
                    format!(
                        "failed to seek to section {} at offset 0x{:x}",
                        index, header.sh_offset
                    ),
                    e,
                )
            })?;

        let mut prefix = [0u8; COMPRESSED_PREFIX_SIZE as usize];
        reader.read_exact(&mut prefix).map_err(|e| {
            LoaderError::io(
                format!("failed to read size prefix of section {}", index),
                e,
            )
        })?;

        Ok(self.endian.u32_from(prefix))
    }
}

/// Smallest start and largest end over the planned sections
pub fn compute_range(sections: &[PlannedSection]) -> std::result::Result<(u32, u64), FormatError> {
    let min_addr = sections
        .iter()
        .map(PlannedSection::addr)
        .min()
        .ok_or(FormatError::NoLoadableSections)?;
    let max_addr = sections
        .iter()
        .map(PlannedSection::end)
        .max()
        .ok_or(FormatError::NoLoadableSections)?;
    Ok((min_addr, max_addr))
}

/// Check that `[offset, offset + size)` lies inside the file
pub(crate) fn check_file_range(
    index: usize,
    offset: u32,
    size: u32,
    file_size: u64,
) -> std::result::Result<(), FormatError> {
    let end = u64::from(offset) + u64::from(size);
    if end > file_size {
        return Err(FormatError::SectionOutOfBounds {
            index,
            offset: u64::from(offset),
            size: u64::from(size),
            file_size,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::{shf, sht};
    use std::io::Cursor;

    fn page() -> PageSize {
        PageSize::new(0x1000).unwrap()
    }

    fn section(sh_type: u32, flags: u32, addr: u32, offset: u32, size: u32) -> SectionHeader {
        SectionHeader {
            sh_type,
            sh_flags: flags,
            sh_addr: addr,
            sh_offset: offset,
            sh_size: size,
            ..Default::default()
        }
    }

    fn plan(sections: Vec<SectionHeader>, file: &[u8]) -> Result<LoadPlan> {
        AddressPlanner::new(page(), Endian::Big).plan(
            sections,
            &mut Cursor::new(file),
            file.len() as u64,
        )
    }

    #[test]
    fn test_scenario_range() {
        let file = vec![0u8; 0x4000];
        let plan = plan(
            vec![
                section(sht::PROGBITS, shf::ALLOC, 0x0100_0000, 0x1100, 0x2000),
                section(sht::NOBITS, shf::ALLOC | shf::WRITE, 0x0100_2000, 0, 0x1000),
                section(sht::PROGBITS, 0, 0, 0x3100, 0x100),
            ],
            &file,
        )
        .unwrap();

        assert_eq!(plan.min_addr, 0x0100_0000);
        assert_eq!(plan.max_addr, 0x0100_3000);
        assert_eq!(plan.region_size(), 0x3000);
        assert_eq!(plan.sections.len(), 2);
        assert_eq!(plan.sections[1].content, SectionContent::NoBits);
        assert_eq!(plan.region_offset(0x0100_2000), Some(0x2000));
        assert_eq!(plan.region_offset(0x0100_3000), None);
        assert_eq!(plan.region_offset(0x00FF_FFFF), None);
    }

    #[test]
    fn test_unaligned_bounds_round_outward() {
        let file = vec![0u8; 0x100];
        let plan = plan(
            vec![section(sht::PROGBITS, shf::ALLOC, 0x1000_0010, 0, 0x20)],
            &file,
        )
        .unwrap();
        assert_eq!(plan.region_start(), 0x1000_0000);
        assert_eq!(plan.region_end(), 0x1000_1000);
        assert_eq!(plan.region_size(), 0x1000);
    }

    #[test]
    fn test_non_participating_sections_ignored() {
        let file = vec![0u8; 0x1000];
        let base = vec![
            section(sht::NULL, 0, 0, 0, 0),
            section(sht::PROGBITS, shf::ALLOC | shf::EXECINSTR, 0x0200_0000, 0x100, 0x200),
        ];
        let reference = plan(base.clone(), &file).unwrap();

        let mut extended = base;
        extended.push(section(sht::RPL_IMPORTS, shf::ALLOC, 0xC000_0000, 0x300, 0x40));
        extended.push(section(sht::RPL_EXPORTS, shf::ALLOC, 0xF000_0000, 0x340, 0x40));
        extended.push(section(sht::SYMTAB, 0, 0x3000_0000, 0x380, 0x40));
        let with_extra = plan(extended, &file).unwrap();

        assert_eq!(reference.region_size(), with_extra.region_size());
        assert_eq!(reference.min_addr, with_extra.min_addr);
        assert_eq!(reference.max_addr, with_extra.max_addr);
    }

    #[test]
    fn test_compressed_uses_inflated_size() {
        let mut file = vec![0u8; 0x200];
        file[0x100..0x104].copy_from_slice(&0x5000u32.to_be_bytes());

        let plan = plan(
            vec![section(sht::PROGBITS, shf::ALLOC | shf::RPL_ZLIB, 0x1000_0000, 0x100, 0x80)],
            &file,
        )
        .unwrap();

        assert_eq!(plan.sections[0].logical_size, 0x5000);
        assert_eq!(plan.sections[0].content, SectionContent::Compressed);
        assert_eq!(plan.max_addr, 0x1000_5000);
    }

    #[test]
    fn test_little_endian_prefix() {
        let mut file = vec![0u8; 0x10];
        file[0..4].copy_from_slice(&0x2345u32.to_le_bytes());

        let plan = AddressPlanner::new(page(), Endian::Little)
            .plan(
                vec![section(sht::PROGBITS, shf::ALLOC | shf::RPL_ZLIB, 0, 0, 0x10)],
                &mut Cursor::new(&file),
                file.len() as u64,
            )
            .unwrap();
        assert_eq!(plan.sections[0].logical_size, 0x2345);
    }

    #[test]
    fn test_empty_loadable_set() {
        let err = plan(vec![section(sht::NULL, 0, 0, 0, 0)], &[]).unwrap_err();
        assert!(matches!(err, LoaderError::Format(FormatError::NoLoadableSections)));

        let err = plan(Vec::new(), &[]).unwrap_err();
        assert!(matches!(err, LoaderError::Format(FormatError::NoLoadableSections)));
    }

    #[test]
    fn test_zero_sized_range() {
        let err = plan(vec![section(sht::NOBITS, shf::ALLOC, 0x1000, 0, 0)], &[]).unwrap_err();
        assert!(matches!(err, LoaderError::Format(FormatError::EmptyLoadRange)));
    }

    #[test]
    fn test_compressed_too_small() {
        let file = vec![0u8; 0x10];
        let err = plan(
            vec![section(sht::PROGBITS, shf::ALLOC | shf::RPL_ZLIB, 0x1000, 0, 3)],
            &file,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            LoaderError::Format(FormatError::CompressedTooSmall { index: 0, size: 3 })
        ));
    }

    #[test]
    fn test_section_past_end_of_file() {
        let file = vec![0u8; 0x100];
        let err = plan(
            vec![section(sht::PROGBITS, shf::ALLOC, 0x1000, 0xF0, 0x20)],
            &file,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            LoaderError::Format(FormatError::SectionOutOfBounds { index: 0, .. })
        ));
    }

    #[test]
    fn test_extreme_addresses_do_not_overflow() {
        let file = vec![0u8; 0x10];
        let plan = plan(
            vec![section(sht::NOBITS, shf::ALLOC, 0xBFFF_FFFF, 0, u32::MAX)],
            &file,
        )
        .unwrap();
        assert_eq!(plan.max_addr, 0xBFFF_FFFF + u64::from(u32::MAX));
        assert_eq!(plan.region_start(), 0xBFFF_F000);
    }
}
