//! Section materialization
//!
//! Image address `A` lands at region offset `A - plan.region_start()`, so
//! the lowest participating page is the first page of the region.

use crate::planner::{check_file_range, LoadPlan, PlannedSection, SectionContent, COMPRESSED_PREFIX_SIZE};
use cl_core::config::LoaderConfig;
use cl_core::error::{FormatError, LoaderError, MemoryError, Result};
use cl_memory::{LoadRegion, PageFlags};
use flate2::{Decompress, FlushDecompress, Status};
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, info};

/// Reserves load regions and fills them with section contents
#[derive(Debug, Clone, Copy)]
pub struct SectionMaterializer {
    flags: PageFlags,
    max_region_size: u64,
}

impl SectionMaterializer {
    pub fn new(config: &LoaderConfig) -> Self {
        let flags = if config.executable_region {
            PageFlags::RWX
        } else {
            PageFlags::RW
        };

        Self {
            flags,
            max_region_size: config.max_region_size,
        }
    }

    /// Reserve a zero-filled region of `size` bytes at an OS-chosen address
    pub fn reserve(&self, size: u64) -> Result<LoadRegion> {
        if size > self.max_region_size {
            return Err(MemoryError::TooLarge {
                size,
                limit: self.max_region_size,
            }
            .into());
        }

        let size = usize::try_from(size).map_err(|_| MemoryError::TooLarge {
            size,
            limit: usize::MAX as u64,
        })?;

        Ok(LoadRegion::reserve(size, self.flags)?)
    }

    /// Copy or inflate every planned section into `region`, in table order
    pub fn materialize<R: Read + Seek>(
        &self,
        region: &mut LoadRegion,
        plan: &LoadPlan,
        reader: &mut R,
        file_size: u64,
    ) -> Result<()> {
        let mut copied = 0usize;
        let mut inflated = 0usize;

        for section in &plan.sections {
            match section.content {
                SectionContent::NoBits => {
                    debug!(
                        "Section {}: 0x{:x} zero bytes at 0x{:08x}",
                        section.index,
                        section.logical_size,
                        section.addr()
                    );
                }
                SectionContent::Raw => {
                    let dest = destination(region, plan, section)?;
                    copy_raw(reader, section, dest, file_size)?;
                    copied += 1;
                }
                SectionContent::Compressed => {
                    let dest = destination(region, plan, section)?;
                    inflate_section(reader, section, dest, file_size)?;
                    inflated += 1;
                }
            }
        }

        info!(
            "Materialized {} sections ({} copied, {} inflated) into 0x{:x} bytes at {:p}",
            plan.sections.len(),
            copied,
            inflated,
            region.len(),
            region.base()
        );

        Ok(())
    }
}

impl Default for SectionMaterializer {
    fn default() -> Self {
        Self::new(&LoaderConfig::default())
    }
}

fn destination<'a>(
    region: &'a mut LoadRegion,
    plan: &LoadPlan,
    section: &PlannedSection,
) -> Result<&'a mut [u8]> {
    let outside = || FormatError::OutsideRegion {
        index: section.index,
        addr: section.addr(),
        size: section.logical_size,
    };

    // An empty section may sit exactly at the region end; the slice check
    // below accepts that offset when the length is zero.
    let offset = u64::from(section.addr())
        .checked_sub(plan.region_start())
        .and_then(|offset| usize::try_from(offset).ok())
        .ok_or_else(outside)?;

    region
        .slice_mut(offset, section.logical_size as usize)
        .map_err(|_| outside().into())
}

fn seek_to<R: Seek>(reader: &mut R, section: &PlannedSection, offset: u64) -> Result<()> {
    reader.seek(SeekFrom::Start(offset)).map_err(|e| {
        LoaderError::io(
            format!(
                "failed to seek to section {} data at offset 0x{:x}",
                section.index, offset
            ),
            e,
        )
    })?;
    Ok(())
}

fn copy_raw<R: Read + Seek>(
    reader: &mut R,
    section: &PlannedSection,
    dest: &mut [u8],
    file_size: u64,
) -> Result<()> {
    let header = &section.header;
    check_file_range(section.index, header.sh_offset, header.sh_size, file_size)?;
    seek_to(reader, section, u64::from(header.sh_offset))?;

    reader.read_exact(dest).map_err(|e| {
        LoaderError::io(
            format!(
                "failed to read section {} ({} bytes) at offset 0x{:x}",
                section.index, header.sh_size, header.sh_offset
            ),
            e,
        )
    })?;

    debug!(
        "Section {}: copied 0x{:x} bytes from 0x{:x} to 0x{:08x}",
        section.index, header.sh_size, header.sh_offset, header.sh_addr
    );

    Ok(())
}

fn inflate_section<R: Read + Seek>(
    reader: &mut R,
    section: &PlannedSection,
    dest: &mut [u8],
    file_size: u64,
) -> Result<()> {
    let header = &section.header;
    if header.sh_size < COMPRESSED_PREFIX_SIZE {
        return Err(FormatError::CompressedTooSmall {
            index: section.index,
            size: header.sh_size,
        }
        .into());
    }
    check_file_range(section.index, header.sh_offset, header.sh_size, file_size)?;

    let payload_offset = u64::from(header.sh_offset) + u64::from(COMPRESSED_PREFIX_SIZE);
    seek_to(reader, section, payload_offset)?;

    let mut payload = vec![0u8; (header.sh_size - COMPRESSED_PREFIX_SIZE) as usize];
    reader.read_exact(&mut payload).map_err(|e| {
        LoaderError::io(
            format!(
                "failed to read compressed section {} ({} bytes) at offset 0x{:x}",
                section.index,
                payload.len(),
                payload_offset
            ),
            e,
        )
    })?;

    inflate_into(section.index, &payload, dest)?;

    debug!(
        "Section {}: inflated 0x{:x} bytes to 0x{:x} at 0x{:08x}",
        section.index,
        payload.len(),
        dest.len(),
        header.sh_addr
    );

    Ok(())
}

/// Inflate a complete zlib stream into `out`, which must be filled exactly
pub fn inflate_into(index: usize, input: &[u8], out: &mut [u8]) -> std::result::Result<(), FormatError> {
    let mut inflater = Decompress::new(true);
    let status = inflater
        .decompress(input, out, FlushDecompress::Finish)
        .map_err(|e| FormatError::Inflate {
            index,
            message: e.to_string(),
        })?;

    let produced = inflater.total_out();
    if status != Status::StreamEnd {
        // Either the stream is truncated or it holds more than `out` can take
        let message = if produced < out.len() as u64 {
            "truncated zlib stream".to_string()
        } else {
            format!("stream inflates past the declared 0x{:x} bytes", out.len())
        };
        return Err(FormatError::Inflate { index, message });
    }

    if produced != out.len() as u64 {
        return Err(FormatError::SizeMismatch {
            index,
            expected: out.len() as u64,
            actual: produced,
        });
    }

    Ok(())
}
