//! A loaded RPL image

use crate::elf::Elf32Header;
use crate::materializer::SectionMaterializer;
use crate::planner::{AddressPlanner, LoadPlan};
use crate::reader::{file_len, ImageHeader, ImageReader, SectionTable};
use cl_core::config::Config;
use cl_core::error::{LoaderError, Result};
use cl_memory::{LoadRegion, PageSize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One fully materialized image
///
/// Owns the open file, the header and section table mappings, and the load
/// region. All of them are released when the library is dropped.
#[derive(Debug)]
pub struct Library {
    // Field order is drop order: the region goes first, the file last.
    region: LoadRegion,
    plan: LoadPlan,
    sections: SectionTable,
    header: ImageHeader,
    file: File,
    path: PathBuf,
}

impl Library {
    /// Open `path` and run the read, plan and materialize stages
    ///
    /// On error everything acquired so far is dropped before returning.
    pub fn open(path: &Path, config: &Config) -> Result<Self> {
        info!("Opening RPL image: {}", path.display());

        let mut file = File::open(path)
            .map_err(|e| LoaderError::io(format!("failed to open {}", path.display()), e))?;
        let file_size = file_len(&file)?;

        let page = PageSize::host();
        let reader = ImageReader::new(page);
        let header = reader.read_header(&file)?;
        let sections = reader.read_section_table(&file, header.header())?;

        if config.debug.trace_sections {
            for (index, shdr) in sections.iter().enumerate() {
                info!(
                    "  [{:2}] {:<12} flags={:<4} addr=0x{:08x} off=0x{:06x} size=0x{:06x}",
                    index,
                    shdr.type_name(),
                    shdr.flags_string(),
                    shdr.sh_addr,
                    shdr.sh_offset,
                    shdr.sh_size
                );
            }
        }

        let planner = AddressPlanner::new(page, sections.endian());
        let plan = planner.plan(sections.iter(), &mut file, file_size)?;

        let materializer = SectionMaterializer::new(&config.loader);
        let mut region = materializer.reserve(plan.region_size())?;
        materializer.materialize(&mut region, &plan, &mut file, file_size)?;

        info!(
            "Loaded {}: image 0x{:08x}..0x{:x} at {:p}",
            path.display(),
            plan.region_start(),
            plan.region_end(),
            region.base()
        );

        Ok(Self {
            region,
            plan,
            sections,
            header,
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &Elf32Header {
        self.header.header()
    }

    pub fn sections(&self) -> &SectionTable {
        &self.sections
    }

    pub fn plan(&self) -> &LoadPlan {
        &self.plan
    }

    pub fn region(&self) -> &LoadRegion {
        &self.region
    }

    pub fn region_mut(&mut self) -> &mut LoadRegion {
        &mut self.region
    }

    /// The backing file, kept open for the library's lifetime
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Host memory holding image addresses `[addr, addr + len)`
    pub fn image_slice(&self, addr: u32, len: usize) -> Option<&[u8]> {
        let offset = usize::try_from(self.plan.region_offset(addr)?).ok()?;
        self.region.slice(offset, len).ok()
    }

    /// Mutable host memory holding image addresses `[addr, addr + len)`
    pub fn image_slice_mut(&mut self, addr: u32, len: usize) -> Option<&mut [u8]> {
        let offset = usize::try_from(self.plan.region_offset(addr)?).ok()?;
        self.region.slice_mut(offset, len).ok()
    }

    /// Host address of an image address inside the load region
    pub fn host_address(&self, addr: u32) -> Option<*const u8> {
        self.image_slice(addr, 0).map(<[u8]>::as_ptr)
    }

    /// Release the region, the metadata mappings and the file
    pub fn close(self) {
        debug!(
            "Closing {} (region {:p}, 0x{:x} bytes)",
            self.path.display(),
            self.region.base(),
            self.region.len()
        );
        drop(self);
    }
}
