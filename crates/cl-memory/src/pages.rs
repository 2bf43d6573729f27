//! Page size and protection flags

use crate::constants::DEFAULT_PAGE_SIZE;
use bitflags::bitflags;
use once_cell::sync::Lazy;

static HOST_PAGE_SIZE: Lazy<PageSize> = Lazy::new(|| {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(size)
        .ok()
        .and_then(PageSize::new)
        .unwrap_or(PageSize(DEFAULT_PAGE_SIZE))
});

/// A power-of-two page granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageSize(u64);

impl PageSize {
    /// Create a page size, rejecting zero and non powers of two
    pub fn new(bytes: u64) -> Option<Self> {
        bytes.is_power_of_two().then_some(Self(bytes))
    }

    /// The page size of the running host, as reported by `sysconf`
    pub fn host() -> Self {
        *HOST_PAGE_SIZE
    }

    /// Get the size in bytes
    pub fn bytes(&self) -> u64 {
        self.0
    }

    fn mask(&self) -> u64 {
        self.0 - 1
    }

    /// Check if address is aligned to this page size
    pub fn is_aligned(&self, addr: u64) -> bool {
        addr & self.mask() == 0
    }

    /// Align address down to page boundary
    pub fn align_down(&self, addr: u64) -> u64 {
        addr & !self.mask()
    }

    /// Align address up to page boundary, `None` on overflow
    pub fn align_up(&self, addr: u64) -> Option<u64> {
        addr.checked_add(self.mask()).map(|a| a & !self.mask())
    }

    /// Offset of the address within its page
    pub fn offset_in_page(&self, addr: u64) -> u64 {
        addr & self.mask()
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self::host()
    }
}

bitflags! {
    /// Page protection flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageFlags: u32 {
        /// Page is readable
        const READ    = 0b0000_0001;
        /// Page is writable
        const WRITE   = 0b0000_0010;
        /// Page is executable
        const EXECUTE = 0b0000_0100;

        /// Read and write access
        const RW  = Self::READ.bits() | Self::WRITE.bits();
        /// Read, write, and execute access
        const RWX = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl PageFlags {
    /// Translate to `mmap` protection bits
    pub fn to_prot(&self) -> libc::c_int {
        let mut prot = libc::PROT_NONE;
        if self.contains(PageFlags::READ) {
            prot |= libc::PROT_READ;
        }
        if self.contains(PageFlags::WRITE) {
            prot |= libc::PROT_WRITE;
        }
        if self.contains(PageFlags::EXECUTE) {
            prot |= libc::PROT_EXEC;
        }
        prot
    }
}
