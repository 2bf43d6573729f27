//! Anonymous load regions

use crate::pages::PageFlags;
use cl_core::error::MemoryError;
use std::ptr::NonNull;
use tracing::{debug, trace};

/// One contiguous block of anonymous, zero-filled virtual memory
///
/// The base address is chosen by the OS and stays fixed until the region is
/// dropped, which unmaps it.
pub struct LoadRegion {
    base: NonNull<u8>,
    size: usize,
    flags: PageFlags,
}

// Safety: the region is exclusively owned; shared access only hands out
// immutable slices and mutation requires `&mut self`.
unsafe impl Send for LoadRegion {}
unsafe impl Sync for LoadRegion {}

impl LoadRegion {
    /// Reserve and commit `size` bytes with the given protection
    pub fn reserve(size: usize, flags: PageFlags) -> Result<Self, MemoryError> {
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                flags.to_prot(),
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(MemoryError::MapFailed {
                size,
                source: std::io::Error::last_os_error(),
            });
        }

        let base = NonNull::new(ptr as *mut u8).ok_or(MemoryError::MapFailed {
            size,
            source: std::io::Error::from(std::io::ErrorKind::AddrNotAvailable),
        })?;

        debug!(
            "Reserved load region at {:p}, size=0x{:x}, flags={:?}",
            base, size, flags
        );

        Ok(Self { base, size, flags })
    }

    /// Host address of the first byte
    pub fn base(&self) -> *const u8 {
        self.base.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn flags(&self) -> PageFlags {
        self.flags
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.size) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr(), self.size) }
    }

    /// Bounds-checked view of `len` bytes starting at `offset`
    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8], MemoryError> {
        let range = self.check_range(offset, len)?;
        Ok(&self.as_slice()[range])
    }

    /// Bounds-checked mutable view of `len` bytes starting at `offset`
    pub fn slice_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8], MemoryError> {
        let range = self.check_range(offset, len)?;
        Ok(&mut self.as_mut_slice()[range])
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<std::ops::Range<usize>, MemoryError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(offset..end),
            _ => Err(MemoryError::OutOfBounds {
                offset,
                len,
                size: self.size,
            }),
        }
    }
}

impl std::fmt::Debug for LoadRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadRegion")
            .field("base", &self.base)
            .field("size", &format_args!("0x{:x}", self.size))
            .field("flags", &self.flags)
            .finish()
    }
}

impl Drop for LoadRegion {
    fn drop(&mut self) {
        trace!("Unmapping load region at {:p}, size=0x{:x}", self.base, self.size);
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.size);
        }
    }
}
