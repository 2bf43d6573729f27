//! Read-only views over file ranges
//!
//! `mmap` only accepts page-aligned file offsets, so a range is widened to
//! whole pages before mapping and the caller's bytes are addressed at their
//! offset within the first page.

use crate::pages::PageSize;
use cl_core::error::MemoryError;
use std::os::fd::AsRawFd;
use std::ptr::NonNull;
use tracing::trace;

/// A private read-only mapping of `[offset, offset + len)` of a file
pub struct FileMapping {
    ptr: NonNull<u8>,
    map_len: usize,
    start: usize,
    len: usize,
}

// Safety: the mapping is read-only and exclusively owned.
unsafe impl Send for FileMapping {}
unsafe impl Sync for FileMapping {}

impl FileMapping {
    /// Map `len` bytes of `file` starting at `offset`
    ///
    /// The caller is responsible for checking the range against the file
    /// length; pages wholly past the end of the file fault on access.
    pub fn map<F: AsRawFd>(
        file: &F,
        offset: u64,
        len: usize,
        page: PageSize,
    ) -> Result<Self, MemoryError> {
        if len == 0 {
            return Err(MemoryError::ZeroSize);
        }

        let page_start = page.align_down(offset);
        let start = page.offset_in_page(offset) as usize;
        let end = (offset as u128) + (len as u128);
        let map_len = page
            .align_up(u64::try_from(end).map_err(|_| Self::too_large(len))?)
            .and_then(|page_end| usize::try_from(page_end - page_start).ok())
            .ok_or_else(|| Self::too_large(len))?;
        let file_offset = libc::off_t::try_from(page_start).map_err(|_| Self::too_large(len))?;

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                file_offset,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(MemoryError::MapFailed {
                size: map_len,
                source: std::io::Error::last_os_error(),
            });
        }

        let ptr = NonNull::new(ptr as *mut u8).ok_or(MemoryError::MapFailed {
            size: map_len,
            source: std::io::Error::from(std::io::ErrorKind::AddrNotAvailable),
        })?;

        trace!(
            "Mapped file range 0x{:x}+0x{:x} as pages 0x{:x}+0x{:x} at {:p}",
            offset, len, page_start, map_len, ptr
        );

        Ok(Self {
            ptr,
            map_len,
            start,
            len,
        })
    }

    fn too_large(len: usize) -> MemoryError {
        MemoryError::TooLarge {
            size: len as u64,
            limit: libc::off_t::MAX as u64,
        }
    }

    /// The requested bytes, starting at the requested file offset
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().add(self.start), self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Length of the underlying page-rounded mapping
    pub fn mapped_len(&self) -> usize {
        self.map_len
    }
}

impl std::fmt::Debug for FileMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMapping")
            .field("ptr", &self.ptr)
            .field("start", &self.start)
            .field("len", &self.len)
            .field("map_len", &self.map_len)
            .finish()
    }
}

impl Drop for FileMapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.map_len);
        }
    }
}
