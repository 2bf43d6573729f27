//! Host memory management for cafe-loader
//!
//! This crate owns every mapping the loader makes: the anonymous load region
//! an image is materialized into, and the read-only views over its file
//! metadata. Mappings are released when their owner is dropped.

#[cfg(not(unix))]
compile_error!("cl-memory requires a Unix host (mmap/munmap)");

pub mod constants;
pub mod mapping;
pub mod pages;
pub mod region;

pub use constants::*;
pub use mapping::FileMapping;
pub use pages::{PageFlags, PageSize};
pub use region::LoadRegion;
