//! Memory constants

/// Page size assumed when the host refuses to report one
pub const DEFAULT_PAGE_SIZE: u64 = 0x1000;
