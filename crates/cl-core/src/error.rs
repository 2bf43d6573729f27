//! Error types for the cafe-loader RPL loader

use std::io;
use thiserror::Error;

/// Main error type for the loader
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid image: {0}")]
    Format(#[from] FormatError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Invalid library handle: {0}")]
    InvalidHandle(u64),
}

/// Structurally invalid or inconsistent image data
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("bad magic bytes {0:02X?} (expected 7F 45 4C 46)")]
    BadMagic([u8; 4]),

    #[error("unsupported ELF class {0} (expected 1 for ELFCLASS32)")]
    UnsupportedClass(u8),

    #[error("unsupported data encoding {0}")]
    UnsupportedEncoding(u8),

    #[error("section header entry size {0} is smaller than 40 bytes")]
    BadEntrySize(u16),

    #[error("section header table is empty")]
    EmptySectionTable,

    #[error(
        "section header table 0x{offset:x}..0x{end:x} lies outside the file ({file_size} bytes)"
    )]
    SectionTableOutOfBounds { offset: u64, end: u64, file_size: u64 },

    #[error("no allocatable sections below the reserved band")]
    NoLoadableSections,

    #[error("loadable sections span an empty address range")]
    EmptyLoadRange,

    #[error("arithmetic overflow computing {0}")]
    Overflow(&'static str),

    #[error(
        "section {index} content 0x{offset:x}+0x{size:x} lies outside the file ({file_size} bytes)"
    )]
    SectionOutOfBounds {
        index: usize,
        offset: u64,
        size: u64,
        file_size: u64,
    },

    #[error("compressed section {index} is only {size} bytes, too small for its size prefix")]
    CompressedTooSmall { index: usize, size: u32 },

    #[error("section {index} at 0x{addr:08x}+0x{size:x} falls outside the load region")]
    OutsideRegion { index: usize, addr: u32, size: u32 },

    #[error("section {index} failed to inflate: {message}")]
    Inflate { index: usize, message: String },

    #[error("section {index} inflated to {actual} bytes, expected {expected}")]
    SizeMismatch {
        index: usize,
        expected: u64,
        actual: u64,
    },
}

/// Memory reservation and mapping errors
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Failed to map 0x{size:x} bytes: {source}")]
    MapFailed {
        size: usize,
        #[source]
        source: io::Error,
    },

    #[error("Refusing to map an empty range")]
    ZeroSize,

    #[error("Region of 0x{size:x} bytes exceeds the limit of 0x{limit:x}")]
    TooLarge { size: u64, limit: u64 },

    #[error("Range 0x{offset:x}+0x{len:x} outside mapping of 0x{size:x} bytes")]
    OutOfBounds { offset: usize, len: usize, size: usize },
}

/// Coarse classification used for reporting and exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// File open, seek or read failures
    Io,
    /// Invalid header or section data
    Format,
    /// Address space reservation or mapping failures
    Resource,
    /// Unknown or already closed library handle
    Handle,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io => write!(f, "io"),
            Self::Format => write!(f, "format"),
            Self::Resource => write!(f, "resource"),
            Self::Handle => write!(f, "handle"),
        }
    }
}

impl LoaderError {
    /// Wrap an I/O error with a description of what was being attempted
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::Format(_) => ErrorKind::Format,
            Self::Memory(_) => ErrorKind::Resource,
            Self::InvalidHandle(_) => ErrorKind::Handle,
        }
    }
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;
