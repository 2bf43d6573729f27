//! ELF32 structures as used by RPL images

use cl_core::error::FormatError;

/// ELF file header (32-bit)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Elf32Header {
    pub e_ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

/// ELF section header (32-bit)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionHeader {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u32,
    pub sh_addr: u32,
    pub sh_offset: u32,
    pub sh_size: u32,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u32,
    pub sh_entsize: u32,
}

/// ELF magic bytes
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Size of the ELF32 file header
pub const EHDR_SIZE: usize = 52;

/// Size of an ELF32 section header
pub const SHDR_SIZE: usize = 40;

/// e_ident indices and values
pub mod ident {
    pub const CLASS: usize = 4;
    pub const DATA: usize = 5;
    pub const OSABI: usize = 7;
    pub const ABIVERSION: usize = 8;

    pub const ELFCLASS32: u8 = 1;
    pub const ELFDATA2LSB: u8 = 1;
    pub const ELFDATA2MSB: u8 = 2;

    /// Cafe OS ABI
    pub const OSABI_CAFE: u8 = 0xCA;
    pub const ABIVERSION_CAFE: u8 = 0xFE;
}

/// Section header types
pub mod sht {
    pub const NULL: u32 = 0;
    pub const PROGBITS: u32 = 1;
    pub const SYMTAB: u32 = 2;
    pub const STRTAB: u32 = 3;
    pub const RELA: u32 = 4;
    pub const NOBITS: u32 = 8;
    pub const RPL_EXPORTS: u32 = 0x8000_0001;
    pub const RPL_IMPORTS: u32 = 0x8000_0002;
    pub const RPL_CRCS: u32 = 0x8000_0003;
    pub const RPL_FILEINFO: u32 = 0x8000_0004;
}

/// Section header flags
pub mod shf {
    pub const WRITE: u32 = 0x1;
    pub const ALLOC: u32 = 0x2;
    pub const EXECINSTR: u32 = 0x4;
    /// Content is a 4-byte inflated size followed by a zlib stream
    pub const RPL_ZLIB: u32 = 0x0800_0000;
}

/// Start of the import/export band; sections at or above it are never mapped
pub const RESERVED_BAND_START: u32 = 0xC000_0000;

/// Byte order of an image's multi-byte fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Big,
    Little,
}

impl Endian {
    /// Decode the e_ident data encoding byte
    pub fn from_ident(encoding: u8) -> Result<Self, FormatError> {
        match encoding {
            ident::ELFDATA2MSB => Ok(Self::Big),
            ident::ELFDATA2LSB => Ok(Self::Little),
            other => Err(FormatError::UnsupportedEncoding(other)),
        }
    }

    /// Read a u16 at `offset`; the caller guarantees the bytes exist
    pub fn u16_at(&self, buf: &[u8], offset: usize) -> u16 {
        let bytes = [buf[offset], buf[offset + 1]];
        match self {
            Self::Big => u16::from_be_bytes(bytes),
            Self::Little => u16::from_le_bytes(bytes),
        }
    }

    /// Read a u32 at `offset`; the caller guarantees the bytes exist
    pub fn u32_at(&self, buf: &[u8], offset: usize) -> u32 {
        let bytes = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        self.u32_from(bytes)
    }

    pub fn u32_from(&self, bytes: [u8; 4]) -> u32 {
        match self {
            Self::Big => u32::from_be_bytes(bytes),
            Self::Little => u32::from_le_bytes(bytes),
        }
    }
}

impl Elf32Header {
    /// Parse and identify a header from at least [`EHDR_SIZE`] bytes
    pub fn parse(buf: &[u8]) -> Result<Self, FormatError> {
        // Shorter input is rejected by the reader before we get here
        debug_assert!(buf.len() >= EHDR_SIZE);

        let mut e_ident = [0u8; 16];
        e_ident.copy_from_slice(&buf[0..16]);

        if e_ident[0..4] != ELF_MAGIC {
            return Err(FormatError::BadMagic([
                e_ident[0], e_ident[1], e_ident[2], e_ident[3],
            ]));
        }

        if e_ident[ident::CLASS] != ident::ELFCLASS32 {
            return Err(FormatError::UnsupportedClass(e_ident[ident::CLASS]));
        }

        let endian = Endian::from_ident(e_ident[ident::DATA])?;

        let header = Self {
            e_ident,
            e_type: endian.u16_at(buf, 16),
            e_machine: endian.u16_at(buf, 18),
            e_version: endian.u32_at(buf, 20),
            e_entry: endian.u32_at(buf, 24),
            e_phoff: endian.u32_at(buf, 28),
            e_shoff: endian.u32_at(buf, 32),
            e_flags: endian.u32_at(buf, 36),
            e_ehsize: endian.u16_at(buf, 40),
            e_phentsize: endian.u16_at(buf, 42),
            e_phnum: endian.u16_at(buf, 44),
            e_shentsize: endian.u16_at(buf, 46),
            e_shnum: endian.u16_at(buf, 48),
            e_shstrndx: endian.u16_at(buf, 50),
        };

        if header.e_shnum != 0 && (header.e_shentsize as usize) < SHDR_SIZE {
            return Err(FormatError::BadEntrySize(header.e_shentsize));
        }

        Ok(header)
    }

    pub fn endian(&self) -> Endian {
        // Validated in `parse`
        if self.e_ident[ident::DATA] == ident::ELFDATA2LSB {
            Endian::Little
        } else {
            Endian::Big
        }
    }

    /// Whether the OS ABI bytes identify a Cafe OS image
    pub fn is_cafe_abi(&self) -> bool {
        self.e_ident[ident::OSABI] == ident::OSABI_CAFE
            && self.e_ident[ident::ABIVERSION] == ident::ABIVERSION_CAFE
    }
}

impl SectionHeader {
    /// Parse one entry from at least [`SHDR_SIZE`] bytes
    pub fn parse(buf: &[u8], endian: Endian) -> Self {
        Self {
            sh_name: endian.u32_at(buf, 0),
            sh_type: endian.u32_at(buf, 4),
            sh_flags: endian.u32_at(buf, 8),
            sh_addr: endian.u32_at(buf, 12),
            sh_offset: endian.u32_at(buf, 16),
            sh_size: endian.u32_at(buf, 20),
            sh_link: endian.u32_at(buf, 24),
            sh_info: endian.u32_at(buf, 28),
            sh_addralign: endian.u32_at(buf, 32),
            sh_entsize: endian.u32_at(buf, 36),
        }
    }

    pub fn is_alloc(&self) -> bool {
        self.sh_flags & shf::ALLOC != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.sh_flags & shf::RPL_ZLIB != 0
    }

    pub fn is_nobits(&self) -> bool {
        self.sh_type == sht::NOBITS
    }

    pub fn in_reserved_band(&self) -> bool {
        self.sh_addr >= RESERVED_BAND_START
    }

    /// Whether this section occupies the load region
    pub fn is_loadable(&self) -> bool {
        self.is_alloc() && !self.in_reserved_band()
    }

    /// readelf-style flag letters (`W`, `A`, `X`, plus `Z` for zlib content)
    pub fn flags_string(&self) -> String {
        [
            (shf::WRITE, 'W'),
            (shf::ALLOC, 'A'),
            (shf::EXECINSTR, 'X'),
            (shf::RPL_ZLIB, 'Z'),
        ]
        .iter()
        .filter(|(bit, _)| self.sh_flags & bit != 0)
        .map(|(_, letter)| *letter)
        .collect()
    }

    /// Short name of the section type for log output
    pub fn type_name(&self) -> &'static str {
        match self.sh_type {
            sht::NULL => "NULL",
            sht::PROGBITS => "PROGBITS",
            sht::SYMTAB => "SYMTAB",
            sht::STRTAB => "STRTAB",
            sht::RELA => "RELA",
            sht::NOBITS => "NOBITS",
            sht::RPL_EXPORTS => "RPL_EXPORTS",
            sht::RPL_IMPORTS => "RPL_IMPORTS",
            sht::RPL_CRCS => "RPL_CRCS",
            sht::RPL_FILEINFO => "RPL_FILEINFO",
            _ => "UNKNOWN",
        }
    }
}
