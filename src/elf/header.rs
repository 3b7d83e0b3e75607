use core::fmt;

use scroll::ctx::{SizeWith, TryFromCtx, TryIntoCtx};
use scroll::{Pread, Pwrite, LE};

use super::{narrow, Class};
use crate::error::Error;

/// No file type.
pub const ET_NONE: u16 = 0;
/// Relocatable file.
pub const ET_REL: u16 = 1;
/// Executable file.
pub const ET_EXEC: u16 = 2;
/// Shared object file.
pub const ET_DYN: u16 = 3;
/// Core file.
pub const ET_CORE: u16 = 4;

/// Intel 80386.
pub const EM_386: u16 = 3;
/// AMD x86-64.
pub const EM_X86_64: u16 = 62;

/// Current object file version.
pub const EV_CURRENT: u32 = 1;

/// Number of bytes in the identification array.
pub const SIZEOF_IDENT: usize = 16;
pub const SIZEOF_EHDR32: usize = 52;
pub const SIZEOF_EHDR64: usize = 64;

#[inline]
pub fn et_to_str(et: u16) -> &'static str {
    match et {
        ET_NONE => "NONE",
        ET_REL => "REL",
        ET_EXEC => "EXEC",
        ET_DYN => "DYN",
        ET_CORE => "CORE",
        _ => "UNKNOWN_ET",
    }
}

/// The ELF file header, decoupled from bitness.
///
/// Offsets are held at 64-bit width; the 32-bit layout narrows them on
/// emission and fails if a value does not fit.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    /// Magic number and other info
    pub e_ident: [u8; SIZEOF_IDENT],
    /// Object file type
    pub e_type: u16,
    /// Architecture
    pub e_machine: u16,
    /// Object file version
    pub e_version: u32,
    /// Entry point virtual address
    pub e_entry: u64,
    /// Program header table file offset
    pub e_phoff: u64,
    /// Section header table file offset
    pub e_shoff: u64,
    /// Processor-specific flags
    pub e_flags: u32,
    /// ELF header size in bytes
    pub e_ehsize: u16,
    /// Program header table entry size
    pub e_phentsize: u16,
    /// Program header table entry count
    pub e_phnum: u16,
    /// Section header table entry size
    pub e_shentsize: u16,
    /// Section header table entry count
    pub e_shnum: u16,
    /// Section header string table index
    pub e_shstrndx: u16,
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Header")
            .field("e_ident", &format_args!("{:02x?}", self.e_ident))
            .field("e_type", &et_to_str(self.e_type))
            .field("e_machine", &format_args!("{:#x}", self.e_machine))
            .field("e_version", &self.e_version)
            .field("e_entry", &format_args!("{:#x}", self.e_entry))
            .field("e_phoff", &format_args!("{:#x}", self.e_phoff))
            .field("e_shoff", &format_args!("{:#x}", self.e_shoff))
            .field("e_flags", &format_args!("{:#x}", self.e_flags))
            .field("e_ehsize", &self.e_ehsize)
            .field("e_phentsize", &self.e_phentsize)
            .field("e_phnum", &self.e_phnum)
            .field("e_shentsize", &self.e_shentsize)
            .field("e_shnum", &self.e_shnum)
            .field("e_shstrndx", &self.e_shstrndx)
            .finish()
    }
}

impl SizeWith<Class> for Header {
    fn size_with(class: &Class) -> usize {
        class.ehdr_size()
    }
}

impl<'a> TryFromCtx<'a, Class> for Header {
    type Error = Error;
    fn try_from_ctx(src: &'a [u8], class: Class) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let mut e_ident = [0u8; SIZEOF_IDENT];
        e_ident.copy_from_slice(src.gread_with::<&[u8]>(offset, SIZEOF_IDENT)?);
        let e_type = src.gread_with::<u16>(offset, LE)?;
        let e_machine = src.gread_with::<u16>(offset, LE)?;
        let e_version = src.gread_with::<u32>(offset, LE)?;
        let (e_entry, e_phoff, e_shoff) = match class {
            Class::Elf32 => (
                src.gread_with::<u32>(offset, LE)? as u64,
                src.gread_with::<u32>(offset, LE)? as u64,
                src.gread_with::<u32>(offset, LE)? as u64,
            ),
            Class::Elf64 => (
                src.gread_with::<u64>(offset, LE)?,
                src.gread_with::<u64>(offset, LE)?,
                src.gread_with::<u64>(offset, LE)?,
            ),
        };
        let header = Header {
            e_ident,
            e_type,
            e_machine,
            e_version,
            e_entry,
            e_phoff,
            e_shoff,
            e_flags: src.gread_with::<u32>(offset, LE)?,
            e_ehsize: src.gread_with::<u16>(offset, LE)?,
            e_phentsize: src.gread_with::<u16>(offset, LE)?,
            e_phnum: src.gread_with::<u16>(offset, LE)?,
            e_shentsize: src.gread_with::<u16>(offset, LE)?,
            e_shnum: src.gread_with::<u16>(offset, LE)?,
            e_shstrndx: src.gread_with::<u16>(offset, LE)?,
        };
        Ok((header, *offset))
    }
}

impl TryIntoCtx<Class> for Header {
    type Error = Error;
    fn try_into_ctx(self, dst: &mut [u8], class: Class) -> Result<usize, Self::Error> {
        let offset = &mut 0;
        dst.gwrite_with::<&[u8]>(&self.e_ident, offset, ())?;
        dst.gwrite_with::<u16>(self.e_type, offset, LE)?;
        dst.gwrite_with::<u16>(self.e_machine, offset, LE)?;
        dst.gwrite_with::<u32>(self.e_version, offset, LE)?;
        match class {
            Class::Elf32 => {
                dst.gwrite_with::<u32>(narrow(self.e_entry, "e_entry")?, offset, LE)?;
                dst.gwrite_with::<u32>(narrow(self.e_phoff, "e_phoff")?, offset, LE)?;
                dst.gwrite_with::<u32>(narrow(self.e_shoff, "e_shoff")?, offset, LE)?;
            }
            Class::Elf64 => {
                dst.gwrite_with::<u64>(self.e_entry, offset, LE)?;
                dst.gwrite_with::<u64>(self.e_phoff, offset, LE)?;
                dst.gwrite_with::<u64>(self.e_shoff, offset, LE)?;
            }
        }
        dst.gwrite_with::<u32>(self.e_flags, offset, LE)?;
        dst.gwrite_with::<u16>(self.e_ehsize, offset, LE)?;
        dst.gwrite_with::<u16>(self.e_phentsize, offset, LE)?;
        dst.gwrite_with::<u16>(self.e_phnum, offset, LE)?;
        dst.gwrite_with::<u16>(self.e_shentsize, offset, LE)?;
        dst.gwrite_with::<u16>(self.e_shnum, offset, LE)?;
        dst.gwrite_with::<u16>(self.e_shstrndx, offset, LE)?;
        Ok(*offset)
    }
}
