use core::fmt;

use scroll::ctx::{SizeWith, TryFromCtx, TryIntoCtx};
use scroll::{Pread, Pwrite, LE};

use super::{narrow, Class};
use crate::error::Error;

/// Undefined section.
pub const SHN_UNDEF: u16 = 0;
/// Start of reserved indices.
pub const SHN_LORESERVE: u16 = 0xff00;
/// Associated symbol is absolute.
pub const SHN_ABS: u16 = 0xfff1;
/// Associated symbol is common.
pub const SHN_COMMON: u16 = 0xfff2;
/// End of reserved indices.
pub const SHN_HIRESERVE: u16 = 0xffff;

// === Legal values for sh_type (section type). ===
/// Section header table entry unused.
pub const SHT_NULL: u32 = 0;
/// Program data.
pub const SHT_PROGBITS: u32 = 1;
/// Symbol table.
pub const SHT_SYMTAB: u32 = 2;
/// String table.
pub const SHT_STRTAB: u32 = 3;
/// Relocation entries with addends.
pub const SHT_RELA: u32 = 4;
/// Symbol hash table.
pub const SHT_HASH: u32 = 5;
/// Dynamic linking information.
pub const SHT_DYNAMIC: u32 = 6;
/// Notes.
pub const SHT_NOTE: u32 = 7;
/// Program space with no data (bss).
pub const SHT_NOBITS: u32 = 8;
/// Relocation entries, no addends.
pub const SHT_REL: u32 = 9;
/// Reserved.
pub const SHT_SHLIB: u32 = 10;
/// Dynamic linker symbol table.
pub const SHT_DYNSYM: u32 = 11;
/// Array of constructors.
pub const SHT_INIT_ARRAY: u32 = 14;
/// Array of destructors.
pub const SHT_FINI_ARRAY: u32 = 15;
/// Array of pre-constructors.
pub const SHT_PREINIT_ARRAY: u32 = 16;
/// Section group.
pub const SHT_GROUP: u32 = 17;
/// Extended section indices.
pub const SHT_SYMTAB_SHNDX: u32 = 18;
/// Start OS-specific.
pub const SHT_LOOS: u32 = 0x6000_0000;
/// End OS-specific type.
pub const SHT_HIOS: u32 = 0x6fff_ffff;
/// Start of processor-specific.
pub const SHT_LOPROC: u32 = 0x7000_0000;
/// End of processor-specific.
pub const SHT_HIPROC: u32 = 0x7fff_ffff;
/// Start of application-specific.
pub const SHT_LOUSER: u32 = 0x8000_0000;
/// End of application-specific.
pub const SHT_HIUSER: u32 = 0x8fff_ffff;

// Legal values for sh_flags (section flags)
/// Writable.
pub const SHF_WRITE: u64 = 1 << 0;
/// Occupies memory during execution.
pub const SHF_ALLOC: u64 = 1 << 1;
/// Executable.
pub const SHF_EXECINSTR: u64 = 1 << 2;
/// Might be merged.
pub const SHF_MERGE: u64 = 1 << 4;
/// Contains nul-terminated strings.
pub const SHF_STRINGS: u64 = 1 << 5;
/// `sh_info` contains SHT index.
pub const SHF_INFO_LINK: u64 = 1 << 6;
/// Preserve order after combining.
pub const SHF_LINK_ORDER: u64 = 1 << 7;
/// Non-standard OS specific handling required.
pub const SHF_OS_NONCONFORMING: u64 = 1 << 8;
/// Section is member of a group.
pub const SHF_GROUP: u64 = 1 << 9;
/// Section holds thread-local data.
pub const SHF_TLS: u64 = 1 << 10;
/// Section with compressed data.
pub const SHF_COMPRESSED: u64 = 1 << 11;

pub const SIZEOF_SHDR32: usize = 40;
pub const SIZEOF_SHDR64: usize = 64;

pub fn sht_to_str(sht: u32) -> &'static str {
    match sht {
        SHT_NULL => "SHT_NULL",
        SHT_PROGBITS => "SHT_PROGBITS",
        SHT_SYMTAB => "SHT_SYMTAB",
        SHT_STRTAB => "SHT_STRTAB",
        SHT_RELA => "SHT_RELA",
        SHT_HASH => "SHT_HASH",
        SHT_DYNAMIC => "SHT_DYNAMIC",
        SHT_NOTE => "SHT_NOTE",
        SHT_NOBITS => "SHT_NOBITS",
        SHT_REL => "SHT_REL",
        SHT_SHLIB => "SHT_SHLIB",
        SHT_DYNSYM => "SHT_DYNSYM",
        SHT_INIT_ARRAY => "SHT_INIT_ARRAY",
        SHT_FINI_ARRAY => "SHT_FINI_ARRAY",
        SHT_PREINIT_ARRAY => "SHT_PREINIT_ARRAY",
        SHT_GROUP => "SHT_GROUP",
        SHT_SYMTAB_SHNDX => "SHT_SYMTAB_SHNDX",
        _ => "UNKNOWN_SHT",
    }
}

/// A section header, decoupled from bitness.
///
/// The 32-bit and 64-bit layouts carry the same fields in the same order;
/// only the widths differ.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct SectionHeader {
    /// Section name (string tbl index)
    pub sh_name: u32,
    /// Section type
    pub sh_type: u32,
    /// Section flags
    pub sh_flags: u64,
    /// Section virtual addr at execution
    pub sh_addr: u64,
    /// Section file offset
    pub sh_offset: u64,
    /// Section size in bytes
    pub sh_size: u64,
    /// Link to another section
    pub sh_link: u32,
    /// Additional section information
    pub sh_info: u32,
    /// Section alignment
    pub sh_addralign: u64,
    /// Entry size if section holds table
    pub sh_entsize: u64,
}

impl fmt::Debug for SectionHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SectionHeader")
            .field("sh_name", &self.sh_name)
            .field("sh_type", &sht_to_str(self.sh_type))
            .field("sh_flags", &format_args!("{:#x}", self.sh_flags))
            .field("sh_addr", &format_args!("{:#x}", self.sh_addr))
            .field("sh_offset", &format_args!("{:#x}", self.sh_offset))
            .field("sh_size", &format_args!("{:#x}", self.sh_size))
            .field("sh_link", &self.sh_link)
            .field("sh_info", &self.sh_info)
            .field("sh_addralign", &self.sh_addralign)
            .field("sh_entsize", &self.sh_entsize)
            .finish()
    }
}

impl SizeWith<Class> for SectionHeader {
    fn size_with(class: &Class) -> usize {
        class.shdr_size()
    }
}

impl<'a> TryFromCtx<'a, Class> for SectionHeader {
    type Error = Error;
    fn try_from_ctx(src: &'a [u8], class: Class) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let shdr = match class {
            Class::Elf32 => SectionHeader {
                sh_name: src.gread_with::<u32>(offset, LE)?,
                sh_type: src.gread_with::<u32>(offset, LE)?,
                sh_flags: src.gread_with::<u32>(offset, LE)? as u64,
                sh_addr: src.gread_with::<u32>(offset, LE)? as u64,
                sh_offset: src.gread_with::<u32>(offset, LE)? as u64,
                sh_size: src.gread_with::<u32>(offset, LE)? as u64,
                sh_link: src.gread_with::<u32>(offset, LE)?,
                sh_info: src.gread_with::<u32>(offset, LE)?,
                sh_addralign: src.gread_with::<u32>(offset, LE)? as u64,
                sh_entsize: src.gread_with::<u32>(offset, LE)? as u64,
            },
            Class::Elf64 => SectionHeader {
                sh_name: src.gread_with::<u32>(offset, LE)?,
                sh_type: src.gread_with::<u32>(offset, LE)?,
                sh_flags: src.gread_with::<u64>(offset, LE)?,
                sh_addr: src.gread_with::<u64>(offset, LE)?,
                sh_offset: src.gread_with::<u64>(offset, LE)?,
                sh_size: src.gread_with::<u64>(offset, LE)?,
                sh_link: src.gread_with::<u32>(offset, LE)?,
                sh_info: src.gread_with::<u32>(offset, LE)?,
                sh_addralign: src.gread_with::<u64>(offset, LE)?,
                sh_entsize: src.gread_with::<u64>(offset, LE)?,
            },
        };
        Ok((shdr, *offset))
    }
}

impl TryIntoCtx<Class> for SectionHeader {
    type Error = Error;
    fn try_into_ctx(self, dst: &mut [u8], class: Class) -> Result<usize, Self::Error> {
        let offset = &mut 0;
        match class {
            Class::Elf32 => {
                dst.gwrite_with::<u32>(self.sh_name, offset, LE)?;
                dst.gwrite_with::<u32>(self.sh_type, offset, LE)?;
                dst.gwrite_with::<u32>(narrow(self.sh_flags, "sh_flags")?, offset, LE)?;
                dst.gwrite_with::<u32>(narrow(self.sh_addr, "sh_addr")?, offset, LE)?;
                dst.gwrite_with::<u32>(narrow(self.sh_offset, "sh_offset")?, offset, LE)?;
                dst.gwrite_with::<u32>(narrow(self.sh_size, "sh_size")?, offset, LE)?;
                dst.gwrite_with::<u32>(self.sh_link, offset, LE)?;
                dst.gwrite_with::<u32>(self.sh_info, offset, LE)?;
                dst.gwrite_with::<u32>(narrow(self.sh_addralign, "sh_addralign")?, offset, LE)?;
                dst.gwrite_with::<u32>(narrow(self.sh_entsize, "sh_entsize")?, offset, LE)?;
            }
            Class::Elf64 => {
                dst.gwrite_with::<u32>(self.sh_name, offset, LE)?;
                dst.gwrite_with::<u32>(self.sh_type, offset, LE)?;
                dst.gwrite_with::<u64>(self.sh_flags, offset, LE)?;
                dst.gwrite_with::<u64>(self.sh_addr, offset, LE)?;
                dst.gwrite_with::<u64>(self.sh_offset, offset, LE)?;
                dst.gwrite_with::<u64>(self.sh_size, offset, LE)?;
                dst.gwrite_with::<u32>(self.sh_link, offset, LE)?;
                dst.gwrite_with::<u32>(self.sh_info, offset, LE)?;
                dst.gwrite_with::<u64>(self.sh_addralign, offset, LE)?;
                dst.gwrite_with::<u64>(self.sh_entsize, offset, LE)?;
            }
        }
        Ok(*offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_both_classes() {
        let shdr = SectionHeader {
            sh_name: 27,
            sh_type: SHT_PROGBITS,
            sh_flags: SHF_ALLOC | SHF_EXECINSTR,
            sh_offset: 0x40,
            sh_size: 0x80,
            sh_addralign: 16,
            ..SectionHeader::default()
        };
        for class in [Class::Elf32, Class::Elf64] {
            let mut buf = [0u8; SIZEOF_SHDR64];
            let size = buf.pwrite_with(shdr, 0, class).unwrap();
            assert_eq!(size, class.shdr_size());
            let back: SectionHeader = buf.pread_with(0, class).unwrap();
            assert_eq!(back, shdr);
        }
    }
}
