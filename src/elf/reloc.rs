//! Relocation entries and the x86 relocation-type tables.
//!
//! `r_info` packs a symbol index and a type with an 8-bit shift in the
//! 32-bit layout and a 32-bit shift in the 64-bit layout; the split and
//! build helpers here take the [`Class`] so callers never hardcode either.

use core::fmt;

use scroll::ctx::{SizeWith, TryFromCtx, TryIntoCtx};
use scroll::{Pread, Pwrite, LE};

use super::{narrow, narrow_signed, Class};
use crate::error::Error;

pub const R_386_NONE: u32 = 0; // No reloc
pub const R_386_32: u32 = 1; // Direct 32 bit
pub const R_386_PC32: u32 = 2; // PC relative 32 bit
pub const R_386_GOT32: u32 = 3; // 32 bit GOT entry
pub const R_386_PLT32: u32 = 4; // 32 bit PLT address
pub const R_386_COPY: u32 = 5; // Copy symbol at runtime
pub const R_386_GLOB_DAT: u32 = 6; // Create GOT entry
pub const R_386_JMP_SLOT: u32 = 7; // Create PLT entry
pub const R_386_RELATIVE: u32 = 8; // Adjust by program base
pub const R_386_GOTOFF: u32 = 9; // 32 bit offset to GOT
pub const R_386_GOTPC: u32 = 10; // 32 bit PC relative offset to GOT

pub const R_X86_64_NONE: u32 = 0; // No reloc
pub const R_X86_64_64: u32 = 1; // Direct 64 bit
pub const R_X86_64_PC32: u32 = 2; // PC relative 32 bit signed
pub const R_X86_64_GOT32: u32 = 3; // 32 bit GOT entry
pub const R_X86_64_PLT32: u32 = 4; // 32 bit PLT address
pub const R_X86_64_COPY: u32 = 5; // Copy symbol at runtime
pub const R_X86_64_GLOB_DAT: u32 = 6; // Create GOT entry
pub const R_X86_64_JUMP_SLOT: u32 = 7; // Create PLT entry
pub const R_X86_64_RELATIVE: u32 = 8; // Adjust by program base
pub const R_X86_64_GOTPCREL: u32 = 9; // 32 bit signed PC relative offset to GOT
pub const R_X86_64_32: u32 = 10; // Direct 32 bit zero extended
pub const R_X86_64_32S: u32 = 11; // Direct 32 bit sign extended
pub const R_X86_64_16: u32 = 12; // Direct 16 bit zero extended
pub const R_X86_64_PC16: u32 = 13; // 16 bit sign extended pc relative
pub const R_X86_64_8: u32 = 14; // Direct 8 bit sign extended
pub const R_X86_64_PC8: u32 = 15; // 8 bit sign extended pc relative
pub const R_X86_64_PC64: u32 = 24; // PC relative 64 bit
pub const R_X86_64_GOTOFF64: u32 = 25; // 64 bit offset to GOT
pub const R_X86_64_GOTPC32: u32 = 26; // 32 bit signed pc relative offset to GOT
pub const R_X86_64_GOTPCRELX: u32 = 41; // Relaxable GOTPCREL
pub const R_X86_64_REX_GOTPCRELX: u32 = 42; // Relaxable GOTPCREL with REX prefix

pub const SIZEOF_REL32: usize = 8;
pub const SIZEOF_REL64: usize = 16;
pub const SIZEOF_RELA32: usize = 12;
pub const SIZEOF_RELA64: usize = 24;

#[inline]
pub fn type_to_str(class: Class, typ: u32) -> &'static str {
    match class {
        Class::Elf32 => match typ {
            R_386_NONE => "R_386_NONE",
            R_386_32 => "R_386_32",
            R_386_PC32 => "R_386_PC32",
            R_386_GOT32 => "R_386_GOT32",
            R_386_PLT32 => "R_386_PLT32",
            R_386_COPY => "R_386_COPY",
            R_386_GLOB_DAT => "R_386_GLOB_DAT",
            R_386_JMP_SLOT => "R_386_JMP_SLOT",
            R_386_RELATIVE => "R_386_RELATIVE",
            R_386_GOTOFF => "R_386_GOTOFF",
            R_386_GOTPC => "R_386_GOTPC",
            _ => "UNKNOWN_R_386",
        },
        Class::Elf64 => match typ {
            R_X86_64_NONE => "R_X86_64_NONE",
            R_X86_64_64 => "R_X86_64_64",
            R_X86_64_PC32 => "R_X86_64_PC32",
            R_X86_64_GOT32 => "R_X86_64_GOT32",
            R_X86_64_PLT32 => "R_X86_64_PLT32",
            R_X86_64_COPY => "R_X86_64_COPY",
            R_X86_64_GLOB_DAT => "R_X86_64_GLOB_DAT",
            R_X86_64_JUMP_SLOT => "R_X86_64_JUMP_SLOT",
            R_X86_64_RELATIVE => "R_X86_64_RELATIVE",
            R_X86_64_GOTPCREL => "R_X86_64_GOTPCREL",
            R_X86_64_32 => "R_X86_64_32",
            R_X86_64_32S => "R_X86_64_32S",
            R_X86_64_16 => "R_X86_64_16",
            R_X86_64_PC16 => "R_X86_64_PC16",
            R_X86_64_8 => "R_X86_64_8",
            R_X86_64_PC8 => "R_X86_64_PC8",
            R_X86_64_PC64 => "R_X86_64_PC64",
            R_X86_64_GOTOFF64 => "R_X86_64_GOTOFF64",
            R_X86_64_GOTPC32 => "R_X86_64_GOTPC32",
            R_X86_64_GOTPCRELX => "R_X86_64_GOTPCRELX",
            R_X86_64_REX_GOTPCRELX => "R_X86_64_REX_GOTPCRELX",
            _ => "UNKNOWN_R_X86_64",
        },
    }
}

/// The symbol index half of a packed `r_info`.
#[inline]
pub fn r_sym(class: Class, info: u64) -> u32 {
    match class {
        Class::Elf32 => (info >> 8) as u32,
        Class::Elf64 => (info >> 32) as u32,
    }
}

/// The relocation type half of a packed `r_info`.
#[inline]
pub fn r_type(class: Class, info: u64) -> u32 {
    match class {
        Class::Elf32 => (info & 0xff) as u32,
        Class::Elf64 => (info & 0xffff_ffff) as u32,
    }
}

/// Assemble a packed `r_info` from a symbol index and a type.
#[inline]
pub fn r_info(class: Class, sym: u32, typ: u32) -> u64 {
    match class {
        Class::Elf32 => (u64::from(sym) << 8) | u64::from(typ & 0xff),
        Class::Elf64 => (u64::from(sym) << 32) | u64::from(typ),
    }
}

/// Maps an x86-64 relocation type onto its i386 equivalent, for the types
/// whose computed value survives the narrowing. Everything else is
/// unsupported in the 64-to-32 direction.
#[inline]
pub fn map_type_to_386(typ: u32) -> Option<u32> {
    match typ {
        R_X86_64_32 | R_X86_64_32S => Some(R_386_32),
        R_X86_64_PLT32 | R_X86_64_PC32 => Some(R_386_PC32),
        _ => None,
    }
}

/// Whether a relocation table carries explicit addends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    Rel,
    Rela,
}

impl RelocKind {
    pub fn entsize(self, class: Class) -> usize {
        match self {
            RelocKind::Rel => class.rel_size(),
            RelocKind::Rela => class.rela_size(),
        }
    }

    pub fn section_type(self) -> u32 {
        match self {
            RelocKind::Rel => super::section_header::SHT_REL,
            RelocKind::Rela => super::section_header::SHT_RELA,
        }
    }
}

/// A relocation entry, decoupled from bitness and from the REL/RELA split.
///
/// For REL entries the addend lives in the patched bytes and `r_addend`
/// is zero; the codec context decides whether it is read or written.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Reloc {
    /// Address
    pub r_offset: u64,
    /// Symbol index
    pub r_sym: u32,
    /// Relocation type
    pub r_type: u32,
    /// Addend
    pub r_addend: i64,
}

impl fmt::Debug for Reloc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Reloc")
            .field("r_offset", &format_args!("{:#x}", self.r_offset))
            .field("r_sym", &self.r_sym)
            .field("r_type", &self.r_type)
            .field("r_addend", &format_args!("{:#x}", self.r_addend))
            .finish()
    }
}

/// Codec context for relocation entries.
pub type RelocCtx = (Class, RelocKind);

impl SizeWith<RelocCtx> for Reloc {
    fn size_with(&(class, kind): &RelocCtx) -> usize {
        kind.entsize(class)
    }
}

impl<'a> TryFromCtx<'a, RelocCtx> for Reloc {
    type Error = Error;
    fn try_from_ctx(src: &'a [u8], (class, kind): RelocCtx) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let (r_offset, r_info_raw) = match class {
            Class::Elf32 => (
                src.gread_with::<u32>(offset, LE)? as u64,
                src.gread_with::<u32>(offset, LE)? as u64,
            ),
            Class::Elf64 => (
                src.gread_with::<u64>(offset, LE)?,
                src.gread_with::<u64>(offset, LE)?,
            ),
        };
        let r_addend = match (kind, class) {
            (RelocKind::Rel, _) => 0,
            (RelocKind::Rela, Class::Elf32) => src.gread_with::<i32>(offset, LE)? as i64,
            (RelocKind::Rela, Class::Elf64) => src.gread_with::<i64>(offset, LE)?,
        };
        let reloc = Reloc {
            r_offset,
            r_sym: r_sym(class, r_info_raw),
            r_type: r_type(class, r_info_raw),
            r_addend,
        };
        Ok((reloc, *offset))
    }
}

impl TryIntoCtx<RelocCtx> for Reloc {
    type Error = Error;
    fn try_into_ctx(self, dst: &mut [u8], (class, kind): RelocCtx) -> Result<usize, Self::Error> {
        let offset = &mut 0;
        let info = r_info(class, self.r_sym, self.r_type);
        match class {
            Class::Elf32 => {
                dst.gwrite_with::<u32>(narrow(self.r_offset, "r_offset")?, offset, LE)?;
                dst.gwrite_with::<u32>(narrow(info, "r_info")?, offset, LE)?;
            }
            Class::Elf64 => {
                dst.gwrite_with::<u64>(self.r_offset, offset, LE)?;
                dst.gwrite_with::<u64>(info, offset, LE)?;
            }
        }
        match (kind, class) {
            (RelocKind::Rel, _) => {}
            (RelocKind::Rela, Class::Elf32) => {
                dst.gwrite_with::<i32>(narrow_signed(self.r_addend, "r_addend")?, offset, LE)?;
            }
            (RelocKind::Rela, Class::Elf64) => {
                dst.gwrite_with::<i64>(self.r_addend, offset, LE)?;
            }
        }
        Ok(*offset)
    }
}
