use core::fmt;

use scroll::ctx::{SizeWith, TryFromCtx, TryIntoCtx};
use scroll::{Pread, Pwrite, LE};

use super::{narrow, Class};
use crate::error::Error;

// === Sym bindings ===
/// Local symbol.
pub const STB_LOCAL: u8 = 0;
/// Global symbol.
pub const STB_GLOBAL: u8 = 1;
/// Weak symbol.
pub const STB_WEAK: u8 = 2;

// === Sym types ===
/// Symbol type is unspecified.
pub const STT_NOTYPE: u8 = 0;
/// Symbol is a data object.
pub const STT_OBJECT: u8 = 1;
/// Symbol is a code object.
pub const STT_FUNC: u8 = 2;
/// Symbol associated with a section.
pub const STT_SECTION: u8 = 3;
/// Symbol's name is file name.
pub const STT_FILE: u8 = 4;
/// Symbol is a common data object.
pub const STT_COMMON: u8 = 5;
/// Symbol is thread-local data object.
pub const STT_TLS: u8 = 6;

// === Sym visibilities ===
/// Default symbol visibility rules.
pub const STV_DEFAULT: u8 = 0;
/// Processor-specific hidden class.
pub const STV_INTERNAL: u8 = 1;
/// Symbol unavailable in other modules.
pub const STV_HIDDEN: u8 = 2;
/// Not preemptible, not exported.
pub const STV_PROTECTED: u8 = 3;

pub const SIZEOF_SYM32: usize = 16;
pub const SIZEOF_SYM64: usize = 24;

/// Get the ST binding; the upper four bits of `st_info`.
#[inline]
pub fn st_bind(info: u8) -> u8 {
    info >> 4
}

/// Get the ST type; the lower four bits of `st_info`.
#[inline]
pub fn st_type(info: u8) -> u8 {
    info & 0xf
}

/// Assemble `st_info` from a binding and a type. The four-bit shift is the
/// same in both layouts.
#[inline]
pub fn st_info(bind: u8, typ: u8) -> u8 {
    (bind << 4) | (typ & 0xf)
}

/// Get the visibility; the low two bits of `st_other`.
#[inline]
pub fn st_visibility(other: u8) -> u8 {
    other & 0x3
}

#[inline]
pub fn bind_to_str(bind: u8) -> &'static str {
    match bind {
        STB_LOCAL => "LOCAL",
        STB_GLOBAL => "GLOBAL",
        STB_WEAK => "WEAK",
        _ => "UNKNOWN_STB",
    }
}

#[inline]
pub fn type_to_str(typ: u8) -> &'static str {
    match typ {
        STT_NOTYPE => "NOTYPE",
        STT_OBJECT => "OBJECT",
        STT_FUNC => "FUNC",
        STT_SECTION => "SECTION",
        STT_FILE => "FILE",
        STT_COMMON => "COMMON",
        STT_TLS => "TLS",
        _ => "UNKNOWN_STT",
    }
}

/// A symbol table entry, decoupled from bitness.
///
/// The two layouts carry the same fields but in a different order: 32-bit
/// objects interleave `st_value`/`st_size` before the info byte, 64-bit
/// objects move them to the end. The codec deals with both; the semantic
/// struct keeps one order.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Sym {
    /// Symbol name (string tbl index)
    pub st_name: u32,
    /// Symbol type and binding
    pub st_info: u8,
    /// Symbol visibility
    pub st_other: u8,
    /// Section index
    pub st_shndx: u16,
    /// Symbol value
    pub st_value: u64,
    /// Symbol size
    pub st_size: u64,
}

impl Sym {
    #[inline]
    pub fn st_bind(&self) -> u8 {
        st_bind(self.st_info)
    }

    #[inline]
    pub fn st_type(&self) -> u8 {
        st_type(self.st_info)
    }

    #[inline]
    pub fn is_function(&self) -> bool {
        self.st_type() == STT_FUNC
    }
}

impl fmt::Debug for Sym {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Sym")
            .field("st_name", &self.st_name)
            .field("st_bind", &bind_to_str(self.st_bind()))
            .field("st_type", &type_to_str(self.st_type()))
            .field("st_other", &self.st_other)
            .field("st_shndx", &self.st_shndx)
            .field("st_value", &format_args!("{:#x}", self.st_value))
            .field("st_size", &self.st_size)
            .finish()
    }
}

impl SizeWith<Class> for Sym {
    fn size_with(class: &Class) -> usize {
        class.sym_size()
    }
}

impl<'a> TryFromCtx<'a, Class> for Sym {
    type Error = Error;
    fn try_from_ctx(src: &'a [u8], class: Class) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let sym = match class {
            Class::Elf32 => {
                let st_name = src.gread_with::<u32>(offset, LE)?;
                let st_value = src.gread_with::<u32>(offset, LE)? as u64;
                let st_size = src.gread_with::<u32>(offset, LE)? as u64;
                let st_info = src.gread::<u8>(offset)?;
                let st_other = src.gread::<u8>(offset)?;
                let st_shndx = src.gread_with::<u16>(offset, LE)?;
                Sym { st_name, st_info, st_other, st_shndx, st_value, st_size }
            }
            Class::Elf64 => {
                let st_name = src.gread_with::<u32>(offset, LE)?;
                let st_info = src.gread::<u8>(offset)?;
                let st_other = src.gread::<u8>(offset)?;
                let st_shndx = src.gread_with::<u16>(offset, LE)?;
                let st_value = src.gread_with::<u64>(offset, LE)?;
                let st_size = src.gread_with::<u64>(offset, LE)?;
                Sym { st_name, st_info, st_other, st_shndx, st_value, st_size }
            }
        };
        Ok((sym, *offset))
    }
}

impl TryIntoCtx<Class> for Sym {
    type Error = Error;
    fn try_into_ctx(self, dst: &mut [u8], class: Class) -> Result<usize, Self::Error> {
        let offset = &mut 0;
        match class {
            Class::Elf32 => {
                dst.gwrite_with::<u32>(self.st_name, offset, LE)?;
                dst.gwrite_with::<u32>(narrow(self.st_value, "st_value")?, offset, LE)?;
                dst.gwrite_with::<u32>(narrow(self.st_size, "st_size")?, offset, LE)?;
                dst.gwrite::<u8>(self.st_info, offset)?;
                dst.gwrite::<u8>(self.st_other, offset)?;
                dst.gwrite_with::<u16>(self.st_shndx, offset, LE)?;
            }
            Class::Elf64 => {
                dst.gwrite_with::<u32>(self.st_name, offset, LE)?;
                dst.gwrite::<u8>(self.st_info, offset)?;
                dst.gwrite::<u8>(self.st_other, offset)?;
                dst.gwrite_with::<u16>(self.st_shndx, offset, LE)?;
                dst.gwrite_with::<u64>(self.st_value, offset, LE)?;
                dst.gwrite_with::<u64>(self.st_size, offset, LE)?;
            }
        }
        Ok(*offset)
    }
}
