//! The in-memory model of a relocatable object: a file header plus an
//! ordered list of sections with typed content.
//!
//! Derived data (section names, symbol names) is never stored; it is
//! resolved through lookup methods on [`Object`] so it can not go stale
//! while the object is mutated.

use log::debug;
use scroll::Pread;

use crate::elf::header::{Header, ET_REL};
use crate::elf::reloc::{Reloc, RelocKind};
use crate::elf::section_header::{
    SectionHeader, SHT_NOBITS, SHT_NULL, SHT_REL, SHT_RELA, SHT_STRTAB, SHT_SYMTAB,
};
use crate::elf::sym::{Sym, STT_SECTION};
use crate::elf::Class;
use crate::error::{Error, Result};
use crate::strtab::Strtab;

/// Typed section content. Sections that occupy no file bytes (SHT_NOBITS,
/// or a zero offset or size) carry [`SectionContent::None`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionContent {
    None,
    Raw(Vec<u8>),
    Strtab(Strtab),
    Symtab(Vec<Sym>),
    RelocTable(RelocKind, Vec<Reloc>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub header: SectionHeader,
    pub content: SectionContent,
}

impl Section {
    /// Whether the section occupies bytes in the file image.
    pub fn has_content(&self) -> bool {
        !matches!(self.content, SectionContent::None) && self.header.sh_size != 0
    }

    pub fn is_symtab(&self) -> bool {
        self.header.sh_type == SHT_SYMTAB
    }

    pub fn is_reloc_table(&self) -> bool {
        self.header.sh_type == SHT_RELA || self.header.sh_type == SHT_REL
    }

    /// Appends `name` plus a terminating NUL to a string-table section and
    /// returns the offset the name starts at. `sh_size` follows the table.
    pub fn add_str(&mut self, name: &[u8]) -> Result<u32> {
        match &mut self.content {
            SectionContent::Strtab(strtab) => {
                let offset = strtab.add(name);
                self.header.sh_size = strtab.len() as u64;
                Ok(offset)
            }
            _ => Err(Error::Malformed(
                "add_str on a section that is not a string table".into(),
            )),
        }
    }

    /// Appends a symbol entry, bumps `sh_size` by `sh_entsize` and returns
    /// the new entry's index.
    pub fn append_sym(&mut self, sym: Sym) -> Result<usize> {
        match &mut self.content {
            SectionContent::Symtab(syms) => {
                syms.push(sym);
                self.header.sh_size += self.header.sh_entsize;
                Ok(syms.len() - 1)
            }
            _ => Err(Error::Malformed(
                "append_sym on a section that is not a symbol table".into(),
            )),
        }
    }

    /// Appends a relocation entry, bumps `sh_size` by `sh_entsize` and
    /// returns the new entry's index.
    pub fn append_reloc(&mut self, reloc: Reloc) -> Result<usize> {
        match &mut self.content {
            SectionContent::RelocTable(_, relocs) => {
                relocs.push(reloc);
                self.header.sh_size += self.header.sh_entsize;
                Ok(relocs.len() - 1)
            }
            _ => Err(Error::Malformed(
                "append_reloc on a section that is not a relocation table".into(),
            )),
        }
    }

    /// Appends raw bytes to an opaque section, bumping `sh_size`.
    pub fn append_bytes(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.content {
            SectionContent::Raw(bytes) => {
                bytes.extend_from_slice(data);
                self.header.sh_size += data.len() as u64;
                Ok(())
            }
            _ => Err(Error::Malformed(
                "append_bytes on a section without raw content".into(),
            )),
        }
    }

    /// Encodes the section content into the packed byte form that goes into
    /// the file image. The result must match `sh_size` exactly.
    pub fn pack_content(&self, class: Class) -> Result<Vec<u8>> {
        use scroll::Pwrite;
        let packed = match &self.content {
            SectionContent::None => {
                return Err(Error::Malformed(
                    "pack_content on a section without content".into(),
                ))
            }
            SectionContent::Raw(bytes) => bytes.clone(),
            SectionContent::Strtab(strtab) => strtab.as_bytes().to_vec(),
            SectionContent::Symtab(syms) => {
                let mut buf = vec![0u8; syms.len() * class.sym_size()];
                let mut at = 0;
                for sym in syms {
                    buf.gwrite_with(*sym, &mut at, class)?;
                }
                buf
            }
            SectionContent::RelocTable(kind, relocs) => {
                let mut buf = vec![0u8; relocs.len() * kind.entsize(class)];
                let mut at = 0;
                for reloc in relocs {
                    buf.gwrite_with(*reloc, &mut at, (class, *kind))?;
                }
                buf
            }
        };
        if packed.len() as u64 != self.header.sh_size {
            return Err(Error::Malformed(format!(
                "packed content length {:#x} disagrees with sh_size {:#x}",
                packed.len(),
                self.header.sh_size
            )));
        }
        Ok(packed)
    }
}

/// An ET_REL object: the file header and every section, in file order.
#[derive(Debug, Clone)]
pub struct Object {
    pub class: Class,
    pub header: Header,
    pub sections: Vec<Section>,
}

impl Object {
    /// Assembles an object from already-built parts. The caller is
    /// responsible for keeping `e_shnum` in step with the section list.
    pub fn from_parts(class: Class, header: Header, sections: Vec<Section>) -> Object {
        Object {
            class,
            header,
            sections,
        }
    }

    /// Parses a relocatable object out of a byte image.
    ///
    /// The identification bytes must match one of the two canonical
    /// little-endian System V patterns; the bitness is derived from them.
    pub fn parse(bytes: &[u8]) -> Result<Object> {
        let class = Class::from_ident(bytes)?;
        if bytes.len() < class.ehdr_size() {
            return Err(Error::ShortBuffer {
                wanted: class.ehdr_size(),
                got: bytes.len(),
            });
        }
        let header: Header = bytes.pread_with(0, class)?;
        if header.e_type != ET_REL {
            return Err(Error::BadObjectType(header.e_type));
        }
        if header.e_shentsize as usize != class.shdr_size() {
            return Err(Error::Malformed(format!(
                "e_shentsize {} does not match the {} expected for this class",
                header.e_shentsize,
                class.shdr_size()
            )));
        }
        let shnum = header.e_shnum as usize;
        if shnum == 0 {
            return Err(Error::Malformed("section header table is empty".into()));
        }
        if header.e_shstrndx as usize >= shnum {
            return Err(Error::Malformed(format!(
                "e_shstrndx {} out of range for {} sections",
                header.e_shstrndx, shnum
            )));
        }
        let shoff = usize::try_from(header.e_shoff)
            .map_err(|_| Error::Malformed("e_shoff does not fit in memory".into()))?;
        let table_size = shnum * class.shdr_size();
        let table_end = shoff
            .checked_add(table_size)
            .ok_or_else(|| Error::Malformed("section header table offset overflows".into()))?;
        if table_end > bytes.len() {
            return Err(Error::ShortBuffer {
                wanted: table_end,
                got: bytes.len(),
            });
        }

        let mut sections = Vec::with_capacity(shnum);
        for i in 0..shnum {
            let shdr: SectionHeader = bytes.pread_with(shoff + i * class.shdr_size(), class)?;
            let content = interpret_content(bytes, &shdr, class, i)?;
            sections.push(Section { header: shdr, content });
        }
        if sections[0].header.sh_type != SHT_NULL {
            return Err(Error::Malformed(
                "first section is not the SHT_NULL sentinel".into(),
            ));
        }

        let object = Object { class, header, sections };
        match object.sections[object.shstrndx()].content {
            SectionContent::Strtab(_) => {}
            _ => {
                return Err(Error::Malformed(
                    "e_shstrndx does not index a string table".into(),
                ))
            }
        }
        Ok(object)
    }

    #[inline]
    pub fn shstrndx(&self) -> usize {
        self.header.e_shstrndx as usize
    }

    /// The section-name string table.
    pub fn shstrtab(&self) -> Result<&Strtab> {
        match &self
            .sections
            .get(self.shstrndx())
            .ok_or_else(|| Error::Malformed("e_shstrndx out of range".into()))?
            .content
        {
            SectionContent::Strtab(strtab) => Ok(strtab),
            _ => Err(Error::Malformed(
                "e_shstrndx does not index a string table".into(),
            )),
        }
    }

    /// Resolves a section's name through the section-name string table.
    pub fn section_name(&self, ndx: usize) -> Result<&[u8]> {
        let sh_name = self
            .sections
            .get(ndx)
            .ok_or_else(|| Error::Malformed(format!("section index {} out of range", ndx)))?
            .header
            .sh_name;
        Ok(self.shstrtab()?.get(sh_name as usize))
    }

    /// A section name for error reporting; never fails.
    pub(crate) fn section_name_lossy(&self, ndx: usize) -> String {
        self.section_name(ndx)
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .unwrap_or_else(|_| format!("section {}", ndx))
    }

    /// Resolves a symbol's name. SECTION-typed symbols take the name of the
    /// section they stand for; everything else reads the symbol table's
    /// linked string table.
    pub fn symbol_name(&self, symtab_ndx: usize, sym_ndx: usize) -> Result<&[u8]> {
        let symtab = self
            .sections
            .get(symtab_ndx)
            .ok_or_else(|| Error::Malformed(format!("section index {} out of range", symtab_ndx)))?;
        let syms = match &symtab.content {
            SectionContent::Symtab(syms) => syms,
            _ => {
                return Err(Error::Malformed(format!(
                    "section {} is not a symbol table",
                    symtab_ndx
                )))
            }
        };
        let sym = syms.get(sym_ndx).ok_or_else(|| {
            Error::Malformed(format!("symbol index {} out of range", sym_ndx))
        })?;
        if sym.st_type() == STT_SECTION {
            return self.section_name(sym.st_shndx as usize);
        }
        let strtab_ndx = symtab.header.sh_link as usize;
        match &self
            .sections
            .get(strtab_ndx)
            .ok_or_else(|| Error::Malformed("symtab sh_link out of range".into()))?
            .content
        {
            SectionContent::Strtab(strtab) => Ok(strtab.get(sym.st_name as usize)),
            _ => Err(Error::Malformed(
                "symtab sh_link does not index a string table".into(),
            )),
        }
    }

    /// The index of the object's symbol table, if it has one. More than one
    /// symbol table is rejected.
    pub fn symtab_index(&self) -> Result<Option<usize>> {
        let mut found = None;
        for (i, section) in self.sections.iter().enumerate() {
            if section.is_symtab() {
                if found.is_some() {
                    return Err(Error::Malformed(
                        "object has more than one symbol table".into(),
                    ));
                }
                found = Some(i);
            }
        }
        Ok(found)
    }

    /// The entries of the symbol table at `ndx`.
    pub fn symbols(&self, ndx: usize) -> Result<&[Sym]> {
        match &self
            .sections
            .get(ndx)
            .ok_or_else(|| Error::Malformed(format!("section index {} out of range", ndx)))?
            .content
        {
            SectionContent::Symtab(syms) => Ok(syms),
            _ => Err(Error::Malformed(format!(
                "section {} is not a symbol table",
                ndx
            ))),
        }
    }

    pub(crate) fn symbols_mut(&mut self, ndx: usize) -> Result<&mut Vec<Sym>> {
        match &mut self
            .sections
            .get_mut(ndx)
            .ok_or_else(|| Error::Malformed(format!("section index {} out of range", ndx)))?
            .content
        {
            SectionContent::Symtab(syms) => Ok(syms),
            _ => Err(Error::Malformed(format!(
                "section {} is not a symbol table",
                ndx
            ))),
        }
    }

    /// Appends a section, bumps `e_shnum` and returns the new index.
    pub fn append_section(&mut self, section: Section) -> usize {
        self.sections.push(section);
        self.header.e_shnum += 1;
        self.sections.len() - 1
    }
}

fn interpret_content(
    bytes: &[u8],
    shdr: &SectionHeader,
    class: Class,
    ndx: usize,
) -> Result<SectionContent> {
    let offset = shdr.sh_offset as usize;
    let size = shdr.sh_size as usize;
    if shdr.sh_type == SHT_NOBITS || offset == 0 || size == 0 {
        return Ok(SectionContent::None);
    }
    let end = offset
        .checked_add(size)
        .ok_or_else(|| Error::Malformed(format!("section {} extent overflows", ndx)))?;
    if end > bytes.len() {
        return Err(Error::ShortBuffer {
            wanted: end,
            got: bytes.len(),
        });
    }
    let raw = &bytes[offset..end];

    let check_entsize = |expected: usize| -> Result<usize> {
        if shdr.sh_entsize as usize != expected {
            return Err(Error::Malformed(format!(
                "section {} sh_entsize {} != expected {}",
                ndx, shdr.sh_entsize, expected
            )));
        }
        if size % expected != 0 {
            return Err(Error::Malformed(format!(
                "section {} size {:#x} is not a multiple of its entry size",
                ndx, size
            )));
        }
        Ok(size / expected)
    };

    match shdr.sh_type {
        SHT_STRTAB => Ok(SectionContent::Strtab(Strtab::from_bytes(raw.to_vec()))),
        SHT_SYMTAB => {
            let count = check_entsize(class.sym_size())?;
            let mut syms = Vec::with_capacity(count);
            let mut at = 0;
            for _ in 0..count {
                syms.push(raw.gread_with::<Sym>(&mut at, class)?);
            }
            Ok(SectionContent::Symtab(syms))
        }
        SHT_RELA | SHT_REL => {
            let kind = if shdr.sh_type == SHT_RELA {
                RelocKind::Rela
            } else {
                RelocKind::Rel
            };
            let count = check_entsize(kind.entsize(class))?;
            let mut relocs = Vec::with_capacity(count);
            let mut at = 0;
            for _ in 0..count {
                relocs.push(raw.gread_with::<Reloc>(&mut at, (class, kind))?);
            }
            Ok(SectionContent::RelocTable(kind, relocs))
        }
        other => {
            if other != crate::elf::section_header::SHT_PROGBITS {
                debug!(
                    "leaving section {} (type {}) as opaque bytes",
                    ndx,
                    crate::elf::section_header::sht_to_str(other)
                );
            }
            Ok(SectionContent::Raw(raw.to_vec()))
        }
    }
}
