//! Structure-level transformations: re-emitting an object in the other
//! bitness and folding RELA addends down into REL form.

use log::debug;

use crate::elf::reloc::{map_type_to_386, Reloc, RelocKind, R_386_32, R_386_PC32};
use crate::elf::section_header::{SHT_REL, SHT_RELA, SHT_SYMTAB};
use crate::elf::Class;
use crate::error::{Error, Result};
use crate::object::{Object, SectionContent};
use crate::strtab::Strtab;

impl Object {
    /// Re-emits the whole object in the other bitness. Only the 64-to-32
    /// direction exists.
    ///
    /// Every header and entry keeps its semantic fields; identification
    /// bytes, machine, header sizes and tabular entry sizes follow the
    /// target class, and relocation types are mapped through the 64-to-32
    /// table. Switching a 32-bit object always fails with
    /// `UnsupportedBitnessChange`.
    pub fn switch_bitness(&self) -> Result<Object> {
        let target = self.class.other();
        if target == Class::Elf64 {
            return Err(Error::UnsupportedBitnessChange);
        }

        let mut header = self.header;
        header.e_ident = target.ident();
        header.e_machine = target.machine();
        header.e_ehsize = target.ehdr_size() as u16;
        header.e_shentsize = target.shdr_size() as u16;

        let mut sections = Vec::with_capacity(self.sections.len());
        for (ndx, original) in self.sections.iter().enumerate() {
            let mut section = original.clone();
            match section.header.sh_type {
                SHT_SYMTAB => {
                    section.header.sh_entsize = target.sym_size() as u64;
                    if let SectionContent::Symtab(syms) = &section.content {
                        section.header.sh_size =
                            (syms.len() * target.sym_size()) as u64;
                    }
                }
                SHT_RELA | SHT_REL => {
                    let kind = if section.header.sh_type == SHT_RELA {
                        RelocKind::Rela
                    } else {
                        RelocKind::Rel
                    };
                    section.header.sh_entsize = kind.entsize(target) as u64;
                    if let SectionContent::RelocTable(_, relocs) = &mut section.content {
                        for reloc in relocs.iter_mut() {
                            reloc.r_type =
                                map_type_to_386(reloc.r_type).ok_or_else(|| {
                                    Error::UnsupportedReloc {
                                        typ: reloc.r_type,
                                        section: self.section_name_lossy(ndx),
                                    }
                                })?;
                        }
                        section.header.sh_size =
                            (relocs.len() * kind.entsize(target)) as u64;
                    }
                }
                _ => {}
            }
            sections.push(section);
        }

        Ok(Object {
            class: target,
            header,
            sections,
        })
    }

    /// Converts every RELA section to REL by writing each entry's addend
    /// into the patched section's bytes at the relocated position.
    ///
    /// With `rename_sections`, the section-name string table is rebuilt
    /// from the logical name list with every `.rela*` name rewritten to
    /// `.rel*`, and every `sh_name` reassigned.
    pub fn rela_to_rel(&mut self, rename_sections: bool) -> Result<()> {
        for ndx in 0..self.sections.len() {
            if self.sections[ndx].header.sh_type != SHT_RELA {
                continue;
            }
            let entries: Vec<Reloc> = match &self.sections[ndx].content {
                SectionContent::RelocTable(_, relocs) => relocs.clone(),
                SectionContent::None => Vec::new(),
                _ => {
                    return Err(Error::Malformed(format!(
                        "RELA section {} does not hold relocation entries",
                        ndx
                    )))
                }
            };

            if !entries.is_empty() {
                let section_name = self.section_name_lossy(ndx);
                let target_ndx = self.sections[ndx].header.sh_info as usize;
                if target_ndx >= self.sections.len() {
                    return Err(Error::Malformed(format!(
                        "{} patches out-of-range section {}",
                        section_name, target_ndx
                    )));
                }
                let raw = match &mut self.sections[target_ndx].content {
                    SectionContent::Raw(bytes) => bytes,
                    _ => {
                        return Err(Error::Malformed(format!(
                            "{} patches a section without raw bytes",
                            section_name
                        )))
                    }
                };
                for entry in &entries {
                    if entry.r_type != R_386_32 && entry.r_type != R_386_PC32 {
                        return Err(Error::AddendOutOfRange {
                            section: section_name.clone(),
                            offset: entry.r_offset,
                        });
                    }
                    let offset = entry.r_offset as usize;
                    let addend = i32::try_from(entry.r_addend);
                    match (raw.get_mut(offset..offset + 4), addend) {
                        (Some(slot), Ok(addend)) => {
                            slot.copy_from_slice(&addend.to_le_bytes())
                        }
                        _ => {
                            return Err(Error::AddendOutOfRange {
                                section: section_name.clone(),
                                offset: entry.r_offset,
                            })
                        }
                    }
                }
                debug!(
                    "folded {} addends from {} into section {}",
                    entries.len(),
                    section_name,
                    target_ndx
                );
            }

            let rel_size = self.class.rel_size() as u64;
            let section = &mut self.sections[ndx];
            section.header.sh_type = SHT_REL;
            section.header.sh_entsize = rel_size;
            section.header.sh_size = entries.len() as u64 * rel_size;
            section.content = match std::mem::replace(&mut section.content, SectionContent::None)
            {
                SectionContent::RelocTable(_, relocs) => SectionContent::RelocTable(
                    RelocKind::Rel,
                    relocs
                        .into_iter()
                        .map(|reloc| Reloc {
                            r_addend: 0,
                            ..reloc
                        })
                        .collect(),
                ),
                other => other,
            };
        }

        if rename_sections {
            self.rename_rela_sections()?;
        }
        Ok(())
    }

    /// Rebuilds the section-name string table with `.rela*` names shortened
    /// to `.rel*`. Rebuilding from the logical name list sidesteps the
    /// offset arithmetic that in-place shortening would need.
    fn rename_rela_sections(&mut self) -> Result<()> {
        let count = self.sections.len();
        let mut names: Vec<Vec<u8>> = Vec::with_capacity(count);
        for ndx in 0..count {
            names.push(self.section_name(ndx)?.to_vec());
        }

        let mut strtab = Strtab::new();
        let mut interned: Vec<(Vec<u8>, u32)> = Vec::new();
        let mut offsets: Vec<u32> = Vec::with_capacity(count);
        for name in &names {
            let renamed = match name.strip_prefix(b".rela".as_slice()) {
                Some(suffix) => {
                    let mut renamed = b".rel".to_vec();
                    renamed.extend_from_slice(suffix);
                    renamed
                }
                None => name.clone(),
            };
            if renamed.is_empty() {
                offsets.push(0);
                continue;
            }
            let known = interned
                .iter()
                .find(|(known, _)| *known == renamed)
                .map(|&(_, offset)| offset);
            match known {
                Some(offset) => offsets.push(offset),
                None => {
                    let offset = strtab.add(&renamed);
                    interned.push((renamed, offset));
                    offsets.push(offset);
                }
            }
        }

        for (ndx, offset) in offsets.iter().enumerate() {
            self.sections[ndx].header.sh_name = *offset;
        }
        let shstrndx = self.shstrndx();
        let section = &mut self.sections[shstrndx];
        section.header.sh_size = strtab.len() as u64;
        section.content = SectionContent::Strtab(strtab);
        Ok(())
    }
}
