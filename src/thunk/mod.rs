//! The thunk synthesiser: grows a 32-bit object with the sections, symbols
//! and relocations that keep its former exports callable across the ABI
//! boundary.
//!
//! Inbound thunks (`.text.thunkin`) stand in for functions the object
//! defines: the 32-bit world calls the thunk, the thunk calls the 64-bit
//! implementation. Outbound thunks (`.text.thunkout`) stand in for
//! functions the object imports: 64-bit code calls the thunk, the thunk
//! calls whatever the linker resolves the import to. Each stub switches
//! CPU mode through a far jump whose target lives in an 8-byte jump-table
//! entry in the matching `.rodata.thunk*` section.

pub mod asm;
pub mod stub;

pub use self::stub::{stub_32_to_64, stub_64_to_32, Stub};

use std::collections::HashMap;

use log::debug;

use crate::elf::reloc::{Reloc, RelocKind, R_386_32, R_386_PC32};
use crate::elf::section_header::{
    SectionHeader, SHF_ALLOC, SHF_EXECINSTR, SHT_PROGBITS, SHT_RELA,
};
use crate::elf::sym::{
    st_info, Sym, STB_GLOBAL, STB_LOCAL, STT_FUNC, STT_NOTYPE, STT_SECTION, STV_DEFAULT,
};
use crate::elf::Class;
use crate::error::{Error, Result};
use crate::object::{Object, Section, SectionContent};
use crate::sig::Signature;

/// Long-mode 64-bit code segment selector.
const SEL_CODE64: u8 = 0x33;
/// Compatibility-mode 32-bit code segment selector.
const SEL_CODE32: u8 = 0x23;

/// Everything one stub's relocations need to know about the section group
/// it lands in.
struct ThunkGroup {
    text_ndx: usize,
    text_sym: u32,
    text_rela_ndx: usize,
    rodata_ndx: usize,
    rodata_sym: u32,
    rodata_rela_ndx: usize,
    /// Selector of the mode the first far jump enters.
    entry_sel: u8,
    /// Selector of the mode the second far jump returns to.
    exit_sel: u8,
}

impl Object {
    /// Inserts mode-switch thunks for every formerly GLOBAL symbol, using
    /// `signatures` for argument and return conventions.
    ///
    /// The object must already be 32-bit (`switch_bitness` has run). The
    /// pass finishes with an implicit `rela_to_rel(false)`, so the four new
    /// relocation sections come out in REL form under their `.rel.*` names.
    pub fn add_thunks(&mut self, signatures: &[Signature]) -> Result<()> {
        if self.class != Class::Elf32 {
            return Err(Error::Malformed(
                "thunks can only be added to a 32-bit object".into(),
            ));
        }
        let symtab_ndx = match self.symtab_index()? {
            Some(ndx) => ndx,
            None => return Ok(()),
        };
        let sigs_by_name: HashMap<&[u8], &Signature> = signatures
            .iter()
            .map(|sig| (sig.name.as_bytes(), sig))
            .collect();

        // New sections claim an impossible offset; the layout writer places
        // them after the existing content.
        let sentinel = self.header.e_shoff.saturating_sub(1);

        let exec = SHF_ALLOC | SHF_EXECINSTR;
        let text_in_ndx = self.append_progbits(b".text.thunkin", exec, sentinel)?;
        let text_out_ndx = self.append_progbits(b".text.thunkout", exec, sentinel)?;
        let rodata_in_ndx = self.append_progbits(b".rodata.thunkin", SHF_ALLOC, sentinel)?;
        let rodata_out_ndx = self.append_progbits(b".rodata.thunkout", SHF_ALLOC, sentinel)?;

        // Born as RELA but already named .rel.*: the closing rela_to_rel
        // pass runs without the rename step.
        let text_in_rela =
            self.append_rela(b".rel.text.thunkin", symtab_ndx, text_in_ndx, sentinel)?;
        let text_out_rela =
            self.append_rela(b".rel.text.thunkout", symtab_ndx, text_out_ndx, sentinel)?;
        let rodata_in_rela =
            self.append_rela(b".rel.rodata.thunkin", symtab_ndx, rodata_in_ndx, sentinel)?;
        let rodata_out_rela =
            self.append_rela(b".rel.rodata.thunkout", symtab_ndx, rodata_out_ndx, sentinel)?;

        let text_in_sym = self.append_section_symbol(symtab_ndx, text_in_ndx)? as u32;
        let text_out_sym = self.append_section_symbol(symtab_ndx, text_out_ndx)? as u32;
        let rodata_in_sym = self.append_section_symbol(symtab_ndx, rodata_in_ndx)? as u32;
        let rodata_out_sym = self.append_section_symbol(symtab_ndx, rodata_out_ndx)? as u32;

        let inbound = ThunkGroup {
            text_ndx: text_in_ndx,
            text_sym: text_in_sym,
            text_rela_ndx: text_in_rela,
            rodata_ndx: rodata_in_ndx,
            rodata_sym: rodata_in_sym,
            rodata_rela_ndx: rodata_in_rela,
            entry_sel: SEL_CODE64,
            exit_sel: SEL_CODE32,
        };
        let outbound = ThunkGroup {
            text_ndx: text_out_ndx,
            text_sym: text_out_sym,
            text_rela_ndx: text_out_rela,
            rodata_ndx: rodata_out_ndx,
            rodata_sym: rodata_out_sym,
            rodata_rela_ndx: rodata_out_rela,
            entry_sel: SEL_CODE32,
            exit_sel: SEL_CODE64,
        };

        // Snapshot the exported set before any demotion; names must be
        // resolved while the symbols still carry them.
        let mut globals: Vec<(usize, u8, Vec<u8>)> = Vec::new();
        for ndx in 0..self.symbols(symtab_ndx)?.len() {
            let sym = self.symbols(symtab_ndx)?[ndx];
            if sym.st_bind() != STB_GLOBAL {
                continue;
            }
            let name = self.symbol_name(symtab_ndx, ndx)?.to_vec();
            globals.push((ndx, sym.st_type(), name));
        }

        // Demote every export to LOCAL; sort the survivors into the two
        // thunk flavours and re-expose anything else as-is.
        let mut defined_funcs: Vec<(usize, Vec<u8>)> = Vec::new();
        let mut undefined_externs: Vec<(usize, Vec<u8>)> = Vec::new();
        for (ndx, typ, name) in globals {
            self.symbols_mut(symtab_ndx)?[ndx].st_info = st_info(STB_LOCAL, typ);
            match typ {
                STT_FUNC => defined_funcs.push((ndx, name)),
                STT_NOTYPE => undefined_externs.push((ndx, name)),
                _ => {
                    let mut copy = self.symbols(symtab_ndx)?[ndx];
                    copy.st_info = st_info(STB_GLOBAL, typ);
                    self.sections[symtab_ndx].append_sym(copy)?;
                }
            }
        }

        for (ndx, name) in &defined_funcs {
            let sig = lookup_signature(&sigs_by_name, name)?;
            let stub = stub_32_to_64(sig)?;
            let base = self.sections[text_in_ndx].header.sh_size as usize;

            let mut thunk_sym = self.symbols(symtab_ndx)?[*ndx];
            thunk_sym.st_shndx = text_in_ndx as u16;
            thunk_sym.st_value = base as u64;
            thunk_sym.st_size = stub.len() as u64;
            thunk_sym.st_info = st_info(STB_GLOBAL, STT_FUNC);
            self.sections[symtab_ndx].append_sym(thunk_sym)?;

            self.wire_stub(&stub, base, *ndx as u32, &inbound)?;
        }

        for (ndx, name) in &undefined_externs {
            let sig = lookup_signature(&sigs_by_name, name)?;
            let stub = stub_64_to_32(sig)?;
            let base = self.sections[text_out_ndx].header.sh_size as usize;

            // A fresh GLOBAL import keeps the old name; the original symbol
            // becomes the stub itself so every existing relocation now
            // lands on the thunk.
            let new_import = {
                let syms = self.symbols_mut(symtab_ndx)?;
                let mut new_import = syms[*ndx];
                new_import.st_info = st_info(STB_GLOBAL, STT_NOTYPE);
                syms[*ndx].st_value = base as u64;
                syms[*ndx].st_size = stub.len() as u64;
                syms[*ndx].st_info = st_info(STB_LOCAL, STT_NOTYPE);
                syms[*ndx].st_shndx = text_out_ndx as u16;
                new_import
            };
            let new_ndx = self.sections[symtab_ndx].append_sym(new_import)?;

            self.wire_stub(&stub, base, new_ndx as u32, &outbound)?;
        }

        // The LOCAL/GLOBAL pivot: everything appended after the demotion
        // pass is GLOBAL, everything before it is LOCAL by now.
        let first_global = self
            .symbols(symtab_ndx)?
            .iter()
            .position(|sym| sym.st_bind() == STB_GLOBAL)
            .unwrap_or(self.symbols(symtab_ndx)?.len());
        self.sections[symtab_ndx].header.sh_info = first_global as u32;

        debug!(
            "emitted {} inbound and {} outbound thunks",
            defined_funcs.len(),
            undefined_externs.len()
        );

        self.rela_to_rel(false)
    }

    /// Emits one stub's jump-table entries and the relocations that wire
    /// its three zero slots to the jump table and the callee.
    fn wire_stub(
        &mut self,
        stub: &Stub,
        base: usize,
        call_target_sym: u32,
        group: &ThunkGroup,
    ) -> Result<()> {
        let entry_slot = |sel: u8| [0, 0, 0, 0, sel, 0, 0, 0];

        let first_entry = self.sections[group.rodata_ndx].header.sh_size;
        self.sections[group.text_rela_ndx].append_reloc(Reloc {
            r_offset: (base + stub.first_jump_slot) as u64,
            r_sym: group.rodata_sym,
            r_type: R_386_32,
            r_addend: first_entry as i64,
        })?;
        self.sections[group.rodata_ndx].append_bytes(&entry_slot(group.entry_sel))?;

        self.sections[group.text_rela_ndx].append_reloc(Reloc {
            r_offset: (base + stub.call_slot) as u64,
            r_sym: call_target_sym,
            r_type: R_386_PC32,
            r_addend: -4,
        })?;

        let second_entry = self.sections[group.rodata_ndx].header.sh_size;
        self.sections[group.text_rela_ndx].append_reloc(Reloc {
            r_offset: (base + stub.second_jump_slot) as u64,
            r_sym: group.rodata_sym,
            r_type: R_386_32,
            r_addend: second_entry as i64,
        })?;
        self.sections[group.rodata_ndx].append_bytes(&entry_slot(group.exit_sel))?;

        // Each jump-table entry points back into the stub, at the first
        // instruction after its far jump.
        self.sections[group.rodata_rela_ndx].append_reloc(Reloc {
            r_offset: first_entry,
            r_sym: group.text_sym,
            r_type: R_386_32,
            r_addend: (base + stub.first_jump_slot + 4) as i64,
        })?;
        self.sections[group.rodata_rela_ndx].append_reloc(Reloc {
            r_offset: second_entry,
            r_sym: group.text_sym,
            r_type: R_386_32,
            r_addend: (base + stub.second_jump_slot + 4) as i64,
        })?;

        self.sections[group.text_ndx].append_bytes(&stub.code)
    }

    fn append_progbits(&mut self, name: &[u8], flags: u64, offset: u64) -> Result<usize> {
        let shstrndx = self.shstrndx();
        let sh_name = self.sections[shstrndx].add_str(name)?;
        Ok(self.append_section(Section {
            header: SectionHeader {
                sh_name,
                sh_type: SHT_PROGBITS,
                sh_flags: flags,
                sh_offset: offset,
                sh_addralign: 8,
                ..SectionHeader::default()
            },
            content: SectionContent::Raw(Vec::new()),
        }))
    }

    fn append_rela(
        &mut self,
        name: &[u8],
        symtab_ndx: usize,
        target_ndx: usize,
        offset: u64,
    ) -> Result<usize> {
        let shstrndx = self.shstrndx();
        let sh_name = self.sections[shstrndx].add_str(name)?;
        Ok(self.append_section(Section {
            header: SectionHeader {
                sh_name,
                sh_type: SHT_RELA,
                sh_offset: offset,
                sh_link: symtab_ndx as u32,
                sh_info: target_ndx as u32,
                sh_addralign: 8,
                sh_entsize: self.class.rela_size() as u64,
                ..SectionHeader::default()
            },
            content: SectionContent::RelocTable(RelocKind::Rela, Vec::new()),
        }))
    }

    fn append_section_symbol(&mut self, symtab_ndx: usize, target_ndx: usize) -> Result<usize> {
        self.sections[symtab_ndx].append_sym(Sym {
            st_name: 0,
            st_info: st_info(STB_LOCAL, STT_SECTION),
            st_other: STV_DEFAULT,
            st_shndx: target_ndx as u16,
            st_value: 0,
            st_size: 0,
        })
    }
}

fn lookup_signature<'a>(
    sigs_by_name: &HashMap<&[u8], &'a Signature>,
    name: &[u8],
) -> Result<&'a Signature> {
    sigs_by_name.get(name).copied().ok_or_else(|| {
        Error::BadSignature(format!(
            "no signature for symbol {}",
            String::from_utf8_lossy(name)
        ))
    })
}
